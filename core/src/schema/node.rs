use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::schema::{MarkType, NodeType};

/// A mark applied to a node, such as emphasis or a link.
#[derive(Debug, Clone)]
pub struct Mark {
    pub(crate) mark_type: Arc<MarkType>,
    pub(crate) attrs: Map<String, Value>,
}

impl Mark {
    pub fn mark_type(&self) -> &MarkType {
        &self.mark_type
    }

    pub fn attrs(&self) -> &Map<String, Value> {
        &self.attrs
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".to_string(), Value::from(self.mark_type.name()));
        if !self.attrs.is_empty() {
            obj.insert("attrs".to_string(), Value::Object(self.attrs.clone()));
        }
        Value::Object(obj)
    }
}

/// A node of a structured document.
///
/// Nodes are built through a [`Schema`](crate::schema::Schema), which checks
/// attributes and content.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) node_type: Arc<NodeType>,
    pub(crate) attrs: Map<String, Value>,
    pub(crate) content: Vec<Node>,
    pub(crate) marks: Vec<Mark>,
    pub(crate) text: Option<String>,
}

impl Node {
    pub fn node_type(&self) -> &NodeType {
        &self.node_type
    }

    pub fn attrs(&self) -> &Map<String, Value> {
        &self.attrs
    }

    pub fn content(&self) -> &[Node] {
        &self.content
    }

    pub fn marks(&self) -> &[Mark] {
        &self.marks
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// The JSON representation of the node and its descendants.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".to_string(), Value::from(self.node_type.name()));
        if !self.attrs.is_empty() {
            obj.insert("attrs".to_string(), Value::Object(self.attrs.clone()));
        }
        if !self.content.is_empty() {
            let content = self.content.iter().map(Node::to_json).collect();
            obj.insert("content".to_string(), Value::Array(content));
        }
        if let Some(text) = &self.text {
            obj.insert("text".to_string(), Value::from(text.as_str()));
        }
        if !self.marks.is_empty() {
            let marks = self.marks.iter().map(Mark::to_json).collect();
            obj.insert("marks".to_string(), Value::Array(marks));
        }
        Value::Object(obj)
    }
}

/// The canonical text form: `doc(paragraph("hello ", strong("world")))`.
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = match &self.text {
            Some(text) => serde_json::to_string(text).map_err(|_| fmt::Error)?,
            None if self.content.is_empty() => self.node_type.name().to_string(),
            None => {
                let children = self.content.iter().map(Node::to_string).collect::<Vec<_>>();
                format!("{}({})", self.node_type.name(), children.join(", "))
            }
        };
        for mark in self.marks.iter().rev() {
            out = format!("{}({})", mark.mark_type.name(), out);
        }
        f.write_str(&out)
    }
}
