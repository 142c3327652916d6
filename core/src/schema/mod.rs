//! The schema engine: decides what a valid structured document looks like.
//!
//! A [`SchemaSpec`] is the serialized definition; [`Schema::new`] checks it and
//! resolves the content expressions of its node types. Documents are trees of
//! [`Node`]s built through the schema, which fills in default attributes and
//! rejects content the node types do not accept.
//!
//! ```rust
//! use notes_core::schema::{Schema, SchemaSpec};
//!
//! let spec = SchemaSpec::from_slice(br#"{"nodes":{"doc":{"content":"text*"}}}"#).unwrap();
//! let schema = Schema::new(&spec).unwrap();
//! let doc = schema.node("doc", None, vec![schema.text("hi", vec![]).unwrap()], vec![]).unwrap();
//! assert_eq!(doc.to_string(), r#"doc("hi")"#);
//! ```

pub use self::content::{ContentExpr, MAX_REPEAT};
pub use self::node::{Mark, Node};
pub use self::spec::{AttributeSpec, MarkSpec, NamedSpecs, NodeSpec, SchemaSpec};

mod content;
mod node;
mod spec;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

/// Name of the node type holding text. Every schema has one.
pub const TEXT: &str = "text";

const DEFAULT_TOP_NODE: &str = "doc";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot decode the schema specification")]
    Decode(#[from] serde_json::Error),

    #[error("Node type '{0}' is defined twice")]
    DuplicateNodeType(String),

    #[error("Mark type '{0}' is defined twice")]
    DuplicateMarkType(String),

    #[error("Schema is missing its top node type '{0}'")]
    MissingTopNode(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Unknown mark type: {0}")]
    UnknownMarkType(String),

    #[error("No node type or group '{name}' found in content expression '{expr}'")]
    UnresolvedName { name: String, expr: String },

    #[error("Invalid content expression '{expr}': {reason}")]
    InvalidContentExpression { expr: String, reason: String },

    #[error("No value supplied for attribute '{attr}' of '{owner}'")]
    MissingAttribute { owner: String, attr: String },

    #[error("Invalid content for node '{node}': {reason}")]
    InvalidContent { node: String, reason: String },

    #[error("Text nodes are created with Schema::text")]
    TextNodeCreation,

    #[error("Empty text nodes are not allowed")]
    EmptyText,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct NodeType {
    index: usize,
    name: String,
    groups: Vec<String>,
    inline: bool,
    atom: bool,
    attrs: BTreeMap<String, AttributeSpec>,
    content: ContentExpr,
    inline_content: bool,
    // `None` allows every mark.
    mark_set: Option<Vec<usize>>,
}

impl NodeType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn is_text(&self) -> bool {
        self.name == TEXT
    }

    pub fn is_inline(&self) -> bool {
        self.inline
    }

    pub fn is_atom(&self) -> bool {
        self.atom
    }

    pub fn content_expr(&self) -> &ContentExpr {
        &self.content
    }

    pub fn has_inline_content(&self) -> bool {
        self.inline_content
    }

    fn allows_mark(&self, mark: &MarkType) -> bool {
        self.mark_set.as_ref().is_none_or(|set| set.contains(&mark.index))
    }
}

#[derive(Debug)]
pub struct MarkType {
    index: usize,
    name: String,
    groups: Vec<String>,
    attrs: BTreeMap<String, AttributeSpec>,
}

impl MarkType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }
}

/// A checked schema.
#[derive(Debug)]
pub struct Schema {
    spec: SchemaSpec,
    nodes: Vec<Arc<NodeType>>,
    marks: Vec<Arc<MarkType>>,
    top_node: usize,
}

impl Schema {
    /// Builds a schema from its specification.
    ///
    /// A `text` node type is added when the specification does not declare one.
    pub fn new(spec: &SchemaSpec) -> Result<Self> {
        let mut node_specs: Vec<(String, NodeSpec)> = Vec::new();
        for (name, node) in spec.nodes.iter() {
            if node_specs.iter().any(|(n, _)| n == name) {
                return Err(Error::DuplicateNodeType(name.to_string()));
            }
            node_specs.push((name.to_string(), node.clone()));
        }
        if !node_specs.iter().any(|(n, _)| n == TEXT) {
            let text = NodeSpec {
                group: Some("inline".to_string()),
                inline: true,
                ..Default::default()
            };
            node_specs.push((TEXT.to_string(), text));
        }

        let top_name = spec.top_node.as_deref().unwrap_or(DEFAULT_TOP_NODE);
        let top_node = node_specs
            .iter()
            .position(|(n, _)| n == top_name)
            .ok_or_else(|| Error::MissingTopNode(top_name.to_string()))?;

        let mut marks: Vec<Arc<MarkType>> = Vec::new();
        for (index, (name, mark)) in spec.marks.iter().enumerate() {
            if marks.iter().any(|m| m.name == name) {
                return Err(Error::DuplicateMarkType(name.to_string()));
            }
            marks.push(Arc::new(MarkType {
                index,
                name: name.to_string(),
                groups: split_groups(mark.group.as_deref()),
                attrs: mark.attrs.clone(),
            }));
        }

        let resolve = |name: &str| -> Option<Vec<usize>> {
            if let Some(index) = node_specs.iter().position(|(n, _)| n == name) {
                return Some(vec![index]);
            }
            let members = node_specs
                .iter()
                .enumerate()
                .filter(|(_, (_, s))| split_groups(s.group.as_deref()).iter().any(|g| g == name))
                .map(|(index, _)| index)
                .collect::<Vec<_>>();
            (!members.is_empty()).then_some(members)
        };
        let is_inline = |(name, spec): &(String, NodeSpec)| spec.inline || name == TEXT;

        let mut nodes = Vec::with_capacity(node_specs.len());
        for (index, (name, node)) in node_specs.iter().enumerate() {
            let content = ContentExpr::parse(node.content.as_deref().unwrap_or(""), &resolve)?;
            let inline_content = content
                .referenced_types()
                .iter()
                .any(|&child| is_inline(&node_specs[child]));
            let mark_set = match node.marks.as_deref() {
                Some("_") => None,
                Some(expr) => Some(resolve_marks(&marks, expr)?),
                None if inline_content => None,
                None => Some(Vec::new()),
            };
            nodes.push(Arc::new(NodeType {
                index,
                name: name.clone(),
                groups: split_groups(node.group.as_deref()),
                inline: is_inline(&node_specs[index]),
                atom: node.atom,
                attrs: node.attrs.clone(),
                content,
                inline_content,
                mark_set,
            }));
        }

        Ok(Schema {
            spec: spec.clone(),
            nodes,
            marks,
            top_node,
        })
    }

    pub fn spec(&self) -> &SchemaSpec {
        &self.spec
    }

    /// The node type documents start from.
    pub fn top_node_type(&self) -> &NodeType {
        &self.nodes[self.top_node]
    }

    pub fn node_type(&self, name: &str) -> Option<&NodeType> {
        self.find_node_type(name).map(|t| &**t)
    }

    pub fn mark_type(&self, name: &str) -> Option<&MarkType> {
        self.marks.iter().find(|m| m.name == name).map(|m| &**m)
    }

    /// Creates a node of the named type.
    ///
    /// Missing attributes take their default; `content` must satisfy the type's
    /// content expression and only carry marks the type allows.
    pub fn node(
        &self,
        name: &str,
        attrs: Option<&Map<String, Value>>,
        content: Vec<Node>,
        marks: Vec<Mark>,
    ) -> Result<Node> {
        let node_type = self
            .find_node_type(name)
            .ok_or_else(|| Error::UnknownNodeType(name.to_string()))?
            .clone();
        if node_type.is_text() {
            return Err(Error::TextNodeCreation);
        }
        let attrs = compute_attrs(&node_type.name, &node_type.attrs, attrs)?;
        check_content(&node_type, &content)?;
        Ok(Node {
            node_type,
            attrs,
            content,
            marks,
            text: None,
        })
    }

    /// Creates a text node.
    pub fn text(&self, text: &str, marks: Vec<Mark>) -> Result<Node> {
        if text.is_empty() {
            return Err(Error::EmptyText);
        }
        let node_type = self
            .find_node_type(TEXT)
            .ok_or_else(|| Error::UnknownNodeType(TEXT.to_string()))?
            .clone();
        Ok(Node {
            node_type,
            attrs: Map::new(),
            content: Vec::new(),
            marks,
            text: Some(text.to_string()),
        })
    }

    /// Creates a mark of the named type.
    pub fn mark(&self, name: &str, attrs: Option<&Map<String, Value>>) -> Result<Mark> {
        let mark_type = self
            .marks
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| Error::UnknownMarkType(name.to_string()))?
            .clone();
        let attrs = compute_attrs(&mark_type.name, &mark_type.attrs, attrs)?;
        Ok(Mark { mark_type, attrs })
    }

    fn find_node_type(&self, name: &str) -> Option<&Arc<NodeType>> {
        self.nodes.iter().find(|t| t.name == name)
    }
}

fn split_groups(groups: Option<&str>) -> Vec<String> {
    groups
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn resolve_marks(marks: &[Arc<MarkType>], expr: &str) -> Result<Vec<usize>> {
    let mut out = Vec::new();
    for word in expr.split_whitespace() {
        let found = marks
            .iter()
            .filter(|m| m.name == word || m.groups.iter().any(|g| g == word))
            .map(|m| m.index)
            .collect::<Vec<_>>();
        if found.is_empty() {
            return Err(Error::UnknownMarkType(word.to_string()));
        }
        out.extend(found);
    }
    Ok(out)
}

fn compute_attrs(
    owner: &str,
    specs: &BTreeMap<String, AttributeSpec>,
    given: Option<&Map<String, Value>>,
) -> Result<Map<String, Value>> {
    let mut attrs = Map::new();
    for (name, spec) in specs {
        let value = given
            .and_then(|g| g.get(name))
            .cloned()
            .or_else(|| spec.default.clone())
            .ok_or_else(|| Error::MissingAttribute {
                owner: owner.to_string(),
                attr: name.clone(),
            })?;
        attrs.insert(name.clone(), value);
    }
    Ok(attrs)
}

fn check_content(node_type: &NodeType, content: &[Node]) -> Result<()> {
    let types = content.iter().map(|n| n.node_type.index).collect::<Vec<_>>();
    if !node_type.content.matches(&types) {
        return Err(Error::InvalidContent {
            node: node_type.name.clone(),
            reason: format!("expected content matching '{}'", node_type.content.source()),
        });
    }
    for mark in content.iter().flat_map(|child| child.marks.iter()) {
        if !node_type.allows_mark(&mark.mark_type) {
            return Err(Error::InvalidContent {
                node: node_type.name.clone(),
                reason: format!("mark '{}' is not allowed", mark.mark_type.name),
            });
        }
    }
    Ok(())
}
