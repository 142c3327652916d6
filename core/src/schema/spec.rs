use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::{Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::Result;

/// The serialized definition of a schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSpec {
    #[serde(default)]
    pub nodes: NamedSpecs<NodeSpec>,
    #[serde(default)]
    pub marks: NamedSpecs<MarkSpec>,
    /// Name of the node type documents start from, `doc` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_node: Option<String>,
}

impl SchemaSpec {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Named specs, in declaration order.
///
/// Accepts either a JSON object or a list of `[name, spec]` pairs. Both keep
/// the order of the input; a name given twice is kept twice.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedSpecs<T>(pub Vec<(String, T)>);

impl<T> Default for NamedSpecs<T> {
    fn default() -> Self {
        NamedSpecs(Vec::new())
    }
}

impl<T> NamedSpecs<T> {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Serialize> Serialize for NamedSpecs<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for NamedSpecs<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(NamedSpecsVisitor(PhantomData))
    }
}

struct NamedSpecsVisitor<T>(PhantomData<T>);

impl<'de, T: Deserialize<'de>> Visitor<'de> for NamedSpecsVisitor<T> {
    type Value = NamedSpecs<T>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an object or a list of [name, spec] pairs")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
        let mut specs = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(pair) = seq.next_element::<(String, T)>()? {
            specs.push(pair);
        }
        Ok(NamedSpecs(specs))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
        let mut specs = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some(entry) = map.next_entry::<String, T>()? {
            specs.push(entry);
        }
        Ok(NamedSpecs(specs))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Content expression, e.g. `paragraph+` or `(text | image)*`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Marks allowed inside the node: `_` for all, space-separated names or groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marks: Option<String>,
    /// Space-separated groups the node belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub inline: bool,
    #[serde(default)]
    pub atom: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, AttributeSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, AttributeSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    /// Value used when none is supplied. An attribute without one is required.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

// Keeps `"default": null` apart from a missing default.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodes_as_object() {
        let spec = SchemaSpec::from_slice(br#"{"topNode":"doc","nodes":{"doc":{"content":"text*"}}}"#).unwrap();
        assert_eq!(spec.top_node.as_deref(), Some("doc"));
        let (name, node) = spec.nodes.iter().next().unwrap();
        assert_eq!(name, "doc");
        assert_eq!(node.content.as_deref(), Some("text*"));
    }

    #[test]
    fn test_nodes_as_pairs_keep_order() {
        let spec = SchemaSpec::from_slice(
            br#"{"nodes":[["doc",{"content":"block+"}],["paragraph",{"group":"block"}],["text",{}]]}"#,
        )
        .unwrap();
        let names = spec.nodes.iter().map(|(name, _)| name).collect::<Vec<_>>();
        assert_eq!(names, ["doc", "paragraph", "text"]);
    }

    #[test]
    fn test_objects_keep_declaration_order() {
        let spec = SchemaSpec::from_slice(
            br#"{"nodes":{"zeta":{},"doc":{"content":"zeta*"},"alpha":{}},"marks":{"strong":{},"em":{}}}"#,
        )
        .unwrap();
        let nodes = spec.nodes.iter().map(|(name, _)| name).collect::<Vec<_>>();
        assert_eq!(nodes, ["zeta", "doc", "alpha"]);
        let marks = spec.marks.iter().map(|(name, _)| name).collect::<Vec<_>>();
        assert_eq!(marks, ["strong", "em"]);
    }

    #[test]
    fn test_duplicate_names_are_kept() {
        let spec = SchemaSpec::from_slice(br#"{"nodes":{"doc":{},"doc":{"content":"text*"}}}"#).unwrap();
        assert_eq!(spec.nodes.0.len(), 2);
    }

    #[test]
    fn test_null_default_is_a_default() {
        let spec = SchemaSpec::from_slice(
            br#"{"nodes":{"heading":{"attrs":{"level":{"default":null},"id":{}}}}}"#,
        )
        .unwrap();
        let (_, heading) = spec.nodes.iter().next().unwrap();
        assert_eq!(heading.attrs["level"].default, Some(Value::Null));
        assert_eq!(heading.attrs["id"].default, None);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let spec = SchemaSpec::from_slice(br#"{"nodes":{"doc":{"content":"text*","toDOM":"x"}},"extra":1}"#);
        assert!(spec.is_ok());
    }

    #[test]
    fn test_not_a_spec() {
        assert!(SchemaSpec::from_slice(b"not json").is_err());
        assert!(SchemaSpec::from_slice(br#"{"nodes":42}"#).is_err());
    }
}
