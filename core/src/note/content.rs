use tracing::info;

use crate::instance::Instance;
use crate::note::{Document, Error, Result};
use crate::schema::{Node, Schema, SchemaSpec};

impl Document {
    /// The initial content of the note: the canonical text of an empty top node.
    ///
    /// The same schema always gives the same content.
    pub fn initial_content(&self, inst: &Instance) -> Result<Vec<u8>> {
        Ok(self.initial_node(inst)?.to_string().into_bytes())
    }

    pub(crate) fn initial_node(&self, inst: &Instance) -> Result<Node> {
        let spec = SchemaSpec::from_slice(self.schema.as_bytes()).map_err(|e| {
            info!(target: "notes", nspace = "notes", domain = %inst.domain(), "Cannot read the schema: {}", e);
            Error::InvalidSchema
        })?;

        let schema = Schema::new(&spec).map_err(|e| {
            info!(target: "notes", nspace = "notes", domain = %inst.domain(), "Cannot instantiate the schema: {}", e);
            Error::InvalidSchema
        })?;

        // Only the top node is built; a top node that requires children fails.
        let top = schema.top_node_type().name();
        schema.node(top, None, Vec::new(), Vec::new()).map_err(|e| {
            info!(target: "notes", nspace = "notes", domain = %inst.domain(), "The top node cannot be created: {}", e);
            Error::InvalidSchema
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceConfig;
    use tempfile::tempdir;

    async fn instance(dir: &std::path::Path) -> Instance {
        Instance::create(dir, InstanceConfig::new("alice.example.net")).await.unwrap()
    }

    #[tokio::test]
    async fn test_empty_top_node() {
        let dir = tempdir().unwrap();
        let inst = instance(dir.path()).await;
        let doc = Document::new("", r#"{"topNode":"doc","nodes":{"doc":{"content":"text*"}}}"#);
        assert_eq!(doc.initial_content(&inst).unwrap(), b"doc");
    }

    #[tokio::test]
    async fn test_content_is_deterministic() {
        let dir = tempdir().unwrap();
        let inst = instance(dir.path()).await;
        let schema = r#"{"nodes":[["doc",{"content":"block*"}],["paragraph",{"content":"text*","group":"block"}]]}"#;
        let first = Document::new("a", schema).initial_content(&inst).unwrap();
        let second = Document::new("b", schema).initial_content(&inst).unwrap();
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_invalid_schemas() {
        let dir = tempdir().unwrap();
        let inst = instance(dir.path()).await;
        let schemas = [
            "not json",
            "{}",
            r#"{"topNode":"page","nodes":{"doc":{}}}"#,
            r#"{"nodes":{"doc":{"content":"paragraph+"}}}"#,
            r#"{"nodes":[["doc",{"content":"paragraph+"}],["paragraph",{}]]}"#,
            r#"{"nodes":{"doc":{"content":"text{0,4000000000}"}}}"#,
        ];
        for schema in schemas {
            let res = Document::new("", schema).initial_content(&inst);
            assert!(matches!(res, Err(Error::InvalidSchema)), "{schema} should be rejected");
        }
    }
}
