use chrono::Utc;
use mime::Mime;
use serde_json::{Map, Value};
use tracing::debug;

use crate::consts;
use crate::instance::Instance;
use crate::note::Document;
use crate::vfs::{self, CozyMetadata, FileDoc, Vfs};

impl Document {
    /// Name of the note file, defaulting the title when it is empty.
    pub fn filename(&mut self) -> String {
        if self.title.is_empty() {
            self.title = consts::DEFAULT_NOTE_TITLE.to_string();
        }
        format!("{}.{}", self.title.replace('/', "-"), consts::NOTE_EXTENSION)
    }

    /// Metadata of the note file, mirroring the note.
    pub fn metadata(&self) -> Map<String, Value> {
        self.metadata_with(&self.content)
    }

    fn metadata_with(&self, content: &Value) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("title".to_string(), Value::from(self.title.as_str()));
        metadata.insert("content".to_string(), content.clone());
        metadata.insert("revision".to_string(), Value::from(self.revision));
        metadata.insert("schema".to_string(), self.schema.to_value());
        metadata
    }

    /// The file document of the note, its metadata carrying `node` as content.
    pub(crate) async fn new_file_doc(&mut self, inst: &Instance, content: &[u8], node: &Value) -> vfs::Result<FileDoc> {
        let dir_id = self.parent_dir_id(inst).await?;
        let mime: Mime = consts::NOTE_MIME.parse()?;
        let mut file_doc = FileDoc::new(
            &self.filename(),
            &dir_id,
            content.len() as u64,
            None,
            &mime,
            Utc::now(),
            false,
            false,
            Vec::new(),
        )?;
        file_doc.metadata = self.metadata_with(node);
        file_doc.cozy_metadata = Some(CozyMetadata::new(inst.page_url("/").as_str()));
        Ok(file_doc)
    }
}

/// Writes `content` as the file described by `doc` and returns the committed
/// document.
///
/// The handle is closed even when writing fails. A write error wins over a
/// close error; a close error is returned when the write went through.
pub async fn write_file(fs: &dyn Vfs, doc: FileDoc, content: &[u8]) -> vfs::Result<FileDoc> {
    let mut file = fs.create_file(doc).await?;
    let written = file.write_all(content).await;
    let closed = file.close().await;
    match (written, closed) {
        (Err(e), Err(close_err)) => {
            debug!("Dropping close error after failed write: {}", close_err);
            Err(e)
        }
        (Err(e), Ok(_)) => Err(e),
        (Ok(()), closed) => closed,
    }
}
