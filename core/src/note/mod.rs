//! Notes: structured documents materialised as files of the storage tree.
//!
//! Creating a note ([`Document::create`]) runs under the instance's notes lock:
//!
//! 1.  the initial content is derived from the note's schema;
//! 2.  the parent directory is the note's own `dir_id`, or the instance's notes
//!     directory, created on first use;
//! 3.  the file is written, its metadata mirroring the note.
//!
//! A failure at any step leaves no file behind. The notes directory may
//! survive a failed creation and is reused by the next one.

mod content;
mod dir;
mod file;

use std::fmt;
use std::sync::Arc;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::consts;
use crate::instance::Instance;
use crate::lock;
use crate::store::Doc;
use crate::vfs::{self, FileDoc};

pub use self::dir::ensure_notes_dir;
pub use self::file::write_file;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid schema for the note")]
    InvalidSchema,

    #[error("Cannot acquire the notes lock: {0}")]
    LockUnavailable(#[from] lock::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] vfs::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The serialized schema of a note.
///
/// The bytes are never mutated: clones share them.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SchemaBlob(Arc<[u8]>);

impl SchemaBlob {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        SchemaBlob(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Tells whether both blobs share the same bytes.
    pub fn ptr_eq(a: &SchemaBlob, b: &SchemaBlob) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// The schema as JSON, or as a string when the bytes are not JSON.
    pub fn to_value(&self) -> Value {
        serde_json::from_slice(&self.0)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&self.0).into_owned()))
    }
}

impl From<Vec<u8>> for SchemaBlob {
    fn from(bytes: Vec<u8>) -> Self {
        SchemaBlob::new(bytes)
    }
}

impl From<&[u8]> for SchemaBlob {
    fn from(bytes: &[u8]) -> Self {
        SchemaBlob::new(bytes)
    }
}

impl From<&str> for SchemaBlob {
    fn from(s: &str) -> Self {
        SchemaBlob::new(s.as_bytes())
    }
}

impl fmt::Debug for SchemaBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaBlob({} bytes)", self.0.len())
    }
}

impl Serialize for SchemaBlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SchemaBlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let bytes = match value {
            Value::Null => Vec::new(),
            Value::String(s) => s.into_bytes(),
            value => serde_json::to_vec(&value).map_err(serde::de::Error::custom)?,
        };
        Ok(SchemaBlob::from(bytes))
    }
}

/// A note in memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id", default)]
    pub doc_id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "String::is_empty")]
    pub doc_rev: String,
    #[serde(default)]
    pub title: String,
    /// Parent directory of the note file. Empty means the notes directory.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dir_id: String,
    /// Number of edits since creation, distinct from the store revision.
    #[serde(default)]
    pub revision: u64,
    pub schema: SchemaBlob,
    #[serde(default)]
    pub content: Value,
}

impl Doc for Document {
    fn id(&self) -> &str {
        &self.doc_id
    }

    fn rev(&self) -> &str {
        &self.doc_rev
    }

    fn doc_type(&self) -> &str {
        consts::NOTES_DOCUMENTS
    }

    fn set_id(&mut self, id: String) {
        self.doc_id = id;
    }

    fn set_rev(&mut self, rev: String) {
        self.doc_rev = rev;
    }
}

impl Document {
    pub fn new(title: impl Into<String>, schema: impl Into<SchemaBlob>) -> Self {
        Document {
            title: title.into(),
            schema: schema.into(),
            ..Default::default()
        }
    }

    /// Creates the file of this note and returns its committed document.
    pub async fn create(&mut self, inst: &Instance) -> Result<FileDoc> {
        self.create_cancellable(inst, &CancellationToken::new()).await
    }

    /// Like [`Document::create`], giving up waiting for the notes lock once
    /// `cancel` fires.
    #[instrument(skip(self, inst, cancel), fields(domain = %inst.domain(), title = %self.title))]
    pub async fn create_cancellable(&mut self, inst: &Instance, cancel: &CancellationToken) -> Result<FileDoc> {
        let _lock = inst.locker().lock(&inst.notes_lock(), cancel).await?;

        self.revision = 0;
        let node = self.initial_node(inst)?;
        let content = node.to_string().into_bytes();
        let json = node.to_json();

        let file_doc = self.new_file_doc(inst, &content, &json).await?;
        let file_doc = write_file(inst.vfs(), file_doc, &content).await?;
        self.content = json;
        debug!("Note created as file {}", file_doc.doc_id);
        Ok(file_doc)
    }
}
