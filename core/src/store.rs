//! An in-memory document store with revision-based conflict detection and
//! ordered views.
//!
//! Documents are JSON values addressed by `(doctype, id)`. Every write bumps a
//! revision tag of the form `<generation>-<hex>`; an update carrying a stale tag
//! is rejected with [`Error::Conflict`]. Views map documents to string-array
//! keys and are kept sorted, so a key range query returns rows in key order.

use std::collections::HashMap;
use std::ops::Bound;
use std::sync::Mutex;

use crossbeam_skiplist::SkipMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::consts;

/// Highest string used as the open end of a view key range.
pub const MAX_STRING: &str = "\u{FFFF}";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Document update conflict: {doctype}/{id}")]
    Conflict { doctype: String, id: String },

    #[error("Document not found: {doctype}/{id}")]
    NotFound { doctype: String, id: String },

    #[error("Unknown view: {0}")]
    UnknownView(String),

    #[error("Document serialization/deserialization error")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Tells whether the error reports a concurrent write on the same document.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A document that can be persisted in the [`Store`].
pub trait Doc: Clone + Serialize + DeserializeOwned + Send + Sync {
    fn id(&self) -> &str;
    fn rev(&self) -> &str;
    fn doc_type(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn set_rev(&mut self, rev: String);
}

/// A reference from a document to the owner it is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocReference {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub id: String,
}

pub type ViewKey = Vec<String>;

/// A named index over the documents of one doctype.
#[derive(Debug)]
pub struct View {
    pub name: &'static str,
    pub doc_type: &'static str,
    pub map: fn(&Value) -> Vec<(ViewKey, Value)>,
}

/// Files and directories, keyed by `[owner type, owner id]` for every
/// reference they carry.
pub static FILES_REFERENCED_BY_VIEW: View = View {
    name: "files/referenced-by",
    doc_type: consts::FILES,
    map: map_referenced_by,
};

/// Directories keyed by `[fullpath]`.
pub static DIR_BY_PATH_VIEW: View = View {
    name: "files/by-path",
    doc_type: consts::FILES,
    map: map_dir_by_path,
};

/// Files and directories keyed by `[parent dir id, name]`.
pub static FILES_BY_PARENT_VIEW: View = View {
    name: "files/by-parent",
    doc_type: consts::FILES,
    map: map_by_parent,
};

fn map_referenced_by(doc: &Value) -> Vec<(ViewKey, Value)> {
    let Some(refs) = doc.get("referenced_by").and_then(Value::as_array) else {
        return Vec::new();
    };
    refs.iter()
        .filter_map(|r| serde_json::from_value::<DocReference>(r.clone()).ok())
        .map(|r| (vec![r.doc_type, r.id], Value::Null))
        .collect()
}

fn map_by_parent(doc: &Value) -> Vec<(ViewKey, Value)> {
    let dir_id = doc.get("dir_id").and_then(Value::as_str);
    let name = doc.get("name").and_then(Value::as_str);
    match (dir_id, name) {
        (Some(dir_id), Some(name)) if !dir_id.is_empty() => {
            vec![(vec![dir_id.to_string(), name.to_string()], Value::Null)]
        }
        _ => Vec::new(),
    }
}

fn map_dir_by_path(doc: &Value) -> Vec<(ViewKey, Value)> {
    if doc.get("type").and_then(Value::as_str) != Some("directory") {
        return Vec::new();
    }
    match doc.get("path").and_then(Value::as_str) {
        Some(path) => vec![(vec![path.to_string()], Value::Null)],
        None => Vec::new(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ViewRequest {
    pub start_key: ViewKey,
    pub end_key: ViewKey,
    pub include_docs: bool,
}

#[derive(Debug, Clone)]
pub struct ViewRow {
    pub id: String,
    pub key: ViewKey,
    pub value: Value,
    pub doc: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ViewResponse {
    pub rows: Vec<ViewRow>,
}

#[derive(Debug, Clone)]
struct StoredDoc {
    rev: String,
    body: Value,
}

#[derive(Debug)]
struct ViewIndex {
    view: &'static View,
    rows: SkipMap<(ViewKey, String), Value>,
}

/// The document store of one instance.
///
/// Reads are lock-free; writes are serialised so that the revision check and
/// the view maintenance of a single write are not interleaved with another.
#[derive(Debug)]
pub struct Store {
    docs: SkipMap<(String, String), StoredDoc>,
    views: HashMap<&'static str, ViewIndex>,
    write_lock: Mutex<()>,
}

impl Default for Store {
    fn default() -> Self {
        Store::new()
    }
}

impl Store {
    /// Creates an empty store with the built-in file views.
    pub fn new() -> Self {
        Store::with_views(&[&FILES_REFERENCED_BY_VIEW, &FILES_BY_PARENT_VIEW, &DIR_BY_PATH_VIEW])
    }

    pub fn with_views(views: &[&'static View]) -> Self {
        let views = views
            .iter()
            .map(|&view| (view.name, ViewIndex { view, rows: SkipMap::new() }))
            .collect();
        Store {
            docs: SkipMap::new(),
            views,
            write_lock: Mutex::new(()),
        }
    }

    /// Persists a new document, assigning it an id if it has none.
    pub fn create_doc<D: Doc>(&self, doc: &mut D) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if doc.id().is_empty() {
            doc.set_id(new_id());
        }
        let key = (doc.doc_type().to_string(), doc.id().to_string());
        if self.docs.contains_key(&key) {
            debug!("Create conflict on {}/{}", key.0, key.1);
            return Err(Error::Conflict { doctype: key.0, id: key.1 });
        }

        let rev = next_rev(None);
        let body = serde_json::to_value(&*doc)?;
        doc.set_rev(rev.clone());
        self.reindex(&key, None, Some(&body));
        self.docs.insert(key, StoredDoc { rev, body });
        Ok(())
    }

    /// Persists a new version of an existing document.
    ///
    /// The document must carry the current revision tag of the stored version.
    pub fn update_doc<D: Doc>(&self, doc: &mut D) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let key = (doc.doc_type().to_string(), doc.id().to_string());
        let current = self.docs.get(&key).ok_or_else(|| Error::NotFound {
            doctype: key.0.clone(),
            id: key.1.clone(),
        })?;
        if current.value().rev != doc.rev() {
            debug!("Update conflict on {}/{}: stale revision {}", key.0, key.1, doc.rev());
            return Err(Error::Conflict { doctype: key.0, id: key.1 });
        }

        let rev = next_rev(Some(doc.rev()));
        let body = serde_json::to_value(&*doc)?;
        let old_body = current.value().body.clone();
        doc.set_rev(rev.clone());
        self.reindex(&key, Some(&old_body), Some(&body));
        self.docs.insert(key, StoredDoc { rev, body });
        Ok(())
    }

    /// Fetches a document by doctype and id.
    pub fn get_doc<D: Doc>(&self, doctype: &str, id: &str) -> Result<D> {
        let entry = self
            .docs
            .get(&(doctype.to_string(), id.to_string()))
            .ok_or_else(|| Error::NotFound {
                doctype: doctype.to_string(),
                id: id.to_string(),
            })?;
        let stored = entry.value();
        let mut doc: D = serde_json::from_value(stored.body.clone())?;
        doc.set_id(id.to_string());
        doc.set_rev(stored.rev.clone());
        Ok(doc)
    }

    /// Queries a view over the inclusive key range of the request.
    pub fn exec_view(&self, view: &View, req: &ViewRequest) -> Result<ViewResponse> {
        let index = self
            .views
            .get(view.name)
            .ok_or_else(|| Error::UnknownView(view.name.to_string()))?;

        let lower = (req.start_key.clone(), String::new());
        let upper = (req.end_key.clone(), MAX_STRING.to_string());
        let rows = index
            .rows
            .range((Bound::Included(lower), Bound::Included(upper)))
            .map(|entry| {
                let (key, id) = entry.key();
                let doc = if req.include_docs {
                    self.docs
                        .get(&(index.view.doc_type.to_string(), id.clone()))
                        .map(|d| d.value().body.clone())
                } else {
                    None
                };
                ViewRow {
                    id: id.clone(),
                    key: key.clone(),
                    value: entry.value().clone(),
                    doc,
                }
            })
            .collect::<Vec<_>>();
        trace!("View {} returned {} rows", view.name, rows.len());
        Ok(ViewResponse { rows })
    }

    fn reindex(&self, key: &(String, String), old: Option<&Value>, new: Option<&Value>) {
        let (doctype, id) = key;
        for index in self.views.values().filter(|i| i.view.doc_type == doctype.as_str()) {
            if let Some(old) = old {
                for (view_key, _) in (index.view.map)(old) {
                    index.rows.remove(&(view_key, id.clone()));
                }
            }
            if let Some(new) = new {
                for (view_key, value) in (index.view.map)(new) {
                    index.rows.insert((view_key, id.clone()), value);
                }
            }
        }
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn next_rev(previous: Option<&str>) -> String {
    let generation = previous
        .and_then(|rev| rev.split_once('-'))
        .and_then(|(n, _)| n.parse::<u64>().ok())
        .unwrap_or(0);
    format!("{}-{}", generation + 1, Uuid::new_v4().simple())
}
