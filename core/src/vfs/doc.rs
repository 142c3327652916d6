use chrono::{DateTime, Utc};
use mime::Mime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::consts;
use crate::store::{Doc, DocReference};
use crate::vfs::{check_file_name, join_path, Result};

pub(crate) const DIR_TYPE: &str = "directory";
pub(crate) const FILE_TYPE: &str = "file";

const METADATA_VERSION: u32 = 1;
const DOCTYPE_VERSION: &str = "1";

/// Provenance stamped on files and directories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CozyMetadata {
    pub doctype_version: String,
    pub metadata_version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_on: Option<String>,
}

impl CozyMetadata {
    /// Creates the metadata of a document created now, from the given instance URL.
    pub fn new(instance_url: &str) -> Self {
        let now = Utc::now();
        CozyMetadata {
            doctype_version: DOCTYPE_VERSION.to_string(),
            metadata_version: METADATA_VERSION,
            created_at: now,
            created_on: Some(instance_url.to_string()),
            updated_at: now,
            uploaded_at: None,
            uploaded_on: None,
        }
    }
}

/// A directory of the storage tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirDoc {
    #[serde(rename = "_id", default)]
    pub doc_id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "String::is_empty")]
    pub doc_rev: String,
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub name: String,
    /// Identifier of the parent directory, empty for the root.
    #[serde(default)]
    pub dir_id: String,
    #[serde(rename = "path")]
    pub fullpath: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_by: Vec<DocReference>,
    #[serde(rename = "cozyMetadata", default, skip_serializing_if = "Option::is_none")]
    pub cozy_metadata: Option<CozyMetadata>,
}

impl DirDoc {
    /// Creates a directory document whose full path is derived from its parent's.
    pub fn new_with_path(name: &str, dir_id: &str, parent_path: &str) -> Result<Self> {
        check_file_name(name)?;
        let now = Utc::now();
        Ok(DirDoc {
            doc_id: String::new(),
            doc_rev: String::new(),
            kind: DIR_TYPE.to_string(),
            name: name.to_string(),
            dir_id: dir_id.to_string(),
            fullpath: join_path(parent_path, name),
            created_at: now,
            updated_at: now,
            tags: Vec::new(),
            referenced_by: Vec::new(),
            cozy_metadata: None,
        })
    }

    pub(crate) fn root() -> Self {
        let now = Utc::now();
        DirDoc {
            doc_id: consts::ROOT_DIR_ID.to_string(),
            doc_rev: String::new(),
            kind: DIR_TYPE.to_string(),
            name: String::new(),
            dir_id: String::new(),
            fullpath: "/".to_string(),
            created_at: now,
            updated_at: now,
            tags: Vec::new(),
            referenced_by: Vec::new(),
            cozy_metadata: None,
        }
    }

    /// Attaches a reference, unless the directory already carries it.
    pub fn add_referenced_by(&mut self, reference: DocReference) {
        if !self.referenced_by.contains(&reference) {
            self.referenced_by.push(reference);
        }
    }
}

impl Doc for DirDoc {
    fn id(&self) -> &str {
        &self.doc_id
    }

    fn rev(&self) -> &str {
        &self.doc_rev
    }

    fn doc_type(&self) -> &str {
        consts::FILES
    }

    fn set_id(&mut self, id: String) {
        self.doc_id = id;
    }

    fn set_rev(&mut self, rev: String) {
        self.doc_rev = rev;
    }
}

/// A file of the storage tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDoc {
    #[serde(rename = "_id", default)]
    pub doc_id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "String::is_empty")]
    pub doc_rev: String,
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub name: String,
    pub dir_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub size: u64,
    /// Base64 blake3 digest of the content, computed by the storage layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub mime: String,
    pub class: String,
    pub executable: bool,
    pub trashed: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_by: Vec<DocReference>,
    #[serde(rename = "cozyMetadata", default, skip_serializing_if = "Option::is_none")]
    pub cozy_metadata: Option<CozyMetadata>,
}

impl FileDoc {
    /// Creates a file document. The class is the top-level type of `mime`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        dir_id: &str,
        size: u64,
        checksum: Option<String>,
        mime: &Mime,
        created_at: DateTime<Utc>,
        executable: bool,
        trashed: bool,
        tags: Vec<String>,
    ) -> Result<Self> {
        check_file_name(name)?;
        Ok(FileDoc {
            doc_id: String::new(),
            doc_rev: String::new(),
            kind: FILE_TYPE.to_string(),
            name: name.to_string(),
            dir_id: dir_id.to_string(),
            created_at,
            updated_at: created_at,
            size,
            checksum,
            mime: mime.essence_str().to_string(),
            class: mime.type_().as_str().to_string(),
            executable,
            trashed,
            tags,
            metadata: Map::new(),
            referenced_by: Vec::new(),
            cozy_metadata: None,
        })
    }
}

impl Doc for FileDoc {
    fn id(&self) -> &str {
        &self.doc_id
    }

    fn rev(&self) -> &str {
        &self.doc_rev
    }

    fn doc_type(&self) -> &str {
        consts::FILES
    }

    fn set_id(&mut self, id: String) {
        self.doc_id = id;
    }

    fn set_rev(&mut self, rev: String) {
        self.doc_rev = rev;
    }
}
