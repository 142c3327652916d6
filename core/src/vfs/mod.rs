//! Hierarchical storage: the tree of directories and files of an instance.
//!
//! Directories and files are described by documents ([`DirDoc`], [`FileDoc`])
//! kept in the instance's [`Store`](crate::store::Store), while the content of
//! files lives elsewhere (on the local filesystem for [`LocalVfs`]).
//!
//! # Writing files
//!
//! A file is written in three steps: [`Vfs::create_file`] opens a handle for a
//! new [`FileDoc`], [`File::write`] appends content, and [`File::close`]
//! commits. Closing checks that the declared size was written, computes the
//! checksum and persists the document; before that, nothing is visible in the
//! tree.
//!
//! # Conflicts
//!
//! Creating a directory at a path that is already taken, or updating a
//! directory from an outdated snapshot, fails with a store conflict. Use
//! [`Error::is_conflict`] to tell those apart from other failures.

pub use self::doc::{CozyMetadata, DirDoc, FileDoc};
pub use self::local::LocalVfs;

mod doc;
mod local;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::store;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Document store error: {0}")]
    Store(#[from] store::Error),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Invalid file or directory name: {0:?}")]
    IllegalFilename(String),

    #[error("Parent directory not found: {0}")]
    ParentNotFound(String),

    #[error("Directory not found: {0}")]
    DirNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileExists(String),

    #[error("Content length mismatch: expected {expected} bytes, got {actual}")]
    ContentLengthMismatch { expected: u64, actual: u64 },

    #[error("Content does not match the expected checksum")]
    InvalidChecksum,

    #[error("File handle is already closed")]
    Closed,

    #[error("Moving or renaming a directory is not supported: {0}")]
    PathChange(String),

    #[error("Invalid MIME type")]
    InvalidMime(#[from] mime::FromStrError),
}

impl Error {
    /// Tells whether the error reports a concurrent write on the same document.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Store(e) if e.is_conflict())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The storage tree of an instance.
#[async_trait]
pub trait Vfs: Send + Sync + fmt::Debug {
    async fn dir_by_id(&self, id: &str) -> Result<DirDoc>;

    async fn dir_by_path(&self, path: &str) -> Result<DirDoc>;

    /// Creates the directory and fills in its id and revision.
    async fn create_dir(&self, doc: &mut DirDoc) -> Result<()>;

    /// Replaces the directory document `old` with `new`.
    ///
    /// `old` must be the current version of the document.
    async fn update_dir_doc(&self, old: &DirDoc, new: &mut DirDoc) -> Result<()>;

    /// Opens a handle to write the content of a new file.
    async fn create_file(&self, doc: FileDoc) -> Result<Box<dyn File>>;

    async fn file_by_id(&self, id: &str) -> Result<FileDoc>;

    async fn file_by_path(&self, path: &str) -> Result<FileDoc>;
}

/// A writable handle on the content of a file being created.
#[async_trait]
pub trait File: Send {
    /// Appends bytes to the content, returning how many were written.
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Commits the file and returns its persisted document.
    async fn close(&mut self) -> Result<FileDoc>;

    async fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            if n == 0 {
                return Err(Error::Io(std::io::ErrorKind::WriteZero.into()));
            }
            buf = &buf[n..];
        }
        Ok(())
    }
}

/// Validates a single path segment.
pub(crate) fn check_file_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(Error::IllegalFilename(name.to_string()));
    }
    Ok(())
}

pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Splits a full path into its parent path and last segment.
pub(crate) fn split_path(path: &str) -> Option<(&str, &str)> {
    let path = normalize_path(path);
    let (parent, name) = path.rsplit_once('/')?;
    if name.is_empty() {
        return None;
    }
    Some((if parent.is_empty() { "/" } else { parent }, name))
}

pub(crate) fn normalize_path(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}
