//! Well-known doctypes, identifiers and names shared across the crate.

/// Doctype of the in-memory note documents.
pub const NOTES_DOCUMENTS: &str = "notes.documents";

/// Doctype of files and directories in the storage tree.
pub const FILES: &str = "files";

/// Doctype of installed applications, used as the owner type of references.
pub const APPS: &str = "apps";

/// Slug of the notes application.
pub const NOTES_SLUG: &str = "notes";

/// Identifier of the root directory of every instance.
pub const ROOT_DIR_ID: &str = "root-dir";

/// Extension of note files (without the leading dot).
pub const NOTE_EXTENSION: &str = "cozy-note";

/// MIME type of note files.
pub const NOTE_MIME: &str = "text/markdown";

/// Title given to notes created without one.
pub const DEFAULT_NOTE_TITLE: &str = "New note";

/// Untranslated name of the folder holding the notes.
pub const NOTES_DIR_NAME: &str = "Tree Notes";
