//! Creation of notes: in-memory documents materialised as files inside a
//! per-user storage tree.
//!
//! The crate is organised around the collaborators a note needs:
//!
//! *   [`store`]: a document store with conflict detection and ordered views.
//! *   [`vfs`]: the hierarchical storage tree (directories, files, content).
//! *   [`schema`]: the schema engine deriving a note's initial content.
//! *   [`lock`]: named locks serialising note creations per instance.
//! *   [`instance`]: a user's instance, tying configuration and the above together.
//! *   [`note`]: the note [`Document`](note::Document) and its creation path.

pub mod consts;
pub mod instance;
pub mod lock;
pub mod note;
pub mod schema;
pub mod store;
pub mod vfs;
