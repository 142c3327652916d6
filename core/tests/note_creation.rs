mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tempfile::tempdir;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use notes_core::consts::ROOT_DIR_ID;
use notes_core::instance::{FILES_DIR_NAME, Instance, InstanceConfig};
use notes_core::lock::{self, LockGuard, Locker};
use notes_core::note::{Document, Error, SchemaBlob, ensure_notes_dir};
use notes_core::store::Store;
use notes_core::vfs::{DirDoc, LocalVfs};

use common::{DOMAIN, MINIMAL_SCHEMA, init_tracing, new_instance, new_instance_with};

/// A lock service that cannot be reached.
#[derive(Debug)]
struct UnreachableLocker;

#[async_trait]
impl Locker for UnreachableLocker {
    async fn lock(&self, _name: &str, _cancel: &CancellationToken) -> lock::Result<LockGuard> {
        Err(lock::Error::Backend("connection refused".into()))
    }
}

async fn notes_dir(inst: &Instance) -> DirDoc {
    inst.vfs()
        .dir_by_path("/Tree Notes")
        .await
        .expect("notes directory should exist")
}

#[tokio::test]
async fn create_note_with_minimal_schema() {
    let dir = tempdir().unwrap();
    let inst = new_instance(dir.path()).await;

    let mut doc = Document::new("", MINIMAL_SCHEMA);
    doc.revision = 7;
    let file = doc.create(&inst).await.expect("Failed to create note");

    assert_eq!(file.name, "New note.cozy-note");
    assert_eq!(file.mime, "text/markdown");
    assert_eq!(file.class, "text");
    assert_eq!(file.size, 3);
    assert!(file.checksum.is_some());
    assert!(!file.doc_id.is_empty());
    assert_eq!(file.metadata["revision"], 0);
    assert_eq!(file.metadata["title"], "New note");
    assert_eq!(file.metadata["content"], serde_json::json!({"type": "doc"}));
    assert_eq!(file.metadata["schema"]["topNode"], "doc");
    let cozy = file.cozy_metadata.as_ref().unwrap();
    assert_eq!(cozy.created_on.as_deref(), Some("https://alice.example.net/"));
    assert!(cozy.uploaded_at.is_some());

    assert_eq!(doc.revision, 0);
    assert_eq!(doc.title, "New note");

    let parent = notes_dir(&inst).await;
    assert_eq!(file.dir_id, parent.doc_id);
    assert_eq!(parent.dir_id, ROOT_DIR_ID);

    let on_disk = dir.path().join(FILES_DIR_NAME).join("Tree Notes").join("New note.cozy-note");
    assert_eq!(fs::read(&on_disk).await.unwrap(), b"doc");

    let found = inst.vfs().file_by_path("/Tree Notes/New note.cozy-note").await.unwrap();
    assert_eq!(found.doc_id, file.doc_id);
}

#[tokio::test]
async fn create_note_slash_in_title() {
    let dir = tempdir().unwrap();
    let inst = new_instance(dir.path()).await;

    let file = Document::new("A/B", MINIMAL_SCHEMA).create(&inst).await.unwrap();
    assert_eq!(file.name, "A-B.cozy-note");
    assert_eq!(file.metadata["title"], "A/B");
}

#[tokio::test]
async fn create_note_in_explicit_dir() {
    let dir = tempdir().unwrap();
    let inst = new_instance(dir.path()).await;
    let mut inbox = DirDoc::new_with_path("Inbox", ROOT_DIR_ID, "/").unwrap();
    inst.vfs().create_dir(&mut inbox).await.unwrap();

    let mut doc = Document::new("Todo", MINIMAL_SCHEMA);
    doc.dir_id = inbox.doc_id.clone();
    let file = doc.create(&inst).await.unwrap();

    assert_eq!(file.dir_id, inbox.doc_id);
    assert!(inst.vfs().file_by_path("/Inbox/Todo.cozy-note").await.is_ok());
    assert!(inst.vfs().dir_by_path("/Tree Notes").await.is_err());
}

#[tokio::test]
async fn create_note_invalid_schema_has_no_side_effects() {
    let dir = tempdir().unwrap();
    let inst = new_instance(dir.path()).await;

    for schema in ["not json", "{}", r#"{"topNode":"page","nodes":{"doc":{}}}"#] {
        let res = Document::new("Broken", schema).create(&inst).await;
        assert!(matches!(res, Err(Error::InvalidSchema)), "{schema}: {res:?}");
    }

    assert!(inst.vfs().dir_by_path("/Tree Notes").await.is_err());
    let mut entries = fs::read_dir(dir.path().join(FILES_DIR_NAME)).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn create_notes_share_the_notes_dir() {
    let dir = tempdir().unwrap();
    let inst = new_instance(dir.path()).await;

    let mut docs = (0..4)
        .map(|i| Document::new(format!("Note {i}"), MINIMAL_SCHEMA))
        .collect::<Vec<_>>();
    let results = join_all(docs.iter_mut().map(|doc| doc.create(&inst))).await;

    let parent = notes_dir(&inst).await;
    for res in results {
        assert_eq!(res.expect("Failed to create note").dir_id, parent.doc_id);
    }
    assert_eq!(parent.referenced_by.len(), 1);
}

#[tokio::test]
async fn ensure_notes_dir_under_race() {
    let dir = tempdir().unwrap();
    let inst = new_instance(dir.path()).await;

    let ids = join_all((0..3).map(|_| ensure_notes_dir(&inst))).await;
    let ids = ids.into_iter().collect::<Result<Vec<_>, _>>().unwrap();
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(notes_dir(&inst).await.doc_id, ids[0]);
}

#[tokio::test]
async fn create_note_adopts_existing_dir() {
    let dir = tempdir().unwrap();
    let inst = new_instance(dir.path()).await;
    let mut existing = DirDoc::new_with_path("Tree Notes", ROOT_DIR_ID, "/").unwrap();
    inst.vfs().create_dir(&mut existing).await.unwrap();
    assert!(existing.referenced_by.is_empty());

    let file = Document::new("First", MINIMAL_SCHEMA).create(&inst).await.unwrap();
    assert_eq!(file.dir_id, existing.doc_id);

    let parent = notes_dir(&inst).await;
    assert_eq!(parent.referenced_by.len(), 1);
    assert_eq!(parent.referenced_by[0].id, "apps/notes");
}

#[tokio::test]
async fn create_note_translated_dir() {
    let dir = tempdir().unwrap();
    let inst = new_instance_with(dir.path(), |config| {
        config.translations.insert("Tree Notes".into(), "Notes arborescentes".into());
    })
    .await;

    let file = Document::new("x", MINIMAL_SCHEMA).create(&inst).await.unwrap();
    let parent = inst.vfs().dir_by_id(&file.dir_id).await.unwrap();
    assert_eq!(parent.fullpath, "/Notes arborescentes");
}

#[tokio::test]
async fn create_note_lock_timeout() {
    let dir = tempdir().unwrap();
    let inst = new_instance_with(dir.path(), |config| config.lock_timeout_ms = 50).await;
    let held = inst.locker().lock(&inst.notes_lock(), &CancellationToken::new()).await.unwrap();

    let res = Document::new("Late", MINIMAL_SCHEMA).create(&inst).await;
    assert!(matches!(res, Err(Error::LockUnavailable(lock::Error::Timeout(_)))), "{res:?}");
    assert!(inst.vfs().dir_by_path("/Tree Notes").await.is_err());

    drop(held);
    assert!(Document::new("Late", MINIMAL_SCHEMA).create(&inst).await.is_ok());
}

#[tokio::test]
async fn create_note_cancelled_while_waiting() {
    let dir = tempdir().unwrap();
    let inst = new_instance_with(dir.path(), |config| config.lock_timeout_ms = 60_000).await;
    let _held = inst.locker().lock(&inst.notes_lock(), &CancellationToken::new()).await.unwrap();

    let cancel = CancellationToken::new();
    let mut doc = Document::new("Never", MINIMAL_SCHEMA);
    let (res, ()) = tokio::join!(doc.create_cancellable(&inst, &cancel), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    assert!(matches!(res, Err(Error::LockUnavailable(lock::Error::Cancelled))), "{res:?}");
}

#[tokio::test]
async fn create_note_lock_backend_down() {
    init_tracing();
    let dir = tempdir().unwrap();
    let store = Arc::new(Store::new());
    let vfs = LocalVfs::open(store.clone(), dir.path().join("files"), dir.path().join("tmp"))
        .await
        .unwrap();
    let inst = Instance::new(InstanceConfig::new(DOMAIN), store, Arc::new(vfs), Arc::new(UnreachableLocker)).unwrap();

    let mut doc = Document::new("Offline", MINIMAL_SCHEMA);
    let res = doc.create(&inst).await;
    assert!(matches!(res, Err(Error::LockUnavailable(lock::Error::Backend(_)))), "{res:?}");
    assert!(doc.content.is_null());
    assert!(inst.vfs().dir_by_path("/Tree Notes").await.is_err());
    let mut entries = fs::read_dir(dir.path().join("files")).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn create_note_same_title_twice() {
    let dir = tempdir().unwrap();
    let inst = new_instance(dir.path()).await;

    let mut first = Document::new("Twin", MINIMAL_SCHEMA);
    first.create(&inst).await.unwrap();
    assert_eq!(first.content, serde_json::json!({"type": "doc"}));

    let mut second = Document::new("Twin", MINIMAL_SCHEMA);
    let res = second.create(&inst).await;
    assert!(matches!(res, Err(Error::Storage(notes_core::vfs::Error::FileExists(_)))), "{res:?}");
    assert!(second.content.is_null());
}

#[tokio::test]
async fn notes_survive_reopening() {
    let dir = tempdir().unwrap();
    let inst = new_instance(dir.path()).await;
    Document::new("Kept", MINIMAL_SCHEMA).create(&inst).await.unwrap();
    drop(inst);

    let inst = Instance::open(dir.path()).await.unwrap();
    let file = inst.vfs().file_by_path("/Tree Notes/Kept.cozy-note").await.unwrap();
    assert_eq!(file.mime, "text/markdown");
    assert_eq!(file.size, 3);
}

#[test]
fn cloned_note_shares_schema() {
    let doc = Document::new("Original", MINIMAL_SCHEMA);
    let copy = doc.clone();
    assert!(SchemaBlob::ptr_eq(&doc.schema, &copy.schema));
}
