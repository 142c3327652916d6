use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::consts;
use crate::store::{self, Store, ViewRequest, DIR_BY_PATH_VIEW, FILES_BY_PARENT_VIEW};
use crate::vfs::doc::{DIR_TYPE, FILE_TYPE};
use crate::vfs::{
    check_file_name, join_path, normalize_path, split_path, DirDoc, Error, File, FileDoc, Result, Vfs,
};

/// A storage tree whose content lives in a directory of the local filesystem.
///
/// Structural changes (creating directories, committing files) are serialised
/// by an internal lock so that path checks and writes cannot interleave.
#[derive(Debug)]
pub struct LocalVfs {
    store: Arc<Store>,
    files_root: PathBuf,
    tmp_dir: PathBuf,
    mu: Arc<Mutex<()>>,
}

impl LocalVfs {
    /// Opens the tree rooted at `files_root`, creating it if needed.
    ///
    /// Directories and files already present on disk are indexed into the store.
    /// Uncommitted content is staged in `tmp_dir`.
    #[instrument(skip(store, files_root, tmp_dir), fields(root = %files_root.display()))]
    pub async fn open(store: Arc<Store>, files_root: PathBuf, tmp_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&files_root).await?;
        fs::create_dir_all(&tmp_dir).await?;

        let vfs = LocalVfs {
            store,
            files_root,
            tmp_dir,
            mu: Arc::new(Mutex::new(())),
        };
        let mut root = DirDoc::root();
        match vfs.store.create_doc(&mut root) {
            Ok(()) => {}
            Err(e) if e.is_conflict() => debug!("Root directory already indexed"),
            Err(e) => return Err(e.into()),
        }
        vfs.reindex(root).await?;
        Ok(vfs)
    }

    fn disk_path(&self, fullpath: &str) -> PathBuf {
        self.files_root.join(fullpath.trim_start_matches('/'))
    }

    /// Walks the tree on disk and indexes the entries the store does not know about.
    async fn reindex(&self, root: DirDoc) -> Result<()> {
        let mut pending = vec![root];
        let mut indexed = 0usize;
        while let Some(dir) = pending.pop() {
            let mut read_dir = fs::read_dir(self.disk_path(&dir.fullpath)).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    warn!("Skipping non-unicode entry {}", entry.path().display());
                    continue;
                };
                if check_file_name(&name).is_err() {
                    continue;
                }
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    let child = match find_child(&self.store, &dir.doc_id, &name)? {
                        Some(id) => self.dir_by_id(&id).await?,
                        None => {
                            let mut child = DirDoc::new_with_path(&name, &dir.doc_id, &dir.fullpath)?;
                            self.store.create_doc(&mut child)?;
                            indexed += 1;
                            child
                        }
                    };
                    pending.push(child);
                } else if meta.is_file() && find_child(&self.store, &dir.doc_id, &name)?.is_none() {
                    let content = fs::read(entry.path()).await?;
                    let mime = guess_mime(&name);
                    let created_at = meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
                    let mut file = FileDoc::new(
                        &name,
                        &dir.doc_id,
                        content.len() as u64,
                        Some(checksum(&content)),
                        &mime,
                        created_at,
                        false,
                        false,
                        Vec::new(),
                    )?;
                    self.store.create_doc(&mut file)?;
                    indexed += 1;
                }
            }
        }
        debug!("Indexed {} entries found on disk", indexed);
        Ok(())
    }
}

#[async_trait]
impl Vfs for LocalVfs {
    async fn dir_by_id(&self, id: &str) -> Result<DirDoc> {
        match self.store.get_doc::<DirDoc>(consts::FILES, id) {
            Ok(dir) if dir.kind == DIR_TYPE => Ok(dir),
            Ok(_) | Err(store::Error::NotFound { .. }) => Err(Error::DirNotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn dir_by_path(&self, path: &str) -> Result<DirDoc> {
        let path = normalize_path(path);
        let key = vec![path.to_string()];
        let req = ViewRequest {
            start_key: key.clone(),
            end_key: key,
            include_docs: false,
        };
        let res = self.store.exec_view(&DIR_BY_PATH_VIEW, &req)?;
        match res.rows.first() {
            Some(row) => self.dir_by_id(&row.id).await,
            None => Err(Error::DirNotFound(path.to_string())),
        }
    }

    #[instrument(skip(self, doc), fields(name = %doc.name))]
    async fn create_dir(&self, doc: &mut DirDoc) -> Result<()> {
        check_file_name(&doc.name)?;
        let _guard = self.mu.lock().await;
        let parent = self.dir_by_id(&doc.dir_id).await.map_err(|e| match e {
            Error::DirNotFound(id) => Error::ParentNotFound(id),
            e => e,
        })?;
        doc.fullpath = join_path(&parent.fullpath, &doc.name);

        if find_child(&self.store, &parent.doc_id, &doc.name)?.is_some() {
            debug!("Path {} is already taken", doc.fullpath);
            return Err(store::Error::Conflict {
                doctype: consts::FILES.to_string(),
                id: doc.fullpath.clone(),
            }
            .into());
        }

        let disk_path = self.disk_path(&doc.fullpath);
        match fs::create_dir(&disk_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && disk_path.is_dir() => {
                debug!("Adopting unindexed directory {}", disk_path.display());
            }
            Err(e) => return Err(e.into()),
        }
        self.store.create_doc(doc)?;
        debug!("Directory created with id {}", doc.doc_id);
        Ok(())
    }

    #[instrument(skip(self, old, new), fields(id = %old.doc_id))]
    async fn update_dir_doc(&self, old: &DirDoc, new: &mut DirDoc) -> Result<()> {
        if old.doc_id != new.doc_id
            || old.dir_id != new.dir_id
            || old.name != new.name
            || old.fullpath != new.fullpath
        {
            return Err(Error::PathChange(new.fullpath.clone()));
        }
        let _guard = self.mu.lock().await;
        new.doc_rev = old.doc_rev.clone();
        new.updated_at = Utc::now();
        if let Some(meta) = new.cozy_metadata.as_mut() {
            meta.updated_at = new.updated_at;
        }
        self.store.update_doc(new)?;
        Ok(())
    }

    #[instrument(skip(self, doc), fields(name = %doc.name))]
    async fn create_file(&self, doc: FileDoc) -> Result<Box<dyn File>> {
        check_file_name(&doc.name)?;
        let parent = self.dir_by_id(&doc.dir_id).await.map_err(|e| match e {
            Error::DirNotFound(id) => Error::ParentNotFound(id),
            e => e,
        })?;
        let fullpath = join_path(&parent.fullpath, &doc.name);
        if find_child(&self.store, &parent.doc_id, &doc.name)?.is_some() {
            return Err(Error::FileExists(fullpath));
        }

        let tmp_path = self.tmp_dir.join(Uuid::new_v4().simple().to_string());
        let file = fs::File::create(&tmp_path).await?;
        debug!("Staging content of {} in {}", fullpath, tmp_path.display());
        Ok(Box::new(LocalFile {
            doc,
            store: self.store.clone(),
            mu: self.mu.clone(),
            target: self.disk_path(&fullpath),
            fullpath,
            tmp_path,
            file: Some(file),
            hasher: blake3::Hasher::new(),
            written: 0,
        }))
    }

    async fn file_by_id(&self, id: &str) -> Result<FileDoc> {
        match self.store.get_doc::<FileDoc>(consts::FILES, id) {
            Ok(file) if file.kind == FILE_TYPE => Ok(file),
            Ok(_) | Err(store::Error::NotFound { .. }) => Err(Error::FileNotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn file_by_path(&self, path: &str) -> Result<FileDoc> {
        let not_found = || Error::FileNotFound(path.to_string());
        let (parent_path, name) = split_path(path).ok_or_else(not_found)?;
        let parent = self.dir_by_path(parent_path).await.map_err(|_| not_found())?;
        let id = find_child(&self.store, &parent.doc_id, name)?.ok_or_else(not_found)?;
        self.file_by_id(&id).await.map_err(|_| not_found())
    }
}

/// Content of a new file, staged in a temporary file until closed.
struct LocalFile {
    doc: FileDoc,
    store: Arc<Store>,
    mu: Arc<Mutex<()>>,
    fullpath: String,
    target: PathBuf,
    tmp_path: PathBuf,
    file: Option<fs::File>,
    hasher: blake3::Hasher,
    written: u64,
}

impl LocalFile {
    async fn commit(&mut self, mut file: fs::File) -> Result<FileDoc> {
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if self.written != self.doc.size {
            return Err(Error::ContentLengthMismatch {
                expected: self.doc.size,
                actual: self.written,
            });
        }
        let sum = STANDARD.encode(self.hasher.finalize().as_bytes());
        if let Some(expected) = &self.doc.checksum {
            if *expected != sum {
                return Err(Error::InvalidChecksum);
            }
        }

        let _guard = self.mu.lock().await;
        if find_child(&self.store, &self.doc.dir_id, &self.doc.name)?.is_some()
            || fs::try_exists(&self.target).await?
        {
            return Err(Error::FileExists(self.fullpath.clone()));
        }
        fs::rename(&self.tmp_path, &self.target).await?;

        let now = Utc::now();
        self.doc.checksum = Some(sum);
        self.doc.updated_at = now;
        if let Some(meta) = self.doc.cozy_metadata.as_mut() {
            meta.uploaded_at = Some(now);
            meta.uploaded_on = meta.created_on.clone();
        }
        if let Err(e) = self.store.create_doc(&mut self.doc) {
            warn!("Could not index {}, removing its content: {}", self.fullpath, e);
            let _ = fs::remove_file(&self.target).await;
            return Err(e.into());
        }
        debug!("File {} committed with id {}", self.fullpath, self.doc.doc_id);
        Ok(self.doc.clone())
    }
}

#[async_trait]
impl File for LocalFile {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let file = self.file.as_mut().ok_or(Error::Closed)?;
        let n = file.write(buf).await?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    async fn close(&mut self) -> Result<FileDoc> {
        let file = self.file.take().ok_or(Error::Closed)?;
        let res = self.commit(file).await;
        if res.is_err() {
            let _ = fs::remove_file(&self.tmp_path).await;
        }
        res
    }
}

impl Drop for LocalFile {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

/// Looks up the id of the entry named `name` in the directory `dir_id`.
fn find_child(store: &Store, dir_id: &str, name: &str) -> store::Result<Option<String>> {
    let key = vec![dir_id.to_string(), name.to_string()];
    let req = ViewRequest {
        start_key: key.clone(),
        end_key: key,
        include_docs: false,
    };
    let res = store.exec_view(&FILES_BY_PARENT_VIEW, &req)?;
    Ok(res.rows.into_iter().next().map(|row| row.id))
}

fn checksum(content: &[u8]) -> String {
    STANDARD.encode(blake3::hash(content).as_bytes())
}

fn guess_mime(name: &str) -> mime::Mime {
    let ext = Path::new(name).extension().and_then(|e| e.to_str()).unwrap_or_default();
    match ext {
        consts::NOTE_EXTENSION | "md" => "text/markdown".parse().unwrap_or(mime::TEXT_PLAIN),
        "txt" => mime::TEXT_PLAIN,
        "json" => mime::APPLICATION_JSON,
        "pdf" => mime::APPLICATION_PDF,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}
