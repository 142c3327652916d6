//! A user's instance: configuration plus the services notes are created with.
//!
//! An instance lives in a directory holding an internal `.instance` directory
//! (configuration and staging area) and a `files` directory (the storage tree).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::lock::{Locker, MemLocker};
use crate::store::Store;
use crate::vfs::{self, LocalVfs, Vfs};

pub const INTERNAL_DIR_NAME: &str = ".instance";
pub const CONFIG_FILENAME: &str = "config.json";
pub const FILES_DIR_NAME: &str = "files";
const TMP_DIR_NAME: &str = "tmp";

const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Not an instance: {0}")]
    NotAnInstance(PathBuf),

    #[error("Cannot create instance, directory is not empty: {0}")]
    CreationConflict(PathBuf),

    #[error("Cannot create instance, path is a file: {0}")]
    PathIsFile(PathBuf),

    #[error("Invalid or missing instance configuration: {0}")]
    InvalidConfig(PathBuf),

    #[error("Invalid instance domain: {0}")]
    InvalidDomain(String),

    #[error("Cannot encode instance configuration")]
    ConfigEncode(#[source] serde_json::Error),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Vfs(#[from] vfs::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration of an instance, stored in `.instance/config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    pub id: Uuid,
    pub version: u32,
    /// Domain the instance is served on, e.g. `alice.example.net`.
    pub domain: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// How long a note creation waits for the instance lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Localised names, keyed by their default name.
    #[serde(default)]
    pub translations: HashMap<String, String>,
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

impl InstanceConfig {
    pub fn new(domain: impl Into<String>) -> Self {
        InstanceConfig {
            id: Uuid::new_v4(),
            version: CONFIG_VERSION,
            domain: domain.into(),
            scheme: default_scheme(),
            lock_timeout_ms: default_lock_timeout_ms(),
            translations: HashMap::new(),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug)]
pub struct Instance {
    root: Option<PathBuf>,
    config: InstanceConfig,
    base_url: Url,
    store: Arc<Store>,
    vfs: Arc<dyn Vfs>,
    locker: Arc<dyn Locker>,
}

impl Instance {
    /// Assembles an instance from its services.
    pub fn new(
        config: InstanceConfig,
        store: Arc<Store>,
        vfs: Arc<dyn Vfs>,
        locker: Arc<dyn Locker>,
    ) -> Result<Self> {
        let base_url = base_url(&config)?;
        Ok(Instance {
            root: None,
            config,
            base_url,
            store,
            vfs,
            locker,
        })
    }

    /// Creates a new instance at `path`.
    ///
    /// - If the path does not exist, creates it.
    /// - If the path is an empty directory, uses it.
    /// - Fails if the path is a file or a non-empty directory.
    #[instrument(skip(path, config), fields(path = %path.display(), domain = %config.domain))]
    pub async fn create(path: &Path, config: InstanceConfig) -> Result<Self> {
        debug!("Attempting to create instance");
        // Reject a bad domain before touching the disk.
        base_url(&config)?;

        match fs::metadata(path).await {
            Ok(meta) => {
                if !meta.is_dir() {
                    debug!("Instance creation failed: path is a file");
                    return Err(Error::PathIsFile(path.to_path_buf()));
                }
                let mut read_dir = fs::read_dir(path).await?;
                if read_dir.next_entry().await?.is_some() {
                    debug!("Instance creation failed: directory is not empty");
                    return Err(Error::CreationConflict(path.to_path_buf()));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir_all(path).await?;
            }
            Err(e) => return Err(Error::Io(e)),
        }

        let internal_dir = path.join(INTERNAL_DIR_NAME);
        fs::create_dir(&internal_dir).await?;
        write_config(&internal_dir.join(CONFIG_FILENAME), &config).await?;
        debug!("Instance created");

        let root = fs::canonicalize(path).await?;
        Instance::assemble(root, config).await
    }

    /// Opens an existing instance, indexing the storage tree found on disk.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self> {
        debug!("Attempting to open instance");
        let meta = fs::metadata(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::DirectoryNotFound(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;
        if !meta.is_dir() {
            return Err(Error::NotADirectory(path.to_path_buf()));
        }

        let root = fs::canonicalize(path).await?;
        let internal_dir = root.join(INTERNAL_DIR_NAME);
        match fs::metadata(&internal_dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(Error::NotAnInstance(root)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Error::NotAnInstance(root)),
            Err(e) => return Err(Error::Io(e)),
        }

        let config = read_config(&internal_dir.join(CONFIG_FILENAME)).await?;
        Instance::assemble(root, config).await
    }

    async fn assemble(root: PathBuf, config: InstanceConfig) -> Result<Self> {
        let store = Arc::new(Store::new());
        let vfs = LocalVfs::open(
            store.clone(),
            root.join(FILES_DIR_NAME),
            root.join(INTERNAL_DIR_NAME).join(TMP_DIR_NAME),
        )
        .await?;
        let locker = MemLocker::new(config.lock_timeout());
        let mut inst = Instance::new(config, store, Arc::new(vfs), Arc::new(locker))?;
        inst.root = Some(root);
        debug!("Instance ready");
        Ok(inst)
    }

    /// The directory of the instance, if it lives on disk.
    pub fn path(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn domain(&self) -> &str {
        &self.config.domain
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn vfs(&self) -> &dyn Vfs {
        self.vfs.as_ref()
    }

    pub fn locker(&self) -> &dyn Locker {
        self.locker.as_ref()
    }

    /// Name of the lock serialising note creations on this instance.
    pub fn notes_lock(&self) -> String {
        format!("notes/{}", self.config.domain)
    }

    /// URL of a page of the instance.
    pub fn page_url(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(path);
        url
    }

    /// The localised form of `key`, or `key` itself when there is none.
    pub fn translate<'a>(&'a self, key: &'a str) -> &'a str {
        self.config.translations.get(key).map(String::as_str).unwrap_or(key)
    }
}

fn base_url(config: &InstanceConfig) -> Result<Url> {
    let invalid = || Error::InvalidDomain(config.domain.clone());
    let url = Url::parse(&format!("{}://{}/", config.scheme, config.domain)).map_err(|_| invalid())?;
    if url.host_str().is_none() || url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(invalid());
    }
    Ok(url)
}

async fn read_config(path: &Path) -> Result<InstanceConfig> {
    let content = fs::read(path).await.map_err(|e| {
        warn!("Failed to read instance config file '{}': {}", path.display(), e);
        Error::InvalidConfig(path.to_path_buf())
    })?;
    let config: InstanceConfig = serde_json::from_slice(&content).map_err(|e| {
        warn!("Failed to parse instance config file '{}': {}", path.display(), e);
        Error::InvalidConfig(path.to_path_buf())
    })?;
    if config.version != CONFIG_VERSION {
        warn!("Unsupported instance config version {}", config.version);
        return Err(Error::InvalidConfig(path.to_path_buf()));
    }
    Ok(config)
}

async fn write_config(path: &Path, config: &InstanceConfig) -> Result<()> {
    let content = serde_json::to_string_pretty(config).map_err(Error::ConfigEncode)?;
    fs::write(path, content).await?;
    debug!("Instance config written to {}", path.display());
    Ok(())
}
