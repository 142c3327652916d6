//! Named locks.
//!
//! A [`Locker`] hands out [`LockGuard`]s for names; holding the guard for a
//! name excludes every other holder of that name. Acquisition blocks until the
//! lock is free, the configured timeout elapses, or the caller cancels.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as SyncMutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Timed out after {0:?} waiting for lock")]
    Timeout(Duration),

    #[error("Lock acquisition was cancelled")]
    Cancelled,

    #[error("Lock backend unavailable: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[async_trait]
pub trait Locker: Send + Sync + fmt::Debug {
    /// Blocks until the lock for `name` is held.
    async fn lock(&self, name: &str, cancel: &CancellationToken) -> Result<LockGuard>;
}

/// Proof of holding a named lock. The lock is released on drop.
pub struct LockGuard {
    name: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub fn new(name: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        LockGuard {
            name: name.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_held(&self) -> bool {
        self.release.is_some()
    }

    /// Releases the lock. Calling it again has no effect.
    pub fn unlock(&mut self) {
        if let Some(release) = self.release.take() {
            trace!(lock = %self.name, "Releasing lock");
            release();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.unlock();
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("held", &self.is_held())
            .finish()
    }
}

/// An in-process lock service.
#[derive(Debug)]
pub struct MemLocker {
    timeout: Duration,
    locks: SyncMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemLocker {
    pub fn new(timeout: Duration) -> Self {
        MemLocker {
            timeout,
            locks: SyncMutex::new(HashMap::new()),
        }
    }

    fn entry(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(name.to_string()).or_default().clone()
    }
}

#[async_trait]
impl Locker for MemLocker {
    async fn lock(&self, name: &str, cancel: &CancellationToken) -> Result<LockGuard> {
        let mutex = self.entry(name);
        trace!(lock = name, "Waiting for lock");
        let guard = tokio::select! {
            guard = mutex.lock_owned() => guard,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(self.timeout) => return Err(Error::Timeout(self.timeout)),
        };
        debug!(lock = name, "Lock acquired");
        Ok(LockGuard::new(name, move || drop(guard)))
    }
}
