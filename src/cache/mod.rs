//! File-backed record cache.
//!
//! The cache is a single pretty-printed JSON document with one list per
//! source. Reads never fail: a missing or corrupt file degrades to an empty
//! cache. Writes go through a sibling temp file and a rename so readers never
//! observe a half-written document. Mutation is serialized across processes by
//! [`CacheLock`].

pub mod lock;

pub use lock::{CacheLock, LockState, DEFAULT_LOCK_TIMEOUT};

use crate::errors::{AppError, AppResult};
use crate::models::Cache;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CacheStore {
    cache_path: PathBuf,
    lock_path: PathBuf,
}

impl CacheStore {
    pub fn new(cache_path: impl Into<PathBuf>, lock_path: impl Into<PathBuf>) -> Self {
        Self {
            cache_path: cache_path.into(),
            lock_path: lock_path.into(),
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Strict load: a missing file is an empty cache, an unreadable one is an error.
    pub fn try_load(&self) -> AppResult<Cache> {
        if !self.cache_path.exists() {
            return Ok(Cache::default());
        }
        let bytes = fs::read(&self.cache_path)
            .map_err(|error| AppError::CacheLoad(format!("{}: {}", self.cache_path.display(), error)))?;
        serde_json::from_slice(&bytes)
            .map_err(|error| AppError::CacheLoad(format!("{}: {}", self.cache_path.display(), error)))
    }

    pub fn load(&self) -> Cache {
        if !self.cache_path.exists() {
            tracing::info!(path = %self.cache_path.display(), "cache file not found; starting from an empty cache");
            return Cache::default();
        }
        match self.try_load() {
            Ok(cache) => cache,
            Err(error) => {
                tracing::warn!(
                    path = %self.cache_path.display(),
                    error = %error,
                    "failed to load cache; starting from an empty cache"
                );
                Cache::default()
            }
        }
    }

    pub fn save(&self, cache: &Cache) -> AppResult<()> {
        write_json_atomic(&self.cache_path, cache)?;
        tracing::info!(path = %self.cache_path.display(), records = cache.len(), "cache saved");
        Ok(())
    }

    pub fn lock(&self, timeout: Duration) -> AppResult<CacheLock> {
        CacheLock::acquire(&self.lock_path, timeout)
    }

    /// Runs `operation` while holding the cache lock; the lock is released on every exit path.
    pub fn with_lock<T>(&self, timeout: Duration, operation: impl FnOnce(&Self) -> AppResult<T>) -> AppResult<T> {
        let _guard = self.lock(timeout)?;
        operation(self)
    }
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|error| AppError::Io(error.to_string()))?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp_path = path.with_extension(format!("tmp.{}", std::process::id()));
    let written = fs::File::create(&tmp_path).and_then(|mut file| {
        file.write_all(&bytes)?;
        file.sync_all()
    });
    if let Err(error) = written.and_then(|()| fs::rename(&tmp_path, path)) {
        let _ = fs::remove_file(&tmp_path);
        return Err(AppError::Io(format!("failed to write {}: {}", path.display(), error)));
    }
    Ok(())
}
