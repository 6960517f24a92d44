//! Cache storage trait and JSON file implementation.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use super::traits::CacheEntry;

/// Failure to persist a cache entry. Never fatal for a sync.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("Failed to create cache directory '{path}': {source}")]
  CreateDir { path: PathBuf, source: io::Error },

  #[error("Failed to serialize cache data: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error("Failed to write cache file '{path}': {source}")]
  Write { path: PathBuf, source: io::Error },
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Load the stored entry. Missing, unreadable or corrupt data is a cold cache.
  fn load(&self) -> Option<CacheEntry>;

  /// Replace the stored entry.
  fn save(&self, entry: &CacheEntry) -> Result<(), StoreError>;
}

impl<S: CacheStorage + ?Sized> CacheStorage for Box<S> {
  fn load(&self) -> Option<CacheEntry> {
    (**self).load()
  }

  fn save(&self, entry: &CacheEntry) -> Result<(), StoreError> {
    (**self).save(entry)
  }
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn load(&self) -> Option<CacheEntry> {
    None // Always miss
  }

  fn save(&self, _entry: &CacheEntry) -> Result<(), StoreError> {
    Ok(()) // Discard
  }
}

/// A single JSON document on disk, replaced atomically on save.
pub struct FileStorage {
  path: PathBuf,
}

impl FileStorage {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Temporary file next to the target so the final rename stays on one filesystem.
  fn temp_path(&self) -> PathBuf {
    let name = self
      .path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "cache".to_string());
    self
      .path
      .with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
  }

  fn write_atomic(&self, bytes: &[u8]) -> io::Result<()> {
    let tmp = self.temp_path();
    let result = (|| {
      let mut file = File::create(&tmp)?;
      file.write_all(bytes)?;
      file.sync_all()?;
      fs::rename(&tmp, &self.path)
    })();
    if result.is_err() {
      let _ = fs::remove_file(&tmp);
    }
    result
  }
}

impl CacheStorage for FileStorage {
  fn load(&self) -> Option<CacheEntry> {
    let contents = match fs::read(&self.path) {
      Ok(contents) => contents,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %self.path.display(), "no PR cache yet");
        return None;
      }
      Err(e) => {
        debug!(path = %self.path.display(), error = %e, "PR cache unreadable, treating as cold");
        return None;
      }
    };

    match serde_json::from_slice(&contents) {
      Ok(entry) => Some(entry),
      Err(e) => {
        debug!(path = %self.path.display(), error = %e, "PR cache corrupt, treating as cold");
        None
      }
    }
  }

  fn save(&self, entry: &CacheEntry) -> Result<(), StoreError> {
    if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
      fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    let bytes = serde_json::to_vec(entry)?;
    self
      .write_atomic(&bytes)
      .map_err(|source| StoreError::Write {
        path: self.path.clone(),
        source,
      })?;

    debug!(path = %self.path.display(), entries = entry.mapping.len(), "PR cache written");
    Ok(())
  }
}
