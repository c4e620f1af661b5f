//! Fetch cache for remote sources.
//!
//! The cache owns one directory per source (the checkout of a Git source) and a
//! `metadata.json` file recording, per source name, when it was last fetched and
//! which commit it is pinned to.
//!
//! # Layout
//!
//! ```text
//! ~/.cache/stackr/sources/
//!   metadata.json        # { "<source>": { lastUpdated, commit, url, branch } }
//!   community/           # checkout of the "community" git source
//!   homelab/
//! ```
//!
//! The metadata file is the single source of truth across process restarts.
//! Every mutation takes the write half of one [`RwLock`] and persists the whole
//! map before releasing it. A missing or corrupt metadata file is treated as an
//! empty cache.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::consts::CACHE_METADATA_FILENAME;

/// Default time-to-live of a cached source.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
  /// Failed to create the cache directory.
  #[error("failed to create cache directory '{path}': {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Failed to serialize the metadata map.
  #[error("failed to serialize cache metadata: {0}")]
  Serialize(#[source] serde_json::Error),

  /// Failed to write the metadata file.
  #[error("failed to write cache metadata '{path}': {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Failed to remove a cached tree.
  #[error("failed to remove '{path}': {source}")]
  Remove {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Failed to walk the cache directory.
  #[error("failed to walk cache directory: {0}")]
  Walk(#[source] walkdir::Error),
}

/// Fetch metadata of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
  /// When the source was last fetched. The Unix epoch means "expired".
  pub last_updated: DateTime<Utc>,

  /// Commit the cached checkout is at.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub commit: Option<String>,

  /// Remote URL, for display.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,

  /// Tracked branch, for display.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub branch: Option<String>,
}

impl Default for CacheMetadata {
  fn default() -> Self {
    Self {
      last_updated: DateTime::<Utc>::UNIX_EPOCH,
      commit: None,
      url: None,
      branch: None,
    }
  }
}

type MetadataMap = BTreeMap<String, CacheMetadata>;

/// TTL-based cache of fetched sources.
#[derive(Debug)]
pub struct Cache {
  dir: PathBuf,
  ttl: Duration,
  metadata: RwLock<MetadataMap>,
}

impl Cache {
  /// Open (or create) a cache rooted at `dir`.
  pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self, CacheError> {
    let dir = dir.into();
    fs::create_dir_all(&dir).map_err(|source| CacheError::CreateDir {
      path: dir.clone(),
      source,
    })?;

    let metadata = load_metadata(&dir.join(CACHE_METADATA_FILENAME));
    debug!(dir = %dir.display(), entries = metadata.len(), "opened source cache");

    Ok(Self {
      dir,
      ttl,
      metadata: RwLock::new(metadata),
    })
  }

  /// The cache root directory.
  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// The configured time-to-live.
  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  /// Directory a source's checkout lives in.
  pub fn repo_path(&self, name: &str) -> PathBuf {
    self.dir.join(name)
  }

  /// Whether a source must be re-fetched.
  ///
  /// True when the source was never fetched, or when more than the TTL has
  /// elapsed since the last fetch. A zero TTL always requires an update.
  pub fn needs_update(&self, name: &str) -> bool {
    let metadata = self.metadata.read().unwrap_or_else(PoisonError::into_inner);
    let Some(entry) = metadata.get(name) else {
      return true;
    };

    if self.ttl.is_zero() {
      return true;
    }

    let elapsed = Utc::now().signed_duration_since(entry.last_updated);
    match elapsed.to_std() {
      Ok(elapsed) => elapsed > self.ttl,
      // Timestamp in the future: treat as fresh.
      Err(_) => false,
    }
  }

  /// Record a successful fetch of `name` now.
  pub fn mark_updated(&self, name: &str) -> Result<(), CacheError> {
    self.mutate(|metadata| {
      metadata.entry(name.to_string()).or_default().last_updated = Utc::now();
    })
  }

  /// Record the commit `name` is pinned to.
  pub fn set_commit(&self, name: &str, commit: &str) -> Result<(), CacheError> {
    self.mutate(|metadata| {
      metadata.entry(name.to_string()).or_default().commit = Some(commit.to_string());
    })
  }

  /// The commit `name` is pinned to, if it was ever fetched.
  pub fn commit(&self, name: &str) -> Option<String> {
    let metadata = self.metadata.read().unwrap_or_else(PoisonError::into_inner);
    metadata.get(name).and_then(|m| m.commit.clone())
  }

  /// Record the display URL and branch of `name`.
  pub fn set_source_info(&self, name: &str, url: &str, branch: Option<&str>) -> Result<(), CacheError> {
    self.mutate(|metadata| {
      let entry = metadata.entry(name.to_string()).or_default();
      entry.url = Some(url.to_string());
      entry.branch = branch.map(str::to_string);
    })
  }

  /// A copy of the metadata of `name`.
  pub fn metadata(&self, name: &str) -> Option<CacheMetadata> {
    let metadata = self.metadata.read().unwrap_or_else(PoisonError::into_inner);
    metadata.get(name).cloned()
  }

  /// When `name` was last fetched. `None` if it never was or was expired.
  pub fn last_updated(&self, name: &str) -> Option<DateTime<Utc>> {
    self
      .metadata(name)
      .map(|m| m.last_updated)
      .filter(|t| *t != DateTime::<Utc>::UNIX_EPOCH)
  }

  /// Mark `name` as stale without touching its files.
  pub fn force_expire(&self, name: &str) -> Result<(), CacheError> {
    self.mutate(|metadata| {
      if let Some(entry) = metadata.get_mut(name) {
        entry.last_updated = DateTime::<Utc>::UNIX_EPOCH;
      }
    })
  }

  /// Remove the metadata and on-disk checkout of `name`.
  pub fn clear(&self, name: &str) -> Result<(), CacheError> {
    self.mutate(|metadata| {
      metadata.remove(name);
    })?;

    let path = self.repo_path(name);
    remove_tree(&path)?;
    debug!(name, path = %path.display(), "cleared cached source");
    Ok(())
  }

  /// Remove every cached checkout, keeping the metadata file.
  pub fn clear_all(&self) -> Result<(), CacheError> {
    // Hold the lock so no checkout is recorded while trees are removed.
    let _guard = self.write_guard();

    let entries = match fs::read_dir(&self.dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
      Err(source) => {
        return Err(CacheError::Remove {
          path: self.dir.clone(),
          source,
        });
      }
    };

    for entry in entries.flatten() {
      if entry.file_name() == CACHE_METADATA_FILENAME {
        continue;
      }
      remove_tree(&entry.path())?;
    }

    debug!(dir = %self.dir.display(), "cleared all cached sources");
    Ok(())
  }

  /// Total size in bytes of everything under the cache directory.
  pub fn size(&self) -> Result<u64, CacheError> {
    let mut total = 0;
    for entry in WalkDir::new(&self.dir) {
      let entry = entry.map_err(CacheError::Walk)?;
      if entry.file_type().is_file() {
        total += entry.metadata().map_err(CacheError::Walk)?.len();
      }
    }
    Ok(total)
  }

  fn write_guard(&self) -> RwLockWriteGuard<'_, MetadataMap> {
    self.metadata.write().unwrap_or_else(PoisonError::into_inner)
  }

  /// Apply `f` to the metadata map and persist it before releasing the lock.
  fn mutate(&self, f: impl FnOnce(&mut MetadataMap)) -> Result<(), CacheError> {
    let mut metadata = self.write_guard();
    f(&mut metadata);
    self.persist(&metadata)
  }

  fn persist(&self, metadata: &MetadataMap) -> Result<(), CacheError> {
    let path = self.dir.join(CACHE_METADATA_FILENAME);
    let content = serde_json::to_vec_pretty(metadata).map_err(CacheError::Serialize)?;

    let write_err = |source: io::Error| CacheError::Write {
      path: path.clone(),
      source,
    };

    let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(write_err)?;
    tmp.write_all(&content).map_err(write_err)?;
    tmp.persist(&path).map_err(|e| write_err(e.error))?;
    Ok(())
  }
}

fn load_metadata(path: &Path) -> MetadataMap {
  let content = match fs::read_to_string(path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return MetadataMap::new(),
    Err(e) => {
      warn!(path = %path.display(), error = %e, "failed to read cache metadata, starting empty");
      return MetadataMap::new();
    }
  };

  match serde_json::from_str(&content) {
    Ok(metadata) => metadata,
    Err(e) => {
      warn!(path = %path.display(), error = %e, "corrupt cache metadata, starting empty");
      MetadataMap::new()
    }
  }
}

fn remove_tree(path: &Path) -> Result<(), CacheError> {
  let result = if path.is_dir() {
    fs::remove_dir_all(path)
  } else {
    fs::remove_file(path)
  };

  match result {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(source) => Err(CacheError::Remove {
      path: path.to_path_buf(),
      source,
    }),
  }
}
