//! Lock files.
//!
//! A lock file (`.stackr.lock`, at the project root) snapshots a resolved
//! deployment plan: which commit every git source was at, which source and
//! version every enabled service came from, and the install order. It is used
//! to reproduce a deployment and to detect drift.
//!
//! # Format
//!
//! ```yaml
//! apiVersion: stackr.dev/v1
//! kind: LockFile
//! metadata:
//!   version: "1"
//!   generatedAt: 2025-01-12T09:30:00Z
//!   cliVersion: 0.7.0
//!   configHash: sha256:4f2a...
//! sources:
//!   community:
//!     url: https://github.com/example/catalog.git
//!     commit: 9c1e...
//!     branch: main
//!     fetchedAt: 2025-01-12T09:29:58Z
//! services:
//!   sonarr:
//!     source: community
//!     definitionVersion: 4.0.0
//!     image: { repository: linuxserver/sonarr, tag: 4.0.0 }
//!     resolvedFrom: /home/me/.cache/stackr/sources/community/addons/sonarr/service.yaml
//!     enabled: true
//! installOrder: [traefik, sonarr]
//! generatedFiles:
//!   docker-compose.yml: sha256:...
//! ```

mod drift;
mod manager;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{API_VERSION, KIND_LOCK_FILE, LOCK_FILENAME, LOCK_SCHEMA_VERSION};
use crate::loader::{self, Document, LoadError};
use crate::registry::RegistryError;
use crate::util::hash::{HashError, hash_file};

pub use drift::{Change, ChangeKind, Drift, DriftStatus, DriftTarget, LockDiff, VerifyResult, diff_lock_files};
pub use manager::LockManager;

/// Errors that can occur when working with lock files.
#[derive(Debug, Error)]
pub enum LockError {
  /// Failed to read the lock file.
  #[error("failed to read lock file '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// A generated file could not be hashed.
  #[error("failed to hash generated file '{path}': {source}")]
  HashFile {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// The lock file could not be parsed or written.
  #[error(transparent)]
  Load(#[from] LoadError),

  /// The user configuration could not be hashed.
  #[error("failed to hash configuration: {0}")]
  Hash(#[source] HashError),

  /// Refreshing sources failed.
  #[error(transparent)]
  Registry(#[from] RegistryError),

  /// The configuration does not resolve to an installable plan.
  #[error("configuration cannot be locked: {}", .errors.join("; "))]
  Unresolvable { errors: Vec<String> },
}

/// A persisted snapshot of a resolved deployment plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockFile {
  pub api_version: String,
  pub kind: String,
  pub metadata: LockMetadata,
  #[serde(default)]
  pub sources: BTreeMap<String, LockedSource>,
  #[serde(default)]
  pub services: BTreeMap<String, LockedService>,
  #[serde(default)]
  pub install_order: Vec<String>,
  /// Hashes of files generated from this plan, keyed by path.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub generated_files: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockMetadata {
  /// Lock file schema version.
  pub version: String,
  pub generated_at: DateTime<Utc>,
  pub cli_version: String,
  pub config_hash: String,
}

/// A git source pinned to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedSource {
  pub url: String,
  pub commit: String,
  #[serde(default)]
  pub branch: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fetched_at: Option<DateTime<Utc>>,
}

/// A service pinned to the source and definition it resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedService {
  pub source: String,
  pub definition_version: String,
  pub image: LockedImage,
  pub resolved_from: String,
  pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedImage {
  pub repository: String,
  pub tag: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub digest: Option<String>,
}

impl Document for LockFile {
  const KIND: &'static str = KIND_LOCK_FILE;
}

impl LockFile {
  /// An empty lock file stamped with the current time.
  pub fn new(cli_version: &str, config_hash: String) -> Self {
    Self {
      api_version: API_VERSION.to_string(),
      kind: KIND_LOCK_FILE.to_string(),
      metadata: LockMetadata {
        version: LOCK_SCHEMA_VERSION.to_string(),
        generated_at: Utc::now(),
        cli_version: cli_version.to_string(),
        config_hash,
      },
      sources: BTreeMap::new(),
      services: BTreeMap::new(),
      install_order: Vec::new(),
      generated_files: BTreeMap::new(),
    }
  }

  /// Default lock file location for a project.
  pub fn default_path(project_root: &Path) -> PathBuf {
    project_root.join(LOCK_FILENAME)
  }

  /// Load a lock file.
  ///
  /// Returns `Ok(None)` if the file doesn't exist.
  pub fn load(path: &Path) -> Result<Option<Self>, LockError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => {
        return Err(LockError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };
    Ok(Some(loader::parse_document(&content)?))
  }

  pub fn save(&self, path: &Path) -> Result<(), LockError> {
    Ok(loader::save_document(self, path)?)
  }

  /// Record the hash of a file generated from this plan.
  pub fn record_generated_file(&mut self, path: impl Into<String>, hash: impl Into<String>) {
    self.generated_files.insert(path.into(), hash.into());
  }

  /// Hash a file generated from this plan and record it.
  ///
  /// The entry is keyed by the path relative to `project_root` when the file
  /// lies below it. Returns the recorded hash.
  pub fn record_generated_path(&mut self, project_root: &Path, path: &Path) -> Result<String, LockError> {
    let hash = hash_file(path).map_err(|source| LockError::HashFile {
      path: path.to_path_buf(),
      source,
    })?;
    let key = path.strip_prefix(project_root).unwrap_or(path);
    self.record_generated_file(key.to_string_lossy(), hash.clone());
    Ok(hash)
  }
}
