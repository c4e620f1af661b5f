//! Providers of service definitions.
//!
//! A source is a named, prioritized provider of service definitions. Three kinds
//! exist:
//!
//! - [`EmbeddedSource`] - definitions bundled into the binary, always present
//!   and always consulted last
//! - [`LocalSource`] - a directory on the local filesystem
//! - [`GitSource`] - a shallow checkout of a remote repository, kept in the
//!   [`Cache`]
//!
//! Every source root uses the same layout. A service named `sonarr` is looked
//! up at `<root>/sonarr/`, then `<root>/core/sonarr/`, then
//! `<root>/addons/sonarr/`, each holding a `service.yaml` and an optional
//! `override.yaml`.

mod embedded;
mod git;
mod local;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheError};
use crate::consts::{ADDONS_DIR, CORE_DIR, DEFINITION_FILENAME, EMBEDDED_PRIORITY};
use crate::loader::{self, LoadError, ServiceDefinition, Source};
use crate::platform::paths::{expand_tilde, local_services_dir};
use crate::validate::is_valid_service_name;

pub use embedded::{BUILTIN_SERVICES, BundledFile, EmbeddedSource};
pub use git::GitSource;
pub use local::LocalSource;

/// Errors that can occur when reading from or updating a source.
#[derive(Debug, Error)]
pub enum SourceError {
  /// The source does not define the service.
  #[error("service '{service}' not found in source '{source_name}'")]
  NotFound { source_name: String, service: String },

  /// The source configuration names a type that does not exist.
  #[error("unknown source type '{0}', expected local, git or embedded")]
  UnknownType(String),

  /// The source configuration lacks a field its type requires.
  #[error("source '{source_name}' requires field '{field}'")]
  MissingField { source_name: String, field: &'static str },

  /// A definition file could not be loaded.
  #[error(transparent)]
  Load(#[from] LoadError),

  /// A filesystem operation failed.
  #[error("I/O error at '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Walking a source root failed.
  #[error("failed to scan source directory: {0}")]
  Walk(#[from] walkdir::Error),

  /// A git command failed.
  #[error("git {op} failed for '{url}': {message}")]
  Git {
    op: &'static str,
    url: String,
    message: String,
  },

  /// A git command did not finish in time.
  #[error("git {op} for '{url}' timed out after {timeout:?}")]
  Timeout {
    op: &'static str,
    url: String,
    timeout: Duration,
  },

  /// A write operation was attempted on a source that does not support it.
  #[error("source '{0}' is read-only")]
  ReadOnly(String),

  /// A service directory already exists.
  #[error("service directory '{0}' already exists")]
  AlreadyExists(PathBuf),

  /// The name cannot be used as a service directory.
  #[error("invalid service name '{0}'")]
  InvalidName(String),

  /// The fetch cache failed.
  #[error(transparent)]
  Cache(#[from] CacheError),
}

impl SourceError {
  pub fn is_not_found(&self) -> bool {
    matches!(self, SourceError::NotFound { .. })
  }
}

/// The kind of a source, parsed from the `type` field of its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
  Local,
  Git,
  Embedded,
}

impl SourceKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      SourceKind::Local => "local",
      SourceKind::Git => "git",
      SourceKind::Embedded => "embedded",
    }
  }
}

impl fmt::Display for SourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SourceKind {
  type Err = SourceError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "local" => Ok(SourceKind::Local),
      "git" => Ok(SourceKind::Git),
      "embedded" => Ok(SourceKind::Embedded),
      other => Err(SourceError::UnknownType(other.to_string())),
    }
  }
}

/// Identity and ordering fields every source carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMeta {
  pub name: String,
  pub kind: SourceKind,
  pub priority: i32,
  pub enabled: bool,
  pub verified: bool,
}

impl SourceMeta {
  pub fn new(name: &str, kind: SourceKind, priority: i32) -> Self {
    Self {
      name: name.to_string(),
      kind,
      priority,
      enabled: true,
      verified: false,
    }
  }

  fn from_config(source: &Source, kind: SourceKind) -> Self {
    Self {
      name: source.name.clone(),
      kind,
      priority: source.priority,
      enabled: source.enabled,
      verified: source.verified,
    }
  }
}

/// Uniform contract of a definition source.
#[async_trait]
pub trait SourceProvider: Send + Sync + fmt::Debug {
  fn meta(&self) -> &SourceMeta;

  fn name(&self) -> &str {
    &self.meta().name
  }

  fn kind(&self) -> SourceKind {
    self.meta().kind
  }

  /// Higher priorities are consulted first and win on name collisions.
  fn priority(&self) -> i32 {
    self.meta().priority
  }

  fn is_enabled(&self) -> bool {
    self.meta().enabled
  }

  fn is_verified(&self) -> bool {
    self.meta().verified
  }

  /// Load every definition in the source, with defaults applied.
  async fn load(&self) -> Result<Vec<ServiceDefinition>, SourceError>;

  /// Load one definition, with defaults applied.
  async fn load_service(&self, name: &str) -> Result<ServiceDefinition, SourceError>;

  /// Names of all services in the source.
  async fn list_services(&self) -> Result<Vec<String>, SourceError>;

  /// Directory holding the service's definition, if the source has a real
  /// filesystem location for it.
  fn service_path(&self, name: &str) -> Option<PathBuf>;

  /// Refresh the source from its origin.
  async fn update(&self) -> Result<(), SourceError>;

  /// Commit the source is currently at, if it has one.
  fn commit(&self) -> Option<String>;

  /// Origin URL, for sources fetched from a remote.
  fn url(&self) -> Option<&str> {
    None
  }

  fn branch(&self) -> Option<&str> {
    None
  }

  /// When the source was last fetched from its origin.
  fn last_updated(&self) -> Option<DateTime<Utc>> {
    None
  }
}

/// Build the provider described by a source configuration.
///
/// Embedded sources always get [`EMBEDDED_PRIORITY`], whatever the
/// configuration says.
pub fn create_source_provider(source: &Source, cache: Arc<Cache>) -> Result<Arc<dyn SourceProvider>, SourceError> {
  let kind: SourceKind = source.source_type.parse()?;
  let mut meta = SourceMeta::from_config(source, kind);

  let provider: Arc<dyn SourceProvider> = match kind {
    SourceKind::Local => {
      let root = source.path.as_deref().map(expand_tilde).unwrap_or_else(local_services_dir);
      Arc::new(LocalSource::new(meta, root))
    }
    SourceKind::Git => {
      let url = source.url.clone().ok_or_else(|| SourceError::MissingField {
        source_name: source.name.clone(),
        field: "url",
      })?;
      let mut git = GitSource::new(meta, url, source.branch.as_deref(), cache);
      if let Some(path) = &source.path {
        git = git.with_sub_path(path);
      }
      if let Some(key) = &source.ssh_key {
        git = git.with_ssh_key(expand_tilde(key));
      }
      Arc::new(git)
    }
    SourceKind::Embedded => {
      meta.priority = EMBEDDED_PRIORITY;
      Arc::new(EmbeddedSource::with_meta(meta, BUILTIN_SERVICES))
    }
  };

  debug!(
    name = provider.name(),
    kind = %provider.kind(),
    priority = provider.priority(),
    "created source provider"
  );
  Ok(provider)
}

// ---------------------------------------------------------------------------
// Directory layout shared by local and git sources
// ---------------------------------------------------------------------------

/// Reject names that would not stay a single directory below the root.
pub(crate) fn check_name(name: &str) -> Result<(), SourceError> {
  if is_valid_service_name(name) {
    Ok(())
  } else {
    Err(SourceError::InvalidName(name.to_string()))
  }
}

/// Candidate directories of a service under a source root, in lookup order.
///
/// `name` must have passed [`check_name`].
pub(crate) fn candidate_dirs(root: &Path, name: &str) -> [PathBuf; 3] {
  [
    root.join(name),
    root.join(CORE_DIR).join(name),
    root.join(ADDONS_DIR).join(name),
  ]
}

/// First candidate directory that holds a definition file.
pub(crate) fn find_service_dir(root: &Path, name: &str) -> Option<PathBuf> {
  if !is_valid_service_name(name) {
    return None;
  }
  candidate_dirs(root, name)
    .into_iter()
    .find(|dir| dir.join(DEFINITION_FILENAME).is_file())
}

pub(crate) fn load_from_root(source_name: &str, root: &Path, name: &str) -> Result<ServiceDefinition, SourceError> {
  check_name(name)?;
  let dir = find_service_dir(root, name).ok_or_else(|| SourceError::NotFound {
    source_name: source_name.to_string(),
    service: name.to_string(),
  })?;
  let mut def = loader::load_service(&dir.join(DEFINITION_FILENAME))?;
  loader::apply_defaults(&mut def);
  Ok(def)
}

/// Service names under a root. A missing root holds no services.
pub(crate) fn list_root(root: &Path) -> Result<Vec<String>, SourceError> {
  if !root.is_dir() {
    debug!(root = %root.display(), "source root does not exist");
    return Ok(Vec::new());
  }
  let mut names = loader::discover_services(root)?;
  names.retain(|name| {
    let valid = is_valid_service_name(name);
    if !valid {
      warn!(root = %root.display(), service = %name, "skipping directory with invalid service name");
    }
    valid
  });
  Ok(names)
}

pub(crate) fn load_root(source_name: &str, root: &Path) -> Result<Vec<ServiceDefinition>, SourceError> {
  let mut definitions = Vec::new();
  for name in list_root(root)? {
    match load_from_root(source_name, root, &name) {
      Ok(def) => definitions.push(def),
      // Nested deeper than the lookup layout allows.
      Err(e) if e.is_not_found() => debug!(source = source_name, service = %name, "skipping unreachable definition"),
      Err(e) => return Err(e),
    }
  }
  Ok(definitions)
}

#[cfg(test)]
pub(crate) mod testutil {
  use std::fs;
  use std::path::Path;

  /// Write a minimal, valid definition at `<root>/<rel>/service.yaml`.
  pub fn write_service(root: &Path, rel: &str, version: &str, extra: &str) {
    let name = Path::new(rel).file_name().unwrap().to_string_lossy().into_owned();
    let dir = root.join(rel);
    fs::create_dir_all(&dir).unwrap();
    let content = format!(
      "apiVersion: stackr.dev/v1\nkind: Service\nmetadata:\n  name: {name}\n  version: \"{version}\"\n  category: media\n  description: {name} service\nspec:\n  image:\n    repository: example/{name}\n{extra}"
    );
    fs::write(dir.join("service.yaml"), content).unwrap();
  }
}
