use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{SourceError, SourceMeta, SourceProvider, candidate_dirs, check_name, find_service_dir, list_root, load_from_root, load_root};
use crate::consts::{ADDONS_DIR, CORE_DIR, DEFINITION_FILENAME};
use crate::loader::{self, ServiceDefinition};

/// Source backed by a directory on the local filesystem.
///
/// The root does not need to exist; a missing root simply holds no services.
#[derive(Debug)]
pub struct LocalSource {
  meta: SourceMeta,
  root: PathBuf,
}

impl LocalSource {
  pub fn new(meta: SourceMeta, root: impl Into<PathBuf>) -> Self {
    Self {
      meta,
      root: root.into(),
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Create the directory for a new service.
  ///
  /// Add-on services go under `addons/`, everything else under `core/`.
  pub fn create_service_dir(&self, def: &ServiceDefinition) -> Result<PathBuf, SourceError> {
    check_name(def.name())?;
    let partition = if def.is_addon() { ADDONS_DIR } else { CORE_DIR };
    let dir = self.root.join(partition).join(def.name());
    if dir.exists() {
      return Err(SourceError::AlreadyExists(dir));
    }
    fs::create_dir_all(&dir).map_err(|source| SourceError::Io {
      path: dir.clone(),
      source,
    })?;
    debug!(service = def.name(), dir = %dir.display(), "created service directory");
    Ok(dir)
  }

  /// Write a definition into its service directory, creating it if needed.
  ///
  /// An existing definition is overwritten in place.
  pub fn save_service(&self, def: &ServiceDefinition) -> Result<PathBuf, SourceError> {
    check_name(def.name())?;
    let dir = match find_service_dir(&self.root, def.name()) {
      Some(dir) => dir,
      None => self.create_service_dir(def)?,
    };
    let path = dir.join(DEFINITION_FILENAME);
    loader::save_service(def, &path)?;
    info!(service = def.name(), path = %path.display(), "saved service definition");
    Ok(path)
  }

  /// Remove a service's directory.
  pub fn delete_service(&self, name: &str) -> Result<(), SourceError> {
    check_name(name)?;
    let dir = candidate_dirs(&self.root, name)
      .into_iter()
      .find(|dir| dir.is_dir())
      .ok_or_else(|| SourceError::NotFound {
        source_name: self.meta.name.clone(),
        service: name.to_string(),
      })?;
    fs::remove_dir_all(&dir).map_err(|source| SourceError::Io {
      path: dir.clone(),
      source,
    })?;
    info!(service = name, dir = %dir.display(), "deleted service");
    Ok(())
  }
}

#[async_trait]
impl SourceProvider for LocalSource {
  fn meta(&self) -> &SourceMeta {
    &self.meta
  }

  async fn load(&self) -> Result<Vec<ServiceDefinition>, SourceError> {
    load_root(&self.meta.name, &self.root)
  }

  async fn load_service(&self, name: &str) -> Result<ServiceDefinition, SourceError> {
    load_from_root(&self.meta.name, &self.root, name)
  }

  async fn list_services(&self) -> Result<Vec<String>, SourceError> {
    list_root(&self.root)
  }

  fn service_path(&self, name: &str) -> Option<PathBuf> {
    find_service_dir(&self.root, name)
  }

  async fn update(&self) -> Result<(), SourceError> {
    Ok(())
  }

  fn commit(&self) -> Option<String> {
    None
  }
}
