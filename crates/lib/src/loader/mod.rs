//! YAML document loading and saving.
//!
//! Every stackr document starts with an `apiVersion`/`kind` header. The header
//! is checked before the body is decoded, so a document of the wrong kind is
//! reported as such even when its body would not fit the expected schema.

mod defaults;
mod discover;
mod merge;
pub mod types;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{API_VERSION, KIND_OVERRIDE, KIND_SERVICE, KIND_SOURCE_CONFIG};

pub use defaults::apply_defaults;
pub use discover::discover_services;
pub use merge::merge_override;
pub use types::*;

/// Errors that can occur when loading or saving documents.
#[derive(Debug, Error)]
pub enum LoadError {
  /// Failed to read a document file.
  #[error("failed to read '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Failed to write a document file.
  #[error("failed to write '{path}': {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// The document is not valid YAML for its schema.
  #[error("failed to parse document: {0}")]
  Parse(#[source] serde_yaml::Error),

  /// The document could not be serialized.
  #[error("failed to serialize document: {0}")]
  Serialize(#[source] serde_yaml::Error),

  /// The document declares an `apiVersion` this crate does not understand.
  #[error("unsupported apiVersion '{found}', expected '{expected}'")]
  UnsupportedVersion { expected: &'static str, found: String },

  /// The document declares a different `kind` than the one requested.
  #[error("invalid kind '{found}', expected '{expected}'")]
  WrongKind { expected: &'static str, found: String },

  /// A document error, annotated with the file it came from.
  #[error("{path}: {source}")]
  InFile {
    path: PathBuf,
    #[source]
    source: Box<LoadError>,
  },
}

impl LoadError {
  fn in_file(self, path: &Path) -> Self {
    LoadError::InFile {
      path: path.to_path_buf(),
      source: Box::new(self),
    }
  }

  /// The underlying error, with any file annotation removed.
  pub fn root(&self) -> &LoadError {
    match self {
      LoadError::InFile { source, .. } => source.root(),
      other => other,
    }
  }
}

/// A document with an `apiVersion`/`kind` header.
pub trait Document: Serialize + DeserializeOwned {
  /// The `kind` this document type must declare.
  const KIND: &'static str;
}

impl Document for ServiceDefinition {
  const KIND: &'static str = KIND_SERVICE;
}

impl Document for ServiceOverride {
  const KIND: &'static str = KIND_OVERRIDE;
}

impl Document for SourceConfig {
  const KIND: &'static str = KIND_SOURCE_CONFIG;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Header {
  #[serde(default)]
  api_version: String,
  #[serde(default)]
  kind: String,
}

/// Parse a document from YAML, checking its header first.
pub fn parse_document<T: Document>(content: &str) -> Result<T, LoadError> {
  let header: Header = serde_yaml::from_str(content).map_err(LoadError::Parse)?;

  if header.api_version != API_VERSION {
    return Err(LoadError::UnsupportedVersion {
      expected: API_VERSION,
      found: header.api_version,
    });
  }
  if header.kind != T::KIND {
    return Err(LoadError::WrongKind {
      expected: T::KIND,
      found: header.kind,
    });
  }

  serde_yaml::from_str(content).map_err(LoadError::Parse)
}

/// Serialize a document to YAML.
pub fn to_yaml<T: Document>(document: &T) -> Result<String, LoadError> {
  serde_yaml::to_string(document).map_err(LoadError::Serialize)
}

/// Load and parse a document file.
pub fn load_document<T: Document>(path: &Path) -> Result<T, LoadError> {
  let content = fs::read_to_string(path).map_err(|source| LoadError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let document = parse_document(&content).map_err(|e| e.in_file(path))?;
  debug!(kind = T::KIND, path = %path.display(), "loaded document");
  Ok(document)
}

/// Serialize a document and write it to `path`, creating parent directories.
pub fn save_document<T: Document>(document: &T, path: &Path) -> Result<(), LoadError> {
  let content = to_yaml(document)?;
  let write_err = |source| LoadError::Write {
    path: path.to_path_buf(),
    source,
  };

  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(write_err)?;
  }
  fs::write(path, content).map_err(write_err)?;
  debug!(kind = T::KIND, path = %path.display(), "saved document");
  Ok(())
}

/// Load a service definition file.
pub fn load_service(path: &Path) -> Result<ServiceDefinition, LoadError> {
  load_document(path)
}

/// Parse a service definition from YAML.
pub fn parse_service(content: &str) -> Result<ServiceDefinition, LoadError> {
  parse_document(content)
}

/// Write a service definition file.
pub fn save_service(definition: &ServiceDefinition, path: &Path) -> Result<(), LoadError> {
  save_document(definition, path)
}

/// Load a service override file.
pub fn load_override(path: &Path) -> Result<ServiceOverride, LoadError> {
  load_document(path)
}

/// Load a source configuration file.
pub fn load_source_config(path: &Path) -> Result<SourceConfig, LoadError> {
  load_document(path)
}

/// Write a source configuration file.
pub fn save_source_config(config: &SourceConfig, path: &Path) -> Result<(), LoadError> {
  save_document(config, path)
}
