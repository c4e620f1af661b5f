use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use tracing::debug;

use super::{SourceError, SourceKind, SourceMeta, SourceProvider};
use crate::consts::{ADDONS_DIR, CORE_DIR, DEFINITION_FILENAME, EMBEDDED_COMMIT, EMBEDDED_PRIORITY, EMBEDDED_SOURCE_NAME};
use crate::loader::{self, ServiceDefinition};

/// One file of a statically bundled service tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundledFile {
  /// Path relative to the bundle root, `/`-separated.
  pub path: &'static str,
  pub contents: &'static str,
}

macro_rules! bundled {
  ($path:literal) => {
    BundledFile {
      path: $path,
      contents: include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/services/", $path)),
    }
  };
}

/// Services shipped with stackr.
pub static BUILTIN_SERVICES: &[BundledFile] = &[
  bundled!("core/traefik/service.yaml"),
  bundled!("addons/diun/service.yaml"),
];

/// Source backed by a statically bundled service tree.
///
/// Always available, never updated, and consulted after every other source.
#[derive(Debug)]
pub struct EmbeddedSource {
  meta: SourceMeta,
  files: &'static [BundledFile],
  services: OnceLock<Vec<String>>,
}

impl EmbeddedSource {
  pub fn new(files: &'static [BundledFile]) -> Self {
    Self::with_meta(
      SourceMeta::new(EMBEDDED_SOURCE_NAME, SourceKind::Embedded, EMBEDDED_PRIORITY),
      files,
    )
  }

  /// The source serving [`BUILTIN_SERVICES`].
  pub fn builtin() -> Self {
    Self::new(BUILTIN_SERVICES)
  }

  pub(crate) fn with_meta(meta: SourceMeta, files: &'static [BundledFile]) -> Self {
    Self {
      meta,
      files,
      services: OnceLock::new(),
    }
  }

  fn file(&self, path: &str) -> Option<&'static BundledFile> {
    self.files.iter().find(|f| f.path == path)
  }

  /// Service names in the bundle, discovered on first use.
  fn discovered(&self) -> &[String] {
    self.services.get_or_init(|| {
      let mut names = Vec::new();
      for file in self.files {
        let path = Path::new(file.path);
        let hidden = path
          .parent()
          .into_iter()
          .flat_map(Path::components)
          .any(|c| c.as_os_str().to_string_lossy().starts_with('.'));
        if hidden || path.file_name().is_none_or(|n| n != DEFINITION_FILENAME) {
          continue;
        }
        if let Some(name) = path.parent().and_then(Path::file_name) {
          let name = name.to_string_lossy().into_owned();
          if !names.contains(&name) {
            names.push(name);
          }
        }
      }
      debug!(count = names.len(), "discovered embedded services");
      names
    })
  }

  fn definition_file(&self, name: &str) -> Option<&'static BundledFile> {
    [
      format!("{name}/{DEFINITION_FILENAME}"),
      format!("{CORE_DIR}/{name}/{DEFINITION_FILENAME}"),
      format!("{ADDONS_DIR}/{name}/{DEFINITION_FILENAME}"),
    ]
    .iter()
    .find_map(|path| self.file(path))
  }
}

#[async_trait]
impl SourceProvider for EmbeddedSource {
  fn meta(&self) -> &SourceMeta {
    &self.meta
  }

  async fn load(&self) -> Result<Vec<ServiceDefinition>, SourceError> {
    let mut definitions = Vec::new();
    for name in self.discovered() {
      match self.load_service(name).await {
        Ok(def) => definitions.push(def),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
      }
    }
    Ok(definitions)
  }

  async fn load_service(&self, name: &str) -> Result<ServiceDefinition, SourceError> {
    let file = self.definition_file(name).ok_or_else(|| SourceError::NotFound {
      source_name: self.meta.name.clone(),
      service: name.to_string(),
    })?;
    let mut def = loader::parse_service(file.contents)?;
    loader::apply_defaults(&mut def);
    Ok(def)
  }

  async fn list_services(&self) -> Result<Vec<String>, SourceError> {
    Ok(self.discovered().to_vec())
  }

  fn service_path(&self, _name: &str) -> Option<PathBuf> {
    None
  }

  async fn update(&self) -> Result<(), SourceError> {
    Ok(())
  }

  fn commit(&self) -> Option<String> {
    Some(EMBEDDED_COMMIT.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::validate::{has_errors, validate};

  static BUNDLE: &[BundledFile] = &[
    BundledFile {
      path: "core/traefik/service.yaml",
      contents: "apiVersion: stackr.dev/v1\nkind: Service\nmetadata:\n  name: traefik\n  version: '3'\n  category: core\nspec:\n  image:\n    repository: traefik\n",
    },
    BundledFile {
      path: "core/traefik/README.md",
      contents: "# traefik",
    },
    BundledFile {
      path: ".drafts/radarr/service.yaml",
      contents: "not yaml: [",
    },
  ];

  #[tokio::test]
  async fn lists_definition_directories() {
    let source = EmbeddedSource::new(BUNDLE);
    assert_eq!(source.list_services().await.unwrap(), ["traefik"]);
    assert_eq!(source.load().await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn loads_with_defaults() {
    let source = EmbeddedSource::new(BUNDLE);
    let def = source.load_service("traefik").await.unwrap();
    assert_eq!(def.spec.image.tag, "latest");
    assert!(source.load_service("radarr").await.unwrap_err().is_not_found());
  }

  #[tokio::test]
  async fn is_a_fixed_lowest_priority_source() {
    let source = EmbeddedSource::new(BUNDLE);
    assert_eq!(source.priority(), EMBEDDED_PRIORITY);
    assert_eq!(source.commit().as_deref(), Some(EMBEDDED_COMMIT));
    assert!(source.service_path("traefik").is_none());
    source.update().await.unwrap();
  }

  #[tokio::test]
  async fn builtin_services_are_valid() {
    let source = EmbeddedSource::builtin();
    let definitions = source.load().await.unwrap();
    assert!(!definitions.is_empty());
    for def in definitions {
      let findings = validate(&def);
      assert!(!has_errors(&findings), "{}: {findings:?}", def.name());
    }
  }

  #[tokio::test]
  async fn builtin_traefik_is_always_on() {
    let def = EmbeddedSource::builtin().load_service("traefik").await.unwrap();
    assert!(def.conditions.always);
    assert!(!def.is_addon());
  }
}
