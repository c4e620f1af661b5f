use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use super::drift::{Drift, DriftTarget, LockDiff, VerifyResult, diff_lock_files};
use super::{LockError, LockFile, LockedImage, LockedService, LockedSource};
use crate::config::UserConfig;
use crate::registry::Registry;
use crate::resolve::{ResolutionGraph, ResolvedService};
use crate::sources::SourceKind;
use crate::util::hash::config_hash;

/// Generates, verifies and diffs lock files against a registry.
pub struct LockManager<'a> {
  registry: &'a Registry,
  cli_version: String,
}

impl<'a> LockManager<'a> {
  pub fn new(registry: &'a Registry) -> Self {
    Self {
      registry,
      cli_version: env!("CARGO_PKG_VERSION").to_string(),
    }
  }

  /// Version recorded in generated lock files.
  pub fn with_cli_version(mut self, version: impl Into<String>) -> Self {
    self.cli_version = version.into();
    self
  }

  /// Resolve the configuration and snapshot the result.
  ///
  /// Fails only when the dependency graph has a cycle; other resolution
  /// errors are logged and the affected services left out.
  pub async fn generate<C: UserConfig>(&self, config: &C) -> Result<LockFile, LockError> {
    let hash = config_hash(config).map_err(LockError::Hash)?;
    let graph = self.registry.resolve(config).await;

    if graph.has_cycle() {
      return Err(LockError::Unresolvable {
        errors: graph.errors.iter().map(ToString::to_string).collect(),
      });
    }
    for error in &graph.errors {
      warn!(service = %error.service, error = %error.message, "service left out of lock file");
    }

    let mut lock = LockFile::new(&self.cli_version, hash);
    lock.sources = self.locked_sources();
    lock.services = graph
      .enabled_services()
      .map(|service| (service.name.clone(), locked_service(service)))
      .collect();
    lock.install_order = graph.enabled_services().map(|s| s.name.clone()).collect();

    info!(
      services = lock.services.len(),
      sources = lock.sources.len(),
      "generated lock file"
    );
    Ok(lock)
  }

  /// Current commit of every enabled git source.
  fn locked_sources(&self) -> BTreeMap<String, LockedSource> {
    self
      .registry
      .enabled_providers()
      .filter(|p| p.kind() == SourceKind::Git)
      .map(|p| {
        let locked = LockedSource {
          url: p.url().unwrap_or_default().to_string(),
          commit: p.commit().unwrap_or_default(),
          branch: p.branch().unwrap_or_default().to_string(),
          fetched_at: p.last_updated(),
        };
        (p.name().to_string(), locked)
      })
      .collect()
  }

  /// Compare a lock file against the current configuration and sources.
  pub async fn verify<C: UserConfig>(&self, lock: &LockFile, config: &C) -> Result<VerifyResult, LockError> {
    let mut result = VerifyResult::default();

    let hash = config_hash(config).map_err(LockError::Hash)?;
    if hash != lock.metadata.config_hash {
      result.drifts.push(Drift::changed(
        DriftTarget::Config,
        "config",
        "configHash",
        &lock.metadata.config_hash,
        hash,
      ));
    }

    let graph = self.registry.resolve(config).await;

    for (name, locked) in &lock.sources {
      match self.registry.provider(name) {
        None => result
          .drifts
          .push(Drift::missing(DriftTarget::Source, name, &locked.commit)),
        Some(provider) => {
          let current = provider.commit().unwrap_or_default();
          if current != locked.commit {
            result.drifts.push(Drift::changed(
              DriftTarget::Source,
              name,
              "commit",
              &locked.commit,
              current,
            ));
          }
        }
      }
    }

    for (name, locked) in &lock.services {
      verify_service(&graph, name, locked, &mut result);
    }

    debug!(drifts = result.drifts.len(), "verified lock file");
    Ok(result)
  }

  /// Compare a lock file against a freshly generated one.
  pub async fn diff<C: UserConfig>(&self, lock: &LockFile, config: &C) -> Result<LockDiff, LockError> {
    let fresh = self.generate(config).await?;
    Ok(diff_lock_files(lock, &fresh))
  }

  /// Update every source from its origin and regenerate the lock file.
  ///
  /// With `only` set and a previous lock file, services outside `only` are
  /// carried over unchanged from `previous`; services new to the plan are
  /// still added. Generated file hashes are carried over.
  pub async fn update<C: UserConfig>(
    &self,
    previous: Option<&LockFile>,
    config: &C,
    only: Option<&[String]>,
  ) -> Result<LockFile, LockError> {
    self.registry.update().await?;
    let mut fresh = self.generate(config).await?;

    let Some(previous) = previous else {
      return Ok(fresh);
    };
    fresh.generated_files = previous.generated_files.clone();

    let Some(only) = only else {
      return Ok(fresh);
    };
    let only: BTreeSet<&str> = only.iter().map(String::as_str).collect();

    let mut services = BTreeMap::new();
    for (name, locked) in &previous.services {
      if only.contains(name.as_str()) {
        if let Some(updated) = fresh.services.get(name) {
          services.insert(name.clone(), updated.clone());
        }
      } else {
        services.insert(name.clone(), locked.clone());
      }
    }
    for (name, locked) in &fresh.services {
      if !previous.services.contains_key(name) {
        services.insert(name.clone(), locked.clone());
      }
    }

    let mut order: Vec<String> = fresh
      .install_order
      .iter()
      .filter(|name| services.contains_key(name.as_str()))
      .cloned()
      .collect();
    for name in &previous.install_order {
      if services.contains_key(name) && !order.contains(name) {
        order.push(name.clone());
      }
    }

    debug!(only = ?only, services = services.len(), "partially updated lock file");
    fresh.services = services;
    fresh.install_order = order;
    Ok(fresh)
  }
}

fn locked_service(service: &ResolvedService) -> LockedService {
  let image = &service.merged.spec.image;
  LockedService {
    source: service.source.clone(),
    definition_version: service.definition.metadata.version.clone(),
    image: LockedImage {
      repository: image.repository.clone(),
      tag: image.tag.clone(),
      digest: image.digest.clone(),
    },
    resolved_from: match &service.path {
      Some(path) => path.display().to_string(),
      None => format!("{}:{}", service.source, service.name),
    },
    enabled: service.enabled,
  }
}

fn verify_service(graph: &ResolutionGraph, name: &str, locked: &LockedService, result: &mut VerifyResult) {
  let Some(current) = graph.get(name).map(locked_service) else {
    result
      .drifts
      .push(Drift::missing(DriftTarget::Service, name, &locked.definition_version));
    return;
  };

  let checks = [
    ("source", &locked.source, &current.source),
    (
      "definitionVersion",
      &locked.definition_version,
      &current.definition_version,
    ),
    ("image.repository", &locked.image.repository, &current.image.repository),
    ("image.tag", &locked.image.tag, &current.image.tag),
  ];
  for (field, locked_value, current_value) in checks {
    if locked_value != current_value {
      result.drifts.push(Drift::changed(
        DriftTarget::Service,
        name,
        field,
        locked_value,
        current_value,
      ));
    }
  }
}
