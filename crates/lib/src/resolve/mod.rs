//! Dependency resolution.
//!
//! A [`Resolver`] turns the services visible through a [`Registry`] and a user
//! configuration into a [`ResolutionGraph`]:
//!
//! 1. Every non-add-on service is a candidate, plus every add-on the user
//!    enabled.
//! 2. Each candidate is resolved: its winning definition is fetched, its
//!    inclusion conditions evaluated, overrides from every source applied in
//!    ascending priority, and its dependencies resolved in turn.
//! 3. The graph is ordered with Kahn's algorithm.
//!
//! A service that fails to resolve is recorded as a [`ResolutionError`] and
//! does not stop the others. A dependency cycle is reported as a single error
//! and leaves the install order empty.
//!
//! A resolver is single-use. Concurrent resolutions need independent
//! resolvers.

mod conditions;
mod sort;

use std::collections::{BTreeMap, HashMap};
use std::error::Error as StdError;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::UserConfig;
use crate::consts::{DEFINITION_FILENAME, OVERRIDE_FILENAME};
use crate::loader::{self, ServiceDefinition};
use crate::registry::{Registry, RegistryError};
use crate::sources::SourceProvider;
use crate::util::hash::{HashError, definition_hash};

pub use conditions::{
  EXPOSURE_CLOUDFLARE, EXPOSURE_DIRECT, EXPOSURE_TRAEFIK, VPN_DISABLED, VPN_ENABLED, evaluate_condition,
  evaluate_conditions,
};
pub use sort::topological_sort;

/// An override file that was applied to a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedOverride {
  pub source: String,
  pub priority: i32,
  pub path: PathBuf,
}

/// The resolution of one service.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedService {
  pub name: String,
  /// Source whose definition won.
  pub source: String,
  /// Definition file, when the winning source has one on disk.
  pub path: Option<PathBuf>,
  /// The winning definition, before overrides.
  pub definition: ServiceDefinition,
  pub definition_hash: String,
  /// Overrides in the order they were applied, lowest priority first.
  pub overrides: Vec<AppliedOverride>,
  /// The definition after overrides.
  pub merged: ServiceDefinition,
  pub dependencies: Vec<String>,
  /// Whether the service's inclusion conditions hold.
  pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionErrorKind {
  /// The service itself could not be resolved.
  Service,
  /// A dependency of the service could not be resolved.
  Dependency,
  /// An override file of the service could not be loaded.
  Override,
  /// The dependency graph contains a cycle.
  Cycle,
}

/// A non-fatal failure collected during resolution.
#[derive(Debug, Error)]
#[error("{service}: {message}")]
pub struct ResolutionError {
  /// Service the failure is attributed to.
  pub service: String,
  pub kind: ResolutionErrorKind,
  pub message: String,
  #[source]
  pub cause: Option<Box<dyn StdError + Send + Sync>>,
}

impl ResolutionError {
  fn new(
    service: &str,
    kind: ResolutionErrorKind,
    message: String,
    cause: Option<Box<dyn StdError + Send + Sync>>,
  ) -> Self {
    Self {
      service: service.to_string(),
      kind,
      message,
      cause,
    }
  }
}

/// The result of a resolution run.
#[derive(Debug, Default)]
pub struct ResolutionGraph {
  pub services: BTreeMap<String, ResolvedService>,
  /// Dependencies before dependents. Empty when a cycle was detected.
  pub order: Vec<String>,
  pub errors: Vec<ResolutionError>,
}

impl ResolutionGraph {
  pub fn get(&self, name: &str) -> Option<&ResolvedService> {
    self.services.get(name)
  }

  pub fn has_errors(&self) -> bool {
    !self.errors.is_empty()
  }

  pub fn has_cycle(&self) -> bool {
    self.errors.iter().any(|e| e.kind == ResolutionErrorKind::Cycle)
  }

  /// Enabled services in install order.
  pub fn enabled_services(&self) -> impl Iterator<Item = &ResolvedService> {
    self
      .order
      .iter()
      .filter_map(|name| self.services.get(name))
      .filter(|s| s.enabled)
  }
}

#[derive(Debug, Error)]
enum ResolveFailure {
  #[error(transparent)]
  Lookup(#[from] RegistryError),
  #[error("failed to hash definition: {0}")]
  Hash(#[from] HashError),
}

/// Resolves a user configuration against a registry.
pub struct Resolver<'a, C: UserConfig> {
  registry: &'a Registry,
  config: &'a C,
  graph: ResolutionGraph,
  lookups: HashMap<String, (Arc<dyn SourceProvider>, ServiceDefinition)>,
}

impl<'a, C: UserConfig> Resolver<'a, C> {
  pub fn new(registry: &'a Registry, config: &'a C) -> Self {
    Self {
      registry,
      config,
      graph: ResolutionGraph::default(),
      lookups: HashMap::new(),
    }
  }

  /// Run the resolution and return the resulting graph.
  pub async fn resolve(mut self) -> ResolutionGraph {
    let candidates = self.determine_enabled_services().await;
    debug!(count = candidates.len(), "resolving candidate services");

    for name in &candidates {
      self.resolve_service(name).await;
    }
    self.sort();

    info!(
      services = self.graph.services.len(),
      errors = self.graph.errors.len(),
      "resolution finished"
    );
    self.graph
  }

  async fn determine_enabled_services(&mut self) -> Vec<String> {
    let mut candidates = Vec::new();
    for name in self.registry.list_services().await {
      let is_addon = match self.lookup(&name).await {
        Ok((_, def)) => def.is_addon(),
        // Keep it so the failure is reported when resolving.
        Err(_) => false,
      };
      if !is_addon || self.config.is_addon_enabled(&name) {
        candidates.push(name);
      } else {
        debug!(service = %name, "add-on not enabled");
      }
    }
    candidates
  }

  /// Winning source and definition of a service, memoized per run.
  async fn lookup(&mut self, name: &str) -> Result<(Arc<dyn SourceProvider>, ServiceDefinition), RegistryError> {
    if let Some(found) = self.lookups.get(name) {
      return Ok(found.clone());
    }
    let found = self.registry.lookup(name).await?;
    self.lookups.insert(name.to_string(), found.clone());
    Ok(found)
  }

  /// Resolve a service and, transitively, its dependencies.
  ///
  /// Already resolved services are skipped.
  async fn resolve_service(&mut self, name: &str) {
    let mut pending = vec![(name.to_string(), None::<String>)];

    while let Some((name, dependent)) = pending.pop() {
      if self.graph.services.contains_key(&name) {
        continue;
      }

      match self.resolve_one(&name).await {
        Ok(resolved) => {
          for dep in resolved.dependencies.iter().rev() {
            if !self.graph.services.contains_key(dep) {
              pending.push((dep.clone(), Some(name.clone())));
            }
          }
          self.graph.services.insert(name, resolved);
        }
        Err(failure) => {
          let error = match dependent {
            Some(dependent) => ResolutionError::new(
              &dependent,
              ResolutionErrorKind::Dependency,
              format!("dependency '{name}' could not be resolved: {failure}"),
              Some(Box::new(failure)),
            ),
            None => ResolutionError::new(
              &name,
              ResolutionErrorKind::Service,
              failure.to_string(),
              Some(Box::new(failure)),
            ),
          };
          warn!(service = %error.service, error = %error.message, "resolution failed");
          self.graph.errors.push(error);
        }
      }
    }
  }

  async fn resolve_one(&mut self, name: &str) -> Result<ResolvedService, ResolveFailure> {
    let (provider, definition) = self.lookup(name).await?;
    let definition_hash = definition_hash(&definition)?;
    let path = provider.service_path(name).map(|dir| dir.join(DEFINITION_FILENAME));
    let enabled = evaluate_conditions(name, &definition.conditions, self.config);

    let mut resolved = ResolvedService {
      name: name.to_string(),
      source: provider.name().to_string(),
      path,
      merged: definition.clone(),
      definition,
      definition_hash,
      overrides: Vec::new(),
      dependencies: Vec::new(),
      enabled,
    };

    if !enabled {
      debug!(service = name, "conditions not met, service disabled");
      return Ok(resolved);
    }

    self.apply_overrides(&mut resolved);
    resolved.dependencies = self.collect_dependencies(&resolved.merged);
    debug!(
      service = name,
      source = %resolved.source,
      image = %resolved.merged.spec.image.reference(),
      overrides = resolved.overrides.len(),
      dependencies = ?resolved.dependencies,
      "resolved service"
    );
    Ok(resolved)
  }

  /// Apply every source's override for the service, lowest priority first.
  fn apply_overrides(&mut self, resolved: &mut ResolvedService) {
    let registry = self.registry;
    let providers: Vec<_> = registry.enabled_providers().collect();

    for provider in providers.into_iter().rev() {
      let Some(dir) = provider.service_path(&resolved.name) else {
        continue;
      };
      let path = dir.join(OVERRIDE_FILENAME);
      if !path.is_file() {
        continue;
      }

      match loader::load_override(&path) {
        Ok(patch) if patch.metadata.name != resolved.name => {
          warn!(
            service = %resolved.name,
            target = %patch.metadata.name,
            path = %path.display(),
            "override targets a different service, ignoring"
          );
        }
        Ok(patch) => {
          resolved.merged = loader::merge_override(&resolved.merged, &patch);
          resolved.overrides.push(AppliedOverride {
            source: provider.name().to_string(),
            priority: provider.priority(),
            path,
          });
        }
        Err(e) => {
          let message = format!("failed to load override '{}': {e}", path.display());
          warn!(service = %resolved.name, error = %message, "skipping override");
          self.graph.errors.push(ResolutionError::new(
            &resolved.name,
            ResolutionErrorKind::Override,
            message,
            Some(Box::new(e)),
          ));
        }
      }
    }
  }

  /// Required dependencies, plus conditional ones whose condition holds.
  fn collect_dependencies(&self, def: &ServiceDefinition) -> Vec<String> {
    let deps = &def.spec.dependencies;
    let conditional = deps
      .conditional
      .iter()
      .filter(|dep| evaluate_condition(&dep.when, self.config))
      .map(|dep| &dep.name);

    let mut collected: Vec<String> = Vec::new();
    for name in deps.required.iter().chain(conditional) {
      if !collected.contains(name) {
        collected.push(name.clone());
      }
    }
    collected
  }

  fn sort(&mut self) {
    let edges: BTreeMap<String, Vec<String>> = self
      .graph
      .services
      .iter()
      .map(|(name, service)| (name.clone(), service.dependencies.clone()))
      .collect();

    match topological_sort(&edges) {
      Ok(order) => self.graph.order = order,
      Err(cycle) => {
        let message = format!("dependency cycle detected among: {}", cycle.join(", "));
        warn!(services = ?cycle, "dependency cycle detected");
        let service = cycle.first().cloned().unwrap_or_default();
        self.graph.order.clear();
        self
          .graph
          .errors
          .push(ResolutionError::new(&service, ResolutionErrorKind::Cycle, message, None));
      }
    }
  }
}
