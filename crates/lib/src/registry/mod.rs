//! The service registry.
//!
//! The registry owns the sources, ordered by descending priority with the
//! embedded source always last, and answers lookups with first-match-wins
//! semantics: the highest-priority enabled source defining a service decides
//! what that service is.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{Cache, CacheError};
use crate::config::UserConfig;
use crate::loader::{ServiceDefinition, SourceConfig, TrustLevel};
use crate::platform::paths::{expand_tilde, sources_cache_dir};
use crate::resolve::{ResolutionGraph, Resolver};
use crate::sources::{EmbeddedSource, SourceError, SourceKind, SourceProvider, create_source_provider};
use crate::validate::{ValidationError, builtin_trust_levels, trust_level_name, validate_with_trust_level};

/// Errors that can occur in registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
  /// No enabled source defines the service.
  #[error("service '{0}' not found in any source")]
  ServiceNotFound(String),

  /// A source could not be constructed or read.
  #[error("source '{name}': {source}")]
  Source {
    name: String,
    #[source]
    source: SourceError,
  },

  /// Two sources share a name.
  #[error("duplicate source name '{0}'")]
  DuplicateSource(String),

  /// One or more sources failed to update.
  #[error("{}", UpdateFailures(.failures))]
  Update { failures: Vec<(String, SourceError)> },

  /// The source cache could not be opened.
  #[error(transparent)]
  Cache(#[from] CacheError),
}

struct UpdateFailures<'a>(&'a [(String, SourceError)]);

impl fmt::Display for UpdateFailures<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "failed to update {} source(s)", self.0.len())?;
    for (i, (name, err)) in self.0.iter().enumerate() {
      let sep = if i == 0 { ": " } else { "; " };
      write!(f, "{sep}{name}: {err}")?;
    }
    Ok(())
  }
}

/// A service match returned by [`Registry::search_services`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSummary {
  pub name: String,
  pub version: String,
  pub category: String,
  pub description: String,
  /// Full image reference, `registry/repository:tag`.
  pub image: String,
  pub source: String,
}

/// Display information about one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
  pub name: String,
  pub kind: String,
  pub priority: i32,
  pub enabled: bool,
  pub trust_level: String,
  pub url: Option<String>,
  pub commit: Option<String>,
  pub last_updated: Option<DateTime<Utc>>,
}

/// Priority-ordered set of definition sources.
#[derive(Debug)]
pub struct Registry {
  providers: Vec<Arc<dyn SourceProvider>>,
  trust_levels: BTreeMap<String, TrustLevel>,
}

impl Registry {
  /// Build a registry from a source configuration.
  ///
  /// Unverified git sources are skipped when the configuration disallows them.
  /// Source names must be unique, including against the built-in `embedded`.
  pub fn new(config: &SourceConfig, cache: Arc<Cache>) -> Result<Self, RegistryError> {
    let mut providers = Vec::new();

    for source in &config.sources {
      let provider = create_source_provider(source, cache.clone()).map_err(|e| RegistryError::Source {
        name: source.name.clone(),
        source: e,
      })?;
      if !config.security.allow_unverified && provider.kind() == SourceKind::Git && !provider.is_verified() {
        warn!(source = %source.name, "skipping unverified source");
        continue;
      }
      providers.push(provider);
    }

    let mut registry = Self::with_providers(providers);
    let mut names = HashSet::new();
    if let Some(duplicate) = registry.providers.iter().map(|p| p.name()).find(|name| !names.insert(*name)) {
      return Err(RegistryError::DuplicateSource(duplicate.to_string()));
    }
    registry.trust_levels.extend(config.security.trust_levels.clone());
    Ok(registry)
  }

  /// Build a registry from a source configuration, opening the cache it names.
  pub fn from_config(config: &SourceConfig) -> Result<Self, RegistryError> {
    let dir = config
      .cache
      .directory
      .as_deref()
      .map(expand_tilde)
      .unwrap_or_else(sources_cache_dir);
    let cache = Cache::new(dir, config.cache.ttl)?;
    Self::new(config, Arc::new(cache))
  }

  /// Build a registry from ready-made providers.
  ///
  /// The built-in embedded source is added when no embedded source is present.
  pub fn with_providers(mut providers: Vec<Arc<dyn SourceProvider>>) -> Self {
    if !providers.iter().any(|p| p.kind() == SourceKind::Embedded) {
      providers.push(Arc::new(EmbeddedSource::builtin()));
    }
    // Stable: equal priorities keep configuration order.
    providers.sort_by_key(|p| (p.kind() == SourceKind::Embedded, std::cmp::Reverse(p.priority())));

    debug!(
      sources = ?providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
      "registry sources"
    );
    Self {
      providers,
      trust_levels: builtin_trust_levels(),
    }
  }

  /// All sources, highest priority first.
  pub fn providers(&self) -> &[Arc<dyn SourceProvider>] {
    &self.providers
  }

  /// Enabled sources, highest priority first.
  pub fn enabled_providers(&self) -> impl DoubleEndedIterator<Item = &Arc<dyn SourceProvider>> {
    self.providers.iter().filter(|p| p.is_enabled())
  }

  pub fn provider(&self, name: &str) -> Option<&Arc<dyn SourceProvider>> {
    self.providers.iter().find(|p| p.name() == name)
  }

  /// The winning source and definition of a service.
  ///
  /// A source that fails for any reason other than not defining the service
  /// is logged and skipped.
  pub async fn lookup(&self, name: &str) -> Result<(Arc<dyn SourceProvider>, ServiceDefinition), RegistryError> {
    for provider in self.enabled_providers() {
      match provider.load_service(name).await {
        Ok(def) => {
          debug!(service = name, source = provider.name(), "found service");
          return Ok((provider.clone(), def));
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => warn!(service = name, source = provider.name(), error = %e, "source failed, trying next"),
      }
    }
    Err(RegistryError::ServiceNotFound(name.to_string()))
  }

  /// The definition of a service from the highest-priority source defining it.
  pub async fn get_service(&self, name: &str) -> Result<ServiceDefinition, RegistryError> {
    self.lookup(name).await.map(|(_, def)| def)
  }

  /// Names of all services across enabled sources, sorted.
  pub async fn list_services(&self) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for provider in self.enabled_providers() {
      match provider.list_services().await {
        Ok(found) => names.extend(found.into_iter().filter(|n| seen.insert(n.clone()))),
        Err(e) => warn!(source = provider.name(), error = %e, "failed to list services"),
      }
    }
    names.sort();
    names
  }

  /// Services whose name, description or category contain `query`
  /// (case-insensitive), optionally restricted to one category.
  pub async fn search_services(&self, query: &str, category: Option<&str>) -> Vec<ServiceSummary> {
    let query = query.to_lowercase();
    let mut seen = HashSet::new();
    let mut matches = Vec::new();

    for provider in self.enabled_providers() {
      let definitions = match provider.load().await {
        Ok(definitions) => definitions,
        Err(e) => {
          warn!(source = provider.name(), error = %e, "failed to load services");
          continue;
        }
      };
      for def in definitions {
        if !seen.insert(def.metadata.name.clone()) {
          continue;
        }
        let meta = &def.metadata;
        let hit = [&meta.name, &meta.description, &meta.category]
          .iter()
          .any(|field| field.to_lowercase().contains(&query));
        if hit && category.is_none_or(|c| c == meta.category) {
          matches.push(ServiceSummary {
            name: meta.name.clone(),
            version: meta.version.clone(),
            category: meta.category.clone(),
            description: meta.description.clone(),
            image: def.spec.image.reference(),
            source: provider.name().to_string(),
          });
        }
      }
    }

    matches.sort_by(|a, b| a.name.cmp(&b.name));
    matches
  }

  /// Update every source, collecting failures instead of stopping at the first.
  pub async fn update(&self) -> Result<(), RegistryError> {
    let mut failures = Vec::new();
    for provider in &self.providers {
      if let Err(e) = provider.update().await {
        warn!(source = provider.name(), error = %e, "source update failed");
        failures.push((provider.name().to_string(), e));
      }
    }
    if failures.is_empty() {
      info!(sources = self.providers.len(), "sources updated");
      Ok(())
    } else {
      Err(RegistryError::Update { failures })
    }
  }

  /// Resolve a user configuration into a dependency graph.
  pub async fn resolve<C: UserConfig>(&self, config: &C) -> ResolutionGraph {
    Resolver::new(self, config).resolve().await
  }

  /// Name of the trust level applied to a source.
  pub fn trust_level_of(&self, provider: &dyn SourceProvider) -> &'static str {
    trust_level_name(provider.kind().as_str(), provider.is_verified())
  }

  /// Validate a service under the trust level of the source that provides it.
  pub async fn validate_service(&self, name: &str) -> Result<Vec<ValidationError>, RegistryError> {
    let (provider, def) = self.lookup(name).await?;
    let level_name = self.trust_level_of(provider.as_ref());
    let findings = match self.trust_levels.get(level_name) {
      Some(trust) => validate_with_trust_level(&def, trust),
      None => {
        warn!(trust_level = level_name, "trust level not configured, validating without it");
        crate::validate::validate(&def)
      }
    };
    Ok(findings)
  }

  /// Status of every source, highest priority first.
  pub fn source_status(&self) -> Vec<SourceStatus> {
    self
      .providers
      .iter()
      .map(|p| SourceStatus {
        name: p.name().to_string(),
        kind: p.kind().to_string(),
        priority: p.priority(),
        enabled: p.is_enabled(),
        trust_level: self.trust_level_of(p.as_ref()).to_string(),
        url: p.url().map(str::to_string),
        commit: p.commit(),
        last_updated: p.last_updated(),
      })
      .collect()
  }
}
