//! Document schemas read by the loader.
//!
//! - [`ServiceDefinition`] - one deployable service (`kind: Service`)
//! - [`ServiceOverride`] - a partial patch of a service (`kind: ServiceOverride`)
//! - [`SourceConfig`] - the list of definition sources (`kind: SourceConfig`)
//!
//! Every field is defaulted on read so that structural problems surface as
//! validation errors rather than parse failures, and empty fields are skipped
//! on write so saved documents stay small.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_TTL;
use crate::consts::{API_VERSION, KIND_OVERRIDE, KIND_SERVICE, KIND_SOURCE_CONFIG};

fn is_false(value: &bool) -> bool {
  !*value
}

fn default_true() -> bool {
  true
}

// ---------------------------------------------------------------------------
// Service definition
// ---------------------------------------------------------------------------

/// A versioned, named unit of deployable configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
  pub api_version: String,
  pub kind: String,
  pub metadata: ServiceMetadata,
  #[serde(default)]
  pub spec: ServiceSpec,
  #[serde(default)]
  pub routing: Routing,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub secrets: Vec<Secret>,
  #[serde(default)]
  pub integrations: Integrations,
  #[serde(default)]
  pub conditions: Conditions,
}

impl ServiceDefinition {
  /// A minimal definition with the current header and the given identity.
  pub fn new(name: &str, version: &str, category: &str) -> Self {
    Self {
      api_version: API_VERSION.to_string(),
      kind: KIND_SERVICE.to_string(),
      metadata: ServiceMetadata {
        name: name.to_string(),
        version: version.to_string(),
        category: category.to_string(),
        ..Default::default()
      },
      spec: ServiceSpec::default(),
      routing: Routing::default(),
      secrets: Vec::new(),
      integrations: Integrations::default(),
      conditions: Conditions::default(),
    }
  }

  pub fn name(&self) -> &str {
    &self.metadata.name
  }

  /// Whether the service must be explicitly enabled by the user.
  pub fn is_addon(&self) -> bool {
    self.conditions.require_addon
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetadata {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub version: String,
  #[serde(default)]
  pub category: String,
  #[serde(default)]
  pub description: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub display_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub homepage: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
  #[serde(default)]
  pub image: Image,
  #[serde(default)]
  pub container: Container,
  #[serde(default)]
  pub environment: Environment,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub volumes: Vec<Volume>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub ports: Vec<Port>,
  #[serde(default)]
  pub networking: Networking,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub healthcheck: Option<HealthCheck>,
  #[serde(default)]
  pub dependencies: Dependencies,
}

/// Container image reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub registry: String,
  #[serde(default)]
  pub repository: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub tag: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub digest: Option<String>,
}

impl Image {
  /// `registry/repository:tag`, omitting empty parts.
  pub fn reference(&self) -> String {
    let mut reference = String::new();
    if !self.registry.is_empty() {
      reference.push_str(&self.registry);
      reference.push('/');
    }
    reference.push_str(&self.repository);
    if !self.tag.is_empty() {
      reference.push(':');
      reference.push_str(&self.tag);
    }
    reference
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
  /// Container name template, e.g. `{{ .ContainerPrefix }}sonarr`.
  #[serde(default)]
  pub name: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub restart: String,
  #[serde(default, skip_serializing_if = "is_false")]
  pub privileged: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user: Option<String>,
  #[serde(default)]
  pub capabilities: Capabilities,
  /// Device mappings in `host:container[:perms]` form.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub devices: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub command: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub add: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub drop: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
  #[serde(rename = "static", default, skip_serializing_if = "Vec::is_empty")]
  pub static_vars: Vec<EnvVar>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub conditional: Vec<ConditionalEnvVar>,
}

/// An environment variable with a literal value or a reference to a secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
  #[serde(default)]
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value_from: Option<String>,
}

impl EnvVar {
  pub fn new(name: &str, value: &str) -> Self {
    Self {
      name: name.to_string(),
      value: Some(value.to_string()),
      value_from: None,
    }
  }
}

/// An environment variable only set when `condition` holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalEnvVar {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub value: String,
  #[serde(default)]
  pub condition: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
  #[serde(default)]
  pub host_path: String,
  #[serde(default)]
  pub container_path: String,
  #[serde(default, skip_serializing_if = "is_false")]
  pub read_only: bool,
}

impl Volume {
  pub fn new(host_path: &str, container_path: &str) -> Self {
    Self {
      host_path: host_path.to_string(),
      container_path: container_path.to_string(),
      read_only: false,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub host: Option<u16>,
  pub container: u16,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
  /// Literal network mode (`bridge`, `host`, `service:gluetun`, ...).
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub mode: String,
  /// Templated network mode, resolved at deploy time.
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub mode_template: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub networks: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
  #[serde(default)]
  pub test: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub interval: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timeout: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub retries: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_period: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub required: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub optional: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub conditional: Vec<ConditionalDependency>,
}

/// A dependency that only applies when `when` holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalDependency {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub when: String,
}

/// Reverse-proxy exposure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Routing {
  #[serde(default, skip_serializing_if = "is_false")]
  pub enabled: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub port: Option<u32>,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub subdomain: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub path: String,
  #[serde(default)]
  pub auth: RoutingAuth,
  /// `stripPrefix`, `urlBase` or `none`.
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub path_rewrite: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingAuth {
  #[serde(default, skip_serializing_if = "is_false")]
  pub required: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub provider: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
  pub name: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub description: String,
  #[serde(default, skip_serializing_if = "is_false")]
  pub required: bool,
  #[serde(default, skip_serializing_if = "is_false")]
  pub generate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integrations {
  /// Dashboard widget.
  #[serde(default)]
  pub dashboard: Toggle,
  /// Image update notifications. Enabled unless explicitly turned off.
  #[serde(default)]
  pub update_notifier: OptionalToggle,
  /// Tunnel exposure.
  #[serde(default)]
  pub tunnel: Toggle,
  /// Archive-extraction companion.
  #[serde(default)]
  pub archive_extraction: Toggle,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toggle {
  #[serde(default, skip_serializing_if = "is_false")]
  pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionalToggle {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub enabled: Option<bool>,
}

/// Inclusion conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conditions {
  #[serde(default, skip_serializing_if = "is_false")]
  pub always: bool,
  #[serde(default, skip_serializing_if = "is_false")]
  pub require_addon: bool,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub require_config: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub require_feature: String,
}

// ---------------------------------------------------------------------------
// Service override
// ---------------------------------------------------------------------------

/// A partial patch applied on top of a service definition.
///
/// Overrides only add or replace; they never remove fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOverride {
  pub api_version: String,
  pub kind: String,
  pub metadata: OverrideMetadata,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub spec: Option<OverrideSpec>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub routing: Option<RoutingOverride>,
}

impl ServiceOverride {
  pub fn new(name: &str) -> Self {
    Self {
      api_version: API_VERSION.to_string(),
      kind: KIND_OVERRIDE.to_string(),
      metadata: OverrideMetadata { name: name.to_string() },
      spec: None,
      routing: None,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideMetadata {
  pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideSpec {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image: Option<Image>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub environment: Option<OverrideEnvironment>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideEnvironment {
  #[serde(rename = "static", default, skip_serializing_if = "Vec::is_empty")]
  pub static_vars: Vec<EnvVar>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingOverride {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub subdomain: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<String>,
}

// ---------------------------------------------------------------------------
// Source configuration
// ---------------------------------------------------------------------------

/// The list of definition sources plus cache and security settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
  pub api_version: String,
  pub kind: String,
  #[serde(default)]
  pub sources: Vec<Source>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub security: SecurityConfig,
}

impl Default for SourceConfig {
  fn default() -> Self {
    Self {
      api_version: API_VERSION.to_string(),
      kind: KIND_SOURCE_CONFIG.to_string(),
      sources: Vec::new(),
      cache: CacheConfig::default(),
      security: SecurityConfig::default(),
    }
  }
}

/// Configuration of one source provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
  pub name: String,
  /// `local`, `git` or `embedded`.
  #[serde(rename = "type")]
  pub source_type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  /// Root directory for local sources, sub-path inside the repository for git sources.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<PathBuf>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub branch: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ssh_key: Option<PathBuf>,
  #[serde(default)]
  pub priority: i32,
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default, skip_serializing_if = "is_false")]
  pub verified: bool,
}

impl Source {
  pub fn local(name: &str, path: impl Into<PathBuf>, priority: i32) -> Self {
    Self {
      name: name.to_string(),
      source_type: "local".to_string(),
      url: None,
      path: Some(path.into()),
      branch: None,
      ssh_key: None,
      priority,
      enabled: true,
      verified: false,
    }
  }

  pub fn git(name: &str, url: &str, branch: &str, priority: i32) -> Self {
    Self {
      name: name.to_string(),
      source_type: "git".to_string(),
      url: Some(url.to_string()),
      path: None,
      branch: Some(branch.to_string()),
      ssh_key: None,
      priority,
      enabled: true,
      verified: false,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub directory: Option<PathBuf>,
  #[serde(default = "default_ttl", with = "humantime_duration")]
  pub ttl: Duration,
}

fn default_ttl() -> Duration {
  DEFAULT_TTL
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      directory: None,
      ttl: DEFAULT_TTL,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
  #[serde(default = "default_true")]
  pub allow_unverified: bool,
  #[serde(default, skip_serializing_if = "is_false")]
  pub require_signatures: bool,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub trust_levels: BTreeMap<String, TrustLevel>,
}

impl Default for SecurityConfig {
  fn default() -> Self {
    Self {
      allow_unverified: true,
      require_signatures: false,
      trust_levels: BTreeMap::new(),
    }
  }
}

/// Named policy restricting the security-sensitive settings a service may use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustLevel {
  #[serde(default)]
  pub allow_privileged: bool,
  #[serde(default)]
  pub allow_host_network: bool,
  /// Linux capabilities a service may add. `*` allows any.
  #[serde(default)]
  pub allowed_capabilities: Vec<String>,
  /// Image registries a service may pull from. `*` allows any.
  #[serde(default)]
  pub allowed_registries: Vec<String>,
}

/// `Duration` as a humantime string (`24h`, `15m`).
mod humantime_duration {
  use std::time::Duration;

  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
  }
}
