//! Structural and security validation of service definitions.
//!
//! [`validate`] checks a definition on its own. [`validate_with_trust_level`]
//! additionally checks it against the policy of the source it came from.
//! Only [`Severity::Error`] findings block use of a definition.

mod security;
mod trust;

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::loader::ServiceDefinition;

pub use crate::loader::TrustLevel;
pub use security::{ALLOWED_REGISTRIES, DANGEROUS_CAPABILITIES};
pub use trust::{
  TRUST_COMMUNITY, TRUST_OFFICIAL, TRUST_VERIFIED, builtin_trust_levels, trust_level_name, validate_with_trust_level,
};

/// Categories a service may declare.
pub const VALID_CATEGORIES: &[&str] = &[
  "core",
  "infrastructure",
  "media",
  "downloads",
  "automation",
  "monitoring",
  "utility",
  "security",
];

/// Accepted routing path-rewrite strategies. Empty means unset.
pub const PATH_REWRITE_STRATEGIES: &[&str] = &["stripPrefix", "urlBase", "none", ""];

static SERVICE_NAME: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[a-z]([a-z0-9-]*[a-z0-9])?$").expect("service name pattern is valid"));

static SUBDOMAIN: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("subdomain pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
  Error,
  Warning,
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Severity::Error => write!(f, "error"),
      Severity::Warning => write!(f, "warning"),
    }
  }
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
  /// Dotted path of the offending field, e.g. `spec.container.privileged`.
  pub field: String,
  pub message: String,
  pub severity: Severity,
}

impl ValidationError {
  pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      field: field.into(),
      message: message.into(),
      severity: Severity::Error,
    }
  }

  pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      field: field.into(),
      message: message.into(),
      severity: Severity::Warning,
    }
  }

  pub fn is_error(&self) -> bool {
    self.severity == Severity::Error
  }
}

impl fmt::Display for ValidationError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}: {}", self.severity, self.field, self.message)
  }
}

/// Whether any finding blocks use of the definition.
pub fn has_errors(findings: &[ValidationError]) -> bool {
  findings.iter().any(ValidationError::is_error)
}

pub fn errors(findings: &[ValidationError]) -> Vec<&ValidationError> {
  findings.iter().filter(|f| f.is_error()).collect()
}

pub fn warnings(findings: &[ValidationError]) -> Vec<&ValidationError> {
  findings.iter().filter(|f| !f.is_error()).collect()
}

/// `^[a-z][a-z0-9-]*[a-z0-9]$`, or a single lowercase letter.
pub fn is_valid_service_name(name: &str) -> bool {
  SERVICE_NAME.is_match(name)
}

pub fn is_valid_category(category: &str) -> bool {
  VALID_CATEGORIES.contains(&category)
}

/// Validate a definition on its own.
pub fn validate(def: &ServiceDefinition) -> Vec<ValidationError> {
  let mut findings = Vec::new();
  validate_metadata(def, &mut findings);
  validate_spec(def, &mut findings);
  validate_routing(def, &mut findings);
  security::validate_security(def, &mut findings);
  findings
}

fn validate_metadata(def: &ServiceDefinition, out: &mut Vec<ValidationError>) {
  let meta = &def.metadata;

  if meta.name.is_empty() {
    out.push(ValidationError::error("metadata.name", "name is required"));
  } else if !is_valid_service_name(&meta.name) {
    out.push(ValidationError::error(
      "metadata.name",
      format!(
        "invalid name '{}': must be lowercase letters, digits and hyphens, starting with a letter",
        meta.name
      ),
    ));
  }

  if meta.version.is_empty() {
    out.push(ValidationError::error("metadata.version", "version is required"));
  }

  if !is_valid_category(&meta.category) {
    out.push(ValidationError::error(
      "metadata.category",
      format!(
        "invalid category '{}', expected one of: {}",
        meta.category,
        VALID_CATEGORIES.join(", ")
      ),
    ));
  }

  if meta.description.is_empty() {
    out.push(ValidationError::warning("metadata.description", "description is recommended"));
  }
}

fn validate_spec(def: &ServiceDefinition, out: &mut Vec<ValidationError>) {
  let spec = &def.spec;

  if spec.image.repository.is_empty() {
    out.push(ValidationError::error("spec.image.repository", "image repository is required"));
  }

  if spec.container.name.is_empty() {
    out.push(ValidationError::error("spec.container.name", "container name template is required"));
  } else if !spec.container.name.contains("{{") {
    out.push(ValidationError::warning(
      "spec.container.name",
      "container name should use a template placeholder such as {{ .ContainerPrefix }}",
    ));
  }

  for (i, volume) in spec.volumes.iter().enumerate() {
    if volume.host_path.is_empty() {
      out.push(ValidationError::error(
        format!("spec.volumes[{i}].hostPath"),
        "volume host path is required",
      ));
    }
    if volume.container_path.is_empty() {
      out.push(ValidationError::error(
        format!("spec.volumes[{i}].containerPath"),
        "volume container path is required",
      ));
    }
  }

  for (i, var) in spec.environment.static_vars.iter().enumerate() {
    let field = format!("spec.environment.static[{i}]");
    if var.name.is_empty() {
      out.push(ValidationError::error(format!("{field}.name"), "environment variable name is required"));
    }
    if var.value.is_none() && var.value_from.is_none() {
      out.push(ValidationError::error(field, "environment variable needs a value or valueFrom"));
    }
  }

  for (i, var) in spec.environment.conditional.iter().enumerate() {
    let field = format!("spec.environment.conditional[{i}]");
    if var.name.is_empty() {
      out.push(ValidationError::error(format!("{field}.name"), "environment variable name is required"));
    }
    if var.condition.is_empty() {
      out.push(ValidationError::error(
        format!("{field}.condition"),
        "conditional environment variable needs a condition",
      ));
    }
  }

  if spec.healthcheck.as_ref().is_some_and(|h| h.test.is_empty()) {
    out.push(ValidationError::error("spec.healthcheck.test", "health check test command is required"));
  }

  for (i, dep) in spec.dependencies.conditional.iter().enumerate() {
    if dep.name.is_empty() {
      out.push(ValidationError::error(
        format!("spec.dependencies.conditional[{i}].name"),
        "conditional dependency name is required",
      ));
    }
  }
}

fn validate_routing(def: &ServiceDefinition, out: &mut Vec<ValidationError>) {
  let routing = &def.routing;
  if !routing.enabled {
    return;
  }

  match routing.port {
    Some(port) if (1..=65535).contains(&port) => {}
    Some(port) => out.push(ValidationError::error(
      "routing.port",
      format!("port {port} is out of range 1-65535"),
    )),
    None => out.push(ValidationError::error("routing.port", "port is required when routing is enabled")),
  }

  if !routing.subdomain.is_empty() && !SUBDOMAIN.is_match(&routing.subdomain) {
    out.push(ValidationError::error(
      "routing.subdomain",
      format!("invalid subdomain '{}'", routing.subdomain),
    ));
  }

  if !routing.path.is_empty() && !routing.path.starts_with('/') {
    out.push(ValidationError::error("routing.path", "path must start with '/'"));
  }

  if !PATH_REWRITE_STRATEGIES.contains(&routing.path_rewrite.as_str()) {
    out.push(ValidationError::error(
      "routing.pathRewrite",
      format!(
        "unknown path rewrite strategy '{}', expected stripPrefix, urlBase or none",
        routing.path_rewrite
      ),
    ));
  }
}
