use std::collections::BTreeMap;

use crate::loader::{ServiceDefinition, TrustLevel};

use super::security::{ALLOWED_REGISTRIES, effective_registry, uses_host_network};
use super::{ValidationError, validate};

pub const TRUST_OFFICIAL: &str = "official";
pub const TRUST_VERIFIED: &str = "verified";
pub const TRUST_COMMUNITY: &str = "community";

const WILDCARD: &str = "*";

/// Trust levels used when the source configuration defines none.
pub fn builtin_trust_levels() -> BTreeMap<String, TrustLevel> {
  let registries: Vec<String> = ALLOWED_REGISTRIES.iter().map(|r| r.to_string()).collect();

  BTreeMap::from([
    (
      TRUST_OFFICIAL.to_string(),
      TrustLevel {
        allow_privileged: true,
        allow_host_network: true,
        allowed_capabilities: vec![WILDCARD.to_string()],
        allowed_registries: vec![WILDCARD.to_string()],
      },
    ),
    (
      TRUST_VERIFIED.to_string(),
      TrustLevel {
        allow_privileged: false,
        allow_host_network: true,
        allowed_capabilities: ["NET_ADMIN", "NET_RAW", "CHOWN", "SETUID", "SETGID"]
          .iter()
          .map(|c| c.to_string())
          .collect(),
        allowed_registries: registries.clone(),
      },
    ),
    (
      TRUST_COMMUNITY.to_string(),
      TrustLevel {
        allow_privileged: false,
        allow_host_network: false,
        allowed_capabilities: Vec::new(),
        allowed_registries: registries,
      },
    ),
  ])
}

/// Name of the trust level that applies to a source.
pub fn trust_level_name(source_type: &str, verified: bool) -> &'static str {
  if source_type == "embedded" {
    TRUST_OFFICIAL
  } else if verified {
    TRUST_VERIFIED
  } else {
    TRUST_COMMUNITY
  }
}

fn allows(list: &[String], value: &str) -> bool {
  list.iter().any(|entry| entry == WILDCARD || entry == value)
}

/// Validate a definition, then add errors for anything the trust level forbids.
///
/// Base findings are always kept.
pub fn validate_with_trust_level(def: &ServiceDefinition, trust: &TrustLevel) -> Vec<ValidationError> {
  let mut findings = validate(def);
  let container = &def.spec.container;

  if container.privileged && !trust.allow_privileged {
    findings.push(ValidationError::error(
      "spec.container.privileged",
      "trust level does not allow privileged containers",
    ));
  }

  if uses_host_network(def) && !trust.allow_host_network {
    findings.push(ValidationError::error(
      "spec.networking.mode",
      "trust level does not allow host networking",
    ));
  }

  for cap in &container.capabilities.add {
    if !allows(&trust.allowed_capabilities, cap) {
      findings.push(ValidationError::error(
        "spec.container.capabilities.add",
        format!("trust level does not allow capability {cap}"),
      ));
    }
  }

  let registry = effective_registry(def);
  if !allows(&trust.allowed_registries, registry) {
    findings.push(ValidationError::error(
      "spec.image.registry",
      format!("trust level does not allow registry '{registry}'"),
    ));
  }

  findings
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::validate::tests::valid_service;
  use crate::validate::{Severity, has_errors};

  fn level(name: &str) -> TrustLevel {
    builtin_trust_levels().remove(name).unwrap()
  }

  fn privileged_errors(findings: &[ValidationError]) -> usize {
    findings
      .iter()
      .filter(|f| f.field == "spec.container.privileged" && f.severity == Severity::Error)
      .count()
  }

  #[test]
  fn privileged_always_errors_even_when_allowed() {
    let mut def = valid_service();
    def.spec.container.privileged = true;

    let findings = validate_with_trust_level(&def, &level(TRUST_OFFICIAL));
    assert_eq!(findings.len(), 1);
    assert_eq!(privileged_errors(&findings), 1);
  }

  #[test]
  fn disallowed_privileged_adds_second_error() {
    let mut def = valid_service();
    def.spec.container.privileged = true;

    let findings = validate_with_trust_level(&def, &level(TRUST_COMMUNITY));
    assert_eq!(privileged_errors(&findings), 2);
  }

  #[test]
  fn host_network_depends_on_level() {
    let mut def = valid_service();
    def.spec.networking.mode = "host".to_string();

    assert!(!has_errors(&validate_with_trust_level(&def, &level(TRUST_VERIFIED))));
    assert!(has_errors(&validate_with_trust_level(&def, &level(TRUST_COMMUNITY))));
  }

  #[test]
  fn capabilities_checked_against_allow_list() {
    let mut def = valid_service();
    def.spec.container.capabilities.add = vec!["NET_ADMIN".to_string()];

    assert!(!has_errors(&validate_with_trust_level(&def, &level(TRUST_VERIFIED))));
    assert!(!has_errors(&validate_with_trust_level(&def, &level(TRUST_OFFICIAL))));

    let findings = validate_with_trust_level(&def, &level(TRUST_COMMUNITY));
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].field, "spec.container.capabilities.add");
  }

  #[test]
  fn registry_defaults_to_docker_hub_before_check() {
    let mut def = valid_service();
    def.spec.image.registry = String::new();
    let trust = TrustLevel {
      allowed_registries: vec!["docker.io".to_string()],
      ..Default::default()
    };
    assert!(validate_with_trust_level(&def, &trust).is_empty());

    def.spec.image.registry = "registry.example.com".to_string();
    let findings = validate_with_trust_level(&def, &trust);
    assert!(has_errors(&findings));
    assert_eq!(findings.len(), 2);
  }

  #[test]
  fn maps_sources_to_levels() {
    assert_eq!(trust_level_name("embedded", false), TRUST_OFFICIAL);
    assert_eq!(trust_level_name("git", true), TRUST_VERIFIED);
    assert_eq!(trust_level_name("local", false), TRUST_COMMUNITY);
  }
}
