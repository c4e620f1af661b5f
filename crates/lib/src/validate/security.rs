use crate::loader::ServiceDefinition;

use super::ValidationError;

/// Linux capabilities that warrant a warning when added.
pub const DANGEROUS_CAPABILITIES: &[&str] = &[
  "SYS_ADMIN",
  "SYS_PTRACE",
  "SYS_MODULE",
  "SYS_RAWIO",
  "SYS_TIME",
  "DAC_READ_SEARCH",
];

/// Image registries considered well known.
pub const ALLOWED_REGISTRIES: &[&str] = &["docker.io", "ghcr.io", "lscr.io", "quay.io", "gcr.io", "registry.k8s.io"];

const FORBIDDEN_DEVICES: &[&str] = &["/dev/mem", "/dev/kmem"];

/// The registry a definition pulls from, with unset meaning `docker.io`.
pub(super) fn effective_registry(def: &ServiceDefinition) -> &str {
  match def.spec.image.registry.as_str() {
    "" => "docker.io",
    registry => registry,
  }
}

pub(super) fn uses_host_network(def: &ServiceDefinition) -> bool {
  def.spec.networking.mode == "host"
}

pub(super) fn validate_security(def: &ServiceDefinition, out: &mut Vec<ValidationError>) {
  let container = &def.spec.container;

  if container.privileged {
    out.push(ValidationError::error(
      "spec.container.privileged",
      "privileged containers are not allowed",
    ));
  }

  for cap in &container.capabilities.add {
    if DANGEROUS_CAPABILITIES.contains(&cap.as_str()) {
      out.push(ValidationError::warning(
        "spec.container.capabilities.add",
        format!("capability {cap} grants broad access to the host"),
      ));
    }
  }

  if uses_host_network(def) {
    out.push(ValidationError::warning(
      "spec.networking.mode",
      "host networking bypasses container network isolation",
    ));
  }

  let registry = effective_registry(def);
  if !ALLOWED_REGISTRIES.contains(&registry) {
    out.push(ValidationError::warning(
      "spec.image.registry",
      format!("registry '{registry}' is not a well-known registry"),
    ));
  }

  for (i, device) in container.devices.iter().enumerate() {
    if device.split(':').any(|part| FORBIDDEN_DEVICES.contains(&part)) {
      out.push(ValidationError::error(
        format!("spec.container.devices[{i}]"),
        format!("device mapping '{device}' exposes kernel memory"),
      ));
    }
  }
}
