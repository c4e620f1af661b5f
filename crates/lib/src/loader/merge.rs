use super::types::{ServiceDefinition, ServiceOverride};

/// Apply an override on top of a base definition, returning the merged copy.
///
/// - non-empty image fields replace the base's
/// - static environment variables and volumes are appended
/// - routing subdomain/path replace the base's when set
///
/// The base is never modified.
pub fn merge_override(base: &ServiceDefinition, patch: &ServiceOverride) -> ServiceDefinition {
  let mut merged = base.clone();

  if let Some(spec) = &patch.spec {
    if let Some(image) = &spec.image {
      let target = &mut merged.spec.image;
      replace_if_set(&mut target.registry, &image.registry);
      replace_if_set(&mut target.repository, &image.repository);
      replace_if_set(&mut target.tag, &image.tag);
      if image.digest.is_some() {
        target.digest.clone_from(&image.digest);
      }
    }
    if let Some(environment) = &spec.environment {
      merged
        .spec
        .environment
        .static_vars
        .extend(environment.static_vars.iter().cloned());
    }
    merged.spec.volumes.extend(spec.volumes.iter().cloned());
  }

  if let Some(routing) = &patch.routing {
    if let Some(subdomain) = &routing.subdomain {
      merged.routing.subdomain.clone_from(subdomain);
    }
    if let Some(path) = &routing.path {
      merged.routing.path.clone_from(path);
    }
  }

  merged
}

fn replace_if_set(target: &mut String, value: &str) {
  if !value.is_empty() {
    *target = value.to_string();
  }
}
