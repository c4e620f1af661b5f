use super::types::ServiceDefinition;

pub const DEFAULT_RESTART: &str = "unless-stopped";
pub const DEFAULT_REGISTRY: &str = "docker.io";
pub const DEFAULT_TAG: &str = "latest";
pub const DEFAULT_NETWORK_MODE: &str = "bridge";
pub const DEFAULT_PATH_REWRITE: &str = "stripPrefix";

/// Container name template for a service without an explicit one.
pub fn default_container_name(service: &str) -> String {
  format!("{{{{ .ContainerPrefix }}}}{service}")
}

/// Fill unset fields of a definition with their defaults.
///
/// Only empty fields are touched, so applying defaults twice is a no-op.
pub fn apply_defaults(def: &mut ServiceDefinition) {
  let name = def.metadata.name.clone();
  let container = &mut def.spec.container;
  if container.restart.is_empty() {
    container.restart = DEFAULT_RESTART.to_string();
  }
  if container.name.is_empty() {
    container.name = default_container_name(&name);
  }

  let image = &mut def.spec.image;
  if image.registry.is_empty() {
    image.registry = DEFAULT_REGISTRY.to_string();
  }
  if image.tag.is_empty() {
    image.tag = DEFAULT_TAG.to_string();
  }

  let networking = &mut def.spec.networking;
  if networking.mode.is_empty() && networking.mode_template.is_empty() {
    networking.mode = DEFAULT_NETWORK_MODE.to_string();
  }

  let routing = &mut def.routing;
  if routing.enabled {
    if routing.subdomain.is_empty() {
      routing.subdomain = name.clone();
    }
    if routing.path.is_empty() {
      routing.path = format!("/{name}");
    }
    if routing.path_rewrite.is_empty() {
      routing.path_rewrite = DEFAULT_PATH_REWRITE.to_string();
    }
  }

  def.integrations.update_notifier.enabled.get_or_insert(true);
}
