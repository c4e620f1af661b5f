//! The user's stack configuration, as seen by resolution.
//!
//! Resolution only needs a handful of answers from the user configuration,
//! captured by [`UserConfig`]. [`StackConfig`] is the concrete configuration
//! used by the rest of stackr.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// What resolution asks of the user configuration.
///
/// The configuration must be serializable: its serialized form is hashed into
/// the lock file to detect configuration drift.
pub trait UserConfig: Serialize {
  /// Whether the named add-on service was explicitly enabled.
  fn is_addon_enabled(&self, name: &str) -> bool;

  fn vpn_enabled(&self) -> bool;

  /// How services are exposed: `traefik`, `cloudflare` or `direct`.
  fn exposure_mode(&self) -> &str;

  fn is_feature_enabled(&self, _feature: &str) -> bool {
    false
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackConfig {
  #[serde(default)]
  pub container_prefix: String,
  /// Enabled add-on services.
  #[serde(default)]
  pub addons: BTreeSet<String>,
  #[serde(default)]
  pub vpn: VpnConfig,
  #[serde(default)]
  pub exposure: ExposureConfig,
  #[serde(default)]
  pub features: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnConfig {
  #[serde(default)]
  pub enabled: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub provider: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureConfig {
  pub mode: String,
}

impl Default for ExposureConfig {
  fn default() -> Self {
    Self {
      mode: "traefik".to_string(),
    }
  }
}

impl Default for StackConfig {
  fn default() -> Self {
    Self {
      container_prefix: "stackr-".to_string(),
      addons: BTreeSet::new(),
      vpn: VpnConfig::default(),
      exposure: ExposureConfig::default(),
      features: BTreeSet::new(),
    }
  }
}

impl StackConfig {
  pub fn with_addon(mut self, name: &str) -> Self {
    self.addons.insert(name.to_string());
    self
  }

  pub fn with_vpn(mut self, enabled: bool) -> Self {
    self.vpn.enabled = enabled;
    self
  }

  pub fn with_exposure(mut self, mode: &str) -> Self {
    self.exposure.mode = mode.to_string();
    self
  }
}

impl UserConfig for StackConfig {
  fn is_addon_enabled(&self, name: &str) -> bool {
    self.addons.contains(name)
  }

  fn vpn_enabled(&self) -> bool {
    self.vpn.enabled
  }

  fn exposure_mode(&self) -> &str {
    &self.exposure.mode
  }

  fn is_feature_enabled(&self, feature: &str) -> bool {
    self.features.contains(feature)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_sets_answers() {
    let config = StackConfig::default()
      .with_addon("sonarr")
      .with_vpn(true)
      .with_exposure("cloudflare");

    assert!(config.is_addon_enabled("sonarr"));
    assert!(!config.is_addon_enabled("radarr"));
    assert!(config.vpn_enabled());
    assert_eq!(config.exposure_mode(), "cloudflare");
    assert!(!config.is_feature_enabled("gpu"));
  }

  #[test]
  fn deserializes_with_defaults() {
    let config: StackConfig = serde_yaml::from_str("addons: [sonarr]\nvpn:\n  enabled: true\n").unwrap();
    assert!(config.is_addon_enabled("sonarr"));
    assert!(config.vpn_enabled());
    assert_eq!(config.exposure_mode(), "traefik");
  }
}
