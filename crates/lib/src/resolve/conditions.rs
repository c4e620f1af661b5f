//! Condition strings.
//!
//! Conditions are matched against a fixed vocabulary of template strings, not
//! evaluated. Anything outside the vocabulary is false.

use tracing::{debug, warn};

use crate::config::UserConfig;
use crate::loader::Conditions;

pub const VPN_ENABLED: &str = "{{ .VPN.Enabled }}";
pub const VPN_DISABLED: &str = "{{ not .VPN.Enabled }}";
pub const EXPOSURE_CLOUDFLARE: &str = r#"{{ eq .Exposure.Mode "cloudflare" }}"#;
pub const EXPOSURE_TRAEFIK: &str = r#"{{ eq .Exposure.Mode "traefik" }}"#;
pub const EXPOSURE_DIRECT: &str = r#"{{ eq .Exposure.Mode "direct" }}"#;

/// Evaluate one condition string against the user configuration.
///
/// Leading and trailing whitespace is ignored. An empty condition is not part
/// of the vocabulary and does not hold.
pub fn evaluate_condition<C: UserConfig>(condition: &str, config: &C) -> bool {
  match condition.trim() {
    "" => {
      warn!("empty condition, treating as false");
      false
    }
    VPN_ENABLED => config.vpn_enabled(),
    VPN_DISABLED => !config.vpn_enabled(),
    EXPOSURE_CLOUDFLARE => config.exposure_mode() == "cloudflare",
    EXPOSURE_TRAEFIK => config.exposure_mode() == "traefik",
    EXPOSURE_DIRECT => config.exposure_mode() == "direct",
    other => {
      warn!(condition = other, "unknown condition, treating as false");
      false
    }
  }
}

/// Whether a service with these inclusion conditions is part of the plan.
///
/// `requireAddon` is not checked here: it only decides whether a service is
/// picked up on its own, not whether it may be pulled in as a dependency.
pub fn evaluate_conditions<C: UserConfig>(service: &str, conditions: &Conditions, config: &C) -> bool {
  if conditions.always {
    return true;
  }
  if !conditions.require_config.is_empty() && !evaluate_condition(&conditions.require_config, config) {
    return false;
  }
  if !conditions.require_feature.is_empty() && !config.is_feature_enabled(&conditions.require_feature) {
    debug!(service, feature = %conditions.require_feature, "required feature not enabled");
    return false;
  }
  true
}
