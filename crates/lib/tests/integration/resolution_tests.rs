//! End-to-end resolution across local and embedded sources.

use stackr_lib::config::StackConfig;
use stackr_lib::registry::Registry;
use tempfile::TempDir;

use super::common::{addon_requiring, local, write_override, write_service};

#[tokio::test]
async fn priority_decides_winning_definition() {
  let low = TempDir::new().unwrap();
  let high = TempDir::new().unwrap();
  write_service(low.path(), "addons/sonarr", "3.0.0", &addon_requiring(&["traefik"]));
  write_service(high.path(), "sonarr", "4.0.0", &addon_requiring(&["traefik"]));

  for providers in [
    vec![local("low", low.path(), 10), local("high", high.path(), 90)],
    vec![local("high", high.path(), 90), local("low", low.path(), 10)],
  ] {
    let registry = Registry::with_providers(providers);
    let def = registry.get_service("sonarr").await.unwrap();
    assert_eq!(def.metadata.version, "4.0.0");
  }
}

#[tokio::test]
async fn override_precedence_follows_priority() {
  let roots: Vec<TempDir> = (0..3).map(|_| TempDir::new().unwrap()).collect();
  for root in &roots {
    write_service(root.path(), "core/sonarr", "4.0.0", "");
  }
  let dir = |i: usize| roots[i].path().join("core/sonarr");

  write_override(
    &dir(0),
    "sonarr",
    "spec:\n  image:\n    registry: lscr.io\n    tag: p10\nrouting:\n  subdomain: p10\n  path: /p10\n",
  );
  write_override(&dir(1), "sonarr", "spec:\n  image:\n    tag: p50\nrouting:\n  subdomain: p50\n");
  write_override(&dir(2), "sonarr", "routing:\n  subdomain: p90\n");

  let registry = Registry::with_providers(vec![
    local("p90", roots[2].path(), 90),
    local("p10", roots[0].path(), 10),
    local("p50", roots[1].path(), 50),
  ]);
  let graph = registry.resolve(&StackConfig::default()).await;
  let merged = &graph.get("sonarr").unwrap().merged;

  assert_eq!(merged.routing.subdomain, "p90");
  assert_eq!(merged.spec.image.tag, "p50");
  assert_eq!(merged.spec.image.registry, "lscr.io");
  assert_eq!(merged.routing.path, "/p10");
  assert_eq!(merged.spec.image.repository, "example/sonarr");
}

#[tokio::test]
async fn cycle_is_reported_not_ordered() {
  let temp = TempDir::new().unwrap();
  write_service(temp.path(), "core/a", "1", "  dependencies:\n    required: [b]\n");
  write_service(temp.path(), "core/b", "1", "  dependencies:\n    required: [a]\n");
  let registry = Registry::with_providers(vec![local("mine", temp.path(), 10)]);

  let graph = registry.resolve(&StackConfig::default()).await;
  assert!(graph.order.len() < graph.services.len());
  assert!(graph.order.is_empty());
  assert!(graph.errors.iter().any(|e| e.message.contains("cycle")));
}

#[tokio::test]
async fn resolution_is_idempotent() {
  let temp = TempDir::new().unwrap();
  write_service(temp.path(), "addons/sonarr", "4", &addon_requiring(&["traefik", "prowlarr"]));
  write_service(temp.path(), "addons/prowlarr", "1", &addon_requiring(&["traefik"]));
  write_service(temp.path(), "core/homepage", "0.9", "");
  let registry = Registry::with_providers(vec![local("mine", temp.path(), 10)]);
  let config = StackConfig::default().with_addon("sonarr");

  let first = registry.resolve(&config).await;
  let second = registry.resolve(&config).await;

  assert_eq!(first.order, second.order);
  let hashes = |g: &stackr_lib::resolve::ResolutionGraph| {
    g.services
      .iter()
      .map(|(name, s)| (name.clone(), s.definition_hash.clone()))
      .collect::<Vec<_>>()
  };
  assert_eq!(hashes(&first), hashes(&second));
}

#[tokio::test]
async fn broken_service_does_not_block_others() {
  let temp = TempDir::new().unwrap();
  write_service(temp.path(), "core/homepage", "0.9", "");
  write_service(temp.path(), "core/bazarr", "1", "  dependencies:\n    required: [missing]\n");
  let registry = Registry::with_providers(vec![local("mine", temp.path(), 10)]);

  let graph = registry.resolve(&StackConfig::default()).await;
  assert_eq!(graph.errors.len(), 1);
  assert_eq!(graph.errors[0].service, "bazarr");
  for name in ["bazarr", "homepage", "traefik"] {
    assert!(graph.order.iter().any(|n| n == name), "{name} missing from order");
  }
}
