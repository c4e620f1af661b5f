//! Resolution with a git source alongside the bundled and local ones.
//!
//! Skipped when no `git` binary is available.

use std::sync::Arc;
use std::time::Duration;

use stackr_lib::config::StackConfig;
use stackr_lib::lock::LockManager;
use stackr_lib::registry::Registry;
use stackr_lib::sources::{GitSource, SourceKind, SourceMeta, SourceProvider};
use tempfile::TempDir;

use super::common::{TestRepo, addon_requiring, cache, git_available, local, write_service};

/// Embedded traefik, an empty local source at 100 and a git source at 0
/// providing a sonarr add-on.
fn setup(temp: &TempDir) -> (Registry, TestRepo) {
  let repo = TestRepo::init(temp.path().join("remote"));
  write_service(&repo.dir, "addons/sonarr", "4.0.0", &addon_requiring(&["traefik"]));
  repo.commit("add sonarr");

  let local_root = temp.path().join("local");
  std::fs::create_dir_all(&local_root).unwrap();

  let git: Arc<dyn SourceProvider> = Arc::new(
    GitSource::new(
      SourceMeta::new("community", SourceKind::Git, 0),
      repo.url(),
      Some("main"),
      cache(temp),
    )
    .with_timeout(Duration::from_secs(60)),
  );
  let registry = Registry::with_providers(vec![git, local("local", &local_root, 100)]);
  (registry, repo)
}

#[tokio::test]
async fn enabled_addon_from_git_is_ordered_after_its_dependency() {
  if !git_available() {
    return;
  }
  let temp = TempDir::new().unwrap();
  let (registry, _repo) = setup(&temp);

  let graph = registry.resolve(&StackConfig::default().with_addon("sonarr")).await;

  assert!(graph.errors.is_empty(), "{:?}", graph.errors);
  assert_eq!(graph.order, vec!["traefik", "sonarr"]);
  assert!(graph.get("traefik").unwrap().enabled);
  let sonarr = graph.get("sonarr").unwrap();
  assert!(sonarr.enabled);
  assert_eq!(sonarr.source, "community");
}

#[tokio::test]
async fn addon_not_enabled_is_left_out() {
  if !git_available() {
    return;
  }
  let temp = TempDir::new().unwrap();
  let (registry, _repo) = setup(&temp);

  let graph = registry.resolve(&StackConfig::default()).await;

  assert!(graph.errors.is_empty(), "{:?}", graph.errors);
  assert_eq!(graph.order, vec!["traefik"]);
  assert!(graph.get("sonarr").is_none());
}

#[tokio::test]
async fn lock_pins_git_commit_and_detects_new_commits() {
  if !git_available() {
    return;
  }
  let temp = TempDir::new().unwrap();
  let (registry, repo) = setup(&temp);
  let config = StackConfig::default().with_addon("sonarr");
  let manager = LockManager::new(&registry);

  let lock = manager.generate(&config).await.unwrap();
  let pinned = &lock.sources["community"];
  assert_eq!(pinned.url, repo.url());
  assert_eq!(pinned.commit.len(), 40);
  assert_eq!(lock.install_order, vec!["traefik", "sonarr"]);
  assert!(manager.verify(&lock, &config).await.unwrap().is_clean());

  write_service(&repo.dir, "addons/sonarr", "4.1.0", &addon_requiring(&["traefik"]));
  repo.commit("bump sonarr");
  let updated = manager.update(Some(&lock), &config, None).await.unwrap();

  assert_ne!(updated.sources["community"].commit, pinned.commit);
  assert_eq!(updated.services["sonarr"].definition_version, "4.1.0");

  let result = manager.verify(&lock, &config).await.unwrap();
  assert!(!result.is_clean());
  assert_eq!(result.changed().count(), 2);
}
