//! Lock file generation, persistence and comparison.

use stackr_lib::config::StackConfig;
use stackr_lib::lock::{LockFile, LockManager, diff_lock_files};
use stackr_lib::registry::Registry;
use tempfile::TempDir;

use super::common::{addon_requiring, local, write_service};

fn registry(temp: &TempDir) -> Registry {
  write_service(temp.path(), "addons/sonarr", "4.0.0", &addon_requiring(&["traefik"]));
  write_service(temp.path(), "addons/radarr", "5.0.0", &addon_requiring(&["traefik"]));
  Registry::with_providers(vec![local("mine", temp.path(), 10)])
}

#[tokio::test]
async fn lock_survives_save_and_load() {
  let temp = TempDir::new().unwrap();
  let registry = registry(&temp);
  let manager = LockManager::new(&registry);
  let config = StackConfig::default().with_addon("sonarr");

  let mut lock = manager.generate(&config).await.unwrap();
  lock.record_generated_file("docker-compose.yml", "sha256:abc");
  let path = LockFile::default_path(temp.path());
  lock.save(&path).unwrap();

  let loaded = LockFile::load(&path).unwrap().unwrap();
  assert_eq!(loaded, lock);
  assert!(!diff_lock_files(&lock, &loaded).has_changes());
}

#[tokio::test]
async fn missing_lock_file_loads_as_none() {
  let temp = TempDir::new().unwrap();
  assert!(LockFile::load(&LockFile::default_path(temp.path())).unwrap().is_none());
}

#[tokio::test]
async fn unchanged_configuration_has_no_diff() {
  let temp = TempDir::new().unwrap();
  let registry = registry(&temp);
  let manager = LockManager::new(&registry);
  let config = StackConfig::default().with_addon("sonarr");

  let lock = manager.generate(&config).await.unwrap();
  assert!(!manager.diff(&lock, &config).await.unwrap().has_changes());
  assert!(manager.verify(&lock, &config).await.unwrap().is_clean());
}

#[tokio::test]
async fn enabling_an_addon_shows_in_diff_and_verify() {
  let temp = TempDir::new().unwrap();
  let registry = registry(&temp);
  let manager = LockManager::new(&registry);

  let lock = manager.generate(&StackConfig::default().with_addon("sonarr")).await.unwrap();
  let config = StackConfig::default().with_addon("sonarr").with_addon("radarr");

  let diff = manager.diff(&lock, &config).await.unwrap();
  assert!(diff.has_changes());

  let result = manager.verify(&lock, &config).await.unwrap();
  assert!(result.config_changed());
}

#[tokio::test]
async fn cycle_cannot_be_locked() {
  let temp = TempDir::new().unwrap();
  write_service(temp.path(), "core/a", "1", "  dependencies:\n    required: [b]\n");
  write_service(temp.path(), "core/b", "1", "  dependencies:\n    required: [a]\n");
  let registry = Registry::with_providers(vec![local("mine", temp.path(), 10)]);

  let result = LockManager::new(&registry).generate(&StackConfig::default()).await;
  assert!(result.is_err());
}
