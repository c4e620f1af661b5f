//! Shared helpers for registry integration tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use stackr_lib::cache::Cache;
use stackr_lib::sources::{LocalSource, SourceKind, SourceMeta, SourceProvider};
use tempfile::TempDir;

/// Write a definition at `<root>/<rel>/service.yaml`.
///
/// `extra` is appended verbatim; lines indented by two spaces land under `spec`.
pub fn write_service(root: &Path, rel: &str, version: &str, extra: &str) -> PathBuf {
  let name = Path::new(rel).file_name().unwrap().to_string_lossy().into_owned();
  let dir = root.join(rel);
  fs::create_dir_all(&dir).unwrap();
  let content = format!(
    r#"apiVersion: stackr.dev/v1
kind: Service
metadata:
  name: {name}
  version: "{version}"
  category: media
  description: {name} service
spec:
  image:
    repository: example/{name}
{extra}"#
  );
  let path = dir.join("service.yaml");
  fs::write(&path, content).unwrap();
  path
}

/// An add-on that requires the given services.
pub fn addon_requiring(deps: &[&str]) -> String {
  format!(
    "  dependencies:\n    required: [{}]\nconditions:\n  requireAddon: true\n",
    deps.join(", ")
  )
}

pub fn write_override(dir: &Path, name: &str, body: &str) {
  fs::write(
    dir.join("override.yaml"),
    format!("apiVersion: stackr.dev/v1\nkind: ServiceOverride\nmetadata:\n  name: {name}\n{body}"),
  )
  .unwrap();
}

pub fn local(name: &str, root: &Path, priority: i32) -> Arc<dyn SourceProvider> {
  Arc::new(LocalSource::new(SourceMeta::new(name, SourceKind::Local, priority), root))
}

pub fn cache(temp: &TempDir) -> Arc<Cache> {
  Arc::new(Cache::new(temp.path().join("cache"), Duration::from_secs(3600)).unwrap())
}

pub fn git_available() -> bool {
  Command::new("git").arg("--version").output().is_ok_and(|o| o.status.success())
}

fn git(dir: &Path, args: &[&str]) {
  let status = Command::new("git")
    .args(args)
    .current_dir(dir)
    .env("GIT_AUTHOR_NAME", "test")
    .env("GIT_AUTHOR_EMAIL", "test@example.com")
    .env("GIT_COMMITTER_NAME", "test")
    .env("GIT_COMMITTER_EMAIL", "test@example.com")
    .status()
    .unwrap();
  assert!(status.success(), "git {args:?} failed");
}

/// A throwaway repository on branch `main`.
pub struct TestRepo {
  pub dir: PathBuf,
}

impl TestRepo {
  pub fn init(dir: PathBuf) -> Self {
    fs::create_dir_all(&dir).unwrap();
    git(&dir, &["init", "--quiet", "--initial-branch=main"]);
    Self { dir }
  }

  pub fn commit(&self, message: &str) {
    git(&self.dir, &["add", "-A"]);
    git(&self.dir, &["commit", "--quiet", "--allow-empty", "-m", message]);
  }

  pub fn url(&self) -> String {
    format!("file://{}", self.dir.display())
  }
}
