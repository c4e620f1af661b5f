//! Shallow git checkouts as definition sources.
//!
//! The checkout lives at the path the [`Cache`] assigns to the source name. It
//! is cloned on first use and pulled again once the cache TTL has elapsed.
//! Every git invocation is a child process that is killed if the future
//! driving it is dropped.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{SourceError, SourceMeta, SourceProvider, find_service_dir, list_root, load_from_root, load_root};
use crate::cache::Cache;
use crate::loader::ServiceDefinition;

const DEFAULT_BRANCH: &str = "main";

/// Source backed by a remote git repository.
#[derive(Debug)]
pub struct GitSource {
  meta: SourceMeta,
  url: String,
  branch: String,
  sub_path: Option<PathBuf>,
  ssh_key: Option<PathBuf>,
  timeout: Option<Duration>,
  program: PathBuf,
  cache: Arc<Cache>,
}

impl GitSource {
  pub fn new(meta: SourceMeta, url: impl Into<String>, branch: Option<&str>, cache: Arc<Cache>) -> Self {
    Self {
      meta,
      url: url.into(),
      branch: branch.unwrap_or(DEFAULT_BRANCH).to_string(),
      sub_path: None,
      ssh_key: None,
      timeout: None,
      program: PathBuf::from("git"),
      cache,
    }
  }

  /// Look for services under this directory of the repository.
  pub fn with_sub_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.sub_path = Some(path.into());
    self
  }

  /// Authenticate with this SSH private key.
  ///
  /// Host-key checking is disabled for connections made with the key.
  pub fn with_ssh_key(mut self, key: impl Into<PathBuf>) -> Self {
    self.ssh_key = Some(key.into());
    self
  }

  /// Abort any single git command that runs longer than `timeout`.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  /// Run this executable instead of `git` from `PATH`.
  pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
    self.program = program.into();
    self
  }

  /// Local checkout directory.
  pub fn repo_path(&self) -> PathBuf {
    self.cache.repo_path(&self.meta.name)
  }

  /// Directory services are looked up in.
  fn services_root(&self) -> PathBuf {
    let repo = self.repo_path();
    match &self.sub_path {
      Some(sub) => repo.join(sub),
      None => repo,
    }
  }

  fn is_cloned(&self) -> bool {
    self.repo_path().join(".git").exists()
  }

  /// Clone if absent, pull if the cache says the checkout is stale, then
  /// record the checked out commit.
  async fn ensure_cloned(&self) -> Result<(), SourceError> {
    if !self.is_cloned() {
      self.clone_repo().await?;
    } else if self.cache.needs_update(&self.meta.name) {
      self.pull().await?;
    }
    self.refresh_commit().await
  }

  async fn clone_repo(&self) -> Result<(), SourceError> {
    let repo = self.repo_path();
    if repo.exists() {
      // Leftover from an interrupted clone.
      fs::remove_dir_all(&repo).map_err(|source| SourceError::Io {
        path: repo.clone(),
        source,
      })?;
    }
    if let Some(parent) = repo.parent() {
      fs::create_dir_all(parent).map_err(|source| SourceError::Io {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    info!(source = %self.meta.name, url = %self.url, branch = %self.branch, "cloning source");
    let target = repo.to_string_lossy().into_owned();
    self
      .git(
        "clone",
        None,
        &[
          "clone",
          "--depth",
          "1",
          "--single-branch",
          "--branch",
          &self.branch,
          &self.url,
          &target,
        ],
      )
      .await?;

    self.cache.mark_updated(&self.meta.name)?;
    self
      .cache
      .set_source_info(&self.meta.name, &self.url, Some(&self.branch))?;
    Ok(())
  }

  async fn pull(&self) -> Result<(), SourceError> {
    let repo = self.repo_path();
    info!(source = %self.meta.name, url = %self.url, "pulling source");
    self
      .git("fetch", Some(&repo), &["fetch", "--depth", "1", "origin", &self.branch])
      .await?;
    self
      .git("reset", Some(&repo), &["reset", "--hard", "FETCH_HEAD"])
      .await?;
    self.cache.mark_updated(&self.meta.name)?;
    Ok(())
  }

  async fn refresh_commit(&self) -> Result<(), SourceError> {
    let repo = self.repo_path();
    let commit = self.git("rev-parse", Some(&repo), &["rev-parse", "HEAD"]).await?;
    debug!(source = %self.meta.name, commit = %commit, "recorded commit");
    self.cache.set_commit(&self.meta.name, &commit)?;
    Ok(())
  }

  /// Run one git command and return its trimmed stdout.
  async fn git(&self, op: &'static str, cwd: Option<&Path>, args: &[&str]) -> Result<String, SourceError> {
    let mut command = Command::new(&self.program);
    command
      .args(args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .env("GIT_TERMINAL_PROMPT", "0")
      .kill_on_drop(true);
    if let Some(cwd) = cwd {
      command.current_dir(cwd);
    }
    if let Some(key) = &self.ssh_key {
      warn!(source = %self.meta.name, "SSH host key verification is disabled for this source");
      command.env(
        "GIT_SSH_COMMAND",
        format!(
          "ssh -i {} -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null",
          key.display()
        ),
      );
    }

    debug!(op, args = ?args, "running git");
    let output = match self.timeout {
      Some(timeout) => tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| SourceError::Timeout {
          op,
          url: self.url.clone(),
          timeout,
        })?,
      None => command.output().await,
    }
    .map_err(|e| SourceError::Git {
      op,
      url: self.url.clone(),
      message: e.to_string(),
    })?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
      return Err(SourceError::Git {
        op,
        url: self.url.clone(),
        message: if stderr.is_empty() {
          format!("exited with {}", output.status)
        } else {
          stderr
        },
      });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }
}

#[async_trait]
impl SourceProvider for GitSource {
  fn meta(&self) -> &SourceMeta {
    &self.meta
  }

  async fn load(&self) -> Result<Vec<ServiceDefinition>, SourceError> {
    self.ensure_cloned().await?;
    load_root(&self.meta.name, &self.services_root())
  }

  async fn load_service(&self, name: &str) -> Result<ServiceDefinition, SourceError> {
    self.ensure_cloned().await?;
    load_from_root(&self.meta.name, &self.services_root(), name)
  }

  async fn list_services(&self) -> Result<Vec<String>, SourceError> {
    self.ensure_cloned().await?;
    list_root(&self.services_root())
  }

  fn service_path(&self, name: &str) -> Option<PathBuf> {
    find_service_dir(&self.services_root(), name)
  }

  /// Pull regardless of TTL, cloning first if needed.
  async fn update(&self) -> Result<(), SourceError> {
    if self.is_cloned() {
      self.pull().await?;
    } else {
      self.clone_repo().await?;
    }
    self.refresh_commit().await
  }

  fn commit(&self) -> Option<String> {
    self.cache.commit(&self.meta.name)
  }

  fn url(&self) -> Option<&str> {
    Some(&self.url)
  }

  fn branch(&self) -> Option<&str> {
    Some(&self.branch)
  }

  fn last_updated(&self) -> Option<DateTime<Utc>> {
    self.cache.last_updated(&self.meta.name)
  }
}


#[cfg(test)]
mod tests {
  use super::testutil::*;
  use super::*;
  use crate::sources::SourceKind;
  use crate::sources::testutil::write_service;
  use tempfile::TempDir;

  fn cache(temp: &TempDir, ttl: Duration) -> Arc<Cache> {
    Arc::new(Cache::new(temp.path().join("cache"), ttl).unwrap())
  }

  fn source(url: &str, cache: Arc<Cache>) -> GitSource {
    GitSource::new(SourceMeta::new("remote", SourceKind::Git, 0), url, Some("main"), cache)
  }

  #[tokio::test]
  async fn clones_on_first_use() {
    if !git_available() {
      return;
    }
    let temp = TempDir::new().unwrap();
    let origin = temp.path().join("origin");
    write_service(&origin, "addons/sonarr", "4", "");
    init_repo(&origin);

    let cache = cache(&temp, Duration::from_secs(3600));
    let git = source(&file_url(&origin), cache.clone());

    assert_eq!(git.list_services().await.unwrap(), ["sonarr"]);
    assert!(git.repo_path().join(".git").exists());
    assert_eq!(git.commit().unwrap().len(), 40);
    assert!(!cache.needs_update("remote"));
    assert_eq!(cache.metadata("remote").unwrap().branch.as_deref(), Some("main"));
    assert!(git.service_path("sonarr").is_some());
  }

  #[tokio::test]
  async fn pulls_only_after_ttl() {
    if !git_available() {
      return;
    }
    let temp = TempDir::new().unwrap();
    let origin = temp.path().join("origin");
    write_service(&origin, "addons/sonarr", "4", "");
    init_repo(&origin);

    let cache = cache(&temp, Duration::from_secs(3600));
    let git = source(&file_url(&origin), cache.clone());
    assert_eq!(git.load_service("sonarr").await.unwrap().metadata.version, "4");

    write_service(&origin, "addons/sonarr", "5", "");
    commit_all(&origin, "bump");

    // Fresh cache: the checkout is reused.
    assert_eq!(git.load_service("sonarr").await.unwrap().metadata.version, "4");

    cache.force_expire("remote").unwrap();
    assert_eq!(git.load_service("sonarr").await.unwrap().metadata.version, "5");
  }

  #[tokio::test]
  async fn update_ignores_ttl() {
    if !git_available() {
      return;
    }
    let temp = TempDir::new().unwrap();
    let origin = temp.path().join("origin");
    write_service(&origin, "core/traefik", "3", "");
    init_repo(&origin);

    let git = source(&file_url(&origin), cache(&temp, Duration::from_secs(3600)));
    git.update().await.unwrap();
    let before = git.commit().unwrap();

    write_service(&origin, "core/traefik", "3.1", "");
    commit_all(&origin, "bump");
    git.update().await.unwrap();

    assert_ne!(git.commit().unwrap(), before);
    assert_eq!(git.load_service("traefik").await.unwrap().metadata.version, "3.1");
  }

  #[tokio::test]
  async fn sub_path_scopes_lookup() {
    if !git_available() {
      return;
    }
    let temp = TempDir::new().unwrap();
    let origin = temp.path().join("origin");
    write_service(&origin, "catalog/core/traefik", "3", "");
    write_service(&origin, "other/core/radarr", "5", "");
    init_repo(&origin);

    let git = source(&file_url(&origin), cache(&temp, Duration::from_secs(3600))).with_sub_path("catalog");
    assert_eq!(git.list_services().await.unwrap(), ["traefik"]);
    assert!(git.load_service("radarr").await.unwrap_err().is_not_found());
  }

  #[tokio::test]
  async fn unreachable_remote_is_git_error() {
    if !git_available() {
      return;
    }
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("does-not-exist");
    let git = source(&file_url(&missing), cache(&temp, Duration::from_secs(3600)));

    let err = git.list_services().await.unwrap_err();
    assert!(matches!(err, SourceError::Git { op: "clone", .. }));
  }

  #[tokio::test]
  async fn fresh_checkout_still_records_head() {
    if !git_available() {
      return;
    }
    let temp = TempDir::new().unwrap();
    let origin = temp.path().join("origin");
    write_service(&origin, "core/traefik", "3", "");
    init_repo(&origin);

    let cache = cache(&temp, Duration::from_secs(3600));
    let git = source(&file_url(&origin), cache.clone());
    git.list_services().await.unwrap();
    let cloned = git.commit().unwrap();

    write_service(&git.repo_path(), "core/traefik", "3.2", "");
    commit_all(&git.repo_path(), "local edit");
    assert!(!cache.needs_update("remote"));

    git.load_service("traefik").await.unwrap();
    let head = git.commit().unwrap();
    assert_ne!(head, cloned);
    assert_eq!(head.len(), 40);
  }

  #[cfg(unix)]
  mod cancellation {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// A `git` stand-in that leaves a partial checkout behind, hangs, and
    /// touches `marker` if it is ever allowed to finish.
    fn hanging_git(dir: &Path, marker: &Path) -> PathBuf {
      let script = dir.join("slow-git");
      fs::write(
        &script,
        format!(
          "#!/bin/sh\nfor last; do :; done\nmkdir -p \"$last/partial\"\nsleep 2\ntouch '{}'\n",
          marker.display()
        ),
      )
      .unwrap();
      fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
      script
    }

    #[tokio::test]
    async fn timeout_kills_git_and_next_run_recovers() {
      let temp = TempDir::new().unwrap();
      let origin = temp.path().join("origin");
      write_service(&origin, "core/traefik", "3", "");
      let marker = temp.path().join("finished");
      let cache = cache(&temp, Duration::from_secs(3600));

      let slow = source(&file_url(&origin), cache.clone())
        .with_program(hanging_git(temp.path(), &marker))
        .with_timeout(Duration::from_millis(500));
      let err = slow.list_services().await.unwrap_err();
      assert!(
        matches!(err, SourceError::Timeout { op: "clone", timeout, .. } if timeout == Duration::from_millis(500)),
        "{err}"
      );
      assert!(slow.repo_path().exists());
      assert!(!slow.repo_path().join(".git").exists());
      assert!(cache.commit("remote").is_none());

      tokio::time::sleep(Duration::from_secs(3)).await;
      assert!(!marker.exists(), "git child outlived its timeout");

      if !git_available() {
        return;
      }
      init_repo(&origin);
      let git = source(&file_url(&origin), cache.clone());
      assert_eq!(git.list_services().await.unwrap(), ["traefik"]);
      assert!(!git.repo_path().join("partial").exists());
    }

    #[tokio::test]
    async fn dropping_the_future_kills_git() {
      let temp = TempDir::new().unwrap();
      let marker = temp.path().join("finished");
      let slow = source(&file_url(&temp.path().join("origin")), cache(&temp, Duration::from_secs(3600)))
        .with_program(hanging_git(temp.path(), &marker));

      let cancelled = tokio::time::timeout(Duration::from_millis(500), slow.update()).await;
      assert!(cancelled.is_err());

      tokio::time::sleep(Duration::from_secs(3)).await;
      assert!(!marker.exists(), "git child outlived the dropped future");
    }
  }
}
