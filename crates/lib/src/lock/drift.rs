use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::LockFile;

/// What a drift entry is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftTarget {
  Config,
  Source,
  Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftStatus {
  /// The locked item no longer exists.
  Missing,
  /// The locked item exists with a different value.
  Changed,
}

/// One difference between a lock file and the current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Drift {
  pub target: DriftTarget,
  pub name: String,
  /// Field that differs, for `Changed` entries.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub field: Option<&'static str>,
  pub status: DriftStatus,
  pub locked: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub current: Option<String>,
}

impl Drift {
  pub fn missing(target: DriftTarget, name: &str, locked: impl Into<String>) -> Self {
    Self {
      target,
      name: name.to_string(),
      field: None,
      status: DriftStatus::Missing,
      locked: locked.into(),
      current: None,
    }
  }

  pub fn changed(
    target: DriftTarget,
    name: &str,
    field: &'static str,
    locked: impl Into<String>,
    current: impl Into<String>,
  ) -> Self {
    Self {
      target,
      name: name.to_string(),
      field: Some(field),
      status: DriftStatus::Changed,
      locked: locked.into(),
      current: Some(current.into()),
    }
  }
}

impl fmt::Display for Drift {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let target = match self.target {
      DriftTarget::Config => "config",
      DriftTarget::Source => "source",
      DriftTarget::Service => "service",
    };
    match (&self.field, &self.current) {
      (Some(field), Some(current)) => write!(
        f,
        "{target} '{}': {field} changed from '{}' to '{current}'",
        self.name, self.locked
      ),
      _ => write!(f, "{target} '{}' is missing", self.name),
    }
  }
}

/// Outcome of verifying a lock file against the current state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyResult {
  pub drifts: Vec<Drift>,
}

impl VerifyResult {
  pub fn is_clean(&self) -> bool {
    self.drifts.is_empty()
  }

  pub fn config_changed(&self) -> bool {
    self.drifts.iter().any(|d| d.target == DriftTarget::Config)
  }

  pub fn missing(&self) -> impl Iterator<Item = &Drift> {
    self.drifts.iter().filter(|d| d.status == DriftStatus::Missing)
  }

  pub fn changed(&self) -> impl Iterator<Item = &Drift> {
    self.drifts.iter().filter(|d| d.status == DriftStatus::Changed)
  }

  pub fn for_target(&self, target: DriftTarget) -> impl Iterator<Item = &Drift> {
    self.drifts.iter().filter(move |d| d.target == target)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
  Added,
  Removed,
  Modified,
}

/// One keyed difference between two lock files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
  pub kind: ChangeKind,
  pub old: Option<String>,
  pub new: Option<String>,
}

/// Differences between two lock files.
///
/// Sources are compared by commit, services by definition version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LockDiff {
  pub sources: BTreeMap<String, Change>,
  pub services: BTreeMap<String, Change>,
}

impl LockDiff {
  pub fn has_changes(&self) -> bool {
    !self.sources.is_empty() || !self.services.is_empty()
  }
}

fn diff_maps<T>(old: &BTreeMap<String, T>, new: &BTreeMap<String, T>, key: impl Fn(&T) -> &str) -> BTreeMap<String, Change> {
  let mut changes = BTreeMap::new();

  for (name, old_entry) in old {
    match new.get(name) {
      None => {
        changes.insert(
          name.clone(),
          Change {
            kind: ChangeKind::Removed,
            old: Some(key(old_entry).to_string()),
            new: None,
          },
        );
      }
      Some(new_entry) if key(new_entry) != key(old_entry) => {
        changes.insert(
          name.clone(),
          Change {
            kind: ChangeKind::Modified,
            old: Some(key(old_entry).to_string()),
            new: Some(key(new_entry).to_string()),
          },
        );
      }
      Some(_) => {}
    }
  }

  for (name, new_entry) in new {
    if !old.contains_key(name) {
      changes.insert(
        name.clone(),
        Change {
          kind: ChangeKind::Added,
          old: None,
          new: Some(key(new_entry).to_string()),
        },
      );
    }
  }

  changes
}

/// Compare two lock files.
pub fn diff_lock_files(old: &LockFile, new: &LockFile) -> LockDiff {
  LockDiff {
    sources: diff_maps(&old.sources, &new.sources, |s| s.commit.as_str()),
    services: diff_maps(&old.services, &new.services, |s| s.definition_version.as_str()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lock::tests::sample;

  #[test]
  fn lock_against_itself_has_no_changes() {
    let lock = sample();
    assert!(!diff_lock_files(&lock, &lock).has_changes());
  }

  #[test]
  fn detects_added_removed_and_modified() {
    let old = sample();
    let mut new = sample();
    new.sources.get_mut("community").unwrap().commit = "def456".to_string();
    let sonarr = new.services.remove("sonarr").unwrap();
    new.services.insert(
      "radarr".to_string(),
      crate::lock::LockedService {
        definition_version: "5.0.0".to_string(),
        ..sonarr
      },
    );

    let diff = diff_lock_files(&old, &new);
    assert!(diff.has_changes());
    assert_eq!(
      diff.sources["community"],
      Change {
        kind: ChangeKind::Modified,
        old: Some("abc123".to_string()),
        new: Some("def456".to_string()),
      }
    );
    assert_eq!(diff.services["sonarr"].kind, ChangeKind::Removed);
    assert_eq!(diff.services["radarr"].kind, ChangeKind::Added);
    assert_eq!(diff.services["radarr"].new.as_deref(), Some("5.0.0"));
  }

  #[test]
  fn ignores_fields_outside_comparison() {
    let old = sample();
    let mut new = sample();
    new.services.get_mut("sonarr").unwrap().image.tag = "develop".to_string();
    new.metadata.config_hash = "sha256:other".to_string();
    assert!(!diff_lock_files(&old, &new).has_changes());
  }

  #[test]
  fn drift_display() {
    let changed = Drift::changed(DriftTarget::Service, "sonarr", "image.tag", "4.0.0", "develop");
    assert_eq!(
      changed.to_string(),
      "service 'sonarr': image.tag changed from '4.0.0' to 'develop'"
    );
    let missing = Drift::missing(DriftTarget::Source, "community", "abc123");
    assert_eq!(missing.to_string(), "source 'community' is missing");
  }
}
