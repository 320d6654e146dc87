use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::config::Config;
use crate::error::DeployResult;
use crate::release::ReleaseId;

/// Per-domain directory tree:
///
/// ```text
/// <base_dir>/<domain>/
///     releases/<timestamp>/
///     shared/<item>
///     backups/
///     logs/
///     current -> releases/<timestamp>/<served dir>
///     .deploy.lock
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn for_config(config: &Config) -> Self {
        Self::new(config.domain_root())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn releases_dir(&self) -> PathBuf {
        self.root.join("releases")
    }

    #[must_use]
    pub fn shared_dir(&self) -> PathBuf {
        self.root.join("shared")
    }

    #[must_use]
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    #[must_use]
    pub fn current(&self) -> PathBuf {
        self.root.join("current")
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".deploy.lock")
    }

    #[must_use]
    pub fn release_path(&self, id: &ReleaseId) -> PathBuf {
        self.releases_dir().join(id.as_str())
    }

    /// Create the skeleton directories. Idempotent.
    pub fn ensure_skeleton(&self) -> DeployResult<()> {
        for dir in [
            self.releases_dir(),
            self.shared_dir(),
            self.backups_dir(),
            self.logs_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        if let Some(parent) = self.current().parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Release directories on disk, newest first. Entries whose
    /// name is not a release timestamp are ignored.
    pub fn list_releases(&self) -> DeployResult<Vec<ReleaseId>> {
        let entries = match fs::read_dir(self.releases_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids: Vec<ReleaseId> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|e| ReleaseId::parse(&e.file_name().to_string_lossy()))
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    /// Release the `current` pointer resolves into, if any.
    pub fn active_release(&self) -> DeployResult<Option<ReleaseId>> {
        let target = match fs::read_link(self.current()) {
            Ok(target) => target,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == ErrorKind::InvalidInput => {
                tracing::warn!(
                    path = %self.current().display(),
                    "current exists but is not a symlink"
                );
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let target = if target.is_absolute() {
            target
        } else {
            self.root.join(target)
        };

        let Ok(rest) = target.strip_prefix(self.releases_dir()) else {
            return Ok(None);
        };
        Ok(rest.components().next().and_then(|c| match c {
            Component::Normal(name) => ReleaseId::parse(&name.to_string_lossy()),
            _ => None,
        }))
    }
}
