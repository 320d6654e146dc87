use std::fs;
use std::path::Path;

use crate::cmd::{CommandRunner, CommandSpec};
use crate::config::Config;
use crate::error::{DeployError, DeployResult};
use crate::layout::Layout;
use crate::outcome::Warning;
use crate::release::{Clock, Manifest, Release, ReleaseId};
use crate::shared;
use crate::stack::{Policy, Stack, Step};

/// Fetches, links, and builds a new release directory. Nothing
/// it does is visible to the proxy until the activator swaps the
/// `current` pointer.
pub struct ReleaseBuilder<'a> {
    config: &'a Config,
    layout: &'a Layout,
    runner: &'a dyn CommandRunner,
    stack: &'a dyn Stack,
    clock: &'a dyn Clock,
}

impl<'a> ReleaseBuilder<'a> {
    #[must_use]
    pub fn new(
        config: &'a Config,
        layout: &'a Layout,
        runner: &'a dyn CommandRunner,
        stack: &'a dyn Stack,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            config,
            layout,
            runner,
            stack,
            clock,
        }
    }

    /// Build a release of `config.branch`.
    ///
    /// A failed fetch removes the half-written directory. Any
    /// later failure leaves the release on disk for inspection.
    pub fn build(&self) -> DeployResult<(Release, Vec<Warning>)> {
        let now = self.clock.now();
        let id = ReleaseId::from_datetime(now);
        let path = self.layout.release_path(&id);

        if fs::symlink_metadata(&path).is_ok() {
            return Err(DeployError::ReleaseCollision(id.to_string()));
        }

        tracing::info!(release = %id, branch = %self.config.branch, "fetching source");
        self.fetch(&path)?;

        let items = self.config.shared_items();
        shared::link(&self.layout.shared_dir(), &path, &items)?;
        tracing::info!(release = %id, items = items.len(), "linked shared state");

        let steps = self.stack.plan(&path)?;
        let warnings = self.run_steps(&steps)?;

        let marker = path.join(self.stack.marker());
        if !marker.exists() {
            tracing::error!(
                release = %id,
                path = %path.display(),
                "build marker missing; release kept for inspection"
            );
            return Err(DeployError::BuildVerification {
                release: id.to_string(),
                marker: self.stack.marker(),
            });
        }

        let served_dir = self.stack.served_dir();
        let manifest = Manifest {
            id: id.clone(),
            branch: self.config.branch.clone(),
            commit: self.commit(&path),
            stack: self.stack.kind(),
            served: served_dir.to_string_lossy().into_owned(),
            built_at: now.format("%Y-%m-%dT%H:%M:%S").to_string(),
        };
        manifest.write(&path)?;

        tracing::info!(release = %id, "release built");
        Ok((Release::new(id, path, &served_dir), warnings))
    }

    fn fetch(&self, path: &Path) -> DeployResult<()> {
        let spec = CommandSpec::new("git")
            .args([
                "clone",
                "--depth",
                "1",
                "--single-branch",
                "--branch",
                self.config.branch.as_str(),
                self.config.repository.as_str(),
            ])
            .arg(path.to_string_lossy())
            .env("GIT_TERMINAL_PROMPT", "0")
            .timeout(self.config.fetch_timeout());

        let reason = match self.runner.run(&spec) {
            Ok(out) if out.success() && path.is_dir() => return Ok(()),
            Ok(out) if out.success() => "clone produced no directory".to_string(),
            Ok(out) => out.reason(),
            Err(e) => e.to_string(),
        };

        if path.exists() {
            if let Err(e) = fs::remove_dir_all(path) {
                tracing::warn!(error = %e, "could not remove failed fetch");
            }
        }
        Err(DeployError::Fetch {
            branch: self.config.branch.clone(),
            reason,
        })
    }

    fn run_steps(&self, steps: &[Step]) -> DeployResult<Vec<Warning>> {
        let mut warnings = Vec::new();

        for step in steps {
            tracing::info!(step = %step.label, "running");
            let reason = match self.runner.run(&step.command) {
                Ok(out) if out.success() => continue,
                Ok(out) => out.reason(),
                Err(e) => e.to_string(),
            };

            match step.policy {
                Policy::Fatal => {
                    tracing::error!(step = %step.label, %reason, "step failed");
                    return Err(DeployError::DependencyInstall {
                        step: step.label.clone(),
                        reason,
                    });
                }
                Policy::BestEffort => {
                    tracing::warn!(step = %step.label, %reason, "best-effort step failed");
                    warnings.push(Warning::best_effort(&step.label, reason));
                }
            }
        }

        Ok(warnings)
    }

    fn commit(&self, path: &Path) -> Option<String> {
        let spec = CommandSpec::new("git").args(["rev-parse", "HEAD"]).current_dir(path);
        match self.runner.run(&spec) {
            Ok(out) if out.success() => {
                let sha = out.stdout.trim();
                (!sha.is_empty()).then(|| sha.to_string())
            }
            _ => None,
        }
    }
}
