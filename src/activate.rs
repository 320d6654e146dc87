use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use crate::cmd::{CommandRunner, CommandSpec};
use crate::error::{DeployError, DeployResult};
use crate::outcome::Warning;
use crate::release::Release;

/// Point `current` at `target` in one step.
///
/// A fresh symlink is created next to `current` and renamed over
/// it. `rename(2)` replaces the old link atomically, so a reader
/// resolving `current` sees either the old release or the new
/// one, never a missing or half-written target.
pub fn swap_pointer(current: &Path, target: &Path) -> DeployResult<()> {
    if !target.is_dir() {
        return Err(DeployError::Activation(format!(
            "target {} is not a directory",
            target.display()
        )));
    }

    let parent = current.parent().ok_or_else(|| {
        DeployError::Activation(format!("{} has no parent directory", current.display()))
    })?;
    let name = current
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = parent.join(format!(".{name}.next-{}", std::process::id()));

    // Leftover from an interrupted run with the same pid.
    let _ = fs::remove_file(&staging);

    symlink(target, &staging).map_err(|e| {
        DeployError::Activation(format!("cannot create {}: {e}", staging.display()))
    })?;

    if let Err(e) = fs::rename(&staging, current) {
        let _ = fs::remove_file(&staging);
        return Err(DeployError::Activation(format!(
            "cannot replace {}: {e}",
            current.display()
        )));
    }
    Ok(())
}

/// Makes a built release live and reloads the services in front
/// of it.
pub struct Activator<'a> {
    runner: &'a dyn CommandRunner,
    reloads: Vec<CommandSpec>,
}

impl<'a> Activator<'a> {
    #[must_use]
    pub const fn new(runner: &'a dyn CommandRunner, reloads: Vec<CommandSpec>) -> Self {
        Self { runner, reloads }
    }

    /// Swap the pointer, then run every reload. A failed swap is
    /// an error and leaves the previous pointer in place. A failed
    /// reload only yields a warning: the new files are already
    /// live and are not rolled back.
    pub fn activate(&self, current: &Path, release: &Release) -> DeployResult<Vec<Warning>> {
        swap_pointer(current, &release.served)?;
        tracing::info!(
            release = %release.id,
            target = %release.served.display(),
            "activated"
        );

        let mut warnings = Vec::new();
        for reload in &self.reloads {
            let label = reload.display();
            let reason = match self.runner.run(reload) {
                Ok(out) if out.success() => continue,
                Ok(out) => out.reason(),
                Err(e) => e.to_string(),
            };
            tracing::warn!(command = %label, %reason, "reload failed; manual follow-up needed");
            warnings.push(Warning::reload(&label, reason));
        }
        Ok(warnings)
    }
}
