use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::cmd::CommandSpec;
use crate::error::{DeployError, DeployResult};
use crate::stack::Step;

/// JavaScript package manager, chosen by which lockfile the
/// source tree ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    #[must_use]
    pub const fn program(self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Yarn => "yarn",
            Self::Pnpm => "pnpm",
        }
    }
}

/// Package manager and whether a lockfile pins the install.
#[must_use]
pub fn detect(release: &Path) -> (PackageManager, bool) {
    if release.join("pnpm-lock.yaml").is_file() {
        (PackageManager::Pnpm, true)
    } else if release.join("yarn.lock").is_file() {
        (PackageManager::Yarn, true)
    } else if release.join("package-lock.json").is_file() {
        (PackageManager::Npm, true)
    } else {
        (PackageManager::Npm, false)
    }
}

#[must_use]
pub fn install_step(release: &Path, timeout: Duration) -> Step {
    let (pm, locked) = detect(release);
    let args: &[&str] = match (pm, locked) {
        (PackageManager::Npm, true) => &["ci"],
        (PackageManager::Npm, false) => &["install"],
        (PackageManager::Yarn | PackageManager::Pnpm, _) => &["install", "--frozen-lockfile"],
    };
    Step::fatal(
        &format!("{} install", pm.program()),
        CommandSpec::new(pm.program())
            .args(args.iter().copied())
            .current_dir(release)
            .timeout(timeout),
    )
}

#[must_use]
pub fn build_step(release: &Path, timeout: Duration) -> Step {
    let (pm, _) = detect(release);
    Step::fatal(
        &format!("{} run build", pm.program()),
        CommandSpec::new(pm.program())
            .args(["run", "build"])
            .current_dir(release)
            .timeout(timeout),
    )
}

/// Whether `package.json` declares `script`. Fails when the
/// manifest is missing or unreadable.
pub fn has_script(release: &Path, script: &str) -> DeployResult<bool> {
    let path = release.join("package.json");
    let content = fs::read_to_string(&path)
        .map_err(|_| DeployError::ManifestMissing("package.json".into()))?;
    let manifest: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        DeployError::ManifestMissing(format!("package.json is not valid JSON: {e}"))
    })?;
    Ok(manifest
        .get("scripts")
        .and_then(|s| s.get(script))
        .is_some_and(serde_json::Value::is_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockfile_selects_manager() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect(dir.path()), (PackageManager::Npm, false));

        fs::write(dir.path().join("package-lock.json"), "{}").unwrap();
        assert_eq!(detect(dir.path()), (PackageManager::Npm, true));

        fs::write(dir.path().join("yarn.lock"), "").unwrap();
        assert_eq!(detect(dir.path()), (PackageManager::Yarn, true));

        fs::write(dir.path().join("pnpm-lock.yaml"), "").unwrap();
        assert_eq!(detect(dir.path()), (PackageManager::Pnpm, true));
    }

    #[test]
    fn npm_ci_only_with_lockfile() {
        let dir = tempfile::tempdir().unwrap();
        let t = Duration::from_secs(1);

        assert_eq!(install_step(dir.path(), t).command.display(), "npm install");

        fs::write(dir.path().join("package-lock.json"), "{}").unwrap();
        assert_eq!(install_step(dir.path(), t).command.display(), "npm ci");
    }

    #[test]
    fn script_detection() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"scripts": {"build": "vite build", "dev": "vite"}}"#,
        )
        .unwrap();

        assert!(has_script(dir.path(), "build").unwrap());
        assert!(!has_script(dir.path(), "test").unwrap());
    }

    #[test]
    fn missing_package_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            has_script(dir.path(), "build"),
            Err(DeployError::ManifestMissing(_))
        ));
    }
}
