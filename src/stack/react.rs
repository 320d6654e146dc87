use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{Config, StackKind};
use crate::error::{DeployError, DeployResult};
use crate::stack::{Stack, Step, node};

/// Static single-page app built with a Node toolchain. Serves
/// the build output directory.
#[derive(Debug, Clone)]
pub struct React {
    pub build_dir: String,
    pub step_timeout: Duration,
}

impl React {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            build_dir: config.build_dir.clone(),
            step_timeout: config.step_timeout(),
        }
    }
}

impl Stack for React {
    fn kind(&self) -> StackKind {
        StackKind::React
    }

    fn packages(&self) -> &'static [&'static str] {
        &["nginx", "git", "nodejs", "npm"]
    }

    fn plan(&self, release: &Path) -> DeployResult<Vec<Step>> {
        if !node::has_script(release, "build")? {
            return Err(DeployError::ManifestMissing(
                "package.json has no \"build\" script".into(),
            ));
        }

        Ok(vec![
            node::install_step(release, self.step_timeout),
            node::build_step(release, self.step_timeout),
        ])
    }

    fn marker(&self) -> PathBuf {
        Path::new(&self.build_dir).join("index.html")
    }

    fn served_dir(&self) -> PathBuf {
        PathBuf::from(&self.build_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn react() -> React {
        React::from_config(&Config::new("a.com", "repo").build_dir("dist"))
    }

    #[test]
    fn requires_build_script() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"scripts":{}}"#).unwrap();

        assert!(matches!(
            react().plan(dir.path()),
            Err(DeployError::ManifestMissing(_))
        ));
    }

    #[test]
    fn plan_installs_then_builds() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"scripts":{"build":"react-scripts build"}}"#,
        )
        .unwrap();
        fs::write(dir.path().join("yarn.lock"), "").unwrap();

        let lines: Vec<String> = react()
            .plan(dir.path())
            .unwrap()
            .iter()
            .map(|s| s.command.display())
            .collect();

        assert_eq!(
            lines,
            vec!["yarn install --frozen-lockfile", "yarn run build"]
        );
    }

    #[test]
    fn marker_lives_in_build_dir() {
        assert_eq!(react().marker(), PathBuf::from("dist/index.html"));
        assert_eq!(react().served_dir(), PathBuf::from("dist"));
        assert!(react().reload_commands().is_empty());
    }
}
