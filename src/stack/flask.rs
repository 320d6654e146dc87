use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cmd::CommandSpec;
use crate::config::{Config, StackKind};
use crate::error::{DeployError, DeployResult};
use crate::stack::{Stack, Step, systemctl};

/// Flask behind a systemd-managed WSGI server. Each release
/// carries its own virtualenv.
#[derive(Debug, Clone)]
pub struct Flask {
    pub run_migrations: bool,
    pub entry_point: String,
    pub service: Option<String>,
    pub step_timeout: Duration,
}

impl Flask {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            run_migrations: config.run_migrations,
            entry_point: config.entry_point.clone(),
            service: config.service_name(),
            step_timeout: config.step_timeout(),
        }
    }

    fn venv_bin(release: &Path, tool: &str) -> String {
        release
            .join("venv")
            .join("bin")
            .join(tool)
            .to_string_lossy()
            .into_owned()
    }
}

impl Stack for Flask {
    fn kind(&self) -> StackKind {
        StackKind::Flask
    }

    fn packages(&self) -> &'static [&'static str] {
        &["nginx", "git", "python3", "python3-venv", "python3-pip"]
    }

    fn plan(&self, release: &Path) -> DeployResult<Vec<Step>> {
        if !release.join("requirements.txt").is_file() {
            return Err(DeployError::ManifestMissing("requirements.txt".into()));
        }

        let pip = Self::venv_bin(release, "pip");
        let mut steps = vec![
            Step::fatal(
                "create virtualenv",
                CommandSpec::new("python3")
                    .args(["-m", "venv", "venv"])
                    .current_dir(release),
            ),
            Step::best_effort(
                "upgrade pip",
                CommandSpec::new(&pip)
                    .args(["install", "--upgrade", "pip"])
                    .current_dir(release)
                    .timeout(self.step_timeout),
            ),
            Step::fatal(
                "pip install",
                CommandSpec::new(&pip)
                    .args(["install", "-r", "requirements.txt"])
                    .current_dir(release)
                    .timeout(self.step_timeout),
            ),
        ];

        if self.run_migrations {
            steps.push(Step::fatal(
                "flask db upgrade",
                CommandSpec::new(&Self::venv_bin(release, "flask"))
                    .args(["db", "upgrade"])
                    .current_dir(release)
                    .timeout(self.step_timeout),
            ));
        }

        Ok(steps)
    }

    fn marker(&self) -> PathBuf {
        PathBuf::from(&self.entry_point)
    }

    fn served_dir(&self) -> PathBuf {
        PathBuf::from(".")
    }

    fn reload_commands(&self) -> Vec<CommandSpec> {
        self.service
            .iter()
            .map(|unit| systemctl("restart", unit))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::Policy;
    use std::fs;

    #[test]
    fn requires_requirements_txt() {
        let dir = tempfile::tempdir().unwrap();
        let flask = Flask::from_config(&Config::new("a.com", "repo"));

        assert!(matches!(
            flask.plan(dir.path()),
            Err(DeployError::ManifestMissing(_))
        ));
    }

    #[test]
    fn plan_uses_release_virtualenv() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("requirements.txt"), "flask\n").unwrap();
        let flask = Flask::from_config(&Config::new("a.com", "repo").run_migrations(true));

        let steps = flask.plan(dir.path()).unwrap();

        assert_eq!(steps.len(), 4);
        assert_eq!(steps[1].policy, Policy::BestEffort);
        assert_eq!(
            steps[2].command.program,
            dir.path().join("venv/bin/pip").to_string_lossy()
        );
        assert_eq!(steps[3].label, "flask db upgrade");
    }

    #[test]
    fn restarts_domain_unit_by_default() {
        let config = Config::new("api.example.com", "repo").stack(StackKind::Flask);
        let flask = Flask::from_config(&config);

        assert_eq!(
            flask.reload_commands()[0].display(),
            "systemctl restart api.example.com"
        );
        assert_eq!(flask.served_dir(), PathBuf::from("."));
        assert_eq!(flask.marker(), PathBuf::from("wsgi.py"));
    }
}
