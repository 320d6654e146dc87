use crate::cmd::{CommandRunner, CommandSpec};
use crate::config::Config;
use crate::error::DeployResult;
use crate::layout::Layout;
use crate::outcome::Warning;
use crate::stack::Stack;

/// Idempotent host preparation run at the start of every deploy:
/// system packages, service account, the domain skeleton and its
/// ownership.
///
/// Package and account commands are best-effort since the host
/// may already satisfy them. Failing to create the skeleton is
/// fatal.
pub struct EnvironmentPreparer<'a> {
    config: &'a Config,
    layout: &'a Layout,
    runner: &'a dyn CommandRunner,
    stack: &'a dyn Stack,
}

impl<'a> EnvironmentPreparer<'a> {
    #[must_use]
    pub fn new(
        config: &'a Config,
        layout: &'a Layout,
        runner: &'a dyn CommandRunner,
        stack: &'a dyn Stack,
    ) -> Self {
        Self {
            config,
            layout,
            runner,
            stack,
        }
    }

    pub fn prepare(&self) -> DeployResult<Vec<Warning>> {
        let mut warnings = Vec::new();

        if self.config.install_packages {
            self.install_packages(&mut warnings);
        }
        self.ensure_account(&mut warnings);

        self.layout.ensure_skeleton()?;
        tracing::info!(root = %self.layout.root().display(), "directory skeleton ready");

        let owner = format!("{}:{}", self.config.app_user, self.config.app_group);
        for dir in [self.layout.shared_dir(), self.layout.logs_dir()] {
            let chown = CommandSpec::new("chown")
                .args(["-R", owner.as_str()])
                .arg(dir.to_string_lossy());
            self.best_effort("chown", &chown, &mut warnings);
        }

        Ok(warnings)
    }

    fn install_packages(&self, warnings: &mut Vec<Warning>) {
        let update = CommandSpec::new("apt-get")
            .args(["update", "-q"])
            .env("DEBIAN_FRONTEND", "noninteractive")
            .timeout(self.config.step_timeout());
        self.best_effort("apt-get update", &update, warnings);

        let install = CommandSpec::new("apt-get")
            .args(["install", "-y", "-q", "--no-install-recommends"])
            .args(self.stack.packages().iter().copied())
            .env("DEBIAN_FRONTEND", "noninteractive")
            .timeout(self.config.step_timeout());
        self.best_effort("apt-get install", &install, warnings);
    }

    fn ensure_account(&self, warnings: &mut Vec<Warning>) {
        let group = self.config.app_group.as_str();
        let user = self.config.app_user.as_str();

        if !self.succeeds(&CommandSpec::new("getent").args(["group", group])) {
            let add = CommandSpec::new("groupadd").args(["--system", group]);
            self.best_effort("groupadd", &add, warnings);
        }

        if !self.succeeds(&CommandSpec::new("id").args(["-u", user])) {
            let add = CommandSpec::new("useradd").args([
                "--system",
                "--gid",
                group,
                "--no-create-home",
                "--shell",
                "/usr/sbin/nologin",
                user,
            ]);
            self.best_effort("useradd", &add, warnings);
        }
    }

    fn succeeds(&self, spec: &CommandSpec) -> bool {
        self.runner.run(spec).is_ok_and(|out| out.success())
    }

    fn best_effort(&self, label: &str, spec: &CommandSpec, warnings: &mut Vec<Warning>) {
        let reason = match self.runner.run(spec) {
            Ok(out) if out.success() => return,
            Ok(out) => out.reason(),
            Err(e) => e.to_string(),
        };
        tracing::warn!(step = label, %reason, "continuing");
        warnings.push(Warning::best_effort(label, reason));
    }
}
