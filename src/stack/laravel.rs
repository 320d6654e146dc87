use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cmd::CommandSpec;
use crate::config::{Config, StackKind};
use crate::error::{DeployError, DeployResult};
use crate::stack::{Stack, Step, node, systemctl};

/// Laravel on PHP-FPM. Serves `public/`.
#[derive(Debug, Clone)]
pub struct Laravel {
    pub run_migrations: bool,
    pub php_fpm_service: String,
    pub step_timeout: Duration,
}

impl Laravel {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            run_migrations: config.run_migrations,
            php_fpm_service: config.php_fpm_service.clone(),
            step_timeout: config.step_timeout(),
        }
    }

    fn artisan(release: &Path, args: &[&str]) -> CommandSpec {
        CommandSpec::new("php")
            .arg("artisan")
            .args(args.iter().copied())
            .current_dir(release)
    }
}

impl Stack for Laravel {
    fn kind(&self) -> StackKind {
        StackKind::Laravel
    }

    fn packages(&self) -> &'static [&'static str] {
        &[
            "nginx",
            "git",
            "unzip",
            "php-fpm",
            "php-cli",
            "php-mbstring",
            "php-xml",
            "php-curl",
            "php-zip",
            "php-sqlite3",
            "composer",
            "nodejs",
            "npm",
        ]
    }

    fn plan(&self, release: &Path) -> DeployResult<Vec<Step>> {
        if !release.join("composer.json").is_file() {
            return Err(DeployError::ManifestMissing("composer.json".into()));
        }

        let mut steps = vec![Step::fatal(
            "composer install",
            CommandSpec::new("composer")
                .args([
                    "install",
                    "--no-dev",
                    "--prefer-dist",
                    "--optimize-autoloader",
                    "--no-interaction",
                ])
                .current_dir(release)
                .env("COMPOSER_ALLOW_SUPERUSER", "1")
                .timeout(self.step_timeout),
        )];

        // Compiled assets are optional for Laravel: only built
        // when the tree ships a package.json with a build script.
        if release.join("package.json").is_file() {
            steps.push(node::install_step(release, self.step_timeout));
            if node::has_script(release, "build")? {
                steps.push(node::build_step(release, self.step_timeout));
            }
        }

        if self.run_migrations {
            steps.push(Step::fatal(
                "artisan migrate",
                Self::artisan(release, &["migrate", "--force"]).timeout(self.step_timeout),
            ));
        }

        for (label, args) in [
            ("artisan storage:link", &["storage:link"][..]),
            ("artisan config:cache", &["config:cache"][..]),
            ("artisan route:cache", &["route:cache"][..]),
            ("artisan view:cache", &["view:cache"][..]),
        ] {
            steps.push(Step::best_effort(label, Self::artisan(release, args)));
        }

        Ok(steps)
    }

    fn marker(&self) -> PathBuf {
        PathBuf::from("vendor/autoload.php")
    }

    fn served_dir(&self) -> PathBuf {
        PathBuf::from("public")
    }

    fn reload_commands(&self) -> Vec<CommandSpec> {
        vec![systemctl("reload", &self.php_fpm_service)]
    }
}
