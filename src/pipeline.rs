use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::activate::Activator;
use crate::builder::ReleaseBuilder;
use crate::cmd::{CommandRunner, CommandSpec, SystemRunner};
use crate::config::Config;
use crate::error::{DeployError, DeployResult};
use crate::layout::Layout;
use crate::lock::DeployLock;
use crate::outcome::{DeployOutcome, Warning};
use crate::provision::EnvironmentPreparer;
use crate::proxy::{self, ProxyConfigurator};
use crate::prune::{self, PruneReport};
use crate::release::{Clock, MANIFEST_FILE, Manifest, Release, ReleaseId, SystemClock};
use crate::stack::{self, Stack, systemctl};

/// Release manager for one domain: deploy, rollback, list and
/// prune releases.
pub struct Pipeline<'a> {
    config: &'a Config,
    runner: &'a dyn CommandRunner,
    clock: &'a dyn Clock,
    layout: Layout,
    stack: Box<dyn Stack>,
}

/// One row of `releases`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseInfo {
    pub id: ReleaseId,
    pub path: PathBuf,
    pub active: bool,
    /// Whether the build completed and was verified.
    pub built: bool,
    pub commit: Option<String>,
}

impl<'a> Pipeline<'a> {
    /// The configuration must already be validated.
    #[must_use]
    pub fn new(config: &'a Config, runner: &'a dyn CommandRunner) -> Self {
        Self {
            config,
            runner,
            clock: &SystemClock,
            layout: Layout::for_config(config),
            stack: stack::for_config(config),
        }
    }

    #[must_use]
    pub fn clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Prepare the host, build a new release, configure the
    /// proxy, activate, and prune.
    ///
    /// Any error before activation leaves `current` exactly as
    /// it was.
    pub fn deploy(&self) -> DeployResult<DeployOutcome> {
        tracing::info!(
            domain = %self.config.domain,
            stack = %self.config.stack,
            branch = %self.config.branch,
            "deploy started"
        );
        let _lock = DeployLock::acquire(&self.layout.lock_path())?;

        let mut warnings = EnvironmentPreparer::new(
            self.config,
            &self.layout,
            self.runner,
            self.stack.as_ref(),
        )
        .prepare()?;

        let (release, build_warnings) = ReleaseBuilder::new(
            self.config,
            &self.layout,
            self.runner,
            self.stack.as_ref(),
            self.clock,
        )
        .build()?;
        warnings.extend(build_warnings);

        if self.config.configure_proxy {
            let proxy = ProxyConfigurator::new(self.config, &self.layout, self.runner);
            warnings.extend(proxy.configure(&release.id)?);
        }

        warnings.extend(self.activator().activate(&self.layout.current(), &release)?);

        // Live from here on: failures become warnings.
        let (release_count, pruned) = match prune::prune(&self.layout, self.config.keep_releases) {
            Ok(report) => {
                warnings.extend(report.warnings);
                (report.remaining, report.removed)
            }
            Err(e) => {
                tracing::warn!(error = %e, "pruning failed after activation");
                warnings.push(Warning::best_effort("prune", e.to_string()));
                let count = self.layout.list_releases().map_or(0, |ids| ids.len());
                (count, Vec::new())
            }
        };

        let outcome = DeployOutcome {
            domain: self.config.domain.clone(),
            release: release.id,
            active_path: release.served,
            release_count,
            pruned,
            warnings,
        };
        tracing::info!(release = %outcome.release, degraded = outcome.is_degraded(), "deploy finished");
        Ok(outcome)
    }

    /// Point `current` back at an existing release without
    /// rebuilding or relinking it.
    pub fn rollback(&self, timestamp: &str) -> DeployResult<DeployOutcome> {
        let id = ReleaseId::parse(timestamp)
            .ok_or_else(|| DeployError::RollbackTargetNotFound(timestamp.to_string()))?;

        // Held from the existence check through the swap.
        let _lock = DeployLock::acquire(&self.layout.lock_path())?;

        let path = self.layout.release_path(&id);
        if !path.is_dir() {
            return Err(DeployError::RollbackTargetNotFound(id.to_string()));
        }

        let manifest = Manifest::read(&path)?.ok_or_else(|| DeployError::BuildVerification {
            release: id.to_string(),
            marker: PathBuf::from(MANIFEST_FILE),
        })?;
        let release = Release::new(id, path, Path::new(&manifest.served));

        tracing::info!(release = %release.id, "rolling back");
        let warnings = self.activator().activate(&self.layout.current(), &release)?;

        Ok(DeployOutcome {
            domain: self.config.domain.clone(),
            release: release.id,
            active_path: release.served,
            release_count: self.layout.list_releases()?.len(),
            pruned: Vec::new(),
            warnings,
        })
    }

    /// Releases on disk, newest first.
    pub fn releases(&self) -> DeployResult<Vec<ReleaseInfo>> {
        let active = self.layout.active_release()?;
        self.layout
            .list_releases()?
            .into_iter()
            .map(|id| -> DeployResult<ReleaseInfo> {
                let path = self.layout.release_path(&id);
                let manifest = Manifest::read(&path)?;
                Ok(ReleaseInfo {
                    active: active.as_ref() == Some(&id),
                    built: manifest.is_some(),
                    commit: manifest.and_then(|m| m.commit),
                    id,
                    path,
                })
            })
            .collect()
    }

    /// Apply the retention window now.
    pub fn prune(&self) -> DeployResult<PruneReport> {
        let _lock = DeployLock::acquire(&self.layout.lock_path())?;
        prune::prune(&self.layout, self.config.keep_releases)
    }

    /// Describe a deploy without touching the host.
    pub fn dry_run(&self) -> DeployResult<String> {
        let shared: Vec<String> = self
            .config
            .shared_items()
            .iter()
            .map(|i| i.name.clone())
            .collect();
        let reloads: Vec<String> = self
            .reload_commands()
            .iter()
            .map(CommandSpec::display)
            .collect();

        let mut lines = vec![
            format!("Domain root:  {}", self.layout.root().display()),
            format!("Stack:        {}", self.config.stack),
            format!("Packages:     {}", self.stack.packages().join(" ")),
            format!(
                "Fetch:        git clone --depth 1 --single-branch --branch {} {}",
                self.config.branch, self.config.repository
            ),
            format!("Shared:       {}", shared.join(", ")),
            format!("Marker:       {}", self.stack.marker().display()),
            format!("Serve:        {}", self.stack.served_dir().display()),
            format!("Migrations:   {}", if self.config.run_migrations { "yes" } else { "no" }),
            format!("Reload:       {}", reloads.join("; ")),
            format!("Keep:         {} releases", self.config.keep_releases),
        ];
        if self.config.configure_proxy {
            lines.push(String::new());
            lines.push(proxy::render_site(self.config, &self.layout)?);
        }
        Ok(lines.join("\n"))
    }

    fn reload_commands(&self) -> Vec<CommandSpec> {
        let mut reloads = self.stack.reload_commands();
        if self.config.configure_proxy {
            reloads.push(systemctl("reload", "nginx"));
        }
        reloads
    }

    fn activator(&self) -> Activator<'_> {
        Activator::new(self.runner, self.reload_commands())
    }
}

#[derive(Parser)]
#[command(name = "estaleiro")]
#[command(about = "Timestamped releases with an atomic current symlink")]
struct Cli {
    /// YAML configuration file. Without it, settings come from
    /// environment variables (DOMAIN, REPO_URL, BRANCH, ...).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a new release and make it current
    Deploy {
        /// Print the plan and the Nginx site without executing
        #[arg(long)]
        dry_run: bool,
    },

    /// Point current back at an existing release
    Rollback {
        /// Release timestamp (YYYYMMDD_HHMMSS)
        timestamp: String,
    },

    /// List releases on disk
    Releases {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Delete releases outside the retention window
    Prune,
}

/// Parse CLI arguments, load and validate configuration, and
/// dispatch the command against the real host.
pub fn run() -> DeployResult<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    let runner = SystemRunner::new()?;
    let pipeline = Pipeline::new(&config, &runner);

    match cli.command {
        Command::Deploy { dry_run: true } => {
            eprintln!("=== Dry run: no changes will be made ===");
            println!("{}", pipeline.dry_run()?);
        }
        Command::Deploy { dry_run: false } => {
            let outcome = pipeline.deploy()?;
            eprintln!();
            if outcome.is_degraded() {
                eprintln!("Deployed with warnings: reload failed, follow up manually.");
            } else {
                eprintln!("Deployment complete!");
            }
            println!("{outcome}");
        }
        Command::Rollback { timestamp } => {
            let outcome = pipeline.rollback(&timestamp)?;
            eprintln!("Rolled back to {}", outcome.release);
            println!("{outcome}");
        }
        Command::Releases { json } => {
            let releases = pipeline.releases()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&releases)?);
            } else {
                for r in &releases {
                    let marker = if r.active { "*" } else { " " };
                    let state = if r.built { "built" } else { "incomplete" };
                    let commit = r.commit.as_deref().unwrap_or("-");
                    println!("{marker} {}  {state:<10}  {commit}", r.id);
                }
            }
        }
        Command::Prune => {
            let report = pipeline.prune()?;
            for id in &report.removed {
                eprintln!("Removed {id}");
            }
            for warning in &report.warnings {
                eprintln!("Warning: {warning}");
            }
            println!("{} releases remain", report.remaining);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_rollback_with_global_config() {
        let cli = Cli::try_parse_from([
            "estaleiro",
            "rollback",
            "20240101_000000",
            "--config",
            "deploy.yml",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("deploy.yml")));
        assert!(matches!(
            cli.command,
            Command::Rollback { ref timestamp } if timestamp == "20240101_000000"
        ));
    }

    #[test]
    fn rollback_requires_timestamp() {
        assert!(Cli::try_parse_from(["estaleiro", "rollback"]).is_err());
    }
}
