pub mod flask;
pub mod laravel;
pub mod node;
pub mod react;

use std::path::{Path, PathBuf};

use crate::cmd::CommandSpec;
use crate::config::{Config, StackKind};
use crate::error::DeployResult;

pub use flask::Flask;
pub use laravel::Laravel;
pub use react::React;

/// What happens when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Abort the deploy; the pointer is not touched.
    Fatal,
    /// Log a warning and carry on.
    BestEffort,
}

/// One entry of a stack's build plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub label: String,
    pub command: CommandSpec,
    pub policy: Policy,
}

impl Step {
    #[must_use]
    pub fn fatal(label: &str, command: CommandSpec) -> Self {
        Self {
            label: label.to_string(),
            command,
            policy: Policy::Fatal,
        }
    }

    #[must_use]
    pub fn best_effort(label: &str, command: CommandSpec) -> Self {
        Self {
            label: label.to_string(),
            command,
            policy: Policy::BestEffort,
        }
    }
}

/// Framework-specific part of a release: which packages the host
/// needs, how a fetched tree is built, what proves the build
/// finished, and what gets served.
pub trait Stack {
    fn kind(&self) -> StackKind;

    /// System packages installed by the environment preparer.
    fn packages(&self) -> &'static [&'static str];

    /// Dependency and build steps for a fetched release, in
    /// order. Fails when a required manifest is missing.
    fn plan(&self, release: &Path) -> DeployResult<Vec<Step>>;

    /// File that must exist, relative to the release root, for
    /// the build to count as complete.
    fn marker(&self) -> PathBuf;

    /// Directory the `current` pointer targets, relative to the
    /// release root (`.` for the root itself).
    fn served_dir(&self) -> PathBuf;

    /// Service reloads run after activation.
    fn reload_commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }
}

/// The stack selected by the configuration.
#[must_use]
pub fn for_config(config: &Config) -> Box<dyn Stack> {
    match config.stack {
        StackKind::Laravel => Box::new(Laravel::from_config(config)),
        StackKind::Flask => Box::new(Flask::from_config(config)),
        StackKind::React => Box::new(React::from_config(config)),
    }
}

/// `systemctl <action> <unit>`.
#[must_use]
pub fn systemctl(action: &str, unit: &str) -> CommandSpec {
    CommandSpec::new("systemctl").args([action, unit])
}
