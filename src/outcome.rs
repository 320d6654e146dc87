use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::release::ReleaseId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// A best-effort step failed and was skipped.
    BestEffort,
    /// A service reload failed after the pointer was swapped.
    Reload,
}

/// A non-fatal failure reported at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub step: String,
    pub message: String,
}

impl Warning {
    #[must_use]
    pub fn best_effort(step: &str, message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::BestEffort,
            step: step.to_string(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn reload(step: &str, message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::Reload,
            step: step.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.message)
    }
}

/// Result of a successful deploy or rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub domain: String,
    pub release: ReleaseId,
    pub active_path: PathBuf,
    pub release_count: usize,
    pub pruned: Vec<ReleaseId>,
    pub warnings: Vec<Warning>,
}

impl DeployOutcome {
    /// The new release is live but a service reload failed and
    /// needs manual follow-up.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.warnings.iter().any(|w| w.kind == WarningKind::Reload)
    }
}

impl fmt::Display for DeployOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Domain:   {}", self.domain)?;
        writeln!(f, "Release:  {}", self.release)?;
        writeln!(f, "Active:   {}", self.active_path.display())?;
        write!(f, "Releases: {}", self.release_count)?;
        if !self.pruned.is_empty() {
            let pruned: Vec<&str> = self.pruned.iter().map(ReleaseId::as_str).collect();
            write!(f, "\nPruned:   {}", pruned.join(", "))?;
        }
        for warning in &self.warnings {
            write!(f, "\nWarning:  {warning}")?;
        }
        Ok(())
    }
}
