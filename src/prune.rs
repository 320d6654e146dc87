use std::fs;

use crate::error::DeployResult;
use crate::layout::Layout;
use crate::outcome::Warning;
use crate::release::{Manifest, ReleaseId};

/// Releases removed by a pruning pass and any removals that
/// failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: Vec<ReleaseId>,
    pub remaining: usize,
    pub warnings: Vec<Warning>,
}

/// Pick the releases to delete from `newest_first`.
///
/// Only releases in `built` (those with a manifest) count toward
/// the window: the active release plus the newest built others, up
/// to `keep` in total. Releases without a manifest are failed or
/// interrupted builds. Those newer than the active release are
/// kept for inspection; older ones are deleted. With no active
/// release every unbuilt one is kept.
#[must_use]
pub fn select_for_removal(
    newest_first: &[ReleaseId],
    built: &[ReleaseId],
    active: Option<&ReleaseId>,
    keep: usize,
) -> Vec<ReleaseId> {
    let keep = keep.max(1);
    let active = active.filter(|a| newest_first.contains(a));

    let mut kept: Vec<&ReleaseId> = Vec::with_capacity(keep);
    if let Some(a) = active {
        kept.push(a);
    }
    for id in newest_first.iter().filter(|id| built.contains(id)) {
        if kept.len() >= keep {
            break;
        }
        if Some(id) != active {
            kept.push(id);
        }
    }

    newest_first
        .iter()
        .filter(|id| !kept.contains(id))
        .filter(|id| built.contains(id) || active.is_some_and(|a| *id < a))
        .cloned()
        .collect()
}

/// Apply the retention window to the releases on disk. A release
/// that cannot be deleted is reported, not fatal.
pub fn prune(layout: &Layout, keep: usize) -> DeployResult<PruneReport> {
    let releases = layout.list_releases()?;
    let active = layout.active_release()?;
    let built: Vec<ReleaseId> = releases
        .iter()
        .filter(|id| matches!(Manifest::read(&layout.release_path(id)), Ok(Some(_))))
        .cloned()
        .collect();
    let doomed = select_for_removal(&releases, &built, active.as_ref(), keep);

    let mut report = PruneReport::default();
    for id in doomed {
        let path = layout.release_path(&id);
        match fs::remove_dir_all(&path) {
            Ok(()) => {
                tracing::info!(release = %id, "pruned");
                report.removed.push(id);
            }
            Err(e) => {
                tracing::warn!(release = %id, error = %e, "could not prune release");
                report
                    .warnings
                    .push(Warning::best_effort(&format!("prune {id}"), e.to_string()));
            }
        }
    }
    report.remaining = releases.len() - report.removed.len();
    Ok(report)
}
