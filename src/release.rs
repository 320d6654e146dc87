use std::cell::Cell;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::config::StackKind;
use crate::error::DeployResult;

/// File written inside a release once its build has been
/// verified.
pub const MANIFEST_FILE: &str = ".release.json";

const ID_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Timestamp key of a release (`YYYYMMDD_HHMMSS`). Lexical order
/// is chronological order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseId(String);

impl ReleaseId {
    #[must_use]
    pub fn from_datetime(at: NaiveDateTime) -> Self {
        Self(at.format(ID_FORMAT).to_string())
    }

    /// Parse a directory name or CLI argument. Returns `None` for
    /// anything that is not a well-formed timestamp.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 15 {
            return None;
        }
        NaiveDateTime::parse_from_str(s, ID_FORMAT)
            .ok()
            .map(|_| Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One fetched and built snapshot of the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub id: ReleaseId,
    pub path: PathBuf,
    /// Directory the `current` pointer targets.
    pub served: PathBuf,
}

impl Release {
    #[must_use]
    pub fn new(id: ReleaseId, path: PathBuf, served_dir: &Path) -> Self {
        let served = if served_dir == Path::new(".") {
            path.clone()
        } else {
            path.join(served_dir)
        };
        Self { id, path, served }
    }
}

/// Build record stored as `.release.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: ReleaseId,
    pub branch: String,
    pub commit: Option<String>,
    pub stack: StackKind,
    /// Served directory relative to the release root.
    pub served: String,
    pub built_at: String,
}

impl Manifest {
    pub fn write(&self, release_path: &Path) -> DeployResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(release_path.join(MANIFEST_FILE), json)?;
        Ok(())
    }

    /// Read the manifest of a release. `Ok(None)` when the
    /// release never finished building.
    pub fn read(release_path: &Path) -> DeployResult<Option<Self>> {
        let path = release_path.join(MANIFEST_FILE);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Source of release timestamps.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// UTC wall-clock time, so ids keep increasing across DST
/// changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// Clock that advances a fixed step on every read, so
/// consecutive deploys in tests get distinct release ids.
#[derive(Debug)]
pub struct SteppingClock {
    next: Cell<NaiveDateTime>,
    step: TimeDelta,
}

impl SteppingClock {
    #[must_use]
    pub const fn new(start: NaiveDateTime, step: TimeDelta) -> Self {
        Self {
            next: Cell::new(start),
            step,
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> NaiveDateTime {
        let now = self.next.get();
        self.next.set(now + self.step);
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn id_format() {
        let id = ReleaseId::from_datetime(at(7, 5, 9));

        assert_eq!(id.as_str(), "20240309_070509");
    }

    #[test]
    fn parse_accepts_only_timestamps() {
        assert!(ReleaseId::parse("20240309_070509").is_some());
        assert!(ReleaseId::parse("20241309_070509").is_none());
        assert!(ReleaseId::parse("latest").is_none());
        assert!(ReleaseId::parse("20240309_070509-old").is_none());
        assert!(ReleaseId::parse("").is_none());
    }

    #[test]
    fn ordering_is_chronological() {
        let a = ReleaseId::from_datetime(at(9, 59, 59));
        let b = ReleaseId::from_datetime(at(10, 0, 0));

        assert!(a < b);
    }

    #[test]
    fn system_clock_reads_utc() {
        let before = Utc::now().naive_utc();
        let now = SystemClock.now();
        let after = Utc::now().naive_utc();

        assert!(before <= now && now <= after);
    }

    #[test]
    fn stepping_clock_advances() {
        let clock = SteppingClock::new(at(12, 0, 0), TimeDelta::seconds(1));

        assert_eq!(clock.now(), at(12, 0, 0));
        assert_eq!(clock.now(), at(12, 0, 1));
    }

    #[test]
    fn served_dir_of_root_is_release_path() {
        let id = ReleaseId::from_datetime(at(1, 2, 3));
        let root = Release::new(id.clone(), PathBuf::from("/r/1"), Path::new("."));
        let public = Release::new(id, PathBuf::from("/r/1"), Path::new("public"));

        assert_eq!(root.served, PathBuf::from("/r/1"));
        assert_eq!(public.served, PathBuf::from("/r/1/public"));
    }

    #[test]
    fn manifest_round_trip_and_absence() {
        let dir = tempfile::tempdir().unwrap();

        assert_eq!(Manifest::read(dir.path()).unwrap(), None);

        let manifest = Manifest {
            id: ReleaseId::from_datetime(at(1, 2, 3)),
            branch: "main".into(),
            commit: Some("abc".into()),
            stack: StackKind::React,
            served: "build".into(),
            built_at: "2024-03-09T01:02:03".into(),
        };
        manifest.write(dir.path()).unwrap();

        assert_eq!(Manifest::read(dir.path()).unwrap(), Some(manifest));
    }
}
