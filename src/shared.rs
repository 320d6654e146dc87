use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::{Component, Path};

use crate::config::{SharedItem, SharedKind};
use crate::error::{DeployError, DeployResult};

/// Link every shared item into a release.
///
/// Missing items are created under `shared_dir` first (an empty
/// file or a directory according to their kind). Whatever the
/// fetched source tree shipped at the same path is removed and
/// replaced with a symlink into `shared_dir`. Running it twice
/// leaves the same links and never touches shared content.
///
/// An item whose path in the release passes through a symlink is
/// refused before anything is removed, since removing it would
/// delete whatever the link points at.
pub fn link(shared_dir: &Path, release_path: &Path, items: &[SharedItem]) -> DeployResult<()> {
    for item in items {
        check_inside(release_path, item)?;

        let shared_path = shared_dir.join(&item.name);
        ensure_shared(&shared_path, item)?;

        let target = release_path.join(&item.name);
        remove_existing(&target)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        symlink(&shared_path, &target)?;
        tracing::debug!(item = %item.name, "linked shared item");
    }
    Ok(())
}

fn check_inside(release_path: &Path, item: &SharedItem) -> DeployResult<()> {
    let refuse = |reason: &str| {
        Err(DeployError::Config(format!(
            "shared item '{}' {reason}",
            item.name
        )))
    };

    let relative = Path::new(&item.name);
    let mut prefix = release_path.to_path_buf();
    let mut normal = 0;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                if normal > 0 && is_symlink(&prefix) {
                    return refuse(&format!("passes through the symlink {}", prefix.display()));
                }
                prefix.push(part);
                normal += 1;
            }
            Component::CurDir => {}
            _ => return refuse("is not a path inside the release"),
        }
    }
    if normal == 0 {
        return refuse("names the release root");
    }
    Ok(())
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink())
}

fn ensure_shared(path: &Path, item: &SharedItem) -> DeployResult<()> {
    match fs::metadata(path) {
        Ok(meta) => {
            let is_dir = meta.is_dir();
            if is_dir != (item.kind == SharedKind::Dir) {
                tracing::warn!(
                    item = %item.name,
                    "shared item exists with a different kind than configured; keeping it"
                );
            }
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            match item.kind {
                SharedKind::Dir => fs::create_dir_all(path)?,
                SharedKind::File => {
                    fs::File::create(path)?;
                }
            }
            tracing::info!(item = %item.name, "created shared item");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn remove_existing(path: &Path) -> DeployResult<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<SharedItem> {
        vec![
            SharedItem::new(".env", SharedKind::File),
            SharedItem::new("storage", SharedKind::Dir),
            SharedItem::new("database/database.sqlite", SharedKind::File),
        ]
    }

    #[test]
    fn creates_missing_items_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("shared");
        let release = dir.path().join("release");
        fs::create_dir_all(&release).unwrap();

        link(&shared, &release, &items()).unwrap();

        assert!(shared.join(".env").is_file());
        assert!(shared.join("storage").is_dir());
        assert!(shared.join("database/database.sqlite").is_file());
    }

    #[test]
    fn replaces_shipped_paths_with_links() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("shared");
        let release = dir.path().join("release");
        fs::create_dir_all(release.join("storage/logs")).unwrap();
        fs::write(release.join("storage/logs/old.log"), "shipped").unwrap();
        fs::write(release.join(".env"), "APP_ENV=local").unwrap();

        link(&shared, &release, &items()).unwrap();

        for item in items() {
            let linked = release.join(&item.name);
            assert!(fs::symlink_metadata(&linked).unwrap().file_type().is_symlink());
            assert_eq!(fs::read_link(&linked).unwrap(), shared.join(&item.name));
        }
        assert!(!shared.join("storage/logs/old.log").exists());
        assert_eq!(fs::read_to_string(shared.join(".env")).unwrap(), "");
    }

    #[test]
    fn existing_shared_content_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("shared");
        let release = dir.path().join("release");
        fs::create_dir_all(&shared).unwrap();
        fs::create_dir_all(&release).unwrap();
        fs::write(shared.join(".env"), "APP_KEY=secret").unwrap();

        link(&shared, &release, &items()).unwrap();
        link(&shared, &release, &items()).unwrap();

        assert_eq!(
            fs::read_to_string(release.join(".env")).unwrap(),
            "APP_KEY=secret"
        );
    }

    #[test]
    fn nested_item_under_linked_dir_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("shared");
        let release = dir.path().join("release");
        fs::create_dir_all(shared.join("storage/app")).unwrap();
        fs::create_dir_all(&release).unwrap();
        fs::write(shared.join("storage/app/upload.png"), "precious").unwrap();
        let nested = [
            SharedItem::new("storage", SharedKind::Dir),
            SharedItem::new("storage/app", SharedKind::Dir),
        ];

        let err = link(&shared, &release, &nested).unwrap_err();

        assert!(matches!(err, DeployError::Config(ref msg) if msg.contains("symlink")));
        assert_eq!(
            fs::read_to_string(shared.join("storage/app/upload.png")).unwrap(),
            "precious"
        );
        assert!(shared.join("storage/app").is_dir());
    }

    #[test]
    fn release_root_is_never_an_item() {
        let dir = tempfile::tempdir().unwrap();
        let release = dir.path().join("release");
        fs::create_dir_all(&release).unwrap();
        fs::write(release.join("index.html"), "shipped").unwrap();

        for name in [".", "./"] {
            let item = SharedItem::new(name, SharedKind::Dir);
            assert!(link(&dir.path().join("shared"), &release, &[item]).is_err());
        }
        assert!(release.join("index.html").is_file());
    }
}
