#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, TimeDelta};
use estaleiro::cmd::{CommandOutput, CommandSpec, RecordingRunner};
use estaleiro::config::{Config, SharedKind, StackKind};
use estaleiro::release::SteppingClock;

pub const DOMAIN: &str = "app.example.com";

/// One minute per deploy starting at 2024-03-09 10:00:00.
pub fn clock() -> SteppingClock {
    let start = NaiveDate::from_ymd_opt(2024, 3, 9)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap();
    SteppingClock::new(start, TimeDelta::minutes(1))
}

pub fn config(base: &Path, stack: StackKind) -> Config {
    let config = Config::new(DOMAIN, "https://git.example.com/app.git")
        .stack(stack)
        .base_dir(base.join("www"))
        .nginx_dir(base.join("nginx"))
        .install_packages(false)
        .shared(".env", SharedKind::File)
        .shared("uploads", SharedKind::Dir);
    config.validate().unwrap();
    config
}

pub fn react_config(base: &Path, keep: usize) -> Config {
    config(base, StackKind::React).keep_releases(keep)
}

fn clone_dest(spec: &CommandSpec) -> PathBuf {
    let dest = PathBuf::from(spec.args.last().unwrap());
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join(".env"), "APP_ENV=shipped").unwrap();
    dest
}

fn cwd(spec: &CommandSpec) -> PathBuf {
    spec.cwd.clone().unwrap()
}

/// Fake `git clone` producing a Vite app and a fake build that
/// writes `build/index.html`.
pub fn with_react_tree(runner: RecordingRunner) -> RecordingRunner {
    runner
        .on("git clone", |spec| {
            let dest = clone_dest(spec);
            fs::write(
                dest.join("package.json"),
                r#"{"scripts":{"build":"vite build --outDir build"}}"#,
            )
            .unwrap();
            fs::write(dest.join("package-lock.json"), "{}").unwrap();
            fs::create_dir_all(dest.join("uploads")).unwrap();
            fs::write(dest.join("uploads/placeholder.png"), "shipped").unwrap();
            CommandOutput::ok("")
        })
        .on("npm run build", |spec| {
            let build = cwd(spec).join("build");
            fs::create_dir_all(&build).unwrap();
            fs::write(build.join("index.html"), "<html>app</html>").unwrap();
            CommandOutput::ok("")
        })
        .on("git rev-parse HEAD", |_| CommandOutput::ok("4f2a9c1\n"))
}

/// Fake Laravel tree: composer install writes the autoloader.
pub fn with_laravel_tree(runner: RecordingRunner) -> RecordingRunner {
    runner
        .on("git clone", |spec| {
            let dest = clone_dest(spec);
            fs::write(dest.join("composer.json"), "{}").unwrap();
            fs::create_dir_all(dest.join("public")).unwrap();
            fs::write(dest.join("public/index.php"), "<?php").unwrap();
            CommandOutput::ok("")
        })
        .on("composer install", |spec| {
            let vendor = cwd(spec).join("vendor");
            fs::create_dir_all(&vendor).unwrap();
            fs::write(vendor.join("autoload.php"), "<?php").unwrap();
            CommandOutput::ok("")
        })
}

/// Fake Flask tree shipping its WSGI entry point.
pub fn with_flask_tree(runner: RecordingRunner) -> RecordingRunner {
    runner.on("git clone", |spec| {
        let dest = clone_dest(spec);
        fs::write(dest.join("requirements.txt"), "flask\ngunicorn\n").unwrap();
        fs::write(dest.join("wsgi.py"), "from app import app\n").unwrap();
        CommandOutput::ok("")
    })
}

pub fn release_names(config: &Config) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(config.domain_root().join("releases"))
        .map(|entries| {
            entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

pub fn current_target(config: &Config) -> Option<PathBuf> {
    fs::read_link(config.domain_root().join("current")).ok()
}
