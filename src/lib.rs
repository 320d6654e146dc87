//! Timestamped releases with an atomic `current` symlink.
//!
//! Estaleiro releases Laravel, Flask and React applications onto
//! a single Ubuntu host. Every deploy lands in its own
//! `releases/<YYYYMMDD_HHMMSS>/` directory; persistent files live
//! in `shared/` and are symlinked into each release; the web
//! server always serves the `current` symlink, which is swapped in
//! one `rename(2)` once a release is fully built.
//!
//! The name is Portuguese for *shipyard*: releases are built on
//! the slip, then launched.
//!
//! # Overview
//!
//! A [`Pipeline`] wires together:
//!
//! - a validated [`Config`] (YAML file or environment variables)
//! - a [`CommandRunner`](cmd::CommandRunner) for every external
//!   tool (`apt-get`, `git`, `composer`, `npm`, `nginx`,
//!   `certbot`, `systemctl`)
//! - a [`Stack`](stack::Stack) describing how a fetched tree is
//!   built and what proves the build finished
//!
//! # Deploy
//!
//! 1. **Prepare** - packages, service account, directory skeleton
//! 2. **Build** - shallow clone, link shared items, run the
//!    stack's step table, verify the build marker
//! 3. **Expose** - Nginx site on first deploy, certbot when SSL
//!    is enabled
//! 4. **Activate** - swap `current`, reload services, prune old
//!    releases
//!
//! A failure in steps 1-3 never touches `current`. A reload
//! failure after step 4 is reported as a warning.
//!
//! # Example
//!
//! ```rust,no_run
//! use estaleiro::cmd::SystemRunner;
//! use estaleiro::config::{Config, SharedKind, StackKind};
//! use estaleiro::Pipeline;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::new("shop.example.com", "https://github.com/acme/shop.git")
//!         .stack(StackKind::Laravel)
//!         .branch("production")
//!         .keep_releases(5)
//!         .shared(".env", SharedKind::File)
//!         .shared("storage", SharedKind::Dir)
//!         .ssl("ops@example.com");
//!     config.validate()?;
//!
//!     let runner = SystemRunner::new()?;
//!     let outcome = Pipeline::new(&config, &runner).deploy()?;
//!     println!("{outcome}");
//!     Ok(())
//! }
//! ```
//!
//! The `estaleiro` binary exposes the same operations:
//!
//! ```sh
//! DOMAIN=shop.example.com REPO_URL=https://github.com/acme/shop.git \
//!     STACK=laravel estaleiro deploy
//!
//! estaleiro --config deploy.yml releases
//! estaleiro --config deploy.yml rollback 20240309_070509
//! ```

// Allow noisy pedantic lints that don't add value for a
// deployment tool crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod activate;
pub mod builder;
pub mod cmd;
pub mod config;
pub mod error;
pub mod layout;
pub mod lock;
pub mod outcome;
pub mod pipeline;
pub mod provision;
pub mod proxy;
pub mod prune;
pub mod release;
pub mod shared;
pub mod stack;

pub use config::{Config, SharedItem, SharedKind, StackKind};
pub use error::{DeployError, DeployResult};
pub use layout::Layout;
pub use outcome::{DeployOutcome, Warning};
pub use pipeline::Pipeline;
pub use release::{Release, ReleaseId};
