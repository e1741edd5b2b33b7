//! gitweave - the data and processing core of a desktop git client
//!
//! This crate turns a repository on disk into the structures a user interface
//! renders and mutates, and keeps all repository access off latency-sensitive
//! threads.
//!
//! # Architecture
//!
//! Requests become [`job::Job`]s on a bounded [`job::Scheduler`] that
//! serializes writes per repository and runs reads concurrently. Results are
//! folded into an immutable [`state::RepositoryState`] that the
//! [`state::StateCache`] swaps on every change. A [`watch::RepoWatcher`] marks
//! cached sections stale when the repository changes underneath the process.
//!
//! # Modules
//!
//! - [`diff`] - Line and word level diffs with stable hunk ids
//! - [`graph`] - Commit graph lane layout
//! - [`git`] - Read/write repository adapters (gitoxide plus the git CLI) and an in-memory fake
//! - [`job`] - Background job scheduling
//! - [`watch`] - Control directory watching and debouncing
//! - [`state`] - Per-repository state cache
//! - [`workspace`] - Single entry point tying the above together
//! - [`suggest`] - Commit message suggestion seam
//! - [`config`] - Configuration
//! - [`error`] - Error types

pub mod config;
pub mod diff;
pub mod error;
pub mod git;
pub mod graph;
pub mod job;
pub mod state;
pub mod suggest;
pub mod watch;
pub mod workspace;

pub use config::Config;
pub use error::{Error, Result};
pub use job::{Job, JobHandle, JobId, JobOutput, JobResult, ReadJob, WriteJob};
pub use state::{RepoId, RepositoryState, StateChange};
pub use suggest::SuggestionProvider;
pub use workspace::Workspace;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
