//! Repository access
//!
//! - [`RepoRead`] / [`RepoWrite`] - capability traits the rest of the crate uses
//! - [`GitRepository`] - gitoxide for object reads, the git executable for everything that mutates
//! - [`InMemoryRepository`] - deterministic stand-in for tests

mod backend;
mod cli;
pub mod fake;
mod porcelain;
mod repository;
mod types;
pub mod validate;
mod write;

pub use backend::{CommitWalk, GitResult, RepoRead, RepoWrite};
pub use cli::{DEFAULT_GIT_PROGRAM, GitCli, GitOutput};
pub use fake::InMemoryRepository;
pub use repository::GitRepository;
pub use types::*;
