//! Error types for gitweave
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `Display` and `Error` impls.
//! Adapter failures are typed so they can travel inside a [`crate::job::JobResult`] unchanged.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::git::{ConflictState, RefReconciliation, SearchScope};
use crate::job::JobId;
use crate::state::RepoId;

/// Top-level error type for gitweave
#[derive(Error, Debug)]
pub enum Error {
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Watcher error: {0}")]
    Watch(#[from] WatchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Suggestion provider failed: {0}")]
    Suggestion(String),
}

impl Error {
    /// The repository-level error, if this is one.
    pub fn as_git(&self) -> Option<&GitError> {
        match self {
            Error::Git(e) => Some(e),
            _ => None,
        }
    }

    /// Copy of a shared error; IO errors keep only their kind and message.
    pub fn duplicate(&self) -> Error {
        match self {
            Error::Git(e) => Error::Git(e.clone()),
            Error::Job(e) => Error::Job(e.clone()),
            Error::Watch(e) => Error::Watch(e.clone()),
            Error::Config(e) => Error::Config(e.clone()),
            Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
            Error::Suggestion(reason) => Error::Suggestion(reason.clone()),
        }
    }

    /// True when the failure means the repository vanished or never existed.
    pub fn is_repository_missing(&self) -> bool {
        matches!(self, Error::Git(GitError::RepositoryNotFound(_)))
    }
}

/// Repository access errors (read and write adapters)
#[derive(Error, Debug, Clone)]
pub enum GitError {
    #[error("Not a git repository: {0}")]
    RepositoryNotFound(PathBuf),

    #[error("Repository is corrupt or unreadable: {0}")]
    RepositoryCorrupt(String),

    #[error("Path is not tracked: {0}")]
    PathNotTracked(String),

    #[error("Cannot resolve revision '{0}'")]
    RevisionUnresolvable(String),

    #[error("Index has unresolved conflicts: {}", .0.join(", "))]
    IndexConflict(Vec<String>),

    #[error("{} stopped with {} conflicted path(s)", .0.operation, .0.paths.len())]
    MergeConflict(ConflictState),

    #[error("git {command} failed ({}): {stderr}", exit_label(*code))]
    ExternalToolFailure {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{operation} timed out after {after:?} ({reconciliation})")]
    NetworkTimeout {
        operation: String,
        after: Duration,
        reconciliation: RefReconciliation,
    },

    #[error("Authentication required for remote '{remote}'")]
    AuthenticationRequired { remote: String },

    #[error("Binary content cannot be diffed as text: {0}")]
    BinaryContentUnsupported(String),

    #[error("Search scope '{0}' is not supported by this backend")]
    UnsupportedSearchScope(SearchScope),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(String),
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated".to_string(),
    }
}

/// Job scheduling errors
#[derive(Error, Debug, Clone)]
pub enum JobError {
    #[error("Job {0} was cancelled")]
    Cancelled(JobId),

    #[error("Job {0} failed inside its worker: {1}")]
    WorkerFailed(JobId, String),

    #[error("Job scheduler has shut down")]
    SchedulerClosed,

    #[error("Repository {0} is not open")]
    RepositoryClosed(RepoId),
}

/// Repository watcher errors
#[derive(Error, Debug, Clone)]
pub enum WatchError {
    #[error("Failed to start watching {path}: {reason}")]
    Init { path: PathBuf, reason: String },

    #[error("Control directory disappeared: {0}")]
    Lost(PathBuf),
}

/// Configuration errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to create config directory: {0}")]
    DirectoryCreationFailed(PathBuf),
}

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, Error>;

impl From<gix::open::Error> for GitError {
    fn from(e: gix::open::Error) -> Self {
        GitError::RepositoryCorrupt(e.to_string())
    }
}

impl From<gix::discover::Error> for GitError {
    fn from(e: gix::discover::Error) -> Self {
        GitError::RepositoryCorrupt(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GitError::RepositoryNotFound(PathBuf::from("/tmp/foo"));
        assert!(err.to_string().contains("/tmp/foo"));

        let err = GitError::ExternalToolFailure {
            command: "rebase --continue".to_string(),
            code: Some(128),
            stderr: "fatal: no rebase in progress".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("exit code 128"));
        assert!(text.contains("no rebase in progress"));

        let err = GitError::IndexConflict(vec!["a.txt".into(), "b.txt".into()]);
        assert!(err.to_string().contains("a.txt, b.txt"));

        let err = JobError::Cancelled(JobId::new());
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn test_error_conversion() {
        let git_err = GitError::PathNotTracked("src/lib.rs".to_string());
        let top: Error = git_err.into();
        assert!(top.as_git().is_some());
        assert!(!top.is_repository_missing());

        let top: Error = GitError::RepositoryNotFound(PathBuf::from("/gone")).into();
        assert!(top.is_repository_missing());

        let job_err = JobError::SchedulerClosed;
        let top: Error = job_err.into();
        assert!(top.as_git().is_none());
    }
}
