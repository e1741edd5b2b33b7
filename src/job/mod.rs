//! Background jobs
//!
//! A [`Job`] is a request against one repository's backend. Jobs run on the
//! [`Scheduler`]'s bounded worker pool; the outcome arrives asynchronously as
//! a [`JobResult`] through the [`JobHandle`] returned at submission.

mod scheduler;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use scheduler::{Completion, Scheduler, SchedulerConfig};

use crate::diff::{FileDiff, Hunk};
use crate::error::{Error, JobError};
use crate::git::{
    BlameLine, BlobHandle, Commit, CommitId, CommitPage, ConflictResolution, ConflictState,
    CredentialProvider, DiffTarget, GitResult, NoCredentials, PageRequest, PathFilter,
    RebaseStep, Ref, RemoteInfo, RepoWrite, ResetMode, SearchQuery, StashAction, StatusReport,
    WalkSpec, WriteOutcome,
};
use crate::state::RepoId;
use crate::watch::Sections;

/// Unique identifier for a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new random job ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Use first 8 chars for display
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Credential source attached to a network job
#[derive(Clone)]
pub struct CredentialHandle(Arc<dyn CredentialProvider>);

impl CredentialHandle {
    pub fn new(provider: impl CredentialProvider + 'static) -> Self {
        Self(Arc::new(provider))
    }

    pub fn provider(&self) -> &dyn CredentialProvider {
        self.0.as_ref()
    }
}

impl Default for CredentialHandle {
    fn default() -> Self {
        Self::new(NoCredentials)
    }
}

impl fmt::Debug for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialHandle")
    }
}

/// Side-effect free requests; any number may run at once
#[derive(Debug, Clone)]
pub enum ReadJob {
    Status,
    WalkCommits { spec: WalkSpec, page: PageRequest },
    ListRefs,
    ListRemotes,
    Diff { target: DiffTarget, filter: PathFilter },
    Blame { path: String, revision: Option<String> },
    Search(SearchQuery),
    ReadFileAt { path: String, revision: String },
    ConflictState,
    ReadBlob(BlobHandle),
}

/// Mutating requests; at most one runs per repository
#[derive(Debug, Clone)]
pub enum WriteJob {
    StagePaths(Vec<String>),
    UnstagePaths(Vec<String>),
    StageHunk { path: String, hunk: Hunk },
    UnstageHunk { path: String, hunk: Hunk },
    StageLines { path: String, hunk: Hunk, lines: BTreeSet<usize> },
    UnstageLines { path: String, hunk: Hunk, lines: BTreeSet<usize> },
    Commit { message: String, amend: bool },
    CheckoutBranch(String),
    CreateBranch { name: String, start: Option<String> },
    DeleteBranch { name: String, force: bool },
    RenameBranch { from: String, to: String },
    CherryPick(CommitId),
    Revert(CommitId),
    Reset { target: String, mode: ResetMode },
    Stash(StashAction),
    CreateTag { name: String, target: String, message: Option<String> },
    DeleteTag(String),
    Fetch { remote: String, credentials: CredentialHandle },
    Pull { remote: String, branch: Option<String>, credentials: CredentialHandle },
    Push { remote: String, refspec: Option<String>, force: bool, credentials: CredentialHandle },
    Merge(String),
    Rebase { onto: String, todo: Option<Vec<RebaseStep>> },
    ResolveConflict { path: String, resolution: ConflictResolution },
    ContinueOperation,
    AbortOperation,
}

impl WriteJob {
    /// Operations that talk to a remote and run under the network timeout
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            WriteJob::Fetch { .. } | WriteJob::Pull { .. } | WriteJob::Push { .. }
        )
    }

    /// Cached sections the operation may change
    pub fn invalidates(&self) -> Sections {
        let history = Sections::REFS | Sections::COMMITS;
        let tree = Sections::STATUS | Sections::DIFF;
        match self {
            WriteJob::StagePaths(_)
            | WriteJob::UnstagePaths(_)
            | WriteJob::StageHunk { .. }
            | WriteJob::UnstageHunk { .. }
            | WriteJob::StageLines { .. }
            | WriteJob::UnstageLines { .. } => tree,
            WriteJob::CreateBranch { .. }
            | WriteJob::DeleteBranch { .. }
            | WriteJob::RenameBranch { .. }
            | WriteJob::CreateTag { .. }
            | WriteJob::DeleteTag(_)
            | WriteJob::Fetch { .. } => history | Sections::STATUS,
            WriteJob::Push { .. } => Sections::REFS | Sections::STATUS,
            WriteJob::Commit { .. } | WriteJob::CheckoutBranch(_) | WriteJob::Reset { .. } => {
                history | tree
            }
            WriteJob::Stash(_) => Sections::REFS | tree,
            WriteJob::CherryPick(_)
            | WriteJob::Revert(_)
            | WriteJob::Pull { .. }
            | WriteJob::Merge(_)
            | WriteJob::Rebase { .. }
            | WriteJob::ResolveConflict { .. }
            | WriteJob::ContinueOperation
            | WriteJob::AbortOperation => Sections::ALL,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            WriteJob::StagePaths(paths) => format!("stage {}", paths.join(" ")),
            WriteJob::UnstagePaths(paths) => format!("unstage {}", paths.join(" ")),
            WriteJob::StageHunk { path, hunk } => format!("stage hunk {} {path}", hunk.header()),
            WriteJob::UnstageHunk { path, hunk } => {
                format!("unstage hunk {} {path}", hunk.header())
            }
            WriteJob::StageLines { path, lines, .. } => {
                format!("stage {} line(s) of {path}", lines.len())
            }
            WriteJob::UnstageLines { path, lines, .. } => {
                format!("unstage {} line(s) of {path}", lines.len())
            }
            WriteJob::Commit { amend: true, .. } => "amend commit".to_string(),
            WriteJob::Commit { .. } => "commit".to_string(),
            WriteJob::CheckoutBranch(name) => format!("checkout {name}"),
            WriteJob::CreateBranch { name, .. } => format!("create branch {name}"),
            WriteJob::DeleteBranch { name, .. } => format!("delete branch {name}"),
            WriteJob::RenameBranch { from, to } => format!("rename branch {from} to {to}"),
            WriteJob::CherryPick(id) => format!("cherry-pick {}", id.short()),
            WriteJob::Revert(id) => format!("revert {}", id.short()),
            WriteJob::Reset { target, mode } => format!("reset {} {target}", mode.flag()),
            WriteJob::Stash(action) => action.label().to_string(),
            WriteJob::CreateTag { name, .. } => format!("create tag {name}"),
            WriteJob::DeleteTag(name) => format!("delete tag {name}"),
            WriteJob::Fetch { remote, .. } => format!("fetch {remote}"),
            WriteJob::Pull { remote, .. } => format!("pull {remote}"),
            WriteJob::Push { remote, .. } => format!("push {remote}"),
            WriteJob::Merge(rev) => format!("merge {rev}"),
            WriteJob::Rebase { onto, todo: None } => format!("rebase onto {onto}"),
            WriteJob::Rebase { onto, .. } => format!("interactive rebase onto {onto}"),
            WriteJob::ResolveConflict { path, .. } => format!("resolve {path}"),
            WriteJob::ContinueOperation => "continue".to_string(),
            WriteJob::AbortOperation => "abort".to_string(),
        }
    }
}

impl ReadJob {
    /// Cached sections refreshed by the result
    pub fn refreshes(&self) -> Sections {
        match self {
            ReadJob::Status => Sections::STATUS,
            ReadJob::WalkCommits { .. } => Sections::COMMITS,
            ReadJob::ListRefs => Sections::REFS,
            ReadJob::Diff { .. } => Sections::DIFF,
            ReadJob::ConflictState => Sections::CONFLICT,
            ReadJob::ListRemotes
            | ReadJob::Blame { .. }
            | ReadJob::Search(_)
            | ReadJob::ReadFileAt { .. }
            | ReadJob::ReadBlob(_) => Sections::NONE,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ReadJob::Status => "status".to_string(),
            ReadJob::WalkCommits { page, .. } => {
                format!("log {}..{}", page.skip, page.skip + page.limit)
            }
            ReadJob::ListRefs => "list refs".to_string(),
            ReadJob::ListRemotes => "list remotes".to_string(),
            ReadJob::Diff { target, .. } => format!("diff {target:?}").to_lowercase(),
            ReadJob::Blame { path, .. } => format!("blame {path}"),
            ReadJob::Search(query) => format!("search {:?} {}", query.scope, query.text),
            ReadJob::ReadFileAt { path, revision } => format!("show {revision}:{path}"),
            ReadJob::ConflictState => "conflict state".to_string(),
            ReadJob::ReadBlob(blob) => format!("blob {blob}"),
        }
    }
}

/// A request against one repository
#[derive(Debug, Clone)]
pub enum Job {
    Read(ReadJob),
    Write(WriteJob),
}

impl Job {
    pub fn is_write(&self) -> bool {
        matches!(self, Job::Write(_))
    }

    /// Refreshed sections for reads, invalidated sections for writes
    pub fn sections(&self) -> Sections {
        match self {
            Job::Read(read) => read.refreshes(),
            Job::Write(write) => write.invalidates(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Job::Read(read) => read.describe(),
            Job::Write(write) => write.describe(),
        }
    }

    /// Run against a backend
    pub async fn execute(&self, backend: &dyn RepoWrite) -> GitResult<JobOutput> {
        match self {
            Job::Read(read) => execute_read(read, backend).await,
            Job::Write(write) => execute_write(write, backend).await.map(JobOutput::Write),
        }
    }
}

impl From<ReadJob> for Job {
    fn from(job: ReadJob) -> Self {
        Job::Read(job)
    }
}

impl From<WriteJob> for Job {
    fn from(job: WriteJob) -> Self {
        Job::Write(job)
    }
}

async fn execute_read(job: &ReadJob, backend: &dyn RepoWrite) -> GitResult<JobOutput> {
    Ok(match job {
        ReadJob::Status => JobOutput::Status(backend.status().await?),
        ReadJob::WalkCommits { spec, page } => {
            JobOutput::Commits(backend.walk_commits(spec, *page).await?)
        }
        ReadJob::ListRefs => JobOutput::Refs(backend.list_refs().await?),
        ReadJob::ListRemotes => JobOutput::Remotes(backend.list_remotes().await?),
        ReadJob::Diff { target, filter } => JobOutput::Diff {
            target: target.clone(),
            files: backend.diff(target, filter).await?,
        },
        ReadJob::Blame { path, revision } => JobOutput::Blame {
            path: path.clone(),
            lines: backend.blame_file(path, revision.as_deref()).await?,
        },
        ReadJob::Search(query) => JobOutput::Search(backend.search(query).await?),
        ReadJob::ReadFileAt { path, revision } => {
            JobOutput::Content(backend.read_file_at(path, revision).await?)
        }
        ReadJob::ConflictState => JobOutput::Conflict(backend.conflict_state().await?),
        ReadJob::ReadBlob(blob) => JobOutput::Content(backend.read_blob(blob).await?),
    })
}

async fn execute_write(job: &WriteJob, backend: &dyn RepoWrite) -> GitResult<WriteOutcome> {
    match job {
        WriteJob::StagePaths(paths) => backend.stage_paths(paths).await,
        WriteJob::UnstagePaths(paths) => backend.unstage_paths(paths).await,
        WriteJob::StageHunk { path, hunk } => backend.stage_hunk(path, hunk).await,
        WriteJob::UnstageHunk { path, hunk } => backend.unstage_hunk(path, hunk).await,
        WriteJob::StageLines { path, hunk, lines } => backend.stage_lines(path, hunk, lines).await,
        WriteJob::UnstageLines { path, hunk, lines } => {
            backend.unstage_lines(path, hunk, lines).await
        }
        WriteJob::Commit { message, amend } => backend.commit(message, *amend).await,
        WriteJob::CheckoutBranch(name) => backend.checkout_branch(name).await,
        WriteJob::CreateBranch { name, start } => {
            backend.create_branch(name, start.as_deref()).await
        }
        WriteJob::DeleteBranch { name, force } => backend.delete_branch(name, *force).await,
        WriteJob::RenameBranch { from, to } => backend.rename_branch(from, to).await,
        WriteJob::CherryPick(id) => backend.cherry_pick(id).await,
        WriteJob::Revert(id) => backend.revert(id).await,
        WriteJob::Reset { target, mode } => backend.reset(target, *mode).await,
        WriteJob::Stash(action) => backend.stash(action).await,
        WriteJob::CreateTag {
            name,
            target,
            message,
        } => backend.create_tag(name, target, message.as_deref()).await,
        WriteJob::DeleteTag(name) => backend.delete_tag(name).await,
        WriteJob::Fetch {
            remote,
            credentials,
        } => backend.fetch(remote, credentials.provider()).await,
        WriteJob::Pull {
            remote,
            branch,
            credentials,
        } => {
            backend
                .pull(remote, branch.as_deref(), credentials.provider())
                .await
        }
        WriteJob::Push {
            remote,
            refspec,
            force,
            credentials,
        } => {
            backend
                .push(remote, refspec.as_deref(), *force, credentials.provider())
                .await
        }
        WriteJob::Merge(rev) => backend.merge(rev).await,
        WriteJob::Rebase { onto, todo } => backend.rebase(onto, todo.as_deref()).await,
        WriteJob::ResolveConflict { path, resolution } => {
            backend.resolve_conflict(path, resolution).await
        }
        WriteJob::ContinueOperation => backend.continue_operation().await,
        WriteJob::AbortOperation => backend.abort_operation().await,
    }
}

/// Successful job payload
#[derive(Debug, Clone)]
pub enum JobOutput {
    Status(StatusReport),
    Commits(CommitPage),
    Refs(Vec<Ref>),
    Remotes(Vec<RemoteInfo>),
    Diff { target: DiffTarget, files: Vec<FileDiff> },
    Blame { path: String, lines: Vec<BlameLine> },
    Search(Vec<Commit>),
    /// File or blob content
    Content(Vec<u8>),
    Conflict(Option<ConflictState>),
    Write(WriteOutcome),
}

/// Outcome of one job
#[derive(Debug)]
pub struct JobResult {
    pub job_id: JobId,
    pub repo: RepoId,
    pub description: String,
    pub was_write: bool,
    /// Sections refreshed (reads) or invalidated (writes)
    pub sections: Sections,
    /// Cancellation was requested; set even when the job ran to completion
    pub cancelled: bool,
    pub outcome: Result<JobOutput, Error>,
    pub elapsed: Duration,
}

impl JobResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Whether the job was stopped before touching the repository
    pub fn never_started(&self) -> bool {
        matches!(self.outcome, Err(Error::Job(JobError::Cancelled(_))))
    }

    pub fn output(&self) -> Option<&JobOutput> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&Error> {
        self.outcome.as_ref().err()
    }
}

/// Caller's side of a submitted job
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    repo: RepoId,
    cancel: CancellationToken,
    result: oneshot::Receiver<Arc<JobResult>>,
}

impl JobHandle {
    pub(crate) fn new(
        id: JobId,
        repo: RepoId,
        cancel: CancellationToken,
        result: oneshot::Receiver<Arc<JobResult>>,
    ) -> Self {
        Self {
            id,
            repo,
            cancel,
            result,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn repo(&self) -> RepoId {
        self.repo
    }

    /// Request cancellation; a job that already started still completes
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the result
    pub async fn wait(self) -> Result<Arc<JobResult>, JobError> {
        self.result.await.map_err(|_| JobError::SchedulerClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_display_is_short() {
        let id = JobId::new();
        assert_eq!(id.to_string().len(), 8);
        assert_ne!(id, JobId::new());
    }

    #[test]
    fn test_network_jobs() {
        let fetch = WriteJob::Fetch {
            remote: "origin".into(),
            credentials: CredentialHandle::default(),
        };
        assert!(fetch.is_network());
        assert!(!WriteJob::Commit {
            message: "m".into(),
            amend: false
        }
        .is_network());
    }

    #[test]
    fn test_sections_per_job() {
        let stage = Job::Write(WriteJob::StagePaths(vec!["a".into()]));
        assert_eq!(stage.sections(), Sections::STATUS | Sections::DIFF);
        assert!(!stage.sections().contains(Sections::REFS));

        let commit = Job::Write(WriteJob::Commit {
            message: "m".into(),
            amend: false,
        });
        assert!(commit.sections().contains(Sections::REFS | Sections::COMMITS));

        assert_eq!(Job::Read(ReadJob::Status).sections(), Sections::STATUS);
        assert!(Job::Read(ReadJob::ListRemotes).sections().is_empty());
        assert!(Job::Read(ReadJob::Search(SearchQuery::new("x", crate::git::SearchScope::Message)))
            .sections()
            .is_empty());
    }
}
