//! Repository capability traits
//!
//! Reading and mutating are separate capabilities: `RepoRead` is side-effect
//! free and may run concurrently, `RepoWrite` is serialized per repository by
//! the scheduler. Both the real repository and the in-memory fake implement them.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::types::{
    BlameLine, BlobHandle, Commit, CommitId, CommitPage, ConflictResolution, ConflictState,
    CredentialProvider, DiffTarget, PageRequest, PathFilter, RebaseStep, Ref, RemoteInfo,
    ResetMode, SearchQuery, StashAction, StatusReport, WalkSpec, WriteOutcome,
};
use crate::diff::{FileDiff, Hunk};
use crate::error::GitError;

pub type GitResult<T> = std::result::Result<T, GitError>;

/// Side-effect free repository access
#[async_trait]
pub trait RepoRead: Send + Sync {
    /// Root of the working tree
    fn workdir(&self) -> &Path;

    /// The control directory (`.git`) watched for external changes
    fn control_dir(&self) -> &Path;

    async fn status(&self) -> GitResult<StatusReport>;

    /// One page of history, children before parents
    async fn walk_commits(&self, spec: &WalkSpec, page: PageRequest) -> GitResult<CommitPage>;

    async fn list_refs(&self) -> GitResult<Vec<Ref>>;

    /// Configured remotes, sorted by name
    async fn list_remotes(&self) -> GitResult<Vec<RemoteInfo>>;

    /// index → working tree; untracked files appear as added
    async fn diff_workdir(&self, filter: &PathFilter) -> GitResult<Vec<FileDiff>>;

    /// HEAD → index
    async fn diff_staged(&self, filter: &PathFilter) -> GitResult<Vec<FileDiff>>;

    /// First parent → commit (empty tree for a root commit)
    async fn diff_commit(&self, id: &CommitId) -> GitResult<Vec<FileDiff>>;

    /// Blame at `revision`, or the working tree when `None`
    async fn blame_file(&self, path: &str, revision: Option<&str>) -> GitResult<Vec<BlameLine>>;

    async fn search(&self, query: &SearchQuery) -> GitResult<Vec<Commit>>;

    async fn read_file_at(&self, path: &str, revision: &str) -> GitResult<Vec<u8>>;

    /// The suspended operation, if any
    async fn conflict_state(&self) -> GitResult<Option<ConflictState>>;

    async fn read_blob(&self, blob: &BlobHandle) -> GitResult<Vec<u8>>;

    async fn diff(&self, target: &DiffTarget, filter: &PathFilter) -> GitResult<Vec<FileDiff>> {
        match target {
            DiffTarget::Workdir => self.diff_workdir(filter).await,
            DiffTarget::Staged => self.diff_staged(filter).await,
            DiffTarget::Commit(id) => {
                let files = self.diff_commit(id).await?;
                Ok(files.into_iter().filter(|f| filter.matches(&f.path)).collect())
            }
        }
    }
}

/// Mutating repository access.
///
/// Every method either completes, leaves a [`ConflictState`] behind (reported
/// as [`WriteOutcome::Conflicted`]) or fails without changing anything.
#[async_trait]
pub trait RepoWrite: RepoRead {
    async fn stage_paths(&self, paths: &[String]) -> GitResult<WriteOutcome>;
    async fn unstage_paths(&self, paths: &[String]) -> GitResult<WriteOutcome>;

    /// Apply one hunk of the workdir diff to the index
    async fn stage_hunk(&self, path: &str, hunk: &Hunk) -> GitResult<WriteOutcome>;

    /// Remove one hunk of the staged diff from the index
    async fn unstage_hunk(&self, path: &str, hunk: &Hunk) -> GitResult<WriteOutcome>;

    /// Stage the selected changed lines (indices into `hunk.lines`)
    async fn stage_lines(
        &self,
        path: &str,
        hunk: &Hunk,
        lines: &BTreeSet<usize>,
    ) -> GitResult<WriteOutcome>;

    async fn unstage_lines(
        &self,
        path: &str,
        hunk: &Hunk,
        lines: &BTreeSet<usize>,
    ) -> GitResult<WriteOutcome>;

    async fn commit(&self, message: &str, amend: bool) -> GitResult<WriteOutcome>;

    async fn checkout_branch(&self, name: &str) -> GitResult<WriteOutcome>;
    async fn create_branch(&self, name: &str, start: Option<&str>) -> GitResult<WriteOutcome>;
    async fn delete_branch(&self, name: &str, force: bool) -> GitResult<WriteOutcome>;
    async fn rename_branch(&self, from: &str, to: &str) -> GitResult<WriteOutcome>;

    async fn cherry_pick(&self, id: &CommitId) -> GitResult<WriteOutcome>;
    async fn revert(&self, id: &CommitId) -> GitResult<WriteOutcome>;
    async fn reset(&self, target: &str, mode: ResetMode) -> GitResult<WriteOutcome>;
    async fn stash(&self, action: &StashAction) -> GitResult<WriteOutcome>;

    /// Lightweight tag, or annotated when a message is given
    async fn create_tag(
        &self,
        name: &str,
        target: &str,
        message: Option<&str>,
    ) -> GitResult<WriteOutcome>;
    async fn delete_tag(&self, name: &str) -> GitResult<WriteOutcome>;

    async fn fetch(
        &self,
        remote: &str,
        credentials: &dyn CredentialProvider,
    ) -> GitResult<WriteOutcome>;
    async fn pull(
        &self,
        remote: &str,
        branch: Option<&str>,
        credentials: &dyn CredentialProvider,
    ) -> GitResult<WriteOutcome>;
    async fn push(
        &self,
        remote: &str,
        refspec: Option<&str>,
        force: bool,
        credentials: &dyn CredentialProvider,
    ) -> GitResult<WriteOutcome>;

    async fn merge(&self, revision: &str) -> GitResult<WriteOutcome>;

    /// Rebase the current branch onto `onto`; with `todo`, run it interactively
    async fn rebase(&self, onto: &str, todo: Option<&[RebaseStep]>) -> GitResult<WriteOutcome>;

    async fn resolve_conflict(
        &self,
        path: &str,
        resolution: &ConflictResolution,
    ) -> GitResult<WriteOutcome>;

    /// Resume the suspended operation; with paths still unresolved the
    /// current conflict state is returned and nothing runs
    async fn continue_operation(&self) -> GitResult<WriteOutcome>;
    async fn abort_operation(&self) -> GitResult<WriteOutcome>;

    /// Whether [`RepoWrite::restore_refs`] is all-or-nothing
    fn supports_atomic_ref_updates(&self) -> bool;

    /// Make the branch and tag refs equal `snapshot`: refs in the snapshot are
    /// reset to their recorded targets, refs absent from it are deleted
    async fn restore_refs(&self, snapshot: &[Ref]) -> GitResult<()>;
}

/// Lazy, restartable walk over history.
///
/// Pages are requested on demand so a large history is never materialized
/// at once.
pub struct CommitWalk<R: RepoRead + ?Sized> {
    backend: Arc<R>,
    spec: WalkSpec,
    page_size: usize,
    cursor: usize,
    exhausted: bool,
}

impl<R: RepoRead + ?Sized> CommitWalk<R> {
    pub fn new(backend: Arc<R>, spec: WalkSpec, page_size: usize) -> Self {
        Self {
            backend,
            spec,
            page_size: page_size.max(1),
            cursor: 0,
            exhausted: false,
        }
    }

    /// Next page, or `None` once history is exhausted
    pub async fn next_page(&mut self) -> GitResult<Option<Vec<Commit>>> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self
            .backend
            .walk_commits(
                &self.spec,
                PageRequest {
                    skip: self.cursor,
                    limit: self.page_size,
                },
            )
            .await?;
        self.cursor += page.commits.len();
        self.exhausted = page.exhausted || page.commits.is_empty();
        debug!(cursor = self.cursor, exhausted = self.exhausted, "commit walk page");
        if page.commits.is_empty() {
            Ok(None)
        } else {
            Ok(Some(page.commits))
        }
    }

    /// Start again from the newest commit (refs may have moved)
    pub fn restart(&mut self) {
        self.cursor = 0;
        self.exhausted = false;
    }

    /// Commits yielded so far
    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
