//! Read-then-swap cache of repository states

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{CommitWindow, DiffSet, PendingJob, RepoId, RepositoryState};
use crate::error::{Error, GitError};
use crate::git::{CommitId, RefReconciliation, WriteOutcome};
use crate::job::{JobId, JobOutput, JobResult};
use crate::watch::Sections;

/// Buffered notifications per subscriber before the oldest are dropped
const CHANGE_CAPACITY: usize = 256;

/// Notification sent after every swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Opened(RepoId),
    /// New data arrived for `sections`
    Updated {
        repo: RepoId,
        generation: u64,
        sections: Sections,
    },
    /// `sections` went stale
    Invalidated {
        repo: RepoId,
        generation: u64,
        sections: Sections,
    },
    /// The repository can no longer be read
    Unavailable { repo: RepoId, reason: String },
    Closed(RepoId),
}

impl StateChange {
    pub fn repo(&self) -> RepoId {
        match self {
            StateChange::Opened(repo) | StateChange::Closed(repo) => *repo,
            StateChange::Updated { repo, .. }
            | StateChange::Invalidated { repo, .. }
            | StateChange::Unavailable { repo, .. } => *repo,
        }
    }
}

/// Latest state of every open repository
pub struct StateCache {
    entries: RwLock<HashMap<RepoId, Arc<RepositoryState>>>,
    changes: broadcast::Sender<StateChange>,
    palette_size: usize,
}

impl StateCache {
    pub fn new(palette_size: usize) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            changes,
            palette_size,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    fn notify(&self, change: StateChange) {
        // No subscribers is fine
        let _ = self.changes.send(change);
    }

    pub fn open(&self, repo: RepoId, workdir: PathBuf) -> Arc<RepositoryState> {
        let state = Arc::new(RepositoryState::new(repo, workdir, self.palette_size));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(repo, Arc::clone(&state));
        info!(repo = %repo, "repository state created");
        self.notify(StateChange::Opened(repo));
        state
    }

    pub fn close(&self, repo: RepoId) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&repo)
            .is_some();
        if removed {
            info!(repo = %repo, "repository state dropped");
            self.notify(StateChange::Closed(repo));
        }
        removed
    }

    pub fn get(&self, repo: RepoId) -> Option<Arc<RepositoryState>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&repo)
            .cloned()
    }

    pub fn repos(&self) -> Vec<RepoId> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Build the successor of `repo`'s state and swap it in
    fn swap<F>(&self, repo: RepoId, update: F) -> Option<Arc<RepositoryState>>
    where
        F: FnOnce(&RepositoryState) -> RepositoryState,
    {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let current = entries.get(&repo)?;
        let mut next = update(current);
        next.generation = current.generation + 1;
        let next = Arc::new(next);
        entries.insert(repo, Arc::clone(&next));
        Some(next)
    }

    /// Remember a submitted job until its result arrives
    pub fn track(&self, repo: RepoId, id: JobId, description: String, was_write: bool) {
        self.swap(repo, |current| {
            let mut next = current.clone();
            next.pending.push(PendingJob {
                id,
                description,
                was_write,
                epoch: current.epoch,
            });
            next
        });
    }

    /// Mark sections stale after an external change
    pub fn invalidate(&self, repo: RepoId, sections: Sections) {
        if sections.is_empty() {
            return;
        }
        let swapped = self.swap(repo, |current| {
            let mut next = current.clone();
            next.stale |= sections;
            next.epoch += 1;
            next
        });
        if let Some(state) = swapped {
            debug!(repo = %repo, sections = %sections, "sections invalidated");
            self.notify(StateChange::Invalidated {
                repo,
                generation: state.generation,
                sections,
            });
        }
    }

    /// The repository disappeared or can no longer be watched
    pub fn mark_lost(&self, repo: RepoId, reason: String) {
        let swapped = self.swap(repo, |current| {
            let mut next = current.clone();
            next.available = false;
            next.stale = Sections::ALL;
            next.epoch += 1;
            next.last_error = Some(reason.clone());
            next
        });
        if swapped.is_some() {
            warn!(repo = %repo, reason = %reason, "repository unavailable");
            self.notify(StateChange::Unavailable { repo, reason });
        }
    }

    pub fn select_commit(&self, repo: RepoId, commit: Option<CommitId>) {
        let swapped = self.swap(repo, |current| {
            let mut next = current.clone();
            next.selected_commit = commit;
            next
        });
        if let Some(state) = swapped {
            self.notify(StateChange::Updated {
                repo,
                generation: state.generation,
                sections: Sections::NONE,
            });
        }
    }

    /// Fold a job result into the repository's state.
    ///
    /// Results of cancelled jobs are dropped, although a write that ran still
    /// invalidates what it touched. A read only makes its section fresh when
    /// no invalidation happened since it was submitted.
    pub fn apply(&self, result: &JobResult) -> Option<Arc<RepositoryState>> {
        let mut refreshed = Sections::NONE;
        let mut invalidated = Sections::NONE;

        let swapped = self.swap(result.repo, |current| {
            let mut next = current.clone();
            let epoch = match next.pending.iter().position(|p| p.id == result.job_id) {
                Some(index) => next.pending.remove(index).epoch,
                None => current.epoch,
            };

            if result.was_write && !result.never_started() {
                next.stale |= result.sections;
                next.epoch += 1;
                invalidated = result.sections;
            }
            if result.cancelled {
                return next;
            }

            match &result.outcome {
                Ok(output) => {
                    next.available = true;
                    next.last_error = None;
                    refreshed = apply_output(&mut next, output, epoch == current.epoch);
                }
                Err(error) => {
                    next.last_error = Some(error.to_string());
                    if error.is_repository_missing() {
                        next.available = false;
                        next.stale = Sections::ALL;
                    }
                    if let Error::Git(GitError::NetworkTimeout {
                        reconciliation: RefReconciliation::Requeried(refs),
                        ..
                    }) = error
                    {
                        next.refs = Arc::new(refs.clone());
                    }
                }
            }
            next
        });

        let state = swapped?;
        debug!(
            repo = %result.repo,
            job = %result.description,
            generation = state.generation,
            refreshed = %refreshed,
            invalidated = %invalidated,
            "applied job result"
        );
        if !invalidated.is_empty() {
            self.notify(StateChange::Invalidated {
                repo: result.repo,
                generation: state.generation,
                sections: invalidated,
            });
        }
        if !refreshed.is_empty() || !result.was_write {
            self.notify(StateChange::Updated {
                repo: result.repo,
                generation: state.generation,
                sections: refreshed,
            });
        }
        Some(state)
    }
}

/// Store a successful payload; returns the sections that received data
fn apply_output(next: &mut RepositoryState, output: &JobOutput, fresh: bool) -> Sections {
    let section = match output {
        JobOutput::Status(report) => {
            next.status = Some(Arc::new(report.clone()));
            Sections::STATUS
        }
        JobOutput::Commits(page) => {
            let loaded = next.window.len();
            let incoming = page.commits.iter().cloned().map(Arc::new);
            if page.skip == 0 {
                next.window = Arc::new(CommitWindow::new(incoming.collect(), page.exhausted));
            } else if page.skip == loaded {
                let mut commits = next.window.commits.clone();
                commits.extend(incoming);
                next.window = Arc::new(CommitWindow::new(commits, page.exhausted));
            } else {
                // A page for a window that has since been replaced
                return Sections::NONE;
            }
            Sections::COMMITS
        }
        JobOutput::Refs(refs) => {
            next.refs = Arc::new(refs.clone());
            Sections::REFS
        }
        JobOutput::Diff { target, files } => {
            next.diffs = Some(Arc::new(DiffSet {
                target: target.clone(),
                files: files.clone(),
            }));
            Sections::DIFF
        }
        JobOutput::Conflict(conflict) => {
            next.conflict = conflict.clone();
            Sections::CONFLICT
        }
        JobOutput::Write(WriteOutcome::Conflicted(conflict)) => {
            next.conflict = Some(conflict.clone());
            return Sections::NONE;
        }
        JobOutput::Write(_)
        | JobOutput::Blame { .. }
        | JobOutput::Search(_)
        | JobOutput::Content(_)
        | JobOutput::Remotes(_) => return Sections::NONE,
    };
    if fresh {
        next.stale.remove(section);
    }
    section
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::JobError;
    use crate::git::{BranchStatus, StatusReport};

    fn result(repo: RepoId, id: JobId, outcome: Result<JobOutput, Error>) -> JobResult {
        JobResult {
            job_id: id,
            repo,
            description: "status".into(),
            was_write: false,
            sections: Sections::STATUS,
            cancelled: false,
            outcome,
            elapsed: Duration::ZERO,
        }
    }

    fn status() -> JobOutput {
        JobOutput::Status(StatusReport {
            branch: BranchStatus {
                head: Some("main".into()),
                ..BranchStatus::default()
            },
            entries: Vec::new(),
        })
    }

    #[test]
    fn test_apply_swaps_and_clears_stale() {
        let cache = StateCache::new(8);
        let repo = RepoId::new();
        let before = cache.open(repo, PathBuf::from("/r"));
        let id = JobId::new();
        cache.track(repo, id, "status".into(), false);

        let after = cache.apply(&result(repo, id, Ok(status()))).unwrap();
        assert!(after.status.is_some());
        assert!(!after.is_stale(Sections::STATUS));
        assert!(after.pending.is_empty());
        assert!(after.generation > before.generation);
        // The old snapshot is untouched
        assert!(before.status.is_none());
    }

    #[test]
    fn test_read_started_before_invalidation_stays_stale() {
        let cache = StateCache::new(8);
        let repo = RepoId::new();
        cache.open(repo, PathBuf::from("/r"));
        let id = JobId::new();
        cache.track(repo, id, "status".into(), false);
        cache.invalidate(repo, Sections::STATUS);

        let state = cache.apply(&result(repo, id, Ok(status()))).unwrap();
        assert!(state.status.is_some());
        assert!(state.is_stale(Sections::STATUS));
    }

    #[test]
    fn test_cancelled_result_is_dropped() {
        let cache = StateCache::new(8);
        let repo = RepoId::new();
        cache.open(repo, PathBuf::from("/r"));
        let mut cancelled = result(repo, JobId::new(), Ok(status()));
        cancelled.cancelled = true;
        let state = cache.apply(&cancelled).unwrap();
        assert!(state.status.is_none());
    }

    #[test]
    fn test_missing_repository_marks_unavailable() {
        let cache = StateCache::new(8);
        let repo = RepoId::new();
        cache.open(repo, PathBuf::from("/r"));
        let failed = result(
            repo,
            JobId::new(),
            Err(GitError::RepositoryNotFound(PathBuf::from("/r")).into()),
        );
        let state = cache.apply(&failed).unwrap();
        assert!(!state.available);
        assert_eq!(state.stale, Sections::ALL);
        assert!(state.last_error.is_some());
    }

    #[test]
    fn test_write_invalidates_even_when_it_fails() {
        let cache = StateCache::new(8);
        let repo = RepoId::new();
        cache.open(repo, PathBuf::from("/r"));
        let mut write = result(
            repo,
            JobId::new(),
            Err(JobError::WorkerFailed(JobId::new(), "boom".into()).into()),
        );
        write.was_write = true;
        write.sections = Sections::REFS;
        let id = write.job_id;
        cache.track(repo, id, "fetch".into(), true);
        let before = cache.get(repo).unwrap().epoch;
        let state = cache.apply(&write).unwrap();
        assert!(state.epoch > before);
        assert!(state.is_stale(Sections::REFS));
        assert!(!state.has_pending_write());
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let cache = StateCache::new(8);
        let mut changes = cache.subscribe();
        let repo = RepoId::new();
        cache.open(repo, PathBuf::from("/r"));
        cache.invalidate(repo, Sections::REFS);
        cache.close(repo);

        assert_eq!(changes.recv().await.unwrap(), StateChange::Opened(repo));
        assert!(matches!(
            changes.recv().await.unwrap(),
            StateChange::Invalidated { sections, .. } if sections == Sections::REFS
        ));
        assert_eq!(changes.recv().await.unwrap(), StateChange::Closed(repo));
    }
}
