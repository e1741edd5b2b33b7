//! Repository state cache
//!
//! Each open repository has one immutable [`RepositoryState`]. Job results and
//! watcher invalidations never edit it in place: the [`StateCache`] builds a
//! successor from the current value and swaps the `Arc`.

mod cache;

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use cache::{StateCache, StateChange};

use crate::diff::FileDiff;
use crate::git::{Commit, CommitId, ConflictState, DiffTarget, Ref, StatusReport};
use crate::graph::{self, GraphLayout};
use crate::job::JobId;
use crate::watch::Sections;

/// Unique identifier for an open repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId(Uuid);

impl RepoId {
    /// Create a new random repository ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for RepoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Use first 8 chars for display
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Diffs for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffSet {
    pub target: DiffTarget,
    pub files: Vec<FileDiff>,
}

/// A job submitted for this repository whose result has not arrived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJob {
    pub id: JobId,
    pub description: String,
    pub was_write: bool,
    /// Invalidation epoch at submission; a read started before the latest
    /// invalidation cannot make its section fresh
    pub epoch: u64,
}

/// Loaded commits plus their lazily computed layout
#[derive(Debug, Default)]
pub struct CommitWindow {
    pub commits: Vec<Arc<Commit>>,
    /// No older commits remain
    pub exhausted: bool,
    graph: OnceLock<Arc<GraphLayout>>,
}

impl CommitWindow {
    pub fn new(commits: Vec<Arc<Commit>>, exhausted: bool) -> Self {
        Self {
            commits,
            exhausted,
            graph: OnceLock::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

/// Snapshot of everything known about one repository
#[derive(Debug, Clone)]
pub struct RepositoryState {
    pub repo: RepoId,
    pub workdir: PathBuf,
    /// Incremented on every swap
    pub generation: u64,
    pub refs: Arc<Vec<Ref>>,
    pub window: Arc<CommitWindow>,
    pub selected_commit: Option<CommitId>,
    pub status: Option<Arc<StatusReport>>,
    pub diffs: Option<Arc<DiffSet>>,
    pub conflict: Option<ConflictState>,
    /// Sections whose cached value may be outdated
    pub stale: Sections,
    /// Incremented on every invalidation
    pub epoch: u64,
    /// False once the repository vanished from disk
    pub available: bool,
    pub last_error: Option<String>,
    pub pending: Vec<PendingJob>,
    palette_size: usize,
}

impl RepositoryState {
    /// Fresh state for a repository that was just opened; everything is stale
    pub fn new(repo: RepoId, workdir: PathBuf, palette_size: usize) -> Self {
        Self {
            repo,
            workdir,
            generation: 0,
            refs: Arc::new(Vec::new()),
            window: Arc::new(CommitWindow::default()),
            selected_commit: None,
            status: None,
            diffs: None,
            conflict: None,
            stale: Sections::ALL,
            epoch: 0,
            available: true,
            last_error: None,
            pending: Vec::new(),
            palette_size,
        }
    }

    /// Graph layout of the commit window, computed on first use
    pub fn graph(&self) -> Arc<GraphLayout> {
        Arc::clone(self.window.graph.get_or_init(|| {
            Arc::new(graph::layout_with_palette(
                &self.window.commits,
                self.palette_size,
            ))
        }))
    }

    pub fn is_stale(&self, sections: Sections) -> bool {
        self.stale.intersects(sections)
    }

    /// The checked-out branch, if any
    pub fn head_ref(&self) -> Option<&Ref> {
        self.refs.iter().find(|r| r.is_head)
    }

    pub fn selected(&self) -> Option<&Arc<Commit>> {
        let id = self.selected_commit.as_ref()?;
        self.window.commits.iter().find(|c| &c.id == id)
    }

    pub fn has_pending_write(&self) -> bool {
        self.pending.iter().any(|p| p.was_write)
    }
}
