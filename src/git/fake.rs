//! In-memory repository for deterministic tests
//!
//! Implements both capability traits over plain maps. Writes can be slowed
//! down and every write records `begin:<op>` / `end:<op>` in an operation log,
//! which makes ordering guarantees observable. Operations that need git's
//! merge machinery (cherry-pick, revert, merge, rebase, conflict handling)
//! report [`GitError::Unsupported`].

use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use regex::RegexBuilder;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_128;

use super::backend::{GitResult, RepoRead, RepoWrite};
use super::types::{
    BlameLine, BlobHandle, BranchStatus, Commit, CommitId, CommitPage, ConflictResolution,
    ConflictState, CredentialProvider, CredentialRequest, Credentials, PageRequest, PathFilter,
    RebaseStep, Ref, RefKind, RemoteInfo, ResetMode, SearchQuery, SearchScope, Signature,
    StashAction, StatusEntry, StatusReport, WalkSpec, WriteOutcome,
};
use super::validate;
use crate::diff::patch::{self, Direction, PatchHunk};
use crate::diff::{
    BinaryMode, ChangeKind, DiffInput, DiffOptions, FileDiff, Hunk, LineOrigin, diff_file,
    diff_text,
};
use crate::error::GitError;

/// Epoch of the fake clock; each commit advances it by a minute
const CLOCK_START: i64 = 1_700_000_000;

type Tree = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Head {
    /// Full ref name; may be unborn
    Branch(String),
    Detached(CommitId),
}

struct StoredCommit {
    commit: Commit,
    tree: Tree,
}

struct Stash {
    id: CommitId,
    index: Tree,
    workdir: Tree,
}

struct FakeState {
    commits: HashMap<CommitId, StoredCommit>,
    refs: BTreeMap<String, CommitId>,
    head: Head,
    index: Tree,
    workdir: Tree,
    /// Newest first, like `stash@{0}`
    stashes: Vec<Stash>,
    /// remote → branch → commit, the state a fetch would see
    remotes: BTreeMap<String, BTreeMap<String, CommitId>>,
    required_credentials: Option<Credentials>,
    tick: i64,
}

fn signature(time: i64) -> Signature {
    Signature {
        name: "Test Author".to_string(),
        email: "author@example.com".to_string(),
        time: Utc.timestamp_opt(time, 0).single().unwrap_or_default(),
    }
}

fn unresolvable(rev: &str) -> GitError {
    GitError::RevisionUnresolvable(rev.to_string())
}

impl FakeState {
    fn new() -> Self {
        Self {
            commits: HashMap::new(),
            refs: BTreeMap::new(),
            head: Head::Branch("refs/heads/main".to_string()),
            index: Tree::new(),
            workdir: Tree::new(),
            stashes: Vec::new(),
            remotes: BTreeMap::new(),
            required_credentials: None,
            tick: 0,
        }
    }

    fn head_id(&self) -> Option<CommitId> {
        match &self.head {
            Head::Branch(name) => self.refs.get(name).cloned(),
            Head::Detached(id) => Some(id.clone()),
        }
    }

    fn head_branch(&self) -> Option<&str> {
        match &self.head {
            Head::Branch(name) => Some(name.as_str()),
            Head::Detached(_) => None,
        }
    }

    fn tree(&self, id: &CommitId) -> GitResult<&Tree> {
        self.commits
            .get(id)
            .map(|c| &c.tree)
            .ok_or_else(|| unresolvable(id.as_str()))
    }

    fn head_tree(&self) -> Tree {
        self.head_id()
            .and_then(|id| self.commits.get(&id))
            .map(|c| c.tree.clone())
            .unwrap_or_default()
    }

    fn commit(&self, id: &CommitId) -> GitResult<&Commit> {
        self.commits
            .get(id)
            .map(|c| &c.commit)
            .ok_or_else(|| unresolvable(id.as_str()))
    }

    fn resolve(&self, rev: &str) -> GitResult<CommitId> {
        validate::revision(rev)?;
        let split = rev.find(['~', '^']).unwrap_or(rev.len());
        let (base, mut suffix) = rev.split_at(split);

        let mut id = match base {
            "HEAD" | "@" => self.head_id().ok_or_else(|| unresolvable(rev))?,
            _ => self.resolve_name(base).ok_or_else(|| unresolvable(rev))?,
        };

        while let Some(op) = suffix.chars().next() {
            suffix = &suffix[1..];
            let digits = suffix.chars().take_while(char::is_ascii_digit).count();
            let n: usize = if digits == 0 {
                1
            } else {
                suffix[..digits].parse().map_err(|_| unresolvable(rev))?
            };
            suffix = &suffix[digits..];
            let parents = |id: &CommitId| -> GitResult<Vec<CommitId>> {
                Ok(self.commit(id)?.parents.clone())
            };
            id = match op {
                '^' if n == 0 => id,
                '^' => parents(&id)?
                    .get(n - 1)
                    .cloned()
                    .ok_or_else(|| unresolvable(rev))?,
                _ => {
                    for _ in 0..n {
                        id = parents(&id)?
                            .first()
                            .cloned()
                            .ok_or_else(|| unresolvable(rev))?;
                    }
                    id
                }
            };
        }
        Ok(id)
    }

    fn resolve_name(&self, name: &str) -> Option<CommitId> {
        let candidates = [
            name.to_string(),
            format!("refs/heads/{name}"),
            format!("refs/tags/{name}"),
            format!("refs/remotes/{name}"),
        ];
        if let Some(id) = candidates.iter().find_map(|c| self.refs.get(c)) {
            return Some(id.clone());
        }
        let prefix = CommitId::parse(name).ok()?;
        let mut matches = self
            .commits
            .keys()
            .filter(|id| id.as_str().starts_with(prefix.as_str()));
        match (matches.next(), matches.next()) {
            (Some(id), None) => Some(id.clone()),
            _ => None,
        }
    }

    fn new_commit(&mut self, parents: Vec<CommitId>, tree: Tree, message: &str) -> CommitId {
        self.tick += 1;
        let time = CLOCK_START + self.tick * 60;

        let mut buf = Vec::new();
        for parent in &parents {
            buf.extend_from_slice(parent.as_str().as_bytes());
            buf.push(0);
        }
        buf.extend_from_slice(message.as_bytes());
        buf.extend_from_slice(&time.to_le_bytes());
        for (path, content) in &tree {
            buf.extend_from_slice(path.as_bytes());
            buf.push(0);
            buf.extend_from_slice(&xxh3_128(content).to_le_bytes());
        }
        let mut raw = [0u8; 20];
        raw[..16].copy_from_slice(&xxh3_128(&buf).to_be_bytes());
        raw[16..].copy_from_slice(&(self.tick as u32).to_be_bytes());
        let id = CommitId::from(gix::ObjectId::Sha1(raw));

        let commit = Commit {
            id: id.clone(),
            parents,
            author: signature(time),
            committer: signature(time),
            message: message.trim_end().to_string(),
        };
        self.commits
            .insert(id.clone(), StoredCommit { commit, tree });
        id
    }

    /// Point HEAD (or its branch) at `id`
    fn advance_head(&mut self, id: CommitId) {
        match &self.head {
            Head::Branch(name) => {
                self.refs.insert(name.clone(), id);
            }
            Head::Detached(_) => self.head = Head::Detached(id),
        }
    }

    fn is_ancestor(&self, ancestor: &CommitId, of: &CommitId) -> bool {
        let mut stack = vec![of.clone()];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if &id == ancestor {
                return true;
            }
            if seen.insert(id.clone()) {
                if let Some(stored) = self.commits.get(&id) {
                    stack.extend(stored.commit.parents.iter().cloned());
                }
            }
        }
        false
    }

    /// Tracked files differ from HEAD in the index or working tree
    fn is_dirty(&self) -> bool {
        let head = self.head_tree();
        if self.index != head {
            return true;
        }
        self.index
            .iter()
            .any(|(path, content)| self.workdir.get(path) != Some(content))
    }

    /// Replace index and tracked working tree files with `tree`
    fn checkout_tree(&mut self, tree: Tree) {
        let previous: Vec<String> = self.index.keys().cloned().collect();
        for path in previous {
            if !tree.contains_key(&path) {
                self.workdir.remove(&path);
            }
        }
        for (path, content) in &tree {
            self.workdir.insert(path.clone(), content.clone());
        }
        self.index = tree;
    }

    /// Children before parents; among ready commits the newest goes first
    fn topo_order(&self, starts: Vec<CommitId>) -> Vec<&Commit> {
        let mut reachable: HashSet<CommitId> = HashSet::new();
        let mut stack = starts;
        while let Some(id) = stack.pop() {
            if let Some(stored) = self.commits.get(&id) {
                if reachable.insert(id) {
                    stack.extend(stored.commit.parents.iter().cloned());
                }
            }
        }

        let mut children: HashMap<&CommitId, usize> = HashMap::new();
        for id in &reachable {
            children.entry(id).or_insert(0);
            for parent in &self.commits[id].commit.parents {
                if reachable.contains(parent) {
                    *children.entry(parent).or_insert(0) += 1;
                }
            }
        }

        let key = |id: &CommitId| (self.commits[id].commit.committer.time, id.clone());
        let mut ready: BinaryHeap<_> = children
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| key(id))
            .collect();

        let mut order = Vec::with_capacity(reachable.len());
        while let Some((_, id)) = ready.pop() {
            let commit = &self.commits[&id].commit;
            for parent in &commit.parents {
                if let Some(n) = children.get_mut(parent) {
                    *n -= 1;
                    if *n == 0 {
                        ready.push(key(parent));
                    }
                }
            }
            order.push(commit);
        }
        order
    }

    fn all_starts(&self) -> Vec<CommitId> {
        let mut starts: Vec<CommitId> = self
            .refs
            .iter()
            .filter(|(name, _)| RefKind::classify(name).is_some())
            .map(|(_, id)| id.clone())
            .collect();
        starts.extend(self.head_id());
        starts
    }

    fn refs_snapshot(&self) -> Vec<Ref> {
        let head_branch = self.head_branch();
        let mut refs: Vec<Ref> = self
            .refs
            .iter()
            .filter_map(|(name, id)| {
                let (kind, short) = RefKind::classify(name)?;
                Some(Ref {
                    name: name.clone(),
                    short_name: short.to_string(),
                    target: id.clone(),
                    kind,
                    is_head: head_branch == Some(name.as_str()),
                })
            })
            .collect();
        refs.extend(self.stashes.iter().enumerate().map(|(i, stash)| Ref {
            name: format!("stash@{{{i}}}"),
            short_name: format!("stash@{{{i}}}"),
            target: stash.id.clone(),
            kind: RefKind::Stash,
            is_head: false,
        }));
        refs.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
        refs
    }

    fn restore(&mut self, snapshot: &[Ref]) {
        self.refs
            .retain(|name, _| matches!(RefKind::classify(name), None | Some((RefKind::Stash, _))));
        for r in snapshot.iter().filter(|r| r.kind != RefKind::Stash) {
            self.refs.insert(r.name.clone(), r.target.clone());
        }
    }

    fn authenticate(&self, remote: &str, provider: &dyn CredentialProvider) -> GitResult<()> {
        let Some(required) = &self.required_credentials else {
            return Ok(());
        };
        let request = CredentialRequest {
            remote: remote.to_string(),
            url: Some(format!("memory://{remote}")),
        };
        match provider.credentials(&request) {
            Some(given) if &given == required => Ok(()),
            _ => Err(GitError::AuthenticationRequired {
                remote: remote.to_string(),
            }),
        }
    }

    fn remote_branches(&self, remote: &str) -> GitResult<Vec<(String, CommitId)>> {
        let branches = self
            .remotes
            .get(remote)
            .ok_or_else(|| GitError::ExternalToolFailure {
                command: "fetch".to_string(),
                code: Some(128),
                stderr: format!("fatal: '{remote}' does not appear to be a git repository"),
            })?;
        Ok(branches
            .iter()
            .map(|(branch, id)| (format!("refs/remotes/{remote}/{branch}"), id.clone()))
            .collect())
    }
}

fn kind_between(old: Option<&Vec<u8>>, new: Option<&Vec<u8>>) -> Option<ChangeKind> {
    match (old, new) {
        (None, Some(_)) => Some(ChangeKind::Added),
        (Some(_), None) => Some(ChangeKind::Deleted),
        (Some(a), Some(b)) if a != b => Some(ChangeKind::Modified),
        _ => None,
    }
}

fn diff_trees(
    old: &Tree,
    new: &Tree,
    filter: &PathFilter,
    options: &DiffOptions,
) -> GitResult<Vec<FileDiff>> {
    let paths: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    paths
        .into_iter()
        .filter(|p| filter.matches(p))
        .filter_map(|path| {
            let (before, after) = (old.get(path), new.get(path));
            let kind = kind_between(before, after)?;
            Some(diff_file(
                DiffInput {
                    path,
                    old_path: None,
                    kind,
                    old: before.map(Vec::as_slice),
                    new: after.map(Vec::as_slice),
                },
                options,
            ))
        })
        .collect()
}

fn touched_paths(old: &Tree, new: &Tree) -> Vec<String> {
    let paths: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    paths
        .into_iter()
        .filter(|p| kind_between(old.get(*p), new.get(*p)).is_some())
        .cloned()
        .collect()
}

fn lines_of(content: &[u8]) -> Vec<patch::TextLine> {
    patch::split_text(&String::from_utf8_lossy(content))
}

fn blob_id(content: &[u8]) -> BlobHandle {
    BlobHandle(format!("{:032x}", xxh3_128(content)))
}

/// A repository held entirely in memory
pub struct InMemoryRepository {
    workdir: PathBuf,
    control_dir: PathBuf,
    state: Mutex<FakeState>,
    log: Mutex<Vec<String>>,
    write_delay: Mutex<Duration>,
    network_delay: Mutex<Duration>,
    diff_options: DiffOptions,
}

impl InMemoryRepository {
    /// Empty repository with an unborn `main` branch
    pub fn new(name: &str) -> Self {
        let workdir = PathBuf::from("/in-memory").join(name);
        Self {
            control_dir: workdir.join(".git"),
            workdir,
            state: Mutex::new(FakeState::new()),
            log: Mutex::new(Vec::new()),
            write_delay: Mutex::new(Duration::ZERO),
            network_delay: Mutex::new(Duration::ZERO),
            diff_options: DiffOptions::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, entry: String) {
        debug!(entry = %entry, "in-memory operation");
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// `begin:<op>` / `end:<op>` entries of every write so far
    pub fn operations(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self
            .write_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Pause inside fetch/push after the first ref has been updated
    pub fn set_network_delay(&self, delay: Duration) {
        *self
            .network_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    fn write_delay(&self) -> Duration {
        *self
            .write_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn network_delay(&self) -> Duration {
        *self
            .network_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Remotes reject every other credential
    pub fn require_credentials(&self, credentials: Credentials) {
        self.state().required_credentials = Some(credentials);
    }

    pub fn write_file(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.state()
            .workdir
            .insert(path.to_string(), content.into());
    }

    pub fn remove_file(&self, path: &str) {
        self.state().workdir.remove(path);
    }

    /// Stage the whole working tree and commit it on HEAD
    pub fn commit_all(&self, message: &str) -> CommitId {
        let mut state = self.state();
        state.index = state.workdir.clone();
        let parents: Vec<CommitId> = state.head_id().into_iter().collect();
        let tree = state.index.clone();
        let id = state.new_commit(parents, tree, message);
        state.advance_head(id.clone());
        id
    }

    /// Create a commit object without moving any ref
    pub fn create_commit(
        &self,
        parents: &[CommitId],
        files: &[(&str, &str)],
        message: &str,
    ) -> CommitId {
        let tree = files
            .iter()
            .map(|(p, c)| (p.to_string(), c.as_bytes().to_vec()))
            .collect();
        self.state().new_commit(parents.to_vec(), tree, message)
    }

    pub fn set_ref(&self, full_name: &str, id: &CommitId) {
        self.state().refs.insert(full_name.to_string(), id.clone());
    }

    /// What `fetch` from `remote` will find
    pub fn set_remote_branch(&self, remote: &str, branch: &str, id: &CommitId) {
        self.state()
            .remotes
            .entry(remote.to_string())
            .or_default()
            .insert(branch.to_string(), id.clone());
    }

    /// Configure a remote with no branches yet
    pub fn add_remote(&self, name: &str) {
        self.state().remotes.entry(name.to_string()).or_default();
    }

    pub fn remote_branch(&self, remote: &str, branch: &str) -> Option<CommitId> {
        self.state().remotes.get(remote)?.get(branch).cloned()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state().workdir.get(path).cloned()
    }

    /// Content of `path` in the index
    pub fn staged_file(&self, path: &str) -> Option<Vec<u8>> {
        self.state().index.get(path).cloned()
    }

    async fn write_op<T, F>(&self, name: &str, f: F) -> GitResult<T>
    where
        F: FnOnce(&mut FakeState) -> GitResult<T> + Send,
        T: Send,
    {
        self.record(format!("begin:{name}"));
        let delay = self.write_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = {
            let mut state = self.state();
            f(&mut state)
        };
        self.record(format!("end:{name}"));
        result
    }

    fn unsupported(&self, operation: &str) -> GitResult<WriteOutcome> {
        Err(GitError::Unsupported(format!(
            "{operation} requires the git executable"
        )))
    }

    fn stage_selection(
        state: &mut FakeState,
        path: &str,
        hunk: &Hunk,
        selected: &BTreeSet<usize>,
    ) -> GitResult<()> {
        let patch = PatchHunk::select(hunk, selected, Direction::Forward).ok_or_else(|| {
            GitError::InvalidArgument("selection contains no changed lines".to_string())
        })?;
        let whole = is_whole(hunk, selected);
        if whole && hunk.added() == 0 && !state.workdir.contains_key(path) {
            state.index.remove(path);
            return Ok(());
        }
        let base = state.index.get(path).map(|c| lines_of(c)).unwrap_or_default();
        let staged = patch.apply(&base, false)?;
        state
            .index
            .insert(path.to_string(), patch::join_text(&staged).into_bytes());
        Ok(())
    }

    fn unstage_selection(
        state: &mut FakeState,
        path: &str,
        hunk: &Hunk,
        selected: &BTreeSet<usize>,
    ) -> GitResult<()> {
        let patch = PatchHunk::select(hunk, selected, Direction::Reverse).ok_or_else(|| {
            GitError::InvalidArgument("selection contains no changed lines".to_string())
        })?;
        let head = state.head_tree();
        if is_whole(hunk, selected) && !head.contains_key(path) {
            state.index.remove(path);
            return Ok(());
        }
        let base = state
            .index
            .get(path)
            .map(|c| lines_of(c))
            .unwrap_or_default();
        let restored = patch.apply(&base, true)?;
        state
            .index
            .insert(path.to_string(), patch::join_text(&restored).into_bytes());
        Ok(())
    }
}

fn is_whole(hunk: &Hunk, selected: &BTreeSet<usize>) -> bool {
    hunk.lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.origin != LineOrigin::Context)
        .all(|(i, _)| selected.contains(&i))
}

fn changed_lines(hunk: &Hunk) -> BTreeSet<usize> {
    hunk.changed_line_indices().into_iter().collect()
}

#[async_trait]
impl RepoRead for InMemoryRepository {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn control_dir(&self) -> &Path {
        &self.control_dir
    }

    async fn status(&self) -> GitResult<StatusReport> {
        let state = self.state();
        let head = state.head_tree();
        let paths: BTreeSet<&String> = head
            .keys()
            .chain(state.index.keys())
            .chain(state.workdir.keys())
            .collect();

        let entries = paths
            .into_iter()
            .filter_map(|path| {
                let in_index = state.index.get(path);
                let untracked = in_index.is_none() && state.workdir.contains_key(path);
                let staged = kind_between(head.get(path), in_index);
                let unstaged = in_index.and_then(|_| kind_between(in_index, state.workdir.get(path)));
                (staged.is_some() || unstaged.is_some() || untracked).then(|| StatusEntry {
                    path: path.clone(),
                    orig_path: None,
                    staged,
                    unstaged,
                    conflicted: false,
                    untracked,
                })
            })
            .collect();

        Ok(StatusReport {
            branch: BranchStatus {
                head: state
                    .head_branch()
                    .map(|b| b.trim_start_matches("refs/heads/").to_string()),
                oid: state.head_id(),
                upstream: None,
                ahead: 0,
                behind: 0,
            },
            entries,
        })
    }

    async fn walk_commits(&self, spec: &WalkSpec, page: PageRequest) -> GitResult<CommitPage> {
        let state = self.state();
        let starts = if spec.revisions.is_empty() {
            state.all_starts()
        } else {
            spec.revisions
                .iter()
                .map(|r| state.resolve(r))
                .collect::<GitResult<Vec<_>>>()?
        };
        let order = state.topo_order(starts);
        let commits: Vec<Commit> = order
            .iter()
            .skip(page.skip)
            .take(page.limit)
            .map(|c| (*c).clone())
            .collect();
        Ok(CommitPage {
            exhausted: page.skip + commits.len() >= order.len(),
            commits,
            skip: page.skip,
        })
    }

    async fn list_refs(&self) -> GitResult<Vec<Ref>> {
        Ok(self.state().refs_snapshot())
    }

    async fn list_remotes(&self) -> GitResult<Vec<RemoteInfo>> {
        Ok(self
            .state()
            .remotes
            .keys()
            .map(|name| RemoteInfo {
                name: name.clone(),
                url: Some(format!("memory://{name}")),
            })
            .collect())
    }

    async fn diff_workdir(&self, filter: &PathFilter) -> GitResult<Vec<FileDiff>> {
        let state = self.state();
        diff_trees(&state.index, &state.workdir, filter, &self.diff_options)
    }

    async fn diff_staged(&self, filter: &PathFilter) -> GitResult<Vec<FileDiff>> {
        let state = self.state();
        diff_trees(&state.head_tree(), &state.index, filter, &self.diff_options)
    }

    async fn diff_commit(&self, id: &CommitId) -> GitResult<Vec<FileDiff>> {
        let state = self.state();
        let commit = state.commit(id)?;
        let empty = Tree::new();
        let old = match commit.parents.first() {
            Some(parent) => state.tree(parent)?,
            None => &empty,
        };
        diff_trees(old, state.tree(id)?, &PathFilter::all(), &self.diff_options)
    }

    async fn blame_file(&self, path: &str, revision: Option<&str>) -> GitResult<Vec<BlameLine>> {
        validate::path(path)?;
        let state = self.state();
        let mut current = state.resolve(revision.unwrap_or("HEAD"))?;
        let content = state
            .tree(&current)?
            .get(path)
            .ok_or_else(|| GitError::PathNotTracked(path.to_string()))?
            .clone();
        let text = String::from_utf8_lossy(&content).into_owned();
        let final_lines: Vec<&str> = text.lines().collect();

        // (index into final_lines, 1-based line number in `current`)
        let mut pending: Vec<(usize, u32)> = (0..final_lines.len())
            .map(|i| (i, i as u32 + 1))
            .collect();
        let mut owners: Vec<Option<(CommitId, u32)>> = vec![None; final_lines.len()];

        while !pending.is_empty() {
            let commit = state.commit(&current)?;
            let current_text = state.tree(&current)?.get(path).cloned().unwrap_or_default();
            let parent_text = commit
                .parents
                .first()
                .and_then(|p| state.commits.get(p))
                .and_then(|p| p.tree.get(path));

            let Some(parent_text) = parent_text else {
                for (index, line) in pending.drain(..) {
                    owners[index] = Some((current.clone(), line));
                }
                break;
            };

            let old = String::from_utf8_lossy(parent_text).into_owned();
            let new = String::from_utf8_lossy(&current_text).into_owned();
            let options = DiffOptions {
                context_lines: old.lines().count() + new.lines().count() + 1,
                word_diff: false,
                max_word_diff_line_len: 0,
                binary: BinaryMode::Text,
            };
            let hunks = diff_text(&old, &new, &options);
            // new line → old line for unchanged lines
            let mapping: HashMap<u32, u32> = if hunks.is_empty() {
                (1..=new.lines().count() as u32).map(|n| (n, n)).collect()
            } else {
                hunks
                    .iter()
                    .flat_map(|h| h.lines.iter())
                    .filter(|l| l.origin == LineOrigin::Context)
                    .filter_map(|l| Some((l.new_lineno?, l.old_lineno?)))
                    .collect()
            };

            let mut still_pending = Vec::new();
            for (index, line) in pending.drain(..) {
                match mapping.get(&line) {
                    Some(old_line) => still_pending.push((index, *old_line)),
                    None => owners[index] = Some((current.clone(), line)),
                }
            }
            pending = still_pending;
            if let Some(parent) = commit.parents.first() {
                current = parent.clone();
            }
        }

        final_lines
            .iter()
            .enumerate()
            .map(|(index, content)| {
                let (id, original_line) = owners[index]
                    .clone()
                    .ok_or_else(|| GitError::RepositoryCorrupt("unattributed line".to_string()))?;
                let commit = state.commit(&id)?;
                Ok(BlameLine {
                    line: index as u32 + 1,
                    original_line,
                    commit: id.clone(),
                    author: commit.author.name.clone(),
                    time: commit.author.time,
                    summary: commit.summary().to_string(),
                    content: content.to_string(),
                })
            })
            .collect()
    }

    async fn search(&self, query: &SearchQuery) -> GitResult<Vec<Commit>> {
        if query.scope == SearchScope::Content {
            return Err(GitError::UnsupportedSearchScope(SearchScope::Content));
        }
        if query.text.is_empty() {
            return Err(GitError::InvalidArgument("empty search text".to_string()));
        }
        let pattern = RegexBuilder::new(&regex::escape(&query.text))
            .case_insensitive(true)
            .build()
            .map_err(|e| GitError::InvalidArgument(e.to_string()))?;

        let state = self.state();
        let empty = Tree::new();
        let matches = |commit: &Commit| -> bool {
            match query.scope {
                SearchScope::Message => pattern.is_match(&commit.message),
                SearchScope::Author => {
                    pattern.is_match(&commit.author.name) || pattern.is_match(&commit.author.email)
                }
                SearchScope::Path => {
                    let Ok(tree) = state.tree(&commit.id) else {
                        return false;
                    };
                    let parent = commit
                        .parents
                        .first()
                        .and_then(|p| state.commits.get(p))
                        .map(|p| &p.tree)
                        .unwrap_or(&empty);
                    touched_paths(parent, tree)
                        .iter()
                        .any(|p| pattern.is_match(p))
                }
                SearchScope::Content => false,
            }
        };
        Ok(state
            .topo_order(state.all_starts())
            .into_iter()
            .filter(|c| matches(c))
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn read_file_at(&self, path: &str, revision: &str) -> GitResult<Vec<u8>> {
        validate::path(path)?;
        let state = self.state();
        let id = state.resolve(revision)?;
        state
            .tree(&id)?
            .get(path)
            .cloned()
            .ok_or_else(|| GitError::PathNotTracked(path.to_string()))
    }

    async fn conflict_state(&self) -> GitResult<Option<ConflictState>> {
        Ok(None)
    }

    async fn read_blob(&self, blob: &BlobHandle) -> GitResult<Vec<u8>> {
        let state = self.state();
        state
            .commits
            .values()
            .flat_map(|c| c.tree.values())
            .chain(state.index.values())
            .find(|content| blob_id(content) == *blob)
            .cloned()
            .ok_or_else(|| unresolvable(&blob.0))
    }
}

#[async_trait]
impl RepoWrite for InMemoryRepository {
    async fn stage_paths(&self, paths: &[String]) -> GitResult<WriteOutcome> {
        validate::paths(paths)?;
        self.write_op("stage_paths", |state| {
            for path in paths {
                match state.workdir.get(path).cloned() {
                    Some(content) => {
                        state.index.insert(path.clone(), content);
                    }
                    None if state.index.remove(path).is_some() => {}
                    None => return Err(GitError::PathNotTracked(path.clone())),
                }
            }
            Ok(WriteOutcome::Completed)
        })
        .await
    }

    async fn unstage_paths(&self, paths: &[String]) -> GitResult<WriteOutcome> {
        validate::paths(paths)?;
        self.write_op("unstage_paths", |state| {
            let head = state.head_tree();
            for path in paths {
                match head.get(path) {
                    Some(content) => {
                        state.index.insert(path.clone(), content.clone());
                    }
                    None => {
                        state.index.remove(path);
                    }
                }
            }
            Ok(WriteOutcome::Completed)
        })
        .await
    }

    async fn stage_hunk(&self, path: &str, hunk: &Hunk) -> GitResult<WriteOutcome> {
        validate::path(path)?;
        let lines = changed_lines(hunk);
        self.write_op("stage_hunk", |state| {
            Self::stage_selection(state, path, hunk, &lines)?;
            Ok(WriteOutcome::Completed)
        })
        .await
    }

    async fn unstage_hunk(&self, path: &str, hunk: &Hunk) -> GitResult<WriteOutcome> {
        validate::path(path)?;
        let lines = changed_lines(hunk);
        self.write_op("unstage_hunk", |state| {
            Self::unstage_selection(state, path, hunk, &lines)?;
            Ok(WriteOutcome::Completed)
        })
        .await
    }

    async fn stage_lines(
        &self,
        path: &str,
        hunk: &Hunk,
        lines: &BTreeSet<usize>,
    ) -> GitResult<WriteOutcome> {
        validate::path(path)?;
        self.write_op("stage_lines", |state| {
            Self::stage_selection(state, path, hunk, lines)?;
            Ok(WriteOutcome::Completed)
        })
        .await
    }

    async fn unstage_lines(
        &self,
        path: &str,
        hunk: &Hunk,
        lines: &BTreeSet<usize>,
    ) -> GitResult<WriteOutcome> {
        validate::path(path)?;
        self.write_op("unstage_lines", |state| {
            Self::unstage_selection(state, path, hunk, lines)?;
            Ok(WriteOutcome::Completed)
        })
        .await
    }

    async fn commit(&self, message: &str, amend: bool) -> GitResult<WriteOutcome> {
        if message.trim().is_empty() {
            return Err(GitError::InvalidArgument("empty commit message".to_string()));
        }
        self.write_op("commit", |state| {
            let head = state.head_id();
            let parents = match (&head, amend) {
                (Some(id), true) => state.commit(id)?.parents.clone(),
                (None, true) => return Err(unresolvable("HEAD")),
                (Some(id), false) => vec![id.clone()],
                (None, false) => Vec::new(),
            };
            if !amend && state.index == state.head_tree() {
                return Err(GitError::InvalidArgument("nothing to commit".to_string()));
            }
            let tree = state.index.clone();
            let id = state.new_commit(parents, tree, message);
            state.advance_head(id.clone());
            Ok(WriteOutcome::Committed(id))
        })
        .await
    }

    async fn checkout_branch(&self, name: &str) -> GitResult<WriteOutcome> {
        validate::ref_name(name)?;
        self.write_op("checkout_branch", |state| {
            let full = format!("refs/heads/{name}");
            // Anything other than a local branch detaches HEAD, as git does
            let (id, head) = match state.refs.get(&full) {
                Some(id) => (id.clone(), Head::Branch(full)),
                None => {
                    let id = state.resolve_name(name).ok_or_else(|| unresolvable(name))?;
                    (id.clone(), Head::Detached(id))
                }
            };
            if state.is_dirty() {
                return Err(GitError::ExternalToolFailure {
                    command: "checkout".to_string(),
                    code: Some(1),
                    stderr: "error: Your local changes would be overwritten by checkout"
                        .to_string(),
                });
            }
            let tree = state.tree(&id)?.clone();
            state.checkout_tree(tree);
            state.head = head;
            Ok(WriteOutcome::Completed)
        })
        .await
    }

    async fn create_branch(&self, name: &str, start: Option<&str>) -> GitResult<WriteOutcome> {
        validate::ref_name(name)?;
        self.write_op("create_branch", |state| {
            let full = format!("refs/heads/{name}");
            if state.refs.contains_key(&full) {
                return Err(GitError::InvalidArgument(format!(
                    "branch '{name}' already exists"
                )));
            }
            let id = state.resolve(start.unwrap_or("HEAD"))?;
            state.refs.insert(full, id);
            Ok(WriteOutcome::Completed)
        })
        .await
    }

    async fn delete_branch(&self, name: &str, force: bool) -> GitResult<WriteOutcome> {
        validate::ref_name(name)?;
        self.write_op("delete_branch", |state| {
            let full = format!("refs/heads/{name}");
            let id = state.refs.get(&full).cloned().ok_or_else(|| unresolvable(name))?;
            if state.head_branch() == Some(full.as_str()) {
                return Err(GitError::InvalidArgument(format!(
                    "cannot delete the checked-out branch '{name}'"
                )));
            }
            let merged = state
                .head_id()
                .is_some_and(|head| state.is_ancestor(&id, &head));
            if !force && !merged {
                return Err(GitError::InvalidArgument(format!(
                    "branch '{name}' is not fully merged"
                )));
            }
            state.refs.remove(&full);
            Ok(WriteOutcome::Completed)
        })
        .await
    }

    async fn rename_branch(&self, from: &str, to: &str) -> GitResult<WriteOutcome> {
        validate::ref_name(from)?;
        validate::ref_name(to)?;
        self.write_op("rename_branch", |state| {
            let old = format!("refs/heads/{from}");
            let new = format!("refs/heads/{to}");
            if state.refs.contains_key(&new) {
                return Err(GitError::InvalidArgument(format!(
                    "branch '{to}' already exists"
                )));
            }
            let id = state.refs.remove(&old).ok_or_else(|| unresolvable(from))?;
            state.refs.insert(new.clone(), id);
            if state.head == Head::Branch(old) {
                state.head = Head::Branch(new);
            }
            Ok(WriteOutcome::Completed)
        })
        .await
    }

    async fn cherry_pick(&self, _id: &CommitId) -> GitResult<WriteOutcome> {
        self.unsupported("cherry-pick")
    }

    async fn revert(&self, _id: &CommitId) -> GitResult<WriteOutcome> {
        self.unsupported("revert")
    }

    async fn reset(&self, target: &str, mode: ResetMode) -> GitResult<WriteOutcome> {
        self.write_op("reset", |state| {
            let id = state.resolve(target)?;
            let tree = state.tree(&id)?.clone();
            state.advance_head(id);
            match mode {
                ResetMode::Soft => {}
                ResetMode::Mixed => state.index = tree,
                ResetMode::Hard => state.checkout_tree(tree),
            }
            Ok(WriteOutcome::Completed)
        })
        .await
    }

    async fn stash(&self, action: &StashAction) -> GitResult<WriteOutcome> {
        self.write_op(action.label(), |state| match action {
            StashAction::Save {
                message,
                include_untracked,
            } => {
                let head = state.head_id().ok_or_else(|| unresolvable("HEAD"))?;
                let head_tree = state.head_tree();
                let saved: Tree = state
                    .workdir
                    .iter()
                    .filter(|(p, _)| *include_untracked || state.index.contains_key(*p))
                    .map(|(p, c)| (p.clone(), c.clone()))
                    .collect();
                if saved == head_tree && state.index == head_tree {
                    return Err(GitError::InvalidArgument(
                        "no local changes to save".to_string(),
                    ));
                }
                let index = state.index.clone();
                let label = message.clone().unwrap_or_else(|| "WIP".to_string());
                let id = state.new_commit(vec![head], saved.clone(), &label);
                if *include_untracked {
                    for path in saved.keys() {
                        if !head_tree.contains_key(path) {
                            state.workdir.remove(path);
                        }
                    }
                }
                state.checkout_tree(head_tree);
                state.stashes.insert(
                    0,
                    Stash {
                        id,
                        index,
                        workdir: saved,
                    },
                );
                Ok(WriteOutcome::Completed)
            }
            StashAction::Pop(n) | StashAction::Apply(n) => {
                let stash = state.stashes.get(*n).ok_or_else(|| {
                    unresolvable(&format!("stash@{{{n}}}"))
                })?;
                let (index, workdir) = (stash.index.clone(), stash.workdir.clone());
                for path in state.index.keys().cloned().collect::<Vec<_>>() {
                    if !workdir.contains_key(&path) {
                        state.workdir.remove(&path);
                    }
                }
                state.workdir.extend(workdir);
                state.index = index;
                if matches!(action, StashAction::Pop(_)) {
                    state.stashes.remove(*n);
                }
                Ok(WriteOutcome::Completed)
            }
            StashAction::Drop(n) => {
                if *n >= state.stashes.len() {
                    return Err(unresolvable(&format!("stash@{{{n}}}")));
                }
                state.stashes.remove(*n);
                Ok(WriteOutcome::Completed)
            }
        })
        .await
    }

    async fn create_tag(
        &self,
        name: &str,
        target: &str,
        _message: Option<&str>,
    ) -> GitResult<WriteOutcome> {
        validate::ref_name(name)?;
        self.write_op("create_tag", |state| {
            let full = format!("refs/tags/{name}");
            if state.refs.contains_key(&full) {
                return Err(GitError::InvalidArgument(format!(
                    "tag '{name}' already exists"
                )));
            }
            let id = state.resolve(target)?;
            state.refs.insert(full, id);
            Ok(WriteOutcome::Completed)
        })
        .await
    }

    async fn delete_tag(&self, name: &str) -> GitResult<WriteOutcome> {
        validate::ref_name(name)?;
        self.write_op("delete_tag", |state| {
            state
                .refs
                .remove(&format!("refs/tags/{name}"))
                .map(|_| WriteOutcome::Completed)
                .ok_or_else(|| unresolvable(name))
        })
        .await
    }

    async fn fetch(
        &self,
        remote: &str,
        credentials: &dyn CredentialProvider,
    ) -> GitResult<WriteOutcome> {
        validate::remote(remote)?;
        let updates = {
            let state = self.state();
            state.authenticate(remote, credentials)?;
            state.remote_branches(remote)?
        };
        self.record("begin:fetch".to_string());

        let mut pending = updates.iter();
        if let Some((name, id)) = pending.next() {
            self.state().refs.insert(name.clone(), id.clone());
        }
        let delay = self.network_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        {
            let mut state = self.state();
            for (name, id) in pending {
                state.refs.insert(name.clone(), id.clone());
            }
            let prefix = format!("refs/remotes/{remote}/");
            let fetched: HashSet<&String> = updates.iter().map(|(n, _)| n).collect();
            state
                .refs
                .retain(|name, _| !name.starts_with(&prefix) || fetched.contains(name));
        }

        self.record("end:fetch".to_string());
        Ok(WriteOutcome::Completed)
    }

    async fn pull(
        &self,
        remote: &str,
        branch: Option<&str>,
        credentials: &dyn CredentialProvider,
    ) -> GitResult<WriteOutcome> {
        self.fetch(remote, credentials).await?;
        self.write_op("pull", |state| {
            let branch = match branch {
                Some(b) => b.to_string(),
                None => state
                    .head_branch()
                    .map(|b| b.trim_start_matches("refs/heads/").to_string())
                    .ok_or_else(|| unresolvable("HEAD"))?,
            };
            let tracking = format!("refs/remotes/{remote}/{branch}");
            let target = state
                .refs
                .get(&tracking)
                .cloned()
                .ok_or_else(|| unresolvable(&tracking))?;
            match state.head_id() {
                Some(head) if state.is_ancestor(&target, &head) => return Ok(WriteOutcome::Completed),
                Some(head) if !state.is_ancestor(&head, &target) => {
                    return Err(GitError::Unsupported(
                        "pull requiring a merge needs the git executable".to_string(),
                    ));
                }
                _ => {}
            }
            if state.is_dirty() {
                return Err(GitError::ExternalToolFailure {
                    command: "pull".to_string(),
                    code: Some(1),
                    stderr: "error: Your local changes would be overwritten by merge".to_string(),
                });
            }
            let tree = state.tree(&target)?.clone();
            state.checkout_tree(tree);
            state.advance_head(target.clone());
            Ok(WriteOutcome::Committed(target))
        })
        .await
    }

    async fn push(
        &self,
        remote: &str,
        refspec: Option<&str>,
        force: bool,
        credentials: &dyn CredentialProvider,
    ) -> GitResult<WriteOutcome> {
        validate::remote(remote)?;
        let (source, destination) = {
            let state = self.state();
            state.authenticate(remote, credentials)?;
            if !state.remotes.contains_key(remote) {
                return Err(GitError::ExternalToolFailure {
                    command: "push".to_string(),
                    code: Some(128),
                    stderr: format!("fatal: '{remote}' does not appear to be a git repository"),
                });
            }
            let spec = match refspec {
                Some(spec) => spec.trim_start_matches('+').to_string(),
                None => state
                    .head_branch()
                    .map(|b| b.trim_start_matches("refs/heads/").to_string())
                    .ok_or_else(|| unresolvable("HEAD"))?,
            };
            let (src, dst) = spec.split_once(':').unwrap_or((spec.as_str(), spec.as_str()));
            (
                state.resolve(src)?,
                dst.trim_start_matches("refs/heads/").to_string(),
            )
        };
        self.record("begin:push".to_string());
        let delay = self.network_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = {
            let mut state = self.state();
            let existing = state
                .remotes
                .get(remote)
                .and_then(|b| b.get(&destination))
                .cloned();
            let fast_forward = existing
                .as_ref()
                .is_none_or(|old| state.is_ancestor(old, &source));
            if !fast_forward && !force {
                Err(GitError::ExternalToolFailure {
                    command: "push".to_string(),
                    code: Some(1),
                    stderr: format!("! [rejected] {destination} (non-fast-forward)"),
                })
            } else {
                state
                    .remotes
                    .entry(remote.to_string())
                    .or_default()
                    .insert(destination.clone(), source.clone());
                state
                    .refs
                    .insert(format!("refs/remotes/{remote}/{destination}"), source);
                Ok(WriteOutcome::Completed)
            }
        };
        self.record("end:push".to_string());
        result
    }

    async fn merge(&self, _revision: &str) -> GitResult<WriteOutcome> {
        self.unsupported("merge")
    }

    async fn rebase(&self, _onto: &str, _todo: Option<&[RebaseStep]>) -> GitResult<WriteOutcome> {
        self.unsupported("rebase")
    }

    async fn resolve_conflict(
        &self,
        _path: &str,
        _resolution: &ConflictResolution,
    ) -> GitResult<WriteOutcome> {
        self.unsupported("conflict resolution")
    }

    async fn continue_operation(&self) -> GitResult<WriteOutcome> {
        self.unsupported("continue")
    }

    async fn abort_operation(&self) -> GitResult<WriteOutcome> {
        self.unsupported("abort")
    }

    fn supports_atomic_ref_updates(&self) -> bool {
        true
    }

    async fn restore_refs(&self, snapshot: &[Ref]) -> GitResult<()> {
        self.record("restore_refs".to_string());
        self.state().restore(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::types::NoCredentials;
    use pretty_assertions::assert_eq;

    fn repo_with_history() -> (InMemoryRepository, Vec<CommitId>) {
        let repo = InMemoryRepository::new("history");
        repo.write_file("a.txt", "one\n");
        let c1 = repo.commit_all("first");
        repo.write_file("a.txt", "one\ntwo\n");
        let c2 = repo.commit_all("second");
        repo.write_file("b.txt", "bee\n");
        let c3 = repo.commit_all("add b");
        (repo, vec![c1, c2, c3])
    }

    #[tokio::test]
    async fn test_walk_is_children_first_and_paginates() {
        let (repo, ids) = repo_with_history();
        let page = repo
            .walk_commits(&WalkSpec::all(), PageRequest { skip: 0, limit: 2 })
            .await
            .unwrap();
        let got: Vec<_> = page.commits.iter().map(|c| c.id.clone()).collect();
        assert_eq!(got, vec![ids[2].clone(), ids[1].clone()]);
        assert!(!page.exhausted);

        let page = repo
            .walk_commits(&WalkSpec::all(), PageRequest { skip: 2, limit: 2 })
            .await
            .unwrap();
        assert_eq!(page.commits.len(), 1);
        assert!(page.exhausted);
    }

    #[tokio::test]
    async fn test_resolve_relative_revisions() {
        let (repo, ids) = repo_with_history();
        let content = repo.read_file_at("a.txt", "HEAD~2").await.unwrap();
        assert_eq!(content, b"one\n");
        let err = repo.read_file_at("b.txt", "HEAD^").await.unwrap_err();
        assert!(matches!(err, GitError::PathNotTracked(_)));
        let err = repo.read_file_at("a.txt", "HEAD~9").await.unwrap_err();
        assert!(matches!(err, GitError::RevisionUnresolvable(_)));
        let short = &ids[0].as_str()[..10];
        assert!(repo.read_file_at("a.txt", short).await.is_ok());
    }

    #[tokio::test]
    async fn test_status_tracks_index_and_workdir() {
        let (repo, _) = repo_with_history();
        repo.write_file("a.txt", "changed\n");
        repo.write_file("new.txt", "fresh\n");
        let status = repo.status().await.unwrap();
        assert_eq!(status.branch.head.as_deref(), Some("main"));
        let a = status.entries.iter().find(|e| e.path == "a.txt").unwrap();
        assert_eq!(a.unstaged, Some(ChangeKind::Modified));
        assert_eq!(a.staged, None);
        let new = status.entries.iter().find(|e| e.path == "new.txt").unwrap();
        assert!(new.untracked);

        repo.stage_paths(&["a.txt".to_string()]).await.unwrap();
        let status = repo.status().await.unwrap();
        let a = status.entries.iter().find(|e| e.path == "a.txt").unwrap();
        assert_eq!(a.staged, Some(ChangeKind::Modified));
        assert_eq!(a.unstaged, None);
    }

    #[tokio::test]
    async fn test_stage_then_unstage_hunk_restores_workdir_diff() {
        let repo = InMemoryRepository::new("hunks");
        let base: String = (1..=20).map(|i| format!("line {i}\n")).collect();
        repo.write_file("f.txt", base.clone());
        repo.commit_all("base");
        let edited = base.replace("line 2\n", "line two\n").replace("line 18\n", "line eighteen\n");
        repo.write_file("f.txt", edited);

        let before = repo.diff_workdir(&PathFilter::all()).await.unwrap();
        assert_eq!(before[0].hunks.len(), 2);
        let hunk = before[0].hunks[0].clone();

        repo.stage_hunk("f.txt", &hunk).await.unwrap();
        let staged = repo.diff_staged(&PathFilter::all()).await.unwrap();
        assert_eq!(staged[0].hunks.len(), 1);
        let remaining = repo.diff_workdir(&PathFilter::all()).await.unwrap();
        assert_eq!(remaining[0].hunks.len(), 1);

        repo.unstage_hunk("f.txt", &staged[0].hunks[0]).await.unwrap();
        let after = repo.diff_workdir(&PathFilter::all()).await.unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_blame_attributes_lines_to_introducing_commit() {
        let (repo, ids) = repo_with_history();
        let blame = repo.blame_file("a.txt", None).await.unwrap();
        assert_eq!(blame.len(), 2);
        assert_eq!(blame[0].commit, ids[0]);
        assert_eq!(blame[0].content, "one");
        assert_eq!(blame[1].commit, ids[1]);
        assert_eq!(blame[1].original_line, 2);
    }

    #[tokio::test]
    async fn test_search_scopes() {
        let (repo, ids) = repo_with_history();
        let hits = repo
            .search(&SearchQuery::new("ADD", SearchScope::Message))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, ids[2]);

        let hits = repo
            .search(&SearchQuery::new("a.txt", SearchScope::Path))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);

        let err = repo
            .search(&SearchQuery::new("two", SearchScope::Content))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GitError::UnsupportedSearchScope(SearchScope::Content)
        ));
    }

    #[tokio::test]
    async fn test_fetch_requires_matching_credentials() {
        let (repo, ids) = repo_with_history();
        repo.set_remote_branch("origin", "main", &ids[1]);
        repo.require_credentials(Credentials {
            username: "u".into(),
            secret: "s".into(),
        });

        let err = repo.fetch("origin", &NoCredentials).await.unwrap_err();
        assert!(matches!(err, GitError::AuthenticationRequired { remote } if remote == "origin"));

        let provider = |_: &CredentialRequest| {
            Some(Credentials {
                username: "u".into(),
                secret: "s".into(),
            })
        };
        repo.fetch("origin", &provider).await.unwrap();
        let refs = repo.list_refs().await.unwrap();
        assert!(refs
            .iter()
            .any(|r| r.name == "refs/remotes/origin/main" && r.target == ids[1]));
    }

    #[tokio::test]
    async fn test_list_remotes_sorted_with_urls() {
        let (repo, ids) = repo_with_history();
        assert!(repo.list_remotes().await.unwrap().is_empty());

        repo.set_remote_branch("upstream", "main", &ids[0]);
        repo.add_remote("origin");
        let remotes = repo.list_remotes().await.unwrap();
        assert_eq!(
            remotes,
            vec![
                RemoteInfo {
                    name: "origin".to_string(),
                    url: Some("memory://origin".to_string()),
                },
                RemoteInfo {
                    name: "upstream".to_string(),
                    url: Some("memory://upstream".to_string()),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_checkout_of_commit_detaches_head() {
        let (repo, ids) = repo_with_history();
        repo.checkout_branch(ids[0].as_str()).await.unwrap();

        let status = repo.status().await.unwrap();
        assert_eq!(status.branch.head, None);
        assert_eq!(repo.file("a.txt").unwrap(), b"one\n");
        assert!(repo.file("b.txt").is_none());
        assert!(!repo.list_refs().await.unwrap().iter().any(|r| r.is_head));

        repo.checkout_branch("main").await.unwrap();
        let status = repo.status().await.unwrap();
        assert_eq!(status.branch.head.as_deref(), Some("main"));
        assert_eq!(repo.file("b.txt").unwrap(), b"bee\n");
    }

    #[tokio::test]
    async fn test_restore_refs_is_exact() {
        let (repo, ids) = repo_with_history();
        let snapshot = repo.list_refs().await.unwrap();
        repo.create_branch("topic", Some(ids[0].as_str())).await.unwrap();
        repo.reset("HEAD~1", ResetMode::Soft).await.unwrap();

        repo.restore_refs(&snapshot).await.unwrap();
        assert_eq!(repo.list_refs().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_stash_round_trip() {
        let (repo, _) = repo_with_history();
        repo.write_file("a.txt", "dirty\n");
        repo.stash(&StashAction::Save {
            message: Some("wip".into()),
            include_untracked: false,
        })
        .await
        .unwrap();
        assert_eq!(repo.file("a.txt").unwrap(), b"one\ntwo\n");
        assert!(repo
            .list_refs()
            .await
            .unwrap()
            .iter()
            .any(|r| r.kind == RefKind::Stash));

        repo.stash(&StashAction::Pop(0)).await.unwrap();
        assert_eq!(repo.file("a.txt").unwrap(), b"dirty\n");
        assert!(repo.status().await.unwrap().entries.len() == 1);
    }

    #[tokio::test]
    async fn test_operation_log_and_unsupported() {
        let (repo, ids) = repo_with_history();
        repo.create_tag("v1", "HEAD", None).await.unwrap();
        assert_eq!(
            repo.operations(),
            vec!["begin:create_tag".to_string(), "end:create_tag".to_string()]
        );
        let err = repo.cherry_pick(&ids[0]).await.unwrap_err();
        assert!(matches!(err, GitError::Unsupported(_)));
    }
}
