//! Repository data model shared by the read/write adapters

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::diff::ChangeKind;
use crate::error::GitError;

/// Full hex object id of a commit
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    /// Parse a full or abbreviated hex id
    pub fn parse(hex: &str) -> Result<Self, GitError> {
        let hex = hex.trim();
        let valid = (4..=64).contains(&hex.len()) && hex.bytes().all(|b| b.is_ascii_hexdigit());
        if !valid {
            return Err(GitError::InvalidArgument(format!("not an object id: '{hex}'")));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 7 characters, as shown in logs
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(7)]
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<gix::ObjectId> for CommitId {
    fn from(id: gix::ObjectId) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub time: DateTime<Utc>,
}

/// An immutable commit; identity is the hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commit {
    pub id: CommitId,
    /// Ordered; the first parent is the mainline
    pub parents: Vec<CommitId>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl Commit {
    /// First line of the message
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefKind {
    LocalBranch,
    RemoteBranch,
    Tag,
    Stash,
}

impl RefKind {
    /// Classify a full ref name; `None` for refs the client does not show
    pub fn classify(full_name: &str) -> Option<(Self, &str)> {
        if let Some(short) = full_name.strip_prefix("refs/heads/") {
            Some((RefKind::LocalBranch, short))
        } else if let Some(short) = full_name.strip_prefix("refs/remotes/") {
            // refs/remotes/origin/HEAD is symbolic bookkeeping
            (!short.ends_with("/HEAD")).then_some((RefKind::RemoteBranch, short))
        } else if let Some(short) = full_name.strip_prefix("refs/tags/") {
            Some((RefKind::Tag, short))
        } else if full_name == "refs/stash" {
            Some((RefKind::Stash, "stash"))
        } else {
            None
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RefKind::LocalBranch => "branch",
            RefKind::RemoteBranch => "remote",
            RefKind::Tag => "tag",
            RefKind::Stash => "stash",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ref {
    /// Full name (`refs/heads/main`); stash entries use `stash@{n}`
    pub name: String,
    pub short_name: String,
    pub target: CommitId,
    pub kind: RefKind,
    /// The branch HEAD points at
    pub is_head: bool,
}

/// A configured remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteInfo {
    pub name: String,
    /// Fetch URL, when one is configured
    pub url: Option<String>,
}

/// What happened to ref state after a network operation timed out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefReconciliation {
    /// Refs were restored to the pre-operation snapshot atomically
    RolledBack,
    /// Refs were re-read; the payload is the state found
    Requeried(Vec<Ref>),
    /// Neither rollback nor re-query succeeded
    Unavailable(String),
}

impl fmt::Display for RefReconciliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefReconciliation::RolledBack => f.write_str("refs rolled back"),
            RefReconciliation::Requeried(refs) => write!(f, "{} refs re-read", refs.len()),
            RefReconciliation::Unavailable(reason) => write!(f, "ref state unknown: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BranchStatus {
    /// Checked-out branch; `None` when HEAD is detached
    pub head: Option<String>,
    /// `None` on an unborn branch
    pub oid: Option<CommitId>,
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub path: String,
    /// Source path of a staged rename
    pub orig_path: Option<String>,
    /// HEAD → index change
    pub staged: Option<ChangeKind>,
    /// index → working tree change
    pub unstaged: Option<ChangeKind>,
    pub conflicted: bool,
    pub untracked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub branch: BranchStatus,
    pub entries: Vec<StatusEntry>,
}

impl StatusReport {
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn conflicted_paths(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.conflicted)
            .map(|e| e.path.clone())
            .collect()
    }

    pub fn staged(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries.iter().filter(|e| e.staged.is_some())
    }

    pub fn unstaged(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries
            .iter()
            .filter(|e| e.unstaged.is_some() || e.untracked)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlameLine {
    /// 1-based line in the blamed revision of the file
    pub line: u32,
    /// 1-based line in the commit that introduced it
    pub original_line: u32,
    pub commit: CommitId,
    pub author: String,
    pub time: DateTime<Utc>,
    pub summary: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    Message,
    Author,
    Path,
    Content,
}

impl fmt::Display for SearchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SearchScope::Message => "message",
            SearchScope::Author => "author",
            SearchScope::Path => "path",
            SearchScope::Content => "content",
        };
        f.write_str(label)
    }
}

impl FromStr for SearchScope {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "message" | "msg" => Ok(SearchScope::Message),
            "author" => Ok(SearchScope::Author),
            "path" | "file" => Ok(SearchScope::Path),
            "content" | "pickaxe" => Ok(SearchScope::Content),
            other => Err(GitError::InvalidArgument(format!(
                "unknown search scope '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub scope: SearchScope,
    /// Maximum number of commits returned
    pub limit: usize,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, scope: SearchScope) -> Self {
        Self {
            text: text.into(),
            scope,
            limit: 200,
        }
    }
}

/// Starting points of a history walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkSpec {
    /// Revisions to start from; empty walks every branch, remote branch and tag plus HEAD
    pub revisions: Vec<String>,
}

impl WalkSpec {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn from_revision(revision: impl Into<String>) -> Self {
        Self {
            revisions: vec![revision.into()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub skip: usize,
    pub limit: usize,
}

/// One page of a topologically ordered walk (children before parents)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitPage {
    pub commits: Vec<Commit>,
    pub skip: usize,
    /// No commits exist past this page
    pub exhausted: bool,
}

/// Restricts diffs to the given paths (a directory matches everything below it)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathFilter {
    pub paths: Vec<String>,
}

impl PathFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only(paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_all(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn matches(&self, path: &str) -> bool {
        self.is_all()
            || self.paths.iter().any(|p| {
                let p = p.trim_end_matches('/');
                path == p
                    || path
                        .strip_prefix(p)
                        .is_some_and(|rest| rest.starts_with('/'))
            })
    }
}

/// Which two trees a diff compares
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DiffTarget {
    /// index → working tree
    Workdir,
    /// HEAD → index
    Staged,
    /// first parent → commit
    Commit(CommitId),
}

/// Object id of a blob stored in the repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct BlobHandle(pub String);

impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The suspended operation that produced a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictOperation {
    Merge,
    Rebase,
    CherryPick,
    Revert,
    StashApply,
}

impl fmt::Display for ConflictOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConflictOperation::Merge => "merge",
            ConflictOperation::Rebase => "rebase",
            ConflictOperation::CherryPick => "cherry-pick",
            ConflictOperation::Revert => "revert",
            ConflictOperation::StashApply => "stash apply",
        };
        f.write_str(label)
    }
}

/// One conflicted path with its three versions (absent when a side deleted it)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictedPath {
    pub path: String,
    pub ours: Option<BlobHandle>,
    pub base: Option<BlobHandle>,
    pub theirs: Option<BlobHandle>,
}

/// A merge/rebase/cherry-pick/revert halted on conflicts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictState {
    pub operation: ConflictOperation,
    pub paths: Vec<ConflictedPath>,
}

impl ConflictState {
    pub fn path_names(&self) -> Vec<&str> {
        self.paths.iter().map(|p| p.path.as_str()).collect()
    }

    pub fn is_resolved(&self) -> bool {
        self.paths.is_empty()
    }
}

/// How to settle one conflicted path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictResolution {
    Ours,
    Theirs,
    /// Explicit merged content
    Content(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetMode {
    /// Move the branch only
    Soft,
    /// Move the branch and reset the index
    Mixed,
    /// Move the branch, reset index and working tree
    Hard,
}

impl ResetMode {
    pub fn flag(self) -> &'static str {
        match self {
            ResetMode::Soft => "--soft",
            ResetMode::Mixed => "--mixed",
            ResetMode::Hard => "--hard",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StashAction {
    Save {
        message: Option<String>,
        include_untracked: bool,
    },
    /// Apply and drop `stash@{n}`
    Pop(usize),
    Apply(usize),
    Drop(usize),
}

impl StashAction {
    pub fn label(&self) -> &'static str {
        match self {
            StashAction::Save { .. } => "stash save",
            StashAction::Pop(_) => "stash pop",
            StashAction::Apply(_) => "stash apply",
            StashAction::Drop(_) => "stash drop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RebaseAction {
    Pick,
    Squash,
    Fixup,
    Drop,
}

impl RebaseAction {
    pub fn keyword(self) -> &'static str {
        match self {
            RebaseAction::Pick => "pick",
            RebaseAction::Squash => "squash",
            RebaseAction::Fixup => "fixup",
            RebaseAction::Drop => "drop",
        }
    }
}

/// One line of an interactive rebase todo list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebaseStep {
    pub action: RebaseAction,
    pub commit: CommitId,
}

/// Credentials handed to git for one network operation
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRequest {
    pub remote: String,
    pub url: Option<String>,
}

/// Supplies credentials when a remote rejects the ambient ones.
///
/// Returning `None` surfaces [`GitError::AuthenticationRequired`].
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self, request: &CredentialRequest) -> Option<Credentials>;
}

impl<F> CredentialProvider for F
where
    F: Fn(&CredentialRequest) -> Option<Credentials> + Send + Sync,
{
    fn credentials(&self, request: &CredentialRequest) -> Option<Credentials> {
        self(request)
    }
}

/// Never supplies credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl CredentialProvider for NoCredentials {
    fn credentials(&self, _request: &CredentialRequest) -> Option<Credentials> {
        None
    }
}

/// Result of a mutating operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Completed,
    /// A new commit was written
    Committed(CommitId),
    /// The operation stopped; resolve and continue or abort
    Conflicted(ConflictState),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_id_parse() {
        let id = CommitId::parse("ABCDEF1234567").unwrap();
        assert_eq!(id.as_str(), "abcdef1234567");
        assert_eq!(id.short(), "abcdef1");
        assert!(CommitId::parse("xyz").is_err());
        assert!(CommitId::parse("--all").is_err());
    }

    #[test]
    fn test_ref_classification() {
        assert_eq!(
            RefKind::classify("refs/heads/feature/x"),
            Some((RefKind::LocalBranch, "feature/x"))
        );
        assert_eq!(
            RefKind::classify("refs/remotes/origin/main"),
            Some((RefKind::RemoteBranch, "origin/main"))
        );
        assert_eq!(RefKind::classify("refs/remotes/origin/HEAD"), None);
        assert_eq!(RefKind::classify("refs/notes/commits"), None);
        assert_eq!(RefKind::classify("refs/stash"), Some((RefKind::Stash, "stash")));
    }

    #[test]
    fn test_path_filter() {
        let filter = PathFilter::only(["src", "README.md"]);
        assert!(filter.matches("src/lib.rs"));
        assert!(filter.matches("README.md"));
        assert!(!filter.matches("srcx/lib.rs"));
        assert!(!filter.matches("docs/README.md"));
        assert!(PathFilter::all().matches("anything"));
    }

    #[test]
    fn test_search_scope_from_str() {
        assert_eq!("Author".parse::<SearchScope>().unwrap(), SearchScope::Author);
        assert!("tree".parse::<SearchScope>().is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = Credentials {
            username: "octo".into(),
            secret: "hunter2".into(),
        };
        let text = format!("{creds:?}");
        assert!(text.contains("octo"));
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn test_closure_credential_provider() {
        let provider = |req: &CredentialRequest| {
            (req.remote == "origin").then(|| Credentials {
                username: "u".into(),
                secret: "s".into(),
            })
        };
        let req = CredentialRequest {
            remote: "origin".into(),
            url: None,
        };
        assert!(provider.credentials(&req).is_some());
        assert!(NoCredentials.credentials(&req).is_none());
    }
}
