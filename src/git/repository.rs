//! Real repository backend: reads
//!
//! `gix` handles discovery, refs and object access; the `git` executable
//! handles status, history walks, blame and change listings. Mutations live in
//! `write.rs`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gix::bstr::ByteSlice as _;
use tracing::{debug, info, instrument};

use super::backend::{GitResult, RepoRead};
use super::cli::{DEFAULT_GIT_PROGRAM, GitCli};
use super::porcelain::{self, LOG_FORMAT, NameStatus, STASH_FORMAT};
use super::types::{
    BlameLine, BlobHandle, Commit, CommitId, CommitPage, ConflictOperation, ConflictState, Ref,
    RefKind, RemoteInfo, SearchQuery, SearchScope, StatusReport, WalkSpec,
};
use super::validate;
use crate::config::Config;
use crate::diff::{ChangeKind, DiffInput, DiffOptions, FileDiff, diff_file};
use crate::error::GitError;

/// Id of the empty tree in SHA-1 repositories
const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

pub(super) fn corrupt(e: impl std::fmt::Display) -> GitError {
    GitError::RepositoryCorrupt(e.to_string())
}

/// A repository on disk
pub struct GitRepository {
    workdir: PathBuf,
    git_dir: PathBuf,
    pub(super) cli: GitCli,
    pub(super) diff_options: DiffOptions,
}

impl std::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository")
            .field("workdir", &self.workdir)
            .field("git_dir", &self.git_dir)
            .finish()
    }
}

impl GitRepository {
    /// Open the repository whose working tree is exactly `path`
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> GitResult<Self> {
        let path = path.as_ref();
        let repo = gix::open(path).map_err(|e| {
            if !path.exists() || matches!(e, gix::open::Error::NotARepository { .. }) {
                GitError::RepositoryNotFound(path.to_path_buf())
            } else {
                GitError::from(e)
            }
        })?;
        Ok(Self::from_gix(repo, path))
    }

    /// Discover the repository containing `path` (searches parent directories)
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn discover(path: impl AsRef<Path>) -> GitResult<Self> {
        let path = path.as_ref();
        let repo =
            gix::discover(path).map_err(|_e| GitError::RepositoryNotFound(path.to_path_buf()))?;
        Ok(Self::from_gix(repo, path))
    }

    /// Discover and apply the git program and diff settings from `config`
    pub fn from_config(path: impl AsRef<Path>, config: &Config) -> GitResult<Self> {
        Ok(Self::discover(path)?
            .with_git_program(&config.git_program)
            .with_diff_options(config.diff_options()))
    }

    fn from_gix(repo: gix::Repository, fallback: &Path) -> Self {
        let git_dir = repo.path().to_path_buf();
        let workdir = repo
            .path()
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| fallback.to_path_buf());

        info!("Opened repository at {:?}", workdir);

        Self {
            cli: GitCli::new(DEFAULT_GIT_PROGRAM, &workdir),
            workdir,
            git_dir,
            diff_options: DiffOptions::default(),
        }
    }

    pub fn with_git_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.cli = GitCli::new(program, &self.workdir);
        self
    }

    pub fn with_diff_options(mut self, options: DiffOptions) -> Self {
        self.diff_options = options;
        self
    }

    /// Fail fast when the control directory vanished underneath us
    pub(super) fn ensure_present(&self) -> GitResult<()> {
        if self.git_dir.is_dir() {
            Ok(())
        } else {
            Err(GitError::RepositoryNotFound(self.workdir.clone()))
        }
    }

    /// Run gix work on the blocking pool.
    ///
    /// The handle is opened inside the task and never leaves that thread.
    pub(super) async fn with_repo<T, F>(&self, f: F) -> GitResult<T>
    where
        F: FnOnce(&gix::Repository) -> GitResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_present()?;
        let git_dir = self.git_dir.clone();
        let workdir = self.workdir.clone();
        tokio::task::spawn_blocking(move || {
            let repo = gix::open(&git_dir).map_err(|e| {
                if git_dir.is_dir() {
                    GitError::from(e)
                } else {
                    GitError::RepositoryNotFound(workdir)
                }
            })?;
            f(&repo)
        })
        .await
        .map_err(|e| corrupt(format!("repository task failed: {e}")))?
    }

    /// Whether HEAD points at a commit
    pub(super) async fn head_is_born(&self) -> GitResult<bool> {
        self.with_repo(|repo| Ok(repo.head().map_err(corrupt)?.id().is_some()))
            .await
    }

    /// Checked-out branch (short name), `None` when detached
    pub async fn current_branch(&self) -> GitResult<Option<String>> {
        self.with_repo(|repo| {
            let head = repo.head().map_err(corrupt)?;
            let name = match head.kind {
                gix::head::Kind::Symbolic(reference) => {
                    Some(reference.name.shorten().to_string())
                }
                gix::head::Kind::Unborn(full_name) => Some(full_name.shorten().to_string()),
                gix::head::Kind::Detached { .. } => None,
            };
            Ok(name)
        })
        .await
    }

    /// Revision arguments for walks over "everything"
    async fn all_revisions(&self) -> GitResult<Vec<String>> {
        let born = self.head_is_born().await?;
        let mut revs = vec![
            "--branches".to_string(),
            "--remotes".to_string(),
            "--tags".to_string(),
        ];
        if born {
            revs.push("HEAD".to_string());
        }
        Ok(revs)
    }

    async fn has_any_commit(&self) -> GitResult<bool> {
        self.with_repo(|repo| {
            if repo.head().map_err(corrupt)?.id().is_some() {
                return Ok(true);
            }
            let platform = repo.references().map_err(corrupt)?;
            let mut all = platform.all().map_err(corrupt)?;
            Ok(all.next().is_some())
        })
        .await
    }

    /// Contents of blobs by hex id, `None` entries stay `None`
    async fn load_blobs(&self, ids: Vec<Option<String>>) -> GitResult<Vec<Option<Vec<u8>>>> {
        self.with_repo(move |repo| {
            ids.into_iter()
                .map(|id| id.map(|hex| blob_by_hex(repo, &hex)).transpose())
                .collect()
        })
        .await
    }

    /// Contents at `revision:path` for each spec, `None` when absent
    async fn load_tree_entries(
        &self,
        specs: Vec<Option<String>>,
    ) -> GitResult<Vec<Option<Vec<u8>>>> {
        self.with_repo(move |repo| {
            specs
                .into_iter()
                .map(|spec| match spec {
                    Some(spec) => tree_entry(repo, &spec),
                    None => Ok(None),
                })
                .collect()
        })
        .await
    }

    /// Working tree content as git hashes it: the link text for symlinks.
    ///
    /// `None` when the path is missing or is a directory (gitlinks, nested
    /// repositories).
    pub(super) async fn read_workdir_file(&self, path: &str) -> GitResult<Option<Vec<u8>>> {
        let full = self.workdir.join(path);
        let reading = |e: std::io::Error| corrupt(format!("reading {path}: {e}"));
        let meta = match tokio::fs::symlink_metadata(&full).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(reading(e)),
        };
        let file_type = meta.file_type();
        if file_type.is_symlink() {
            let target = tokio::fs::read_link(&full).await.map_err(reading)?;
            return Ok(Some(link_text(&target)));
        }
        if file_type.is_dir() {
            return Ok(None);
        }
        tokio::fs::read(&full).await.map(Some).map_err(reading)
    }

    /// Whether `path` in the working tree is a directory (not following links)
    pub(super) async fn is_workdir_dir(&self, path: &str) -> bool {
        tokio::fs::symlink_metadata(self.workdir.join(path))
            .await
            .is_ok_and(|m| m.is_dir())
    }

    /// stage-0 index entries: path → blob id
    pub(super) async fn index_blobs(&self) -> GitResult<HashMap<String, String>> {
        let out = self.cli.run(["ls-files", "-s", "-z"]).await?;
        Ok(porcelain::parse_staged_blobs(&out))
    }

    pub(super) async fn unmerged_paths(&self) -> GitResult<Vec<super::types::ConflictedPath>> {
        let out = self.cli.run(["ls-files", "-u", "-z"]).await?;
        Ok(porcelain::parse_unmerged(&out))
    }

    fn pathspec_args(filter: &super::types::PathFilter) -> GitResult<Vec<String>> {
        let mut args = vec!["--".to_string()];
        if !filter.is_all() {
            validate::paths(&filter.paths)?;
            args.extend(filter.paths.iter().cloned());
        }
        Ok(args)
    }

    fn build_diffs(
        &self,
        entries: &[NameStatus],
        olds: Vec<Option<Vec<u8>>>,
        news: Vec<Option<Vec<u8>>>,
    ) -> GitResult<Vec<FileDiff>> {
        let mut files = entries
            .iter()
            .zip(olds)
            .zip(news)
            .map(|((entry, old), new)| {
                diff_file(
                    DiffInput {
                        path: &entry.path,
                        old_path: entry.old_path.as_deref(),
                        kind: entry.kind,
                        old: old.as_deref(),
                        new: new.as_deref(),
                    },
                    &self.diff_options,
                )
            })
            .collect::<GitResult<Vec<_>>>()?;
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn stash_refs(&self) -> GitResult<Vec<Ref>> {
        if !self.git_dir.join("refs").join("stash").exists() {
            return Ok(Vec::new());
        }
        let out = self.cli.run(["stash", "list", STASH_FORMAT]).await?;
        Ok(porcelain::parse_stash_list(&String::from_utf8_lossy(&out)))
    }
}

/// Link target in the form git stores it in a blob
#[cfg(unix)]
fn link_text(target: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    target.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn link_text(target: &Path) -> Vec<u8> {
    target.to_string_lossy().replace('\\', "/").into_bytes()
}

fn blob_by_hex(repo: &gix::Repository, hex: &str) -> GitResult<Vec<u8>> {
    let id = gix::ObjectId::from_hex(hex.as_bytes())
        .map_err(|e| GitError::InvalidArgument(format!("bad object id '{hex}': {e}")))?;
    let object = repo
        .find_object(id)
        .map_err(|_| GitError::RevisionUnresolvable(hex.to_string()))?;
    Ok(object.detach().data)
}

/// `revision:path`, `None` when the path does not exist at that revision
fn tree_entry(repo: &gix::Repository, spec: &str) -> GitResult<Option<Vec<u8>>> {
    match repo.rev_parse_single(spec) {
        Ok(id) => {
            let object = id.object().map_err(corrupt)?;
            Ok(Some(object.detach().data))
        }
        Err(_) => Ok(None),
    }
}

fn resolve_commit(repo: &gix::Repository, rev: &str) -> GitResult<gix::ObjectId> {
    let id = repo
        .rev_parse_single(rev)
        .map_err(|_| GitError::RevisionUnresolvable(rev.to_string()))?;
    let object = id
        .object()
        .map_err(|_| GitError::RevisionUnresolvable(rev.to_string()))?;
    let commit = object
        .peel_to_kind(gix::object::Kind::Commit)
        .map_err(|_| GitError::RevisionUnresolvable(rev.to_string()))?;
    Ok(commit.id)
}

fn first_parent(repo: &gix::Repository, id: gix::ObjectId) -> GitResult<Option<gix::ObjectId>> {
    let commit = repo
        .find_object(id)
        .map_err(|_| GitError::RevisionUnresolvable(id.to_string()))?
        .try_into_commit()
        .map_err(|_| GitError::RevisionUnresolvable(id.to_string()))?;
    Ok(commit.parent_ids().next().map(|p| p.detach()))
}

#[async_trait]
impl RepoRead for GitRepository {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn control_dir(&self) -> &Path {
        &self.git_dir
    }

    #[instrument(skip(self), fields(repo = %self.workdir.display()))]
    async fn status(&self) -> GitResult<StatusReport> {
        self.ensure_present()?;
        let out = self
            .cli
            .run([
                "status",
                "--porcelain=v2",
                "-z",
                "--branch",
                "--untracked-files=all",
            ])
            .await?;
        porcelain::parse_status_v2(&out)
    }

    #[instrument(skip(self), fields(repo = %self.workdir.display()))]
    async fn walk_commits(
        &self,
        spec: &WalkSpec,
        page: super::types::PageRequest,
    ) -> GitResult<CommitPage> {
        let revisions = if spec.revisions.is_empty() {
            if !self.has_any_commit().await? {
                return Ok(CommitPage {
                    commits: Vec::new(),
                    skip: page.skip,
                    exhausted: true,
                });
            }
            self.all_revisions().await?
        } else {
            for rev in &spec.revisions {
                validate::revision(rev)?;
            }
            spec.revisions.clone()
        };

        let out = self
            .cli
            .command(["log", "--topo-order", LOG_FORMAT])
            .arg(format!("--skip={}", page.skip))
            .arg(format!("--max-count={}", page.limit + 1))
            .args(revisions)
            .arg("--")
            .run()
            .await?;
        let mut commits = porcelain::parse_log(&out.stdout)?;
        let exhausted = commits.len() <= page.limit;
        commits.truncate(page.limit);
        debug!(count = commits.len(), exhausted, "walked commits");
        Ok(CommitPage {
            commits,
            skip: page.skip,
            exhausted,
        })
    }

    #[instrument(skip(self), fields(repo = %self.workdir.display()))]
    async fn list_refs(&self) -> GitResult<Vec<Ref>> {
        let mut refs = self
            .with_repo(|repo| {
                let head_name = repo.head_name().map_err(corrupt)?;
                let platform = repo.references().map_err(corrupt)?;
                let iter = platform.all().map_err(corrupt)?.peeled().map_err(corrupt)?;

                let mut refs = Vec::new();
                for reference in iter {
                    let reference = reference.map_err(corrupt)?;
                    let full = reference.name().as_bstr().to_str_lossy().into_owned();
                    let Some((kind, short)) = RefKind::classify(&full) else {
                        continue;
                    };
                    if kind == RefKind::Stash {
                        // listed per entry below
                        continue;
                    }
                    let is_head = head_name
                        .as_ref()
                        .is_some_and(|h| h.as_bstr() == reference.name().as_bstr());
                    refs.push(Ref {
                        short_name: short.to_string(),
                        name: full.clone(),
                        target: CommitId::from(reference.id().detach()),
                        kind,
                        is_head,
                    });
                }
                Ok(refs)
            })
            .await?;
        refs.extend(self.stash_refs().await?);
        refs.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
        Ok(refs)
    }

    #[instrument(skip(self), fields(repo = %self.workdir.display()))]
    async fn list_remotes(&self) -> GitResult<Vec<RemoteInfo>> {
        self.with_repo(|repo| {
            let mut remotes = Vec::new();
            for name in repo.remote_names() {
                let remote = repo.find_remote(name.as_ref()).map_err(corrupt)?;
                remotes.push(RemoteInfo {
                    name: name.to_str_lossy().into_owned(),
                    url: remote
                        .url(gix::remote::Direction::Fetch)
                        .map(|url| url.to_bstring().to_str_lossy().into_owned()),
                });
            }
            remotes.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(remotes)
        })
        .await
    }

    #[instrument(skip(self), fields(repo = %self.workdir.display()))]
    async fn diff_workdir(&self, filter: &super::types::PathFilter) -> GitResult<Vec<FileDiff>> {
        self.ensure_present()?;
        let pathspec = Self::pathspec_args(filter)?;

        let out = self
            .cli
            .command(["diff-files", "-z", "--name-status"])
            .args(pathspec.clone())
            .run()
            .await?;
        let mut entries = porcelain::parse_name_status(&out.stdout)?;

        // unmerged paths are listed once per stage
        entries.dedup_by(|a, b| a.path == b.path);

        let out = self
            .cli
            .command(["ls-files", "-z", "--others", "--exclude-standard"])
            .args(pathspec)
            .run()
            .await?;
        entries.extend(
            out.stdout
                .split(|b| *b == 0)
                .filter(|t| !t.is_empty())
                .map(|t| NameStatus {
                    kind: ChangeKind::Added,
                    path: String::from_utf8_lossy(t).into_owned(),
                    old_path: None,
                    unmerged: false,
                }),
        );
        entries.retain(|e| filter.matches(&e.path));
        let mut files = Vec::with_capacity(entries.len());
        for entry in entries {
            if !self.is_workdir_dir(entry.path.trim_end_matches('/')).await {
                files.push(entry);
            }
        }
        let entries = files;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let index = self.index_blobs().await?;
        let mut old_blobs = Vec::with_capacity(entries.len());
        let mut old_tree = Vec::with_capacity(entries.len());
        for entry in &entries {
            if entry.unmerged {
                old_blobs.push(None);
                old_tree.push(Some(format!("HEAD:{}", entry.path)));
            } else if entry.kind == ChangeKind::Added {
                old_blobs.push(None);
                old_tree.push(None);
            } else {
                old_blobs.push(index.get(&entry.path).cloned());
                old_tree.push(None);
            }
        }
        let from_index = self.load_blobs(old_blobs).await?;
        let from_head = self.load_tree_entries(old_tree).await?;
        let olds = from_index
            .into_iter()
            .zip(from_head)
            .map(|(a, b)| a.or(b))
            .collect();

        let mut news = Vec::with_capacity(entries.len());
        for entry in &entries {
            news.push(if entry.kind == ChangeKind::Deleted {
                None
            } else {
                self.read_workdir_file(&entry.path).await?
            });
        }
        self.build_diffs(&entries, olds, news)
    }

    #[instrument(skip(self), fields(repo = %self.workdir.display()))]
    async fn diff_staged(&self, filter: &super::types::PathFilter) -> GitResult<Vec<FileDiff>> {
        self.ensure_present()?;
        let born = self.head_is_born().await?;
        let base = if born { "HEAD" } else { EMPTY_TREE };

        let out = self
            .cli
            .command(["diff-index", "--cached", "-z", "--name-status", "-M", base])
            .args(Self::pathspec_args(filter)?)
            .run()
            .await?;
        let mut entries = porcelain::parse_name_status(&out.stdout)?;
        entries.retain(|e| !e.unmerged && filter.matches(&e.path));
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let index = self.index_blobs().await?;
        let olds = self
            .load_tree_entries(
                entries
                    .iter()
                    .map(|e| {
                        (born && e.kind != ChangeKind::Added).then(|| {
                            format!("HEAD:{}", e.old_path.as_deref().unwrap_or(&e.path))
                        })
                    })
                    .collect(),
            )
            .await?;
        let news = self
            .load_blobs(
                entries
                    .iter()
                    .map(|e| {
                        (e.kind != ChangeKind::Deleted)
                            .then(|| index.get(&e.path).cloned())
                            .flatten()
                    })
                    .collect(),
            )
            .await?;
        self.build_diffs(&entries, olds, news)
    }

    #[instrument(skip(self), fields(repo = %self.workdir.display(), commit = %id))]
    async fn diff_commit(&self, id: &CommitId) -> GitResult<Vec<FileDiff>> {
        let rev = id.as_str().to_string();
        let (commit, parent) = self
            .with_repo(move |repo| {
                let commit = resolve_commit(repo, &rev)?;
                Ok((commit, first_parent(repo, commit)?))
            })
            .await?;

        let mut cmd = self.cli.command(["diff-tree", "-r", "-z", "--name-status", "-M"]);
        cmd = match parent {
            Some(parent) => cmd.arg(parent.to_string()).arg(commit.to_string()),
            None => cmd.arg("--root").arg(commit.to_string()),
        };
        let out = cmd.run().await?;
        let entries = porcelain::parse_name_status(&out.stdout)?;

        let olds = self
            .load_tree_entries(
                entries
                    .iter()
                    .map(|e| {
                        let parent = parent?;
                        (e.kind != ChangeKind::Added).then(|| {
                            format!("{parent}:{}", e.old_path.as_deref().unwrap_or(&e.path))
                        })
                    })
                    .collect(),
            )
            .await?;
        let news = self
            .load_tree_entries(
                entries
                    .iter()
                    .map(|e| (e.kind != ChangeKind::Deleted).then(|| format!("{commit}:{}", e.path)))
                    .collect(),
            )
            .await?;
        self.build_diffs(&entries, olds, news)
    }

    #[instrument(skip(self), fields(repo = %self.workdir.display()))]
    async fn blame_file(&self, path: &str, revision: Option<&str>) -> GitResult<Vec<BlameLine>> {
        self.ensure_present()?;
        validate::path(path)?;
        let mut cmd = self.cli.command(["blame", "--porcelain"]);
        if let Some(rev) = revision {
            validate::revision(rev)?;
            cmd = cmd.arg(rev);
        }
        let out = cmd.arg("--").arg(path).run().await?;
        porcelain::parse_blame(&out.stdout_lossy())
    }

    #[instrument(skip(self), fields(repo = %self.workdir.display(), scope = %query.scope))]
    async fn search(&self, query: &SearchQuery) -> GitResult<Vec<Commit>> {
        if query.text.is_empty() {
            return Err(GitError::InvalidArgument("empty search text".to_string()));
        }
        if !self.has_any_commit().await? {
            return Ok(Vec::new());
        }

        let mut cmd = self
            .cli
            .command(["log", "--topo-order", LOG_FORMAT])
            .arg(format!("--max-count={}", query.limit));
        let mut pathspec = Vec::new();
        cmd = match query.scope {
            SearchScope::Message => cmd.args(["-F", "-i"]).arg(format!("--grep={}", query.text)),
            SearchScope::Author => cmd
                .args(["-F", "-i"])
                .arg(format!("--author={}", query.text)),
            SearchScope::Content => cmd.arg(format!("-S{}", query.text)),
            SearchScope::Path => {
                pathspec.push(format!(":(icase)*{}*", query.text));
                cmd
            }
        };
        let out = cmd
            .args(self.all_revisions().await?)
            .arg("--")
            .args(pathspec)
            .run()
            .await?;
        porcelain::parse_log(&out.stdout)
    }

    #[instrument(skip(self), fields(repo = %self.workdir.display()))]
    async fn read_file_at(&self, path: &str, revision: &str) -> GitResult<Vec<u8>> {
        validate::path(path)?;
        validate::revision(revision)?;
        let path = path.to_string();
        let revision = revision.to_string();
        self.with_repo(move |repo| {
            resolve_commit(repo, &revision)?;
            tree_entry(repo, &format!("{revision}:{path}"))?.ok_or(GitError::PathNotTracked(path))
        })
        .await
    }

    #[instrument(skip(self), fields(repo = %self.workdir.display()))]
    async fn conflict_state(&self) -> GitResult<Option<ConflictState>> {
        self.ensure_present()?;
        let dir = &self.git_dir;
        let operation = if dir.join("rebase-merge").is_dir() || dir.join("rebase-apply").is_dir() {
            Some(ConflictOperation::Rebase)
        } else if dir.join("MERGE_HEAD").is_file() {
            Some(ConflictOperation::Merge)
        } else if dir.join("CHERRY_PICK_HEAD").is_file() {
            Some(ConflictOperation::CherryPick)
        } else if dir.join("REVERT_HEAD").is_file() {
            Some(ConflictOperation::Revert)
        } else {
            None
        };

        let paths = self.unmerged_paths().await?;
        let state = match operation {
            Some(operation) => Some(ConflictState { operation, paths }),
            None if !paths.is_empty() => Some(ConflictState {
                operation: ConflictOperation::StashApply,
                paths,
            }),
            None => None,
        };
        Ok(state)
    }

    async fn read_blob(&self, blob: &BlobHandle) -> GitResult<Vec<u8>> {
        let hex = blob.0.clone();
        self.with_repo(move |repo| blob_by_hex(repo, &hex)).await
    }
}
