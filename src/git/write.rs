//! Real repository backend: mutations
//!
//! Everything here goes through the `git` executable so the on-disk result is
//! exactly what git itself would produce. Arguments are validated first;
//! nothing is spawned for a rejected call.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use super::backend::{GitResult, RepoRead, RepoWrite};
use super::cli::GitOutput;
use super::repository::{GitRepository, corrupt};
use super::types::{
    CommitId, ConflictOperation, ConflictResolution, CredentialProvider, CredentialRequest,
    RebaseStep, Ref, RefKind, ResetMode, StashAction, WriteOutcome,
};
use super::validate;
use crate::diff::patch::{self, Direction, PatchHunk};
use crate::diff::{Hunk, LineOrigin};
use crate::error::GitError;

/// One-shot credential helper reading from the environment of the git process
const ENV_CREDENTIAL_HELPER: &str =
    "!f() { echo \"username=${GITWEAVE_USERNAME}\"; echo \"password=${GITWEAVE_PASSWORD}\"; }; f";

fn stash_selector(index: usize) -> String {
    format!("stash@{{{index}}}")
}

impl GitRepository {
    async fn head_commit(&self) -> GitResult<CommitId> {
        self.with_repo(|repo| {
            let id = repo
                .head_id()
                .map_err(|_| GitError::RevisionUnresolvable("HEAD".to_string()))?;
            Ok(CommitId::from(id.detach()))
        })
        .await
    }

    async fn ensure_not_conflicted(&self, path: &str) -> GitResult<()> {
        let unmerged = self.unmerged_paths().await?;
        if unmerged.iter().any(|p| p.path == path) {
            return Err(GitError::IndexConflict(vec![path.to_string()]));
        }
        Ok(())
    }

    /// Run an operation that may stop on conflicts
    async fn sequencer(&self, output: GitOutput, command: &str) -> GitResult<WriteOutcome> {
        if output.success() {
            return Ok(match self.head_commit().await {
                Ok(id) => WriteOutcome::Committed(id),
                Err(_) => WriteOutcome::Completed,
            });
        }
        if let Some(state) = self.conflict_state().await? {
            if !state.is_resolved() {
                info!(
                    "{} stopped with {} conflicted path(s)",
                    state.operation,
                    state.paths.len()
                );
                return Ok(WriteOutcome::Conflicted(state));
            }
        }
        Err(self.cli.classify_failure(command, &output))
    }

    async fn remote_url(&self, remote: &str) -> Option<String> {
        let out = self
            .cli
            .command(["remote", "get-url", remote])
            .output()
            .await
            .ok()?;
        out.success().then(|| out.stdout_lossy().trim().to_string())
    }

    /// Run a network command; on an authentication failure ask the provider
    /// once and retry with its credentials.
    #[instrument(skip(self, args, credentials), fields(remote = %remote))]
    async fn network(
        &self,
        args: Vec<String>,
        remote: &str,
        credentials: &dyn CredentialProvider,
    ) -> GitResult<GitOutput> {
        let command = args.join(" ");
        let first = self.cli.command(args.clone()).output().await?;
        if first.success() {
            return Ok(first);
        }
        match self.cli.classify_failure(&command, &first) {
            GitError::AuthenticationRequired { .. } => {}
            _ => return Ok(first),
        }

        let request = CredentialRequest {
            remote: remote.to_string(),
            url: self.remote_url(remote).await,
        };
        let Some(creds) = credentials.credentials(&request) else {
            return Err(GitError::AuthenticationRequired {
                remote: remote.to_string(),
            });
        };

        info!("Retrying {} with supplied credentials", command);
        let retry = self
            .cli
            .command(args)
            .config("credential.helper", "")
            .config("credential.helper", ENV_CREDENTIAL_HELPER)
            .env("GITWEAVE_USERNAME", creds.username)
            .env("GITWEAVE_PASSWORD", creds.secret)
            .output()
            .await?;
        if !retry.success() {
            if let GitError::AuthenticationRequired { .. } =
                self.cli.classify_failure(&command, &retry)
            {
                return Err(GitError::AuthenticationRequired {
                    remote: remote.to_string(),
                });
            }
        }
        Ok(retry)
    }

    fn checked(&self, output: GitOutput, command: &str) -> GitResult<WriteOutcome> {
        if output.success() {
            Ok(WriteOutcome::Completed)
        } else {
            Err(self.cli.classify_failure(command, &output))
        }
    }

    /// Apply a (partial) hunk patch to the index
    async fn apply_to_index(&self, path: &str, patch: &PatchHunk, reverse: bool) -> GitResult<()> {
        let mut cmd = self
            .cli
            .command(["apply", "--cached", "--recount", "--whitespace=nowarn"]);
        if reverse {
            cmd = cmd.arg("-R");
        }
        cmd.arg("-").stdin(patch.render(path)).run().await?;
        Ok(())
    }

    /// Stage a selection of an untracked file's lines by writing the blob directly
    async fn stage_untracked(&self, path: &str, patch: &PatchHunk) -> GitResult<()> {
        let content = patch::join_text(&patch.apply(&[], false)?);
        let out = self
            .cli
            .command(["hash-object", "-w", "--stdin"])
            .stdin(content.into_bytes())
            .run()
            .await?;
        let blob = out.stdout_lossy().trim().to_string();
        let full = self.workdir().join(path);
        let mode = if std::fs::symlink_metadata(&full).is_ok_and(|m| m.file_type().is_symlink()) {
            "120000"
        } else if is_executable(&full) {
            "100755"
        } else {
            "100644"
        };
        self.cli
            .command(["update-index", "--add", "--cacheinfo"])
            .arg(format!("{mode},{blob},{path}"))
            .run()
            .await?;
        Ok(())
    }

    async fn stage_selection(
        &self,
        path: &str,
        hunk: &Hunk,
        selected: &BTreeSet<usize>,
    ) -> GitResult<WriteOutcome> {
        validate::path(path)?;
        self.ensure_not_conflicted(path).await?;
        let Some(patch) = PatchHunk::select(hunk, selected, Direction::Forward) else {
            return Err(GitError::InvalidArgument(
                "selection contains no changed lines".to_string(),
            ));
        };
        let everything = is_whole_hunk(hunk, selected);
        let tracked = self.index_blobs().await?.contains_key(path);
        let on_disk = std::fs::symlink_metadata(self.workdir().join(path)).is_ok();

        if !tracked {
            if everything {
                self.cli.command(["add", "--"]).arg(path).run().await?;
            } else {
                self.stage_untracked(path, &patch).await?;
            }
        } else if !on_disk && everything && hunk.added() == 0 {
            self.cli
                .command(["rm", "--cached", "-q", "--"])
                .arg(path)
                .run()
                .await?;
        } else {
            self.apply_to_index(path, &patch, false).await?;
        }
        info!("Staged {} line(s) of {}", selected.len(), path);
        Ok(WriteOutcome::Completed)
    }

    async fn unstage_selection(
        &self,
        path: &str,
        hunk: &Hunk,
        selected: &BTreeSet<usize>,
    ) -> GitResult<WriteOutcome> {
        validate::path(path)?;
        self.ensure_not_conflicted(path).await?;
        let Some(patch) = PatchHunk::select(hunk, selected, Direction::Reverse) else {
            return Err(GitError::InvalidArgument(
                "selection contains no changed lines".to_string(),
            ));
        };
        let everything = is_whole_hunk(hunk, selected);
        let in_head = self.head_is_born().await?
            && self
                .cli
                .command(["cat-file", "-e"])
                .arg(format!("HEAD:{path}"))
                .output()
                .await?
                .success();

        if !in_head && everything {
            self.unstage_paths(&[path.to_string()]).await?;
        } else {
            self.apply_to_index(path, &patch, true).await?;
        }
        info!("Unstaged {} line(s) of {}", selected.len(), path);
        Ok(WriteOutcome::Completed)
    }
}

fn is_whole_hunk(hunk: &Hunk, selected: &BTreeSet<usize>) -> bool {
    hunk.lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.origin != LineOrigin::Context)
        .all(|(i, _)| selected.contains(&i))
}

fn all_lines(hunk: &Hunk) -> BTreeSet<usize> {
    hunk.changed_line_indices().into_iter().collect()
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &std::path::Path) -> bool {
    false
}

fn rebase_todo(steps: &[RebaseStep]) -> String {
    steps
        .iter()
        .map(|s| format!("{} {}\n", s.action.keyword(), s.commit))
        .collect()
}

#[async_trait]
impl RepoWrite for GitRepository {
    #[instrument(skip(self), fields(repo = %self.workdir().display()))]
    async fn stage_paths(&self, paths: &[String]) -> GitResult<WriteOutcome> {
        validate::paths(paths)?;
        self.ensure_present()?;
        let out = self
            .cli
            .command(["add", "-A", "--"])
            .args(paths.iter().cloned())
            .output()
            .await?;
        self.checked(out, "add")
    }

    #[instrument(skip(self), fields(repo = %self.workdir().display()))]
    async fn unstage_paths(&self, paths: &[String]) -> GitResult<WriteOutcome> {
        validate::paths(paths)?;
        self.ensure_present()?;
        let cmd = if self.head_is_born().await? {
            self.cli.command(["reset", "-q", "HEAD", "--"])
        } else {
            self.cli
                .command(["rm", "--cached", "-r", "-q", "--ignore-unmatch", "--"])
        };
        let out = cmd.args(paths.iter().cloned()).output().await?;
        self.checked(out, "reset")
    }

    #[instrument(skip(self, hunk), fields(repo = %self.workdir().display(), hunk = %hunk.id))]
    async fn stage_hunk(&self, path: &str, hunk: &Hunk) -> GitResult<WriteOutcome> {
        self.stage_selection(path, hunk, &all_lines(hunk)).await
    }

    #[instrument(skip(self, hunk), fields(repo = %self.workdir().display(), hunk = %hunk.id))]
    async fn unstage_hunk(&self, path: &str, hunk: &Hunk) -> GitResult<WriteOutcome> {
        self.unstage_selection(path, hunk, &all_lines(hunk)).await
    }

    #[instrument(skip(self, hunk), fields(repo = %self.workdir().display()))]
    async fn stage_lines(
        &self,
        path: &str,
        hunk: &Hunk,
        lines: &BTreeSet<usize>,
    ) -> GitResult<WriteOutcome> {
        self.stage_selection(path, hunk, lines).await
    }

    #[instrument(skip(self, hunk), fields(repo = %self.workdir().display()))]
    async fn unstage_lines(
        &self,
        path: &str,
        hunk: &Hunk,
        lines: &BTreeSet<usize>,
    ) -> GitResult<WriteOutcome> {
        self.unstage_selection(path, hunk, lines).await
    }

    #[instrument(skip(self, message), fields(repo = %self.workdir().display()))]
    async fn commit(&self, message: &str, amend: bool) -> GitResult<WriteOutcome> {
        if message.trim().is_empty() {
            return Err(GitError::InvalidArgument("empty commit message".to_string()));
        }
        self.ensure_present()?;
        let unmerged = self.unmerged_paths().await?;
        if !unmerged.is_empty() {
            return Err(GitError::IndexConflict(
                unmerged.into_iter().map(|p| p.path).collect(),
            ));
        }
        let mut cmd = self.cli.command(["commit", "-q", "-F", "-"]);
        if amend {
            cmd = cmd.arg("--amend");
        }
        cmd.stdin(message.as_bytes().to_vec()).run().await?;
        let id = self.head_commit().await?;
        info!("Committed {}", id.short());
        Ok(WriteOutcome::Committed(id))
    }

    #[instrument(skip(self), fields(repo = %self.workdir().display()))]
    async fn checkout_branch(&self, name: &str) -> GitResult<WriteOutcome> {
        validate::ref_name(name)?;
        let out = self
            .cli
            .command(["checkout", "-q", name, "--"])
            .output()
            .await?;
        self.checked(out, "checkout")
    }

    #[instrument(skip(self), fields(repo = %self.workdir().display()))]
    async fn create_branch(&self, name: &str, start: Option<&str>) -> GitResult<WriteOutcome> {
        validate::ref_name(name)?;
        let mut cmd = self.cli.command(["branch", name]);
        if let Some(start) = start {
            validate::revision(start)?;
            cmd = cmd.arg(start);
        }
        let out = cmd.output().await?;
        self.checked(out, "branch")
    }

    #[instrument(skip(self), fields(repo = %self.workdir().display()))]
    async fn delete_branch(&self, name: &str, force: bool) -> GitResult<WriteOutcome> {
        validate::ref_name(name)?;
        let flag = if force { "-D" } else { "-d" };
        let out = self.cli.command(["branch", flag, name]).output().await?;
        self.checked(out, "branch delete")
    }

    #[instrument(skip(self), fields(repo = %self.workdir().display()))]
    async fn rename_branch(&self, from: &str, to: &str) -> GitResult<WriteOutcome> {
        validate::ref_name(from)?;
        validate::ref_name(to)?;
        let out = self.cli.command(["branch", "-m", from, to]).output().await?;
        self.checked(out, "branch rename")
    }

    #[instrument(skip(self), fields(repo = %self.workdir().display()))]
    async fn cherry_pick(&self, id: &CommitId) -> GitResult<WriteOutcome> {
        let out = self
            .cli
            .command(["cherry-pick", id.as_str()])
            .output()
            .await?;
        self.sequencer(out, "cherry-pick").await
    }

    #[instrument(skip(self), fields(repo = %self.workdir().display()))]
    async fn revert(&self, id: &CommitId) -> GitResult<WriteOutcome> {
        let out = self
            .cli
            .command(["revert", "--no-edit", id.as_str()])
            .output()
            .await?;
        self.sequencer(out, "revert").await
    }

    #[instrument(skip(self), fields(repo = %self.workdir().display()))]
    async fn reset(&self, target: &str, mode: ResetMode) -> GitResult<WriteOutcome> {
        validate::revision(target)?;
        let out = self
            .cli
            .command(["reset", "-q", mode.flag(), target, "--"])
            .output()
            .await?;
        self.checked(out, "reset")
    }

    #[instrument(skip(self), fields(repo = %self.workdir().display(), action = action.label()))]
    async fn stash(&self, action: &StashAction) -> GitResult<WriteOutcome> {
        self.ensure_present()?;
        match action {
            StashAction::Save {
                message,
                include_untracked,
            } => {
                let mut cmd = self.cli.command(["stash", "push", "-q"]);
                if *include_untracked {
                    cmd = cmd.arg("--include-untracked");
                }
                if let Some(message) = message {
                    cmd = cmd.arg("-m").arg(message.clone());
                }
                let out = cmd.output().await?;
                self.checked(out, "stash push")
            }
            StashAction::Pop(index) | StashAction::Apply(index) => {
                let verb = if matches!(action, StashAction::Pop(_)) {
                    "pop"
                } else {
                    "apply"
                };
                let out = self
                    .cli
                    .command(["stash", verb, "-q"])
                    .arg(stash_selector(*index))
                    .output()
                    .await?;
                match self.sequencer(out, action.label()).await? {
                    WriteOutcome::Committed(_) => Ok(WriteOutcome::Completed),
                    other => Ok(other),
                }
            }
            StashAction::Drop(index) => {
                let out = self
                    .cli
                    .command(["stash", "drop", "-q"])
                    .arg(stash_selector(*index))
                    .output()
                    .await?;
                self.checked(out, "stash drop")
            }
        }
    }

    #[instrument(skip(self, message), fields(repo = %self.workdir().display()))]
    async fn create_tag(
        &self,
        name: &str,
        target: &str,
        message: Option<&str>,
    ) -> GitResult<WriteOutcome> {
        validate::ref_name(name)?;
        validate::revision(target)?;
        let cmd = match message {
            Some(message) => self
                .cli
                .command(["tag", "-a", name, "-F", "-", target])
                .stdin(message.as_bytes().to_vec()),
            None => self.cli.command(["tag", name, target]),
        };
        let out = cmd.output().await?;
        self.checked(out, "tag")
    }

    #[instrument(skip(self), fields(repo = %self.workdir().display()))]
    async fn delete_tag(&self, name: &str) -> GitResult<WriteOutcome> {
        validate::ref_name(name)?;
        let out = self.cli.command(["tag", "-d", name]).output().await?;
        self.checked(out, "tag delete")
    }

    async fn fetch(
        &self,
        remote: &str,
        credentials: &dyn CredentialProvider,
    ) -> GitResult<WriteOutcome> {
        validate::remote(remote)?;
        self.ensure_present()?;
        let args = vec![
            "fetch".to_string(),
            "--prune".to_string(),
            "--quiet".to_string(),
            remote.to_string(),
        ];
        let out = self.network(args, remote, credentials).await?;
        self.checked(out, "fetch")
    }

    async fn pull(
        &self,
        remote: &str,
        branch: Option<&str>,
        credentials: &dyn CredentialProvider,
    ) -> GitResult<WriteOutcome> {
        validate::remote(remote)?;
        self.ensure_present()?;
        let mut args = vec![
            "pull".to_string(),
            "--no-edit".to_string(),
            "--no-rebase".to_string(),
            "--quiet".to_string(),
            remote.to_string(),
        ];
        if let Some(branch) = branch {
            validate::ref_name(branch)?;
            args.push(branch.to_string());
        }
        let out = self.network(args, remote, credentials).await?;
        self.sequencer(out, "pull").await
    }

    async fn push(
        &self,
        remote: &str,
        refspec: Option<&str>,
        force: bool,
        credentials: &dyn CredentialProvider,
    ) -> GitResult<WriteOutcome> {
        validate::remote(remote)?;
        self.ensure_present()?;
        let mut args = vec!["push".to_string(), "--quiet".to_string()];
        if force {
            args.push("--force-with-lease".to_string());
        }
        args.push(remote.to_string());
        if let Some(refspec) = refspec {
            validate::revision(refspec.trim_start_matches('+'))?;
            args.push(refspec.to_string());
        }
        let out = self.network(args, remote, credentials).await?;
        self.checked(out, "push")
    }

    #[instrument(skip(self), fields(repo = %self.workdir().display()))]
    async fn merge(&self, revision: &str) -> GitResult<WriteOutcome> {
        validate::revision(revision)?;
        self.ensure_present()?;
        let out = self
            .cli
            .command(["merge", "--no-edit", revision])
            .output()
            .await?;
        self.sequencer(out, "merge").await
    }

    #[instrument(skip(self, todo), fields(repo = %self.workdir().display()))]
    async fn rebase(&self, onto: &str, todo: Option<&[RebaseStep]>) -> GitResult<WriteOutcome> {
        validate::revision(onto)?;
        self.ensure_present()?;
        let out = match todo {
            None => self.cli.command(["rebase", onto]).output().await?,
            Some(steps) => {
                if steps.is_empty() {
                    return Err(GitError::InvalidArgument("empty rebase todo".to_string()));
                }
                // The file must outlive the git process
                let file = tempfile::NamedTempFile::new().map_err(corrupt)?;
                tokio::fs::write(file.path(), rebase_todo(steps))
                    .await
                    .map_err(corrupt)?;
                let editor = format!("cp '{}'", file.path().display());
                self.cli
                    .command(["rebase", "-i", onto])
                    .env("GIT_SEQUENCE_EDITOR", editor)
                    .output()
                    .await?
            }
        };
        self.sequencer(out, "rebase").await
    }

    #[instrument(skip(self, resolution), fields(repo = %self.workdir().display()))]
    async fn resolve_conflict(
        &self,
        path: &str,
        resolution: &ConflictResolution,
    ) -> GitResult<WriteOutcome> {
        validate::path(path)?;
        let Some(state) = self.conflict_state().await? else {
            return Err(GitError::InvalidArgument(format!(
                "no conflict in progress for {path}"
            )));
        };
        if !state.paths.iter().any(|p| p.path == path) {
            return Err(GitError::PathNotTracked(path.to_string()));
        }

        let side = match resolution {
            ConflictResolution::Ours => Some("--ours"),
            ConflictResolution::Theirs => Some("--theirs"),
            ConflictResolution::Content(bytes) => {
                tokio::fs::write(self.workdir().join(path), bytes)
                    .await
                    .map_err(corrupt)?;
                None
            }
        };

        let mut deleted = false;
        if let Some(side) = side {
            let out = self
                .cli
                .command(["checkout", side, "--", path])
                .output()
                .await?;
            if !out.success() {
                // the chosen side deleted the file
                if out.stderr.contains("does not have") {
                    deleted = true;
                } else {
                    return Err(self.cli.classify_failure("checkout", &out));
                }
            }
        }
        if deleted {
            self.cli.command(["rm", "-q", "--", path]).run().await?;
        } else {
            self.cli.command(["add", "--", path]).run().await?;
        }

        match self.conflict_state().await? {
            Some(state) if !state.is_resolved() => Ok(WriteOutcome::Conflicted(state)),
            _ => Ok(WriteOutcome::Completed),
        }
    }

    #[instrument(skip(self), fields(repo = %self.workdir().display()))]
    async fn continue_operation(&self) -> GitResult<WriteOutcome> {
        let Some(state) = self.conflict_state().await? else {
            return Err(GitError::InvalidArgument(
                "no operation in progress".to_string(),
            ));
        };
        if !state.is_resolved() {
            return Ok(WriteOutcome::Conflicted(state));
        }
        let args: &[&str] = match state.operation {
            ConflictOperation::Rebase => &["rebase", "--continue"],
            ConflictOperation::Merge => &["commit", "--no-edit", "-q"],
            ConflictOperation::CherryPick => &["cherry-pick", "--continue"],
            ConflictOperation::Revert => &["revert", "--continue"],
            ConflictOperation::StashApply => return Ok(WriteOutcome::Completed),
        };
        let out = self.cli.command(args.iter().copied()).output().await?;
        self.sequencer(out, &args.join(" ")).await
    }

    #[instrument(skip(self), fields(repo = %self.workdir().display()))]
    async fn abort_operation(&self) -> GitResult<WriteOutcome> {
        let Some(state) = self.conflict_state().await? else {
            return Err(GitError::InvalidArgument(
                "no operation in progress".to_string(),
            ));
        };
        let args: &[&str] = match state.operation {
            ConflictOperation::Rebase => &["rebase", "--abort"],
            ConflictOperation::Merge => &["merge", "--abort"],
            ConflictOperation::CherryPick => &["cherry-pick", "--abort"],
            ConflictOperation::Revert => &["revert", "--abort"],
            ConflictOperation::StashApply => &["reset", "--merge"],
        };
        let out = self.cli.command(args.iter().copied()).output().await?;
        info!("Aborted {}", state.operation);
        self.checked(out, &args.join(" "))
    }

    fn supports_atomic_ref_updates(&self) -> bool {
        true
    }

    #[instrument(skip(self, snapshot), fields(repo = %self.workdir().display()))]
    async fn restore_refs(&self, snapshot: &[Ref]) -> GitResult<()> {
        let restorable = |r: &Ref| r.kind != RefKind::Stash;
        let current: HashMap<String, CommitId> = self
            .list_refs()
            .await?
            .into_iter()
            .filter(restorable)
            .map(|r| (r.name, r.target))
            .collect();
        let wanted: HashMap<&str, &CommitId> = snapshot
            .iter()
            .filter(|r| restorable(*r))
            .map(|r| (r.name.as_str(), &r.target))
            .collect();

        let mut script = String::from("start\n");
        let mut changes = 0;
        for (name, target) in &wanted {
            if current.get(*name) != Some(*target) {
                script.push_str(&format!("update {name} {target}\n"));
                changes += 1;
            }
        }
        for name in current.keys() {
            if !wanted.contains_key(name.as_str()) {
                script.push_str(&format!("delete {name}\n"));
                changes += 1;
            }
        }
        if changes == 0 {
            return Ok(());
        }
        script.push_str("prepare\ncommit\n");

        warn!("Restoring {} ref(s) to snapshot", changes);
        self.cli
            .command(["update-ref", "--stdin"])
            .stdin(script.into_bytes())
            .run()
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{DiffOptions, diff_text};
    use crate::git::types::RebaseAction;

    #[test]
    fn test_rebase_todo_lines() {
        let steps = vec![
            RebaseStep {
                action: RebaseAction::Pick,
                commit: CommitId::parse("aaaaaaa").unwrap(),
            },
            RebaseStep {
                action: RebaseAction::Fixup,
                commit: CommitId::parse("bbbbbbb").unwrap(),
            },
        ];
        assert_eq!(rebase_todo(&steps), "pick aaaaaaa\nfixup bbbbbbb\n");
    }

    #[test]
    fn test_whole_hunk_detection() {
        let hunks = diff_text("a\nb\nc\n", "a\nx\nc\n", &DiffOptions::default());
        let hunk = &hunks[0];
        let all = all_lines(hunk);
        assert!(is_whole_hunk(hunk, &all));
        let first: BTreeSet<usize> = all.iter().take(1).copied().collect();
        assert!(!is_whole_hunk(hunk, &first));
    }

    #[test]
    fn test_stash_selector() {
        assert_eq!(stash_selector(2), "stash@{2}");
    }
}
