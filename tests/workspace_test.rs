//! End-to-end tests of the workspace: scheduling, cache updates and watching

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::broadcast;

use gitweave::error::{Error, GitError};
use gitweave::git::{InMemoryRepository, PathFilter, RefReconciliation, RepoRead};
use gitweave::job::CredentialHandle;
use gitweave::watch::Sections;
use gitweave::{Config, ReadJob, StateChange, Workspace, WriteJob};

fn config() -> Config {
    Config {
        watch_enabled: false,
        ..Config::default()
    }
}

fn fake() -> Arc<InMemoryRepository> {
    let repo = InMemoryRepository::new("workspace");
    repo.write_file("README.md", "hello\n");
    repo.commit_all("Initial commit");
    Arc::new(repo)
}

fn position(ops: &[String], entry: &str) -> usize {
    ops.iter()
        .position(|op| op == entry)
        .unwrap_or_else(|| panic!("{entry} missing from {ops:?}"))
}

#[tokio::test]
async fn test_stage_hunk_waits_for_in_flight_commit() {
    let workspace = Workspace::new(config());
    let backend = fake();
    backend.write_file("README.md", "changed\n");
    let hunk = backend.diff_workdir(&PathFilter::all()).await.unwrap()[0].hunks[0].clone();
    backend.set_write_delay(Duration::from_millis(100));
    let repo = workspace.open_with_backend(backend.clone()).unwrap();

    let commit = workspace
        .submit(
            repo,
            WriteJob::Commit {
                message: "Reword".into(),
                amend: true,
            },
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let stage = workspace
        .submit(
            repo,
            WriteJob::StageHunk {
                path: "README.md".into(),
                hunk,
            },
        )
        .unwrap();

    assert!(commit.wait().await.unwrap().is_ok());
    assert!(stage.wait().await.unwrap().is_ok());

    let ops = backend.operations();
    assert!(position(&ops, "end:commit") < position(&ops, "begin:stage_hunk"));
    assert_eq!(backend.staged_file("README.md"), Some(b"changed\n".to_vec()));
}

#[tokio::test]
async fn test_read_queued_behind_write_sees_its_effect() {
    let workspace = Workspace::new(config());
    let backend = fake();
    backend.set_write_delay(Duration::from_millis(50));
    backend.write_file("notes.txt", "new\n");
    let repo = workspace.open_with_backend(backend).unwrap();

    let stage = workspace
        .submit(repo, WriteJob::StagePaths(vec!["notes.txt".into()]))
        .unwrap();
    let status = workspace.submit(repo, ReadJob::Status).unwrap();

    assert!(stage.wait().await.unwrap().is_ok());
    status.wait().await.unwrap();
    let state = workspace.snapshot(repo).unwrap();
    let report = state.status.as_ref().unwrap();
    let notes = report.entries.iter().find(|e| e.path == "notes.txt").unwrap();
    assert!(notes.staged.is_some());
    assert!(!notes.untracked);
}

#[tokio::test]
async fn test_network_timeout_rolls_back_and_invalidates_refs() {
    let workspace = Workspace::new(Config {
        network_timeout_secs: 1,
        ..config()
    });
    let backend = fake();
    let head = backend.list_refs().await.unwrap()[0].target.clone();
    backend.set_remote_branch("origin", "main", &head);
    backend.set_remote_branch("origin", "topic", &head);
    backend.set_network_delay(Duration::from_secs(10));
    let repo = workspace.open_with_backend(backend.clone()).unwrap();
    let before = workspace.refs(repo).await.unwrap();

    let result = workspace
        .run(
            repo,
            WriteJob::Fetch {
                remote: "origin".into(),
                credentials: CredentialHandle::default(),
            },
        )
        .await
        .unwrap();
    match &result.outcome {
        Err(Error::Git(GitError::NetworkTimeout { reconciliation, .. })) => {
            assert_eq!(*reconciliation, RefReconciliation::RolledBack);
        }
        other => panic!("expected a network timeout, got {other:?}"),
    }

    let state = workspace.snapshot(repo).unwrap();
    assert!(state.is_stale(Sections::REFS));
    assert!(state.last_error.as_deref().unwrap_or_default().contains("timed out"));
    let after = workspace.refs(repo).await.unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn test_job_cancelled_before_start_never_runs() {
    let workspace = Workspace::new(config());
    let backend = fake();
    backend.set_write_delay(Duration::from_millis(100));
    let repo = workspace.open_with_backend(backend.clone()).unwrap();

    let first = workspace
        .submit(
            repo,
            WriteJob::CreateBranch {
                name: "first".into(),
                start: None,
            },
        )
        .unwrap();
    let second = workspace
        .submit(
            repo,
            WriteJob::CreateBranch {
                name: "second".into(),
                start: None,
            },
        )
        .unwrap();
    second.cancel();

    assert!(first.wait().await.unwrap().is_ok());
    let cancelled = second.wait().await.unwrap();
    assert!(cancelled.cancelled);
    assert!(cancelled.never_started());

    let refs = workspace.refs(repo).await.unwrap();
    assert!(refs.iter().any(|r| r.short_name == "first"));
    assert!(!refs.iter().any(|r| r.short_name == "second"));
    assert_eq!(
        backend
            .operations()
            .iter()
            .filter(|op| op.starts_with("begin:create_branch"))
            .count(),
        1
    );
}

async fn git(dir: &Path, args: &[&str]) {
    let output = tokio::process::Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .await
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

async fn create_test_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    let path = dir.path();
    git(path, &["init", "-q", "-b", "main"]).await;
    git(path, &["config", "user.email", "test@test.com"]).await;
    git(path, &["config", "user.name", "Test User"]).await;
    git(path, &["config", "commit.gpgsign", "false"]).await;
    tokio::fs::write(path.join("README.md"), "# Test\n").await.unwrap();
    git(path, &["add", "README.md"]).await;
    git(path, &["commit", "-q", "-m", "Initial commit"]).await;
    dir
}

fn watching() -> Config {
    Config {
        watch_enabled: true,
        watch_debounce_ms: 50,
        ..Config::default()
    }
}

/// Wait for a change matching `wanted`, skipping everything else
async fn expect_change<F>(changes: &mut broadcast::Receiver<StateChange>, wanted: F) -> StateChange
where
    F: Fn(&StateChange) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match changes.recv().await {
                Ok(change) if wanted(&change) => return change,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("change channel closed"),
            }
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_external_ref_change_reaches_next_status() {
    let dir = create_test_repo().await;
    let workspace = Workspace::new(watching());
    let repo = workspace.open(dir.path()).unwrap();

    let status = workspace.status(repo).await.unwrap();
    assert_eq!(status.branch.head.as_deref(), Some("main"));
    let mut changes = workspace.subscribe();

    git(dir.path(), &["checkout", "-q", "-b", "elsewhere"]).await;
    expect_change(&mut changes, |change| {
        matches!(change, StateChange::Invalidated { sections, .. } if sections.contains(Sections::REFS))
    })
    .await;

    let status = workspace.status(repo).await.unwrap();
    assert_eq!(status.branch.head.as_deref(), Some("elsewhere"));
}

#[tokio::test]
async fn test_removed_repository_becomes_unavailable() {
    let dir = create_test_repo().await;
    let workspace = Workspace::new(watching());
    let repo = workspace.open(dir.path()).unwrap();
    workspace.status(repo).await.unwrap();
    let mut changes = workspace.subscribe();

    std::fs::remove_dir_all(dir.path().join(".git")).unwrap();
    expect_change(&mut changes, |change| {
        matches!(change, StateChange::Unavailable { .. })
    })
    .await;

    let state = workspace.snapshot(repo).unwrap();
    assert!(!state.available);
    assert_eq!(state.stale, Sections::ALL);

    let err = workspace.status(repo).await.unwrap_err();
    assert!(err.is_repository_missing());
}
