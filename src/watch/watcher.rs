//! notify-backed control directory watcher

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Debouncer, WatchEvent, classify};
use crate::error::WatchError;
use crate::state::RepoId;

/// Handle to a running watcher; dropping it stops watching
pub struct RepoWatcher {
    repo: RepoId,
    control_dir: PathBuf,
    /// Kept alive for as long as events are wanted
    _watcher: RecommendedWatcher,
    shutdown: CancellationToken,
}

impl RepoWatcher {
    /// Watch `control_dir` recursively and report to `events`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        repo: RepoId,
        control_dir: &Path,
        window: Duration,
        events: mpsc::UnboundedSender<WatchEvent>,
    ) -> Result<Self, WatchError> {
        // Backends may report resolved paths, so prefixes must match them
        let control_dir = &control_dir
            .canonicalize()
            .unwrap_or_else(|_| control_dir.to_path_buf());
        let init_error = |e: notify::Error| WatchError::Init {
            path: control_dir.to_path_buf(),
            reason: e.to_string(),
        };

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                // The receiver is gone once the watcher task has stopped
                let _ = raw_tx.send(result);
            },
            notify::Config::default(),
        )
        .map_err(init_error)?;
        watcher
            .watch(control_dir, RecursiveMode::Recursive)
            .map_err(init_error)?;

        let shutdown = CancellationToken::new();
        tokio::spawn(run(
            repo,
            control_dir.to_path_buf(),
            window,
            raw_rx,
            events,
            shutdown.clone(),
        ));

        info!(repo = %repo, path = %control_dir.display(), "watching control directory");
        Ok(Self {
            repo,
            control_dir: control_dir.to_path_buf(),
            _watcher: watcher,
            shutdown,
        })
    }

    pub fn repo(&self) -> RepoId {
        self.repo
    }

    pub fn control_dir(&self) -> &Path {
        &self.control_dir
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for RepoWatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run(
    repo: RepoId,
    control_dir: PathBuf,
    window: Duration,
    mut raw: mpsc::UnboundedReceiver<notify::Result<Event>>,
    events: mpsc::UnboundedSender<WatchEvent>,
    shutdown: CancellationToken,
) {
    let mut debouncer = Debouncer::new(window);
    let lost = |reason: String| {
        warn!(repo = %repo, reason = %reason, "repository watch lost");
        let _ = events.send(WatchEvent::Lost { repo, reason });
    };

    loop {
        let deadline = debouncer.deadline();
        let wake = tokio::time::Instant::from_std(deadline.unwrap_or_else(Instant::now));

        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = raw.recv() => match received {
                None => break,
                Some(Err(e)) => {
                    lost(format!("watch backend failed: {e}"));
                    break;
                }
                Some(Ok(event)) => {
                    if matches!(event.kind, EventKind::Remove(_)) && !control_dir.exists() {
                        lost(format!("{} was removed", control_dir.display()));
                        break;
                    }
                    let now = Instant::now();
                    for path in &event.paths {
                        if let Ok(relative) = path.strip_prefix(&control_dir) {
                            debouncer.push(classify(relative), now);
                        }
                    }
                }
            },
            _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                let Some(sections) = debouncer.poll(Instant::now()) else {
                    continue;
                };
                if !control_dir.exists() {
                    lost(format!("{} was removed", control_dir.display()));
                    break;
                }
                debug!(repo = %repo, sections = %sections, "invalidating");
                if events.send(WatchEvent::Invalidated { repo, sections }).is_err() {
                    break;
                }
            }
        }
    }
    debug!(repo = %repo, "watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::Sections;

    #[tokio::test]
    async fn test_ref_write_is_reported_once_after_quiet_period() {
        let dir = tempfile::tempdir().unwrap();
        let control = dir.path().join(".git");
        std::fs::create_dir_all(control.join("refs/heads")).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let repo = RepoId::new();
        let _watcher =
            RepoWatcher::spawn(repo, &control, Duration::from_millis(50), tx).unwrap();

        std::fs::write(control.join("refs/heads/main"), "0".repeat(40)).unwrap();
        std::fs::write(control.join("HEAD"), "ref: refs/heads/main\n").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            WatchEvent::Invalidated { repo: got, sections } => {
                assert_eq!(got, repo);
                assert!(sections.contains(Sections::REFS));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_removed_control_dir_is_lost() {
        let dir = tempfile::tempdir().unwrap();
        let control = dir.path().join(".git");
        std::fs::create_dir_all(control.join("refs")).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _watcher =
            RepoWatcher::spawn(RepoId::new(), &control, Duration::from_millis(20), tx).unwrap();
        std::fs::remove_dir_all(&control).unwrap();

        let lost = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = rx.recv().await {
                if matches!(event, WatchEvent::Lost { .. }) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(lost);
    }
}
