//! Entry point tying backends, scheduler, watchers and the state cache together
//!
//! Results flow scheduler → completion pump → [`StateCache`] → submitter, so a
//! caller that awaited a job always sees its effect in the next snapshot.
//! Watcher events flow into the cache through a second pump.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{Error, GitError, JobError, Result};
use crate::git::{
    CommitId, CommitWalk, ConflictState, DiffTarget, GitRepository, PageRequest, PathFilter, Ref,
    RepoWrite, StatusReport, WalkSpec,
};
use crate::graph::GraphLayout;
use crate::job::{Completion, Job, JobHandle, JobId, JobOutput, JobResult, ReadJob, Scheduler};
use crate::state::{CommitWindow, DiffSet, RepoId, RepositoryState, StateCache, StateChange};
use crate::suggest::{SuggestionProvider, suggestion_input};
use crate::watch::{RepoWatcher, Sections, WatchEvent};

struct OpenRepository {
    backend: Arc<dyn RepoWrite>,
    /// None when watching is disabled or could not start
    watcher: Option<RepoWatcher>,
    workdir: PathBuf,
}

/// All open repositories of one process
pub struct Workspace {
    config: Config,
    scheduler: Scheduler,
    cache: Arc<StateCache>,
    repos: Mutex<HashMap<RepoId, OpenRepository>>,
    watch_events: mpsc::UnboundedSender<WatchEvent>,
    shutdown: CancellationToken,
}

impl Workspace {
    /// Start the scheduler and pumps. Must be called from within a tokio runtime.
    pub fn new(config: Config) -> Self {
        let cache = Arc::new(StateCache::new(config.graph_palette_size));
        let shutdown = CancellationToken::new();

        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::with_completions(config.scheduler_config(), completions_tx);
        tokio::spawn(pump_completions(Arc::clone(&cache), completions_rx));

        let (watch_tx, watch_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump_watch_events(
            Arc::clone(&cache),
            watch_rx,
            shutdown.clone(),
        ));

        Self {
            config,
            scheduler,
            cache,
            repos: Mutex::new(HashMap::new()),
            watch_events: watch_tx,
            shutdown,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open the repository containing `path`
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(&self, path: impl AsRef<Path>) -> Result<RepoId> {
        let repository = GitRepository::from_config(path.as_ref(), &self.config)?;
        self.open_with_backend(Arc::new(repository))
    }

    /// Open a repository served by any backend
    pub fn open_with_backend(&self, backend: Arc<dyn RepoWrite>) -> Result<RepoId> {
        if self.shutdown.is_cancelled() {
            return Err(JobError::SchedulerClosed.into());
        }

        let repo = RepoId::new();
        let workdir = backend.workdir().to_path_buf();
        let control_dir = backend.control_dir().to_path_buf();

        self.cache.open(repo, workdir.clone());
        if let Err(e) = self.scheduler.register(repo, Arc::clone(&backend)) {
            self.cache.close(repo);
            return Err(e.into());
        }

        let watcher = if self.config.watch_enabled && control_dir.is_dir() {
            match RepoWatcher::spawn(
                repo,
                &control_dir,
                self.config.watch_debounce(),
                self.watch_events.clone(),
            ) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(repo = %repo, error = %e, "continuing without watcher");
                    None
                }
            }
        } else {
            None
        };

        info!(repo = %repo, workdir = %workdir.display(), watched = watcher.is_some(), "opened repository");
        self.lock_repos().insert(
            repo,
            OpenRepository {
                backend,
                watcher,
                workdir,
            },
        );
        Ok(repo)
    }

    /// Stop watching and drop the cached state; queued jobs still finish
    pub fn close(&self, repo: RepoId) -> bool {
        let Some(open) = self.lock_repos().remove(&repo) else {
            return false;
        };
        if let Some(watcher) = &open.watcher {
            watcher.stop();
        }
        self.scheduler.release(repo);
        self.cache.close(repo);
        info!(repo = %repo, workdir = %open.workdir.display(), "closed repository");
        true
    }

    pub fn is_open(&self, repo: RepoId) -> bool {
        self.lock_repos().contains_key(&repo)
    }

    pub fn repos(&self) -> Vec<RepoId> {
        self.lock_repos().keys().copied().collect()
    }

    pub fn workdir(&self, repo: RepoId) -> Option<PathBuf> {
        self.lock_repos().get(&repo).map(|open| open.workdir.clone())
    }

    /// Latest state, never blocks on running jobs
    pub fn snapshot(&self, repo: RepoId) -> Option<Arc<RepositoryState>> {
        self.cache.get(repo)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.cache.subscribe()
    }

    /// Queue a job; its result is folded into the cache before the handle resolves
    pub fn submit(&self, repo: RepoId, job: impl Into<Job>) -> Result<JobHandle> {
        if !self.is_open(repo) {
            return Err(JobError::RepositoryClosed(repo).into());
        }
        let job = job.into();
        let id = JobId::new();
        self.cache.track(repo, id, job.describe(), job.is_write());
        Ok(self.scheduler.submit_as(id, repo, job))
    }

    /// Submit and wait for the result
    pub async fn run(&self, repo: RepoId, job: impl Into<Job>) -> Result<Arc<JobResult>> {
        Ok(self.submit(repo, job)?.wait().await?)
    }

    /// Submit, wait and unwrap the payload
    pub async fn execute(&self, repo: RepoId, job: impl Into<Job>) -> Result<JobOutput> {
        let result = self.run(repo, job).await?;
        match &result.outcome {
            Ok(output) => Ok(output.clone()),
            Err(e) => Err(e.duplicate()),
        }
    }

    fn state(&self, repo: RepoId) -> Result<Arc<RepositoryState>> {
        self.cache
            .get(repo)
            .ok_or_else(|| JobError::RepositoryClosed(repo).into())
    }

    pub async fn status(&self, repo: RepoId) -> Result<Arc<StatusReport>> {
        let state = self.state(repo)?;
        if let Some(status) = state.status.as_ref().filter(|_| !state.is_stale(Sections::STATUS)) {
            debug!(repo = %repo, "status cache hit");
            return Ok(Arc::clone(status));
        }
        match self.execute(repo, ReadJob::Status).await? {
            JobOutput::Status(report) => Ok(Arc::new(report)),
            other => Err(unexpected("status", &other)),
        }
    }

    pub async fn refs(&self, repo: RepoId) -> Result<Arc<Vec<Ref>>> {
        let state = self.state(repo)?;
        if !state.is_stale(Sections::REFS) {
            debug!(repo = %repo, "refs cache hit");
            return Ok(Arc::clone(&state.refs));
        }
        match self.execute(repo, ReadJob::ListRefs).await? {
            JobOutput::Refs(refs) => Ok(Arc::new(refs)),
            other => Err(unexpected("list refs", &other)),
        }
    }

    /// The loaded commit window, reloading its first page when stale
    pub async fn commits(&self, repo: RepoId) -> Result<Arc<CommitWindow>> {
        let state = self.state(repo)?;
        if !state.is_stale(Sections::COMMITS) {
            debug!(repo = %repo, commits = state.window.len(), "commit window cache hit");
            return Ok(Arc::clone(&state.window));
        }
        self.walk_page(repo, 0).await
    }

    /// Extend the commit window by one page
    pub async fn load_more_commits(&self, repo: RepoId) -> Result<Arc<CommitWindow>> {
        let state = self.state(repo)?;
        if state.is_stale(Sections::COMMITS) {
            return self.walk_page(repo, 0).await;
        }
        if state.window.exhausted {
            return Ok(Arc::clone(&state.window));
        }
        self.walk_page(repo, state.window.len()).await
    }

    async fn walk_page(&self, repo: RepoId, skip: usize) -> Result<Arc<CommitWindow>> {
        let job = ReadJob::WalkCommits {
            spec: WalkSpec::all(),
            page: PageRequest {
                skip,
                limit: self.config.commit_page_size,
            },
        };
        self.execute(repo, job).await?;
        Ok(Arc::clone(&self.state(repo)?.window))
    }

    /// Layout of the commit window, computed lazily and shared by snapshots
    pub async fn graph(&self, repo: RepoId) -> Result<Arc<GraphLayout>> {
        self.commits(repo).await?;
        Ok(self.state(repo)?.graph())
    }

    pub async fn diff(&self, repo: RepoId, target: DiffTarget) -> Result<Arc<DiffSet>> {
        let state = self.state(repo)?;
        let cached = state
            .diffs
            .as_ref()
            .filter(|set| set.target == target && !state.is_stale(Sections::DIFF));
        if let Some(set) = cached {
            debug!(repo = %repo, "diff cache hit");
            return Ok(Arc::clone(set));
        }
        let job = ReadJob::Diff {
            target,
            filter: PathFilter::all(),
        };
        match self.execute(repo, job).await? {
            JobOutput::Diff { target, files } => Ok(Arc::new(DiffSet { target, files })),
            other => Err(unexpected("diff", &other)),
        }
    }

    /// In-progress merge, rebase, cherry-pick or revert
    pub async fn conflict(&self, repo: RepoId) -> Result<Option<ConflictState>> {
        let state = self.state(repo)?;
        if !state.is_stale(Sections::CONFLICT) {
            return Ok(state.conflict.clone());
        }
        match self.execute(repo, ReadJob::ConflictState).await? {
            JobOutput::Conflict(conflict) => Ok(conflict),
            other => Err(unexpected("conflict state", &other)),
        }
    }

    pub fn select_commit(&self, repo: RepoId, commit: Option<CommitId>) {
        self.cache.select_commit(repo, commit);
    }

    /// Lazy walk straight over the backend, outside the cached window
    pub fn commit_walk(&self, repo: RepoId, spec: WalkSpec) -> Result<CommitWalk<dyn RepoWrite>> {
        let backend = self
            .lock_repos()
            .get(&repo)
            .map(|open| Arc::clone(&open.backend))
            .ok_or(JobError::RepositoryClosed(repo))?;
        Ok(CommitWalk::new(backend, spec, self.config.commit_page_size))
    }

    /// Queue reads for every stale section; returns their handles
    pub fn refresh_stale(&self, repo: RepoId) -> Result<Vec<JobHandle>> {
        let state = self.state(repo)?;
        let mut jobs = Vec::new();
        if state.is_stale(Sections::REFS) {
            jobs.push(ReadJob::ListRefs);
        }
        if state.is_stale(Sections::COMMITS) {
            jobs.push(ReadJob::WalkCommits {
                spec: WalkSpec::all(),
                page: PageRequest {
                    skip: 0,
                    limit: self.config.commit_page_size,
                },
            });
        }
        if state.is_stale(Sections::STATUS) {
            jobs.push(ReadJob::Status);
        }
        if state.is_stale(Sections::DIFF) {
            let target = state
                .diffs
                .as_ref()
                .map_or(DiffTarget::Workdir, |set| set.target.clone());
            jobs.push(ReadJob::Diff {
                target,
                filter: PathFilter::all(),
            });
        }
        if state.is_stale(Sections::CONFLICT) {
            jobs.push(ReadJob::ConflictState);
        }
        debug!(repo = %repo, stale = %state.stale, jobs = jobs.len(), "refreshing stale sections");
        jobs.into_iter().map(|job| self.submit(repo, job)).collect()
    }

    /// Ask `provider` for a message describing the staged changes
    #[instrument(skip(self, provider))]
    pub async fn suggest_message(
        &self,
        repo: RepoId,
        provider: &dyn SuggestionProvider,
    ) -> Result<String> {
        let staged = self.diff(repo, DiffTarget::Staged).await?;
        if staged.files.is_empty() {
            return Err(GitError::InvalidArgument("nothing is staged".to_string()).into());
        }
        let message = provider.suggest(&suggestion_input(&staged.files)).await?;
        Ok(message.trim().to_string())
    }

    /// Stop every watcher and release all repositories
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let drained: Vec<(RepoId, OpenRepository)> = self.lock_repos().drain().collect();
        for (repo, _) in &drained {
            self.scheduler.release(*repo);
            self.cache.close(*repo);
        }
        info!(closed = drained.len(), "workspace shut down");
    }

    fn lock_repos(&self) -> std::sync::MutexGuard<'_, HashMap<RepoId, OpenRepository>> {
        self.repos.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn unexpected(job: &str, output: &JobOutput) -> Error {
    GitError::RepositoryCorrupt(format!("{job} produced {output:?}")).into()
}

async fn pump_completions(cache: Arc<StateCache>, mut completions: mpsc::UnboundedReceiver<Completion>) {
    while let Some(completion) = completions.recv().await {
        cache.apply(&completion.result);
        completion.deliver();
    }
    debug!("completion pump stopped");
}

async fn pump_watch_events(
    cache: Arc<StateCache>,
    mut events: mpsc::UnboundedReceiver<WatchEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                None => break,
                Some(WatchEvent::Invalidated { repo, sections }) => cache.invalidate(repo, sections),
                Some(WatchEvent::Lost { repo, reason }) => cache.mark_lost(repo, reason),
            },
        }
    }
    debug!("watch event pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::git::InMemoryRepository;
    use crate::job::WriteJob;
    use crate::suggest::FileListSuggester;

    fn config() -> Config {
        Config {
            watch_enabled: false,
            ..Config::default()
        }
    }

    fn fake() -> Arc<InMemoryRepository> {
        let repo = InMemoryRepository::new("ws");
        repo.write_file("README.md", "hello\n");
        repo.commit_all("Initial commit");
        Arc::new(repo)
    }

    #[tokio::test]
    async fn test_status_is_cached_until_invalidated() {
        let workspace = Workspace::new(config());
        let backend = fake();
        let repo = workspace.open_with_backend(backend.clone()).unwrap();

        let first = workspace.status(repo).await.unwrap();
        let second = workspace.status(repo).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!workspace.snapshot(repo).unwrap().is_stale(Sections::STATUS));

        backend.write_file("README.md", "changed\n");
        workspace.cache.invalidate(repo, Sections::STATUS);
        let third = workspace.status(repo).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_awaited_write_is_visible_in_snapshot() {
        let workspace = Workspace::new(config());
        let backend = fake();
        let repo = workspace.open_with_backend(backend.clone()).unwrap();
        workspace.refs(repo).await.unwrap();

        let result = workspace
            .run(
                repo,
                WriteJob::CreateBranch {
                    name: "feature".into(),
                    start: None,
                },
            )
            .await
            .unwrap();
        assert!(result.is_ok());

        let state = workspace.snapshot(repo).unwrap();
        assert!(state.is_stale(Sections::REFS));
        assert!(state.pending.is_empty());

        let refs = workspace.refs(repo).await.unwrap();
        assert!(refs.iter().any(|r| r.short_name == "feature"));
    }

    #[tokio::test]
    async fn test_commit_window_pages() {
        let workspace = Workspace::new(Config {
            commit_page_size: 2,
            ..config()
        });
        let backend = fake();
        for i in 0..4 {
            backend.write_file("README.md", format!("v{i}\n"));
            backend.commit_all(&format!("change {i}"));
        }
        let repo = workspace.open_with_backend(backend).unwrap();

        let window = workspace.commits(repo).await.unwrap();
        assert_eq!(window.len(), 2);
        assert!(!window.exhausted);

        workspace.load_more_commits(repo).await.unwrap();
        let window = workspace.load_more_commits(repo).await.unwrap();
        assert_eq!(window.len(), 5);
        assert!(window.exhausted);

        let graph = workspace.graph(repo).await.unwrap();
        assert_eq!(graph.entries.len(), 5);
        assert_eq!(graph.width, 1);
    }

    #[tokio::test]
    async fn test_closed_repository_rejects_jobs() {
        let workspace = Workspace::new(config());
        let repo = workspace.open_with_backend(fake()).unwrap();
        assert!(workspace.close(repo));
        assert!(!workspace.close(repo));

        let err = workspace.status(repo).await.unwrap_err();
        assert!(matches!(err, Error::Job(JobError::RepositoryClosed(id)) if id == repo));
        assert!(workspace.submit(repo, ReadJob::Status).is_err());
    }

    #[tokio::test]
    async fn test_refresh_stale_clears_everything() {
        let workspace = Workspace::new(config());
        let repo = workspace.open_with_backend(fake()).unwrap();

        let handles = workspace.refresh_stale(repo).unwrap();
        assert_eq!(handles.len(), 5);
        let results = futures::future::join_all(handles.into_iter().map(JobHandle::wait)).await;
        assert!(results.iter().all(|r| r.as_ref().is_ok_and(|result| result.is_ok())));
        let state = workspace.snapshot(repo).unwrap();
        assert!(state.stale.is_empty());
        assert!(state.conflict.is_none());
        assert_eq!(state.head_ref().map(|r| r.short_name.as_str()), Some("main"));
    }

    #[tokio::test]
    async fn test_suggest_message_from_staged_diff() {
        let workspace = Workspace::new(config());
        let backend = fake();
        let repo = workspace.open_with_backend(backend.clone()).unwrap();
        let provider = FileListSuggester::new(3);

        let err = workspace.suggest_message(repo, &provider).await.unwrap_err();
        assert!(matches!(err, Error::Git(GitError::InvalidArgument(_))));

        backend.write_file("notes.txt", "todo\n");
        workspace
            .run(repo, WriteJob::StagePaths(vec!["notes.txt".into()]))
            .await
            .unwrap();
        let message = workspace.suggest_message(repo, &provider).await.unwrap();
        assert_eq!(message, "Update notes.txt");
    }

    #[tokio::test]
    async fn test_cancelled_job_leaves_state_untouched() {
        let workspace = Workspace::new(Config {
            worker_pool_size: 1,
            ..config()
        });
        let backend = fake();
        backend.set_write_delay(Duration::from_millis(100));
        let repo = workspace.open_with_backend(backend.clone()).unwrap();

        let commit = workspace
            .submit(
                repo,
                WriteJob::Commit {
                    message: "empty".into(),
                    amend: true,
                },
            )
            .unwrap();
        let status = workspace.submit(repo, ReadJob::Status).unwrap();
        status.cancel();

        assert!(commit.wait().await.unwrap().is_ok());
        let cancelled = status.wait().await.unwrap();
        assert!(cancelled.never_started());
        let state = workspace.snapshot(repo).unwrap();
        assert!(state.status.is_none());
        assert!(state.pending.is_empty());
        assert!(!backend.operations().iter().any(|op| op == "status"));
    }
}
