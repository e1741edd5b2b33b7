//! Job dispatch over a bounded worker pool
//!
//! A single dispatcher task owns one FIFO queue per repository and applies a
//! reader/writer discipline to it:
//! - reads at the front of the queue start while no write is running
//! - a write starts only once nothing else of that repository is running
//! - nothing overtakes a queued write
//!
//! Workers share a fair semaphore sized to the pool, report their result, then
//! tell the dispatcher they are done so the queue can advance.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{Job, JobHandle, JobId, JobOutput, JobResult};
use crate::error::{Error, GitError, JobError};
use crate::git::{GitResult, Ref, RefReconciliation, RepoWrite};
use crate::state::RepoId;

/// Default number of concurrently running jobs across all repositories
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Default limit for fetch, pull and push
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Jobs running at once, across repositories
    pub pool_size: usize,
    /// Limit for network operations
    pub network_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            network_timeout: DEFAULT_NETWORK_TIMEOUT,
        }
    }
}

/// A finished job on its way to the submitter.
///
/// Whoever receives completions applies the result first and then calls
/// [`Completion::deliver`], so a submitter that awaited its handle observes
/// the applied state.
#[derive(Debug)]
pub struct Completion {
    pub result: Arc<JobResult>,
    reply: oneshot::Sender<Arc<JobResult>>,
}

impl Completion {
    /// Hand the result to the waiting [`JobHandle`]
    pub fn deliver(self) {
        // The submitter may have dropped its handle
        let _ = self.reply.send(self.result);
    }
}

enum Command {
    Register {
        repo: RepoId,
        backend: Arc<dyn RepoWrite>,
    },
    Release {
        repo: RepoId,
    },
    Submit(Pending),
    Finished {
        repo: RepoId,
        was_write: bool,
    },
}

struct Pending {
    id: JobId,
    repo: RepoId,
    job: Job,
    cancel: CancellationToken,
    reply: oneshot::Sender<Arc<JobResult>>,
    submitted: Instant,
}

/// Submits jobs to the dispatcher; cheap to clone
#[derive(Clone)]
pub struct Scheduler {
    commands: mpsc::UnboundedSender<Command>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Start the dispatcher. Must be called from within a tokio runtime.
    pub fn new(config: SchedulerConfig) -> Self {
        Self::start(config, None)
    }

    /// Start the dispatcher, routing every result through `completions`
    pub fn with_completions(
        config: SchedulerConfig,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        Self::start(config, Some(completions))
    }

    fn start(config: SchedulerConfig, completions: Option<mpsc::UnboundedSender<Completion>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher {
            repos: HashMap::new(),
            worker: WorkerContext {
                pool: Arc::new(Semaphore::new(config.pool_size.max(1))),
                network_timeout: config.network_timeout,
                completions,
            },
            commands: tx.downgrade(),
        };
        tokio::spawn(dispatcher.run(rx));
        info!(
            pool_size = config.pool_size,
            network_timeout = ?config.network_timeout,
            "job scheduler started"
        );
        Self {
            commands: tx,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Make a repository's backend available to jobs
    pub fn register(&self, repo: RepoId, backend: Arc<dyn RepoWrite>) -> Result<(), JobError> {
        self.commands
            .send(Command::Register { repo, backend })
            .map_err(|_| JobError::SchedulerClosed)
    }

    /// Forget a repository. Queued jobs fail with `RepositoryClosed`,
    /// running ones complete.
    pub fn release(&self, repo: RepoId) {
        let _ = self.commands.send(Command::Release { repo });
    }

    /// Queue a job; never blocks
    pub fn submit(&self, repo: RepoId, job: Job) -> JobHandle {
        self.submit_as(JobId::new(), repo, job)
    }

    /// Queue a job under an id chosen by the caller
    #[instrument(skip(self, job), fields(repo = %repo, job = %job.describe()))]
    pub fn submit_as(&self, id: JobId, repo: RepoId, job: Job) -> JobHandle {
        let cancel = CancellationToken::new();
        let (reply, receiver) = oneshot::channel();
        let pending = Pending {
            id,
            repo,
            job,
            cancel: cancel.clone(),
            reply,
            submitted: Instant::now(),
        };
        if self.commands.send(Command::Submit(pending)).is_err() {
            // Reply sender dropped with the command: the handle reports SchedulerClosed
            warn!("job submitted after scheduler shutdown");
        }
        JobHandle::new(id, repo, cancel, receiver)
    }
}

#[derive(Clone)]
struct WorkerContext {
    pool: Arc<Semaphore>,
    network_timeout: Duration,
    completions: Option<mpsc::UnboundedSender<Completion>>,
}

impl WorkerContext {
    fn deliver(&self, result: JobResult, reply: oneshot::Sender<Arc<JobResult>>) {
        let completion = Completion {
            result: Arc::new(result),
            reply,
        };
        match &self.completions {
            Some(tx) => {
                if let Err(mpsc::error::SendError(completion)) = tx.send(completion) {
                    completion.deliver();
                }
            }
            None => completion.deliver(),
        }
    }

    /// Report a job that never reached a worker
    fn reject(&self, pending: Pending, error: Error) {
        let result = JobResult {
            job_id: pending.id,
            repo: pending.repo,
            description: pending.job.describe(),
            was_write: pending.job.is_write(),
            sections: pending.job.sections(),
            cancelled: pending.cancel.is_cancelled(),
            outcome: Err(error),
            elapsed: pending.submitted.elapsed(),
        };
        self.deliver(result, pending.reply);
    }
}

struct RepoQueue {
    backend: Arc<dyn RepoWrite>,
    pending: VecDeque<Pending>,
    running_reads: usize,
    writing: bool,
}

struct Dispatcher {
    repos: HashMap<RepoId, RepoQueue>,
    worker: WorkerContext,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl Dispatcher {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Register { repo, backend } => {
                    debug!(repo = %repo, "registered repository");
                    self.repos.insert(
                        repo,
                        RepoQueue {
                            backend,
                            pending: VecDeque::new(),
                            running_reads: 0,
                            writing: false,
                        },
                    );
                }
                Command::Release { repo } => {
                    if let Some(queue) = self.repos.remove(&repo) {
                        debug!(repo = %repo, queued = queue.pending.len(), "released repository");
                        for pending in queue.pending {
                            self.worker
                                .reject(pending, JobError::RepositoryClosed(repo).into());
                        }
                    }
                }
                Command::Submit(pending) => {
                    let repo = pending.repo;
                    match self.repos.get_mut(&repo) {
                        Some(queue) => {
                            queue.pending.push_back(pending);
                            self.dispatch(repo);
                        }
                        None => self
                            .worker
                            .reject(pending, JobError::RepositoryClosed(repo).into()),
                    }
                }
                Command::Finished { repo, was_write } => {
                    if let Some(queue) = self.repos.get_mut(&repo) {
                        if was_write {
                            queue.writing = false;
                        } else {
                            queue.running_reads = queue.running_reads.saturating_sub(1);
                        }
                        self.dispatch(repo);
                    }
                }
            }
        }
        debug!("job dispatcher stopped");
    }

    /// Start every job at the front of `repo`'s queue that may run now
    fn dispatch(&mut self, repo: RepoId) {
        let Some(queue) = self.repos.get_mut(&repo) else {
            return;
        };

        while let Some(front) = queue.pending.front() {
            if front.cancel.is_cancelled() {
                if let Some(pending) = queue.pending.pop_front() {
                    let id = pending.id;
                    self.worker.reject(pending, JobError::Cancelled(id).into());
                }
                continue;
            }

            let is_write = front.job.is_write();
            let runnable = if is_write {
                !queue.writing && queue.running_reads == 0
            } else {
                !queue.writing
            };
            if !runnable {
                debug!(
                    repo = %repo,
                    queued = queue.pending.len(),
                    writing = queue.writing,
                    reads = queue.running_reads,
                    "job waits"
                );
                break;
            }

            let Some(pending) = queue.pending.pop_front() else {
                break;
            };
            let Some(finished) = self.commands.upgrade() else {
                // Every submitter is gone
                break;
            };
            if is_write {
                queue.writing = true;
            } else {
                queue.running_reads += 1;
            }
            debug!(repo = %repo, job = %pending.id, write = is_write, "dispatching");
            tokio::spawn(run_job(
                self.worker.clone(),
                Arc::clone(&queue.backend),
                pending,
                finished,
            ));
        }
    }
}

async fn run_job(
    worker: WorkerContext,
    backend: Arc<dyn RepoWrite>,
    pending: Pending,
    finished: mpsc::UnboundedSender<Command>,
) {
    let Pending {
        id,
        repo,
        job,
        cancel,
        reply,
        submitted,
    } = pending;
    let description = job.describe();
    let was_write = job.is_write();
    let sections = job.sections();

    let outcome = execute(&worker, id, job, backend, &cancel).await;

    match &outcome {
        Ok(_) if was_write => info!(repo = %repo, job = %description, "write completed"),
        Ok(_) => debug!(repo = %repo, job = %description, "read completed"),
        Err(e) => debug!(repo = %repo, job = %description, error = %e, "job failed"),
    }

    let result = JobResult {
        job_id: id,
        repo,
        description,
        was_write,
        sections,
        cancelled: cancel.is_cancelled(),
        outcome,
        elapsed: submitted.elapsed(),
    };
    worker.deliver(result, reply);
    let _ = finished.send(Command::Finished { repo, was_write });
}

async fn execute(
    worker: &WorkerContext,
    id: JobId,
    job: Job,
    backend: Arc<dyn RepoWrite>,
    cancel: &CancellationToken,
) -> Result<JobOutput, Error> {
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(JobError::Cancelled(id).into()),
        permit = Arc::clone(&worker.pool).acquire_owned() => {
            permit.map_err(|_| JobError::SchedulerClosed)?
        }
    };

    let timeout = worker.network_timeout;
    // A panic inside the job surfaces as a JoinError instead of unwinding here
    let task = tokio::spawn(async move { run_guarded(job, backend, timeout).await });
    match task.await {
        Ok(result) => Ok(result?),
        Err(e) => {
            let reason = if e.is_panic() {
                panic_message(e.into_panic())
            } else {
                "worker task was cancelled".to_string()
            };
            warn!(job = %id, reason = %reason, "job worker failed");
            Err(JobError::WorkerFailed(id, reason).into())
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "job panicked".to_string()
    }
}

/// Run a job; network writes run under the timeout with ref reconciliation
async fn run_guarded(
    job: Job,
    backend: Arc<dyn RepoWrite>,
    timeout: Duration,
) -> GitResult<JobOutput> {
    let network = match &job {
        Job::Write(write) if write.is_network() => Some(write.describe()),
        _ => None,
    };
    let Some(operation) = network else {
        return job.execute(backend.as_ref()).await;
    };

    let snapshot = backend.list_refs().await;
    match tokio::time::timeout(timeout, job.execute(backend.as_ref())).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation = %operation, after = ?timeout, "network operation timed out");
            let reconciliation = reconcile(backend.as_ref(), snapshot).await;
            Err(GitError::NetworkTimeout {
                operation,
                after: timeout,
                reconciliation,
            })
        }
    }
}

/// Undo partial ref updates, or at least report the refs as they now are
async fn reconcile(
    backend: &dyn RepoWrite,
    snapshot: GitResult<Vec<Ref>>,
) -> RefReconciliation {
    if backend.supports_atomic_ref_updates() {
        match &snapshot {
            Ok(refs) => match backend.restore_refs(refs).await {
                Ok(()) => {
                    warn!(refs = refs.len(), "rolled back refs to pre-operation snapshot");
                    return RefReconciliation::RolledBack;
                }
                Err(e) => warn!(error = %e, "ref rollback failed; re-querying"),
            },
            Err(e) => warn!(error = %e, "no ref snapshot to roll back to"),
        }
    }
    match backend.list_refs().await {
        Ok(refs) => RefReconciliation::Requeried(refs),
        Err(e) => RefReconciliation::Unavailable(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{InMemoryRepository, RepoRead};
    use crate::job::{CredentialHandle, ReadJob, WriteJob};

    fn fake() -> Arc<InMemoryRepository> {
        let repo = InMemoryRepository::new("scheduler");
        repo.write_file("a.txt", "one\n");
        repo.commit_all("initial");
        Arc::new(repo)
    }

    #[tokio::test]
    async fn test_unknown_repository_is_rejected() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let result = scheduler
            .submit(RepoId::new(), Job::Read(ReadJob::Status))
            .wait()
            .await
            .unwrap();
        assert!(matches!(
            result.outcome,
            Err(Error::Job(JobError::RepositoryClosed(_)))
        ));
    }

    #[tokio::test]
    async fn test_writes_run_in_submission_order() {
        let backend = fake();
        backend.set_write_delay(Duration::from_millis(30));
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let repo = RepoId::new();
        scheduler.register(repo, backend.clone()).unwrap();

        let first = scheduler.submit(
            repo,
            Job::Write(WriteJob::CreateBranch {
                name: "one".into(),
                start: None,
            }),
        );
        let second = scheduler.submit(
            repo,
            Job::Write(WriteJob::CreateTag {
                name: "v1".into(),
                target: "HEAD".into(),
                message: None,
            }),
        );
        assert!(second.wait().await.unwrap().is_ok());
        assert!(first.wait().await.unwrap().is_ok());
        assert_eq!(
            backend.operations(),
            vec![
                "begin:create_branch",
                "end:create_branch",
                "begin:create_tag",
                "end:create_tag"
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_never_runs() {
        let backend = fake();
        backend.set_write_delay(Duration::from_millis(50));
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let repo = RepoId::new();
        scheduler.register(repo, backend.clone()).unwrap();

        let running = scheduler.submit(
            repo,
            Job::Write(WriteJob::CreateTag {
                name: "v1".into(),
                target: "HEAD".into(),
                message: None,
            }),
        );
        let queued = scheduler.submit(repo, Job::Write(WriteJob::DeleteTag("v1".into())));
        queued.cancel();

        let result = queued.wait().await.unwrap();
        assert!(result.never_started());
        assert!(result.cancelled);
        assert!(running.wait().await.unwrap().is_ok());
        assert!(!backend.operations().iter().any(|op| op.contains("delete_tag")));
    }

    #[tokio::test]
    async fn test_network_timeout_rolls_back_refs() {
        let backend = fake();
        let head = backend.list_refs().await.unwrap()[0].target.clone();
        backend.set_remote_branch("origin", "main", &head);
        backend.set_remote_branch("origin", "topic", &head);
        backend.set_network_delay(Duration::from_secs(5));
        let before = backend.list_refs().await.unwrap();

        let scheduler = Scheduler::new(SchedulerConfig {
            pool_size: 2,
            network_timeout: Duration::from_millis(100),
        });
        let repo = RepoId::new();
        scheduler.register(repo, backend.clone()).unwrap();

        let result = scheduler
            .submit(
                repo,
                Job::Write(WriteJob::Fetch {
                    remote: "origin".into(),
                    credentials: CredentialHandle::default(),
                }),
            )
            .wait()
            .await
            .unwrap();

        match &result.outcome {
            Err(Error::Git(GitError::NetworkTimeout { reconciliation, .. })) => {
                assert_eq!(*reconciliation, RefReconciliation::RolledBack);
            }
            other => panic!("expected a network timeout, got {other:?}"),
        }
        assert_eq!(backend.list_refs().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_reads_share_the_pool() {
        let backend = fake();
        let scheduler = Scheduler::new(SchedulerConfig {
            pool_size: 1,
            ..SchedulerConfig::default()
        });
        let repo = RepoId::new();
        scheduler.register(repo, backend).unwrap();

        let handles: Vec<_> = (0..5)
            .map(|_| scheduler.submit(repo, Job::Read(ReadJob::Status)))
            .collect();
        for handle in handles {
            let result = handle.wait().await.unwrap();
            assert!(matches!(result.output(), Some(JobOutput::Status(_))));
        }
    }

    #[tokio::test]
    async fn test_completions_are_routed_before_delivery() {
        let backend = fake();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::with_completions(SchedulerConfig::default(), tx);
        let repo = RepoId::new();
        scheduler.register(repo, backend).unwrap();

        let handle = scheduler.submit(repo, Job::Read(ReadJob::ListRefs));
        let id = handle.id();
        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.result.job_id, id);
        completion.deliver();
        assert_eq!(handle.wait().await.unwrap().job_id, id);
    }
}
