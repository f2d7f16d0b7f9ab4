//! Job iteration for queue-level scheduling.
//!
//! Outer schedulers consume candidate jobs through the `JobIterator`
//! contract: next job, or `None` at the end, with sticky errors. Three
//! implementations are provided:
//!
//! - **`InMemoryJobIterator`** over a pre-copied slice
//! - **`QueuedJobsIterator`** lazily loading batches from a repository
//!   through a bounded buffer fed by a background task
//! - **`MultiJobsIterator`** draining a list of iterators in order

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use muster_core::JobRef;

use crate::error::{SchedulerError, SchedulerResult};

/// Batch size used by [`QueuedJobsIterator::new`].
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Pull-based job stream. Once a call returns an error, every
/// subsequent call returns the same error.
#[async_trait]
pub trait JobIterator: Send {
    async fn next_job(&mut self) -> SchedulerResult<Option<JobRef>>;
}

/// Backing store for queued jobs.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Ids of all queued jobs in the queue, in scheduling order.
    async fn queue_job_ids(&self, queue: &str) -> anyhow::Result<Vec<String>>;

    /// Look up jobs by id. Unknown ids come back as `None` and are
    /// skipped by iterators.
    async fn existing_jobs_by_ids(&self, ids: &[String]) -> anyhow::Result<Vec<Option<JobRef>>>;
}

// ── In-memory iteration ────────────────────────────────────────────

/// Strictly sequential iterator over a pre-copied job slice.
pub struct InMemoryJobIterator {
    jobs: Vec<JobRef>,
    next: usize,
}

impl InMemoryJobIterator {
    pub fn new(jobs: Vec<JobRef>) -> Self {
        Self { jobs, next: 0 }
    }
}

#[async_trait]
impl JobIterator for InMemoryJobIterator {
    async fn next_job(&mut self) -> SchedulerResult<Option<JobRef>> {
        let job = self.jobs.get(self.next).cloned();
        if job.is_some() {
            self.next += 1;
        }
        Ok(job)
    }
}

#[derive(Default)]
struct RepositoryState {
    jobs_by_queue: std::collections::HashMap<String, Vec<JobRef>>,
    jobs_by_id: std::collections::HashMap<String, JobRef>,
}

/// In-memory job repository with deterministically ordered queues.
///
/// Queues are kept sorted by `scheduling_order_compare`: priority-class
/// priority descending, in-queue priority ascending, submit time
/// ascending.
#[derive(Default)]
pub struct InMemoryJobRepository {
    state: Mutex<RepositoryState>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, job: JobRef) {
        let mut state = self.state.lock();
        let queue = job.queue().to_string();
        state.jobs_by_id.insert(job.id().to_string(), job.clone());
        let jobs = state.jobs_by_queue.entry(queue).or_default();
        jobs.push(job);
        jobs.sort_by(|a, b| a.scheduling_order_compare(b.as_ref()));
    }

    pub fn enqueue_many(&self, jobs: Vec<JobRef>) {
        let mut state = self.state.lock();
        let mut touched = std::collections::HashSet::new();
        for job in jobs {
            let queue = job.queue().to_string();
            state.jobs_by_id.insert(job.id().to_string(), job.clone());
            state.jobs_by_queue.entry(queue.clone()).or_default().push(job);
            touched.insert(queue);
        }
        for queue in touched {
            if let Some(jobs) = state.jobs_by_queue.get_mut(&queue) {
                jobs.sort_by(|a, b| a.scheduling_order_compare(b.as_ref()));
            }
        }
    }

    /// Iterator over a snapshot of one queue.
    pub fn job_iterator(&self, queue: &str) -> InMemoryJobIterator {
        let state = self.state.lock();
        InMemoryJobIterator::new(
            state
                .jobs_by_queue
                .get(queue)
                .cloned()
                .unwrap_or_default(),
        )
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn queue_job_ids(&self, queue: &str) -> anyhow::Result<Vec<String>> {
        let state = self.state.lock();
        Ok(state
            .jobs_by_queue
            .get(queue)
            .map(|jobs| jobs.iter().map(|job| job.id().to_string()).collect())
            .unwrap_or_default())
    }

    async fn existing_jobs_by_ids(&self, ids: &[String]) -> anyhow::Result<Vec<Option<JobRef>>> {
        let state = self.state.lock();
        Ok(ids
            .iter()
            .map(|id| state.jobs_by_id.get(id).cloned())
            .collect())
    }
}

// ── Lazy batched iteration ─────────────────────────────────────────

/// Iterator over all jobs in a queue, loading them from the repository
/// in fixed-size batches off the consumer's critical path.
///
/// Ids are fetched once at construction; a background task then
/// prefetches jobs batch by batch into a bounded buffer of twice the
/// batch size, exerting backpressure on the loader. The cancellation
/// token stops both ends.
pub struct QueuedJobsIterator {
    token: CancellationToken,
    buffer: mpsc::Receiver<Result<JobRef, String>>,
    err: Option<SchedulerError>,
}

impl QueuedJobsIterator {
    pub async fn new(
        token: CancellationToken,
        queue: &str,
        repo: Arc<dyn JobRepository>,
    ) -> SchedulerResult<Self> {
        Self::with_batch_size(token, queue, repo, DEFAULT_BATCH_SIZE).await
    }

    pub async fn with_batch_size(
        token: CancellationToken,
        queue: &str,
        repo: Arc<dyn JobRepository>,
        batch_size: usize,
    ) -> SchedulerResult<Self> {
        let job_ids = repo
            .queue_job_ids(queue)
            .await
            .map_err(|e| SchedulerError::Repository(e.to_string()))?;
        debug!(%queue, jobs = job_ids.len(), batch_size, "queued jobs iterator started");

        // One extra batch in flight while the consumer drains the last.
        let (tx, rx) = mpsc::channel(2 * batch_size.max(1));
        tokio::spawn(load_jobs(token.clone(), job_ids, tx, batch_size.max(1), repo));
        Ok(Self {
            token,
            buffer: rx,
            err: None,
        })
    }
}

#[async_trait]
impl JobIterator for QueuedJobsIterator {
    async fn next_job(&mut self) -> SchedulerResult<Option<JobRef>> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        tokio::select! {
            // Cancellation wins over buffered jobs.
            biased;
            _ = self.token.cancelled() => {
                self.err = Some(SchedulerError::Cancelled);
                Err(SchedulerError::Cancelled)
            }
            msg = self.buffer.recv() => match msg {
                None => Ok(None),
                Some(Ok(job)) => Ok(Some(job)),
                Some(Err(message)) => {
                    let err = SchedulerError::Repository(message);
                    self.err = Some(err.clone());
                    Err(err)
                }
            }
        }
    }
}

/// Background loader feeding a `QueuedJobsIterator`. Terminates the
/// buffer by dropping the sender on end, error, or cancellation.
async fn load_jobs(
    token: CancellationToken,
    job_ids: Vec<String>,
    buffer: mpsc::Sender<Result<JobRef, String>>,
    batch_size: usize,
    repo: Arc<dyn JobRepository>,
) {
    for batch in job_ids.chunks(batch_size) {
        let jobs = match repo.existing_jobs_by_ids(batch).await {
            Ok(jobs) => jobs,
            Err(e) => {
                let _ = buffer.send(Err(e.to_string())).await;
                return;
            }
        };
        // Ids with no backing job are skipped.
        for job in jobs.into_iter().flatten() {
            tokio::select! {
                _ = token.cancelled() => return,
                sent = buffer.send(Ok(job)) => {
                    if sent.is_err() {
                        // Consumer went away.
                        return;
                    }
                }
            }
        }
    }
}

// ── Chained iteration ──────────────────────────────────────────────

/// Drains a list of iterators in order, advancing to the next when the
/// current one ends.
pub struct MultiJobsIterator {
    iterators: Vec<Box<dyn JobIterator>>,
    current: usize,
}

impl MultiJobsIterator {
    pub fn new(iterators: Vec<Box<dyn JobIterator>>) -> Self {
        Self {
            iterators,
            current: 0,
        }
    }
}

#[async_trait]
impl JobIterator for MultiJobsIterator {
    async fn next_job(&mut self) -> SchedulerResult<Option<JobRef>> {
        while let Some(iterator) = self.iterators.get_mut(self.current) {
            match iterator.next_job().await? {
                Some(job) => return Ok(Some(job)),
                None => self.current += 1,
            }
        }
        Ok(None)
    }
}
