//! Job Queue
//!
//! In-memory FIFO of jobs drained by registered processors, one job in flight
//! at a time per queue instance. Independent concerns (email sending, CRM
//! sync, file processing) get their own instance.
//!
//! A failed attempt is requeued at the tail (implicit backoff) until the
//! job's `max_attempts` is spent or the error is permanent, then the job is
//! marked `Failed` and kept for monitoring until `clear_completed`.

pub mod constants;
mod processor;

pub use processor::{JobContext, JobProcessor, ProcessError};

use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::{Job, JobId, JobState};
use crate::port::{IdProvider, TimeProvider};
use constants::DEFAULT_MAX_ATTEMPTS;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: String,
    pub max_attempts: u32,
    /// Per-attempt limit; `None` lets a processor run indefinitely
    pub processor_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: constants::EMAIL_QUEUE.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            processor_timeout: None,
        }
    }
}

impl QueueConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Job counts per state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub name: String,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

struct QueueState<P> {
    jobs: HashMap<JobId, Job<P>>,
    pending: VecDeque<JobId>,
    processing: bool,
}

struct QueueShared<P: Send + Sync + 'static> {
    config: QueueConfig,
    state: Mutex<QueueState<P>>,
    processors: RwLock<Vec<Arc<dyn JobProcessor<P>>>>,
    /// Bumped on every job state change
    changes: watch::Sender<u64>,
    retry_policy: RetryPolicy,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

/// Named FIFO job queue; clones share the same jobs
pub struct JobQueue<P: Send + Sync + 'static> {
    shared: Arc<QueueShared<P>>,
}

impl<P: Send + Sync + 'static> Clone for JobQueue<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P> JobQueue<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub fn new(
        config: QueueConfig,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            shared: Arc::new(QueueShared {
                config,
                state: Mutex::new(QueueState {
                    jobs: HashMap::new(),
                    pending: VecDeque::new(),
                    processing: false,
                }),
                processors: RwLock::new(Vec::new()),
                changes,
                retry_policy: RetryPolicy::new(),
                id_provider,
                time_provider,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<P>> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self) {
        self.shared.changes.send_modify(|v| *v = v.wrapping_add(1));
    }

    fn processors(&self) -> Vec<Arc<dyn JobProcessor<P>>> {
        self.shared
            .processors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Append a job in `Queued` state and start draining if idle
    ///
    /// Processor errors never surface here; they end up in the job's state.
    pub fn add(&self, payload: P) -> JobId {
        let id = self.shared.id_provider.generate_id();
        let now = self.shared.time_provider.now_millis();
        let job = Job::new(
            id.clone(),
            now,
            self.shared.config.name.clone(),
            payload,
            self.shared.config.max_attempts,
        );

        {
            let mut state = self.lock();
            state.jobs.insert(id.clone(), job);
            state.pending.push_back(id.clone());
        }
        debug!(queue = %self.name(), job_id = %id, "Job enqueued");
        self.notify();
        self.kick();
        id
    }

    /// Register a processor; several processors form a fallback chain
    pub fn register_processor(&self, processor: Arc<dyn JobProcessor<P>>) {
        self.shared
            .processors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(processor);
        self.kick();
    }

    /// Claim the drain loop if jobs are pending and nobody else holds it
    fn try_claim(&self) -> bool {
        let mut state = self.lock();
        if state.processing || state.pending.is_empty() {
            return false;
        }
        state.processing = true;
        true
    }

    /// Spawn the drain loop on the current runtime, if any
    fn kick(&self) {
        if self.processors().is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(queue = %self.name(), "No runtime, waiting for run_until_idle");
            return;
        };
        if !self.try_claim() {
            return;
        }
        let queue = self.clone();
        handle.spawn(async move { queue.drain().await });
    }

    /// Drain the queue in the caller's task, or wait if another task is draining
    pub async fn run_until_idle(&self) {
        if self.processors().is_empty() {
            warn!(queue = %self.name(), "No processor registered, nothing to run");
            return;
        }
        if self.try_claim() {
            self.drain().await;
        } else {
            self.wait_idle().await;
        }
    }

    /// Process jobs until the pending list is empty; caller holds the claim
    async fn drain(&self) {
        info!(queue = %self.name(), "Queue processing started");
        loop {
            let ctx = {
                let mut state = self.lock();
                let next = loop {
                    let Some(id) = state.pending.pop_front() else {
                        break None;
                    };
                    if state.jobs.contains_key(&id) {
                        break Some(id);
                    }
                };
                let Some(id) = next else {
                    state.processing = false;
                    drop(state);
                    self.notify();
                    info!(queue = %self.name(), "Queue drained");
                    return;
                };

                let now = self.shared.time_provider.now_millis();
                match state.jobs.get_mut(&id) {
                    Some(job) => match job.start(now) {
                        Ok(()) => Arc::new(JobContext {
                            job_id: job.id.clone(),
                            queue: job.queue.clone(),
                            payload: job.payload.clone(),
                            attempt: job.attempts,
                            max_attempts: job.max_attempts,
                        }),
                        Err(e) => {
                            error!(job_id = %id, error = %e, "Skipping job in unexpected state");
                            continue;
                        }
                    },
                    None => continue,
                }
            };
            self.notify();

            debug!(
                queue = %self.name(),
                job_id = %ctx.job_id,
                attempt = ctx.attempt,
                "Processing job"
            );
            let outcome = self.run_processors(&ctx).await;
            self.finish(&ctx, outcome).await;
        }
    }

    /// Try each processor in registration order until one succeeds
    async fn run_processors(&self, ctx: &Arc<JobContext<P>>) -> Result<(), ProcessError> {
        let mut last_error = ProcessError::permanent("no processor registered");
        for processor in self.processors() {
            match self.invoke(processor, Arc::clone(ctx)).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(job_id = %ctx.job_id, error = %e, "Processor failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Run one processor in its own task so a panic cannot take the queue down
    async fn invoke(
        &self,
        processor: Arc<dyn JobProcessor<P>>,
        ctx: Arc<JobContext<P>>,
    ) -> Result<(), ProcessError> {
        let handle = tokio::spawn(async move { processor.process(&ctx).await });
        let abort = handle.abort_handle();

        let joined = match self.shared.config.processor_timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return Err(ProcessError::retryable(format!(
                        "processor timed out after {}ms",
                        limit.as_millis()
                    )));
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                let msg = panic_message(join_err.into_panic());
                error!(queue = %self.name(), panic_msg = %msg, "Processor panicked");
                Err(ProcessError::permanent(format!("processor panicked: {}", msg)))
            }
            Err(join_err) => Err(ProcessError::retryable(format!(
                "processor task cancelled: {}",
                join_err
            ))),
        }
    }

    /// Apply an attempt's outcome to the job
    async fn finish(&self, ctx: &JobContext<P>, outcome: Result<(), ProcessError>) {
        let now = self.shared.time_provider.now_millis();
        let failed_with = {
            let mut state = self.lock();
            let Some(job) = state.jobs.get_mut(&ctx.job_id) else {
                return;
            };

            match outcome {
                Ok(()) => {
                    if let Err(e) = job.complete(now) {
                        error!(job_id = %ctx.job_id, error = %e, "Cannot complete job");
                    } else {
                        info!(queue = %self.name(), job_id = %ctx.job_id, "Job completed");
                    }
                    None
                }
                Err(err) => match self.shared.retry_policy.should_retry(job, &err) {
                    RetryDecision::Requeue => {
                        if let Err(e) = job.requeue(err.message.clone()) {
                            error!(job_id = %ctx.job_id, error = %e, "Cannot requeue job");
                            None
                        } else {
                            state.pending.push_back(ctx.job_id.clone());
                            None
                        }
                    }
                    RetryDecision::Failed => Some(err),
                },
            }
        };

        // Hooks run before the job turns Failed, so waiters see their effects
        if let Some(err) = failed_with {
            self.fire_on_failed(ctx, err.clone()).await;
            let mut state = self.lock();
            if let Some(job) = state.jobs.get_mut(&ctx.job_id) {
                if let Err(e) = job.fail(now, err.message.clone()) {
                    error!(job_id = %ctx.job_id, error = %e, "Cannot fail job");
                }
            }
            error!(
                queue = %self.name(),
                job_id = %ctx.job_id,
                attempts = ctx.attempt,
                error = %err,
                "Job failed"
            );
        }
        self.notify();
    }

    async fn fire_on_failed(&self, ctx: &JobContext<P>, err: ProcessError) {
        let ctx = Arc::new(ctx.clone());
        let err = Arc::new(err);
        for processor in self.processors() {
            let hook_ctx = Arc::clone(&ctx);
            let hook_err = Arc::clone(&err);
            let hook =
                tokio::spawn(async move { processor.on_failed(&hook_ctx, &hook_err).await });
            if let Err(join_err) = hook.await {
                error!(job_id = %ctx.job_id, error = %join_err, "on_failed hook panicked");
            }
        }
    }

    /// Snapshot of a job
    pub fn get(&self, job_id: &str) -> Option<Job<P>> {
        self.lock().jobs.get(job_id).cloned()
    }

    /// Wait until the job is `Completed` or `Failed`
    ///
    /// Returns `None` if the job is unknown (or was cleared meanwhile).
    pub async fn wait_for(&self, job_id: &str) -> Option<Job<P>> {
        let mut changes = self.shared.changes.subscribe();
        loop {
            match self.get(job_id) {
                None => return None,
                Some(job) if job.state.is_terminal() => return Some(job),
                Some(_) => {}
            }
            if changes.changed().await.is_err() {
                return self.get(job_id);
            }
        }
    }

    /// True when nothing is draining and nothing can be drained
    pub fn is_idle(&self) -> bool {
        let no_processors = self.processors().is_empty();
        let state = self.lock();
        !state.processing && (state.pending.is_empty() || no_processors)
    }

    /// Wait until the queue has nothing left to do
    pub async fn wait_idle(&self) {
        let mut changes = self.shared.changes.subscribe();
        while !self.is_idle() {
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn get_status(&self) -> QueueStatus {
        let state = self.lock();
        let mut status = QueueStatus {
            name: self.shared.config.name.clone(),
            total: state.jobs.len(),
            ..QueueStatus::default()
        };
        for job in state.jobs.values() {
            match job.state {
                JobState::Queued => status.queued += 1,
                JobState::Processing => status.processing += 1,
                JobState::Completed => status.completed += 1,
                JobState::Failed => status.failed += 1,
            }
        }
        status
    }

    /// Drop completed jobs; failed jobs are kept for monitoring
    pub fn clear_completed(&self) -> usize {
        let removed = {
            let mut state = self.lock();
            let before = state.jobs.len();
            state.jobs.retain(|_, job| job.state != JobState::Completed);
            before - state.jobs.len()
        };
        if removed > 0 {
            debug!(queue = %self.name(), removed = removed, "Cleared completed jobs");
            self.notify();
        }
        removed
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
