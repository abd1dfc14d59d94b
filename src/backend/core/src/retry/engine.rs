//! The retry queue engine.
//!
//! Jobs live in an in-memory table keyed by id. A background loop sweeps the
//! table on a fixed period, re-attempting every due job one after another,
//! then deletes exhausted jobs past the retention window.
//!
//! Locks on the table are only held for bookkeeping, never across a handler
//! call. A job being attempted is tracked in an in-flight set so that a sweep
//! and a manual retry never run the same job twice at once.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::handler::{HandlerRegistry, JobHandler};
use super::job::{configured_secs, BackoffSchedule, JobError, JobId, JobKind, JobStatus, RetryJob};
use super::notify::{LoggingNotificationSink, Notification, NotificationEvent, NotificationSink};
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SmaError};
use crate::telemetry::RetryMetrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for the retry queue engine.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Period of the background sweep (milliseconds)
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Attempts allowed when `enqueue` is not given a limit
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
    /// Delay after the 1st, 2nd, ... failure (seconds); the last one repeats
    #[serde(default = "default_backoff_steps_secs")]
    pub backoff_steps_secs: Vec<u64>,
    /// How long exhausted jobs are kept after their last update (seconds)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_sweep_interval_ms() -> u64 { 30_000 }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff_steps_secs() -> Vec<u64> { vec![60, 300, 900] }
fn default_retention_secs() -> u64 { 7 * 24 * 60 * 60 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
            default_max_attempts: default_max_attempts(),
            backoff_steps_secs: default_backoff_steps_secs(),
            retention_secs: default_retention_secs(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_ms == 0 {
            return Err(SmaError::configuration(
                "retry.sweep_interval_ms must be greater than 0",
            ));
        }
        if self.default_max_attempts == 0 {
            return Err(SmaError::configuration(
                "retry.default_max_attempts must be at least 1",
            ));
        }
        BackoffSchedule::new(self.backoff_steps_secs.clone())?;
        configured_secs("retry.retention_secs", self.retention_secs)?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Queries, Reports and Stats
// ═══════════════════════════════════════════════════════════════════════════════

/// Filter for [`RetryQueueEngine::query`]. Empty matches every job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobQuery {
    pub kind: Option<JobKind>,
    /// Every key of this object must appear in the payload with an equal value
    pub payload: Option<Value>,
    pub status: Option<JobStatus>,
}

impl JobQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: JobKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn payload(mut self, filter: Value) -> Self {
        self.payload = Some(filter);
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn matches(&self, job: &RetryJob, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.kind.map_or(true, |kind| job.kind == kind)
            && self.status.map_or(true, |status| job.status(now) == status)
            && self
                .payload
                .as_ref()
                .map_or(true, |filter| job.payload_matches(filter))
    }
}

/// What one attempt did to its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Handler succeeded; job deleted
    Succeeded,
    /// Handler failed with attempts left; job pushed back
    Rescheduled,
    /// Handler failed on the last allowed attempt
    Exhausted,
    /// Job was cancelled while its handler ran; nothing written back
    Cancelled,
    /// No attempt made: already in flight, exhausted, or no longer due
    Skipped,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Rescheduled => "rescheduled",
            Self::Exhausted => "exhausted",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
        }
    }
}

/// Summary of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Due jobs the sweep tried to process
    pub attempted: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub exhausted: usize,
    /// Jobs cancelled while their handler ran
    pub cancelled: usize,
    /// Exhausted jobs deleted after the retention window
    pub cleaned_up: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Succeeded => self.succeeded += 1,
            AttemptOutcome::Rescheduled => self.rescheduled += 1,
            AttemptOutcome::Exhausted => self.exhausted += 1,
            AttemptOutcome::Cancelled => self.cancelled += 1,
            AttemptOutcome::Skipped => return,
        }
        self.attempted += 1;
    }
}

/// Snapshot of the job table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryStats {
    pub total: usize,
    pub pending: usize,
    pub due: usize,
    pub exhausted: usize,
    pub by_kind: BTreeMap<JobKind, usize>,
    pub in_flight: usize,
    /// Sweeps completed since construction
    pub sweeps: u64,
    pub running: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════════

struct SweepLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Removes a job from the in-flight set when the attempt ends, however it ends.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<JobId>>,
    id: JobId,
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a Mutex<HashSet<JobId>>, id: JobId) -> Option<Self> {
        if set.lock().insert(id) {
            Some(Self { set, id })
        } else {
            None
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

/// Drives failed deferred operations through bounded, backed-off retries.
///
/// ```rust,ignore
/// let engine = Arc::new(
///     RetryQueueEngine::new(config.retry.clone())?
///         .with_handler(JobKind::PostPublish, publish_handler),
/// );
/// engine.start();
/// let id = engine.enqueue(JobKind::PostPublish, json!({ "post_id": 42 }), None).await?;
/// ```
pub struct RetryQueueEngine {
    config: RetryConfig,
    backoff: BackoffSchedule,
    retention: chrono::Duration,
    jobs: RwLock<HashMap<JobId, RetryJob>>,
    in_flight: Mutex<HashSet<JobId>>,
    handlers: HandlerRegistry,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationSink>,
    sweep_lock: tokio::sync::Mutex<()>,
    sweeps: AtomicU64,
    sweep_loop: Mutex<Option<SweepLoop>>,
}

impl RetryQueueEngine {
    /// Create an engine with the system clock and the logging notifier.
    pub fn new(config: RetryConfig) -> Result<Self> {
        config.validate()?;
        let backoff = BackoffSchedule::new(config.backoff_steps_secs.clone())?;
        let retention = configured_secs("retry.retention_secs", config.retention_secs)?;

        Ok(Self {
            config,
            backoff,
            retention,
            jobs: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            handlers: HandlerRegistry::new(),
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LoggingNotificationSink),
            sweep_lock: tokio::sync::Mutex::new(()),
            sweeps: AtomicU64::new(0),
            sweep_loop: Mutex::new(None),
        })
    }

    /// Use a different clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different notification sink.
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Register the handler for `kind`.
    pub fn with_handler<H: JobHandler>(mut self, kind: JobKind, handler: H) -> Self {
        self.handlers.register(kind, Arc::new(handler));
        self
    }

    /// Register an already shared handler for `kind`.
    pub fn with_shared_handler(mut self, kind: JobKind, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.register(kind, handler);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn backoff(&self) -> &BackoffSchedule {
        &self.backoff
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Job table operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue a job whose initial attempt just failed.
    ///
    /// `max_attempts` falls back to the configured default; zero is rejected.
    pub async fn enqueue(
        &self,
        kind: JobKind,
        payload: Value,
        max_attempts: Option<u32>,
    ) -> Result<JobId> {
        self.insert(kind, payload, max_attempts, None).await
    }

    /// Like [`enqueue`](Self::enqueue), recording the initial failure message.
    pub async fn enqueue_with_error(
        &self,
        kind: JobKind,
        payload: Value,
        max_attempts: Option<u32>,
        error: impl Into<String>,
    ) -> Result<JobId> {
        self.insert(kind, payload, max_attempts, Some(error.into()))
            .await
    }

    async fn insert(
        &self,
        kind: JobKind,
        payload: Value,
        max_attempts: Option<u32>,
        last_error: Option<String>,
    ) -> Result<JobId> {
        let max_attempts = max_attempts.unwrap_or(self.config.default_max_attempts);
        if max_attempts == 0 {
            return Err(SmaError::validation("max_attempts must be at least 1")
                .with_context("kind", kind.as_str()));
        }

        if !self.handlers.contains(kind) {
            tracing::warn!(kind = %kind, "Enqueuing job with no registered handler");
        }

        let now = self.clock.now();
        let job = RetryJob::new(
            kind,
            payload,
            max_attempts,
            last_error,
            now,
            self.backoff.delay(1),
        );
        let id = job.id;
        let notification = Notification::for_job(NotificationEvent::Enqueued, &job, now);

        tracing::info!(
            job_id = %id,
            kind = %kind,
            max_attempts,
            next_retry_at = %job.next_retry_at,
            "Retry job enqueued"
        );

        self.jobs.write().insert(id, job);
        RetryMetrics::record_enqueued(kind);

        self.notifier.notify(notification).await;
        Ok(id)
    }

    /// Look up one job.
    pub fn get(&self, id: JobId) -> Option<RetryJob> {
        self.jobs.read().get(&id).cloned()
    }

    /// Remove a job. An attempt already running is not interrupted, but its
    /// result is discarded.
    pub fn cancel(&self, id: JobId) -> Result<()> {
        let removed = self.jobs.write().remove(&id);
        match removed {
            Some(job) => {
                tracing::info!(
                    job_id = %id,
                    kind = %job.kind,
                    attempts = job.attempts,
                    in_flight = self.in_flight.lock().contains(&id),
                    "Retry job cancelled"
                );
                Ok(())
            }
            None => Err(SmaError::job_not_found(id)),
        }
    }

    /// Jobs matching `query`, oldest first.
    pub fn query(&self, query: &JobQuery) -> Vec<RetryJob> {
        let now = self.clock.now();
        let mut jobs: Vec<RetryJob> = self
            .jobs
            .read()
            .values()
            .filter(|job| query.matches(job, now))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));
        jobs
    }

    /// Count jobs by derived status and kind.
    pub fn stats(&self) -> RetryStats {
        let now = self.clock.now();
        let mut stats = RetryStats {
            in_flight: self.in_flight.lock().len(),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            running: self.is_running(),
            ..Default::default()
        };

        for job in self.jobs.read().values() {
            stats.total += 1;
            *stats.by_kind.entry(job.kind).or_insert(0) += 1;
            match job.status(now) {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Due => stats.due += 1,
                JobStatus::Exhausted => stats.exhausted += 1,
            }
        }

        stats
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Processing
    // ─────────────────────────────────────────────────────────────────────────

    /// Attempt a job right now, regardless of its schedule.
    ///
    /// Counts as a regular attempt. Exhausted jobs and jobs already being
    /// attempted are left alone and report [`AttemptOutcome::Skipped`].
    pub async fn manual_retry(&self, id: JobId) -> Result<AttemptOutcome> {
        if !self.jobs.read().contains_key(&id) {
            return Err(SmaError::job_not_found(id));
        }

        tracing::info!(job_id = %id, "Manual retry requested");
        Ok(self.process(id, true).await)
    }

    /// Run one sweep now. Waits for a sweep already in progress to finish.
    pub async fn sweep_now(&self) -> SweepReport {
        let _sweeping = self.sweep_lock.lock().await;
        let started = Instant::now();
        let now = self.clock.now();

        let due: Vec<JobId> = {
            let jobs = self.jobs.read();
            let mut due: Vec<&RetryJob> = jobs
                .values()
                .filter(|job| job.status(now) == JobStatus::Due)
                .collect();
            due.sort_by_key(|job| (job.next_retry_at, job.created_at));
            due.into_iter().map(|job| job.id).collect()
        };

        let mut report = SweepReport::default();

        // One job at a time: handlers talk to rate-limited platform APIs.
        for id in due {
            report.record(self.process(id, false).await);
        }

        report.cleaned_up = self.cleanup();
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.publish_gauges();
        RetryMetrics::record_sweep(started.elapsed().as_secs_f64());

        if report.attempted > 0 || report.cleaned_up > 0 {
            tracing::info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                rescheduled = report.rescheduled,
                exhausted = report.exhausted,
                cancelled = report.cancelled,
                cleaned_up = report.cleaned_up,
                duration_ms = started.elapsed().as_millis() as u64,
                "Retry sweep finished"
            );
        } else {
            tracing::trace!("Retry sweep found nothing to do");
        }

        report
    }

    /// Delete exhausted jobs not updated within the retention window.
    pub fn cleanup(&self) -> usize {
        let cutoff = self.clock.now() - self.retention;
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, job| !(job.is_exhausted() && job.updated_at < cutoff));
        let removed = before - jobs.len();
        drop(jobs);

        if removed > 0 {
            tracing::info!(removed, "Expired exhausted retry jobs removed");
        }
        RetryMetrics::record_cleaned_up(removed);
        removed
    }

    async fn process(&self, id: JobId, manual: bool) -> AttemptOutcome {
        let Some(_in_flight) = InFlight::claim(&self.in_flight, id) else {
            tracing::debug!(job_id = %id, "Job already in flight, skipping");
            return AttemptOutcome::Skipped;
        };

        let (kind, payload, attempt, scheduled_at) = {
            let now = self.clock.now();
            let mut jobs = self.jobs.write();
            let Some(job) = jobs.get_mut(&id) else {
                return AttemptOutcome::Skipped;
            };
            if job.is_exhausted() {
                return AttemptOutcome::Skipped;
            }
            let scheduled_at = job.next_retry_at;
            if manual {
                job.next_retry_at = now;
            } else if scheduled_at > now {
                return AttemptOutcome::Skipped;
            }
            job.attempts += 1;
            job.updated_at = now;
            (job.kind, job.payload.clone(), job.attempts, scheduled_at)
        };

        tracing::debug!(job_id = %id, kind = %kind, attempt, manual, "Attempting retry job");

        let result = match self.handlers.get(kind) {
            Some(handler) => AssertUnwindSafe(handler.handle(&payload))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(JobError::fatal(format!(
                        "Handler panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                })
                .map_err(|e| e.to_string()),
            None => Err(SmaError::handler_not_registered(kind)
                .user_message()
                .to_string()),
        };

        let now = self.clock.now();
        let (outcome, exhausted) = {
            let mut jobs = self.jobs.write();
            if !jobs.contains_key(&id) {
                (AttemptOutcome::Cancelled, None)
            } else if let Err(message) = result {
                SmaError::job_handler_failed(id, message.as_str()).log();
                match jobs.get_mut(&id) {
                    Some(job) => {
                        // A manual retry pulled the schedule forward; the next
                        // one may not land before the time it replaced.
                        job.next_retry_at = job.next_retry_at.max(scheduled_at);
                        job.record_failure(message, now, &self.backoff);
                        if job.is_exhausted() {
                            let notification =
                                Notification::for_job(NotificationEvent::Exhausted, job, now);
                            (AttemptOutcome::Exhausted, Some(notification))
                        } else {
                            (AttemptOutcome::Rescheduled, None)
                        }
                    }
                    None => (AttemptOutcome::Cancelled, None),
                }
            } else {
                jobs.remove(&id);
                (AttemptOutcome::Succeeded, None)
            }
        };

        match outcome {
            AttemptOutcome::Cancelled => {
                tracing::info!(job_id = %id, kind = %kind, "Job cancelled during attempt, result discarded");
            }
            AttemptOutcome::Succeeded => {
                tracing::info!(job_id = %id, kind = %kind, attempt, "Retry job succeeded");
            }
            AttemptOutcome::Rescheduled => {
                tracing::debug!(job_id = %id, kind = %kind, attempt, "Retry job rescheduled");
            }
            AttemptOutcome::Exhausted => {
                SmaError::job_exhausted(id, attempt).log();
            }
            AttemptOutcome::Skipped => {}
        }

        RetryMetrics::record_attempt(kind, outcome.as_str());

        if let Some(notification) = exhausted {
            self.notifier.notify(notification).await;
        }

        outcome
    }

    fn publish_gauges(&self) {
        let stats = self.stats();
        RetryMetrics::set_jobs(JobStatus::Pending, stats.pending);
        RetryMetrics::set_jobs(JobStatus::Due, stats.due);
        RetryMetrics::set_jobs(JobStatus::Exhausted, stats.exhausted);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Start the periodic sweep. Returns `false` if it was already running.
    ///
    /// The first sweep happens one period after start.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut sweep_loop = self.sweep_loop.lock();
        if sweep_loop.is_some() {
            tracing::debug!("Retry engine already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let period = Duration::from_millis(self.config.sweep_interval_ms);
        let handle = tokio::spawn(run_sweeps(Arc::downgrade(self), period, cancel.clone()));

        *sweep_loop = Some(SweepLoop { cancel, handle });
        tracing::info!(sweep_interval_ms = self.config.sweep_interval_ms, "Retry engine started");
        true
    }

    /// Stop the periodic sweep. A sweep in progress finishes first.
    /// Returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let taken = self.sweep_loop.lock().take();
        let Some(sweep_loop) = taken else {
            return false;
        };

        sweep_loop.cancel.cancel();
        if let Err(e) = sweep_loop.handle.await {
            tracing::error!(error = %e, "Retry sweep loop ended abnormally");
        }
        tracing::info!("Retry engine stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.sweep_loop.lock().is_some()
    }
}

impl Drop for RetryQueueEngine {
    fn drop(&mut self) {
        if let Some(sweep_loop) = self.sweep_loop.get_mut().take() {
            sweep_loop.cancel.cancel();
        }
    }
}

async fn run_sweeps(engine: Weak<RetryQueueEngine>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.sweep_now().await;
            }
        }
    }

    tracing::debug!("Retry sweep loop exited");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::retry::{BroadcastNotificationSink, JobResult};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn engine_with(
        clock: Arc<ManualClock>,
        handler: impl JobHandler,
    ) -> RetryQueueEngine {
        RetryQueueEngine::new(RetryConfig::default())
            .unwrap()
            .with_clock(clock)
            .with_handler(JobKind::PostPublish, handler)
    }

    #[test]
    fn test_config_validation() {
        assert!(RetryConfig::default().validate().is_ok());
        let bad = RetryConfig {
            backoff_steps_secs: vec![],
            ..Default::default()
        };
        assert!(RetryQueueEngine::new(bad).is_err());
        let bad = RetryConfig {
            default_max_attempts: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let bad = RetryConfig {
            backoff_steps_secs: vec![u64::MAX],
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(RetryQueueEngine::new(bad).is_err());

        let bad = RetryConfig {
            retention_secs: u64::MAX / 2,
            ..Default::default()
        };
        let error = RetryQueueEngine::new(bad).err().unwrap();
        assert_eq!(error.code(), crate::error::ErrorCode::InvalidConfiguration);
    }

    #[tokio::test]
    async fn test_longest_step_schedules_forward() {
        let clock = Arc::new(ManualClock::starting_now());
        let engine = RetryQueueEngine::new(RetryConfig {
            backoff_steps_secs: vec![crate::retry::MAX_DURATION_SECS],
            ..Default::default()
        })
        .unwrap()
        .with_clock(clock.clone());

        let id = engine
            .enqueue(JobKind::PostPublish, json!({}), None)
            .await
            .unwrap();
        let job = engine.get(id).unwrap();
        assert!(job.next_retry_at > job.created_at);
        assert_eq!(job.status(clock.now()), JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_enqueue_schedules_first_retry() {
        let clock = Arc::new(ManualClock::starting_now());
        let engine = engine_with(clock.clone(), |_: Value| async { JobResult::Ok(()) });

        let id = engine
            .enqueue(JobKind::PostPublish, json!({ "post_id": 1 }), None)
            .await
            .unwrap();
        let job = engine.get(id).unwrap();

        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.next_retry_at, clock.now() + chrono::Duration::seconds(60));
        assert_eq!(job.status(clock.now()), JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_zero_max_attempts_rejected() {
        let clock = Arc::new(ManualClock::starting_now());
        let engine = engine_with(clock, |_: Value| async { JobResult::Ok(()) });

        let error = engine
            .enqueue(JobKind::PostPublish, json!({}), Some(0))
            .await
            .unwrap_err();
        assert_eq!(error.code(), crate::error::ErrorCode::ValidationError);
        assert_eq!(engine.stats().total, 0);
    }

    #[tokio::test]
    async fn test_sweep_deletes_on_success() {
        let clock = Arc::new(ManualClock::starting_now());
        let engine = engine_with(clock.clone(), |_: Value| async { JobResult::Ok(()) });
        let id = engine
            .enqueue(JobKind::PostPublish, json!({}), None)
            .await
            .unwrap();

        // Not due yet.
        assert_eq!(engine.sweep_now().await.attempted, 0);

        clock.advance(chrono::Duration::seconds(60));
        let report = engine.sweep_now().await;
        assert_eq!(report.attempted, 1);
        assert_eq!(report.succeeded, 1);
        assert!(engine.get(id).is_none());
    }

    #[tokio::test]
    async fn test_panicking_handler_counts_as_failure() {
        let clock = Arc::new(ManualClock::starting_now());
        let engine = engine_with(clock.clone(), |_: Value| async {
            if true {
                panic!("handler exploded");
            }
            JobResult::Ok(())
        });
        let id = engine
            .enqueue(JobKind::PostPublish, json!({}), None)
            .await
            .unwrap();

        let outcome = engine.manual_retry(id).await.unwrap();
        assert_eq!(outcome, AttemptOutcome::Rescheduled);

        let job = engine.get(id).unwrap();
        assert_eq!(job.attempts, 1);
        assert!(job.last_error.unwrap().contains("handler exploded"));
        assert!(engine.stats().in_flight == 0);
    }

    #[tokio::test]
    async fn test_missing_handler_counts_as_failure() {
        let clock = Arc::new(ManualClock::starting_now());
        let engine = engine_with(clock.clone(), |_: Value| async { JobResult::Ok(()) });
        let id = engine
            .enqueue(JobKind::IntegrationSync, json!({}), Some(1))
            .await
            .unwrap();

        assert_eq!(
            engine.manual_retry(id).await.unwrap(),
            AttemptOutcome::Exhausted
        );
        let job = engine.get(id).unwrap();
        assert!(job.last_error.unwrap().contains("integration_sync"));
        assert_eq!(engine.manual_retry(id).await.unwrap(), AttemptOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_unknown_job_operations() {
        let clock = Arc::new(ManualClock::starting_now());
        let engine = engine_with(clock, |_: Value| async { JobResult::Ok(()) });

        let id = JobId::new();
        assert!(engine.get(id).is_none());
        assert_eq!(
            engine.cancel(id).unwrap_err().code(),
            crate::error::ErrorCode::JobNotFound
        );
        assert_eq!(
            engine.manual_retry(id).await.unwrap_err().code(),
            crate::error::ErrorCode::JobNotFound
        );
    }

    #[tokio::test]
    async fn test_cleanup_respects_retention() {
        let clock = Arc::new(ManualClock::starting_now());
        let engine = engine_with(clock.clone(), |_: Value| async {
            JobResult::Err(JobError::retryable("platform down"))
        });
        let id = engine
            .enqueue(JobKind::PostPublish, json!({}), Some(1))
            .await
            .unwrap();
        engine.manual_retry(id).await.unwrap();

        clock.advance(chrono::Duration::days(6));
        assert_eq!(engine.sweep_now().await.cleaned_up, 0);
        assert!(engine.get(id).is_some());

        clock.advance(chrono::Duration::days(1) + chrono::Duration::seconds(1));
        assert_eq!(engine.sweep_now().await.cleaned_up, 1);
        assert!(engine.get(id).is_none());
    }

    #[tokio::test]
    async fn test_notifications_sent() {
        let clock = Arc::new(ManualClock::starting_now());
        let sink = Arc::new(BroadcastNotificationSink::new(16));
        let mut rx = sink.subscribe();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let engine = RetryQueueEngine::new(RetryConfig::default())
            .unwrap()
            .with_clock(clock.clone())
            .with_notifier(sink)
            .with_handler(JobKind::PlatformConnection, move |_: Value| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { JobResult::Err(JobError::retryable("oauth refresh failed")) }
            });

        let id = engine
            .enqueue_with_error(
                JobKind::PlatformConnection,
                json!({ "account_id": 9, "refresh_token": "r-123" }),
                Some(1),
                "connection reset",
            )
            .await
            .unwrap();

        let enqueued = rx.recv().await.unwrap();
        assert_eq!(enqueued.event, NotificationEvent::Enqueued);
        assert_eq!(enqueued.last_error.as_deref(), Some("connection reset"));
        assert!(!enqueued.payload_summary.contains("r-123"));

        engine.manual_retry(id).await.unwrap();
        let exhausted = rx.recv().await.unwrap();
        assert_eq!(exhausted.event, NotificationEvent::Exhausted);
        assert_eq!(exhausted.attempts, 1);
        assert_eq!(exhausted.last_error.as_deref(), Some("oauth refresh failed"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sweep_report_counts() {
        let mut report = SweepReport::default();
        report.record(AttemptOutcome::Succeeded);
        report.record(AttemptOutcome::Exhausted);
        report.record(AttemptOutcome::Skipped);
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.exhausted, 1);
    }
}
