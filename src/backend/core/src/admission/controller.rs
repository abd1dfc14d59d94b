//! Admission Controller - bounds concurrent work and queues the overflow.
//!
//! The `AdmissionController` provides:
//! - A hard limit on concurrently executing operations
//! - A priority-ordered waiting list (high first, FIFO within a class)
//! - Queue-wait and execution deadlines
//! - Statistics and a metrics sink for monitoring
//!
//! All mutable state lives behind one `parking_lot::Mutex` that is never held
//! across an `.await`. A slot is represented by a [`SlotGuard`]; dropping the
//! guard frees the slot and hands it to the next waiter under the same lock,
//! so concurrent completions can never start more than `max_concurrent`
//! operations.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::metrics::{
    AdmissionMetrics, ExecutionOutcome, ExecutionSample, NoopAdmissionMetrics, RejectionReason,
};
use super::{Operation, Priority};
use crate::error::{Result, SmaError};

/// Configuration for an admission controller.
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// Maximum number of operations executing at once
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Deadline for a running operation (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Deadline for waiting in the queue (milliseconds)
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
    /// Name for this controller (for logging/metrics)
    #[serde(default = "default_name")]
    pub name: String,
}

fn default_max_concurrent_requests() -> usize { 100 }
fn default_request_timeout_ms() -> u64 { 30_000 }
fn default_queue_timeout_ms() -> u64 { 10_000 }
fn default_name() -> String { "default".to_string() }

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            request_timeout_ms: default_request_timeout_ms(),
            queue_timeout_ms: default_queue_timeout_ms(),
            name: default_name(),
        }
    }
}

impl AdmissionConfig {
    /// Create with a specific name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the concurrency limit.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    /// Set both deadlines.
    pub fn with_timeouts(mut self, request_timeout_ms: u64, queue_timeout_ms: u64) -> Self {
        self.request_timeout_ms = request_timeout_ms;
        self.queue_timeout_ms = queue_timeout_ms;
        self
    }

    /// Reject settings that would make every submission fail.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_requests == 0 {
            return Err(SmaError::configuration(
                "admission.max_concurrent_requests must be at least 1",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(SmaError::configuration(
                "admission.request_timeout_ms must be greater than 0",
            ));
        }
        if self.queue_timeout_ms == 0 {
            return Err(SmaError::configuration(
                "admission.queue_timeout_ms must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// A caller suspended in the waiting list.
struct Waiter {
    ticket: u64,
    priority: Priority,
    grant: oneshot::Sender<SlotGuard>,
}

/// Counters plus the ordered waiting list.
struct AdmissionState {
    active: usize,
    waiting: VecDeque<Waiter>,
    /// High entries always sit at the front; this is how many there are.
    high_waiting: usize,
    next_ticket: u64,
    shutting_down: bool,
}

impl AdmissionState {
    fn new() -> Self {
        Self {
            active: 0,
            waiting: VecDeque::new(),
            high_waiting: 0,
            next_ticket: 0,
            shutting_down: false,
        }
    }

    fn push(&mut self, waiter: Waiter) {
        if waiter.priority.is_high() {
            self.waiting.insert(self.high_waiting, waiter);
            self.high_waiting += 1;
        } else {
            self.waiting.push_back(waiter);
        }
    }

    fn pop(&mut self) -> Option<Waiter> {
        let waiter = self.waiting.pop_front()?;
        if waiter.priority.is_high() {
            self.high_waiting -= 1;
        }
        Some(waiter)
    }

    fn remove(&mut self, ticket: u64) -> Option<Waiter> {
        let index = self.waiting.iter().position(|w| w.ticket == ticket)?;
        let waiter = self.waiting.remove(index)?;
        if waiter.priority.is_high() {
            self.high_waiting -= 1;
        }
        Some(waiter)
    }
}

/// Internal statistics tracking.
struct AdmissionCounters {
    submitted: AtomicU64,
    admitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    request_timeouts: AtomicU64,
    queue_timeouts: AtomicU64,
    rejected: AtomicU64,
    /// Total time spent queued by admitted operations (microseconds)
    total_wait_time_us: AtomicU64,
    /// Total execution time (microseconds)
    total_exec_time_us: AtomicU64,
    peak_active: AtomicUsize,
}

impl AdmissionCounters {
    fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            admitted: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            request_timeouts: AtomicU64::new(0),
            queue_timeouts: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            total_wait_time_us: AtomicU64::new(0),
            total_exec_time_us: AtomicU64::new(0),
            peak_active: AtomicUsize::new(0),
        }
    }

    fn record_admit(&self, active: usize) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
        self.peak_active.fetch_max(active, Ordering::Relaxed);
    }

    fn record_wait(&self, wait: Duration) {
        self.total_wait_time_us
            .fetch_add(wait.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_completion(&self, outcome: ExecutionOutcome, duration: Duration) {
        let counter = match outcome {
            ExecutionOutcome::Succeeded => &self.succeeded,
            ExecutionOutcome::Failed => &self.failed,
            ExecutionOutcome::TimedOut => &self.request_timeouts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_exec_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    fn record_rejection(&self, reason: RejectionReason) {
        match reason {
            RejectionReason::QueueTimeout => &self.queue_timeouts,
            RejectionReason::ShuttingDown => &self.rejected,
        }
        .fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared between the controller and its outstanding slots.
struct Shared {
    name: String,
    max_concurrent: usize,
    state: Mutex<AdmissionState>,
    counters: AdmissionCounters,
    metrics: Arc<dyn AdmissionMetrics>,
}

impl Shared {
    /// Give a slot back and start as many waiters as now fit.
    fn release(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        self.drain(&mut state);
    }

    /// Hand free slots to waiters in queue order. Must be called with the
    /// state lock held; safe to call any number of times.
    fn drain(self: &Arc<Self>, state: &mut AdmissionState) {
        let before = state.waiting.len();

        while state.active < self.max_concurrent {
            let Some(waiter) = state.pop() else {
                break;
            };

            state.active += 1;
            match waiter.grant.send(SlotGuard::armed(self.clone())) {
                Ok(()) => {
                    self.counters.record_admit(state.active);
                    tracing::debug!(
                        controller = %self.name,
                        ticket = waiter.ticket,
                        priority = %waiter.priority,
                        active = state.active,
                        "Queued operation admitted"
                    );
                }
                Err(mut slot) => {
                    // Caller went away while queued.
                    slot.disarm();
                    state.active -= 1;
                }
            }
        }

        if state.waiting.len() != before {
            self.metrics
                .record_queue_depth(&self.name, state.waiting.len(), state.active);
        }
    }
}

/// One execution slot. Dropping it frees the slot.
pub struct SlotGuard {
    shared: Arc<Shared>,
    armed: bool,
}

impl SlotGuard {
    fn armed(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.armed {
            self.shared.release();
        }
    }
}

/// Bounds how many operations run at once and queues the rest by priority.
///
/// Constructed explicitly and shared via `Arc`; there is no global instance.
pub struct AdmissionController {
    config: AdmissionConfig,
    shared: Arc<Shared>,
    created_at: Instant,
}

impl AdmissionController {
    /// Create a controller that reports to no metrics sink.
    ///
    /// Fails with `InvalidConfiguration` if the config does not validate.
    pub fn new(config: AdmissionConfig) -> Result<Self> {
        Self::with_metrics(config, Arc::new(NoopAdmissionMetrics))
    }

    /// Create a controller reporting to `metrics`.
    pub fn with_metrics(
        config: AdmissionConfig,
        metrics: Arc<dyn AdmissionMetrics>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, metrics))
    }

    fn build(config: AdmissionConfig, metrics: Arc<dyn AdmissionMetrics>) -> Self {
        tracing::info!(
            controller = %config.name,
            max_concurrent = config.max_concurrent_requests,
            request_timeout_ms = config.request_timeout_ms,
            queue_timeout_ms = config.queue_timeout_ms,
            "Admission controller created"
        );

        let shared = Arc::new(Shared {
            name: config.name.clone(),
            max_concurrent: config.max_concurrent_requests,
            state: Mutex::new(AdmissionState::new()),
            counters: AdmissionCounters::new(),
            metrics,
        });

        Self {
            config,
            shared,
            created_at: Instant::now(),
        }
    }

    /// Create a controller with default configuration.
    pub fn with_defaults() -> Self {
        Self::build(AdmissionConfig::default(), Arc::new(NoopAdmissionMetrics))
    }

    /// Get the controller name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the configuration.
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Get the concurrency limit.
    pub fn max_concurrent(&self) -> usize {
        self.shared.max_concurrent
    }

    /// Number of operations currently executing.
    pub fn active(&self) -> usize {
        self.shared.state.lock().active
    }

    /// Number of callers waiting for a slot.
    pub fn queued(&self) -> usize {
        self.shared.state.lock().waiting.len()
    }

    /// Check if every slot is taken.
    pub fn is_at_capacity(&self) -> bool {
        self.active() >= self.shared.max_concurrent
    }

    /// Check if `shutdown` has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shared.state.lock().shutting_down
    }

    /// Run `operation` once a slot is free.
    ///
    /// Returns the operation's own result, or
    /// - `QueueTimeout` if no slot freed up within `queue_timeout_ms`
    ///   (the operation is then never started),
    /// - `RequestTimeout` if it ran longer than `request_timeout_ms`
    ///   (the operation keeps running detached; its result is dropped),
    /// - `ShuttingDown` once the controller has been shut down.
    pub async fn submit<O>(&self, priority: Priority, operation: O) -> Result<O::Output>
    where
        O: Operation,
    {
        let (slot, queue_wait) = self.acquire(priority).await?;
        self.run(slot, priority, queue_wait, operation).await
    }

    /// Wait for a slot.
    async fn acquire(&self, priority: Priority) -> Result<(SlotGuard, Duration)> {
        let shared = &self.shared;
        shared.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let enqueued_at = Instant::now();
        let (ticket, mut grant, depth, active) = {
            let mut state = shared.state.lock();

            if state.shutting_down {
                drop(state);
                return Err(self.reject(priority, RejectionReason::ShuttingDown));
            }

            if state.active < shared.max_concurrent {
                state.active += 1;
                shared.counters.record_admit(state.active);
                return Ok((SlotGuard::armed(shared.clone()), Duration::ZERO));
            }

            let (tx, rx) = oneshot::channel();
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.push(Waiter {
                ticket,
                priority,
                grant: tx,
            });
            (ticket, rx, state.waiting.len(), state.active)
        };

        shared.metrics.record_queue_depth(&shared.name, depth, active);
        tracing::debug!(
            controller = %shared.name,
            ticket,
            priority = %priority,
            queue_length = depth,
            "At capacity, operation queued"
        );

        let timeout = Duration::from_millis(self.config.queue_timeout_ms);
        match tokio::time::timeout(timeout, &mut grant).await {
            Ok(Ok(slot)) => {
                let waited = enqueued_at.elapsed();
                shared.counters.record_wait(waited);
                Ok((slot, waited))
            }
            // Senders are only dropped unsent on shutdown.
            Ok(Err(_)) => Err(self.reject(priority, RejectionReason::ShuttingDown)),
            Err(_) => {
                let still_queued = {
                    let mut state = shared.state.lock();
                    let removed = state.remove(ticket).is_some();
                    if removed {
                        shared
                            .metrics
                            .record_queue_depth(&shared.name, state.waiting.len(), state.active);
                    }
                    removed
                };

                if !still_queued {
                    // A slot was granted as the deadline passed. It is returned
                    // unused so the operation is never started late.
                    grant.close();
                    if let Ok(slot) = grant.try_recv() {
                        drop(slot);
                    }
                }

                let waited = enqueued_at.elapsed();
                tracing::warn!(
                    controller = %shared.name,
                    ticket,
                    priority = %priority,
                    waited_ms = waited.as_millis() as u64,
                    queue_timeout_ms = self.config.queue_timeout_ms,
                    "Operation timed out waiting for a slot"
                );
                shared.counters.record_rejection(RejectionReason::QueueTimeout);
                shared
                    .metrics
                    .record_rejection(&shared.name, priority, RejectionReason::QueueTimeout);
                Err(SmaError::queue_timeout(
                    waited.as_millis() as u64,
                    self.config.queue_timeout_ms,
                ))
            }
        }
    }

    fn reject(&self, priority: Priority, reason: RejectionReason) -> SmaError {
        self.shared.counters.record_rejection(reason);
        self.shared
            .metrics
            .record_rejection(&self.shared.name, priority, reason);
        SmaError::shutting_down()
    }

    /// Execute inside a held slot, racing the request deadline.
    async fn run<O>(
        &self,
        slot: SlotGuard,
        priority: Priority,
        queue_wait: Duration,
        operation: O,
    ) -> Result<O::Output>
    where
        O: Operation,
    {
        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.request_timeout_ms);

        // Spawned so that a timeout detaches the work instead of dropping it.
        let task = tokio::spawn(operation.execute());

        let result = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(SmaError::operation_failed(format!(
                "Operation aborted: {}",
                join_error
            ))),
            Err(_) => {
                tracing::warn!(
                    controller = %self.shared.name,
                    priority = %priority,
                    timeout_ms = self.config.request_timeout_ms,
                    "Operation exceeded request timeout, result will be discarded"
                );
                Err(SmaError::request_timeout(self.config.request_timeout_ms))
            }
        };

        let duration = started.elapsed();
        let outcome = ExecutionOutcome::of(&result);
        let queue_length = self.queued();
        drop(slot);

        self.shared.counters.record_completion(outcome, duration);
        self.shared.metrics.record_execution(&ExecutionSample {
            controller: self.shared.name.clone(),
            priority,
            duration,
            queue_wait,
            outcome,
            queue_length,
        });

        tracing::debug!(
            controller = %self.shared.name,
            priority = %priority,
            outcome = outcome.as_str(),
            duration_ms = duration.as_millis() as u64,
            queue_length,
            "Operation finished"
        );

        result
    }

    /// Stop accepting work.
    ///
    /// Every queued caller is woken with `ShuttingDown`; running operations
    /// finish normally. Returns how many queued callers were turned away.
    /// Calling it again is a no-op.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<Waiter> = {
            let mut state = self.shared.state.lock();
            if state.shutting_down {
                return 0;
            }
            state.shutting_down = true;
            state.high_waiting = 0;
            state.waiting.drain(..).collect()
        };

        let count = drained.len();
        drop(drained);

        tracing::info!(
            controller = %self.shared.name,
            rejected_waiters = count,
            "Admission controller shutting down"
        );
        self.shared.metrics.record_queue_depth(&self.shared.name, 0, self.active());
        count
    }

    /// Get controller statistics.
    pub fn stats(&self) -> AdmissionStats {
        let (active, queued, queued_high, shutting_down) = {
            let state = self.shared.state.lock();
            (
                state.active,
                state.waiting.len(),
                state.high_waiting,
                state.shutting_down,
            )
        };

        let c = &self.shared.counters;
        let admitted = c.admitted.load(Ordering::Relaxed);
        let succeeded = c.succeeded.load(Ordering::Relaxed);
        let failed = c.failed.load(Ordering::Relaxed);
        let request_timeouts = c.request_timeouts.load(Ordering::Relaxed);
        let completed = succeeded + failed + request_timeouts;

        let avg_wait_time_us = if admitted > 0 {
            c.total_wait_time_us.load(Ordering::Relaxed) / admitted
        } else {
            0
        };

        let avg_exec_time_us = if completed > 0 {
            c.total_exec_time_us.load(Ordering::Relaxed) / completed
        } else {
            0
        };

        AdmissionStats {
            name: self.shared.name.clone(),
            max_concurrent: self.shared.max_concurrent,
            active,
            queued,
            queued_high,
            submitted: c.submitted.load(Ordering::Relaxed),
            admitted,
            succeeded,
            failed,
            request_timeouts,
            queue_timeouts: c.queue_timeouts.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            peak_active: c.peak_active.load(Ordering::Relaxed),
            avg_wait_time_us,
            avg_exec_time_us,
            shutting_down,
            uptime_secs: self.created_at.elapsed().as_secs(),
        }
    }

    /// Check if the controller is healthy.
    pub fn is_healthy(&self) -> bool {
        let stats = self.stats();

        // Unhealthy if:
        // - High queue timeout rate (>=10%)
        // - High failure rate (>=50%)

        let queue_timeout_rate = if stats.submitted > 0 {
            stats.queue_timeouts as f64 / stats.submitted as f64
        } else {
            0.0
        };

        let finished = stats.succeeded + stats.failed + stats.request_timeouts;
        let failure_rate = if finished > 0 {
            (stats.failed + stats.request_timeouts) as f64 / finished as f64
        } else {
            0.0
        };

        !stats.shutting_down && queue_timeout_rate < 0.1 && failure_rate < 0.5
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Snapshot of controller statistics.
#[derive(Debug, Clone)]
pub struct AdmissionStats {
    /// Controller name
    pub name: String,
    /// Concurrency limit
    pub max_concurrent: usize,
    /// Currently executing
    pub active: usize,
    /// Currently waiting
    pub queued: usize,
    /// Currently waiting with high priority
    pub queued_high: usize,
    /// Total submissions
    pub submitted: u64,
    /// Submissions that got a slot
    pub admitted: u64,
    /// Operations that succeeded
    pub succeeded: u64,
    /// Operations that returned an error
    pub failed: u64,
    /// Operations that hit the request timeout
    pub request_timeouts: u64,
    /// Submissions that hit the queue timeout
    pub queue_timeouts: u64,
    /// Submissions refused because of shutdown
    pub rejected: u64,
    /// Peak concurrent operations observed
    pub peak_active: usize,
    /// Average queue wait of admitted operations (microseconds)
    pub avg_wait_time_us: u64,
    /// Average execution time (microseconds)
    pub avg_exec_time_us: u64,
    /// Whether shutdown has been requested
    pub shutting_down: bool,
    /// Controller uptime in seconds
    pub uptime_secs: u64,
}

impl AdmissionStats {
    /// Calculate success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.succeeded + self.failed + self.request_timeouts;
        if total == 0 {
            100.0
        } else {
            (self.succeeded as f64 / total as f64) * 100.0
        }
    }

    /// Calculate utilization as a percentage.
    pub fn utilization(&self) -> f64 {
        if self.max_concurrent == 0 {
            return 0.0;
        }
        (self.active as f64 / self.max_concurrent as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Notify;

    fn controller(max: usize) -> AdmissionController {
        AdmissionController::new(AdmissionConfig {
            max_concurrent_requests: max,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_controller_creation() {
        let controller = AdmissionController::with_defaults();

        assert_eq!(controller.max_concurrent(), 100);
        assert_eq!(controller.active(), 0);
        assert_eq!(controller.queued(), 0);
        assert!(!controller.is_at_capacity());
        assert!(controller.is_healthy());
    }

    #[test]
    fn test_config_builders() {
        let config = AdmissionConfig::default()
            .with_name("api")
            .with_max_concurrent(8)
            .with_timeouts(1_000, 500);

        assert_eq!(config.name, "api");
        assert_eq!(config.max_concurrent_requests, 8);
        assert_eq!(config.request_timeout_ms, 1_000);
        assert_eq!(config.queue_timeout_ms, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(AdmissionConfig::default().with_max_concurrent(0).validate().is_err());
        assert!(AdmissionConfig::default().with_timeouts(0, 10).validate().is_err());
        assert!(AdmissionConfig::default().with_timeouts(10, 0).validate().is_err());
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let error = AdmissionController::new(AdmissionConfig::default().with_max_concurrent(0))
            .err()
            .unwrap();
        assert_eq!(error.code(), crate::error::ErrorCode::InvalidConfiguration);

        let error = AdmissionController::with_metrics(
            AdmissionConfig::default().with_timeouts(1_000, 0),
            Arc::new(NoopAdmissionMetrics),
        )
        .err()
        .unwrap();
        assert_eq!(error.code(), crate::error::ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn test_waiting_list_order() {
        let mut state = AdmissionState::new();
        let mut receivers = Vec::new();
        for (ticket, priority) in [
            (0, Priority::Normal),
            (1, Priority::High),
            (2, Priority::Low),
            (3, Priority::High),
            (4, Priority::Normal),
        ] {
            let (tx, rx) = oneshot::channel();
            receivers.push(rx);
            state.push(Waiter {
                ticket,
                priority,
                grant: tx,
            });
        }

        let order: Vec<u64> = state.waiting.iter().map(|w| w.ticket).collect();
        assert_eq!(order, vec![1, 3, 0, 2, 4]);
        assert_eq!(state.high_waiting, 2);

        assert!(state.remove(3).is_some());
        assert_eq!(state.high_waiting, 1);
        assert!(state.remove(3).is_none());

        assert_eq!(state.pop().unwrap().ticket, 1);
        assert_eq!(state.high_waiting, 0);
        assert_eq!(state.pop().unwrap().ticket, 0);
    }

    #[tokio::test]
    async fn test_submit_returns_output() {
        let controller = controller(2);

        let value = controller
            .submit(Priority::Normal, || async { Ok::<_, SmaError>(42) })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(controller.active(), 0);

        let stats = controller.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.succeeded, 1);
    }

    #[tokio::test]
    async fn test_operation_error_passes_through() {
        let controller = controller(2);

        let error = controller
            .submit(Priority::Normal, || async {
                Err::<(), _>(SmaError::validation("bad payload"))
            })
            .await
            .unwrap_err();

        assert_eq!(error.code(), crate::error::ErrorCode::ValidationError);
        assert_eq!(controller.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_panicking_operation_releases_slot() {
        let controller = controller(1);

        let error = controller
            .submit(Priority::Normal, || async {
                if true {
                    panic!("operation blew up");
                }
                Ok::<(), SmaError>(())
            })
            .await
            .unwrap_err();

        assert_eq!(error.code(), crate::error::ErrorCode::OperationFailed);
        assert_eq!(controller.active(), 0);

        let value = controller
            .submit(Priority::Normal, || async { Ok::<_, SmaError>("next") })
            .await
            .unwrap();
        assert_eq!(value, "next");
    }

    #[tokio::test]
    async fn test_queues_when_full() {
        let controller = Arc::new(controller(1));
        let gate = Arc::new(Notify::new());

        let blocker = {
            let controller = controller.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                controller
                    .submit(Priority::Normal, move || async move {
                        gate.notified().await;
                        Ok::<_, SmaError>(())
                    })
                    .await
            })
        };

        while controller.active() < 1 {
            tokio::task::yield_now().await;
        }
        assert!(controller.is_at_capacity());

        let waiter = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .submit(Priority::Normal, || async { Ok::<_, SmaError>(7) })
                    .await
            })
        };

        while controller.queued() < 1 {
            tokio::task::yield_now().await;
        }

        gate.notify_one();
        blocker.await.unwrap().unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), 7);
        assert_eq!(controller.active(), 0);
        assert_eq!(controller.queued(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let controller = controller(1);

        assert_eq!(controller.shutdown(), 0);
        assert_eq!(controller.shutdown(), 0);
        assert!(controller.is_shutting_down());
        assert!(!controller.is_healthy());

        let error = controller
            .submit(Priority::High, || async { Ok::<_, SmaError>(()) })
            .await
            .unwrap_err();
        assert_eq!(error.code(), crate::error::ErrorCode::ShuttingDown);
        assert_eq!(controller.stats().rejected, 1);
    }

    #[test]
    fn test_stats_calculations() {
        let stats = AdmissionStats {
            name: "test".to_string(),
            max_concurrent: 10,
            active: 7,
            queued: 3,
            queued_high: 1,
            submitted: 100,
            admitted: 100,
            succeeded: 80,
            failed: 15,
            request_timeouts: 5,
            queue_timeouts: 0,
            rejected: 0,
            peak_active: 10,
            avg_wait_time_us: 1000,
            avg_exec_time_us: 5000,
            shutting_down: false,
            uptime_secs: 60,
        };

        assert_eq!(stats.success_rate(), 80.0);
        assert_eq!(stats.utilization(), 70.0);
    }
}
