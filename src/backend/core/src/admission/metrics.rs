//! Metrics sink consumed by the admission controller.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Priority;
use crate::error::{ErrorCode, Result};

/// How an admitted operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    Failed,
    TimedOut,
}

impl ExecutionOutcome {
    /// Classify an operation result.
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Succeeded,
            Err(e) if e.code() == ErrorCode::RequestTimeout => Self::TimedOut,
            Err(_) => Self::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Why a submission never got a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    QueueTimeout,
    ShuttingDown,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueTimeout => "queue_timeout",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

/// One finished execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSample {
    /// Controller name
    pub controller: String,
    /// Priority the operation was submitted with
    pub priority: Priority,
    /// Time spent running (not queued)
    pub duration: Duration,
    /// Time spent waiting for a slot
    pub queue_wait: Duration,
    /// Outcome seen by the caller
    pub outcome: ExecutionOutcome,
    /// Waiting entries at completion
    pub queue_length: usize,
}

/// Receiver of admission measurements.
///
/// Implementations must be cheap and must not block; they are called on the
/// submit path.
pub trait AdmissionMetrics: Send + Sync {
    /// Called once per executed operation.
    fn record_execution(&self, sample: &ExecutionSample);

    /// Called whenever the waiting list changes length.
    fn record_queue_depth(&self, controller: &str, depth: usize, active: usize);

    /// Called when a submission is turned away without running.
    fn record_rejection(&self, controller: &str, priority: Priority, reason: RejectionReason);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAdmissionMetrics;

impl AdmissionMetrics for NoopAdmissionMetrics {
    fn record_execution(&self, _sample: &ExecutionSample) {}

    fn record_queue_depth(&self, _controller: &str, _depth: usize, _active: usize) {}

    fn record_rejection(&self, _controller: &str, _priority: Priority, _reason: RejectionReason) {}
}
