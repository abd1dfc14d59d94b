#![allow(clippy::result_large_err)]
//! # SMA Core
//!
//! Backpressure and reliability core of the social media automation backend.
//!
//! ## Architecture
//!
//! - **Admission**: Bounded concurrency with a priority queue, queue-wait and
//!   request deadlines, and an axum middleware for the HTTP boundary
//! - **Retry**: Backed-off retries of failed posts, platform connections and
//!   integration syncs, with exhaustion notifications and retention cleanup
//! - **Telemetry**: Structured logging and Prometheus metrics
//! - **Config**: File and environment configuration with validation
//!
//! The two engines never call each other. Build them from one [`config::Config`]
//! and share them through `Arc`.

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod retry;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, SmaError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::admission::{
        admission_middleware, AdmissionConfig, AdmissionController, AdmissionMetrics,
        AdmissionStats, Operation, Priority,
    };
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, SmaError};
    pub use crate::retry::{
        AttemptOutcome, JobError, JobHandler, JobId, JobKind, JobQuery, JobResult, JobStatus,
        Notification, NotificationSink, RetryConfig, RetryJob, RetryQueueEngine, SweepReport,
    };
    pub use crate::telemetry::{init_telemetry, PrometheusAdmissionMetrics, TelemetryConfig};
}
