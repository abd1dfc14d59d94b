//! Admission control for inbound work.
//!
//! An [`AdmissionController`] caps how many [`Operation`]s run at once. Work
//! that arrives while every slot is taken waits in a priority-ordered list:
//!
//! - `High` entries are served before any `Normal` or `Low` entry
//! - entries of the same class are served in arrival order
//! - an entry that waits longer than the queue timeout is dropped unstarted
//!
//! Running operations race a request deadline. An operation that overruns is
//! not cancelled; the caller gets `RequestTimeout` and the work finishes in
//! the background.

mod controller;
mod metrics;
mod middleware;
mod operation;

pub use controller::{AdmissionConfig, AdmissionController, AdmissionStats, SlotGuard};
pub use metrics::{
    AdmissionMetrics, ExecutionOutcome, ExecutionSample, NoopAdmissionMetrics, RejectionReason,
};
pub use middleware::{admission_middleware, request_priority, PRIORITY_HEADER};
pub use operation::{Operation, Priority};
