//! Retry queue for failed deferred work.
//!
//! When publishing a post, connecting a platform account or syncing an
//! integration fails, the caller hands the job to a [`RetryQueueEngine`]. The
//! engine re-attempts it through the [`JobHandler`] registered for its kind:
//!
//! - after the 1st, 2nd and 3rd failure it waits 60 s, 300 s and 900 s, and
//!   900 s for every failure after that
//! - a job that succeeds is deleted
//! - a job that runs out of attempts raises one notification and is kept for
//!   the retention window (7 days by default) before cleanup deletes it
//!
//! Job status is never stored. It is derived from the attempt counters and
//! the current time, see [`RetryJob::status`].

mod engine;
mod handler;
mod job;
mod notify;

pub use engine::{AttemptOutcome, JobQuery, RetryConfig, RetryQueueEngine, RetryStats, SweepReport};
pub use handler::{HandlerRegistry, JobHandler};
pub use job::{
    BackoffSchedule, JobError, JobId, JobKind, JobResult, JobStatus, RetryJob, MAX_DURATION_SECS,
};
pub use notify::{
    summarize_payload, BroadcastNotificationSink, LoggingNotificationSink, Notification,
    NotificationEvent, NotificationSink, MAX_SUMMARY_CHARS,
};
