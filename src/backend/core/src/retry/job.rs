//! Retry job records and the backoff schedule.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, SmaError};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a retry job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for JobId {
    type Err = SmaError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| SmaError::validation(format!("Invalid job id: {}", e)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Kind
// ═══════════════════════════════════════════════════════════════════════════════

/// The deferred operation a job retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Publish a scheduled post to a platform
    PostPublish,
    /// Establish or refresh a platform account connection
    PlatformConnection,
    /// Synchronise data with a third-party integration
    IntegrationSync,
}

impl JobKind {
    /// All kinds, in declaration order.
    pub const ALL: [JobKind; 3] = [
        JobKind::PostPublish,
        JobKind::PlatformConnection,
        JobKind::IntegrationSync,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostPublish => "post_publish",
            Self::PlatformConnection => "platform_connection",
            Self::IntegrationSync => "integration_sync",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Status of a job, derived from its counters and the current time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its next retry time
    Pending,
    /// Retry time has passed; picked up by the next sweep
    Due,
    /// No attempts left
    Exhausted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Due => "due",
            Self::Exhausted => "exhausted",
        }
    }

    /// Check if the job will never be attempted again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exhausted)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Error returned by a job handler.
///
/// `retryable` is carried for the handler's own reporting. The engine retries
/// every failure until the job runs out of attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    /// Error message
    pub message: String,
    /// Whether the handler considers this error transient
    pub retryable: bool,
    /// Optional error code
    pub code: Option<String>,
}

impl JobError {
    /// Create a new retryable error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            code: None,
        }
    }

    /// Create a new error the handler does not expect to recover from.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            code: None,
        }
    }

    /// Add an error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for JobError {}

impl From<SmaError> for JobError {
    fn from(error: SmaError) -> Self {
        Self {
            message: error.user_message().to_string(),
            retryable: error.is_retryable(),
            code: Some(error.code().to_string()),
        }
    }
}

/// Result type for job handlers.
pub type JobResult = std::result::Result<(), JobError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff
// ═══════════════════════════════════════════════════════════════════════════════

/// Longest configurable delay or retention window: ten years, in seconds.
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Convert a configured number of seconds, rejecting values past
/// [`MAX_DURATION_SECS`].
pub(crate) fn configured_secs(setting: &str, secs: u64) -> Result<Duration> {
    i64::try_from(secs)
        .ok()
        .filter(|_| secs <= MAX_DURATION_SECS)
        .map(Duration::seconds)
        .ok_or_else(|| {
            SmaError::configuration(format!(
                "{} must be at most {} seconds, got {}",
                setting, MAX_DURATION_SECS, secs
            ))
        })
}

/// Delay before the next attempt, indexed by how many attempts have failed.
///
/// The last step repeats once the list runs out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    steps: Vec<Duration>,
}

impl BackoffSchedule {
    /// Build a schedule from delays in seconds. The list must not be empty
    /// and no step may exceed [`MAX_DURATION_SECS`].
    pub fn new(steps_secs: Vec<u64>) -> Result<Self> {
        if steps_secs.is_empty() {
            return Err(SmaError::configuration(
                "retry.backoff_steps_secs must contain at least one delay",
            ));
        }
        let steps = steps_secs
            .into_iter()
            .map(|secs| configured_secs("retry.backoff_steps_secs", secs))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { steps })
    }

    /// Delay after `failed_attempts` failures (1-based).
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        let index = (failed_attempts.max(1) as usize - 1).min(self.steps.len() - 1);
        self.steps[index]
    }

    pub fn steps(&self) -> &[Duration] {
        &self.steps
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            steps: vec![
                Duration::seconds(60),
                Duration::seconds(300),
                Duration::seconds(900),
            ],
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Job
// ═══════════════════════════════════════════════════════════════════════════════

/// A failed deferred operation awaiting retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryJob {
    /// Unique job identifier
    pub id: JobId,
    /// Which handler processes this job
    pub kind: JobKind,
    /// Opaque data handed to the handler
    pub payload: serde_json::Value,
    /// Retry attempts made so far (the initial failure is not counted)
    pub attempts: u32,
    /// Attempts allowed before the job is exhausted
    pub max_attempts: u32,
    /// Earliest time of the next attempt
    pub next_retry_at: DateTime<Utc>,
    /// Most recent failure message
    pub last_error: Option<String>,
    /// When the job was enqueued
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl RetryJob {
    pub(crate) fn new(
        kind: JobKind,
        payload: serde_json::Value,
        max_attempts: u32,
        last_error: Option<String>,
        now: DateTime<Utc>,
        first_delay: Duration,
    ) -> Self {
        Self {
            id: JobId::new(),
            kind,
            payload,
            attempts: 0,
            max_attempts,
            next_retry_at: now + first_delay,
            last_error,
            created_at: now,
            updated_at: now,
        }
    }

    /// Status as of `now`.
    pub fn status(&self, now: DateTime<Utc>) -> JobStatus {
        if self.is_exhausted() {
            JobStatus::Exhausted
        } else if self.next_retry_at <= now {
            JobStatus::Due
        } else {
            JobStatus::Pending
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Attempts left before exhaustion.
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    /// Check if every key of `filter` is present in the payload with an equal
    /// value. A non-object filter must equal the payload.
    pub fn payload_matches(&self, filter: &serde_json::Value) -> bool {
        match (filter.as_object(), self.payload.as_object()) {
            (Some(wanted), Some(actual)) => wanted
                .iter()
                .all(|(key, value)| actual.get(key) == Some(value)),
            (Some(wanted), None) => wanted.is_empty(),
            (None, _) => filter == &self.payload,
        }
    }

    /// Record a failed attempt at `now`.
    pub(crate) fn record_failure(
        &mut self,
        error: String,
        now: DateTime<Utc>,
        backoff: &BackoffSchedule,
    ) {
        let next = now + backoff.delay(self.attempts);
        self.next_retry_at = self.next_retry_at.max(next);
        self.last_error = Some(error);
        self.updated_at = now;
    }
}
