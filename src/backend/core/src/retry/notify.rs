//! Notifications raised by the retry engine.
//!
//! A notification goes out when a job is first enqueued (the initial attempt
//! failed) and exactly once when it runs out of attempts. Payloads are
//! summarised with credential-looking fields masked before they leave the
//! engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use super::job::{JobId, JobKind, RetryJob};

/// Longest payload summary, in characters.
pub const MAX_SUMMARY_CHARS: usize = 256;

const REDACTED: &str = "[REDACTED]";

const SENSITIVE_KEYS: &[&str] = &[
    "token",
    "secret",
    "password",
    "credential",
    "authorization",
    "api_key",
];

/// What happened to the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    /// The initial attempt failed and the job was queued for retry
    Enqueued,
    /// The last allowed attempt failed
    Exhausted,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Exhausted => "exhausted",
        }
    }
}

/// A message about one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event: NotificationEvent,
    pub job_id: JobId,
    pub kind: JobKind,
    /// Redacted, truncated rendering of the payload
    pub payload_summary: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub at: DateTime<Utc>,
}

impl Notification {
    pub(crate) fn for_job(event: NotificationEvent, job: &RetryJob, at: DateTime<Utc>) -> Self {
        Self {
            event,
            job_id: job.id,
            kind: job.kind,
            payload_summary: summarize_payload(&job.payload),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            last_error: job.last_error.clone(),
            at,
        }
    }
}

/// Render a payload for humans: sensitive values masked, output capped at
/// [`MAX_SUMMARY_CHARS`] characters.
pub fn summarize_payload(payload: &Value) -> String {
    let rendered = redact(payload).to_string();
    if rendered.chars().count() <= MAX_SUMMARY_CHARS {
        return rendered;
    }
    let mut truncated: String = rendered.chars().take(MAX_SUMMARY_CHARS - 3).collect();
    truncated.push_str("...");
    truncated
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|needle| key.contains(needle))
}

fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let value = if is_sensitive(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact(value)
                    };
                    (key.clone(), value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

/// Receiver of retry notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn notify(&self, notification: Notification);
}

/// Writes notifications to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotificationSink;

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn notify(&self, n: Notification) {
        match n.event {
            NotificationEvent::Enqueued => tracing::info!(
                job_id = %n.job_id,
                kind = %n.kind,
                max_attempts = n.max_attempts,
                payload = %n.payload_summary,
                last_error = n.last_error.as_deref().unwrap_or(""),
                "Initial attempt failed, job queued for retry"
            ),
            NotificationEvent::Exhausted => tracing::error!(
                job_id = %n.job_id,
                kind = %n.kind,
                attempts = n.attempts,
                payload = %n.payload_summary,
                last_error = n.last_error.as_deref().unwrap_or(""),
                "Retry attempts exhausted"
            ),
        }
    }
}

/// Fans notifications out to in-process subscribers.
///
/// Sending never blocks; subscribers that fall behind lose the oldest
/// messages.
#[derive(Debug, Clone)]
pub struct BroadcastNotificationSink {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotificationSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotificationSink {
    async fn notify(&self, notification: Notification) {
        // No subscribers is fine.
        let _ = self.tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_redacts_nested_secrets() {
        let summary = summarize_payload(&json!({
            "post_id": 12,
            "accessToken": "abc",
            "account": { "Password": "hunter2", "handle": "@shop" },
            "headers": [{ "Authorization": "Bearer x" }],
            "api_key": "k"
        }));

        assert!(summary.contains("\"post_id\":12"));
        assert!(summary.contains("@shop"));
        for leaked in ["abc", "hunter2", "Bearer x", "\"k\""] {
            assert!(!summary.contains(leaked), "{} leaked in {}", leaked, summary);
        }
        assert_eq!(summary.matches(REDACTED).count(), 4);
    }

    #[test]
    fn test_summary_truncated() {
        let summary = summarize_payload(&json!({ "body": "x".repeat(1000) }));
        assert_eq!(summary.chars().count(), MAX_SUMMARY_CHARS);
        assert!(summary.ends_with("..."));

        let short = summarize_payload(&json!({ "body": "hi" }));
        assert_eq!(short, r#"{"body":"hi"}"#);
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers() {
        let sink = BroadcastNotificationSink::new(8);
        let mut rx = sink.subscribe();
        assert_eq!(sink.subscriber_count(), 1);

        let job = RetryJob::new(
            JobKind::PlatformConnection,
            json!({ "account": 3 }),
            3,
            Some("connection refused".into()),
            Utc::now(),
            chrono::Duration::seconds(60),
        );
        sink.notify(Notification::for_job(NotificationEvent::Enqueued, &job, Utc::now()))
            .await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.job_id, job.id);
        assert_eq!(received.event, NotificationEvent::Enqueued);
        assert_eq!(received.last_error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers() {
        let sink = BroadcastNotificationSink::new(1);
        let job = RetryJob::new(
            JobKind::PostPublish,
            json!({}),
            1,
            None,
            Utc::now(),
            chrono::Duration::seconds(60),
        );
        sink.notify(Notification::for_job(NotificationEvent::Exhausted, &job, Utc::now()))
            .await;
    }
}
