//! Job handlers: the code that actually re-attempts a failed operation.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::job::{JobKind, JobResult};

/// Re-attempts one kind of deferred operation.
///
/// Handlers receive the job payload and report success or failure; they never
/// see attempt counters or schedules. Closures taking the payload by value
/// implement this trait:
///
/// ```rust,ignore
/// let engine = RetryQueueEngine::new(config)
///     .with_handler(JobKind::PostPublish, |payload: Value| async move {
///         publisher.publish(&payload).await.map_err(JobError::from)
///     });
/// ```
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Attempt the operation described by `payload` once.
    async fn handle(&self, payload: &Value) -> JobResult;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    async fn handle(&self, payload: &Value) -> JobResult {
        (self)(payload.clone()).await
    }
}

/// One handler per job kind.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: JobKind, handler: Arc<dyn JobHandler>) {
        if self.handlers.insert(kind, handler).is_some() {
            tracing::warn!(kind = %kind, "Replacing previously registered job handler");
        }
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: JobKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<JobKind> {
        let mut kinds: Vec<JobKind> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
