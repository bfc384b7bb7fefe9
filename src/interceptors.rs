//! Worker interceptors: task spans and sandbox-aware admission.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Instrument, info};

use crate::admission::{self, WorkerIdentity};
use crate::engine::interceptor::{Interceptor, Next};
use crate::engine::task::Task;
use crate::error::TaskError;
use crate::routing::{RouteCache, extract};

/// Runs every execution inside a `task` span so handler logs correlate.
pub struct TaskSpanInterceptor;

#[async_trait]
impl Interceptor for TaskSpanInterceptor {
    fn name(&self) -> &str {
        "task_span"
    }

    async fn intercept(&self, task: &Task, next: Next<'_>) -> Result<serde_json::Value, TaskError> {
        let span = tracing::info_span!(
            "task",
            task_id = %task.id,
            kind = %task.kind,
            name = %task.name,
            attempt = task.attempt,
        );
        next.run(task).instrument(span).await
    }
}

/// Admits only the tasks this worker is responsible for.
///
/// Tasks owned by another worker fail with `TaskError::Rejected`, which the
/// engine treats as "redeliver elsewhere" rather than as a task result.
pub struct SelectiveTaskInterceptor {
    cache: Arc<RouteCache>,
    identity: Arc<WorkerIdentity>,
}

impl SelectiveTaskInterceptor {
    pub fn new(cache: Arc<RouteCache>, identity: Arc<WorkerIdentity>) -> Self {
        Self { cache, identity }
    }
}

#[async_trait]
impl Interceptor for SelectiveTaskInterceptor {
    fn name(&self) -> &str {
        "selective_task"
    }

    async fn intercept(&self, task: &Task, next: Next<'_>) -> Result<serde_json::Value, TaskError> {
        let routing_key = extract::routing_key(task);
        let table = self.cache.current_keys();
        let decision = admission::decide(&self.identity.role, routing_key.as_ref(), table.keys());
        let key_display = routing_key.as_ref().map(|k| k.as_str()).unwrap_or("");

        if !decision.accept {
            info!(
                worker = %self.identity,
                kind = %task.kind,
                task = %task.name,
                routing_key = key_display,
                reason = %decision.reason,
                outcome = "rejected",
                "Task not admitted on this worker"
            );
            return Err(TaskError::Rejected {
                kind: task.kind.to_string(),
                routing_key: key_display.to_string(),
                worker: self.identity.to_string(),
            });
        }

        info!(
            worker = %self.identity,
            kind = %task.kind,
            task = %task.name,
            routing_key = key_display,
            reason = %decision.reason,
            outcome = "accepted",
            "Processing task"
        );
        next.run(task).await
    }
}
