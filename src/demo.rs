//! Demo handlers registered by the binary.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::engine::{HandlerRegistry, Task, TaskHandler, TaskKind};
use crate::error::TaskError;

/// Handler name used for both the workflow and the activity.
pub const ECHO: &str = "echo";

/// Returns its input, tagged with where it ran.
pub struct EchoHandler {
    kind: TaskKind,
    /// Worker identity, included in the output so callers can see which
    /// instance handled the task.
    worker: String,
}

impl EchoHandler {
    pub fn new(kind: TaskKind, worker: impl Into<String>) -> Self {
        Self {
            kind,
            worker: worker.into(),
        }
    }
}

#[async_trait]
impl TaskHandler for EchoHandler {
    fn name(&self) -> &str {
        ECHO
    }

    fn kind(&self) -> TaskKind {
        self.kind
    }

    async fn handle(&self, task: &Task) -> Result<serde_json::Value, TaskError> {
        info!(task_id = %task.id, "Echoing task input");
        Ok(json!({
            "echo": task.input,
            "handled_by": self.worker,
        }))
    }
}

/// Echo workflow and activity for `worker`.
pub fn registry(worker: &str) -> HandlerRegistry {
    HandlerRegistry::new()
        .with(Arc::new(EchoHandler::new(TaskKind::Workflow, worker)))
        .with(Arc::new(EchoHandler::new(TaskKind::Activity, worker)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_input_with_worker() {
        let registry = registry("sandbox=s1 task_queue=q");
        assert_eq!(registry.len(), 2);

        let task = Task::activity("a1", ECHO).with_input(json!({"amount": 5}));
        let handler = registry.resolve(&task).unwrap();
        let output = handler.handle(&task).await.unwrap();

        assert_eq!(output["echo"]["amount"], 5);
        assert_eq!(output["handled_by"], "sandbox=s1 task_queue=q");
    }
}
