//! Task-queue client trait: the worker's connection to the engine.

use async_trait::async_trait;

use super::task::{Task, TaskResponse};
use crate::error::EngineError;

/// Client for one task queue of the orchestration engine.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Name of the queue this client polls.
    fn name(&self) -> &str;

    /// Fetch the next task, or `None` if none is available right now.
    async fn poll(&self) -> Result<Option<Task>, EngineError>;

    /// Report the outcome of a task.
    async fn respond(&self, task_id: &str, response: TaskResponse) -> Result<(), EngineError>;
}
