//! Task handlers and the registry that resolves them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::task::{Task, TaskKind};
use crate::error::TaskError;

/// A workflow or activity implementation.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Workflow type or activity name this handler serves.
    fn name(&self) -> &str;

    fn kind(&self) -> TaskKind;

    async fn handle(&self, task: &Task) -> Result<serde_json::Value, TaskError>;
}

/// Handlers keyed by (kind, name). Built once at startup.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<(TaskKind, String), Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one with the same kind and name.
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        let key = (handler.kind(), handler.name().to_string());
        if self.handlers.insert(key, handler).is_some() {
            tracing::warn!("Replaced an existing task handler registration");
        }
    }

    pub fn with(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Handler for a task, if registered.
    pub fn resolve(&self, task: &Task) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&(task.kind, task.name.clone())).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered names of one kind, sorted.
    pub fn names(&self, kind: TaskKind) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .handlers
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}
