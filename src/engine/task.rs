//! Task types exchanged with the orchestration engine.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Which execution entry point a task targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Runs inside the engine's workflow interpreter; routing key arrives as baggage.
    Workflow,
    /// Activity invocation; routing key arrives inside propagation headers.
    Activity,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Workflow => "Workflow",
            Self::Activity => "Activity",
        };
        write!(f, "{s}")
    }
}

/// An opaque propagated header value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// UTF-8 encoded header body.
    pub data: String,
}

impl Payload {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            metadata: HashMap::new(),
            data: data.into(),
        }
    }
}

fn first_attempt() -> u32 {
    1
}

/// A unit of work pulled from the task queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    /// Workflow type or activity name; selects the handler.
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
    /// Baggage visible to workflow code.
    #[serde(default)]
    pub baggage: HashMap<String, String>,
    /// Propagation headers attached to activity invocations.
    #[serde(default)]
    pub headers: HashMap<String, Payload>,
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

impl Task {
    pub fn new(id: impl Into<String>, kind: TaskKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            input: serde_json::Value::Null,
            baggage: HashMap::new(),
            headers: HashMap::new(),
            attempt: first_attempt(),
        }
    }

    pub fn workflow(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, TaskKind::Workflow, name)
    }

    pub fn activity(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, TaskKind::Activity, name)
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.baggage.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, payload: Payload) -> Self {
        self.headers.insert(key.into(), payload);
        self
    }
}

/// What the worker reports back for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskResponse {
    /// Handler returned a result.
    Completed { output: serde_json::Value },
    /// Handler failed; this is the task's (business) outcome.
    Failed { message: String },
    /// This worker will not run the task; hand it to another worker.
    Unavailable { reason: String },
}

impl TaskResponse {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_deserializes_with_defaults() {
        let task: Task = serde_json::from_str(
            r#"{"id": "t-1", "kind": "activity", "name": "withdraw"}"#,
        )
        .unwrap();
        assert_eq!(task.kind, TaskKind::Activity);
        assert_eq!(task.attempt, 1);
        assert!(task.headers.is_empty());
        assert!(task.input.is_null());
    }

    #[test]
    fn response_is_tagged_by_status() {
        let json = serde_json::to_value(TaskResponse::Unavailable {
            reason: "routing".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["reason"], "routing");
    }
}
