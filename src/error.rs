//! Error types for the sandbox-aware worker.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Route fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
}

/// Configuration-related errors. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// A single failed attempt to fetch routing rules from the route authority.
///
/// Never fatal: the cache keeps serving its previous snapshot.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP transport error: {0}")]
    Transport(String),

    #[error("Route server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed routing rules payload: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Errors talking to the orchestration engine's task queue.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine transport error: {0}")]
    Transport(String),

    #[error("Engine returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode engine payload: {0}")]
    Decode(String),

    #[error("Task poll failed {failures} consecutive times, last error: {last}")]
    PollExhausted { failures: u32, last: String },
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// How the engine should treat a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Business failure: report it as the task's result.
    Failed,
    /// Temporary unavailability on this worker: make the task eligible for
    /// another worker instead of recording a result.
    Redeliver,
}

/// Per-task execution errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("{0}")]
    Application(String),

    #[error("{kind} cannot handle routing key {routing_key} - Worker: {worker}")]
    Rejected {
        kind: String,
        routing_key: String,
        worker: String,
    },

    #[error("No handler registered for {kind} {name}")]
    UnknownTask { kind: String, name: String },
}

impl TaskError {
    /// Classify this error for the engine.
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Application(_) => Disposition::Failed,
            Self::Rejected { .. } | Self::UnknownTask { .. } => Disposition::Redeliver,
        }
    }
}

/// Worker lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Failed to install signal handler: {0}")]
    SignalInstall(#[from] std::io::Error),

    #[error("Background task {task} crashed: {reason}")]
    TaskCrashed { task: String, reason: String },

    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Background tasks did not stop within {0:?}")]
    DrainTimeout(Duration),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_is_redelivered() {
        let err = TaskError::Rejected {
            kind: "Workflow".into(),
            routing_key: "r1".into(),
            worker: "sandbox=s1 task_queue=q".into(),
        };
        assert_eq!(err.disposition(), Disposition::Redeliver);
        assert_eq!(
            err.to_string(),
            "Workflow cannot handle routing key r1 - Worker: sandbox=s1 task_queue=q"
        );
    }

    #[test]
    fn application_failure_is_a_result() {
        let err = TaskError::Application("insufficient funds".into());
        assert_eq!(err.disposition(), Disposition::Failed);
    }

    #[test]
    fn startup_errors_convert_into_top_level_error() {
        fn load() -> Result<()> {
            let lookup: std::result::Result<(), ConfigError> =
                Err(ConfigError::MissingEnvVar("TASK_QUEUE".into()));
            lookup?;
            Ok(())
        }

        let err = load().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing required environment variable: TASK_QUEUE"
        );

        let err: Error = LifecycleError::DrainTimeout(Duration::from_secs(30)).into();
        assert!(matches!(err, Error::Lifecycle(_)));
    }

    #[test]
    fn unknown_task_is_redelivered() {
        let err = TaskError::UnknownTask {
            kind: "activity".into(),
            name: "withdraw".into(),
        };
        assert_eq!(err.disposition(), Disposition::Redeliver);
    }
}
