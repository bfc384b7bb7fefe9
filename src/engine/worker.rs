//! Task-processing loop: poll the queue, run each task through the
//! interceptor chain, report the outcome.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handler::HandlerRegistry;
use super::interceptor::InterceptorChain;
use super::queue::TaskQueue;
use super::task::{Task, TaskResponse};
use crate::admission::WorkerIdentity;
use crate::config::WorkerConfig;
use crate::error::{Disposition, EngineError, TaskError};

/// Cap on the exponential poll backoff multiplier.
const MAX_BACKOFF_SHIFT: u32 = 5;

/// Polling behaviour.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub max_concurrent_tasks: usize,
    /// Delay after an empty poll; base of the error backoff.
    pub poll_interval: Duration,
    /// Consecutive poll failures before the loop gives up.
    pub max_poll_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 16,
            poll_interval: Duration::from_millis(200),
            max_poll_failures: 10,
        }
    }
}

impl From<&WorkerConfig> for PollConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_concurrent_tasks: config.max_concurrent_tasks,
            poll_interval: config.poll_interval,
            max_poll_failures: config.max_poll_failures,
        }
    }
}

/// A worker bound to one task queue.
#[derive(Clone)]
pub struct Worker {
    identity: Arc<WorkerIdentity>,
    queue: Arc<dyn TaskQueue>,
    handlers: Arc<HandlerRegistry>,
    chain: InterceptorChain,
    config: PollConfig,
}

impl Worker {
    pub fn new(
        identity: Arc<WorkerIdentity>,
        queue: Arc<dyn TaskQueue>,
        handlers: HandlerRegistry,
        chain: InterceptorChain,
        config: PollConfig,
    ) -> Self {
        Self {
            identity,
            queue,
            handlers: Arc::new(handlers),
            chain,
            config,
        }
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    /// Poll until `shutdown` fires, then drain in-flight tasks.
    ///
    /// Returns an error only when polling keeps failing past the configured limit.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), EngineError> {
        info!(
            worker = %self.identity,
            interceptors = ?self.chain.names(),
            "Starting to poll for tasks"
        );

        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_tasks));
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut failures: u32 = 0;

        let result = loop {
            while let Some(joined) = in_flight.try_join_next() {
                log_join_error(joined);
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Ok(()),
                },
            };

            let polled = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                polled = self.queue.poll() => polled,
            };

            match polled {
                Ok(Some(task)) => {
                    failures = 0;
                    let worker = self.clone();
                    in_flight.spawn(async move {
                        worker.execute(task).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    failures = 0;
                    drop(permit);
                    if sleep_or_cancel(self.config.poll_interval, &shutdown).await {
                        break Ok(());
                    }
                }
                Err(e) => {
                    drop(permit);
                    failures += 1;
                    if failures >= self.config.max_poll_failures {
                        error!(error = %e, failures, "Task polling keeps failing, giving up");
                        break Err(EngineError::PollExhausted {
                            failures,
                            last: e.to_string(),
                        });
                    }
                    let backoff = backoff_delay(self.config.poll_interval, failures);
                    warn!(error = %e, failures, backoff_ms = backoff.as_millis() as u64, "Task poll failed");
                    if sleep_or_cancel(backoff, &shutdown).await {
                        break Ok(());
                    }
                }
            }
        };

        if !in_flight.is_empty() {
            info!(pending = in_flight.len(), "Waiting for in-flight tasks to finish");
        }
        while let Some(joined) = in_flight.join_next().await {
            log_join_error(joined);
        }

        info!(worker = %self.identity, "Task polling stopped");
        result
    }

    /// Run one task and report its outcome to the queue.
    pub async fn execute(&self, task: Task) {
        let response = match self.handlers.resolve(&task) {
            Some(handler) => match self.chain.execute(&task, handler.as_ref()).await {
                Ok(output) => TaskResponse::Completed { output },
                Err(e) => response_for(e),
            },
            None => {
                let err = TaskError::UnknownTask {
                    kind: task.kind.to_string(),
                    name: task.name.clone(),
                };
                warn!(task_id = %task.id, error = %err, "Handing task back to the queue");
                response_for(err)
            }
        };

        debug!(task_id = %task.id, response = ?response, "Reporting task outcome");
        if let Err(e) = self.queue.respond(&task.id, response).await {
            error!(task_id = %task.id, error = %e, "Failed to report task outcome");
        }
    }
}

/// Map a task error onto what the engine should do with the task.
pub fn response_for(err: TaskError) -> TaskResponse {
    match err.disposition() {
        Disposition::Failed => TaskResponse::Failed {
            message: err.to_string(),
        },
        Disposition::Redeliver => TaskResponse::Unavailable {
            reason: err.to_string(),
        },
    }
}

/// Delay before the next poll after `failures` consecutive errors. Saturates.
fn backoff_delay(base: Duration, failures: u32) -> Duration {
    base.checked_mul(1u32 << failures.min(MAX_BACKOFF_SHIFT))
        .unwrap_or(Duration::MAX)
}

/// Sleep for `duration`. Returns `true` if shutdown fired first.
async fn sleep_or_cancel(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Task execution panicked");
        } else {
            debug!(error = %e, "Task execution cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::engine::handler::TaskHandler;
    use crate::engine::task::TaskKind;

    #[derive(Default)]
    struct FakeQueue {
        tasks: Mutex<VecDeque<Task>>,
        responses: Mutex<Vec<(String, TaskResponse)>>,
        fail_polls: bool,
        polls: AtomicU32,
    }

    #[async_trait]
    impl TaskQueue for FakeQueue {
        fn name(&self) -> &str {
            "fake"
        }

        async fn poll(&self) -> Result<Option<Task>, EngineError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if self.fail_polls {
                return Err(EngineError::Transport("connection refused".into()));
            }
            Ok(self.tasks.lock().unwrap().pop_front())
        }

        async fn respond(&self, task_id: &str, response: TaskResponse) -> Result<(), EngineError> {
            self.responses
                .lock()
                .unwrap()
                .push((task_id.to_string(), response));
            Ok(())
        }
    }

    struct Echo;

    #[async_trait]
    impl TaskHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn kind(&self) -> TaskKind {
            TaskKind::Activity
        }
        async fn handle(&self, task: &Task) -> Result<serde_json::Value, TaskError> {
            if task.input.is_null() {
                return Err(TaskError::Application("nothing to echo".into()));
            }
            Ok(task.input.clone())
        }
    }

    fn worker(queue: Arc<FakeQueue>) -> Worker {
        Worker::new(
            Arc::new(WorkerIdentity::baseline("fake")),
            queue,
            HandlerRegistry::new().with(Arc::new(Echo)),
            InterceptorChain::default(),
            PollConfig {
                max_concurrent_tasks: 4,
                poll_interval: Duration::from_millis(10),
                max_poll_failures: 3,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn processes_tasks_and_reports_outcomes() {
        let queue = Arc::new(FakeQueue::default());
        queue.tasks.lock().unwrap().extend([
            Task::activity("t1", "echo").with_input(serde_json::json!({"amount": 10})),
            Task::activity("t2", "echo"),
            Task::workflow("t3", "unknown"),
        ]);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let worker = worker(Arc::clone(&queue));
            let shutdown = shutdown.clone();
            async move { worker.run(shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        let mut responses = queue.responses.lock().unwrap().clone();
        responses.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(responses.len(), 3);
        assert_eq!(
            responses[0].1,
            TaskResponse::Completed {
                output: serde_json::json!({"amount": 10})
            }
        );
        assert_eq!(
            responses[1].1,
            TaskResponse::Failed {
                message: "nothing to echo".into()
            }
        );
        assert!(matches!(responses[2].1, TaskResponse::Unavailable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_repeated_poll_failures() {
        let queue = Arc::new(FakeQueue {
            fail_polls: true,
            ..Default::default()
        });

        let result = worker(Arc::clone(&queue)).run(CancellationToken::new()).await;

        match result {
            Err(EngineError::PollExhausted { failures, .. }) => assert_eq!(failures, 3),
            other => panic!("expected PollExhausted, got {other:?}"),
        }
        assert_eq!(queue.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_promptly_when_cancelled() {
        let queue = Arc::new(FakeQueue::default());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        worker(queue).run(shutdown).await.unwrap();
    }

    #[test]
    fn backoff_doubles_then_caps_and_saturates() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(800));
        assert_eq!(backoff_delay(base, 40), Duration::from_millis(3200));
        assert_eq!(backoff_delay(Duration::MAX / 2, 2), Duration::MAX);
    }

    #[test]
    fn rejection_maps_to_unavailable() {
        let response = response_for(TaskError::Rejected {
            kind: "Activity".into(),
            routing_key: "r1".into(),
            worker: "sandbox=baseline task_queue=q".into(),
        });
        assert!(matches!(response, TaskResponse::Unavailable { .. }));
    }
}
