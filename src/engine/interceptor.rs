//! Interceptor chain: ordered middleware around workflow and activity execution.
//!
//! Each interceptor receives the task and a `Next` handle; calling
//! `next.run(task)` passes control down the chain and finally to the handler.
//! Returning without calling `next` short-circuits execution.

use std::sync::Arc;

use async_trait::async_trait;

use super::handler::TaskHandler;
use super::task::Task;
use crate::error::TaskError;

/// Middleware wrapping task execution.
#[async_trait]
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &str;

    async fn intercept(&self, task: &Task, next: Next<'_>) -> Result<serde_json::Value, TaskError>;
}

/// The remainder of the chain after the current interceptor.
pub struct Next<'a> {
    interceptors: &'a [Arc<dyn Interceptor>],
    handler: &'a dyn TaskHandler,
}

impl Next<'_> {
    pub async fn run(self, task: &Task) -> Result<serde_json::Value, TaskError> {
        match self.interceptors.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    interceptors: rest,
                    handler: self.handler,
                };
                head.intercept(task, next).await
            }
            None => self.handler.handle(task).await,
        }
    }
}

/// An ordered, immutable list of interceptors composed at worker construction.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
}

impl InterceptorChain {
    /// First element is outermost.
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            interceptors: interceptors.into(),
        }
    }

    pub async fn execute(
        &self,
        task: &Task,
        handler: &dyn TaskHandler,
    ) -> Result<serde_json::Value, TaskError> {
        Next {
            interceptors: &self.interceptors,
            handler,
        }
        .run(task)
        .await
    }

    pub fn names(&self) -> Vec<&str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::engine::task::TaskKind;

    struct Recording {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        block: bool,
    }

    #[async_trait]
    impl Interceptor for Recording {
        fn name(&self) -> &str {
            self.label
        }

        async fn intercept(&self, task: &Task, next: Next<'_>) -> Result<serde_json::Value, TaskError> {
            self.log.lock().unwrap().push(format!("{}:before", self.label));
            if self.block {
                return Err(TaskError::Application(format!("blocked by {}", self.label)));
            }
            let result = next.run(task).await;
            self.log.lock().unwrap().push(format!("{}:after", self.label));
            result
        }
    }

    struct Handler(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl TaskHandler for Handler {
        fn name(&self) -> &str {
            "wf"
        }
        fn kind(&self) -> TaskKind {
            TaskKind::Workflow
        }
        async fn handle(&self, _task: &Task) -> Result<serde_json::Value, TaskError> {
            self.0.lock().unwrap().push("handler".into());
            Ok(serde_json::json!("done"))
        }
    }

    fn recording(label: &'static str, log: &Arc<Mutex<Vec<String>>>, block: bool) -> Arc<dyn Interceptor> {
        Arc::new(Recording {
            label,
            log: Arc::clone(log),
            block,
        })
    }

    #[tokio::test]
    async fn runs_in_order_around_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new(vec![
            recording("outer", &log, false),
            recording("inner", &log, false),
        ]);

        let result = chain
            .execute(&Task::workflow("1", "wf"), &Handler(Arc::clone(&log)))
            .await
            .unwrap();

        assert_eq!(result, serde_json::json!("done"));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer:before", "inner:before", "handler", "inner:after", "outer:after"]
        );
        assert_eq!(chain.names(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn interceptor_can_short_circuit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new(vec![
            recording("outer", &log, false),
            recording("gate", &log, true),
        ]);

        let result = chain
            .execute(&Task::workflow("1", "wf"), &Handler(Arc::clone(&log)))
            .await;

        assert!(result.is_err());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer:before", "gate:before", "outer:after"]
        );
    }

    #[tokio::test]
    async fn empty_chain_calls_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::default();
        chain
            .execute(&Task::workflow("1", "wf"), &Handler(Arc::clone(&log)))
            .await
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["handler"]);
    }
}
