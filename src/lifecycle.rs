//! Worker lifecycle: start the route cache and the task poller together,
//! supervise them, and shut both down on a signal or on the first crash.
//!
//! A worker that has silently stopped polling or routing is worse than one
//! that is visibly dead, so any background task failure ends `run` with an
//! error and the binary exits non-zero.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::admission::WorkerIdentity;
use crate::config::Config;
use crate::engine::{HandlerRegistry, InterceptorChain, PollConfig, TaskQueue, Worker};
use crate::error::LifecycleError;
use crate::interceptors::{SelectiveTaskInterceptor, TaskSpanInterceptor};
use crate::routing::{RouteAuthority, RouteCache};

const ROUTE_CACHE_TASK: &str = "route_cache";
const TASK_POLLER_TASK: &str = "task_poller";

/// Lifecycle state of a [`SandboxAwareWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Constructed, nothing running yet.
    Created,
    /// Installing signal handlers and spawning background tasks.
    Starting,
    /// Route cache and task poller are running.
    Running,
    /// Cancelling and draining background tasks.
    ShuttingDown,
    /// Everything has stopped.
    Stopped,
}

impl LifecycleState {
    pub fn can_transition_to(&self, target: LifecycleState) -> bool {
        use LifecycleState::*;

        matches!(
            (self, target),
            (Created, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, ShuttingDown)
                | (ShuttingDown, Stopped)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// How a supervised background task ended.
struct TaskExit {
    name: &'static str,
    outcome: Result<(), String>,
}

/// A task-queue worker that only executes the tasks routed to it.
pub struct SandboxAwareWorker {
    config: Config,
    identity: Arc<WorkerIdentity>,
    authority: Arc<dyn RouteAuthority>,
    queue: Arc<dyn TaskQueue>,
    handlers: HandlerRegistry,
    shutdown: CancellationToken,
    state: watch::Sender<LifecycleState>,
}

impl SandboxAwareWorker {
    pub fn new(
        config: Config,
        authority: Arc<dyn RouteAuthority>,
        queue: Arc<dyn TaskQueue>,
        handlers: HandlerRegistry,
    ) -> Self {
        let (state, _rx) = watch::channel(LifecycleState::Created);
        Self {
            identity: Arc::new(config.worker.identity()),
            config,
            authority,
            queue,
            handlers,
            shutdown: CancellationToken::new(),
            state,
        }
    }

    /// Use an existing identity, e.g. the one the task-queue client reports.
    pub fn with_identity(mut self, identity: WorkerIdentity) -> Self {
        self.identity = Arc::new(identity);
        self
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    /// Cancelling this token stops the worker, same as a termination signal.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Run until a termination signal arrives, the shutdown token is
    /// cancelled, or a background task fails.
    pub async fn run(self) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::Starting)?;

        let signals = match spawn_signal_listener(self.shutdown.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                self.transition(LifecycleState::Stopped)?;
                return Err(e);
            }
        };

        let identity = Arc::clone(&self.identity);
        let cache = RouteCache::new(
            Arc::clone(&self.authority),
            self.config.routes.refresh_interval,
        );
        let chain = InterceptorChain::new(vec![
            Arc::new(TaskSpanInterceptor),
            Arc::new(SelectiveTaskInterceptor::new(
                Arc::clone(&cache),
                Arc::clone(&identity),
            )),
        ]);
        let worker = Worker::new(
            Arc::clone(&identity),
            Arc::clone(&self.queue),
            self.handlers.clone(),
            chain,
            PollConfig::from(&self.config.worker),
        );

        let refresher: JoinHandle<Result<(), String>> = tokio::spawn({
            let cache = Arc::clone(&cache);
            let shutdown = self.shutdown.clone();
            async move {
                cache.run_periodic(shutdown).await;
                Ok(())
            }
        });
        let poller: JoinHandle<Result<(), String>> = tokio::spawn({
            let shutdown = self.shutdown.clone();
            async move { worker.run(shutdown).await.map_err(|e| e.to_string()) }
        });

        let mut aborts: Vec<AbortHandle> = Vec::new();
        let mut tasks: JoinSet<TaskExit> = JoinSet::new();
        for (name, handle) in [(ROUTE_CACHE_TASK, refresher), (TASK_POLLER_TASK, poller)] {
            aborts.push(handle.abort_handle());
            tasks.spawn(supervise(name, handle));
        }

        self.transition(LifecycleState::Running)?;
        info!(worker = %identity, "Sandbox-aware worker running");

        let mut crash: Option<LifecycleError> = None;
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                info!("Shutdown requested");
            }
            Some(joined) = tasks.join_next() => {
                record_exit(joined, &mut crash);
                if crash.is_none() {
                    warn!("Background task stopped without a shutdown request");
                }
            }
        }

        self.transition(LifecycleState::ShuttingDown)?;
        self.shutdown.cancel();

        let timeout = self.config.worker.shutdown_timeout;
        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = tasks.join_next().await {
                record_exit(joined, &mut crash);
            }
        })
        .await;

        let mut result = match crash {
            Some(e) => Err(e),
            None => Ok(()),
        };
        if drained.is_err() {
            error!(timeout_secs = timeout.as_secs_f64(), "Background tasks did not stop in time, aborting");
            for handle in &aborts {
                handle.abort();
            }
            tasks.abort_all();
            if result.is_ok() {
                result = Err(LifecycleError::DrainTimeout(timeout));
            }
        }

        signals.abort();
        self.transition(LifecycleState::Stopped)?;

        let status = cache.status();
        info!(
            routing_keys = status.key_count,
            initialized = status.initialized,
            last_success_at = ?status.last_success_at,
            consecutive_failures = status.consecutive_failures,
            fetch_attempts = status.fetch_attempts,
            "Worker stopped"
        );

        result
    }

    fn transition(&self, to: LifecycleState) -> Result<(), LifecycleError> {
        let from = *self.state.borrow();
        if !from.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self.state.send_replace(to);
        info!(from = %from, to = %to, "Worker lifecycle transition");
        Ok(())
    }
}

/// Await a background task and name its outcome. Cancellation is a clean stop.
async fn supervise(name: &'static str, handle: JoinHandle<Result<(), String>>) -> TaskExit {
    let outcome = match handle.await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(format!("panicked: {e}")),
    };
    TaskExit { name, outcome }
}

/// Log a task exit; the first failure becomes the crash `run` reports.
fn record_exit(joined: Result<TaskExit, JoinError>, crash: &mut Option<LifecycleError>) {
    let exit = match joined {
        Ok(exit) => exit,
        Err(e) => TaskExit {
            name: "supervisor",
            outcome: if e.is_cancelled() { Ok(()) } else { Err(e.to_string()) },
        },
    };

    match exit.outcome {
        Ok(()) => info!(task = exit.name, "Background task stopped"),
        Err(reason) => {
            error!(task = exit.name, reason = %reason, "Background task crashed");
            if crash.is_none() {
                *crash = Some(LifecycleError::TaskCrashed {
                    task: exit.name.to_string(),
                    reason,
                });
            }
        }
    }
}

/// Cancel `shutdown` on Ctrl+C, or SIGTERM on unix.
fn spawn_signal_listener(shutdown: CancellationToken) -> Result<JoinHandle<()>, LifecycleError> {
    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        let interrupted = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Ctrl+C handler unavailable");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminated = async move {
            terminate.recv().await;
        };
        #[cfg(not(unix))]
        let terminated = std::future::pending::<()>();

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interrupted => info!(signal = "SIGINT", "Termination signal received"),
            _ = terminated => info!(signal = "SIGTERM", "Termination signal received"),
        }
        shutdown.cancel();
    }))
}
