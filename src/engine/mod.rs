//! Orchestration-engine boundary.
//!
//! The engine itself (delivery, retries, durability) is external. This module
//! holds the seams the worker plugs into:
//! - `task`: task and response types
//! - `handler`: workflow/activity handlers and their registry
//! - `interceptor`: ordered middleware chain around every execution
//! - `queue`: the task-queue client trait
//! - `http`: HTTP task-queue client
//! - `worker`: the polling loop

pub mod handler;
pub mod http;
pub mod interceptor;
pub mod queue;
pub mod task;
pub mod worker;

pub use handler::{HandlerRegistry, TaskHandler};
pub use http::HttpTaskQueue;
pub use interceptor::{Interceptor, InterceptorChain, Next};
pub use queue::TaskQueue;
pub use task::{Payload, Task, TaskKind, TaskResponse};
pub use worker::{PollConfig, Worker};
