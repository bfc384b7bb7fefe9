//! Sandbox-aware task worker.
//!
//! Shares a task queue between a baseline worker and any number of sandbox
//! workers. Each task's routing key decides which instance runs it; the set
//! of keys claimed by sandboxes comes from the route server.

pub mod admission;
pub mod config;
pub mod demo;
pub mod engine;
pub mod error;
pub mod interceptors;
pub mod lifecycle;
pub mod routing;

pub use error::{Error, Result};
pub use lifecycle::{LifecycleState, SandboxAwareWorker};
