//! Admission policy: decides whether this worker may execute a task.
//!
//! A baseline worker claims everything not explicitly routed to a sandbox;
//! a sandbox worker claims only tasks whose routing key is in the route table.
//! With an empty (or never fetched) table, baseline claims all traffic.

use std::collections::HashSet;
use std::fmt;

use uuid::Uuid;

use crate::routing::RoutingKey;

/// Which variant of the workload this worker is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerRole {
    /// The default, non-sandboxed deployment.
    Baseline,
    /// A named sandbox.
    Sandbox(String),
}

impl WorkerRole {
    pub fn sandbox_name(&self) -> Option<&str> {
        match self {
            Self::Baseline => None,
            Self::Sandbox(name) => Some(name),
        }
    }
}

/// Immutable identity of this worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub role: WorkerRole,
    pub task_queue: String,
    /// Per-process instance id, reported to the engine when polling.
    pub instance_id: Uuid,
}

impl WorkerIdentity {
    pub fn new(role: WorkerRole, task_queue: impl Into<String>) -> Self {
        Self {
            role,
            task_queue: task_queue.into(),
            instance_id: Uuid::new_v4(),
        }
    }

    pub fn baseline(task_queue: impl Into<String>) -> Self {
        Self::new(WorkerRole::Baseline, task_queue)
    }

    pub fn sandbox(name: impl Into<String>, task_queue: impl Into<String>) -> Self {
        Self::new(WorkerRole::Sandbox(name.into()), task_queue)
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sandbox={} task_queue={}",
            self.role.sandbox_name().unwrap_or("baseline"),
            self.task_queue
        )
    }
}

/// Why a decision went the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionReason {
    /// Baseline: the task carries no routing key.
    UntaggedTask,
    /// Baseline: the key is not routed to any sandbox.
    KeyNotRouted,
    /// Baseline: the key belongs to a sandbox.
    KeyRoutedToSandbox,
    /// Sandbox: the key is routed here.
    KeyRoutedHere,
    /// Sandbox: untagged traffic belongs to baseline.
    SandboxRequiresKey,
    /// Sandbox: the key is not in this sandbox's table.
    KeyNotRoutedHere,
}

impl fmt::Display for AdmissionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UntaggedTask => "untagged_task",
            Self::KeyNotRouted => "key_not_routed",
            Self::KeyRoutedToSandbox => "key_routed_to_sandbox",
            Self::KeyRoutedHere => "key_routed_here",
            Self::SandboxRequiresKey => "sandbox_requires_key",
            Self::KeyNotRoutedHere => "key_not_routed_here",
        };
        write!(f, "{s}")
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub accept: bool,
    pub reason: AdmissionReason,
}

impl AdmissionDecision {
    fn accept(reason: AdmissionReason) -> Self {
        Self { accept: true, reason }
    }

    fn reject(reason: AdmissionReason) -> Self {
        Self {
            accept: false,
            reason,
        }
    }
}

/// Decide admission for a task, with the reason.
pub fn decide(
    role: &WorkerRole,
    routing_key: Option<&RoutingKey>,
    current_keys: &HashSet<RoutingKey>,
) -> AdmissionDecision {
    use AdmissionReason::*;

    match (role, routing_key) {
        (WorkerRole::Sandbox(_), None) => AdmissionDecision::reject(SandboxRequiresKey),
        (WorkerRole::Sandbox(_), Some(key)) => {
            if current_keys.contains(key.as_str()) {
                AdmissionDecision::accept(KeyRoutedHere)
            } else {
                AdmissionDecision::reject(KeyNotRoutedHere)
            }
        }
        (WorkerRole::Baseline, None) => AdmissionDecision::accept(UntaggedTask),
        (WorkerRole::Baseline, Some(key)) => {
            if current_keys.contains(key.as_str()) {
                AdmissionDecision::reject(KeyRoutedToSandbox)
            } else {
                AdmissionDecision::accept(KeyNotRouted)
            }
        }
    }
}

/// Whether this worker should process a task with `routing_key`.
pub fn should_process(
    identity: &WorkerIdentity,
    routing_key: Option<&RoutingKey>,
    current_keys: &HashSet<RoutingKey>,
) -> bool {
    decide(&identity.role, routing_key, current_keys).accept
}
