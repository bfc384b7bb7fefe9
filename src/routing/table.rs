//! Immutable routing-table snapshot.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;

use super::RoutingKey;

/// The set of routing keys currently destined for sandboxes.
///
/// Replaced wholesale on every successful refresh, never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    keys: HashSet<RoutingKey>,
    /// When this snapshot was fetched. `None` until the first successful fetch.
    fetched_at: Option<Instant>,
}

impl RouteTable {
    /// The table served before any fetch succeeded: routes nothing to sandboxes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot of a successful fetch.
    pub fn fetched(keys: HashSet<RoutingKey>, fetched_at: Instant) -> Self {
        Self {
            keys,
            fetched_at: Some(fetched_at),
        }
    }

    pub fn keys(&self) -> &HashSet<RoutingKey> {
        &self.keys
    }

    pub fn contains(&self, key: &RoutingKey) -> bool {
        self.keys.contains(key.as_str())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether any fetch has ever succeeded.
    pub fn is_initialized(&self) -> bool {
        self.fetched_at.is_some()
    }

    /// Fresh iff a fetch succeeded and it is no older than `max_age`.
    pub fn is_fresh(&self, now: Instant, max_age: Duration) -> bool {
        match self.fetched_at {
            Some(at) => now.saturating_duration_since(at) <= max_age,
            None => false,
        }
    }

    /// Sorted key list, for logs.
    pub fn sorted_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.keys.iter().map(RoutingKey::as_str).collect();
        keys.sort_unstable();
        keys
    }
}
