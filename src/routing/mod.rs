//! Routing keys, the route table, and the cache that keeps it current.
//!
//! - `extract`: recover a task's routing key from baggage or propagation headers
//! - `authority`: fetch routing rules from the route server
//! - `table`: immutable snapshot of the keys routed to sandboxes
//! - `cache`: periodically refreshed, single-flight route cache

pub mod authority;
pub mod cache;
pub mod extract;
pub mod table;

use std::borrow::Borrow;
use std::fmt;

pub use authority::{HttpRouteAuthority, RouteAuthority};
pub use cache::{CacheStatus, RouteCache};
pub use table::RouteTable;

/// Baggage member carrying the routing key.
pub const ROUTING_KEY_BAGGAGE: &str = "sd-routing-key";

/// Opaque tag identifying which sandbox (if any) a task is destined for.
///
/// Never empty: an empty value means "no key" and is represented as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingKey(String);

impl RoutingKey {
    /// Wrap a raw value, treating blank strings as absent.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == raw.len() {
            Some(Self(raw))
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for RoutingKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RoutingKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
