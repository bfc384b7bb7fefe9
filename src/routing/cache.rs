//! Route cache: the worker's view of which routing keys belong to sandboxes.
//!
//! Readers take the current `Arc<RouteTable>` snapshot and never wait on the
//! network. Refreshes are single-flight: one caller holds the refresh gate and
//! fetches, concurrent stale callers wait for that fetch to finish instead of
//! issuing their own. A failed fetch keeps the previous snapshot.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{MutexGuard, Notify, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::authority::RouteAuthority;
use super::table::RouteTable;

/// Operator-facing summary of the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatus {
    pub key_count: usize,
    /// Whether any fetch has succeeded.
    pub initialized: bool,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub fetch_attempts: u64,
}

/// Periodically refreshed cache of routing keys.
pub struct RouteCache {
    authority: Arc<dyn RouteAuthority>,
    refresh_interval: Duration,
    table: watch::Sender<Arc<RouteTable>>,
    /// Held by the single in-flight refresh.
    gate: tokio::sync::Mutex<()>,
    /// Fired whenever a refresh attempt ends, successful or not.
    refreshed: Notify,
    fetch_attempts: AtomicU64,
    consecutive_failures: AtomicU32,
    last_success_at: Mutex<Option<DateTime<Utc>>>,
}

impl RouteCache {
    /// Create a cache with an empty, never-fetched table.
    pub fn new(authority: Arc<dyn RouteAuthority>, refresh_interval: Duration) -> Arc<Self> {
        let (table, _rx) = watch::channel(Arc::new(RouteTable::empty()));
        Arc::new(Self {
            authority,
            refresh_interval,
            table,
            gate: tokio::sync::Mutex::new(()),
            refreshed: Notify::new(),
            fetch_attempts: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            last_success_at: Mutex::new(None),
        })
    }

    /// Current routing-key snapshot. Never blocks on I/O.
    pub fn current_keys(&self) -> Arc<RouteTable> {
        self.table.borrow().clone()
    }

    /// Observe snapshot replacements.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RouteTable>> {
        self.table.subscribe()
    }

    pub fn status(&self) -> CacheStatus {
        let table = self.current_keys();
        CacheStatus {
            key_count: table.len(),
            initialized: table.is_initialized(),
            last_success_at: self
                .last_success_at
                .lock()
                .map(|at| *at)
                .unwrap_or_default(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            fetch_attempts: self.fetch_attempts.load(Ordering::Relaxed),
        }
    }

    /// Make sure the table is no older than the refresh interval.
    ///
    /// On return either the table is fresh or one fetch attempt was made and
    /// failed, in which case the previous table is still served.
    pub async fn ensure_fresh(&self) {
        self.ensure_max_age(self.refresh_interval).await;
    }

    async fn ensure_max_age(&self, max_age: Duration) {
        if self.is_fresh(max_age) {
            return;
        }

        // Register for the completion signal before looking at the gate, so a
        // refresh finishing in between cannot be missed.
        let refreshed = self.refreshed.notified();
        tokio::pin!(refreshed);
        refreshed.as_mut().enable();

        let Ok(permit) = self.gate.try_lock() else {
            debug!("Route refresh already in flight, waiting for it");
            refreshed.await;
            return;
        };
        let _flight = Flight {
            permit: Some(permit),
            refreshed: &self.refreshed,
        };

        if self.is_fresh(max_age) {
            return;
        }

        self.refresh().await;
    }

    fn is_fresh(&self, max_age: Duration) -> bool {
        self.table.borrow().is_fresh(Instant::now(), max_age)
    }

    async fn refresh(&self) {
        self.fetch_attempts.fetch_add(1, Ordering::Relaxed);

        match self.authority.fetch_routing_keys().await {
            Ok(keys) => {
                let next = Arc::new(RouteTable::fetched(keys, Instant::now()));
                let previous = self.table.send_replace(Arc::clone(&next));

                self.consecutive_failures.store(0, Ordering::Relaxed);
                if let Ok(mut at) = self.last_success_at.lock() {
                    *at = Some(Utc::now());
                }

                if !previous.is_initialized() || previous.keys() != next.keys() {
                    info!(routing_keys = ?next.sorted_keys(), "Routing keys updated");
                } else {
                    debug!(count = next.len(), "Routing keys unchanged");
                }
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                error!(
                    error = %e,
                    consecutive_failures = failures,
                    retained_keys = self.table.borrow().len(),
                    "Failed to refresh routing keys, keeping previous table"
                );
            }
        }
    }

    /// Refresh loop for the worker's lifetime. Returns once `shutdown` fires.
    ///
    /// Each pass refreshes when the table is older than half the interval, so
    /// a table is never served past one interval plus one fetch.
    pub async fn run_periodic(&self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.refresh_interval.as_secs_f64(),
            "Starting periodic route cache updater"
        );

        let max_age = self.refresh_interval / 2;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.ensure_max_age(max_age) => {}
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.refresh_interval) => {}
            }
        }

        info!("Periodic route cache updater stopped");
    }
}

/// The in-flight refresh. Releases the gate, then wakes waiters, on every exit
/// path including cancellation of the refreshing future.
struct Flight<'a> {
    permit: Option<MutexGuard<'a, ()>>,
    refreshed: &'a Notify,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.refreshed.notify_waiters();
    }
}
