//! The dynamic backend pool: registration/deregistration, stale eviction,
//! and round-robin selection with skip-on-throttled.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hyper::client::HttpConnector;
use hyper::Client;
use tracing::{debug, info, warn};

use crate::forwarder::Forwarder;

struct BackendEntry {
    address: String,
    forwarder: Arc<Forwarder>,
    last_heartbeat: Instant,
}

struct State {
    entries: Vec<BackendEntry>,
    /// address -> index into `entries`, kept in sync on every mutation.
    index: HashMap<String, usize>,
    cursor: usize,
}

impl State {
    fn reindex_from(&mut self, start: usize) {
        for (i, entry) in self.entries.iter().enumerate().skip(start) {
            self.index.insert(entry.address.clone(), i);
        }
    }

    fn normalize_cursor(&mut self) {
        if self.cursor >= self.entries.len() {
            self.cursor = 0;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    NoBackend,
    AllThrottled,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::NoBackend => write!(f, "no backends registered"),
            PoolError::AllThrottled => write!(f, "every registered backend is throttled"),
        }
    }
}

impl std::error::Error for PoolError {}

/// A backend handed back by [`Pool::next`]: an address plus the forwarder
/// that owns its rate gate.
#[derive(Clone)]
pub struct Selected {
    pub address: String,
    pub forwarder: Arc<Forwarder>,
}

/// The ordered, mutex-serialized collection of live backends.
///
/// All of `register`, `deregister`, `next`, and `evict_stale` hold the same
/// lock; none of them perform I/O while holding it.
pub struct Pool {
    client: Client<HttpConnector>,
    max_quiet_age: Duration,
    slow_threshold: Duration,
    state: Mutex<State>,
}

impl Pool {
    pub fn new(max_quiet_age: Duration, slow_threshold: Duration) -> Self {
        Self {
            client: Client::new(),
            max_quiet_age,
            slow_threshold,
            state: Mutex::new(State {
                entries: Vec::new(),
                index: HashMap::new(),
                cursor: 0,
            }),
        }
    }

    /// Registers a new backend, or refreshes the heartbeat of an existing
    /// one. A refresh never reorders `entries` or replaces its forwarder.
    pub fn register(&self, addr: &str) {
        let mut state = self.state.lock().expect("pool mutex poisoned");

        if let Some(&idx) = state.index.get(addr) {
            state.entries[idx].last_heartbeat = Instant::now();
            debug!(address = addr, "heartbeat refreshed");
            return;
        }

        let forwarder = Arc::new(Forwarder::new(
            addr.to_string(),
            self.client.clone(),
            self.slow_threshold,
        ));
        state.entries.push(BackendEntry {
            address: addr.to_string(),
            forwarder,
            last_heartbeat: Instant::now(),
        });
        let new_idx = state.entries.len() - 1;
        state.index.insert(addr.to_string(), new_idx);
        info!(address = addr, pool_size = state.entries.len(), "backend registered");
    }

    /// Removes `addr` if present, preserving the relative order of survivors.
    /// Unknown addresses are a silent no-op.
    pub fn deregister(&self, addr: &str) {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        let Some(idx) = state.index.remove(addr) else {
            return;
        };

        state.entries.remove(idx);
        state.reindex_from(idx);
        // Entries after `idx` shifted left by one; keep the cursor pointing
        // at the same logical entry it did before removal (P4).
        if idx < state.cursor {
            state.cursor -= 1;
        }
        state.normalize_cursor();
        info!(address = addr, pool_size = state.entries.len(), "backend deregistered");
    }

    /// Round-robin with skip-on-throttled, starting at the cursor.
    pub fn next(&self) -> Result<Selected, PoolError> {
        let mut state = self.state.lock().expect("pool mutex poisoned");

        if state.entries.is_empty() {
            return Err(PoolError::NoBackend);
        }
        state.normalize_cursor();

        let len = state.entries.len();
        for step in 0..len {
            let idx = (state.cursor + step) % len;
            if state.entries[idx].forwarder.admit() {
                state.cursor = (idx + 1) % len;
                let entry = &state.entries[idx];
                return Ok(Selected {
                    address: entry.address.clone(),
                    forwarder: entry.forwarder.clone(),
                });
            }
        }

        Err(PoolError::AllThrottled)
    }

    /// Removes every entry whose heartbeat is older than `max_quiet_age`.
    pub fn evict_stale(&self) {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        let threshold = Instant::now().checked_sub(self.max_quiet_age);
        let Some(threshold) = threshold else {
            return;
        };

        let mut removed = Vec::new();
        state.entries.retain(|entry| {
            let stale = entry.last_heartbeat < threshold;
            if stale {
                removed.push(entry.address.clone());
            }
            !stale
        });

        if removed.is_empty() {
            return;
        }

        state.index.clear();
        for (i, entry) in state.entries.iter().enumerate() {
            state.index.insert(entry.address.clone(), i);
        }
        state.normalize_cursor();
        warn!(evicted = ?removed, pool_size = state.entries.len(), "reaper evicted stale backends");
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state.lock().expect("pool mutex poisoned").entries.len()
    }

    #[cfg(test)]
    fn addresses(&self) -> Vec<String> {
        self.state
            .lock()
            .expect("pool mutex poisoned")
            .entries
            .iter()
            .map(|e| e.address.clone())
            .collect()
    }
}

/// Runs [`Pool::evict_stale`] once a second until `shutdown` fires.
pub async fn reaper_tick(pool: Arc<Pool>, shutdown: tokio_util::sync::CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                pool.evict_stale();
            }
            _ = shutdown.cancelled() => {
                debug!("reaper tick exiting on shutdown");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Pool {
        Pool::new(Duration::from_secs(2), Duration::from_millis(500))
    }

    #[test]
    fn test_pool_next_on_empty_pool_is_no_backend() {
        let p = pool();
        assert_eq!(p.next().unwrap_err(), PoolError::NoBackend);
    }

    #[test]
    fn test_pool_register_then_deregister_then_next_is_no_backend() {
        let p = pool();
        p.register("127.0.0.1:9001");
        p.deregister("127.0.0.1:9001");
        assert_eq!(p.next().unwrap_err(), PoolError::NoBackend);
    }

    #[test]
    fn test_pool_round_robin_cycles_through_all_backends_in_order() {
        let p = pool();
        p.register("a");
        p.register("b");
        p.register("c");

        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(p.next().unwrap().address);
        }
        assert_eq!(seen, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_pool_heartbeat_refresh_is_idempotent_for_ordering() {
        let p = pool();
        p.register("a");
        p.register("b");
        p.register("a"); // refresh, not a new entry
        assert_eq!(p.len(), 2);
        assert_eq!(p.addresses(), vec!["a", "b"]);
    }

    #[test]
    fn test_pool_deregister_unknown_address_is_a_no_op() {
        let p = pool();
        p.register("a");
        p.deregister("does-not-exist");
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn test_pool_deregistering_a_non_current_entry_preserves_next_selection() {
        let p = pool();
        p.register("a");
        p.register("b");
        p.register("c");

        // advance cursor to point at "b"
        assert_eq!(p.next().unwrap().address, "a");

        p.deregister("c"); // not the entry the cursor points at

        assert_eq!(p.next().unwrap().address, "b");
    }

    #[test]
    fn test_pool_deregistering_an_entry_before_the_cursor_still_preserves_next_selection() {
        let p = pool();
        p.register("a");
        p.register("b");
        p.register("c");

        assert_eq!(p.next().unwrap().address, "a"); // cursor now points at "b"

        p.deregister("a"); // shifts "b" and "c" left by one

        assert_eq!(p.next().unwrap().address, "b");
        assert_eq!(p.next().unwrap().address, "c");
        assert_eq!(p.next().unwrap().address, "b");
    }

    #[test]
    fn test_pool_reregistering_after_deregister_gets_a_fresh_forwarder() {
        let p = pool();
        p.register("a");
        let first = p.next().unwrap();
        first.forwarder.admit(); // no-op read, just touching it
        p.deregister("a");
        p.register("a");

        let second = p.next().unwrap();
        assert!(second.forwarder.admit(), "a freshly registered backend always admits");
    }

    #[test]
    fn test_pool_evict_stale_removes_only_entries_past_max_quiet_age() {
        let p = Pool::new(Duration::from_millis(1), Duration::from_millis(500));
        p.register("a");
        std::thread::sleep(Duration::from_millis(20));
        p.evict_stale();
        assert_eq!(p.len(), 0);
    }

    #[test]
    fn test_pool_evict_stale_is_a_no_op_when_nothing_is_stale() {
        let p = pool();
        p.register("a");
        p.evict_stale();
        assert_eq!(p.len(), 1);
    }
}
