//! Live-tunnel registry.
//!
//! The process keeps one entry per tunnel with outstanding I/O. Entries are
//! shutdown signals: orderly teardown snapshots them under the lock and
//! notifies outside it, so a tunnel removing itself mid-traversal can never
//! invalidate the iteration. No iterator ever escapes the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Registry of live tunnels, keyed by tunnel id.
pub struct TunnelRegistry {
    inner: Mutex<HashMap<u64, Arc<Notify>>>,
    next_id: AtomicU64,
}

impl TunnelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new tunnel; returns its id and the shutdown signal the
    /// tunnel task must watch.
    pub fn insert(&self) -> (u64, Arc<Notify>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let notify = Arc::new(Notify::new());
        self.inner.lock().insert(id, notify.clone());
        (id, notify)
    }

    /// Remove a tunnel on final teardown.
    pub fn remove(&self, id: u64) {
        self.inner.lock().remove(&id);
    }

    /// Number of live tunnels.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether any tunnels are live.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Signal every live tunnel to shut down. Snapshot-then-notify: the
    /// signalled tasks remove themselves as they finish.
    pub fn shutdown_all(&self) {
        let snapshot: Vec<Arc<Notify>> = self.inner.lock().values().cloned().collect();
        for notify in snapshot {
            notify.notify_one();
        }
    }
}

impl Default for TunnelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
