//! Gateway metrics collection.
//!
//! Aggregate counters only; nothing here identifies a client or a
//! destination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Gateway metrics collector.
pub struct ServerMetrics {
    start_time: Instant,
    /// Total tunnels accepted
    total_tunnels: AtomicU64,
    /// Currently live tunnels
    active_tunnels: AtomicU64,
    /// Bytes relayed client → server (pre-encryption)
    bytes_up: AtomicU64,
    /// Bytes relayed server → client (post-decryption)
    bytes_down: AtomicU64,
    /// Tunnels that died before reaching the proxy phase
    handshake_errors: AtomicU64,
    /// Tunnels torn down by the idle timer
    timeouts: AtomicU64,
}

impl ServerMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_tunnels: AtomicU64::new(0),
            active_tunnels: AtomicU64::new(0),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
            handshake_errors: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    /// Count a newly accepted tunnel.
    pub fn tunnel_opened(&self) {
        self.total_tunnels.fetch_add(1, Ordering::Relaxed);
        self.active_tunnels.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a finished tunnel.
    pub fn tunnel_closed(&self) {
        self.active_tunnels.fetch_sub(1, Ordering::Relaxed);
    }

    /// Add client → server payload bytes.
    pub fn add_bytes_up(&self, bytes: u64) {
        self.bytes_up.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Add server → client payload bytes.
    pub fn add_bytes_down(&self, bytes: u64) {
        self.bytes_down.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Count a tunnel that failed before proxying.
    pub fn add_handshake_error(&self) {
        self.handshake_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an idle-timer teardown.
    pub fn add_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Total tunnels accepted so far.
    pub fn total_tunnels(&self) -> u64 {
        self.total_tunnels.load(Ordering::Relaxed)
    }

    /// Currently live tunnels.
    pub fn active_tunnels(&self) -> u64 {
        self.active_tunnels.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            total_tunnels: self.total_tunnels.load(Ordering::Relaxed),
            active_tunnels: self.active_tunnels.load(Ordering::Relaxed),
            bytes_up: self.bytes_up.load(Ordering::Relaxed),
            bytes_down: self.bytes_down.load(Ordering::Relaxed),
            handshake_errors: self.handshake_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Format counters as a simple text report.
    pub fn format_report(&self) -> String {
        let s = self.snapshot();
        format!(
            r#"SSR local gateway metrics
=========================
Uptime: {} seconds

Tunnels:
  Total:  {}
  Active: {}

Traffic:
  Up:   {} bytes
  Down: {} bytes

Errors:
  Handshake: {}
  Timeouts:  {}
"#,
            s.uptime_secs,
            s.total_tunnels,
            s.active_tunnels,
            s.bytes_up,
            s.bytes_down,
            s.handshake_errors,
            s.timeouts,
        )
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of all counters at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub total_tunnels: u64,
    pub active_tunnels: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub handshake_errors: u64,
    pub timeouts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnel_counting() {
        let metrics = ServerMetrics::new();

        metrics.tunnel_opened();
        metrics.tunnel_opened();
        assert_eq!(metrics.total_tunnels(), 2);
        assert_eq!(metrics.active_tunnels(), 2);

        metrics.tunnel_closed();
        assert_eq!(metrics.total_tunnels(), 2);
        assert_eq!(metrics.active_tunnels(), 1);
    }

    #[test]
    fn test_snapshot() {
        let metrics = ServerMetrics::new();
        metrics.tunnel_opened();
        metrics.add_bytes_up(100);
        metrics.add_bytes_down(250);
        metrics.add_timeout();

        let s = metrics.snapshot();
        assert_eq!(s.total_tunnels, 1);
        assert_eq!(s.bytes_up, 100);
        assert_eq!(s.bytes_down, 250);
        assert_eq!(s.timeouts, 1);
    }

    #[test]
    fn test_format_report() {
        let metrics = ServerMetrics::new();
        metrics.tunnel_opened();

        let report = metrics.format_report();
        assert!(report.contains("Total:  1"));
        assert!(report.contains("Active: 1"));
    }
}
