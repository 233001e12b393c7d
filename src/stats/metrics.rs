//! Statistics for streaming sessions and the server

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::session::SessionPhase;

/// Session-level statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Where the session is in its lifecycle
    pub phase: SessionPhase,
    /// Total bytes written, response header included
    pub bytes_sent: u64,
    /// Parts written
    pub parts_sent: u64,
    /// Parts skipped because a newer one replaced them before they were written
    pub parts_dropped: u64,
    /// Explicit socket flushes
    pub flushes: u64,
    /// Connection duration
    pub duration: Duration,
    /// Current bitrate estimate (bits/sec)
    pub bitrate: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one written part
    pub fn record_part(&mut self, bytes: usize, dropped: u64) {
        self.bytes_sent += bytes as u64;
        self.parts_sent += 1;
        self.parts_dropped += dropped;
    }

    /// Calculate bitrate from bytes and duration
    pub fn calculate_bitrate(&mut self) {
        let secs = self.duration.as_secs();
        if secs > 0 {
            self.bitrate = (self.bytes_sent * 8) / secs;
        }
    }
}

/// Server-wide statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Connections accepted since creation
    pub total_connections: u64,
    /// Connections closed immediately because every slot was taken
    pub rejected_connections: u64,
    /// Sessions currently registered
    pub active_sessions: u64,
    /// Parts handed to the broadcaster, over every run
    pub parts_broadcast: u64,
    /// Time since the last successful start (zero when stopped)
    pub uptime: Duration,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Lock-free counters behind [`ServerStats`]
#[derive(Debug, Default)]
pub(crate) struct ServerCounters {
    total_connections: AtomicU64,
    rejected_connections: AtomicU64,
    /// Parts broadcast by runs that already stopped
    retired_parts: AtomicU64,
}

impl ServerCounters {
    pub(crate) fn connection_accepted(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn run_stopped(&self, parts_broadcast: u64) {
        self.retired_parts.fetch_add(parts_broadcast, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(
        &self,
        active_sessions: usize,
        parts_broadcast: u64,
        uptime: Duration,
    ) -> ServerStats {
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            active_sessions: active_sessions as u64,
            parts_broadcast: self.retired_parts.load(Ordering::Relaxed) + parts_broadcast,
            uptime,
        }
    }
}
