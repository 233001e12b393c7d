//! Session registry implementation
//!
//! The live set of sessions. Channels broadcast through it, the server
//! closes or aborts sessions through it, and every session removes itself
//! from it on exit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio::task::AbortHandle;

use super::entry::{SessionEntry, Subscription};
use crate::buffer::Part;
use crate::session::{SessionId, SessionInfo};
use crate::stats::SessionStats;
use crate::sync::lock;

/// Registry of live sessions
///
/// Guarded by a plain mutex: every operation only touches handles and
/// pointers, never the socket.
pub struct SessionRegistry {
    /// Map of session ID to its entry
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,

    /// Woken whenever the registry becomes empty
    drained: Notify,

    /// Parts handed to `broadcast`
    parts_broadcast: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            drained: Notify::new(),
            parts_broadcast: AtomicU64::new(0),
        }
    }

    /// Add a session and return its pending slots and live counters
    pub fn register(&self, info: SessionInfo) -> Subscription {
        let id = info.id;
        let (entry, subscription) = SessionEntry::new(info);
        let count = {
            let mut sessions = lock(&self.sessions);
            sessions.insert(id, entry);
            sessions.len()
        };

        tracing::debug!(session_id = %id, sessions = count, "Session registered");
        subscription
    }

    /// Record the task running a session
    ///
    /// Returns false if the session is no longer registered (it ended or
    /// was reset in between); the caller must then cancel the task itself.
    pub fn attach_task(&self, id: SessionId, task: AbortHandle) -> bool {
        match lock(&self.sessions).get_mut(&id) {
            Some(entry) => {
                entry.set_task(task);
                true
            }
            None => false,
        }
    }

    /// Remove a session by ID
    ///
    /// Matching is by value, so a stale ID never removes a newer session.
    pub fn end(&self, id: SessionId) -> bool {
        let (removed, now_empty) = {
            let mut sessions = lock(&self.sessions);
            let removed = sessions.remove(&id).is_some();
            (removed, sessions.is_empty())
        };

        if removed {
            tracing::debug!(session_id = %id, "Session removed");
        }
        if now_empty {
            self.drained.notify_waiters();
        }
        removed
    }

    /// Deliver a part to every session
    ///
    /// Never blocks: each session keeps only the newest part. Returns the
    /// number of sessions the part was delivered to.
    pub fn broadcast(&self, part: Part) -> usize {
        self.parts_broadcast.fetch_add(1, Ordering::Relaxed);

        let sessions = lock(&self.sessions);
        sessions
            .values()
            .filter(|entry| entry.deliver(part.clone()))
            .count()
    }

    /// Send the close poison to every session
    pub fn close_all(&self) -> usize {
        let sessions = lock(&self.sessions);
        for entry in sessions.values() {
            entry.close();
        }
        sessions.len()
    }

    /// Cancel every session task and clear the registry
    pub fn abort_all(&self) -> usize {
        let entries: Vec<SessionEntry> = lock(&self.sessions).drain().map(|(_, e)| e).collect();

        for entry in &entries {
            entry.abort();
        }
        self.drained.notify_waiters();
        entries.len()
    }

    /// Wait until no session is registered
    pub async fn wait_drained(&self) {
        loop {
            let drained = self.drained.notified();
            if self.is_empty() {
                return;
            }
            drained.await;
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.sessions).is_empty()
    }

    /// Snapshot of the live sessions, ordered by ID
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = lock(&self.sessions)
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Counters of a live session, with duration and bitrate filled in
    pub fn session_stats(&self, id: SessionId) -> Option<SessionStats> {
        let sessions = lock(&self.sessions);
        let entry = sessions.get(&id)?;
        let mut stats = lock(entry.stats()).clone();
        stats.duration = entry.info.age();
        stats.calculate_bitrate();
        Some(stats)
    }

    /// Total parts broadcast since creation
    pub fn parts_broadcast(&self) -> u64 {
        self.parts_broadcast.load(Ordering::Relaxed)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
