//! Producer channels
//!
//! A channel decouples the producer's call rate from the broadcast rate.
//! Producer calls only take the ring lock long enough to copy their bytes and
//! then signal the worker task; the worker rotates the ring and fans the
//! finished part out through the session registry.
//!
//! Rotation signals coalesce: several writes that land before the worker gets
//! to run produce a single part. For `append` this is what accumulates small
//! writes (CSV rows) into one flush unit.

pub mod ring;

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::registry::SessionRegistry;
use crate::sync::lock;

pub use ring::BufferRing;

/// Data source a channel carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Image frames (overwrite semantics)
    Image,
    /// Auxiliary text such as sensor readings (append semantics)
    Aux,
}

impl ChannelKind {
    /// Write order within one wakeup of a session
    pub(crate) const ALL: [ChannelKind; 2] = [ChannelKind::Image, ChannelKind::Aux];

    pub(crate) fn index(self) -> usize {
        match self {
            ChannelKind::Image => 0,
            ChannelKind::Aux => 1,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Image => f.write_str("image"),
            ChannelKind::Aux => f.write_str("aux"),
        }
    }
}

/// A buffer ring driven by its own rotation task
pub struct Channel {
    kind: ChannelKind,
    ring: Arc<Mutex<BufferRing>>,
    ready: Arc<Notify>,
    worker: JoinHandle<()>,
}

impl Channel {
    /// Create the ring and spawn its worker
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        kind: ChannelKind,
        content_type: &str,
        slots: usize,
        capacity: usize,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        let ring = Arc::new(Mutex::new(BufferRing::new(
            kind,
            slots,
            capacity,
            content_type,
        )));
        let ready = Arc::new(Notify::new());

        let worker = tokio::spawn(rotate_loop(
            kind,
            Arc::clone(&ring),
            Arc::clone(&ready),
            registry,
        ));

        tracing::debug!(channel = %kind, content_type, slots, capacity, "Channel started");

        Self {
            kind,
            ring,
            ready,
            worker,
        }
    }

    /// Overwrite the current slot and schedule a rotation
    pub fn write(&self, data: &[u8], timestamp: i64) -> Result<()> {
        let result = lock(&self.ring).write(data, timestamp);
        self.after_write(result)
    }

    /// Append to the current slot and schedule a rotation
    pub fn append(&self, data: &[u8], timestamp: i64) -> Result<()> {
        let result = lock(&self.ring).append(data, timestamp);
        self.after_write(result)
    }

    /// Prefix the next part with `text`, once
    pub fn set_header(&self, text: impl Into<String>) {
        lock(&self.ring).set_header(text);
    }

    /// Stop the worker; pending rotations are abandoned
    pub fn terminate(&self) {
        if !self.worker.is_finished() {
            tracing::debug!(channel = %self.kind, "Channel terminated");
        }
        self.worker.abort();
    }

    fn after_write(&self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                self.ready.notify_one();
                Ok(())
            }
            Err(e) => {
                tracing::warn!(channel = %self.kind, error = %e, "Write rejected");
                Err(e)
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn rotate_loop(
    kind: ChannelKind,
    ring: Arc<Mutex<BufferRing>>,
    ready: Arc<Notify>,
    registry: Arc<SessionRegistry>,
) {
    loop {
        ready.notified().await;

        let part = lock(&ring).rotate();
        if let Some(part) = part {
            let sequence = part.sequence;
            let size = part.len();
            let sessions = registry.broadcast(part);
            tracing::trace!(channel = %kind, sequence, size, sessions, "Part broadcast");
        }
    }
}
