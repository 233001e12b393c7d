//! Per-session registry entry

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::buffer::Part;
use crate::channel::ChannelKind;
use crate::session::SessionInfo;
use crate::stats::SessionStats;

/// The pending slots of one session
///
/// One slot per channel, each holding only the latest part of that channel.
/// A part delivered before the session consumed the previous one of the same
/// channel replaces it; image frames never push out an unsent aux part.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    slots: [Option<Part>; 2],
    closing: bool,
}

impl Delivery {
    /// Latest part of `kind`, written or not
    pub fn part(&self, kind: ChannelKind) -> Option<&Part> {
        self.slots[kind.index()].as_ref()
    }

    /// Poison flag: finish the stream and exit
    pub fn is_close(&self) -> bool {
        self.closing
    }
}

/// Session side of a registration
pub struct Subscription {
    /// Receiving half of the pending slots
    pub pending: watch::Receiver<Delivery>,

    /// Live counters, readable through the registry
    pub stats: Arc<Mutex<SessionStats>>,
}

/// Registry-side handle of a live session
pub struct SessionEntry {
    /// Identification of the session
    pub info: SessionInfo,

    /// Sender half of the session's pending slots
    pending: watch::Sender<Delivery>,

    /// Counters updated by the session task
    stats: Arc<Mutex<SessionStats>>,

    /// Handle for forced cancellation (set once the task is spawned)
    task: Option<AbortHandle>,
}

impl SessionEntry {
    pub(super) fn new(info: SessionInfo) -> (Self, Subscription) {
        let (pending, rx) = watch::channel(Delivery::default());
        let stats = Arc::new(Mutex::new(SessionStats::new()));
        let entry = Self {
            info,
            pending,
            stats: Arc::clone(&stats),
            task: None,
        };
        (entry, Subscription { pending: rx, stats })
    }

    pub(super) fn set_task(&mut self, task: AbortHandle) {
        self.task = Some(task);
    }

    pub(super) fn stats(&self) -> &Arc<Mutex<SessionStats>> {
        &self.stats
    }

    /// Replace the pending part of the same channel with `part`
    ///
    /// Returns false if the session is already closing.
    pub(super) fn deliver(&self, part: Part) -> bool {
        self.pending.send_if_modified(|current| {
            if current.closing {
                false
            } else {
                let slot = part.kind.index();
                current.slots[slot] = Some(part);
                true
            }
        })
    }

    /// Ask the session to finish cleanly
    pub(super) fn close(&self) {
        self.pending.send_modify(|current| current.closing = true);
    }

    /// Cancel the session task
    pub(super) fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}
