//! Buffer ring
//!
//! ```text
//!            current
//!               │
//!   ┌────────┬──▼─────┬────────┬────────┐
//!   │ slot 0 │ slot 1 │ slot 2 │ slot 3 │   producer writes into `current`
//!   └────────┴────────┴────────┴────────┘
//!                 │ rotate()
//!                 ▼
//!        freeze slot 1 -> Part -> broadcast
//!        current = 2, reset slot 2
//! ```

use crate::buffer::{Buffer, Part};
use crate::error::Result;
use crate::protocol::constants::MIN_RING_SIZE;

use super::ChannelKind;

/// Fixed set of reusable buffers cycled in order
#[derive(Debug)]
pub struct BufferRing {
    kind: ChannelKind,
    buffers: Vec<Buffer>,
    current: usize,
    sequence: u64,
}

impl BufferRing {
    /// Create a ring of `slots` buffers (at least two) of `capacity` bytes
    pub fn new(kind: ChannelKind, slots: usize, capacity: usize, content_type: &str) -> Self {
        let slots = slots.max(MIN_RING_SIZE);
        let buffers = (0..slots)
            .map(|_| Buffer::new(capacity, content_type))
            .collect();

        Self {
            kind,
            buffers,
            current: 0,
            sequence: 0,
        }
    }

    /// Overwrite the current slot
    pub fn write(&mut self, data: &[u8], timestamp: i64) -> Result<()> {
        self.buffers[self.current].set_data(data, timestamp)
    }

    /// Append to the current slot
    pub fn append(&mut self, data: &[u8], timestamp: i64) -> Result<()> {
        self.buffers[self.current].append_data(data, timestamp)
    }

    /// Attach one-shot header text to the next part
    pub fn set_header(&mut self, text: impl Into<String>) {
        self.buffers[self.current].set_header(text);
    }

    /// Hand off the current slot and advance
    ///
    /// Returns `None` when nothing was written since the last rotation; a
    /// pending header then waits for the next write.
    pub fn rotate(&mut self) -> Option<Part> {
        let slot = &mut self.buffers[self.current];
        if slot.is_empty() {
            return None;
        }

        self.sequence += 1;
        let part = slot.freeze(self.kind, self.sequence);

        self.current = (self.current + 1) % self.buffers.len();
        self.buffers[self.current].reset();

        Some(part)
    }

    /// Index of the slot accepting writes
    pub fn current(&self) -> usize {
        self.current
    }

    /// Number of slots
    pub fn slots(&self) -> usize {
        self.buffers.len()
    }

    /// Parts handed off so far
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}
