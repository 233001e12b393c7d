//! Ring slot storage
//!
//! A [`Buffer`] is one reusable slot of a channel ring. Producers overwrite or
//! append into it; on rotation it is frozen into an immutable [`Part`] that
//! sessions can hold on to while the producer keeps writing elsewhere.
//!
//! Freezing splits the filled region off the slot's `BytesMut`. Once every
//! session has dropped that part the allocation is unique again and the next
//! `reset()` reclaims it instead of allocating.

pub mod part;

use std::sync::Arc;

use bytes::BytesMut;

use crate::channel::ChannelKind;
use crate::error::{Error, Result};

pub use part::Part;

/// Fixed-capacity byte container with stream metadata
#[derive(Debug)]
pub struct Buffer {
    /// Valid bytes, never longer than `capacity`
    data: BytesMut,
    /// Maximum number of bytes this slot accepts
    capacity: usize,
    /// Producer timestamp of the latest write
    timestamp: i64,
    /// Content type of the payload
    content_type: Arc<str>,
    /// One-shot text prefixed to the next frozen part
    header: Option<String>,
}

impl Buffer {
    /// Allocate a buffer of `capacity` bytes
    pub fn new(capacity: usize, content_type: &str) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
            timestamp: 0,
            content_type: Arc::from(content_type),
            header: None,
        }
    }

    /// Replace the contents with `data`
    ///
    /// Payloads larger than the capacity are rejected and the buffer is left
    /// untouched.
    pub fn set_data(&mut self, data: &[u8], timestamp: i64) -> Result<()> {
        if data.len() > self.capacity {
            return Err(Error::PayloadTooLarge {
                size: data.len(),
                capacity: self.capacity,
            });
        }

        self.data.clear();
        self.data.extend_from_slice(data);
        self.timestamp = timestamp;
        Ok(())
    }

    /// Append `data` after the current contents
    pub fn append_data(&mut self, data: &[u8], timestamp: i64) -> Result<()> {
        let size = self.data.len() + data.len();
        if size > self.capacity {
            return Err(Error::PayloadTooLarge {
                size,
                capacity: self.capacity,
            });
        }

        self.data.extend_from_slice(data);
        self.timestamp = timestamp;
        Ok(())
    }

    /// Set the one-shot header text
    pub fn set_header(&mut self, text: impl Into<String>) {
        self.header = Some(text.into());
    }

    /// Discard the contents, keeping any pending header
    pub fn reset(&mut self) {
        self.data.clear();
        self.data.reserve(self.capacity);
    }

    /// Snapshot the contents into an immutable part
    ///
    /// Leaves the buffer empty and consumes the one-shot header.
    pub fn freeze(&mut self, kind: ChannelKind, sequence: u64) -> Part {
        Part {
            kind,
            sequence,
            content_type: Arc::clone(&self.content_type),
            timestamp: self.timestamp,
            data: self.data.split().freeze(),
            header: self.header.take().map(Into::into),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn has_header(&self) -> bool {
        self.header.is_some()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}
