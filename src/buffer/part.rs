//! Broadcast unit

use std::sync::Arc;

use bytes::Bytes;

use crate::channel::ChannelKind;
use crate::protocol::part_header;

/// A frozen buffer, ready to be written to every session
///
/// Cheap to clone: payload and header are reference counted, so every
/// session shares the memory of the ring slot it came from.
#[derive(Debug, Clone)]
pub struct Part {
    /// Channel the part was produced on
    pub kind: ChannelKind,
    /// Per-channel rotation counter, starting at 1
    pub sequence: u64,
    /// Payload content type
    pub content_type: Arc<str>,
    /// Producer timestamp
    pub timestamp: i64,
    /// Payload
    pub data: Bytes,
    /// One-shot text written before the payload
    pub header: Option<Bytes>,
}

impl Part {
    /// Serialized payload length (header text plus data)
    pub fn len(&self) -> usize {
        self.header.as_ref().map_or(0, Bytes::len) + self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Multipart header block for this part
    pub fn part_header(&self) -> String {
        part_header(&self.content_type, self.len(), self.timestamp)
    }
}
