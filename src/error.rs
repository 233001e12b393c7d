//! Error types

use std::time::Duration;

use thiserror::Error;

use crate::channel::ChannelKind;

/// Errors returned by the streaming server
#[derive(Debug, Error)]
pub enum Error {
    /// Socket level failure (bind, accept, write)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation needs a running server
    #[error("Server is not running")]
    NotRunning,

    /// The producer pushed data to a channel that was not started
    #[error("{0} channel is not active")]
    ChannelInactive(ChannelKind),

    /// The payload does not fit in a ring buffer slot
    #[error("Payload of {size} bytes exceeds buffer capacity of {capacity} bytes")]
    PayloadTooLarge { size: usize, capacity: usize },

    /// A socket write did not complete in time
    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),
}

pub type Result<T> = std::result::Result<T, Error>;
