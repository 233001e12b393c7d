//! Session identification
//!
//! Information handed to callbacks and exposed through the registry.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Identifier assigned to a session at accept time
///
/// Monotonically increasing per server and compared by value; it is used to
/// find and remove a session, not to order them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only description of a connected client
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Unique session ID
    pub id: SessionId,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// When the connection was accepted
    pub connected_at: Instant,
}

impl SessionInfo {
    pub fn new(id: SessionId, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            connected_at: Instant::now(),
        }
    }

    /// Time since the connection was accepted
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
