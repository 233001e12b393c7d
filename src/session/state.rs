//! Session state machine
//!
//! Tracks a streaming session from accept to close.

use std::time::Instant;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionPhase {
    /// TCP connection accepted, nothing written yet
    #[default]
    Accepted,
    /// HTTP response header written
    HandshakeSent,
    /// Writing parts as they are delivered
    Streaming,
    /// Write loop exited; terminal
    Closed,
}

/// Phase plus timing of one session
#[derive(Debug)]
pub struct SessionState {
    /// Current phase
    pub phase: SessionPhase,

    /// Time when the response header was sent
    pub handshake_sent_at: Option<Instant>,

    /// Time when the session closed
    pub closed_at: Option<Instant>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Accepted,
            handshake_sent_at: None,
            closed_at: None,
        }
    }

    /// Response header written
    pub fn handshake_sent(&mut self) {
        if self.phase == SessionPhase::Accepted {
            self.phase = SessionPhase::HandshakeSent;
            self.handshake_sent_at = Some(Instant::now());
        }
    }

    /// Enter the write loop
    pub fn start_streaming(&mut self) {
        if self.phase == SessionPhase::HandshakeSent {
            self.phase = SessionPhase::Streaming;
        }
    }

    /// Close from any phase
    pub fn close(&mut self) {
        if self.phase != SessionPhase::Closed {
            self.phase = SessionPhase::Closed;
            self.closed_at = Some(Instant::now());
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.phase == SessionPhase::Streaming
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
