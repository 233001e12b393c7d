//! Streaming sessions
//!
//! One session per connected client. Each session owns its socket and one
//! pending slot per channel; channels hand parts to every session through
//! the registry.

pub mod context;
pub mod state;
pub mod streaming;

pub use context::{SessionId, SessionInfo};
pub use state::{SessionPhase, SessionState};
pub use streaming::{Session, SessionOptions};
