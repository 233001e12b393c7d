//! Streaming server
//!
//! Accept loop, producer API and lifecycle control.

pub mod callback;
pub mod config;
pub mod listener;

pub use callback::StreamingCallback;
pub use config::{OverflowPolicy, ServerConfig};
pub use listener::StreamingServer;
