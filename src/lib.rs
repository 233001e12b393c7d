//! mxstream: multi-client HTTP multipart streaming server
//!
//! Pushes image frames and auxiliary text (sensor CSV rows) to any number of
//! HTTP clients as a `multipart/x-mixed-replace` stream, or as a raw
//! single-type body.
//!
//! # Example
//!
//! ```no_run
//! use mxstream::{ServerConfig, StreamingServer};
//!
//! #[tokio::main]
//! async fn main() -> mxstream::Result<()> {
//!     let server = StreamingServer::new(ServerConfig::default());
//!     server.start(8080, Some("image/jpeg"), true).await?;
//!
//!     server.set_aux_header("t,x,y\n")?;
//!     server.stream_image(&[0xFF, 0xD8, 0xFF, 0xD9], 1)?;
//!     server.stream_aux_data(b"1,0.5,0.25\n", 1)?;
//!
//!     server.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! Slow clients never hold back the producer or other clients: each session
//! keeps only the newest part of each channel and skips whatever it could
//! not send in time.

pub mod buffer;
pub mod channel;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

mod sync;

pub use channel::ChannelKind;
pub use error::{Error, Result};
pub use protocol::{Boundary, StreamMode};
pub use server::{OverflowPolicy, ServerConfig, StreamingCallback, StreamingServer};
pub use session::{SessionId, SessionInfo, SessionPhase};
pub use stats::{ServerStats, SessionStats};
