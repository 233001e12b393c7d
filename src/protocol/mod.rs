//! Wire protocol
//!
//! HTTP/1.0 response header, multipart boundaries and part headers.

pub mod constants;
pub mod multipart;

pub use multipart::{part_header, Boundary, Framing, StreamMode};
