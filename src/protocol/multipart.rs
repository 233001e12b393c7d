//! HTTP response framing
//!
//! Every client gets the same response header, then a body that is either a
//! `multipart/x-mixed-replace` sequence of parts or the raw concatenation of
//! the payloads:
//!
//! ```text
//! HTTP/1.0 200 OK
//! ...no-cache headers...
//! Content-Type: multipart/x-mixed-replace; boundary=<b>
//!
//! \r\n--<b>\r\n                 <- boundary line
//! Content-type: image/jpeg\r\n  <- part header
//! Content-Length: <n>\r\n
//! X-Timestamp: <ts>\r\n
//! \r\n
//! <n payload bytes>\r\n
//! ...
//! \r\n--<b>--\r\n\r\n           <- terminator, clean stop only
//! ```
//!
//! The client request is never read.

use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;

use super::constants::{
    BOUNDARY_RANDOM_BYTES, CACHE_CONTROL, MULTIPART_CONTENT_TYPE, STATUS_LINE,
};
use crate::buffer::Part;

/// Random delimiter between multipart parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary(Arc<str>);

impl Boundary {
    /// Create a boundary from a fixed string
    pub fn new(value: impl Into<String>) -> Self {
        Self(Arc::from(value.into()))
    }

    /// Generate a fresh random boundary (lowercase hex)
    pub fn random() -> Self {
        let bytes: [u8; BOUNDARY_RANDOM_BYTES] = rand::random();
        let mut hex = String::with_capacity(BOUNDARY_RANDOM_BYTES * 2);
        for b in bytes {
            let _ = write!(hex, "{:02x}", b);
        }
        Self(Arc::from(hex))
    }

    /// The boundary shared by every server in this process
    pub fn process() -> Self {
        static BOUNDARY: OnceLock<Boundary> = OnceLock::new();
        BOUNDARY.get_or_init(Self::random).clone()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Boundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How parts are laid out in the response body
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamMode {
    /// Boundary-delimited parts, each with its own headers
    #[default]
    Multipart,
    /// Bare payloads under a single fixed content type
    Raw(String),
}

/// Render the header block of one part
pub fn part_header(content_type: &str, length: usize, timestamp: i64) -> String {
    format!(
        "Content-type: {}\r\nContent-Length: {}\r\nX-Timestamp: {}\r\n\r\n",
        content_type, length, timestamp
    )
}

/// Serializer for one server's response stream
#[derive(Debug, Clone)]
pub struct Framing {
    mode: StreamMode,
    boundary: Boundary,
    server_name: Arc<str>,
}

impl Framing {
    pub fn new(mode: StreamMode, boundary: Boundary, server_name: &str) -> Self {
        Self {
            mode,
            boundary,
            server_name: Arc::from(server_name),
        }
    }

    pub fn mode(&self) -> &StreamMode {
        &self.mode
    }

    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    pub fn is_multipart(&self) -> bool {
        self.mode == StreamMode::Multipart
    }

    /// Status line and headers, sent once per client
    pub fn response_header(&self) -> String {
        let mut header = String::with_capacity(320);
        header.push_str(STATUS_LINE);
        let _ = write!(header, "Server: {}\r\n", self.server_name);
        header.push_str("Connection: close\r\n");
        header.push_str("Max-Age: 0\r\n");
        header.push_str("Expires: 0\r\n");
        let _ = write!(header, "Cache-Control: {}\r\n", CACHE_CONTROL);
        header.push_str("Pragma: no-cache\r\n");
        match &self.mode {
            StreamMode::Multipart => {
                let _ = write!(
                    header,
                    "Content-Type: {}; boundary={}\r\n",
                    MULTIPART_CONTENT_TYPE, self.boundary
                );
            }
            StreamMode::Raw(content_type) => {
                let _ = write!(header, "Content-Type: {}\r\n", content_type);
                header.push_str("Access-Control-Allow-Origin: *\r\n");
            }
        }
        header.push_str("\r\n");
        header
    }

    /// Boundary line plus part header; empty in raw mode
    pub fn part_prefix(&self, part: &Part) -> Bytes {
        match self.mode {
            StreamMode::Multipart => {
                let mut prefix = format!("\r\n--{}\r\n", self.boundary);
                prefix.push_str(&part.part_header());
                Bytes::from(prefix)
            }
            StreamMode::Raw(_) => Bytes::new(),
        }
    }

    /// Bytes closing a part
    pub fn part_suffix(&self) -> &'static [u8] {
        match self.mode {
            StreamMode::Multipart => b"\r\n",
            StreamMode::Raw(_) => b"",
        }
    }

    /// Closing delimiter written on a clean stop
    pub fn terminator(&self) -> Option<Bytes> {
        match self.mode {
            StreamMode::Multipart => {
                Some(Bytes::from(format!("\r\n--{}--\r\n\r\n", self.boundary)))
            }
            StreamMode::Raw(_) => None,
        }
    }
}
