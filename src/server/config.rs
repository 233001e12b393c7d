//! Server configuration

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::protocol::constants::*;
use crate::protocol::StreamMode;
use crate::session::SessionOptions;

/// What to do with a connection when every session slot is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Leave it in the listen backlog until a slot frees up
    #[default]
    Queue,
    /// Accept and close it immediately
    Reject,
}

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (the port is given to `start`)
    pub bind_ip: IpAddr,

    /// Multipart or raw single-channel output
    pub mode: StreamMode,

    /// Maximum concurrent sessions
    pub max_sessions: usize,

    /// Handling of connections beyond `max_sessions`
    pub overflow: OverflowPolicy,

    /// Buffers per channel ring
    pub ring_size: usize,

    /// Capacity of each buffer in bytes
    pub buffer_capacity: usize,

    /// Unflushed bytes after which a session flushes its socket
    pub flush_threshold: usize,

    /// Per-write limit before a stalled client is dropped (None = no limit)
    pub write_timeout: Option<Duration>,

    /// Pause after a failed accept
    pub accept_backoff: Duration,

    /// How long `stop` waits for sessions to finish before aborting them
    pub shutdown_timeout: Duration,

    /// Content type of the auxiliary channel
    pub aux_content_type: String,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Value of the `Server` response header
    pub server_name: String,

    /// Fixed multipart boundary (None = process-wide random boundary)
    pub boundary: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            mode: StreamMode::Multipart,
            max_sessions: DEFAULT_MAX_SESSIONS,
            overflow: OverflowPolicy::Queue,
            ring_size: DEFAULT_RING_SIZE,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            write_timeout: Some(Duration::from_secs(10)),
            accept_backoff: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(2),
            aux_content_type: DEFAULT_AUX_CONTENT_TYPE.to_string(),
            tcp_nodelay: true, // Parts are latency sensitive
            server_name: DEFAULT_SERVER_NAME.to_string(),
            boundary: None,
        }
    }
}

impl ServerConfig {
    /// Create a new config bound to the given interface
    pub fn with_ip(ip: IpAddr) -> Self {
        Self {
            bind_ip: ip,
            ..Default::default()
        }
    }

    /// Set the bind interface
    pub fn bind(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    /// Set the output mode
    pub fn mode(mut self, mode: StreamMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set maximum concurrent sessions (at least one)
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max.max(1);
        self
    }

    /// Set the overflow policy
    pub fn overflow(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }

    /// Set buffers per channel
    pub fn ring_size(mut self, slots: usize) -> Self {
        self.ring_size = slots.max(MIN_RING_SIZE);
        self
    }

    /// Set capacity of each buffer
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Set the flush threshold
    pub fn flush_threshold(mut self, bytes: usize) -> Self {
        self.flush_threshold = bytes;
        self
    }

    /// Set the per-write timeout
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the accept error backoff
    pub fn accept_backoff(mut self, backoff: Duration) -> Self {
        self.accept_backoff = backoff;
        self
    }

    /// Set the graceful shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the auxiliary channel content type
    pub fn aux_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.aux_content_type = content_type.into();
        self
    }

    /// Set the `Server` header value
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Use a fixed multipart boundary
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    pub(crate) fn session_options(&self) -> SessionOptions {
        SessionOptions {
            flush_threshold: self.flush_threshold,
            write_timeout: self.write_timeout,
        }
    }
}
