//! Protocol and sizing constants

/// Status line sent to every client
pub const STATUS_LINE: &str = "HTTP/1.0 200 OK\r\n";

/// Cache-busting header value
pub const CACHE_CONTROL: &str =
    "no-store, no-cache, must-revalidate, pre-check=0, post-check=0, max-age=0";

/// Multipart content type, followed by `; boundary=...`
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace";

/// Default value of the `Server` response header
pub const DEFAULT_SERVER_NAME: &str = "mxstream";

/// Content type of the auxiliary (sensor) channel
pub const DEFAULT_AUX_CONTENT_TYPE: &str = "text/csv";

/// Random bytes behind a generated boundary (hex encoded to twice the length)
pub const BOUNDARY_RANDOM_BYTES: usize = 16;

/// Ring slots per channel
pub const DEFAULT_RING_SIZE: usize = 4;

/// Smallest usable ring: one slot written while another is broadcast
pub const MIN_RING_SIZE: usize = 2;

/// Capacity of each ring slot
pub const DEFAULT_BUFFER_CAPACITY: usize = 512 * 1024;

/// Unflushed bytes beyond which a session flushes its socket
pub const DEFAULT_FLUSH_THRESHOLD: usize = 32 * 1024;

/// Concurrent streaming clients
pub const DEFAULT_MAX_SESSIONS: usize = 4;
