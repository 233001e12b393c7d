//! Loopback integration tests
//!
//! Each test starts a server on an ephemeral port and talks to it with plain
//! TCP clients that never send a request, like a minimal MJPEG viewer.
//!
//! Run with: RUST_LOG=mxstream=debug cargo test --test streaming_server

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_test::assert_ok;

/// Unwrap an `Option`, panicking if it is `None`
macro_rules! assert_some {
    ($e:expr) => {
        match $e {
            Some(v) => v,
            None => panic!("assertion failed: expected Some, got None: {}", stringify!($e)),
        }
    };
}

use mxstream::{
    OverflowPolicy, ServerConfig, SessionInfo, SessionPhase, StreamMode, StreamingCallback,
    StreamingServer,
};

const BOUNDARY: &str = "0123456789abcdef0123456789abcdef";
const TIMEOUT: Duration = Duration::from_secs(5);
const LARGE_FRAME: usize = 500 * 1024;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> ServerConfig {
    ServerConfig::with_ip(IpAddr::V4(Ipv4Addr::LOCALHOST)).boundary(BOUNDARY)
}

async fn start(config: ServerConfig, content_type: Option<&str>, aux: bool) -> (StreamingServer, SocketAddr) {
    init_tracing();
    let server = StreamingServer::new(config);
    assert!(assert_ok!(server.start(0, content_type, aux).await));
    let addr = assert_some!(server.local_addr());
    (server, addr)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn count(haystack: &[u8], needle: &[u8]) -> usize {
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

/// Poll `condition` until it holds
async fn wait_for(mut condition: impl FnMut() -> bool) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(TIMEOUT, poll)
        .await
        .expect("condition not reached in time");
}

struct Client {
    stream: TcpStream,
    received: Vec<u8>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            stream,
            received: Vec::new(),
        }
    }

    /// Connect and wait for the response header, so the session is live
    async fn connect_streaming(addr: SocketAddr) -> Self {
        let mut client = Self::connect(addr).await;
        client.read_until(b"\r\n\r\n").await;
        client
    }

    async fn read_until(&mut self, needle: &[u8]) {
        // Only rescan the tail, bodies can grow to megabytes
        let mut searched: usize = 0;
        self.read_while(|received| {
            let from = searched.saturating_sub(needle.len());
            searched = received.len();
            find(&received[from..], needle).is_none()
        })
        .await;
    }

    async fn read_at_least(&mut self, len: usize) {
        self.read_while(|received| received.len() < len).await;
    }

    async fn read_while(&mut self, mut pending: impl FnMut(&[u8]) -> bool) {
        let read = async {
            let mut chunk = [0u8; 4096];
            while pending(&self.received) {
                let n = self.stream.read(&mut chunk).await.unwrap();
                assert!(n > 0, "stream closed early");
                self.received.extend_from_slice(&chunk[..n]);
            }
        };
        tokio::time::timeout(TIMEOUT, read)
            .await
            .expect("timed out waiting for stream data");
    }

    /// Read until the server closes the connection
    async fn read_to_end(&mut self) {
        let read = async {
            let mut chunk = [0u8; 4096];
            loop {
                match self.stream.read(&mut chunk).await {
                    Ok(0) => return,
                    Ok(n) => self.received.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == io::ErrorKind::ConnectionReset => return,
                    Err(e) => panic!("read failed: {}", e),
                }
            }
        };
        tokio::time::timeout(TIMEOUT, read)
            .await
            .expect("server did not close the connection");
    }

    /// Bytes after the response header
    fn body(&self) -> &[u8] {
        let start = find(&self.received, b"\r\n\r\n").expect("no response header") + 4;
        &self.received[start..]
    }
}

/// Push `count` large frames, letting the channel rotate after each one
async fn push_large_frames(server: &StreamingServer, count: i64) {
    let frame = vec![0x5Au8; LARGE_FRAME];
    for timestamp in 1..=count {
        assert_ok!(server.stream_image(&frame, timestamp));
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[derive(Default)]
struct Recorder {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl Recorder {
    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl StreamingCallback for Recorder {
    fn on_start(&self, _session: &SessionInfo) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_stop(&self, _session: &SessionInfo) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Queues the CSV column names whenever a viewer joins
#[derive(Default)]
struct HeaderOnJoin {
    due: AtomicBool,
}

impl StreamingCallback for HeaderOnJoin {
    fn on_start(&self, _session: &SessionInfo) {
        self.due.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_end_to_end_single_frame() {
    let (server, addr) = start(config(), Some("image/jpeg"), false).await;
    let mut client = Client::connect_streaming(addr).await;

    assert!(client.received.starts_with(b"HTTP/1.0 200 OK\r\n"));
    let header = String::from_utf8_lossy(&client.received).into_owned();
    assert!(header.contains(&format!(
        "Content-Type: multipart/x-mixed-replace; boundary={}\r\n",
        BOUNDARY
    )));
    assert!(header.contains("Connection: close\r\n"));
    assert!(header.contains("Pragma: no-cache\r\n"));

    let frame: Vec<u8> = (0..100u8).collect();
    assert_ok!(server.stream_image(&frame, 42));

    client.read_until(b"X-Timestamp: 42\r\n\r\n").await;
    let payload_at = find(&client.received, b"X-Timestamp: 42\r\n\r\n").unwrap() + 19;
    client.read_at_least(payload_at + frame.len() + 2).await;

    let body = client.body();
    assert!(body.starts_with(format!("\r\n--{}\r\n", BOUNDARY).as_bytes()));
    assert!(find(body, b"Content-type: image/jpeg\r\nContent-Length: 100\r\n").is_some());
    assert_eq!(&client.received[payload_at..payload_at + 100], &frame[..]);
    assert_eq!(&client.received[payload_at + 100..payload_at + 102], b"\r\n");

    server.stop().await;
}

#[tokio::test]
async fn test_every_client_gets_the_same_part() {
    let (server, addr) = start(config(), Some("image/jpeg"), false).await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(Client::connect_streaming(addr).await);
    }
    wait_for(|| server.session_count() == 3).await;

    assert_ok!(server.stream_image(b"shared-frame", 7));
    for client in &mut clients {
        client.read_until(b"shared-frame\r\n").await;
    }

    let first = clients[0].body().to_vec();
    assert!(find(&first, b"X-Timestamp: 7\r\n").is_some());
    for client in &clients[1..] {
        assert_eq!(client.body(), &first[..]);
    }

    server.stop().await;
}

#[tokio::test]
async fn test_aux_appends_accumulate_into_one_part() {
    let (server, addr) = start(config(), None, true).await;
    let mut client = Client::connect_streaming(addr).await;

    // No await in between: the channel worker cannot rotate yet
    assert_ok!(server.stream_aux_data(b"a,b\n", 1));
    assert_ok!(server.stream_aux_data(b"c,d\n", 2));

    client.read_until(b"a,b\nc,d\n\r\n").await;
    let body = client.body();
    assert!(find(
        body,
        b"Content-type: text/csv\r\nContent-Length: 8\r\nX-Timestamp: 2\r\n\r\na,b\nc,d\n"
    )
    .is_some());
    assert_eq!(count(body, b"Content-type:"), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_aux_header_prefixes_next_part_only() {
    let (server, addr) = start(config(), None, true).await;
    let mut client = Client::connect_streaming(addr).await;

    assert_ok!(server.set_aux_header("X,Y\n"));
    assert_ok!(server.stream_aux_data(b"1,2\n", 1));
    client.read_until(b"X,Y\n1,2\n").await;

    assert_ok!(server.stream_aux_data(b"3,4\n", 2));
    client.read_until(b"\r\n\r\n3,4\n").await;

    let body = client.body();
    assert_eq!(count(body, b"X,Y\n"), 1);
    assert!(find(body, b"Content-Length: 8\r\nX-Timestamp: 1\r\n\r\nX,Y\n1,2\n").is_some());
    assert!(find(body, b"Content-Length: 4\r\nX-Timestamp: 2\r\n\r\n3,4\n").is_some());

    server.stop().await;
}

#[tokio::test]
async fn test_header_queued_on_join_reaches_late_viewer() {
    let (server, addr) = start(config(), None, true).await;
    let joins = Arc::new(HeaderOnJoin::default());
    server.set_callback(joins.clone());

    // Nobody is watching this row
    assert_ok!(server.stream_aux_data(b"1,10\n", 1));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut viewer = Client::connect_streaming(addr).await;
    wait_for(|| joins.due.load(Ordering::SeqCst)).await;
    assert!(joins.due.swap(false, Ordering::SeqCst));
    assert_ok!(server.set_aux_header("t,v\n"));
    assert_ok!(server.stream_aux_data(b"2,20\n", 2));

    viewer.read_until(b"t,v\n2,20\n").await;
    let body = viewer.body();
    assert!(find(body, b"Content-Length: 9\r\nX-Timestamp: 2\r\n\r\nt,v\n2,20\n").is_some());
    assert!(find(body, b"1,10\n").is_none());

    server.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent_and_closes_clients() {
    let (server, addr) = start(config(), Some("image/jpeg"), true).await;
    let mut first = Client::connect_streaming(addr).await;
    let mut second = Client::connect_streaming(addr).await;

    server.stop().await;
    server.stop().await;
    assert!(!server.is_running());
    assert_eq!(server.session_count(), 0);

    let terminator = format!("\r\n--{}--\r\n\r\n", BOUNDARY);
    for client in [&mut first, &mut second] {
        client.read_to_end().await;
        assert!(client.received.ends_with(terminator.as_bytes()));
    }

    // Listener is gone
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_callbacks_fire_once_per_session() {
    let (server, addr) = start(config(), Some("image/jpeg"), false).await;
    let recorder = Arc::new(Recorder::default());
    server.set_callback(recorder.clone());

    for cycle in 1..=3 {
        let client = Client::connect_streaming(addr).await;
        assert_eq!(recorder.starts(), cycle);
        drop(client);

        // The session only notices the disconnect when it writes
        let mut timestamp = 0;
        wait_for(|| {
            timestamp += 1;
            let _ = server.stream_image(b"frame", timestamp);
            recorder.stops() == cycle
        })
        .await;
        wait_for(|| server.session_count() == 0).await;
    }

    assert_eq!(recorder.starts(), 3);
    assert_eq!(recorder.stops(), 3);
    server.stop().await;
}

#[tokio::test]
async fn test_stop_notifies_started_sessions() {
    let (server, addr) = start(config(), Some("image/jpeg"), false).await;
    let recorder = Arc::new(Recorder::default());
    server.set_callback(recorder.clone());

    let _first = Client::connect_streaming(addr).await;
    let _second = Client::connect_streaming(addr).await;
    server.stop().await;

    assert_eq!(recorder.starts(), 2);
    assert_eq!(recorder.stops(), 2);
}

#[tokio::test]
async fn test_reset_aborts_sessions_but_keeps_listening() {
    let (server, addr) = start(config(), Some("image/jpeg"), false).await;
    let recorder = Arc::new(Recorder::default());
    server.set_callback(recorder.clone());

    let mut first = Client::connect_streaming(addr).await;
    let mut second = Client::connect_streaming(addr).await;
    wait_for(|| server.session_count() == 2).await;

    assert_eq!(server.reset(), 2);
    for client in [&mut first, &mut second] {
        client.read_to_end().await;
        assert!(find(client.body(), b"--\r\n\r\n").is_none());
    }
    wait_for(|| recorder.stops() == 2).await;
    assert!(server.is_running());

    let mut third = Client::connect_streaming(addr).await;
    assert_ok!(server.stream_image(b"after-reset", 1));
    third.read_until(b"after-reset").await;

    server.stop().await;
}

#[tokio::test]
async fn test_end_closes_one_session() {
    let (server, addr) = start(config(), Some("image/jpeg"), false).await;
    let mut first = Client::connect_streaming(addr).await;
    let mut second = Client::connect_streaming(addr).await;
    wait_for(|| server.session_count() == 2).await;

    let sessions = server.sessions();
    assert_eq!(sessions.len(), 2);
    assert!(sessions[0].id < sessions[1].id);

    assert!(server.end(sessions[0].id));
    assert!(!server.end(sessions[0].id));
    first.read_to_end().await;
    assert!(first.received.ends_with(format!("\r\n--{}--\r\n\r\n", BOUNDARY).as_bytes()));

    assert_ok!(server.stream_image(b"still-here", 1));
    second.read_until(b"still-here").await;
    assert_eq!(server.session_count(), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_reject_policy_closes_extra_clients() {
    let config = config().max_sessions(1).overflow(OverflowPolicy::Reject);
    let (server, addr) = start(config, Some("image/jpeg"), false).await;

    let _first = Client::connect_streaming(addr).await;
    let mut second = Client::connect(addr).await;
    second.read_to_end().await;
    assert!(second.received.is_empty());

    let stats = server.stats();
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.rejected_connections, 1);
    assert_eq!(stats.active_sessions, 1);

    server.stop().await;
}

#[tokio::test]
async fn test_queue_policy_holds_extra_clients() {
    let config = config().max_sessions(1);
    let (server, addr) = start(config, Some("image/jpeg"), false).await;

    let mut first = Client::connect_streaming(addr).await;
    let mut second = Client::connect(addr).await;

    // Connected at the TCP level but not served while the slot is taken
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.session_count(), 1);

    assert_ok!(server.stream_image(b"only-first", 1));
    first.read_until(b"only-first").await;

    let id = server.sessions()[0].id;
    server.end(id);
    first.read_to_end().await;

    second.read_until(b"\r\n\r\n").await;
    assert!(second.received.starts_with(b"HTTP/1.0 200 OK\r\n"));
    assert_eq!(server.stats().rejected_connections, 0);

    server.stop().await;
}

#[tokio::test]
async fn test_raw_mode_streams_bare_payloads() {
    let config = config().mode(StreamMode::Raw("text/csv".into()));
    let (server, addr) = start(config, None, true).await;
    let mut client = Client::connect_streaming(addr).await;

    let header = String::from_utf8_lossy(&client.received).into_owned();
    assert!(header.contains("Content-Type: text/csv\r\n"));
    assert!(header.contains("Access-Control-Allow-Origin: *\r\n"));

    assert_ok!(server.set_aux_header("t,v\n"));
    assert_ok!(server.stream_aux_data(b"1,10\n", 1));
    client.read_until(b"1,10\n").await;
    assert_ok!(server.stream_aux_data(b"2,20\n", 2));
    client.read_until(b"2,20\n").await;

    server.stop().await;
    client.read_to_end().await;
    assert_eq!(client.body(), b"t,v\n1,10\n2,20\n");
}

#[tokio::test]
async fn test_stats_track_connections_and_parts() {
    let (server, addr) = start(config(), Some("image/jpeg"), false).await;
    let mut client = Client::connect_streaming(addr).await;

    assert_ok!(server.stream_image(b"one", 1));
    client.read_until(b"one\r\n").await;
    assert_ok!(server.stream_image(b"two", 2));
    client.read_until(b"two\r\n").await;

    let stats = server.stats();
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.active_sessions, 1);
    assert_eq!(stats.parts_broadcast, 2);

    server.stop().await;
    assert_eq!(server.stats().active_sessions, 0);
}

#[tokio::test]
async fn test_restart_while_previous_run_drains() {
    let config = config()
        .write_timeout(None)
        .shutdown_timeout(Duration::from_millis(300));
    let (server, addr) = start(config, Some("image/jpeg"), false).await;

    // Never reads past the header, so its session blocks in a write
    let _stalled = Client::connect_streaming(addr).await;
    push_large_frames(&server, 60).await;

    let stopping = {
        let server = server.clone();
        tokio::spawn(async move { server.stop().await })
    };
    wait_for(|| !server.is_running()).await;

    assert!(assert_ok!(server.start(0, Some("image/jpeg"), false).await));
    let addr = assert_some!(server.local_addr());
    let mut fresh = Client::connect_streaming(addr).await;
    wait_for(|| server.session_count() == 1).await;

    tokio::time::timeout(TIMEOUT, stopping)
        .await
        .expect("old stop did not return")
        .unwrap();

    // The drain of the old run left the new one alone
    assert!(server.is_running());
    assert_eq!(server.session_count(), 1);
    assert_ok!(server.stream_image(b"after-restart", 1));
    fresh.read_until(b"after-restart\r\n").await;

    server.stop().await;
}

#[tokio::test]
async fn test_session_stats_reachable_from_server() {
    let (server, addr) = start(config(), Some("image/jpeg"), false).await;
    let mut client = Client::connect_streaming(addr).await;
    wait_for(|| server.session_count() == 1).await;
    let id = server.sessions()[0].id;

    // The client reads nothing while the frames are pushed
    push_large_frames(&server, 60).await;

    client.read_until(b"X-Timestamp: 60\r\n\r\n").await;
    let payload_at = find(&client.received, b"X-Timestamp: 60\r\n\r\n").unwrap() + 19;
    client.read_at_least(payload_at + LARGE_FRAME + 2).await;

    let stats = assert_some!(server.session_stats(id));
    assert_eq!(stats.phase, SessionPhase::Streaming);
    assert_eq!(stats.parts_sent, count(&client.received, b"X-Timestamp:") as u64);
    assert!(stats.parts_sent >= 2);
    assert!(stats.parts_dropped > 0);
    assert!(stats.parts_sent + stats.parts_dropped <= 60);
    assert!(stats.bytes_sent >= stats.parts_sent * LARGE_FRAME as u64);

    server.stop().await;
    assert!(server.session_stats(id).is_none());
}
