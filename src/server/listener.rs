//! Streaming server
//!
//! Owns the listener, the producer channels and the session registry of the
//! current run. Handles the TCP accept loop and spawns one session task per
//! client.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::channel::{Channel, ChannelKind};
use crate::error::{Error, Result};
use crate::protocol::{Boundary, Framing};
use crate::registry::SessionRegistry;
use crate::server::callback::{CallbackSlot, StreamingCallback};
use crate::server::config::{OverflowPolicy, ServerConfig};
use crate::session::{Session, SessionId, SessionInfo};
use crate::stats::{ServerCounters, ServerStats, SessionStats};
use crate::sync::lock;

/// HTTP multipart streaming server
///
/// A cheap handle: clones share the same listener, channels and sessions.
/// Dropping the last handle of a running server shuts it down without the
/// graceful drain of [`StreamingServer::stop`].
#[derive(Clone)]
pub struct StreamingServer {
    shared: Arc<Shared>,
    running: Arc<Mutex<Option<Running>>>,
}

/// State used by the accept loop and every session
struct Shared {
    config: ServerConfig,
    framing: Arc<Framing>,
    callbacks: Arc<CallbackSlot>,
    /// Held by `start` from the running check until the run is installed
    lifecycle: AsyncMutex<()>,
    next_session_id: AtomicU64,
    counters: ServerCounters,
}

/// Resources that exist only between `start` and `stop`
///
/// Each run has its own registry, so a `stop` still draining the sessions of
/// one run never touches the sessions of the next.
struct Running {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
    image: Option<Channel>,
    aux: Option<Channel>,
    registry: Arc<SessionRegistry>,
    started_at: Instant,
}

impl Running {
    fn channel(&self, kind: ChannelKind) -> Option<&Channel> {
        match kind {
            ChannelKind::Image => self.image.as_ref(),
            ChannelKind::Aux => self.aux.as_ref(),
        }
    }

    fn terminate_channels(&self) {
        for channel in self.image.iter().chain(self.aux.iter()) {
            channel.terminate();
        }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.registry.close_all();
    }
}

impl StreamingServer {
    /// Create a stopped server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        let boundary = match &config.boundary {
            Some(boundary) => Boundary::new(boundary.clone()),
            None => Boundary::process(),
        };
        let framing = Framing::new(config.mode.clone(), boundary, &config.server_name);

        Self {
            shared: Arc::new(Shared {
                config,
                framing: Arc::new(framing),
                callbacks: Arc::new(CallbackSlot::default()),
                lifecycle: AsyncMutex::new(()),
                next_session_id: AtomicU64::new(1),
                counters: ServerCounters::default(),
            }),
            running: Arc::new(Mutex::new(None)),
        }
    }

    /// Bind `port` and start accepting clients
    ///
    /// The image channel is created when `content_type` is given, the
    /// auxiliary channel when `stream_aux` is set. Returns `Ok(false)`
    /// without side effects if the server is already running or another
    /// `start` got there first. Port 0 binds
    /// an ephemeral port, see [`StreamingServer::local_addr`].
    pub async fn start(
        &self,
        port: u16,
        content_type: Option<&str>,
        stream_aux: bool,
    ) -> Result<bool> {
        let _lifecycle = self.shared.lifecycle.lock().await;
        if self.is_running() {
            return Ok(false);
        }

        let config = &self.shared.config;
        let addr = SocketAddr::new(config.bind_ip, port);
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(addr = %addr, error = %e, "Failed to bind streaming server");
                return Err(e.into());
            }
        };
        let local_addr = listener.local_addr()?;

        let registry = Arc::new(SessionRegistry::new());
        let spawn_channel = |kind, content_type: &str| {
            Channel::spawn(
                kind,
                content_type,
                config.ring_size,
                config.buffer_capacity,
                Arc::clone(&registry),
            )
        };
        let image = content_type.map(|ct| spawn_channel(ChannelKind::Image, ct));
        let aux = stream_aux.then(|| spawn_channel(ChannelKind::Aux, &config.aux_content_type));

        let accept_task = tokio::spawn(accept_loop(
            Arc::clone(&self.shared),
            Arc::clone(&registry),
            listener,
        ));

        *lock(&self.running) = Some(Running {
            local_addr,
            accept_task,
            image,
            aux,
            registry,
            started_at: Instant::now(),
        });

        tracing::info!(
            addr = %local_addr,
            image = content_type.unwrap_or("-"),
            aux = stream_aux,
            max_sessions = config.max_sessions,
            "Streaming server listening"
        );
        Ok(true)
    }

    /// Stop accepting, close every session and release the port
    ///
    /// Sessions get `shutdown_timeout` to write their terminator before
    /// they are aborted. Calling this on a stopped server does nothing.
    pub async fn stop(&self) {
        let running = lock(&self.running).take();
        let Some(mut running) = running else {
            tracing::debug!("Stop requested but server is not running");
            return;
        };

        running.accept_task.abort();
        // Wait for the task so the listener is closed on return
        let _ = (&mut running.accept_task).await;
        running.terminate_channels();

        let registry = Arc::clone(&running.registry);
        let closing = registry.close_all();
        let drained = tokio::time::timeout(
            self.shared.config.shutdown_timeout,
            registry.wait_drained(),
        )
        .await;
        if drained.is_err() {
            let aborted = registry.abort_all();
            tracing::warn!(aborted, "Sessions did not finish in time, aborted");
        }
        self.shared.counters.run_stopped(registry.parts_broadcast());

        tracing::info!(
            addr = %running.local_addr,
            sessions = closing,
            "Streaming server stopped"
        );
    }

    /// Abort every session, leaving the listener and channels running
    ///
    /// Returns the number of sessions aborted.
    pub fn reset(&self) -> usize {
        let Some(registry) = self.registry() else {
            return 0;
        };
        let aborted = registry.abort_all();
        tracing::info!(sessions = aborted, "Sessions reset");
        aborted
    }

    /// Close one session; a stale ID is a no-op
    pub fn end(&self, id: SessionId) -> bool {
        self.registry().is_some_and(|registry| registry.end(id))
    }

    /// Publish an image frame (replaces whatever was not yet broadcast)
    pub fn stream_image(&self, data: &[u8], timestamp: i64) -> Result<()> {
        self.with_channel(ChannelKind::Image, |channel| channel.write(data, timestamp))
    }

    /// Append auxiliary data to the part being accumulated
    pub fn stream_aux_data(&self, data: &[u8], timestamp: i64) -> Result<()> {
        self.with_channel(ChannelKind::Aux, |channel| channel.append(data, timestamp))
    }

    /// Prefix the next auxiliary part with `text` (CSV column names)
    pub fn set_aux_header(&self, text: impl Into<String>) -> Result<()> {
        self.with_channel(ChannelKind::Aux, |channel| {
            channel.set_header(text);
            Ok(())
        })
    }

    fn with_channel<T>(
        &self,
        kind: ChannelKind,
        f: impl FnOnce(&Channel) -> Result<T>,
    ) -> Result<T> {
        let running = lock(&self.running);
        let running = running.as_ref().ok_or(Error::NotRunning)?;
        let channel = running
            .channel(kind)
            .ok_or(Error::ChannelInactive(kind))?;
        f(channel)
    }

    /// Install the start/stop callback, replacing any previous one
    pub fn set_callback(&self, callback: Arc<dyn StreamingCallback>) {
        self.shared.callbacks.set(Some(callback));
    }

    pub fn clear_callback(&self) {
        self.shared.callbacks.set(None);
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.running).as_ref().map(|running| running.local_addr)
    }

    pub fn session_count(&self) -> usize {
        self.registry().map_or(0, |registry| registry.len())
    }

    /// Live sessions of the current run, ordered by ID
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.registry()
            .map(|registry| registry.sessions())
            .unwrap_or_default()
    }

    /// Live counters of one session
    pub fn session_stats(&self, id: SessionId) -> Option<SessionStats> {
        self.registry()?.session_stats(id)
    }

    pub fn stats(&self) -> ServerStats {
        let running = lock(&self.running);
        let (active, parts, uptime) = match running.as_ref() {
            Some(running) => (
                running.registry.len(),
                running.registry.parts_broadcast(),
                running.started_at.elapsed(),
            ),
            None => (0, 0, Duration::ZERO),
        };
        self.shared.counters.snapshot(active, parts, uptime)
    }

    /// Registry of the current run
    fn registry(&self) -> Option<Arc<SessionRegistry>> {
        lock(&self.running)
            .as_ref()
            .map(|running| Arc::clone(&running.registry))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }
}

impl Default for StreamingServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

async fn accept_loop(shared: Arc<Shared>, registry: Arc<SessionRegistry>, listener: TcpListener) {
    let permits = Arc::new(Semaphore::new(shared.config.max_sessions));

    loop {
        // Queue: hold off accepting until a slot is free
        let reserved = match shared.config.overflow {
            OverflowPolicy::Queue => match Arc::clone(&permits).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => return,
            },
            OverflowPolicy::Reject => None,
        };

        let (socket, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept connection");
                tokio::time::sleep(shared.config.accept_backoff).await;
                continue;
            }
        };

        let permit = match reserved {
            Some(permit) => permit,
            None => match Arc::clone(&permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    shared.counters.connection_rejected();
                    tracing::warn!(peer = %peer_addr, "Connection rejected: session limit reached");
                    continue;
                }
            },
        };

        shared.spawn_session(&registry, socket, peer_addr, permit);
    }
}

impl Shared {
    fn spawn_session(
        &self,
        registry: &Arc<SessionRegistry>,
        socket: TcpStream,
        peer_addr: SocketAddr,
        permit: OwnedSemaphorePermit,
    ) {
        let id = SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed));
        self.counters.connection_accepted();

        tracing::debug!(session_id = %id, peer = %peer_addr, "New connection");

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::warn!(session_id = %id, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let info = SessionInfo::new(id, peer_addr);
        let subscription = registry.register(info.clone());
        let session = Session::new(
            info,
            socket,
            subscription,
            Arc::clone(&self.framing),
            self.config.session_options(),
            Arc::clone(registry),
            Arc::clone(&self.callbacks),
        );

        let task = tokio::spawn(async move {
            let _permit = permit;
            // Outcome is logged by the session, counters stay readable
            // through the registry while it runs
            let _ = session.run().await;
        });

        if !registry.attach_task(id, task.abort_handle()) {
            task.abort();
        }
    }
}
