//! Per-client write loop
//!
//! A session never reads from its socket. It writes the response header,
//! then waits on its pending slots and serializes whatever parts are newest
//! when it wakes up. Anything that happens to the socket stays local to the
//! session: errors end this session only.

use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::watch;

use super::context::SessionInfo;
use super::state::SessionState;
use crate::buffer::Part;
use crate::channel::ChannelKind;
use crate::error::{Error, Result};
use crate::protocol::constants::DEFAULT_FLUSH_THRESHOLD;
use crate::protocol::Framing;
use crate::registry::{Delivery, SessionRegistry, Subscription};
use crate::server::callback::CallbackSlot;
use crate::stats::SessionStats;
use crate::sync::lock;

/// Write behaviour of a session
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Unflushed bytes beyond which the socket is flushed
    pub flush_threshold: usize,

    /// Limit for every socket write (None = wait forever)
    pub write_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            write_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Runs on every session exit, including task cancellation
struct ExitGuard {
    info: SessionInfo,
    registry: Arc<SessionRegistry>,
    callbacks: Arc<CallbackSlot>,
    started: bool,
}

impl ExitGuard {
    fn start(&mut self) {
        if !self.started {
            self.started = true;
            self.callbacks.notify_start(&self.info);
        }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.registry.end(self.info.id);
        if self.started {
            self.callbacks.notify_stop(&self.info);
        }
    }
}

/// One connected client and its serialization state
pub struct Session<W> {
    info: SessionInfo,
    state: SessionState,
    writer: BufWriter<W>,
    pending: watch::Receiver<Delivery>,
    framing: Arc<Framing>,
    options: SessionOptions,
    /// Shared with the registry entry
    stats: Arc<Mutex<SessionStats>>,
    /// Bytes written since the last flush
    unflushed: usize,
    /// Last sequence written, per channel
    last_sequence: [Option<u64>; 2],
    guard: ExitGuard,
}

impl<W> Session<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(
        info: SessionInfo,
        writer: W,
        subscription: Subscription,
        framing: Arc<Framing>,
        options: SessionOptions,
        registry: Arc<SessionRegistry>,
        callbacks: Arc<CallbackSlot>,
    ) -> Self {
        let guard = ExitGuard {
            info: info.clone(),
            registry,
            callbacks,
            started: false,
        };

        Self {
            info,
            state: SessionState::new(),
            writer: BufWriter::with_capacity(options.flush_threshold.max(1024), writer),
            pending: subscription.pending,
            framing,
            options,
            stats: subscription.stats,
            unflushed: 0,
            last_sequence: [None; 2],
            guard,
        }
    }

    /// Stream until closed, reset, or the socket fails
    pub async fn run(mut self) -> Result<SessionStats> {
        let result = self.stream().await;

        self.state.close();
        let stats = {
            let mut stats = lock(&self.stats);
            stats.phase = self.state.phase;
            stats.duration = self.info.age();
            stats.calculate_bitrate();
            stats.clone()
        };

        match &result {
            Ok(()) => tracing::debug!(
                session_id = %self.info.id,
                bytes_sent = stats.bytes_sent,
                parts_sent = stats.parts_sent,
                parts_dropped = stats.parts_dropped,
                "Session finished"
            ),
            Err(Error::WriteTimeout(limit)) => tracing::warn!(
                session_id = %self.info.id,
                peer = %self.info.peer_addr,
                timeout = ?limit,
                "Client stalled, closing session"
            ),
            Err(e) => tracing::debug!(
                session_id = %self.info.id,
                error = %e,
                "Session ended by socket error"
            ),
        }

        result.map(|()| stats)
    }

    async fn stream(&mut self) -> Result<()> {
        self.handshake().await?;

        loop {
            if self.pending.changed().await.is_err() {
                // Slots dropped by the registry: same as a close request
                return self.finish().await;
            }

            let delivery = self.pending.borrow_and_update().clone();
            if delivery.is_close() {
                return self.finish().await;
            }

            let mut wrote = false;
            for kind in ChannelKind::ALL {
                match delivery.part(kind) {
                    Some(part) if !self.is_written(part) => {
                        self.write_part(part).await?;
                        wrote = true;
                    }
                    _ => {}
                }
            }

            let newer_waiting = self.pending.has_changed().unwrap_or(false);
            if wrote && (self.unflushed > self.options.flush_threshold || !newer_waiting) {
                self.flush().await?;
            }
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let header = self.framing.response_header();
        let writer = &mut self.writer;
        with_timeout(self.options.write_timeout, async {
            writer.write_all(header.as_bytes()).await?;
            writer.flush().await
        })
        .await?;

        self.state.handshake_sent();
        {
            let mut stats = lock(&self.stats);
            stats.bytes_sent += header.len() as u64;
            stats.flushes += 1;
            stats.phase = self.state.phase;
        }
        tracing::debug!(
            session_id = %self.info.id,
            peer = %self.info.peer_addr,
            "Response header sent"
        );

        self.guard.start();
        self.state.start_streaming();
        lock(&self.stats).phase = self.state.phase;
        Ok(())
    }

    async fn write_part(&mut self, part: &Part) -> Result<()> {
        let prefix = self.framing.part_prefix(part);
        let suffix = self.framing.part_suffix();
        let writer = &mut self.writer;
        with_timeout(self.options.write_timeout, async {
            writer.write_all(&prefix).await?;
            if let Some(header) = &part.header {
                writer.write_all(header).await?;
            }
            writer.write_all(&part.data).await?;
            writer.write_all(suffix).await
        })
        .await?;

        let written = prefix.len() + part.len() + suffix.len();
        let dropped = self.track_sequence(part.kind, part.sequence);
        self.unflushed += written;
        lock(&self.stats).record_part(written, dropped);

        tracing::trace!(
            session_id = %self.info.id,
            channel = %part.kind,
            sequence = part.sequence,
            size = part.len(),
            dropped,
            "Part written"
        );
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        with_timeout(self.options.write_timeout, self.writer.flush()).await?;
        self.unflushed = 0;
        lock(&self.stats).flushes += 1;
        Ok(())
    }

    /// Clean stop: terminator and shutdown, best-effort
    async fn finish(&mut self) -> Result<()> {
        let limit = self.options.write_timeout;

        if let Some(terminator) = self.framing.terminator() {
            let writer = &mut self.writer;
            let written = with_timeout(limit, async {
                writer.write_all(&terminator).await?;
                writer.flush().await
            })
            .await;

            match written {
                Ok(()) => lock(&self.stats).bytes_sent += terminator.len() as u64,
                Err(e) => tracing::debug!(
                    session_id = %self.info.id,
                    error = %e,
                    "Failed to write stream terminator"
                ),
            }
        }

        let _ = with_timeout(limit, self.writer.shutdown()).await;
        Ok(())
    }

    /// Whether `part` or a newer part of its channel was already written
    fn is_written(&self, part: &Part) -> bool {
        matches!(self.last_sequence[part.kind.index()], Some(last) if part.sequence <= last)
    }

    /// Remember the sequence of a written part, returning how many parts of
    /// the same channel were skipped since the previous one
    fn track_sequence(&mut self, kind: ChannelKind, sequence: u64) -> u64 {
        let last = &mut self.last_sequence[kind.index()];
        let dropped = match *last {
            Some(previous) if sequence > previous => sequence - previous - 1,
            _ => 0,
        };
        *last = Some(sequence);
        dropped
    }
}

async fn with_timeout<F, T>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::WriteTimeout(limit)),
        },
        None => Ok(fut.await?),
    }
}
