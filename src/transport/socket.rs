//! TCP socket to the engine.
//!
//! A [`TransportSocket`] connects to `host:port` in the background and moves
//! through `Connecting → Open → Closed`. Once open, a reader task splits the
//! inbound byte stream into frames and hands each one to an
//! [`InboundHandler`], and a writer task owns the write half.
//!
//! # Example
//!
//! ```ignore
//! use mutation_server_client::transport::TransportSocket;
//!
//! let socket = TransportSocket::new("localhost", port, ConnectionConfig::default());
//! socket.start(handler);
//! socket.once_open().await?;
//! socket.send(frame).await?;
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use super::{BoxFuture, MessageSocket};
use crate::config::ConnectionConfig;
use crate::error::{MutationServerError, Result};
use crate::protocol::LineBuffer;
use crate::sync::lock;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle};

/// Size of the read buffer.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Connect in progress.
    Connecting,
    /// Frames can be sent.
    Open,
    /// Terminal.
    Closed,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The TCP connect failed.
    ConnectFailed(String),
    /// The engine closed the connection.
    Eof,
    /// Read or write error, or a protocol violation.
    Error(String),
    /// Closed locally.
    Closed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ConnectFailed(e) => write!(f, "connect failed: {}", e),
            CloseReason::Eof => f.write_str("closed by mutation server"),
            CloseReason::Error(e) => write!(f, "connection error: {}", e),
            CloseReason::Closed => f.write_str("closed"),
        }
    }
}

/// Receiver of inbound frames and the close event.
///
/// Called from the reader task, one frame at a time, in arrival order.
pub trait InboundHandler: Send + Sync + 'static {
    /// One complete frame (without the terminator).
    fn on_frame(&self, frame: &[u8]);

    /// The connection ended. Called at most once, and never for a local
    /// [`TransportSocket::close`].
    fn on_closed(&self, reason: &CloseReason);
}

struct Shared {
    state: watch::Sender<SocketState>,
    writer: OnceLock<WriterHandle>,
    close_reason: Mutex<Option<CloseReason>>,
}

impl Shared {
    fn mark_closed(&self, reason: CloseReason) {
        let mut slot = lock(&self.close_reason);
        if slot.is_none() {
            *slot = Some(reason);
        }
        drop(slot);
        self.state.send_replace(SocketState::Closed);
    }

    fn closed_error(&self) -> MutationServerError {
        let reason = lock(&self.close_reason)
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| CloseReason::Closed.to_string());
        MutationServerError::ConnectionClosed(reason)
    }
}

/// Cloneable handle for sending on a socket.
///
/// Holds no task handles, so it can be captured by the RPC client's send
/// function without keeping the connection's tasks alive.
#[derive(Clone)]
pub struct SocketHandle {
    shared: Arc<Shared>,
}

impl SocketHandle {
    /// Current state.
    pub fn state(&self) -> SocketState {
        *self.shared.state.borrow()
    }

    /// Wait until the socket is open.
    ///
    /// Returns immediately, without registering a listener, if the socket is
    /// already open.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the socket closes before opening.
    pub async fn once_open(&self) -> Result<()> {
        match self.state() {
            SocketState::Open => return Ok(()),
            SocketState::Closed => return Err(self.shared.closed_error()),
            SocketState::Connecting => {}
        }

        let mut rx = self.shared.state.subscribe();
        let reached = rx
            .wait_for(|state| *state != SocketState::Connecting)
            .await
            .map(|state| *state);

        match reached {
            Ok(SocketState::Open) => Ok(()),
            _ => Err(self.shared.closed_error()),
        }
    }

    /// Send one frame.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` while connecting and `ConnectionClosed` once closed.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        match self.state() {
            SocketState::Connecting => Err(MutationServerError::NotOpen),
            SocketState::Closed => Err(self.shared.closed_error()),
            SocketState::Open => {
                let writer = self.shared.writer.get().ok_or(MutationServerError::NotOpen)?;
                writer.send(OutboundFrame::new(frame)).await
            }
        }
    }

    /// Number of tasks currently waiting in [`SocketHandle::once_open`].
    pub fn open_waiters(&self) -> usize {
        self.shared.state.receiver_count()
    }
}

impl MessageSocket for SocketHandle {
    fn once_open(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(SocketHandle::once_open(self))
    }

    fn send(&self, frame: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(SocketHandle::send(self, frame))
    }
}

/// A connection to the engine and the tasks that serve it.
///
/// Dropping the socket closes it.
pub struct TransportSocket {
    handle: SocketHandle,
    host: String,
    port: u16,
    config: ConnectionConfig,
    tasks: Arc<Mutex<Vec<AbortHandle>>>,
}

impl TransportSocket {
    /// Create a socket for `host:port` in the `Connecting` state.
    ///
    /// Nothing happens on the network until [`TransportSocket::start`].
    pub fn new(host: impl Into<String>, port: u16, config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(SocketState::Connecting);
        Self {
            handle: SocketHandle {
                shared: Arc::new(Shared {
                    state,
                    writer: OnceLock::new(),
                    close_reason: Mutex::new(None),
                }),
            },
            host: host.into(),
            port,
            config,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Connect in the background and start delivering frames to `handler`.
    pub fn start(&self, handler: Arc<dyn InboundHandler>) {
        let shared = self.handle.shared.clone();
        let host = self.host.clone();
        let port = self.port;
        let config = self.config.clone();
        let tasks = self.tasks.clone();

        let task = tokio::spawn(async move {
            let reason = run_connection(&shared, &host, port, &config, &tasks, &*handler).await;
            tracing::debug!("Connection to {}:{} ended: {}", host, port, reason);
            shared.mark_closed(reason.clone());
            handler.on_closed(&reason);
        });

        lock(&self.tasks).push(task.abort_handle());
    }

    /// A cloneable send handle.
    pub fn handle(&self) -> SocketHandle {
        self.handle.clone()
    }

    /// `host:port` this socket connects to.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Current state.
    pub fn state(&self) -> SocketState {
        self.handle.state()
    }

    /// See [`SocketHandle::once_open`].
    pub async fn once_open(&self) -> Result<()> {
        self.handle.once_open().await
    }

    /// See [`SocketHandle::send`].
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        self.handle.send(frame).await
    }

    /// Stop the reader and writer tasks and mark the socket closed.
    ///
    /// The inbound handler is not notified.
    pub fn close(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.handle.shared.mark_closed(CloseReason::Closed);
    }
}

impl Drop for TransportSocket {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_connection(
    shared: &Shared,
    host: &str,
    port: u16,
    config: &ConnectionConfig,
    tasks: &Mutex<Vec<AbortHandle>>,
    handler: &dyn InboundHandler,
) -> CloseReason {
    let stream = match TcpStream::connect((host, port)).await {
        Ok(stream) => stream,
        Err(e) => return CloseReason::ConnectFailed(e.to_string()),
    };
    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!("Failed to set TCP_NODELAY: {}", e);
    }

    let (reader, write_half) = stream.into_split();
    tracing::debug!("Connected to mutation server at {}:{}", host, port);
    serve(shared, reader, write_half, config, tasks, handler).await
}

/// Run an established connection until either half fails.
///
/// A failed write ends the connection the same way a failed read does, so
/// the handler always hears about it.
async fn serve<R, W>(
    shared: &Shared,
    reader: R,
    write_half: W,
    config: &ConnectionConfig,
    tasks: &Mutex<Vec<AbortHandle>>,
    handler: &dyn InboundHandler,
) -> CloseReason
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (writer, mut writer_task) = spawn_writer_task(write_half, config.writer.clone());
    lock(tasks).push(writer_task.abort_handle());

    if shared.writer.set(writer).is_err() {
        writer_task.abort();
        return CloseReason::Error("socket was started twice".to_string());
    }
    shared.state.send_replace(SocketState::Open);

    let reason = tokio::select! {
        read = read_loop(reader, config.max_frame_size, handler) => match read {
            Ok(()) => CloseReason::Eof,
            Err(e) => CloseReason::Error(e.to_string()),
        },
        written = &mut writer_task => match written {
            Ok(Err(e)) => CloseReason::Error(e.to_string()),
            Ok(Ok(())) => CloseReason::Error("writer stopped".to_string()),
            Err(e) => CloseReason::Error(format!("writer task failed: {}", e)),
        },
    };
    writer_task.abort();
    reason
}

/// Read frames until EOF, handing each to `handler`.
async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    max_frame_size: usize,
    handler: &dyn InboundHandler,
) -> Result<()> {
    let mut lines = LineBuffer::with_max_frame_size(max_frame_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) => return Err(MutationServerError::Io(e)),
        };

        for frame in lines.push(&buf[..n])? {
            handler.on_frame(&frame);
        }
    }
}
