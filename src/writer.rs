//! Outbound frame queue and the task that drains it.
//!
//! One task owns the socket's write half. Everyone else hands it frames
//! through a [`WriterHandle`]. Each queued frame holds a permit from a
//! semaphore sized to `max_pending_frames`; the permit is returned once the
//! frame is on the wire, so a stalled socket makes `send` wait instead of
//! growing the queue without bound.
//!
//! ```text
//! instrument ─┐
//! mutate     ─┼─► WriterHandle ─► mpsc ─► writer_loop ─► TcpStream
//! cancel     ─┘        ▲                       │
//!                      └──── permit released ◄─┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;

use crate::error::{MutationServerError, Result};

/// Default number of frames that may be queued or in flight.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default mpsc capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default time `send` waits for queue space.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames coalesced into one write.
const MAX_BATCH_SIZE: usize = 64;

const FRAME_TERMINATOR: u8 = b'\n';

/// One encoded JSON message, without its terminator.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub payload: Bytes,
}

impl OutboundFrame {
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Bytes this frame occupies on the wire.
    pub fn size(&self) -> usize {
        self.payload.len() + 1
    }
}

/// Writer task settings.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Frames that may be queued or in flight before `send` waits.
    pub max_pending_frames: usize,
    /// Capacity of the queue channel.
    pub channel_capacity: usize,
    /// How long `send` waits for space before failing.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

struct QueuedFrame {
    frame: OutboundFrame,
    _slot: OwnedSemaphorePermit,
}

/// Cloneable sender side of the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<QueuedFrame>,
    slots: Arc<Semaphore>,
    max_pending: usize,
    backpressure_timeout: Duration,
}

impl WriterHandle {
    /// Queue a frame.
    ///
    /// # Errors
    ///
    /// `BackpressureTimeout` if no queue space frees up in time,
    /// `ConnectionClosed` if the writer task has stopped.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        let slot = match self.slots.clone().try_acquire_owned() {
            Ok(slot) => slot,
            Err(TryAcquireError::NoPermits) => {
                tracing::debug!(pending = self.max_pending, "Write queue full, waiting");
                tokio::time::timeout(self.backpressure_timeout, self.slots.clone().acquire_owned())
                    .await
                    .map_err(|_| MutationServerError::BackpressureTimeout)?
                    .map_err(|_| writer_stopped())?
            }
            Err(TryAcquireError::Closed) => return Err(writer_stopped()),
        };

        self.tx
            .send(QueuedFrame { frame, _slot: slot })
            .await
            .map_err(|_| writer_stopped())
    }

    /// Whether `send` would have to wait.
    pub fn is_backpressure_active(&self) -> bool {
        self.slots.available_permits() == 0
    }

    /// Frames queued or being written.
    pub fn pending_count(&self) -> usize {
        self.max_pending.saturating_sub(self.slots.available_permits())
    }

    /// Whether the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn writer_stopped() -> MutationServerError {
    MutationServerError::ConnectionClosed("writer task stopped".to_string())
}

/// Spawn the writer task for `writer`.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let max_pending = config.max_pending_frames.max(1);
    let slots = Arc::new(Semaphore::new(max_pending));

    let handle = WriterHandle {
        tx,
        slots: slots.clone(),
        max_pending,
        backpressure_timeout: config.backpressure_timeout,
    };
    let task = tokio::spawn(writer_loop(rx, writer, slots));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<QueuedFrame>,
    mut writer: W,
    slots: Arc<Semaphore>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
    let mut buf = BytesMut::new();

    loop {
        if rx.recv_many(&mut batch, MAX_BATCH_SIZE).await == 0 {
            // Every handle is gone.
            let _ = writer.shutdown().await;
            return Ok(());
        }

        encode_batch(&batch, &mut buf);
        let written = write_buf(&mut writer, &buf).await;
        // Dropping the batch returns its permits.
        batch.clear();

        if let Err(e) = written {
            tracing::error!("Write to mutation server failed: {}", e);
            slots.close();
            return Err(e);
        }
    }
}

/// Lay out `batch` as `payload\n` records in `out`.
fn encode_batch(batch: &[QueuedFrame], out: &mut BytesMut) {
    out.clear();
    out.reserve(batch.iter().map(|q| q.frame.size()).sum());
    for queued in batch {
        out.extend_from_slice(&queued.frame.payload);
        out.extend_from_slice(&[FRAME_TERMINATOR]);
    }
}

async fn write_buf<W: AsyncWrite + Unpin>(writer: &mut W, buf: &[u8]) -> Result<()> {
    writer.write_all(buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    fn frame(text: &'static str) -> OutboundFrame {
        OutboundFrame::new(Bytes::from_static(text.as_bytes()))
    }

    fn queued(text: &'static str, slots: &Arc<Semaphore>) -> QueuedFrame {
        QueuedFrame {
            frame: frame(text),
            _slot: slots.clone().try_acquire_owned().unwrap(),
        }
    }

    #[test]
    fn test_frame_size_counts_terminator() {
        assert_eq!(frame(r#"{"id":"1"}"#).size(), 11);
    }

    #[test]
    fn test_encode_batch_terminates_every_frame() {
        let slots = Arc::new(Semaphore::new(4));
        let batch = vec![queued("{}", &slots), queued("[1]", &slots)];
        let mut out = BytesMut::from(&b"stale"[..]);

        encode_batch(&batch, &mut out);

        assert_eq!(&out[..], b"{}\n[1]\n");
        drop(batch);
        assert_eq!(slots.available_permits(), 4);
    }

    #[tokio::test]
    async fn test_frames_are_written_in_order() {
        let (client, mut server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        for text in ["a", "b", "c", "d"] {
            handle.send(frame(text)).await.unwrap();
        }
        drop(handle);
        task.await.unwrap().unwrap();

        let mut out = String::new();
        server.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "a\nb\nc\nd\n");
    }

    #[tokio::test]
    async fn test_permits_return_after_write() {
        let (client, mut server) = duplex(4096);
        let config = WriterConfig {
            max_pending_frames: 2,
            ..WriterConfig::default()
        };
        let (handle, _task) = spawn_writer_task(client, config);

        handle.send(frame("one")).await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"one\n");

        tokio::task::yield_now().await;
        assert_eq!(handle.pending_count(), 0);
        assert!(!handle.is_backpressure_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure_timeout() {
        // A reader that never drains: the first frame stays in flight.
        let (client, _server) = duplex(1);
        let config = WriterConfig {
            max_pending_frames: 1,
            backpressure_timeout: Duration::from_millis(50),
            ..WriterConfig::default()
        };
        let (handle, _task) = spawn_writer_task(client, config);

        handle.send(frame("first")).await.unwrap();
        assert!(handle.is_backpressure_active());
        assert_eq!(handle.pending_count(), 1);

        let result = handle.send(frame("second")).await;
        assert!(matches!(result, Err(MutationServerError::BackpressureTimeout)));
    }

    #[tokio::test]
    async fn test_send_after_writer_stopped() {
        let (client, server) = duplex(64);
        drop(server);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        // The first write fails and stops the task.
        let _ = handle.send(frame("lost")).await;
        assert!(task.await.unwrap().is_err());

        let result = handle.send(frame("late")).await;
        assert!(matches!(result, Err(MutationServerError::ConnectionClosed(_))));
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_writer_shuts_down_when_handles_drop() {
        let (client, mut server) = duplex(64);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        drop(handle);

        assert!(task.await.unwrap().is_ok());
        let mut out = Vec::new();
        server.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }
}
