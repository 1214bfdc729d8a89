//! Transport module - the TCP socket to the engine.
//!
//! [`MessageSocket`] is the seam between the RPC layer and the socket: the
//! RPC client only needs to wait for the socket to open and to send frames.
//! [`TransportSocket`] is the real implementation.

mod socket;

pub use socket::{CloseReason, InboundHandler, SocketHandle, SocketState, TransportSocket};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;

/// Boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Function the RPC client uses to put a frame on the wire.
pub type SendFn = Arc<dyn Fn(Bytes) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A frame-oriented socket.
pub trait MessageSocket: Send + Sync + 'static {
    /// Resolve once the socket is open. Resolves immediately if it already is.
    fn once_open(&self) -> BoxFuture<'_, Result<()>>;

    /// Send one frame. Fails with `NotOpen` if the socket is not open.
    fn send(&self, frame: Bytes) -> BoxFuture<'_, Result<()>>;
}

/// Build a send function that waits for `socket` to open before every send.
///
/// Requests issued while the socket is still connecting are held until it
/// opens instead of failing with `NotOpen`.
pub fn send_when_open(socket: Arc<dyn MessageSocket>) -> SendFn {
    Arc::new(move |frame: Bytes| -> BoxFuture<'static, Result<()>> {
        let socket = socket.clone();
        Box::pin(async move {
            socket.once_open().await?;
            socket.send(frame).await
        })
    })
}
