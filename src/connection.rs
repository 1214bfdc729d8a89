//! A live JSON-RPC connection to the engine.
//!
//! Wires the pieces together:
//!
//! ```text
//! TransportSocket ─► MessageDispatcher ─┬─► RpcClient::receive
//!        ▲                              └─► NotificationRouter::publish
//!        └──────── send_when_open ◄──────── RpcClient
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::config::ConnectionConfig;
use crate::error::{MutationServerError, Result};
use crate::logger::SharedLogger;
use crate::rpc::{MessageDispatcher, NotificationRouter, RpcClient};
use crate::transport::{send_when_open, SocketState, TransportSocket};

/// Socket, RPC client and notification router for one engine connection.
pub struct Connection {
    socket: TransportSocket,
    rpc: Arc<RpcClient>,
    router: Arc<NotificationRouter>,
}

impl Connection {
    /// Start connecting to `host:port`.
    ///
    /// Returns immediately; requests issued before the socket opens are
    /// held until it does.
    pub fn open(host: &str, port: u16, config: &ConnectionConfig, logger: SharedLogger) -> Self {
        let socket = TransportSocket::new(host, port, config.clone());
        let rpc = Arc::new(RpcClient::new(
            send_when_open(Arc::new(socket.handle())),
            config.request_timeout,
        ));
        let router = NotificationRouter::new();

        socket.start(Arc::new(MessageDispatcher::new(rpc.clone(), router.clone(), logger)));
        tracing::debug!("Connecting to mutation server at {}", socket.endpoint());

        Self { socket, rpc, router }
    }

    /// The RPC client.
    pub fn rpc(&self) -> &Arc<RpcClient> {
        &self.rpc
    }

    /// The notification router.
    pub fn router(&self) -> &Arc<NotificationRouter> {
        &self.router
    }

    /// The underlying socket.
    pub fn socket(&self) -> &TransportSocket {
        &self.socket
    }

    /// Socket state.
    pub fn state(&self) -> SocketState {
        self.socket.state()
    }

    /// Wait for the socket to open.
    ///
    /// # Errors
    ///
    /// `OpenTimeout` if `timeout` elapsed first, `ConnectionClosed` if the
    /// connect failed.
    pub async fn once_open(&self, timeout: Option<Duration>) -> Result<()> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.socket.once_open())
                .await
                .map_err(|_| MutationServerError::OpenTimeout(limit))?,
            None => self.socket.once_open().await,
        }
    }

    /// Fail pending requests and close the socket.
    pub fn close(&self) {
        self.rpc.fail_all("connection disposed");
        self.socket.close();
    }
}
