//! Mutation server facade.
//!
//! [`MutationServer`] launches the engine, waits for its port banner,
//! connects, and exposes the engine's methods as typed async calls.
//!
//! # Example
//!
//! ```ignore
//! use mutation_server_client::{MutateParams, MutationServerBuilder};
//! use tokio_util::sync::CancellationToken;
//!
//! let server = MutationServerBuilder::new("/opt/engine/bin/mutation-server")
//!     .working_directory("/workspace")
//!     .create()
//!     .await?;
//!
//! let mutants = server.instrument(Default::default()).await?;
//! server
//!     .mutate(MutateParams::new("run-1"), |partial| println!("{:?}", partial), CancellationToken::new())
//!     .await?;
//! server.dispose();
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::codec::JsonCodec;
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{MutationServerError, Result};
use crate::logger::{default_logger, SharedLogger};
use crate::model::{InstrumentParams, MutantResult, MutateParams, MutatePartialResult};
use crate::process::EngineProcess;
use crate::protocol::RequestId;
use crate::rpc::ProgressStream;
use crate::sync::lock;

/// Method name of the instrument call.
pub const INSTRUMENT_METHOD: &str = "instrument";

/// Method name of the mutate call.
pub const MUTATE_METHOD: &str = "mutate";

/// Lifecycle of a [`MutationServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Nothing launched yet.
    Uninitialized,
    /// Process is being spawned.
    Starting,
    /// Waiting for the port banner.
    AwaitingPort,
    /// Waiting for the socket to open.
    Connecting,
    /// Accepting calls.
    Ready,
    /// Torn down; terminal.
    Disposed,
}

struct Running {
    process: EngineProcess,
    connection: Arc<Connection>,
    port: u16,
}

/// Client for a running mutation server.
///
/// Dropping the server disposes it.
pub struct MutationServer {
    config: ServerConfig,
    logger: SharedLogger,
    state: watch::Sender<ServerState>,
    running: Mutex<Option<Running>>,
}

impl MutationServer {
    /// Launch the engine and connect to it.
    ///
    /// On failure the error is logged, the process is terminated and the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// `Config`, `Spawn`, `Handshake`, `HandshakeTimeout`, `OpenTimeout` or
    /// `ConnectionClosed`, depending on the step that failed.
    pub async fn create(config: ServerConfig, logger: SharedLogger) -> Result<Self> {
        let (state, _) = watch::channel(ServerState::Uninitialized);
        let server = Self {
            config,
            logger,
            state,
            running: Mutex::new(None),
        };

        match server.launch().await {
            Ok(running) => {
                tracing::info!(pid = running.process.pid(), port = running.port, "Mutation server ready");
                *lock(&server.running) = Some(running);
                server.set_state(ServerState::Ready);
                Ok(server)
            }
            Err(e) => {
                server
                    .logger
                    .log_error(&format!("Failed to start mutation server: {}", e));
                server.dispose();
                Err(e)
            }
        }
    }

    /// Start the process, wait for the port and open the connection.
    ///
    /// Anything created here is torn down by drop if a later step fails.
    async fn launch(&self) -> Result<Running> {
        self.set_state(ServerState::Starting);
        let process = EngineProcess::start(&self.config, self.logger.clone())?;

        self.set_state(ServerState::AwaitingPort);
        let port = process.await_listening_port(self.config.handshake_timeout).await?;

        self.set_state(ServerState::Connecting);
        let connection = Connection::open(
            &self.config.host,
            port,
            &self.config.connection,
            self.logger.clone(),
        );
        connection.once_open(self.config.open_timeout).await?;

        Ok(Running {
            process,
            connection: Arc::new(connection),
            port,
        })
    }

    fn set_state(&self, state: ServerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("Mutation server state {:?} -> {:?}", previous, state);
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn state_changes(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Engine process id, while running.
    pub fn pid(&self) -> Option<u32> {
        lock(&self.running).as_ref().map(|r| r.process.pid())
    }

    /// Port the engine listens on, while running.
    pub fn port(&self) -> Option<u16> {
        lock(&self.running).as_ref().map(|r| r.port)
    }

    /// Engine exit code, once it has exited.
    pub fn exit_code(&self) -> Option<i32> {
        lock(&self.running).as_ref().and_then(|r| r.process.exit_code())
    }

    fn ready_connection(&self) -> Result<Arc<Connection>> {
        let state = self.state();
        if state != ServerState::Ready {
            return Err(MutationServerError::NotReady { state });
        }
        lock(&self.running)
            .as_ref()
            .map(|r| r.connection.clone())
            .ok_or(MutationServerError::NotReady { state })
    }

    /// Instrument the workspace and return the discovered mutants.
    ///
    /// # Errors
    ///
    /// `NotReady` unless the server is ready; otherwise whatever the
    /// request fails with.
    pub async fn instrument(&self, params: InstrumentParams) -> Result<Vec<MutantResult>> {
        let connection = self.ready_connection()?;
        async move {
            tracing::info!("Instrumenting");
            let mutants: Vec<MutantResult> =
                connection.rpc().request(INSTRUMENT_METHOD, &params).await?;
            tracing::info!(count = mutants.len(), "Instrumentation finished");
            Ok(mutants)
        }
        .instrument(tracing::info_span!("instrument"))
        .await
    }

    /// Run mutation testing, streaming partial results to `on_partial_result`.
    ///
    /// Progress for `params.partial_result_token` is forwarded in arrival
    /// order until the call returns or `cancel` fires. Cancellation is
    /// advisory: forwarding stops at once, the configured cancellation
    /// notification (if any) is sent, and the call still waits for the
    /// engine's response.
    ///
    /// # Errors
    ///
    /// `NotReady` unless the server is ready; otherwise whatever the
    /// request fails with.
    pub async fn mutate<F>(
        &self,
        params: MutateParams,
        on_partial_result: F,
        cancel: CancellationToken,
    ) -> Result<()>
    where
        F: Fn(MutatePartialResult) + Send + Sync + 'static,
    {
        let connection = self.ready_connection()?;
        let span = tracing::info_span!("mutate", token = %params.partial_result_token);

        async move {
            let logger = self.logger.clone();
            let subscription = connection.router().subscribe_progress(
                params.partial_result_token.clone(),
                move |value| match JsonCodec::from_value::<MutatePartialResult>(value) {
                    Ok(partial) => on_partial_result(partial),
                    Err(e) => logger.log_error(&format!("Ignoring malformed partial result: {}", e)),
                },
            );

            let pending = connection
                .rpc()
                .start_request(MUTATE_METHOD, JsonCodec::to_value(&params)?)
                .await?;
            let id = pending.id().clone();
            let response = pending.wait();
            tokio::pin!(response);

            let mut subscription = Some(subscription);
            let result = tokio::select! {
                result = &mut response => result,
                _ = cancel.cancelled() => {
                    tracing::info!(%id, "Mutation run cancelled");
                    subscription = None;
                    self.send_cancellation(&connection, &id).await;
                    response.await
                }
            };
            drop(subscription);

            result.map(|_| ())
        }
        .instrument(span)
        .await
    }

    async fn send_cancellation(&self, connection: &Connection, id: &RequestId) {
        let Some(method) = &self.config.cancellation_method else {
            return;
        };
        if let Err(e) = connection.rpc().notify(method, &json!({ "id": id })).await {
            self.logger
                .log_error(&format!("Failed to send cancellation for request {}: {}", id, e));
        }
    }

    /// Stream of every progress notification, for UI updates.
    ///
    /// # Errors
    ///
    /// `NotReady` unless the server is ready.
    pub fn progress_stream(&self) -> Result<ProgressStream> {
        Ok(self.ready_connection()?.router().progress_stream())
    }

    /// Fail pending calls, close the connection and terminate the engine.
    ///
    /// Safe to call more than once.
    pub fn dispose(&self) {
        if self.state() == ServerState::Disposed {
            return;
        }
        self.set_state(ServerState::Disposed);

        let running = lock(&self.running).take();
        if let Some(running) = running {
            running.connection.close();
            running.process.terminate();
            tracing::debug!(pid = running.process.pid(), "Mutation server disposed");
        }
    }
}

impl Drop for MutationServer {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Fluent construction of a [`MutationServer`].
pub struct MutationServerBuilder {
    config: ServerConfig,
    logger: Option<SharedLogger>,
}

impl MutationServerBuilder {
    /// Start from the engine executable.
    pub fn new(executable_path: impl Into<PathBuf>) -> Self {
        Self::from_config(ServerConfig::new(executable_path))
    }

    /// Start from an existing configuration.
    pub fn from_config(config: ServerConfig) -> Self {
        Self {
            config,
            logger: None,
        }
    }

    /// Pass `--port` to the engine.
    pub fn port(mut self, port: u16) -> Self {
        self.config = self.config.with_port(port);
        self
    }

    /// Working directory of the engine, usually the workspace root.
    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config = self.config.with_working_directory(dir);
        self
    }

    /// Append an extra engine argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.config = self.config.with_arg(arg);
        self
    }

    /// Host to connect to. Defaults to `localhost`.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config = self.config.with_host(host);
        self
    }

    /// Limit on waiting for the port banner; `None` waits forever.
    pub fn handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config = self.config.with_handshake_timeout(timeout);
        self
    }

    /// Limit on waiting for the socket to open.
    pub fn open_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config = self.config.with_open_timeout(timeout);
        self
    }

    /// Per-request limit. Unbounded by default.
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config = self.config.with_request_timeout(timeout);
        self
    }

    /// Notification method sent when a `mutate` call is cancelled.
    pub fn cancellation_method(mut self, method: impl Into<String>) -> Self {
        self.config = self.config.with_cancellation_method(method);
        self
    }

    /// Where engine output and errors go. Defaults to `tracing`.
    pub fn logger(mut self, logger: SharedLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// The configuration built so far.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Launch and connect. See [`MutationServer::create`].
    pub async fn create(self) -> Result<MutationServer> {
        let logger = self.logger.unwrap_or_else(default_logger);
        MutationServer::create(self.config, logger).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::testing::RecordingLogger;

    #[tokio::test]
    async fn test_create_without_executable_fails_with_config_error() {
        let logger = Arc::new(RecordingLogger::default());
        let result = MutationServer::create(ServerConfig::default(), logger.clone()).await;

        assert!(matches!(result, Err(MutationServerError::Config(_))));
        assert_eq!(logger.errors().len(), 1);
        assert!(logger.errors()[0].contains("Failed to start mutation server"));
    }

    #[tokio::test]
    async fn test_builder_collects_settings() {
        let builder = MutationServerBuilder::new("engine")
            .port(4000)
            .arg("--verbose")
            .host("127.0.0.1")
            .handshake_timeout(Some(Duration::from_secs(1)))
            .request_timeout(Some(Duration::from_secs(3)))
            .cancellation_method("$/cancelRequest");

        let config = builder.config();
        assert_eq!(config.port, Some(4000));
        assert_eq!(config.process_args(), vec!["--port", "4000", "--verbose"]);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.handshake_timeout, Some(Duration::from_secs(1)));
        assert_eq!(config.connection.request_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.cancellation_method.as_deref(), Some("$/cancelRequest"));
    }

    #[test]
    fn test_not_ready_error_names_state() {
        let err = MutationServerError::NotReady {
            state: ServerState::Disposed,
        };
        assert!(err.to_string().contains("Disposed"));
    }
}
