//! Configuration for the engine process and its connection.
//!
//! [`ServerConfig`] can be built in code with the fluent setters or
//! deserialized from host settings:
//!
//! ```
//! use mutation_server_client::ServerConfig;
//!
//! let config: ServerConfig = serde_json::from_str(
//!     r#"{ "executablePath": "/opt/engine/bin/mutation-server", "port": 4000 }"#,
//! ).unwrap();
//! assert_eq!(config.port, Some(4000));
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{MutationServerError, Result};
use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::writer::WriterConfig;

/// Default host the engine listens on.
pub const DEFAULT_HOST: &str = "localhost";

/// Default time to wait for the port banner.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time to wait for the socket to open.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for one socket connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Writer task settings.
    pub writer: WriterConfig,
    /// Largest inbound frame accepted.
    pub max_frame_size: usize,
    /// Per-request timeout; `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            request_timeout: None,
        }
    }
}

/// Settings for launching and talking to the engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Engine executable. Required.
    pub executable_path: Option<PathBuf>,
    /// Port passed as `--port`; the engine picks one when absent.
    pub port: Option<u16>,
    /// Working directory (workspace root); current directory when absent.
    pub working_directory: Option<PathBuf>,
    /// Extra arguments appended after `--port`.
    pub args: Vec<String>,
    /// Host to connect to.
    pub host: String,
    /// Time allowed for the port banner; `None` waits forever.
    #[serde(skip)]
    pub handshake_timeout: Option<Duration>,
    /// Time allowed for the socket to open; `None` waits forever.
    #[serde(skip)]
    pub open_timeout: Option<Duration>,
    /// Notification method sent when a `mutate` call is cancelled.
    ///
    /// `None` keeps cancellation local (progress forwarding stops, the
    /// engine keeps running the request).
    pub cancellation_method: Option<String>,
    /// Connection settings.
    #[serde(skip)]
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            executable_path: None,
            port: None,
            working_directory: None,
            args: Vec::new(),
            host: DEFAULT_HOST.to_string(),
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
            open_timeout: Some(DEFAULT_OPEN_TIMEOUT),
            cancellation_method: None,
            connection: ConnectionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a config for the given executable.
    pub fn new(executable_path: impl Into<PathBuf>) -> Self {
        Self {
            executable_path: Some(executable_path.into()),
            ..Self::default()
        }
    }

    /// Set the port passed to the engine.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the working directory.
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Append an extra argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the host to connect to.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the handshake timeout (`None` disables it).
    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the socket-open timeout (`None` disables it).
    pub fn with_open_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Set the per-request timeout (`None` disables it).
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connection.request_timeout = timeout;
        self
    }

    /// Set the cancellation notification method.
    pub fn with_cancellation_method(mut self, method: impl Into<String>) -> Self {
        self.cancellation_method = Some(method.into());
        self
    }

    /// Validate and return the executable path.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the path is unset or empty, or if it names a
    /// location (contains a separator) that does not exist. Bare command
    /// names are left to `PATH` lookup at spawn time.
    pub fn resolve_executable(&self) -> Result<&Path> {
        let path = self
            .executable_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| {
                MutationServerError::Config("mutation server executable path is not set".to_string())
            })?;

        let is_bare_command = path.components().count() == 1 && !path.is_absolute();
        if !is_bare_command && !path.exists() {
            return Err(MutationServerError::Config(format!(
                "mutation server executable '{}' does not exist",
                path.display()
            )));
        }

        Ok(path)
    }

    /// Arguments for the engine process.
    pub fn process_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.args.len() + 2);
        if let Some(port) = self.port {
            args.push("--port".to_string());
            args.push(port.to_string());
        }
        args.extend(self.args.iter().cloned());
        args
    }
}
