//! Engine process lifecycle.
//!
//! [`EngineProcess::start`] spawns the engine with piped stdout and stderr
//! and starts three background tasks:
//!
//! - stdout: each line goes to `Logger::log_info` and through the port
//!   scanner until the banner is seen. A banner with no line break is
//!   picked up once the engine stops writing.
//! - stderr: each line goes to `Logger::log_error`
//! - exit watcher: records and logs the exit code, and kills the child on
//!   [`EngineProcess::terminate`]
//!
//! Output is read as raw bytes. Invalid UTF-8 is replaced, never fatal.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};

use super::handshake::{parse_listening_port, wait_for_port, PortAnnouncer, PortStatus};
use crate::config::ServerConfig;
use crate::error::{MutationServerError, Result};
use crate::logger::SharedLogger;
use crate::sync::lock;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Unterminated output longer than this is logged as a line of its own.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Quiet time after which an unterminated banner is accepted.
const BANNER_SETTLE_TIME: Duration = Duration::from_millis(50);

/// A running engine process.
///
/// Dropping the handle kills the process.
pub struct EngineProcess {
    pid: u32,
    port_status: watch::Receiver<PortStatus>,
    exit_code: Arc<Mutex<Option<i32>>>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl EngineProcess {
    /// Spawn the engine described by `config`.
    ///
    /// # Errors
    ///
    /// `Config` if the executable path is unusable, `Spawn` if the OS
    /// refuses to start it or no process id is available.
    pub fn start(config: &ServerConfig, logger: SharedLogger) -> Result<Self> {
        let executable = config.resolve_executable()?;

        let mut command = Command::new(executable);
        command
            .args(config.process_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_directory {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            MutationServerError::Spawn(format!("{}: {}", executable.display(), e))
        })?;

        let Some(pid) = child.id() else {
            return Err(MutationServerError::Spawn(format!(
                "{}: no process id",
                executable.display()
            )));
        };
        tracing::debug!(pid, "Spawned mutation server {}", executable.display());

        let (announcer, port_status) = PortAnnouncer::new();
        match child.stdout.take() {
            Some(stdout) => {
                tokio::spawn(pump_stdout(stdout, announcer, logger.clone()));
            }
            None => announcer.fail("stdout is not captured"),
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_stderr(stderr, logger.clone()));
        }

        let exit_code = Arc::new(Mutex::new(None));
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(watch_exit(child, kill_rx, exit_code.clone(), logger));

        Ok(Self {
            pid,
            port_status,
            exit_code,
            kill: Mutex::new(Some(kill_tx)),
        })
    }

    /// Wait for the port the engine announces on stdout.
    ///
    /// # Errors
    ///
    /// `Handshake` if stdout closed before the banner, `HandshakeTimeout`
    /// if `timeout` elapsed first.
    pub async fn await_listening_port(&self, timeout: Option<Duration>) -> Result<u16> {
        wait_for_port(self.port_status.clone(), timeout).await
    }

    /// Operating system process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit code, once the process has exited. `None` while running or when
    /// it was killed by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        *lock(&self.exit_code)
    }

    /// Kill the process. Safe to call more than once.
    pub fn terminate(&self) {
        if let Some(kill) = lock(&self.kill).take() {
            let _ = kill.send(());
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

async fn pump_stdout<R>(mut stdout: R, announcer: PortAnnouncer, logger: SharedLogger)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
    loop {
        // A banner at the end of an unterminated tail is only trusted once
        // the engine has gone quiet, so a port split across writes is not
        // cut short.
        let settle = announcer.is_armed()
            && parse_listening_port(&String::from_utf8_lossy(&buf)).is_some();
        let read = if settle {
            match tokio::time::timeout(BANNER_SETTLE_TIME, stdout.read_buf(&mut buf)).await {
                Ok(read) => read,
                Err(_) => {
                    scan_tail(&buf, &announcer);
                    continue;
                }
            }
        } else {
            stdout.read_buf(&mut buf).await
        };

        match read {
            Ok(0) => break,
            Ok(_) => drain_lines(&mut buf, &announcer, &logger),
            Err(e) => {
                logger.log_error(&format!("Failed to read mutation server stdout: {}", e));
                break;
            }
        }
    }

    if !buf.is_empty() {
        let line = lossy_line(&buf);
        logger.log_info(&line);
        announcer.scan(&line);
    }
    announcer.fail("mutation server stdout closed before the port was announced");
}

/// Log and scan every complete line in `buf`, leaving the tail in place.
fn drain_lines(buf: &mut BytesMut, announcer: &PortAnnouncer, logger: &SharedLogger) {
    while let Some(end) = buf.iter().position(|&b| b == b'\n') {
        let raw = buf.split_to(end + 1);
        let line = lossy_line(&raw[..end]);
        logger.log_info(&line);
        if let Some(port) = announcer.scan(&line) {
            tracing::debug!(port, "Mutation server announced its port");
        }
    }

    if buf.len() > MAX_LINE_LENGTH {
        let raw = buf.split();
        let line = lossy_line(&raw);
        logger.log_info(&line);
        announcer.scan(&line);
    }
}

fn scan_tail(buf: &[u8], announcer: &PortAnnouncer) {
    if let Some(port) = announcer.scan(&lossy_line(buf)) {
        tracing::debug!(port, "Mutation server announced its port without a line break");
    }
}

/// Decode a raw output line. Invalid UTF-8 becomes U+FFFD and a trailing
/// `\r` is dropped.
fn lossy_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

async fn pump_stderr<R>(stderr: R, logger: SharedLogger)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {
                let line = raw.strip_suffix(b"\n").unwrap_or(&raw[..]);
                logger.log_error(&lossy_line(line));
            }
            Err(e) => {
                logger.log_error(&format!("Failed to read mutation server stderr: {}", e));
                break;
            }
        }
    }
}

async fn watch_exit(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    exit_code: Arc<Mutex<Option<i32>>>,
    logger: SharedLogger,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            if let Err(e) = child.start_kill() {
                tracing::debug!("Failed to kill mutation server: {}", e);
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => {
            *lock(&exit_code) = status.code();
            logger.log_info(&format!("Mutation server exited ({})", status));
        }
        Err(e) => logger.log_error(&format!("Failed to wait for mutation server: {}", e)),
    }
}

#[cfg(test)]
mod line_tests {
    use super::*;
    use crate::logger::testing::RecordingLogger;

    #[test]
    fn test_lossy_line_replaces_invalid_bytes() {
        assert_eq!(lossy_line(b"caf\xe9\r"), "caf\u{FFFD}");
        assert_eq!(lossy_line(b"plain"), "plain");
    }

    #[test]
    fn test_drain_lines_keeps_unterminated_tail() {
        let (announcer, rx) = PortAnnouncer::new();
        let recorder = Arc::new(RecordingLogger::default());
        let logger: SharedLogger = recorder.clone();
        let mut buf = BytesMut::from(&b"one\r\ntwo\nServer is listening on port: 43"[..]);

        drain_lines(&mut buf, &announcer, &logger);

        assert_eq!(recorder.info(), vec!["one".to_string(), "two".to_string()]);
        assert_eq!(&buf[..], b"Server is listening on port: 43");
        assert_eq!(*rx.borrow(), PortStatus::Pending);

        buf.extend_from_slice(b"21");
        scan_tail(&buf, &announcer);
        assert_eq!(*rx.borrow(), PortStatus::Listening(4321));
    }
}
