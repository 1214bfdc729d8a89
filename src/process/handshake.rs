//! Port banner scanning.
//!
//! The engine prints `Server is listening on port: <n>` on stdout once its
//! socket is bound. The first matching line resolves the handshake; later
//! matches are ignored.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::sync::watch;

use crate::error::{MutationServerError, Result};

/// Text the engine prints before the port number.
pub const LISTENING_BANNER: &str = "Server is listening on port: ";

static LISTENING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Server is listening on port: (\d+)").unwrap());

/// Extract the port from a stdout line, if it carries the banner.
///
/// ```
/// use mutation_server_client::process::parse_listening_port;
///
/// assert_eq!(parse_listening_port("Server is listening on port: 4711"), Some(4711));
/// assert_eq!(parse_listening_port("compiling..."), None);
/// ```
pub fn parse_listening_port(line: &str) -> Option<u16> {
    LISTENING_PATTERN
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|port| port.as_str().parse().ok())
}

/// Progress of the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortStatus {
    /// No banner yet.
    Pending,
    /// The engine announced this port.
    Listening(u16),
    /// The handshake can no longer succeed.
    Failed(String),
}

/// Scans stdout lines and publishes the first announced port.
pub struct PortAnnouncer {
    status: watch::Sender<PortStatus>,
}

impl PortAnnouncer {
    /// Create an armed announcer and a receiver for its outcome.
    pub fn new() -> (Self, watch::Receiver<PortStatus>) {
        let (status, rx) = watch::channel(PortStatus::Pending);
        (Self { status }, rx)
    }

    /// Whether the announcer is still waiting for the banner.
    pub fn is_armed(&self) -> bool {
        *self.status.borrow() == PortStatus::Pending
    }

    /// Check one stdout line. Returns the port if this line resolved the
    /// handshake.
    pub fn scan(&self, line: &str) -> Option<u16> {
        if !self.is_armed() {
            return None;
        }
        let port = parse_listening_port(line)?;
        self.status.send_replace(PortStatus::Listening(port));
        Some(port)
    }

    /// Fail the handshake unless it already resolved.
    pub fn fail(&self, reason: impl Into<String>) {
        if self.is_armed() {
            self.status.send_replace(PortStatus::Failed(reason.into()));
        }
    }
}

/// Wait for the handshake outcome.
///
/// Can be called repeatedly; each call sees the same outcome once it is
/// decided.
///
/// # Errors
///
/// `Handshake` if the engine stopped before announcing a port,
/// `HandshakeTimeout` if `timeout` elapsed first.
pub async fn wait_for_port(
    mut status: watch::Receiver<PortStatus>,
    timeout: Option<Duration>,
) -> Result<u16> {
    let decided = async {
        match status.wait_for(|s| *s != PortStatus::Pending).await {
            Ok(s) => s.clone(),
            Err(_) => PortStatus::Failed("stdout scanner stopped".to_string()),
        }
    };

    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, decided)
            .await
            .map_err(|_| MutationServerError::HandshakeTimeout(limit))?,
        None => decided.await,
    };

    match outcome {
        PortStatus::Listening(port) => Ok(port),
        PortStatus::Failed(reason) => Err(MutationServerError::Handshake(reason)),
        PortStatus::Pending => Err(MutationServerError::Handshake(
            "handshake still pending".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listening_port() {
        assert_eq!(parse_listening_port("Server is listening on port: 3000"), Some(3000));
        assert_eq!(
            parse_listening_port("[info] Server is listening on port: 51234 (pid 9)"),
            Some(51234)
        );
        assert_eq!(parse_listening_port("Server is listening on port: "), None);
        assert_eq!(parse_listening_port("Server is listening on port: 99999999"), None);
    }

    #[test]
    fn test_banner_constant_matches_pattern() {
        assert_eq!(parse_listening_port(&format!("{}1234", LISTENING_BANNER)), Some(1234));
    }

    #[test]
    fn test_scanner_disarms_after_first_match() {
        let (announcer, rx) = PortAnnouncer::new();

        assert_eq!(announcer.scan("starting up"), None);
        assert!(announcer.is_armed());
        assert_eq!(announcer.scan("Server is listening on port: 4000"), Some(4000));
        assert!(!announcer.is_armed());
        assert_eq!(announcer.scan("Server is listening on port: 5000"), None);

        assert_eq!(*rx.borrow(), PortStatus::Listening(4000));
    }

    #[test]
    fn test_fail_after_match_is_ignored() {
        let (announcer, rx) = PortAnnouncer::new();
        announcer.scan("Server is listening on port: 4000");
        announcer.fail("stdout closed");
        assert_eq!(*rx.borrow(), PortStatus::Listening(4000));
    }

    #[tokio::test]
    async fn test_wait_for_port_resolves_repeatedly() {
        let (announcer, rx) = PortAnnouncer::new();
        announcer.scan("Server is listening on port: 4100");

        assert_eq!(wait_for_port(rx.clone(), None).await.unwrap(), 4100);
        assert_eq!(wait_for_port(rx, Some(Duration::from_secs(1))).await.unwrap(), 4100);
    }

    #[tokio::test]
    async fn test_wait_for_port_fails_when_stdout_closes() {
        let (announcer, rx) = PortAnnouncer::new();
        announcer.fail("stdout closed before the port was announced");

        let result = wait_for_port(rx, None).await;
        assert!(matches!(result, Err(MutationServerError::Handshake(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_port_times_out() {
        let (_announcer, rx) = PortAnnouncer::new();

        let result = wait_for_port(rx, Some(Duration::from_secs(30))).await;
        assert!(matches!(
            result,
            Err(MutationServerError::HandshakeTimeout(d)) if d == Duration::from_secs(30)
        ));
    }
}
