//! Logger collaborator.
//!
//! The host environment (an IDE extension, a CLI, a test harness) decides
//! where engine output and user-facing errors go. The client only talks to
//! this trait. [`TracingLogger`] is the default and forwards everything to
//! `tracing`.

use std::sync::Arc;

/// Sink for engine output and user-facing errors.
pub trait Logger: Send + Sync + 'static {
    /// Informational line (engine stdout, lifecycle events).
    fn log_info(&self, message: &str);

    /// Error line (engine stderr, transport and parse errors).
    fn log_error(&self, message: &str);

    /// Non-blocking error notification for the user.
    ///
    /// Defaults to [`Logger::log_error`].
    fn show_error_notification(&self, message: &str) {
        self.log_error(message);
    }
}

/// Logger that forwards to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log_info(&self, message: &str) {
        tracing::info!(target: "mutation_server", "{}", message);
    }

    fn log_error(&self, message: &str) {
        tracing::error!(target: "mutation_server", "{}", message);
    }

    fn show_error_notification(&self, message: &str) {
        tracing::error!(target: "mutation_server", notify = true, "{}", message);
    }
}

/// Shared logger handle.
pub type SharedLogger = Arc<dyn Logger>;

/// The default shared logger.
pub fn default_logger() -> SharedLogger {
    Arc::new(TracingLogger)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::Logger;

    /// Logger that records every call, for assertions.
    #[derive(Default)]
    pub struct RecordingLogger {
        pub info: Mutex<Vec<String>>,
        pub errors: Mutex<Vec<String>>,
        pub notifications: Mutex<Vec<String>>,
    }

    impl RecordingLogger {
        pub fn errors(&self) -> Vec<String> {
            self.errors.lock().unwrap().clone()
        }

        pub fn info(&self) -> Vec<String> {
            self.info.lock().unwrap().clone()
        }

        pub fn notifications(&self) -> Vec<String> {
            self.notifications.lock().unwrap().clone()
        }
    }

    impl Logger for RecordingLogger {
        fn log_info(&self, message: &str) {
            self.info.lock().unwrap().push(message.to_string());
        }

        fn log_error(&self, message: &str) {
            self.errors.lock().unwrap().push(message.to_string());
        }

        fn show_error_notification(&self, message: &str) {
            self.notifications.lock().unwrap().push(message.to_string());
        }
    }
}
