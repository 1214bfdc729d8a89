//! Inbound frame routing.

use std::sync::Arc;

use super::{NotificationRouter, RpcClient};
use crate::logger::SharedLogger;
use crate::protocol::IncomingMessage;
use crate::transport::{CloseReason, InboundHandler};

/// Routes inbound frames: responses to the [`RpcClient`], notifications to
/// the [`NotificationRouter`].
pub struct MessageDispatcher {
    rpc: Arc<RpcClient>,
    router: Arc<NotificationRouter>,
    logger: SharedLogger,
}

impl MessageDispatcher {
    pub fn new(rpc: Arc<RpcClient>, router: Arc<NotificationRouter>, logger: SharedLogger) -> Self {
        Self { rpc, router, logger }
    }
}

impl InboundHandler for MessageDispatcher {
    fn on_frame(&self, frame: &[u8]) {
        match IncomingMessage::parse(frame) {
            Ok(IncomingMessage::Response(response)) => {
                self.rpc.receive(response);
            }
            Ok(IncomingMessage::Notification(notification)) => {
                self.router.publish(notification);
            }
            Err(e) => {
                // A bad frame is dropped; the connection stays up.
                self.logger.log_error(&format!(
                    "Discarding unreadable message from mutation server: {} ({})",
                    e,
                    String::from_utf8_lossy(frame)
                ));
            }
        }
    }

    fn on_closed(&self, reason: &CloseReason) {
        let message = format!("Mutation server connection closed: {}", reason);
        self.logger.log_error(&message);
        self.logger.show_error_notification(&message);
        self.rpc.fail_all(&reason.to_string());
    }
}
