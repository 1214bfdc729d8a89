//! Protocol module - JSON-RPC envelopes and line framing.
//!
//! - [`IncomingMessage`] classifies inbound frames by the presence of `id`
//! - [`Request`] / [`OutgoingNotification`] build outbound envelopes
//! - [`LineBuffer`] splits the byte stream into newline-delimited frames

mod line_buffer;
mod message;

pub use line_buffer::{LineBuffer, DEFAULT_MAX_FRAME_SIZE};
pub use message::{
    IncomingMessage, Notification, OutgoingNotification, ProgressParams, ProgressToken, Request,
    RequestId, Response, RpcError, INTERNAL_ERROR_CODE, JSONRPC_VERSION, PROGRESS_METHOD,
};
