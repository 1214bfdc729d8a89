//! RPC module - request correlation and notification routing.
//!
//! - [`RpcClient`] sends requests and matches responses by id
//! - [`NotificationRouter`] fans notifications out to subscribers
//! - [`MessageDispatcher`] classifies inbound frames and routes them

mod client;
mod dispatch;
mod notifications;

pub use client::{PendingRequest, RpcClient};
pub use dispatch::MessageDispatcher;
pub use notifications::{NotificationRouter, ProgressStream, Subscription};
