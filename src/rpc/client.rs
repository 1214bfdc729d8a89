//! Request/response correlation.
//!
//! Every request gets a fresh id and a pending entry holding a oneshot
//! sender. The dispatcher feeds inbound responses to [`RpcClient::receive`],
//! which resolves the entry with the same id. Responses can arrive in any
//! order.
//!
//! ```text
//! request ─► pending[id] = tx ─► send_fn(frame)
//!                                          ...
//! receive(response{id}) ─► pending.remove(id) ─► tx.send(outcome)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::codec::JsonCodec;
use crate::error::{MutationServerError, Result};
use crate::protocol::{OutgoingNotification, Request, RequestId, Response};
use crate::sync::lock;
use crate::transport::SendFn;

type Outcome = Result<Value>;

struct PendingEntry {
    method: String,
    tx: oneshot::Sender<Outcome>,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<RequestId, PendingEntry>,
    /// Set by `fail_all`; new requests are refused with it.
    closed: Option<String>,
}

/// JSON-RPC client over an injected send function.
pub struct RpcClient {
    send: SendFn,
    next_id: AtomicU64,
    pending: Arc<Mutex<PendingTable>>,
    request_timeout: Option<Duration>,
}

impl RpcClient {
    /// Create a client that writes frames with `send`.
    pub fn new(send: SendFn, request_timeout: Option<Duration>) -> Self {
        Self {
            send,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(PendingTable::default())),
            request_timeout,
        }
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed).to_string())
    }

    /// Send a request and return a handle to its response.
    ///
    /// The returned [`PendingRequest`] knows its id, so callers can refer to
    /// the request (e.g. to cancel it) while waiting.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` if the client was closed, or whatever the send
    /// function returns. The pending entry is removed on failure.
    pub async fn start_request(&self, method: &str, params: Value) -> Result<PendingRequest> {
        let id = self.next_request_id();
        let frame = JsonCodec::encode(&Request::new(&id, method, &params))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut table = lock(&self.pending);
            if let Some(reason) = &table.closed {
                return Err(MutationServerError::ConnectionClosed(reason.clone()));
            }
            table.entries.insert(
                id.clone(),
                PendingEntry {
                    method: method.to_string(),
                    tx,
                },
            );
        }

        let pending = PendingRequest {
            id: id.clone(),
            method: method.to_string(),
            rx,
            timeout: self.request_timeout,
            guard: PendingGuard {
                table: Arc::downgrade(&self.pending),
                id,
            },
        };

        tracing::trace!(id = %pending.id, method, "Sending request");
        // On error `pending` is dropped and its guard removes the entry.
        (self.send)(frame).await?;

        Ok(pending)
    }

    /// Send a request and decode its result.
    ///
    /// # Errors
    ///
    /// `Rpc` if the engine answered with an error payload, `Json` if the
    /// result does not decode as `R`, plus everything
    /// [`RpcClient::start_request`] and [`PendingRequest::wait`] return.
    pub async fn request<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = JsonCodec::to_value(params)?;
        let value = self.start_request(method, params).await?.wait().await?;
        JsonCodec::from_value(value)
    }

    /// Send a notification (no id, no response).
    pub async fn notify<P: Serialize + ?Sized>(&self, method: &str, params: &P) -> Result<()> {
        let params = JsonCodec::to_value(params)?;
        let frame = JsonCodec::encode(&OutgoingNotification::new(method, &params))?;
        (self.send)(frame).await
    }

    /// Resolve the pending request `response` answers.
    ///
    /// Returns `false` for responses that match nothing (unknown or null
    /// id, or a caller that stopped waiting); those are discarded.
    pub fn receive(&self, response: Response) -> bool {
        let Some(id) = response.id else {
            tracing::debug!("Discarding response without id");
            return false;
        };

        let entry = lock(&self.pending).entries.remove(&id);
        let Some(entry) = entry else {
            tracing::debug!(%id, "Discarding response for unknown request");
            return false;
        };

        let outcome = response.outcome.map_err(MutationServerError::Rpc);
        if entry.tx.send(outcome).is_err() {
            tracing::debug!(%id, method = %entry.method, "Request was abandoned before its response");
            return false;
        }
        true
    }

    /// Fail every pending request with `ConnectionClosed(reason)` and refuse
    /// new ones.
    pub fn fail_all(&self, reason: &str) {
        let drained: Vec<_> = {
            let mut table = lock(&self.pending);
            if table.closed.is_none() {
                table.closed = Some(reason.to_string());
            }
            table.entries.drain().collect()
        };

        for (id, entry) in drained {
            tracing::debug!(%id, method = %entry.method, "Failing pending request: {}", reason);
            let _ = entry
                .tx
                .send(Err(MutationServerError::ConnectionClosed(reason.to_string())));
        }
    }

    /// Number of requests waiting for a response.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).entries.len()
    }

    /// Whether [`RpcClient::fail_all`] has been called.
    pub fn is_closed(&self) -> bool {
        lock(&self.pending).closed.is_some()
    }
}

/// Removes the pending entry when the caller stops waiting.
struct PendingGuard {
    table: Weak<Mutex<PendingTable>>,
    id: RequestId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            lock(&table).entries.remove(&self.id);
        }
    }
}

/// A request that has been sent and awaits its response.
pub struct PendingRequest {
    id: RequestId,
    method: String,
    rx: oneshot::Receiver<Outcome>,
    timeout: Option<Duration>,
    guard: PendingGuard,
}

impl PendingRequest {
    /// Id the request was sent with.
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Method the request was sent with.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Wait for the response.
    ///
    /// # Errors
    ///
    /// `Rpc` for an error payload, `ConnectionClosed` if the connection went
    /// away, `RequestTimeout` if the configured timeout elapsed.
    pub async fn wait(self) -> Result<Value> {
        let Self {
            method,
            rx,
            timeout,
            guard,
            ..
        } = self;

        let received = match timeout {
            Some(after) => match tokio::time::timeout(after, rx).await {
                Ok(received) => received,
                Err(_) => return Err(MutationServerError::RequestTimeout { method, after }),
            },
            None => rx.await,
        };
        drop(guard);

        received.unwrap_or_else(|_| {
            Err(MutationServerError::ConnectionClosed(
                "request was dropped".to_string(),
            ))
        })
    }
}
