//! Notification fan-out.
//!
//! Subscribers register a method name and a predicate over params. The
//! dispatcher publishes each inbound notification; matching callbacks run in
//! registration order, outside the registry lock. Every notification is also
//! sent on a broadcast channel for observers that want everything.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::protocol::{Notification, ProgressParams, ProgressToken, PROGRESS_METHOD};
use crate::sync::lock;

/// Capacity of the broadcast channel.
const BROADCAST_CAPACITY: usize = 256;

type Callback = Arc<dyn Fn(Value) + Send + Sync>;
type Filter = Box<dyn Fn(&Value) -> bool + Send + Sync>;

struct Subscriber {
    method: String,
    filter: Filter,
    callback: Callback,
}

/// Registry of notification subscribers.
pub struct NotificationRouter {
    subscribers: Mutex<BTreeMap<u64, Subscriber>>,
    next_id: AtomicU64,
    broadcast: broadcast::Sender<Notification>,
}

impl Default for NotificationRouter {
    fn default() -> Self {
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            subscribers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            broadcast,
        }
    }
}

impl NotificationRouter {
    /// Create an empty router.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Call `callback` with the params of every `method` notification.
    pub fn subscribe<F>(self: &Arc<Self>, method: &str, callback: F) -> Subscription
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.register(method, Box::new(|_: &Value| true), Arc::new(callback))
    }

    /// Call `callback` with the value of every `progress` notification
    /// tagged with `token`.
    pub fn subscribe_progress<F>(self: &Arc<Self>, token: ProgressToken, callback: F) -> Subscription
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let filter = move |params: &Value| {
            serde_json::from_value::<ProgressToken>(params.get("token").cloned().unwrap_or(Value::Null))
                .map(|t| t == token)
                .unwrap_or(false)
        };
        let forward = move |params: Value| {
            let value = match params {
                Value::Object(mut map) => map.remove("value").unwrap_or(Value::Null),
                _ => Value::Null,
            };
            callback(value);
        };
        self.register(PROGRESS_METHOD, Box::new(filter), Arc::new(forward))
    }

    fn register(self: &Arc<Self>, method: &str, filter: Filter, callback: Callback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers).insert(
            id,
            Subscriber {
                method: method.to_string(),
                filter,
                callback,
            },
        );
        Subscription {
            router: Arc::downgrade(self),
            id,
        }
    }

    /// Deliver a notification to matching subscribers and the broadcast
    /// channel. Returns the number of callbacks invoked.
    pub fn publish(&self, notification: Notification) -> usize {
        let matching: Vec<Callback> = lock(&self.subscribers)
            .values()
            .filter(|s| s.method == notification.method && (s.filter)(&notification.params))
            .map(|s| s.callback.clone())
            .collect();

        for callback in &matching {
            callback(notification.params.clone());
        }

        if matching.is_empty() {
            tracing::trace!(method = %notification.method, "Unobserved notification");
        }
        // No receivers is fine.
        let _ = self.broadcast.send(notification);
        matching.len()
    }

    /// Stream of the params of every `progress` notification.
    pub fn progress_stream(&self) -> ProgressStream {
        ProgressStream {
            rx: self.broadcast.subscribe(),
        }
    }

    /// Raw stream of every notification.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.broadcast.subscribe()
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    fn unsubscribe(&self, id: u64) {
        lock(&self.subscribers).remove(&id);
    }
}

/// Keeps a subscription registered. Dropping it unsubscribes.
#[must_use = "the subscription ends when this guard is dropped"]
pub struct Subscription {
    router: Weak<NotificationRouter>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(router) = self.router.upgrade() {
            router.unsubscribe(self.id);
        }
    }
}

/// All `progress` notifications, in arrival order.
pub struct ProgressStream {
    rx: broadcast::Receiver<Notification>,
}

impl ProgressStream {
    /// Next progress notification. `None` once the router is gone.
    ///
    /// Notifications missed because this stream fell behind are skipped.
    pub async fn recv(&mut self) -> Option<ProgressParams> {
        loop {
            match self.rx.recv().await {
                Ok(notification) if notification.method == PROGRESS_METHOD => {
                    match serde_json::from_value(notification.params) {
                        Ok(params) => return Some(params),
                        Err(e) => tracing::debug!("Ignoring malformed progress params: {}", e),
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Progress stream fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn progress(token: Value, value: Value) -> Notification {
        Notification {
            method: PROGRESS_METHOD.to_string(),
            params: json!({ "token": token, "value": value }),
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<Value>>>, impl Fn(Value) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |value: Value| sink.lock().unwrap().push(value))
    }

    #[test]
    fn test_progress_tokens_are_isolated() {
        let router = NotificationRouter::new();
        let (t1_seen, t1) = recorder();
        let (t2_seen, t2) = recorder();
        let _s1 = router.subscribe_progress(ProgressToken::from("t1"), t1);
        let _s2 = router.subscribe_progress(ProgressToken::from("t2"), t2);

        router.publish(progress(json!("t1"), json!(1)));
        router.publish(progress(json!("t2"), json!(2)));
        router.publish(progress(json!("t1"), json!(3)));
        router.publish(progress(json!("t3"), json!(4)));

        assert_eq!(*t1_seen.lock().unwrap(), vec![json!(1), json!(3)]);
        assert_eq!(*t2_seen.lock().unwrap(), vec![json!(2)]);
    }

    #[test]
    fn test_numeric_and_text_tokens_differ() {
        let router = NotificationRouter::new();
        let (seen, sink) = recorder();
        let _sub = router.subscribe_progress(ProgressToken::from(7), sink);

        assert_eq!(router.publish(progress(json!("7"), json!("text"))), 0);
        assert_eq!(router.publish(progress(json!(7), json!("number"))), 1);
        assert_eq!(*seen.lock().unwrap(), vec![json!("number")]);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let router = NotificationRouter::new();
        let (seen, sink) = recorder();
        let sub = router.subscribe("log", sink);
        assert_eq!(router.subscriber_count(), 1);

        router.publish(Notification {
            method: "log".to_string(),
            params: json!("a"),
        });
        drop(sub);
        router.publish(Notification {
            method: "log".to_string(),
            params: json!("b"),
        });

        assert_eq!(router.subscriber_count(), 0);
        assert_eq!(*seen.lock().unwrap(), vec![json!("a")]);
    }

    #[test]
    fn test_unobserved_notification_is_not_an_error() {
        let router = NotificationRouter::new();
        assert_eq!(
            router.publish(Notification {
                method: "unknown".to_string(),
                params: Value::Null,
            }),
            0
        );
    }

    #[test]
    fn test_callback_can_subscribe_without_deadlock() {
        let router = NotificationRouter::new();
        let nested = Arc::new(Mutex::new(Vec::new()));
        let inner_router = router.clone();
        let keep = nested.clone();
        let _sub = router.subscribe("spawn", move |_| {
            keep.lock().unwrap().push(inner_router.subscribe("other", |_| {}));
        });

        router.publish(Notification {
            method: "spawn".to_string(),
            params: Value::Null,
        });
        assert_eq!(router.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_progress_stream_sees_every_token() {
        let router = NotificationRouter::new();
        let mut stream = router.progress_stream();

        router.publish(Notification {
            method: "log".to_string(),
            params: json!("ignored"),
        });
        router.publish(progress(json!("t1"), json!({ "mutants": [] })));
        router.publish(progress(json!(2), json!(null)));

        let first = stream.recv().await.unwrap();
        assert_eq!(first.token, ProgressToken::from("t1"));
        let second = stream.recv().await.unwrap();
        assert_eq!(second.token, ProgressToken::Number(2));
    }

    #[tokio::test]
    async fn test_progress_stream_ends_with_router() {
        let router = NotificationRouter::new();
        let mut stream = router.progress_stream();
        drop(router);
        assert!(stream.recv().await.is_none());
    }
}
