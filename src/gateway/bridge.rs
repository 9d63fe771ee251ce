//! Host-provided message bridge
//!
//! The front end posts `{id, command, arguments}` to its host and the host
//! answers with `{id, result}` or `{id, error}`. Calls are correlated by a
//! monotonically increasing id; each call owns its pending entry and
//! removes it however the call ends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tower_lsp::jsonrpc;
use tracing::{debug, warn};

use crate::error::BridgeError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub id: u64,
    pub command: String,
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeReply {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl BridgeReply {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: jsonrpc::Error) -> Self {
        Self {
            id,
            result: None,
            error: serde_json::to_value(error).ok(),
        }
    }

    fn into_result(self) -> Result<Value, BridgeError> {
        match self.error {
            None => Ok(self.result.unwrap_or(Value::Null)),
            Some(error) => Err(match serde_json::from_value::<jsonrpc::Error>(error.clone()) {
                Ok(remote) => BridgeError::Remote(remote),
                Err(_) => BridgeError::Command(match error {
                    Value::String(message) => message,
                    other => other.to_string(),
                }),
            }),
        }
    }
}

/// The host's end of a bridge created by [`pair`].
pub struct HostPort {
    pub requests: mpsc::UnboundedReceiver<BridgeRequest>,
    pub replies: mpsc::UnboundedSender<BridgeReply>,
}

/// Creates a connected front-end bridge and host port.
pub fn pair() -> (MessageBridge, HostPort) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();

    (
        MessageBridge::new(request_tx, reply_rx),
        HostPort {
            requests: request_rx,
            replies: reply_tx,
        },
    )
}

type Waiter = oneshot::Sender<Result<Value, BridgeError>>;

struct Pending {
    closed: bool,
    waiters: HashMap<u64, Waiter>,
}

struct Inner {
    outbound: mpsc::UnboundedSender<BridgeRequest>,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Front-end side of the message bridge.
#[derive(Clone)]
pub struct MessageBridge {
    inner: Arc<Inner>,
}

struct PendingGuard<'a> {
    inner: &'a Inner,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending().waiters.remove(&self.id);
    }
}

impl MessageBridge {
    /// Starts routing `inbound` replies to their calls. When `inbound` ends,
    /// every pending and later call fails with `ConnectionClosed`.
    pub fn new(
        outbound: mpsc::UnboundedSender<BridgeRequest>,
        inbound: mpsc::UnboundedReceiver<BridgeReply>,
    ) -> Self {
        let inner = Arc::new(Inner {
            outbound,
            pending: Mutex::new(Pending {
                closed: false,
                waiters: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
        });

        tokio::spawn(pump(Arc::downgrade(&inner), inbound));

        Self { inner }
    }

    /// Posts `command` with `argument` and waits for the matching reply.
    pub async fn call(&self, command: String, argument: Value) -> Result<Value, BridgeError> {
        let inner = &*self.inner;
        let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = inner.pending();
            if pending.closed {
                return Err(BridgeError::ConnectionClosed);
            }
            pending.waiters.insert(id, tx);
        }
        let _guard = PendingGuard { inner, id };

        debug!("Bridge call {} -> {}", id, command);
        inner
            .outbound
            .send(BridgeRequest {
                id,
                command,
                arguments: vec![argument],
            })
            .map_err(|_| BridgeError::ConnectionClosed)?;

        rx.await.unwrap_or(Err(BridgeError::ConnectionClosed))
    }

    /// Calls still waiting for a reply
    pub fn pending_calls(&self) -> usize {
        self.inner.pending().waiters.len()
    }
}

async fn pump(inner: std::sync::Weak<Inner>, mut inbound: mpsc::UnboundedReceiver<BridgeReply>) {
    while let Some(reply) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };

        let Some(waiter) = inner.pending().waiters.remove(&reply.id) else {
            warn!("Dropping bridge reply for unknown call {}", reply.id);
            continue;
        };
        let _ = waiter.send(reply.into_result());
    }

    let Some(inner) = inner.upgrade() else {
        return;
    };
    let waiters: Vec<_> = {
        let mut pending = inner.pending();
        pending.closed = true;
        pending.waiters.drain().collect()
    };
    debug!("Bridge closed with {} pending calls", waiters.len());
    for (_, waiter) in waiters {
        let _ = waiter.send(Err(BridgeError::ConnectionClosed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_calls_resolve_by_id() {
        let (bridge, mut host) = pair();

        let first = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.call("bridge.headline-search".into(), json!({})).await }
        });
        let second = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.call("bridge.clocking-status".into(), json!({})).await }
        });

        let mut requests = vec![
            host.requests.recv().await.unwrap(),
            host.requests.recv().await.unwrap(),
        ];
        requests.sort_by_key(|request| request.id);
        assert!(requests[0].id < requests[1].id);

        // Answer in reverse order.
        for request in requests.iter().rev() {
            host.replies
                .send(BridgeReply::ok(request.id, json!(request.command)))
                .unwrap();
        }

        assert_eq!(first.await.unwrap().unwrap(), json!("bridge.headline-search"));
        assert_eq!(second.await.unwrap().unwrap(), json!("bridge.clocking-status"));
        assert_eq!(bridge.pending_calls(), 0);
    }

    #[tokio::test]
    async fn request_carries_argument_as_single_element() {
        let (bridge, mut host) = pair();

        let call = tokio::spawn({
            let bridge = bridge.clone();
            async move {
                bridge
                    .call("bridge.clocking-start".into(), json!({"url": "file:///a.org", "line": 12}))
                    .await
            }
        });

        let request = host.requests.recv().await.unwrap();
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "id": 1,
                "command": "bridge.clocking-start",
                "arguments": [{"url": "file:///a.org", "line": 12}]
            })
        );

        host.replies.send(BridgeReply::ok(request.id, json!({"ok": true}))).unwrap();
        assert_eq!(call.await.unwrap().unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn error_replies_become_errors() {
        let (bridge, mut host) = pair();

        let remote = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.call("bridge.a".into(), json!({})).await }
        });
        let request = host.requests.recv().await.unwrap();
        host.replies
            .send(BridgeReply::err(request.id, jsonrpc::Error::invalid_params("no url")))
            .unwrap();

        let plain = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.call("bridge.b".into(), json!({})).await }
        });
        let request = host.requests.recv().await.unwrap();
        host.replies
            .send(BridgeReply {
                id: request.id,
                result: None,
                error: Some(json!("panel disposed")),
            })
            .unwrap();

        assert!(matches!(
            remote.await.unwrap(),
            Err(BridgeError::Remote(error)) if error == jsonrpc::Error::invalid_params("no url")
        ));
        assert!(matches!(
            plain.await.unwrap(),
            Err(BridgeError::Command(message)) if message == "panel disposed"
        ));
    }

    #[tokio::test]
    async fn stray_replies_are_ignored() {
        let (bridge, host) = pair();

        host.replies.send(BridgeReply::ok(99, json!(null))).unwrap();
        tokio::task::yield_now().await;

        assert_eq!(bridge.pending_calls(), 0);
    }

    #[tokio::test]
    async fn abandoned_call_removes_its_pending_entry() {
        let (bridge, _host) = pair();

        let result = tokio::time::timeout(
            Duration::from_millis(10),
            bridge.call("bridge.headline-search".into(), json!({})),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(bridge.pending_calls(), 0);
    }

    #[tokio::test]
    async fn closing_the_host_fails_pending_and_later_calls() {
        let (bridge, mut host) = pair();

        let pending = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.call("bridge.headline-search".into(), json!({})).await }
        });
        host.requests.recv().await.unwrap();
        drop(host);

        assert!(matches!(
            pending.await.unwrap(),
            Err(BridgeError::ConnectionClosed)
        ));
        assert!(matches!(
            bridge.call("bridge.clocking-status".into(), json!({})).await,
            Err(BridgeError::ConnectionClosed)
        ));
    }
}
