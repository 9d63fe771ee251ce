//! Request/response correlation over a [`Channel`]
//!
//! A `Connection` is transport-agnostic: it assigns ids to outbound
//! requests, resolves them when the matching response arrives, and runs
//! registered handlers for inbound requests and notifications.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tower_lsp::jsonrpc::{self, Id, Request, Response};
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::protocol::Message;
use crate::transport::{Channel, MessageSink, MessageSource};

type RequestHandler =
    Arc<dyn Fn(String, Value) -> BoxFuture<'static, jsonrpc::Result<Value>> + Send + Sync>;
type NotificationHandler = Arc<dyn Fn(String, Value) -> BoxFuture<'static, ()> + Send + Sync>;
type PendingMap = HashMap<Id, oneshot::Sender<Result<Value, BridgeError>>>;

struct Handlers<H> {
    by_method: HashMap<String, H>,
    fallback: Option<H>,
}

impl<H: Clone> Handlers<H> {
    fn new() -> Self {
        Self {
            by_method: HashMap::new(),
            fallback: None,
        }
    }

    fn register(&mut self, method: Option<&str>, handler: H) {
        match method {
            Some(method) => {
                self.by_method.insert(method.to_string(), handler);
            }
            None => self.fallback = Some(handler),
        }
    }

    fn resolve(&self, method: &str) -> Option<H> {
        self.by_method
            .get(method)
            .or(self.fallback.as_ref())
            .cloned()
    }
}

struct Shared {
    outbound: mpsc::UnboundedSender<Message>,
    pending: Mutex<PendingMap>,
    next_id: AtomicI64,
    closed: watch::Sender<bool>,
    requests: RwLock<Handlers<RequestHandler>>,
    notifications: RwLock<Handlers<NotificationHandler>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Marks the connection closed and fails every in-flight request.
    fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        let pending: Vec<_> = lock(&self.pending).drain().collect();
        if !pending.is_empty() {
            debug!("Failing {} pending requests on close", pending.len());
        }
        for (_, waiter) in pending {
            let _ = waiter.send(Err(BridgeError::ConnectionClosed));
        }
    }

    fn complete(&self, response: Response) {
        let (id, result) = response.into_parts();

        let Some(waiter) = lock(&self.pending).remove(&id) else {
            debug!("Dropping response for unknown request id {}", id);
            return;
        };

        let _ = waiter.send(result.map_err(BridgeError::Remote));
    }

    async fn dispatch_request(&self, id: Id, method: String, params: Value) {
        let handler = self
            .requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(&method);

        let result = match handler {
            Some(handler) => handler(method, params).await,
            None => {
                debug!("No handler for request {}", method);
                Err(jsonrpc::Error::method_not_found())
            }
        };

        let response = match result {
            Ok(value) => Response::from_ok(id, value),
            Err(error) => Response::from_error(id, error),
        };

        if self.outbound.send(response.into()).is_err() {
            debug!("Connection closed before response could be sent");
        }
    }

    async fn dispatch_notification(&self, method: String, params: Value) {
        let handler = self
            .notifications
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(&method);

        match handler {
            Some(handler) => handler(method, params).await,
            None => debug!("No handler for notification {}", method),
        }
    }
}

/// Cheap, cloneable sending side of a [`Connection`].
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
}

struct PendingGuard<'a> {
    shared: &'a Shared,
    id: Id,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(&self.shared.pending).remove(&self.id);
    }
}

impl ConnectionHandle {
    /// Sends a request and waits for the correlated response.
    ///
    /// Fails with [`BridgeError::ConnectionClosed`] if the channel closes
    /// before the response arrives. Dropping the returned future forgets
    /// the pending entry.
    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        let shared = &*self.shared;
        let id = Id::Number(shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();

        lock(&shared.pending).insert(id.clone(), tx);
        let _guard = PendingGuard {
            shared,
            id: id.clone(),
        };

        if shared.is_closed() {
            return Err(BridgeError::ConnectionClosed);
        }

        let request = Request::build(method.to_string())
            .id(id)
            .params(params)
            .finish();
        shared
            .outbound
            .send(request.into())
            .map_err(|_| BridgeError::ConnectionClosed)?;

        rx.await.unwrap_or(Err(BridgeError::ConnectionClosed))
    }

    pub fn send_notification(&self, method: &str, params: Value) -> Result<(), BridgeError> {
        if self.shared.is_closed() {
            return Err(BridgeError::ConnectionClosed);
        }

        self.shared
            .outbound
            .send(Message::notification(method, params))
            .map_err(|_| BridgeError::ConnectionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Resolves once the connection has closed.
    pub async fn closed(&self) {
        let mut closed = self.shared.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Closes the connection locally; pending requests fail.
    pub fn close(&self) {
        self.shared.close();
    }
}

/// Duplex protocol endpoint over one [`Channel`].
pub struct Connection {
    handle: ConnectionHandle,
    io: Mutex<Option<(Channel, mpsc::UnboundedReceiver<Message>)>>,
}

impl Connection {
    pub fn new(channel: Channel) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(0),
            closed,
            requests: RwLock::new(Handlers::new()),
            notifications: RwLock::new(Handlers::new()),
        });

        Self {
            handle: ConnectionHandle { shared },
            io: Mutex::new(Some((channel, outbound_rx))),
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Registers a request handler for `method`, or for every method without
    /// a dedicated handler when `method` is `None`.
    pub fn on_request<F, Fut>(&self, method: Option<&str>, handler: F)
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = jsonrpc::Result<Value>> + Send + 'static,
    {
        let handler: RequestHandler = Arc::new(move |method, params| handler(method, params).boxed());
        self.handle
            .shared
            .requests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(method, handler);
    }

    /// Registers a notification handler; `None` catches every method
    /// without a dedicated handler.
    pub fn on_notification<F, Fut>(&self, method: Option<&str>, handler: F)
    where
        F: Fn(String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: NotificationHandler =
            Arc::new(move |method, params| handler(method, params).boxed());
        self.handle
            .shared
            .notifications
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(method, handler);
    }

    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        self.handle.send_request(method, params).await
    }

    pub fn send_notification(&self, method: &str, params: Value) -> Result<(), BridgeError> {
        self.handle.send_notification(method, params)
    }

    /// Starts pumping messages. The returned task finishes when the channel
    /// closes.
    ///
    /// Each inbound request runs on its own task so a slow handler never
    /// blocks the next message. Notifications run one at a time on a
    /// dedicated task in arrival order, and a request waits for every
    /// notification read before it to finish. The reader itself never waits
    /// on a handler, so handlers may call back into the peer.
    pub fn listen(&self) -> Result<JoinHandle<()>, BridgeError> {
        let (channel, outbound_rx) = lock(&self.io)
            .take()
            .ok_or(BridgeError::AlreadyListening)?;
        let (sink, source) = channel.into_parts();
        let shared = self.handle.shared.clone();

        let (notification_tx, notification_rx) = mpsc::unbounded_channel();
        let (handled_tx, handled_rx) = watch::channel(0u64);

        tokio::spawn(write_loop(shared.clone(), sink, outbound_rx));
        tokio::spawn(notification_loop(shared.clone(), notification_rx, handled_tx));

        Ok(tokio::spawn(read_loop(
            shared,
            source,
            notification_tx,
            handled_rx,
        )))
    }
}

async fn write_loop(
    shared: Arc<Shared>,
    mut sink: Box<dyn MessageSink>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    let mut closed = shared.closed.subscribe();

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    break;
                };
                if let Err(e) = sink.send(message).await {
                    warn!("Failed to write message: {}", e);
                    shared.close();
                    break;
                }
            }
            _ = async { let _ = closed.wait_for(|closed| *closed).await; } => break,
        }
    }
}

/// Runs notifications in arrival order and publishes how many have finished.
async fn notification_loop(
    shared: Arc<Shared>,
    mut notifications: mpsc::UnboundedReceiver<(String, Value)>,
    handled: watch::Sender<u64>,
) {
    while let Some((method, params)) = notifications.recv().await {
        shared.dispatch_notification(method, params).await;
        handled.send_modify(|count| *count += 1);
    }
}

/// Fails every pending request however the reader exits, panics included.
struct CloseOnExit(Arc<Shared>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        self.0.close();
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    mut source: Box<dyn MessageSource>,
    notifications: mpsc::UnboundedSender<(String, Value)>,
    handled: watch::Receiver<u64>,
) {
    let _close = CloseOnExit(shared.clone());
    let mut queued: u64 = 0;

    loop {
        match source.recv().await {
            Ok(Some(Message::Response(response))) => shared.complete(response),
            Ok(Some(Message::Request(request))) => {
                let (method, id, params) = request.into_parts();
                let method = method.into_owned();
                let params = params.unwrap_or(Value::Null);

                match id {
                    Some(id) => {
                        let shared = shared.clone();
                        let mut handled = handled.clone();
                        let barrier = queued;
                        tokio::spawn(async move {
                            // Errors only when the notification task is gone.
                            let _ = handled.wait_for(|count| *count >= barrier).await;
                            shared.dispatch_request(id, method, params).await;
                        });
                    }
                    None => {
                        queued += 1;
                        if notifications.send((method, params)).is_err() {
                            debug!("Notification task is gone");
                        }
                    }
                }
            }
            Ok(None) => {
                debug!("Channel closed by peer");
                break;
            }
            Err(BridgeError::Malformed(reason)) => {
                warn!("Skipping malformed message: {}", reason);
            }
            Err(e) => {
                warn!("Transport failed: {}", e);
                break;
            }
        }
    }
}
