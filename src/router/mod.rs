//! Message router
//! - mod.rs: per-connection state machine forwarding everything to one backend
//! - backend.rs: `Backend` and `BackendFactory` seams
//! - payload.rs: binary payload loading before backend construction

pub mod backend;
pub mod payload;

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::watch;
use tower::Service;
use tower_lsp::jsonrpc::{self, Request, Response};
use tracing::{debug, error, info, warn};

use crate::capability::{CapabilitySet, ClientRelay, Environment};
use crate::error::BridgeError;
use crate::transport::Connection;

pub use backend::{Backend, BackendContext, BackendFactory};

pub const INITIALIZE: &str = "initialize";

enum Phase {
    Uninitialized,
    Initializing,
    Ready(Arc<dyn Backend>),
}

struct Inner {
    capabilities: CapabilitySet,
    factory: Arc<dyn BackendFactory>,
    phase: watch::Sender<Phase>,
}

/// Owns the single backend of one connection.
///
/// The backend is built lazily by the first `initialize` request and then
/// lives as long as the router. Requests that arrive while it is being
/// built wait for it; requests that arrive before any `initialize` are
/// rejected with [`BridgeError::OutOfOrder`].
#[derive(Clone)]
pub struct Router {
    inner: Arc<Inner>,
}

/// Leaves `Initializing` however the first `initialize` ends: `Ready` once a
/// backend exists, otherwise back to `Uninitialized`.
struct InitializingGuard<'a> {
    phase: &'a watch::Sender<Phase>,
    backend: Option<Arc<dyn Backend>>,
}

impl Drop for InitializingGuard<'_> {
    fn drop(&mut self) {
        let phase = match self.backend.take() {
            Some(backend) => Phase::Ready(backend),
            None => Phase::Uninitialized,
        };
        self.phase.send_replace(phase);
    }
}

impl Router {
    pub fn new(capabilities: CapabilitySet, factory: Arc<dyn BackendFactory>) -> Self {
        let (phase, _) = watch::channel(Phase::Uninitialized);
        Self {
            inner: Arc::new(Inner {
                capabilities,
                factory,
                phase,
            }),
        }
    }

    /// Builds a router for `environment` whose client relay talks over
    /// `connection`, and registers it as the connection's catch-all handler.
    pub fn attach(
        connection: &Connection,
        environment: Environment,
        factory: impl BackendFactory + 'static,
    ) -> Self {
        let relay = ClientRelay::new(connection.handle());
        let router = Self::new(
            CapabilitySet::for_environment(environment, relay),
            Arc::new(factory),
        );
        router.register(connection);
        router
    }

    pub fn register(&self, connection: &Connection) {
        let router = self.clone();
        connection.on_request(None, move |method, params| {
            let router = router.clone();
            async move { router.handle_request(&method, params).await }
        });

        let router = self.clone();
        connection.on_notification(None, move |method, params| {
            let router = router.clone();
            async move { router.handle_notification(&method, params).await }
        });
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.inner.phase.borrow(), Phase::Ready(_))
    }

    pub async fn handle_request(&self, method: &str, params: Value) -> jsonrpc::Result<Value> {
        if method == INITIALIZE {
            return self.initialize(params).await;
        }

        let backend = self.backend_for(method).await.inspect_err(|e| {
            warn!("Rejecting request: {}", e);
        })?;
        backend.on_request(method, params).await
    }

    pub async fn handle_notification(&self, method: &str, params: Value) {
        match self.backend_for(method).await {
            Ok(backend) => backend.on_notification(method, params).await,
            Err(e) => warn!("Dropping notification: {}", e),
        }
    }

    async fn initialize(&self, params: Value) -> jsonrpc::Result<Value> {
        let mut first = false;
        self.inner.phase.send_if_modified(|phase| {
            if matches!(phase, Phase::Uninitialized) {
                *phase = Phase::Initializing;
                first = true;
            }
            first
        });

        if !first {
            debug!("Backend already constructed, forwarding initialize");
            let backend = self.backend_for(INITIALIZE).await?;
            return backend.on_request(INITIALIZE, params).await;
        }

        let mut guard = InitializingGuard {
            phase: &self.inner.phase,
            backend: None,
        };

        let backend = self.construct(&params).await.inspect_err(|e| {
            error!("Failed to construct backend: {}", e);
        })?;
        guard.backend = Some(backend.clone());

        // Queued requests are released only after the backend has seen
        // its own `initialize`.
        let result = backend.on_request(INITIALIZE, params).await;
        drop(guard);
        info!("Backend ready");

        result
    }

    async fn construct(&self, params: &Value) -> Result<Arc<dyn Backend>, BridgeError> {
        let capabilities = self.inner.capabilities.clone();
        let initialization_options = params
            .get("initializationOptions")
            .cloned()
            .unwrap_or(Value::Null);

        let payload = match payload::payload_url(&initialization_options)? {
            Some(url) => Some(payload::load(&url, capabilities.environment()).await?),
            None => None,
        };

        info!(
            "Constructing backend for the {} environment",
            capabilities.environment()
        );

        self.inner
            .factory
            .create(BackendContext {
                capabilities,
                initialization_options,
                payload,
            })
            .await
    }

    async fn backend_for(&self, method: &str) -> Result<Arc<dyn Backend>, BridgeError> {
        let mut phase = self.inner.phase.subscribe();
        let phase = phase
            .wait_for(|phase| !matches!(phase, Phase::Initializing))
            .await
            .map_err(|_| BridgeError::ConnectionClosed)?;

        match &*phase {
            Phase::Ready(backend) => Ok(backend.clone()),
            _ => Err(BridgeError::OutOfOrder {
                method: method.to_string(),
            }),
        }
    }
}

impl Service<Request> for Router {
    type Response = Option<Response>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let router = self.clone();

        Box::pin(async move {
            let (method, id, params) = request.into_parts();
            let params = params.unwrap_or(Value::Null);

            let Some(id) = id else {
                router.handle_notification(&method, params).await;
                return Ok(None);
            };

            let response = match router.handle_request(&method, params).await {
                Ok(result) => Response::from_ok(id, result),
                Err(error) => Response::from_error(id, error),
            };
            Ok(Some(response))
        })
    }
}
