//! Seams between the router and the opaque backend

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tower_lsp::jsonrpc;

use crate::capability::CapabilitySet;
use crate::error::BridgeError;

/// The computation engine behind a connection.
///
/// The router forwards every request and notification by method name; the
/// backend decides what they mean. Calls may overlap, so a backend that is
/// not reentrant must serialize internally.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    async fn on_request(&self, method: &str, params: Value) -> jsonrpc::Result<Value>;

    async fn on_notification(&self, method: &str, params: Value);
}

/// Everything a backend is constructed from on `initialize`.
pub struct BackendContext {
    pub capabilities: CapabilitySet,
    /// Opaque `initializationOptions` exactly as the client sent them
    pub initialization_options: Value,
    /// Bytes fetched from `initializationOptions.payloadUrl`, if given
    pub payload: Option<Vec<u8>>,
}

#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn create(&self, context: BackendContext) -> Result<Arc<dyn Backend>, BridgeError>;
}

#[async_trait]
impl<F> BackendFactory for F
where
    F: Fn(BackendContext) -> Result<Arc<dyn Backend>, BridgeError> + Send + Sync,
{
    async fn create(&self, context: BackendContext) -> Result<Arc<dyn Backend>, BridgeError> {
        self(context)
    }
}
