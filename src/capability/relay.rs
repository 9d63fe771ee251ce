//! Outbound relay to the connected client

use serde_json::Value;
use tower_lsp::lsp_types::notification::{LogMessage, Notification, ShowMessage};
use tower_lsp::lsp_types::{LogMessageParams, MessageType, ShowMessageParams};
use tracing::warn;

use crate::error::BridgeError;
use crate::transport::ConnectionHandle;

/// The one capability every environment supplies: requests and
/// notifications sent back over the active transport.
#[derive(Clone)]
pub struct ClientRelay {
    connection: ConnectionHandle,
}

impl ClientRelay {
    pub fn new(connection: ConnectionHandle) -> Self {
        Self { connection }
    }

    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        self.connection.send_request(method, params).await
    }

    pub fn send_notification(&self, method: &str, params: Value) -> Result<(), BridgeError> {
        self.connection.send_notification(method, params)
    }

    pub fn log_message(&self, typ: MessageType, message: impl Into<String>) {
        self.notify::<LogMessage>(LogMessageParams {
            typ,
            message: message.into(),
        });
    }

    pub fn show_message(&self, typ: MessageType, message: impl Into<String>) {
        self.notify::<ShowMessage>(ShowMessageParams {
            typ,
            message: message.into(),
        });
    }

    fn notify<N: Notification>(&self, params: N::Params) {
        let params = match serde_json::to_value(params) {
            Ok(params) => params,
            Err(e) => {
                warn!("Failed to serialize {} params: {}", N::METHOD, e);
                return;
            }
        };

        if let Err(e) = self.send_notification(N::METHOD, params) {
            warn!("Failed to relay {}: {}", N::METHOD, e);
        }
    }
}
