//! Client command gateway
//! - mod.rs: command envelope, transport selection and `Gateway`
//! - bridge.rs: host-provided message bridge with correlation ids
//! - network.rs: HTTP POST fallback
//! - host.rs: host side of the message bridge

pub mod bridge;
pub mod host;
pub mod network;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config;
use crate::error::BridgeError;
use crate::router::Router;

pub use bridge::MessageBridge;
pub use network::NetworkClient;

pub const EXECUTE_COMMAND: &str = "workspace/executeCommand";

fn empty_argument() -> Value {
    json!({})
}

/// `{command, argument}` as sent by every front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command: String,
    #[serde(default = "empty_argument")]
    pub argument: Value,
}

impl CommandEnvelope {
    /// A missing or `null` argument becomes `{}`.
    pub fn new(command: impl Into<String>, argument: Option<Value>) -> Self {
        let argument = match argument {
            None | Some(Value::Null) => empty_argument(),
            Some(argument) => argument,
        };

        Self {
            command: command.into(),
            argument,
        }
    }

    /// `workspace/executeCommand` params carrying this envelope
    pub fn to_execute_params(&self) -> Value {
        json!({"command": self.command, "arguments": [self.argument]})
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Upper bound for a single call on any transport
    pub timeout: Duration,
    /// Prefix for command names sent over the message bridge
    pub namespace: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout: config::command_timeout(),
            namespace: config::DEFAULT_COMMAND_NAMESPACE.to_string(),
        }
    }
}

/// Direct in-process invocation offered by a native embedding.
#[async_trait]
pub trait NativeInvoke: Send + Sync {
    async fn invoke(&self, envelope: CommandEnvelope) -> Result<Value, BridgeError>;
}

/// A native embedding talks to its router without any transport.
#[async_trait]
impl NativeInvoke for Router {
    async fn invoke(&self, envelope: CommandEnvelope) -> Result<Value, BridgeError> {
        self.handle_request(EXECUTE_COMMAND, envelope.to_execute_params())
            .await
            .map_err(BridgeError::Remote)
    }
}

/// The client transport, chosen once by the host.
#[derive(Clone)]
pub enum GatewayTransport {
    Native(Arc<dyn NativeInvoke>),
    Bridge(MessageBridge),
    Network(NetworkClient),
}

impl GatewayTransport {
    /// Picks the native embedding if present, then the host message
    /// bridge, then the network.
    pub fn select(
        native: Option<Arc<dyn NativeInvoke>>,
        bridge: Option<MessageBridge>,
        network: NetworkClient,
    ) -> Self {
        if let Some(native) = native {
            Self::Native(native)
        } else if let Some(bridge) = bridge {
            Self::Bridge(bridge)
        } else {
            Self::Network(network)
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Native(_) => "native",
            Self::Bridge(_) => "bridge",
            Self::Network(_) => "network",
        }
    }
}

/// Anything that can run a named command; the data source of every view.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute_command(&self, command: &str, argument: Value) -> Result<Value, BridgeError>;
}

pub struct Gateway {
    transport: GatewayTransport,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(transport: GatewayTransport, config: GatewayConfig) -> Self {
        Self { transport, config }
    }

    pub fn transport(&self) -> &GatewayTransport {
        &self.transport
    }

    pub async fn send(&self, envelope: CommandEnvelope) -> Result<Value, BridgeError> {
        debug!(
            "Sending {} via {} transport",
            envelope.command,
            self.transport.kind()
        );

        let call = async {
            match &self.transport {
                GatewayTransport::Native(native) => native.invoke(envelope.clone()).await,
                GatewayTransport::Bridge(bridge) => {
                    let command = format!("{}.{}", self.config.namespace, envelope.command);
                    bridge.call(command, envelope.argument.clone()).await
                }
                GatewayTransport::Network(network) => network.post(&envelope).await,
            }
        };

        // Dropping `call` on timeout also drops any bridge pending entry.
        tokio::time::timeout(self.config.timeout, call)
            .await
            .map_err(|_| {
                warn!("{} timed out after {:?}", envelope.command, self.config.timeout);
                BridgeError::Timeout {
                    command: envelope.command.clone(),
                    timeout: self.config.timeout,
                }
            })?
    }
}

#[async_trait]
impl CommandExecutor for Gateway {
    async fn execute_command(&self, command: &str, argument: Value) -> Result<Value, BridgeError> {
        self.send(CommandEnvelope::new(command, Some(argument))).await
    }
}
