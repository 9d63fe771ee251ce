use std::time::Duration;

use thiserror::Error;
use tower_lsp::jsonrpc::{self, ErrorCode};
use tower_lsp::lsp_types::Url;

use crate::capability::{Capability, Environment};

/// LSP `ServerNotInitialized`
pub const SERVER_NOT_INITIALIZED: i64 = -32002;
pub const CAPABILITY_UNSUPPORTED: i64 = -32003;
pub const CONNECTION_CLOSED: i64 = -32099;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection is already listening")]
    AlreadyListening,

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("received `{method}` before `initialize` completed")]
    OutOfOrder { method: String },

    #[error("backend initialization failed: {0}")]
    Initialization(String),

    #[error("`{capability}` is not supported in the {environment} environment")]
    Unsupported {
        capability: Capability,
        environment: Environment,
    },

    #[error("cannot map `{0}` to a local path")]
    InvalidResource(Url),

    #[error("remote error {}: {}", .0.code, .0.message)]
    Remote(jsonrpc::Error),

    #[error("command `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("command failed: {0}")]
    Command(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn unsupported(capability: Capability, environment: Environment) -> Self {
        Self::Unsupported {
            capability,
            environment,
        }
    }

    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }
}

impl From<BridgeError> for jsonrpc::Error {
    fn from(err: BridgeError) -> Self {
        let code = match &err {
            BridgeError::Remote(remote) => return remote.clone(),
            BridgeError::OutOfOrder { .. } => ErrorCode::ServerError(SERVER_NOT_INITIALIZED),
            BridgeError::Unsupported { .. } => ErrorCode::ServerError(CAPABILITY_UNSUPPORTED),
            BridgeError::ConnectionClosed => ErrorCode::ServerError(CONNECTION_CLOSED),
            _ => ErrorCode::InternalError,
        };

        jsonrpc::Error {
            code,
            message: err.to_string().into(),
            data: None,
        }
    }
}
