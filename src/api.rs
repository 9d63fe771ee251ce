//! `POST /api/command`: the server end of the network fallback

use std::path::PathBuf;

use anyhow::Context;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_lsp::lsp_types::Url;
use tracing::{debug, info, warn};

use crate::capability::Environment;
use crate::config::API_COMMAND_PATH;
use crate::error::BridgeError;
use crate::gateway::{CommandEnvelope, EXECUTE_COMMAND};
use crate::lsp::server;
use crate::transport::{Connection, ConnectionHandle, worker};

struct ApiError(BridgeError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Something went wrong: {}", self.0),
        )
            .into_response()
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        Self(err)
    }
}

async fn execute_command(
    State(connection): State<ConnectionHandle>,
    Json(envelope): Json<CommandEnvelope>,
) -> Result<Json<Value>, ApiError> {
    debug!("API command {}", envelope.command);

    let result = connection
        .send_request(EXECUTE_COMMAND, envelope.to_execute_params())
        .await
        .inspect_err(|e| warn!("API command {} failed: {}", envelope.command, e))?;

    Ok(Json(result))
}

pub fn router(connection: ConnectionHandle) -> axum::Router {
    axum::Router::new()
        .route(API_COMMAND_PATH, post(execute_command))
        .layer(CorsLayer::permissive())
        .with_state(connection)
}

/// Starts an in-process native router, opens `files` in it and serves the
/// command endpoint on `port` until the process is stopped.
pub async fn serve(port: u16, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let _guard = crate::log::init()?;

    let (client_channel, server_channel) = worker::pair();
    let (_router, _task) = server::serve(server_channel, Environment::Native)?;

    let client = Connection::new(client_channel);
    client.on_notification(None, |method, params| async move {
        debug!("Backend notification {}: {}", method, params);
    });
    client.listen()?;
    let connection = client.handle();

    connection
        .send_request(
            "initialize",
            json!({"capabilities": {}, "initializationOptions": {}}),
        )
        .await?;
    connection.send_notification("initialized", json!({}))?;

    for file in files {
        let path = std::path::absolute(&file)?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        let uri = Url::from_file_path(&path)
            .map_err(|_| anyhow::anyhow!("Cannot convert {:?} to a URI", path))?;

        info!("Opening {}", uri);
        connection.send_notification(
            "textDocument/didOpen",
            json!({"textDocument": {"uri": uri, "languageId": "org", "version": 0, "text": text}}),
        )?;
    }

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Serving {} on {}", API_COMMAND_PATH, listener.local_addr()?);
    axum::serve(listener, router(connection)).await?;

    Ok(())
}
