#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tower_lsp::jsonrpc::{self, Request};
use tower_lsp::lsp_types::Url;

use command_bridge::BridgeError;
use command_bridge::capability::{CapabilitySet, Environment};
use command_bridge::lsp::backend::{DocumentBackend, argument};
use command_bridge::router::{Backend, BackendContext, Router};
use command_bridge::transport::{Channel, Connection, ConnectionHandle};

pub fn create_initialize_request(id: i64) -> Request {
    Request::build("initialize")
        .id(id)
        .params(initialize_params(json!({"todoKeywords": ["TODO", "NEXT"]})))
        .finish()
}

pub fn initialize_params(initialization_options: Value) -> Value {
    json!({
        "processId": null,
        "rootUri": null,
        "capabilities": {},
        "initializationOptions": initialization_options
    })
}

pub fn create_initialized_notification() -> Request {
    Request::build("initialized").params(json!({})).finish()
}

pub fn create_did_open_notification(uri: &str, text: &str) -> Request {
    Request::build("textDocument/didOpen")
        .params(did_open_params(uri, text))
        .finish()
}

pub fn did_open_params(uri: &str, text: &str) -> Value {
    json!({"textDocument": {"uri": uri, "languageId": "org", "version": 1, "text": text}})
}

pub fn create_execute_command_request(id: i64, command: &str, argument: Value) -> Request {
    Request::build("workspace/executeCommand")
        .id(id)
        .params(execute_params(command, argument))
        .finish()
}

pub fn execute_params(command: &str, argument: Value) -> Value {
    json!({"command": command, "arguments": [argument]})
}

/// Document backend with an in-memory clock, the way the task views use it.
pub fn clock_backend(context: BackendContext) -> Result<Arc<dyn Backend>, BridgeError> {
    let running: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let start = running.clone();
    let stop = running.clone();

    let backend = DocumentBackend::new(context)
        .with_command("clocking-start", move |_, arg| {
            let start = start.clone();
            async move {
                let clock: Value = argument(arg)?;
                *start.lock().unwrap() = Some(clock);
                Ok(json!({"ok": true}))
            }
        })
        .with_command("clocking-stop", move |_, _| {
            let stop = stop.clone();
            async move {
                stop.lock().unwrap().take();
                Ok(json!({"ok": true}))
            }
        })
        .with_command("clocking-status", move |_, _| {
            let running = running.clone();
            async move { Ok(json!({"running": running.lock().unwrap().clone()})) }
        })
        .with_command("preview-html", |context, arg| async move {
            let clock: Value = argument(arg)?;
            let url = clock["url"]
                .as_str()
                .and_then(|url| Url::parse(url).ok())
                .ok_or_else(|| BridgeError::Command("preview needs a url".to_string()))?;
            let text = context.text(&url).await?;
            Ok(json!(format!("<pre>{}</pre>", text)))
        });

    Ok(Arc::new(backend))
}

/// Serves `factory` behind a router on `server`, and returns a listening
/// client connection on `client` with its notifications collected.
pub fn connect<F>(
    client: Channel,
    server: Channel,
    environment: Environment,
    factory: F,
) -> (Router, Connection, mpsc::UnboundedReceiver<(String, Value)>)
where
    F: Fn(BackendContext) -> Result<Arc<dyn Backend>, BridgeError> + Send + Sync + 'static,
{
    let server = Connection::new(server);
    let router = Router::attach(&server, environment, factory);
    server.listen().unwrap();

    let client = Connection::new(client);
    let notifications = spawn_notification_collector(&client);
    client.listen().unwrap();

    (router, client, notifications)
}

pub fn spawn_notification_collector(
    connection: &Connection,
) -> mpsc::UnboundedReceiver<(String, Value)> {
    let (tx, rx) = mpsc::unbounded_channel();
    connection.on_notification(None, move |method, params| {
        let tx = tx.clone();
        async move {
            let _ = tx.send((method, params));
        }
    });
    rx
}

pub async fn wait_for_notification(
    rx: &mut mpsc::UnboundedReceiver<(String, Value)>,
    method: &str,
) -> Option<Value> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some((received, params)) = rx.recv().await {
            if received == method {
                return Some(params);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

pub async fn initialize(connection: &ConnectionHandle) -> Value {
    let result = connection
        .send_request("initialize", initialize_params(json!({})))
        .await
        .unwrap();
    connection
        .send_notification("initialized", json!({}))
        .unwrap();
    result
}

/// Settings a client hands out for `workspace/configuration`.
pub fn client_settings() -> Value {
    json!([{"todoKeywords": ["TODO", "NEXT", "DONE"]}])
}

/// Answers the backend's `workspace/configuration` requests on `client`.
pub fn serve_configuration(client: &Connection) {
    client.on_request(Some("workspace/configuration"), |_, _| async {
        Ok(client_settings())
    });
}

/// Backend that pulls its settings from the client, both from a request
/// handler and from `workspace/didChangeConfiguration`.
pub struct ConfigurationBackend {
    capabilities: CapabilitySet,
    settings: Mutex<Value>,
}

impl ConfigurationBackend {
    pub fn create(context: BackendContext) -> Result<Arc<dyn Backend>, BridgeError> {
        Ok(Arc::new(Self {
            capabilities: context.capabilities,
            settings: Mutex::new(Value::Null),
        }))
    }

    async fn fetch_settings(&self) -> Result<Value, BridgeError> {
        self.capabilities
            .send_request(
                "workspace/configuration",
                json!({"items": [{"section": "org"}]}),
            )
            .await
    }
}

#[async_trait::async_trait]
impl Backend for ConfigurationBackend {
    async fn on_request(&self, method: &str, params: Value) -> jsonrpc::Result<Value> {
        match (method, params["command"].as_str()) {
            ("initialize", _) => Ok(json!({"capabilities": {}})),
            ("workspace/executeCommand", Some("fetch-settings")) => {
                Ok(self.fetch_settings().await?)
            }
            ("workspace/executeCommand", Some("cached-settings")) => {
                Ok(self.settings.lock().unwrap().clone())
            }
            _ => Err(jsonrpc::Error::method_not_found()),
        }
    }

    async fn on_notification(&self, method: &str, _: Value) {
        if method == "workspace/didChangeConfiguration" {
            if let Ok(settings) = self.fetch_settings().await {
                *self.settings.lock().unwrap() = settings;
            }
        }
    }
}

/// Exercises the client relay from a request handler and from a
/// notification handler on an initialized connection.
pub async fn assert_backend_reads_client_configuration(connection: &ConnectionHandle) {
    let fetched = tokio::time::timeout(
        Duration::from_secs(5),
        connection.send_request(
            "workspace/executeCommand",
            execute_params("fetch-settings", json!({})),
        ),
    )
    .await
    .expect("request handler relay timed out")
    .unwrap();
    assert_eq!(fetched, client_settings());

    connection
        .send_notification("workspace/didChangeConfiguration", json!({"settings": {}}))
        .unwrap();
    let cached = tokio::time::timeout(
        Duration::from_secs(5),
        connection.send_request(
            "workspace/executeCommand",
            execute_params("cached-settings", json!({})),
        ),
    )
    .await
    .expect("notification handler relay timed out")
    .unwrap();
    assert_eq!(cached, client_settings());
}
