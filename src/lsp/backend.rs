use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tower_lsp::jsonrpc::{self, Result};
use tower_lsp::lsp_types::*;
use tracing::{debug, info, warn};

use crate::capability::CapabilitySet;
use crate::error::BridgeError;
use crate::router::{Backend, BackendContext};

type CommandHandler = Arc<
    dyn Fn(CommandContext, Value) -> BoxFuture<'static, std::result::Result<Value, BridgeError>>
        + Send
        + Sync,
>;

/// Full-sync table of the documents the client has open
#[derive(Clone, Default)]
pub struct Documents {
    inner: Arc<RwLock<HashMap<Url, String>>>,
}

impl Documents {
    pub fn get(&self, uri: &Url) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, uri: Url, text: String) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri, text);
    }

    /// Replaces the text only if the document is already open.
    fn refresh(&self, uri: &Url, text: &str) {
        if let Some(open) = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(uri)
        {
            *open = text.to_string();
        }
    }

    fn remove(&self, uri: &Url) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri);
    }
}

/// What a command handler gets to work with.
#[derive(Clone)]
pub struct CommandContext {
    pub capabilities: CapabilitySet,
    pub documents: Documents,
}

impl CommandContext {
    /// Open document text, falling back to the `readToString` capability
    pub async fn text(&self, uri: &Url) -> std::result::Result<String, BridgeError> {
        match self.documents.get(uri) {
            Some(text) => Ok(text),
            None => self.capabilities.read_to_string(uri).await,
        }
    }
}

pub fn argument<T: DeserializeOwned>(value: Value) -> std::result::Result<T, BridgeError> {
    serde_json::from_value(value).map_err(|e| BridgeError::Malformed(format!("invalid argument: {}", e)))
}

#[derive(Deserialize)]
struct UrlArgument {
    url: Url,
}

#[derive(Deserialize)]
struct WriteArgument {
    url: Url,
    text: String,
}

#[derive(Deserialize)]
struct ExecuteArgument {
    url: Url,
    executable: String,
}

/// Minimal document-sync backend exposing the capability set as commands.
pub struct DocumentBackend {
    context: CommandContext,
    initialization_options: Value,
    commands: HashMap<String, CommandHandler>,
}

impl DocumentBackend {
    pub fn new(context: BackendContext) -> Self {
        if let Some(payload) = &context.payload {
            info!("Backend payload loaded ({} bytes)", payload.len());
        }

        let backend = Self {
            context: CommandContext {
                capabilities: context.capabilities,
                documents: Documents::default(),
            },
            initialization_options: context.initialization_options,
            commands: HashMap::new(),
        };

        backend
            .with_command("document-text", |context, arg| async move {
                let UrlArgument { url } = argument(arg)?;
                Ok(json!(context.text(&url).await?))
            })
            .with_command("document-write", |context, arg| async move {
                let WriteArgument { url, text } = argument(arg)?;
                context.capabilities.write(&url, &text).await?;
                context.documents.refresh(&url, &text);
                Ok(Value::Null)
            })
            .with_command("document-execute", |context, arg| async move {
                let ExecuteArgument { url, executable } = argument(arg)?;
                let text = context.text(&url).await?;
                Ok(json!(context.capabilities.execute(&executable, &text).await?))
            })
            .with_command("home-dir", |context, _| async move {
                Ok(json!(context.capabilities.home_dir()?))
            })
    }

    /// Factory usable directly as a [`crate::router::BackendFactory`]
    pub fn create(context: BackendContext) -> std::result::Result<Arc<dyn Backend>, BridgeError> {
        Ok(Arc::new(Self::new(context)))
    }

    pub fn with_command<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(CommandContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, BridgeError>> + Send + 'static,
    {
        let handler: CommandHandler = Arc::new(move |context, arg| handler(context, arg).boxed());
        self.commands.insert(name.to_string(), handler);
        self
    }

    pub fn documents(&self) -> &Documents {
        &self.context.documents
    }

    pub fn initialization_options(&self) -> &Value {
        &self.initialization_options
    }

    fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn server_capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            text_document_sync: Some(TextDocumentSyncCapability::Options(
                TextDocumentSyncOptions {
                    open_close: Some(true),
                    change: Some(TextDocumentSyncKind::FULL),
                    ..Default::default()
                },
            )),
            execute_command_provider: Some(ExecuteCommandOptions {
                commands: self.command_names(),
                work_done_progress_options: WorkDoneProgressOptions::default(),
            }),
            ..Default::default()
        }
    }

    fn log(&self, typ: MessageType, message: impl Into<String>) {
        self.context.capabilities.client().log_message(typ, message);
    }

    fn initialize(&self) -> Result<Value> {
        self.log(MessageType::INFO, "Backend initializing");

        let result = InitializeResult {
            capabilities: self.server_capabilities(),
            server_info: Some(ServerInfo {
                name: "command-bridge".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        };
        serde_json::to_value(result).map_err(|e| BridgeError::Json(e).into())
    }

    async fn execute_command(&self, params: Value) -> Result<Value> {
        let params: ExecuteCommandParams = parse(params)?;

        // Front ends send `<namespace>.<command>`; the namespace is theirs.
        let name = params
            .command
            .rsplit_once('.')
            .map_or(params.command.as_str(), |(_, name)| name);

        let Some(handler) = self.commands.get(name) else {
            warn!("Unknown command {}", params.command);
            return Err(jsonrpc::Error::invalid_params(format!(
                "unknown command `{}`",
                params.command
            )));
        };

        let arg = params
            .arguments
            .into_iter()
            .next()
            .unwrap_or_else(|| json!({}));

        debug!("Executing command {}", name);
        handler(self.context.clone(), arg)
            .await
            .inspect_err(|e| warn!("Command {} failed: {}", name, e))
            .map_err(Into::into)
    }

    fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        self.log(MessageType::LOG, format!("Document opened: {}", uri));
        self.context.documents.insert(uri, params.text_document.text);
    }

    fn did_change(&self, params: DidChangeTextDocumentParams) {
        let Some(change) = params.content_changes.into_iter().last() else {
            return;
        };
        self.context
            .documents
            .insert(params.text_document.uri, change.text);
    }

    fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.log(MessageType::LOG, format!("Document closed: {}", uri));
        self.context.documents.remove(&uri);
    }
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| jsonrpc::Error::invalid_params(e.to_string()))
}

#[async_trait]
impl Backend for DocumentBackend {
    async fn on_request(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            "initialize" => self.initialize(),
            "shutdown" => {
                self.log(MessageType::INFO, "Backend shutting down");
                Ok(Value::Null)
            }
            "workspace/executeCommand" => self.execute_command(params).await,
            _ => {
                debug!("Unhandled request {}", method);
                Err(jsonrpc::Error::method_not_found())
            }
        }
    }

    async fn on_notification(&self, method: &str, params: Value) {
        let handled = match method {
            "initialized" => {
                self.log(MessageType::INFO, "Backend initialized");
                Ok(())
            }
            "textDocument/didOpen" => parse(params).map(|p| self.did_open(p)),
            "textDocument/didChange" => parse(params).map(|p| self.did_change(p)),
            "textDocument/didClose" => parse(params).map(|p| self.did_close(p)),
            _ => {
                debug!("Ignoring notification {}", method);
                Ok(())
            }
        };

        if let Err(e) = handled {
            warn!("Invalid {} params: {}", method, e.message);
        }
    }
}
