//! Capability layer
//! - mod.rs: tagged capability set handed to the backend
//! - native.rs: filesystem, process and home directory on the local OS
//! - relay.rs: outbound requests/notifications to the connected client

pub mod native;
pub mod relay;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tower_lsp::lsp_types::Url;

use crate::error::BridgeError;

pub use native::{NativeFileSystem, NativeHomeDirectory, NativeProcess};
pub use relay::ClientRelay;

/// Environment primitives a backend may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    HomeDir,
    ReadToString,
    Write,
    Execute,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::HomeDir => "homeDir",
            Capability::ReadToString => "readToString",
            Capability::Write => "write",
            Capability::Execute => "execute",
        };
        f.write_str(name)
    }
}

/// Where the router runs, which decides the capability profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    /// Full OS access: filesystem, processes, home directory
    Native,
    /// Worker without filesystem or process access; only the client relay
    Sandboxed,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Native => f.write_str("native"),
            Environment::Sandboxed => f.write_str("sandboxed worker"),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Reads a resource, returning an empty string when it does not exist
    async fn read_to_string(&self, uri: &Url) -> Result<String, BridgeError>;

    async fn write(&self, uri: &Url, text: &str) -> Result<(), BridgeError>;
}

#[async_trait]
pub trait Process: Send + Sync {
    /// Writes `text` to a scratch file, runs `executable` on it and returns stdout
    async fn execute(&self, executable: &str, text: &str) -> Result<String, BridgeError>;
}

pub trait HomeDirectory: Send + Sync {
    /// Home directory as a directory URI (trailing slash)
    fn home_dir(&self) -> Result<Url, BridgeError>;
}

/// Capabilities injected into a backend.
///
/// Each environment primitive is optional. Calling one that the environment
/// did not supply fails with [`BridgeError::Unsupported`] naming both the
/// capability and the environment; the client relay is always present.
#[derive(Clone)]
pub struct CapabilitySet {
    environment: Environment,
    home: Option<Arc<dyn HomeDirectory>>,
    fs: Option<Arc<dyn FileSystem>>,
    process: Option<Arc<dyn Process>>,
    client: ClientRelay,
}

impl CapabilitySet {
    /// Empty set for `environment`; only the client relay is available.
    pub fn new(environment: Environment, client: ClientRelay) -> Self {
        Self {
            environment,
            home: None,
            fs: None,
            process: None,
            client,
        }
    }

    /// Every capability backed by the local OS
    pub fn native(client: ClientRelay) -> Self {
        Self::new(Environment::Native, client)
            .with_home_directory(Arc::new(NativeHomeDirectory))
            .with_file_system(Arc::new(NativeFileSystem))
            .with_process(Arc::new(NativeProcess))
    }

    pub fn sandboxed(client: ClientRelay) -> Self {
        Self::new(Environment::Sandboxed, client)
    }

    pub fn for_environment(environment: Environment, client: ClientRelay) -> Self {
        match environment {
            Environment::Native => Self::native(client),
            Environment::Sandboxed => Self::sandboxed(client),
        }
    }

    pub fn with_home_directory(mut self, home: Arc<dyn HomeDirectory>) -> Self {
        self.home = Some(home);
        self
    }

    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn with_process(mut self, process: Arc<dyn Process>) -> Self {
        self.process = Some(process);
        self
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::HomeDir => self.home.is_some(),
            Capability::ReadToString | Capability::Write => self.fs.is_some(),
            Capability::Execute => self.process.is_some(),
        }
    }

    pub fn home_dir(&self) -> Result<Url, BridgeError> {
        self.home
            .as_ref()
            .ok_or_else(|| self.unsupported(Capability::HomeDir))?
            .home_dir()
    }

    pub async fn read_to_string(&self, uri: &Url) -> Result<String, BridgeError> {
        self.fs
            .as_ref()
            .ok_or_else(|| self.unsupported(Capability::ReadToString))?
            .read_to_string(uri)
            .await
    }

    pub async fn write(&self, uri: &Url, text: &str) -> Result<(), BridgeError> {
        self.fs
            .as_ref()
            .ok_or_else(|| self.unsupported(Capability::Write))?
            .write(uri, text)
            .await
    }

    pub async fn execute(&self, executable: &str, text: &str) -> Result<String, BridgeError> {
        self.process
            .as_ref()
            .ok_or_else(|| self.unsupported(Capability::Execute))?
            .execute(executable, text)
            .await
    }

    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        self.client.send_request(method, params).await
    }

    pub fn send_notification(&self, method: &str, params: Value) -> Result<(), BridgeError> {
        self.client.send_notification(method, params)
    }

    pub fn client(&self) -> &ClientRelay {
        &self.client
    }

    /// Resolves `path` against `base`, expanding a leading `~/` to the home
    /// directory when that capability is available.
    pub fn resolve_in(&self, path: &str, base: &Url) -> Result<Url, BridgeError> {
        if let Some(rest) = path.strip_prefix("~/")
            && let Ok(home) = self.home_dir()
        {
            return home
                .join(rest)
                .map_err(|e| BridgeError::Malformed(e.to_string()));
        }

        base.join(path)
            .map_err(|e| BridgeError::Malformed(e.to_string()))
    }

    fn unsupported(&self, capability: Capability) -> BridgeError {
        BridgeError::unsupported(capability, self.environment)
    }
}
