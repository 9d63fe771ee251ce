use std::path::PathBuf;

use tokio::task::JoinHandle;
use tracing::info;

use crate::capability::Environment;
use crate::error::BridgeError;
use crate::log::init;
use crate::lsp::backend::DocumentBackend;
use crate::router::Router;
use crate::transport::{Channel, Connection, stdio};

/// Where `run_server` takes its messages from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerTransport {
    Stdio,
    Ipc { socket: PathBuf },
}

/// Serves the document backend over `channel` until the peer goes away.
///
/// Returns the router (for in-process callers) and the connection's read
/// task.
pub fn serve(
    channel: Channel,
    environment: Environment,
) -> Result<(Router, JoinHandle<()>), BridgeError> {
    let connection = Connection::new(channel);
    let router = Router::attach(&connection, environment, DocumentBackend::create);
    let task = connection.listen()?;
    Ok((router, task))
}

pub async fn run_server(transport: ServerTransport) -> anyhow::Result<()> {
    let _guard = init()?;

    info!("Starting command-bridge server over {:?}", transport);

    let channel = match transport {
        ServerTransport::Stdio => stdio::stdio(),
        #[cfg(unix)]
        ServerTransport::Ipc { socket } => crate::transport::ipc::connect(&socket).await?,
        #[cfg(not(unix))]
        ServerTransport::Ipc { .. } => {
            anyhow::bail!("IPC transport requires Unix domain sockets")
        }
    };

    let (_router, task) = serve(channel, Environment::Native)?;
    task.await?;

    info!("command-bridge server stopped");
    Ok(())
}
