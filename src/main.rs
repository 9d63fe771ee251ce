use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use command_bridge::config::DEFAULT_API_PORT;
use command_bridge::lsp::server::{ServerTransport, run_server};

#[derive(Parser, Debug)]
#[command(name = "command-bridge")]
#[command(about = "Routes editor front-end commands to a shared language backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Transport {
    /// Content-Length framed messages on stdin/stdout
    Stdio,
    /// Newline-delimited messages on a Unix socket
    Ipc,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the router with native capabilities
    Serve {
        #[arg(long, value_enum, default_value = "stdio")]
        transport: Transport,

        /// Control socket to connect to (ipc transport only)
        #[arg(long, required_if_eq("transport", "ipc"))]
        socket: Option<PathBuf>,
    },
    /// Serve POST /api/command for clients without an embedding bridge
    Api {
        #[arg(long, default_value_t = DEFAULT_API_PORT)]
        port: u16,

        /// Documents to open before serving
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match Cli::parse().command {
        Command::Serve { transport, socket } => {
            let transport = match (transport, socket) {
                (Transport::Stdio, _) => ServerTransport::Stdio,
                (Transport::Ipc, Some(socket)) => ServerTransport::Ipc { socket },
                (Transport::Ipc, None) => anyhow::bail!("--socket is required for ipc"),
            };
            run_server(transport).await
        }
        Command::Api { port, files } => command_bridge::api::serve(port, files).await,
    }
}
