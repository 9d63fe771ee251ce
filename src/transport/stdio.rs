//! External executable transport
//!
//! LSP base-protocol framing over stdin/stdout. Spawning or restarting the
//! process is the caller's business; this only plumbs its pipes.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{ChildStdin, ChildStdout};

use crate::protocol::Framing;
use crate::transport::Channel;

/// Channel over this process's own stdin/stdout
pub fn stdio() -> Channel {
    channel(tokio::io::stdin(), tokio::io::stdout())
}

/// Channel over the pipes of an already spawned child
pub fn child(stdout: ChildStdout, stdin: ChildStdin) -> Channel {
    channel(stdout, stdin)
}

pub fn channel<R, W>(reader: R, writer: W) -> Channel
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    Channel::from_streams(Framing::ContentLength, reader, writer)
}
