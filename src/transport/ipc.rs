//! OS inter-process control channel
//!
//! One JSON message per line over a dedicated stream, separate from the
//! process's stdio.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::protocol::Framing;
use crate::transport::Channel;

pub fn channel<R, W>(reader: R, writer: W) -> Channel
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    Channel::from_streams(Framing::Lines, reader, writer)
}

/// Connects to the control socket the host process listens on.
#[cfg(unix)]
pub async fn connect(path: &std::path::Path) -> std::io::Result<Channel> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    let (reader, writer) = stream.into_split();
    Ok(channel(reader, writer))
}
