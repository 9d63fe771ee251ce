//! Transport layer
//! - mod.rs: duplex `Channel` shared by every variant
//! - connection.rs: request/response correlation and handler dispatch
//! - worker.rs: in-process message channel
//! - ipc.rs: OS inter-process control channel
//! - stdio.rs: external executable over stdin/stdout

pub mod connection;
pub mod ipc;
pub mod stdio;
pub mod worker;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use crate::error::BridgeError;
use crate::protocol::{Framing, Message, read_message, write_message};

pub use connection::{Connection, ConnectionHandle};

#[async_trait]
pub trait MessageSink: Send {
    async fn send(&mut self, message: Message) -> Result<(), BridgeError>;
}

#[async_trait]
pub trait MessageSource: Send {
    /// Next inbound message; `Ok(None)` once the peer has closed the channel
    async fn recv(&mut self) -> Result<Option<Message>, BridgeError>;
}

/// One physical duplex channel, split into its outbound and inbound halves.
pub struct Channel {
    sink: Box<dyn MessageSink>,
    source: Box<dyn MessageSource>,
}

impl Channel {
    pub fn new(sink: impl MessageSink + 'static, source: impl MessageSource + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }

    /// Channel over a pair of byte streams using `framing`
    pub fn from_streams<R, W>(framing: Framing, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::new(
            StreamSink { framing, writer },
            StreamSource {
                framing,
                reader: BufReader::new(reader),
            },
        )
    }

    pub(crate) fn into_parts(self) -> (Box<dyn MessageSink>, Box<dyn MessageSource>) {
        (self.sink, self.source)
    }
}

struct StreamSink<W> {
    framing: Framing,
    writer: W,
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageSink for StreamSink<W> {
    async fn send(&mut self, message: Message) -> Result<(), BridgeError> {
        write_message(self.framing, &mut self.writer, &message).await
    }
}

struct StreamSource<R> {
    framing: Framing,
    reader: BufReader<R>,
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> MessageSource for StreamSource<R> {
    async fn recv(&mut self) -> Result<Option<Message>, BridgeError> {
        read_message(self.framing, &mut self.reader).await
    }
}
