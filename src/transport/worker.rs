//! In-process worker channel
//!
//! Messages move between the two ends as structured values; nothing is
//! serialized.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BridgeError;
use crate::protocol::Message;
use crate::transport::{Channel, MessageSink, MessageSource};

/// Creates two connected channel ends, like a worker and its host.
pub fn pair() -> (Channel, Channel) {
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();

    (
        Channel::new(WorkerPort(left_tx), WorkerInbox(right_rx)),
        Channel::new(WorkerPort(right_tx), WorkerInbox(left_rx)),
    )
}

struct WorkerPort(mpsc::UnboundedSender<Message>);

#[async_trait]
impl MessageSink for WorkerPort {
    async fn send(&mut self, message: Message) -> Result<(), BridgeError> {
        self.0
            .send(message)
            .map_err(|_| BridgeError::ConnectionClosed)
    }
}

struct WorkerInbox(mpsc::UnboundedReceiver<Message>);

#[async_trait]
impl MessageSource for WorkerInbox {
    async fn recv(&mut self) -> Result<Option<Message>, BridgeError> {
        Ok(self.0.recv().await)
    }
}
