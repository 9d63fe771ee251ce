//! Protocol layer
//! - message.rs: JSON-RPC message envelope shared by every transport
//! - codec.rs: wire framing for byte-stream transports

pub mod codec;
pub mod message;

pub use codec::{Framing, read_message, write_message};
pub use message::Message;
