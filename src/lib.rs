pub mod api;
pub mod capability;
pub mod config;
pub mod error;
pub mod gateway;
pub mod log;
pub mod lsp;
pub mod protocol;
pub mod router;
pub mod sync;
pub mod transport;

pub use error::BridgeError;
