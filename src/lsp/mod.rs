// Reference backend and server entry point
// - server.rs: wires a transport, a connection and the router together
// - backend.rs: document-sync backend exposing capabilities as commands
pub mod backend;
pub mod server;
