//! Host side of the message bridge (the editor panel)

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::gateway::EXECUTE_COMMAND;
use crate::gateway::bridge::{BridgeReply, BridgeRequest, HostPort};
use crate::transport::ConnectionHandle;

/// Forwards every bridge request to the language connection as
/// `workspace/executeCommand` and posts the outcome back.
///
/// Requests are handled concurrently; the task ends when the front end
/// drops its bridge.
pub fn serve_bridge(port: HostPort, connection: ConnectionHandle) -> JoinHandle<()> {
    let HostPort {
        mut requests,
        replies,
    } = port;

    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            let connection = connection.clone();
            let replies = replies.clone();

            tokio::spawn(async move {
                let BridgeRequest {
                    id,
                    command,
                    arguments,
                } = request;
                debug!("Bridge request {} for {}", id, command);

                let params = serde_json::json!({"command": command, "arguments": arguments});
                let reply = match connection.send_request(EXECUTE_COMMAND, params).await {
                    Ok(result) => BridgeReply::ok(id, result),
                    Err(e) => {
                        warn!("Command {} failed: {}", command, e);
                        BridgeReply::err(id, e.into())
                    }
                };

                if replies.send(reply).is_err() {
                    debug!("Front end went away before reply {}", id);
                }
            });
        }
    })
}
