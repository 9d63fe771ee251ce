//! In-process worker transport E2E tests

mod helper;

use std::sync::{Arc, Mutex};

use serde_json::json;
use tower::Service;
use tower_lsp::jsonrpc::ErrorCode;
use tower_lsp::lsp_types::*;

use command_bridge::BridgeError;
use command_bridge::capability::Environment;
use command_bridge::error::SERVER_NOT_INITIALIZED;
use command_bridge::gateway::{Gateway, GatewayConfig, GatewayTransport, bridge, host};
use command_bridge::lsp::backend::DocumentBackend;
use command_bridge::router::{BackendContext, Router};
use command_bridge::sync::{InvalidationPolicy, ViewSync};
use command_bridge::transport::worker;
use helper::{
    clock_backend, connect, create_did_open_notification, create_execute_command_request,
    create_initialize_request, create_initialized_notification, did_open_params, execute_params,
    initialize, initialize_params, wait_for_notification,
};

#[tokio::test]
async fn rejects_requests_before_initialize_and_stays_alive() {
    let (client_channel, server_channel) = worker::pair();
    let (router, client, _notifications) = connect(
        client_channel,
        server_channel,
        Environment::Sandboxed,
        DocumentBackend::create,
    );
    let connection = client.handle();

    for method in ["workspace/executeCommand", "shutdown", "textDocument/hover"] {
        let result = connection
            .send_request(method, execute_params("home-dir", json!({})))
            .await;

        match result {
            Err(BridgeError::Remote(error)) => {
                assert_eq!(error.code, ErrorCode::ServerError(SERVER_NOT_INITIALIZED))
            }
            other => panic!("expected out-of-order error for {}, got {:?}", method, other),
        }
    }
    assert!(!router.is_ready());

    initialize(&connection).await;
    assert!(router.is_ready());
    assert!(!connection.is_closed());
}

#[tokio::test]
async fn forwards_requests_and_notifications_after_initialize() {
    let (client_channel, server_channel) = worker::pair();
    let (_router, client, mut notifications) = connect(
        client_channel,
        server_channel,
        Environment::Sandboxed,
        DocumentBackend::create,
    );
    let connection = client.handle();

    let result = initialize(&connection).await;
    let result: InitializeResult = serde_json::from_value(result).unwrap();
    assert_eq!(result.server_info.unwrap().name, "command-bridge");

    let log = wait_for_notification(&mut notifications, "window/logMessage")
        .await
        .expect("Expected window/logMessage notification");
    let log: LogMessageParams = serde_json::from_value(log).unwrap();
    assert_eq!(log.message, "Backend initializing");

    connection
        .send_notification(
            "textDocument/didOpen",
            did_open_params("file:///a.org", "* TODO Write report"),
        )
        .unwrap();
    let text = connection
        .send_request(
            "workspace/executeCommand",
            execute_params("bridge.document-text", json!({"url": "file:///a.org"})),
        )
        .await
        .unwrap();

    assert_eq!(text, json!("* TODO Write report"));
}

#[tokio::test]
async fn router_is_usable_as_a_service() {
    let (channel, _peer) = worker::pair();
    let server = command_bridge::transport::Connection::new(channel);
    let mut router = Router::attach(&server, Environment::Sandboxed, DocumentBackend::create);

    let response = router.call(create_initialize_request(1)).await.unwrap().unwrap();
    assert!(response.result().is_some());

    assert!(
        router
            .call(create_initialized_notification())
            .await
            .unwrap()
            .is_none()
    );
    router
        .call(create_did_open_notification("file:///a.org", "* NEXT Review"))
        .await
        .unwrap();

    let response = router
        .call(create_execute_command_request(
            2,
            "document-text",
            json!({"url": "file:///a.org"}),
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.result(), Some(&json!("* NEXT Review")));

    let response = router
        .call(create_execute_command_request(3, "nope", json!({})))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.error().unwrap().code, ErrorCode::InvalidParams);
}

#[tokio::test]
async fn second_initialize_reuses_the_backend() {
    let constructed = Arc::new(Mutex::new(0));
    let counter = constructed.clone();
    let (client_channel, server_channel) = worker::pair();
    let (_router, client, _notifications) = connect(
        client_channel,
        server_channel,
        Environment::Sandboxed,
        move |context: BackendContext| {
            *counter.lock().unwrap() += 1;
            DocumentBackend::create(context)
        },
    );
    let connection = client.handle();

    initialize(&connection).await;
    connection
        .send_notification("textDocument/didOpen", did_open_params("file:///a.org", "kept"))
        .unwrap();
    initialize(&connection).await;

    let text = connection
        .send_request(
            "workspace/executeCommand",
            execute_params("document-text", json!({"url": "file:///a.org"})),
        )
        .await
        .unwrap();

    assert_eq!(*constructed.lock().unwrap(), 1);
    assert_eq!(text, json!("kept"));
}

#[tokio::test]
async fn payload_is_loaded_before_construction() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let path = temp_dir.path().join("backend.wasm");
    std::fs::write(&path, b"\0asm\x01\0\0\0").unwrap();
    let payload_url = Url::from_file_path(&path).unwrap();

    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    let (client_channel, server_channel) = worker::pair();
    let (_router, client, _notifications) = connect(
        client_channel,
        server_channel,
        Environment::Native,
        move |context: BackendContext| {
            *sink.lock().unwrap() = context.payload.clone();
            DocumentBackend::create(context)
        },
    );

    client
        .send_request(
            "initialize",
            initialize_params(json!({"payloadUrl": payload_url})),
        )
        .await
        .unwrap();

    assert_eq!(
        seen.lock().unwrap().as_deref(),
        Some(&b"\0asm\x01\0\0\0"[..])
    );
}

#[tokio::test]
async fn unreadable_payload_fails_initialize_without_closing() {
    let (client_channel, server_channel) = worker::pair();
    let (router, client, _notifications) = connect(
        client_channel,
        server_channel,
        Environment::Sandboxed,
        DocumentBackend::create,
    );

    let result = client
        .send_request(
            "initialize",
            initialize_params(json!({"payloadUrl": "file:///opt/backend.wasm"})),
        )
        .await;

    assert!(matches!(result, Err(BridgeError::Remote(_))));
    assert!(!router.is_ready());
    assert!(!client.handle().is_closed());
}

/// Front end -> message bridge -> host panel -> router -> backend, with the
/// view cache on top.
#[tokio::test]
async fn clocking_start_refreshes_clock_status() {
    let (client_channel, server_channel) = worker::pair();
    let (_router, client, _notifications) = connect(
        client_channel,
        server_channel,
        Environment::Sandboxed,
        clock_backend,
    );
    let connection = client.handle();
    initialize(&connection).await;

    let (bridge, port) = bridge::pair();
    host::serve_bridge(port, connection.clone());
    let gateway = Gateway::new(GatewayTransport::Bridge(bridge), GatewayConfig::default());
    let sync = ViewSync::new(Arc::new(gateway), InvalidationPolicy::default());

    let before = sync.query("clocking-status", json!({})).await;
    assert_eq!(before.value, Some(json!({"running": null})));

    let started = sync
        .mutate("clocking-start", json!({"url": "file:///a.org", "line": 12}))
        .await
        .unwrap();
    assert_eq!(started, json!({"ok": true}));

    let after = sync.query("clocking-status", json!({})).await;
    assert_eq!(
        after.value,
        Some(json!({"running": {"url": "file:///a.org", "line": 12}}))
    );
}

#[tokio::test]
async fn subscribed_views_follow_mutations() {
    let (client_channel, server_channel) = worker::pair();
    let (router, _client, _notifications) = connect(
        client_channel,
        server_channel,
        Environment::Sandboxed,
        clock_backend,
    );
    router
        .handle_request("initialize", initialize_params(json!({})))
        .await
        .unwrap();

    let gateway = Gateway::new(
        GatewayTransport::Native(Arc::new(router)),
        GatewayConfig::default(),
    );
    let sync = ViewSync::new(Arc::new(gateway), InvalidationPolicy::default());

    let mut status = sync.subscribe("clocking-status", json!({}));
    status
        .wait_for(|state| state.value.is_some())
        .await
        .unwrap();

    sync.mutate("clocking-start", json!({"url": "file:///a.org", "line": 3}))
        .await
        .unwrap();
    status
        .wait_for(|state| state.value == Some(json!({"running": {"url": "file:///a.org", "line": 3}})))
        .await
        .unwrap();

    sync.mutate("clocking-stop", json!({})).await.unwrap();
    let stopped = status
        .wait_for(|state| state.value == Some(json!({"running": null})))
        .await
        .unwrap()
        .clone();
    assert!(!stopped.is_loading);
}

#[tokio::test]
async fn backend_reads_client_configuration_through_the_relay() {
    let (client_channel, server_channel) = worker::pair();
    let (_router, client, _notifications) = connect(
        client_channel,
        server_channel,
        Environment::Sandboxed,
        helper::ConfigurationBackend::create,
    );
    helper::serve_configuration(&client);
    let connection = client.handle();
    initialize(&connection).await;

    helper::assert_backend_reads_client_configuration(&connection).await;
}
