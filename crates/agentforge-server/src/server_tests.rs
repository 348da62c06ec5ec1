use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use agentforge_protocols::{CapabilityDescriptor, RequestId};

use super::*;
use crate::handler::{CapabilityHandler, HandlerError};
use crate::handlers::EchoHandler;

/// Counts invocations so tests can assert nothing reached the handler.
struct CountingHandler {
    descriptor: CapabilityDescriptor,
    calls: AtomicUsize,
}

impl CountingHandler {
    fn new() -> Self {
        Self {
            descriptor: CapabilityDescriptor::new("count", "Counts calls"),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CapabilityHandler for CountingHandler {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn handle(&self, _arguments: Value) -> Result<Value, HandlerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({"calls": n}))
    }
}

fn echo_server() -> StdioCapabilityServer {
    let mut server = StdioCapabilityServer::new();
    server.register(Arc::new(EchoHandler::new()));
    server
}

#[tokio::test]
async fn test_ping() {
    let server = echo_server();
    let resp = server
        .handle_line(r#"{"jsonrpc":"2.0","method":"ping","params":{},"id":1}"#)
        .await;
    assert!(!resp.is_error());
    let result = resp.result.unwrap();
    assert_eq!(result["status"], "ok");
    assert_eq!(result["tools"][0], "echo");
}

#[tokio::test]
async fn test_list_capabilities() {
    let server = echo_server();
    let resp = server
        .handle_line(r#"{"jsonrpc":"2.0","method":"tools/list","params":{},"id":2}"#)
        .await;
    let result = resp.result.unwrap();
    let list = result.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["name"], "echo");
    assert_eq!(list[0]["parameters"]["type"], "object");
}

#[tokio::test]
async fn test_invoke_echo() {
    let server = echo_server();
    let resp = server
        .handle_line(
            r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"echo","arguments":{"message":"hi"}},"id":3}"#,
        )
        .await;
    assert!(!resp.is_error());
    let result = resp.result.unwrap();
    assert_eq!(result["echoed"], "hi");
    assert_eq!(result["length"], 2);
}

#[tokio::test]
async fn test_parse_error_answered_with_null_id() {
    let server = echo_server();
    let resp = server.handle_line("this is not json {").await;
    assert!(resp.is_error());
    assert!(resp.id.is_none());
    assert_eq!(resp.error.unwrap().code, -32700);
}

#[tokio::test]
async fn test_unknown_method() {
    let server = echo_server();
    let resp = server
        .handle_line(r#"{"jsonrpc":"2.0","method":"tools/destroy","params":{},"id":4}"#)
        .await;
    assert_eq!(resp.error.unwrap().code, -32601);
    assert_eq!(resp.id, Some(RequestId::Number(4)));
}

#[tokio::test]
async fn test_unknown_capability() {
    let server = echo_server();
    let resp = server
        .handle_line(
            r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"missing","arguments":{}},"id":5}"#,
        )
        .await;
    let err = resp.error.unwrap();
    assert_eq!(err.code, -32603);
    assert!(err.message.contains("missing"));
}

#[tokio::test]
async fn test_missing_method_field() {
    let server = echo_server();
    let resp = server.handle_line(r#"{"jsonrpc":"2.0","id":6}"#).await;
    assert_eq!(resp.error.unwrap().code, -32600);
}

#[tokio::test]
async fn test_register_replaces_same_name() {
    let mut server = StdioCapabilityServer::new();
    server.register(Arc::new(EchoHandler::new()));
    server.register(Arc::new(EchoHandler::new()));
    assert_eq!(server.capability_names(), vec!["echo"]);
}

#[tokio::test]
async fn test_counting_handler_not_invoked_by_list() {
    let handler = Arc::new(CountingHandler::new());
    let mut server = StdioCapabilityServer::new();
    server.register(handler.clone());

    server
        .handle_line(r#"{"jsonrpc":"2.0","method":"tools/list","params":{},"id":1}"#)
        .await;
    server
        .handle_line(r#"{"jsonrpc":"2.0","method":"ping","params":{},"id":2}"#)
        .await;
    assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

    server
        .handle_line(r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"count","arguments":{}},"id":3}"#)
        .await;
    assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_serve_over_duplex_streams() {
    let server = echo_server();
    let (client, server_io) = tokio::io::duplex(4096);
    let (srv_read, srv_write) = tokio::io::split(server_io);

    let serve = tokio::spawn(async move {
        server.serve(BufReader::new(srv_read), srv_write).await
    });

    let (client_read, mut client_write) = tokio::io::split(client);
    let mut responses = BufReader::new(client_read).lines();

    client_write
        .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"params\":{},\"id\":1}\n")
        .await
        .unwrap();
    let line = responses.next_line().await.unwrap().unwrap();
    let resp: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(resp["result"]["status"], "ok");

    // Empty lines are skipped, not answered.
    client_write.write_all(b"\n").await.unwrap();
    client_write
        .write_all(
            b"{\"jsonrpc\":\"2.0\",\"method\":\"tools/call\",\"params\":{\"name\":\"echo\",\"arguments\":{\"message\":\"roundtrip\"}},\"id\":2}\n",
        )
        .await
        .unwrap();
    let line = responses.next_line().await.unwrap().unwrap();
    let resp: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(resp["id"], 2);
    assert_eq!(resp["result"]["echoed"], "roundtrip");

    // Closing the write side ends the serve loop. A dropped `WriteHalf` does
    // not shut down the underlying duplex stream, so close it explicitly.
    client_write.shutdown().await.unwrap();
    drop(client_write);
    serve.await.unwrap().unwrap();
}
