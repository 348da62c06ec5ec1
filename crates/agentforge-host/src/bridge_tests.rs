use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;

use crate::config::ServerSpec;

use super::*;

/// Host-side capability that records how often it actually ran.
struct CountingLocal {
    calls: AtomicUsize,
}

impl CountingLocal {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalCapability for CountingLocal {
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::new("shout", "Up-cases a message").with_parameters(json!({
            "type": "object",
            "properties": {"message": {"type": "string"}},
            "required": ["message"]
        }))
    }

    async fn invoke(&self, arguments: Value) -> Result<Value, BridgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let message = arguments["message"].as_str().unwrap_or_default();
        Ok(json!({"shouted": message.to_uppercase()}))
    }
}

fn bridge_with_local() -> (CapabilityBridge, Arc<CountingLocal>) {
    let supervisor = Arc::new(ServerSupervisor::default());
    let bridge = CapabilityBridge::new(supervisor);
    let local = CountingLocal::new();
    bridge.register_local(local.clone());
    (bridge, local)
}

/// Supervisor with one shell-backed server already Ready. The script answers
/// the discovery request, then runs `body` against subsequent requests.
async fn shell_supervisor(advertised: &str, body: &str) -> Arc<ServerSupervisor> {
    let script = format!(
        "read line; echo '{{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}}'; {}",
        advertised, body
    );
    let supervisor = Arc::new(ServerSupervisor::default());
    supervisor
        .register(ServerSpec::new("shell", "sh").with_args(["-c", script.as_str()]))
        .unwrap();
    supervisor.start("shell").await.unwrap();
    supervisor
}

const SHOUT_DESCRIPTOR: &str = r#"[{"name":"shout","description":"up-cases text","parameters":{"type":"object","properties":{"message":{"type":"string"}},"required":["message"]}}]"#;

#[tokio::test]
async fn test_local_capability_round_trip() {
    let (bridge, local) = bridge_with_local();

    let result = bridge
        .invoke("shout", json!({"message": "quiet"}))
        .await
        .unwrap();
    assert_eq!(result["shouted"], "QUIET");
    assert_eq!(local.calls(), 1);
}

#[tokio::test]
async fn test_invalid_arguments_never_reach_the_capability() {
    let (bridge, local) = bridge_with_local();

    let err = bridge
        .invoke("shout", json!({"count": 1}))
        .await
        .unwrap_err();
    match err {
        BridgeError::InvalidArguments { name, issues } => {
            assert_eq!(name, "shout");
            assert!(issues.iter().any(|i| i.contains("message")), "{:?}", issues);
        }
        other => panic!("expected InvalidArguments, got {:?}", other),
    }
    assert_eq!(local.calls(), 0);
}

#[tokio::test]
async fn test_wrong_argument_type_rejected() {
    let (bridge, local) = bridge_with_local();

    let err = bridge
        .invoke("shout", json!({"message": 42}))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArguments { .. }));
    assert_eq!(local.calls(), 0);
}

#[tokio::test]
async fn test_unknown_capability_not_found() {
    let (bridge, _) = bridge_with_local();

    let err = bridge.invoke("whisper", json!({})).await.unwrap_err();
    assert!(matches!(err, BridgeError::NotFound(_)));
}

#[tokio::test]
async fn test_server_capability_resolves_and_invokes() {
    let body = concat!(
        "read line; ",
        r#"echo '{"jsonrpc":"2.0","id":2,"result":{"shouted":"HI"}}'; "#,
        "cat >/dev/null"
    );
    let supervisor = shell_supervisor(SHOUT_DESCRIPTOR, body).await;
    let bridge = CapabilityBridge::new(supervisor.clone());

    let bound = bridge.resolve("shout").unwrap();
    assert_eq!(bound.origin(), "server:shell");

    let result = bound.invoke(json!({"message": "hi"})).await.unwrap();
    assert_eq!(result["shouted"], "HI");
    supervisor.stop("shell").await.unwrap();
}

#[tokio::test]
async fn test_server_validation_failure_costs_no_round_trip() {
    // The script would answer nothing after discovery; an invalid call must
    // fail locally instead of hanging on the wire.
    let supervisor = shell_supervisor(SHOUT_DESCRIPTOR, "cat >/dev/null").await;
    let bridge = CapabilityBridge::new(supervisor.clone());

    let err = bridge
        .invoke("shout", json!({"volume": 11}))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArguments { .. }));
    supervisor.stop("shell").await.unwrap();
}

#[tokio::test]
async fn test_execution_error_carries_server_payload() {
    let body = concat!(
        "read line; ",
        r#"echo '{"jsonrpc":"2.0","id":2,"error":{"code":-32603,"message":"boom"}}'; "#,
        "cat >/dev/null"
    );
    let supervisor = shell_supervisor(SHOUT_DESCRIPTOR, body).await;
    let bridge = CapabilityBridge::new(supervisor.clone());

    let err = bridge
        .invoke("shout", json!({"message": "hi"}))
        .await
        .unwrap_err();
    match err {
        BridgeError::ToolExecutionError { name, error } => {
            assert_eq!(name, "shout");
            assert_eq!(error.code, -32603);
            assert_eq!(error.message, "boom");
        }
        other => panic!("expected ToolExecutionError, got {:?}", other),
    }
    supervisor.stop("shell").await.unwrap();
}

#[tokio::test]
async fn test_timeout_maps_to_unavailable() {
    let supervisor = shell_supervisor(SHOUT_DESCRIPTOR, "cat >/dev/null").await;
    let bridge = CapabilityBridge::new(supervisor.clone());

    let bound = bridge.resolve("shout").unwrap();
    let err = bound
        .invoke_within(json!({"message": "hi"}), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::ToolUnavailable {
            reason: UnavailableReason::Timeout,
            ..
        }
    ));
    supervisor.stop("shell").await.unwrap();
}

#[tokio::test]
async fn test_stopped_server_maps_to_unavailable() {
    let supervisor = shell_supervisor(SHOUT_DESCRIPTOR, "cat >/dev/null").await;
    let bridge = CapabilityBridge::new(supervisor.clone());

    let bound = bridge.resolve("shout").unwrap();
    supervisor.stop("shell").await.unwrap();

    let err = bound.invoke(json!({"message": "hi"})).await.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::ToolUnavailable {
            reason: UnavailableReason::ServerUnavailable,
            ..
        }
    ));
    // A stopped server's capabilities also vanish from resolution.
    assert!(matches!(
        bridge.resolve("shout").unwrap_err(),
        BridgeError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_binding_goes_stale_after_restart() {
    let supervisor = shell_supervisor(SHOUT_DESCRIPTOR, "cat >/dev/null").await;
    let bridge = CapabilityBridge::new(supervisor.clone());

    let bound = bridge.resolve("shout").unwrap();
    supervisor.restart("shell").await.unwrap();

    let err = bound.invoke(json!({"message": "hi"})).await.unwrap_err();
    assert!(matches!(err, BridgeError::StaleBinding(_)));

    // Re-resolving against the new generation works.
    let fresh = bridge.resolve("shout").unwrap();
    assert_eq!(fresh.origin(), "server:shell");
    supervisor.stop("shell").await.unwrap();
}

#[tokio::test]
async fn test_local_shadows_server_of_same_name() {
    let supervisor = shell_supervisor(
        r#"[{"name":"shout"},{"name":"whisper"}]"#,
        "cat >/dev/null",
    )
    .await;
    let bridge = CapabilityBridge::new(supervisor.clone());
    let local = CountingLocal::new();
    bridge.register_local(local.clone());

    // Dispatch goes to the local implementation.
    let result = bridge
        .invoke("shout", json!({"message": "quiet"}))
        .await
        .unwrap();
    assert_eq!(result["shouted"], "QUIET");
    assert_eq!(local.calls(), 1);

    // The report makes the shadowing visible.
    let report = bridge.report();
    let shout = report
        .capabilities
        .iter()
        .find(|e| e.name == "shout")
        .unwrap();
    assert_eq!(shout.origin, "local");
    assert_eq!(shout.shadowed, vec!["server:shell"]);

    let whisper = report
        .capabilities
        .iter()
        .find(|e| e.name == "whisper")
        .unwrap();
    assert_eq!(whisper.origin, "server:shell");
    assert!(whisper.shadowed.is_empty());

    supervisor.stop("shell").await.unwrap();
}

#[tokio::test]
async fn test_descriptors_lists_each_name_once() {
    let supervisor = shell_supervisor(
        r#"[{"name":"shout"},{"name":"whisper"}]"#,
        "cat >/dev/null",
    )
    .await;
    let bridge = CapabilityBridge::new(supervisor.clone());
    bridge.register_local(CountingLocal::new());

    let descriptors = bridge.descriptors();
    let mut names: Vec<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["shout", "whisper"]);

    supervisor.stop("shell").await.unwrap();
}
