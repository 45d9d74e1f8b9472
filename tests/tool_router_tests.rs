use anyhow::bail;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use turnkeeper::tools::{
    ConfirmationGate, RegisteredActions, ToolDefinition, ToolExecutionRouter, ToolSource,
};

fn definition(name: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: format!("Runs {name}"),
        parameters: json!({"type": "object"}),
    }
}

fn router_with(actions: RegisteredActions) -> (Arc<ToolExecutionRouter>, Arc<ConfirmationGate>) {
    let gate = Arc::new(ConfirmationGate::new());
    let router = Arc::new(ToolExecutionRouter::new(
        Arc::new(actions),
        Arc::clone(&gate),
    ));
    (router, gate)
}

async fn first_pending(gate: &ConfirmationGate) -> String {
    let mut pending = gate.subscribe_to_pending();
    tokio::time::timeout(
        Duration::from_secs(5),
        pending.wait_for(|requests| !requests.is_empty()),
    )
    .await
    .expect("confirmation requested in time")
    .expect("gate alive");
    gate.pending_confirmations()[0].id.clone()
}

#[tokio::test]
async fn test_unregistered_tool_defers_to_agent() {
    let (router, gate) = router_with(RegisteredActions::new());

    let result = router
        .execute_tool("search_logs", json!({"q": "500"}), "call-1", None)
        .await;

    assert!(result.success);
    assert!(result.waiting_for_agent_response);
    assert_eq!(result.source, Some(ToolSource::AgentTool));
    assert!(!gate.has_pending_confirmations());
}

#[tokio::test]
async fn test_registered_action_failure_is_reported_in_result() {
    let actions = RegisteredActions::new();
    actions.register(definition("reindex"), false, |_request| async {
        bail!("cluster is read-only")
    });
    let (router, _gate) = router_with(actions);

    let result = router.execute_tool("reindex", json!({}), "call-1", None).await;

    assert!(!result.success);
    assert_eq!(result.source, Some(ToolSource::RegisteredAction));
    assert!(result
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("cluster is read-only"));
}

#[tokio::test]
async fn test_gated_action_runs_after_approval_with_merged_args() {
    let actions = RegisteredActions::new();
    actions.register(definition("scale"), true, |request| async move { Ok(request.args) });
    let (router, gate) = router_with(actions);

    let task = {
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            router
                .execute_tool("scale", json!({"replicas": 2, "index": "logs"}), "call-1", Some("ds-1"))
                .await
        })
    };
    let id = first_pending(&gate).await;
    gate.approve(&id, Some(json!({"replicas": 4})));

    let result = task.await.expect("router task");
    assert!(result.success);
    assert_eq!(
        result.data,
        Some(json!({"replicas": 4, "index": "logs", "dataSourceId": "ds-1"}))
    );
    assert!(!gate.has_pending_confirmations());
}

#[tokio::test]
async fn test_gated_action_rejection_and_teardown() {
    let actions = RegisteredActions::new();
    actions.register(definition("drop_index"), true, |_request| async {
        Ok(json!("dropped"))
    });
    let (router, gate) = router_with(actions);

    let rejected = {
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            router
                .execute_tool("drop_index", json!({"index": "a"}), "call-1", None)
                .await
        })
    };
    let id = first_pending(&gate).await;
    gate.reject(&id);
    let result = rejected.await.expect("router task");
    assert!(result.user_rejected);
    assert_eq!(result.error.as_deref(), Some("User rejected the tool execution"));
    assert_eq!(result.data.as_ref().map(|data| data["toolName"].clone()), Some(json!("drop_index")));

    let cancelled = {
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            router
                .execute_tool("drop_index", json!({"index": "b"}), "call-2", None)
                .await
        })
    };
    first_pending(&gate).await;
    gate.clean_all();
    let result = cancelled.await.expect("router task");
    assert!(result.cancelled);
    assert!(!result.success);
}

#[tokio::test]
async fn test_concurrent_confirmations_resolve_independently() {
    let actions = RegisteredActions::new();
    actions.register(definition("restart"), true, |request| async move {
        Ok(request.args["node"].clone())
    });
    let (router, gate) = router_with(actions);

    let mut pending = gate.subscribe_to_pending();
    let first = {
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            router
                .execute_tool("restart", json!({"node": "n1"}), "call-1", None)
                .await
        })
    };
    let second = {
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            router
                .execute_tool("restart", json!({"node": "n2"}), "call-2", None)
                .await
        })
    };
    tokio::time::timeout(
        Duration::from_secs(5),
        pending.wait_for(|requests| requests.len() == 2),
    )
    .await
    .expect("both requested")
    .expect("gate alive");

    let requests = gate.pending_confirmations();
    let by_call = |call: &str| {
        requests
            .iter()
            .find(|request| request.tool_call_id == call)
            .map(|request| request.id.clone())
            .expect("request for call")
    };
    gate.reject(&by_call("call-2"));
    gate.approve(&by_call("call-1"), None);

    let first = first.await.expect("first task");
    let second = second.await.expect("second task");
    assert_eq!(first.data, Some(json!("n1")));
    assert!(second.user_rejected);
    assert!(!gate.has_pending_confirmations());
}

#[tokio::test]
async fn test_caller_can_time_out_a_confirmation() {
    let gate = ConfirmationGate::new();
    let pending = gate.begin_confirmation("restart", "call-1", json!({}), None);
    let id = pending.id().to_string();

    let waited = tokio::time::timeout(Duration::from_millis(20), pending.wait()).await;
    assert!(waited.is_err());

    gate.reject(&id);
    assert!(!gate.has_pending_confirmations());
}
