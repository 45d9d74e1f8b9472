use super::confirmation::ConfirmationGate;
use super::ledger::{PendingToolCall, PendingToolLedger};
use super::registry::{ActionRegistry, ActionRequest, Authorization};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

const USER_REJECTED_ERROR: &str = "User rejected the tool execution";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    RegisteredAction,
    AgentTool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ToolSource>,
    /// The agent runs this tool itself and reports back with a result event.
    #[serde(default, skip_serializing_if = "is_false")]
    pub waiting_for_agent_response: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub user_rejected: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub cancelled: bool,
}

impl ToolResult {
    fn registered(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            source: Some(ToolSource::RegisteredAction),
            ..Self::default()
        }
    }

    fn awaiting_agent() -> Self {
        Self {
            success: true,
            data: Some(json!({ "acknowledged": true })),
            source: Some(ToolSource::AgentTool),
            waiting_for_agent_response: true,
            ..Self::default()
        }
    }

    fn failed(source: Option<ToolSource>, error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            source,
            ..Self::default()
        }
    }

    fn rejected(tool_name: &str, args: Value) -> Self {
        Self {
            success: false,
            error: Some(USER_REJECTED_ERROR.to_string()),
            data: Some(json!({
                "message": format!("The user rejected the execution of {tool_name}"),
                "toolName": tool_name,
                "args": args,
            })),
            user_rejected: true,
            ..Self::default()
        }
    }

    fn cancelled() -> Self {
        Self {
            success: false,
            cancelled: true,
            ..Self::default()
        }
    }
}

/// Shallow merge of `overlay` into `base`; keys in `overlay` win. A
/// non-object on either side makes `overlay` replace `base` outright.
pub fn merge_args(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            base.extend(overlay);
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

/// Decides how a tool call requested by the agent gets fulfilled.
pub struct ToolExecutionRouter {
    registry: Arc<dyn ActionRegistry>,
    gate: Arc<ConfirmationGate>,
    ledger: PendingToolLedger,
}

impl ToolExecutionRouter {
    pub fn new(registry: Arc<dyn ActionRegistry>, gate: Arc<ConfirmationGate>) -> Self {
        Self {
            registry,
            gate,
            ledger: PendingToolLedger::new(),
        }
    }

    pub fn gate(&self) -> &Arc<ConfirmationGate> {
        &self.gate
    }

    pub fn registry(&self) -> &Arc<dyn ActionRegistry> {
        &self.registry
    }

    /// Runs `tool_name`, asking for confirmation first when the registry says
    /// so. Every outcome is encoded in the returned [`ToolResult`].
    pub async fn execute_tool(
        &self,
        tool_name: &str,
        args: Value,
        tool_call_id: &str,
        data_source_id: Option<&str>,
    ) -> ToolResult {
        match self
            .route(tool_name, args, tool_call_id, data_source_id)
            .await
        {
            Ok(result) => result,
            Err(error) => {
                warn!(tool = tool_name, tool_call_id, error = %format!("{error:#}"), "tool routing failed");
                ToolResult::failed(None, format!("{error:#}"))
            }
        }
    }

    async fn route(
        &self,
        tool_name: &str,
        mut args: Value,
        tool_call_id: &str,
        data_source_id: Option<&str>,
    ) -> Result<ToolResult> {
        let requires_confirmation = self
            .registry
            .is_confirmation_required(tool_name)
            .with_context(|| format!("failed to check whether {tool_name} needs confirmation"))?;

        let authorization = if requires_confirmation {
            let response = self
                .gate
                .request_confirmation(
                    tool_name,
                    tool_call_id,
                    args.clone(),
                    self.registry.describe(tool_name),
                )
                .await;
            if response.cancelled {
                debug!(tool = tool_name, tool_call_id, "confirmation cancelled");
                return Ok(ToolResult::cancelled());
            }
            if !response.approved {
                debug!(tool = tool_name, tool_call_id, "confirmation rejected");
                return Ok(ToolResult::rejected(tool_name, args));
            }
            if let Some(modified) = response.modified_args {
                args = merge_args(args, modified);
            }
            Authorization::Confirmed
        } else {
            Authorization::NotRequired
        };

        if let Some(data_source_id) = data_source_id {
            args = merge_args(args, json!({ "dataSourceId": data_source_id }));
        }

        let request = ActionRequest {
            tool_name: tool_name.to_string(),
            args,
            authorization,
        };
        match self.registry.execute(request).await {
            Ok(data) => {
                debug!(tool = tool_name, tool_call_id, "registered action completed");
                Ok(ToolResult::registered(data))
            }
            Err(error) if error.is_not_registered() => {
                debug!(tool = tool_name, tool_call_id, "no registered action; deferring to agent");
                Ok(ToolResult::awaiting_agent())
            }
            Err(error) => {
                warn!(tool = tool_name, tool_call_id, %error, "registered action failed");
                Ok(ToolResult::failed(
                    Some(ToolSource::RegisteredAction),
                    error.to_string(),
                ))
            }
        }
    }

    pub fn mark_tool_pending(&self, tool_call_id: &str, call: PendingToolCall) {
        self.ledger.mark_tool_pending(tool_call_id, call);
    }

    pub fn is_pending_agent_response(&self, tool_call_id: &str) -> bool {
        self.ledger.is_pending_agent_response(tool_call_id)
    }

    pub fn pending_tool(&self, tool_call_id: &str) -> Option<PendingToolCall> {
        self.ledger.pending_tool(tool_call_id)
    }

    pub fn clear_pending_tool(&self, tool_call_id: &str) {
        self.ledger.clear_pending_tool(tool_call_id);
    }

    pub fn clear_all_pending_tools(&self) {
        self.ledger.clear_all_pending_tools();
    }
}
