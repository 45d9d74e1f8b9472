use super::state::ConversationStreamController;
use crate::tools::{PendingToolCall, ToolResult};
use crate::transport::{TurnRequest, TurnStream};
use crate::types::Message;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const TOOL_FAILED_FALLBACK: &str = "Tool execution failed";

pub(super) enum ToolOutcome {
    Completed {
        tool_call_id: String,
        tool_name: String,
        raw_args: String,
        result: ToolResult,
    },
    /// The call never reached the router.
    Failed {
        tool_call_id: String,
        tool_name: String,
        error: String,
    },
}

/// Text sent back to the agent for a locally settled tool call.
pub(super) fn tool_result_content(result: &ToolResult) -> String {
    if !result.success {
        let error = result.error.as_deref().unwrap_or(TOOL_FAILED_FALLBACK);
        return json!({ "error": error }).to_string();
    }
    match &result.data {
        Some(Value::String(text)) => text.clone(),
        Some(data) => data.to_string(),
        None => String::new(),
    }
}

impl ConversationStreamController {
    pub(super) fn spawn_tool(
        &self,
        tool_tx: &mpsc::UnboundedSender<ToolOutcome>,
        tool_call_id: String,
        tool_name: String,
        args: Value,
        raw_args: String,
    ) {
        let router = Arc::clone(&self.shared.router);
        let data_source_id = self.lock().data_source_id.clone();
        let tool_tx = tool_tx.clone();
        debug!(tool = %tool_name, tool_call_id = %tool_call_id, "executing tool");
        tokio::spawn(async move {
            let result = router
                .execute_tool(&tool_name, args, &tool_call_id, data_source_id.as_deref())
                .await;
            let outcome = ToolOutcome::Completed {
                tool_call_id,
                tool_name,
                raw_args,
                result,
            };
            // The turn may have been stopped while the tool ran.
            if tool_tx.send(outcome).is_err() {
                debug!("turn gone; dropping tool result");
            }
        });
    }

    /// Records a finished tool call and, when the result was produced locally,
    /// reports it to the agent. Returns the agent's follow-up stream.
    pub(super) async fn settle_tool(
        &self,
        turn_id: u64,
        cancel: &CancellationToken,
        outcome: ToolOutcome,
        arrived: &HashSet<String>,
    ) -> Result<Option<TurnStream>> {
        let (tool_call_id, tool_name, content) = match outcome {
            ToolOutcome::Completed {
                tool_call_id,
                tool_name,
                raw_args,
                result,
            } => {
                if result.cancelled {
                    debug!(tool_call_id = %tool_call_id, "tool confirmation cancelled; dropping result");
                    return Ok(None);
                }
                if result.waiting_for_agent_response {
                    if !self.lock().is_current(turn_id) {
                        return Ok(None);
                    }
                    if arrived.contains(&tool_call_id) {
                        debug!(tool_call_id = %tool_call_id, "agent result already arrived");
                    } else {
                        self.shared.router.mark_tool_pending(
                            &tool_call_id,
                            PendingToolCall {
                                id: tool_call_id.clone(),
                                name: tool_name,
                                args: raw_args,
                            },
                        );
                    }
                    return Ok(None);
                }
                let content = tool_result_content(&result);
                (tool_call_id, tool_name, content)
            }
            ToolOutcome::Failed {
                tool_call_id,
                tool_name,
                error,
            } => (tool_call_id, tool_name, json!({ "error": error }).to_string()),
        };

        let (request, snapshot) = {
            let mut state = self.lock();
            if !state.is_current(turn_id) {
                debug!(turn_id, tool_call_id = %tool_call_id, "dropping tool result for stale turn");
                return Ok(None);
            }
            let history = state.persistable();
            let message = Message::tool(
                format!("tool-result-{tool_call_id}"),
                tool_call_id.clone(),
                content,
            );
            state.timeline.push(message.clone());
            let request = TurnRequest {
                conversation_id: self.shared.transport.conversation_id(),
                message,
                history,
            };
            (request, self.take_snapshot(&mut state))
        };
        self.persist(snapshot).await;

        debug!(tool = %tool_name, tool_call_id = %tool_call_id, "sending tool result to agent");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            sent = self.shared.transport.send_turn(request) => sent
                .map(Some)
                .with_context(|| format!("failed to send result of {tool_name}")),
        }
    }
}
