use crate::ids::MonotonicClock;
use crate::types::{ChatEvent, Message, Role, ToolCall};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

const RUN_ERROR_FALLBACK: &str = "An error occurred";

/// Work the controller has to do after an event was folded into the timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEffect {
    ExecuteTool {
        tool_call_id: String,
        tool_name: String,
        args: Value,
        /// Argument text exactly as streamed.
        raw_args: String,
    },
    ToolFailed {
        tool_call_id: String,
        tool_name: String,
        error: String,
    },
    AgentResultArrived {
        tool_call_id: String,
    },
}

/// Folds agent events into the timeline, one event at a time.
#[derive(Debug, Default)]
pub struct ChatEventReducer {
    run_id: Option<String>,
    active_messages: HashSet<String>,
    last_text_message_start: Option<String>,
    tool_calls: HashMap<String, ToolCall>,
    clock: MonotonicClock,
}

impl ChatEventReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.run_id = None;
        self.active_messages.clear();
        self.last_text_message_start = None;
        self.tool_calls.clear();
    }

    pub fn apply(&mut self, timeline: &mut Vec<Message>, event: ChatEvent) -> Vec<TurnEffect> {
        match event {
            ChatEvent::RunStarted { run_id, .. } => {
                if run_id.is_some() {
                    self.run_id = run_id;
                }
            }
            ChatEvent::RunFinished { .. } => {
                self.active_messages.clear();
            }
            ChatEvent::RunError { message } => {
                let text = message
                    .filter(|message| !message.is_empty())
                    .unwrap_or_else(|| RUN_ERROR_FALLBACK.to_string());
                let id = format!("error-{}", self.clock.stamp());
                timeline.push(Message::system(id, format!("Error: {text}")));
            }
            ChatEvent::TextMessageStart { message_id } => {
                let mut message = Message::assistant(message_id.clone());
                message.run_id = self.run_id.clone();
                timeline.push(message);
                self.active_messages.insert(message_id.clone());
                self.last_text_message_start = Some(message_id);
            }
            ChatEvent::TextMessageContent { message_id, delta } => {
                if delta.is_empty() || !self.active_messages.contains(&message_id) {
                    return Vec::new();
                }
                if let Some(message) = find_message(timeline, &message_id) {
                    message.push_text(&delta);
                }
            }
            ChatEvent::TextMessageEnd { message_id } => {
                if !self.active_messages.remove(&message_id) {
                    return Vec::new();
                }
                if let Some(message) = find_message(timeline, &message_id) {
                    if message.text().trim().is_empty() && message.attachments().is_empty() {
                        message.content = None;
                    }
                }
            }
            ChatEvent::ToolCallStart {
                tool_call_id,
                tool_call_name,
                parent_message_id,
            } => {
                let call = ToolCall::new(tool_call_id.clone(), tool_call_name);
                let target = parent_message_id.or_else(|| self.last_text_message_start.clone());
                let attached = match &target {
                    Some(id) => find_message(timeline, id),
                    None => None,
                };
                match attached {
                    Some(message) if message.role == Role::Assistant => {
                        message.tool_calls.push(call.clone());
                    }
                    _ => debug!(
                        tool_call_id = %tool_call_id,
                        "tool call has no assistant message to attach to"
                    ),
                }
                self.tool_calls.insert(tool_call_id, call);
            }
            ChatEvent::ToolCallArgs {
                tool_call_id,
                delta,
            } => {
                let Some(call) = self.tool_calls.get_mut(&tool_call_id) else {
                    return Vec::new();
                };
                if delta.is_empty() {
                    return Vec::new();
                }
                call.function.arguments.push_str(&delta);
                if let Some(attached) = find_tool_call(timeline, &tool_call_id) {
                    attached.function.arguments.clone_from(&call.function.arguments);
                }
            }
            ChatEvent::ToolCallEnd { tool_call_id } => {
                let Some(call) = self.tool_calls.remove(&tool_call_id) else {
                    warn!(tool_call_id = %tool_call_id, "tool call end for unknown call");
                    return Vec::new();
                };
                return vec![self.finish_tool_call(timeline, call)];
            }
            ChatEvent::ToolCallResult {
                tool_call_id,
                content,
            } => {
                timeline.push(Message::tool(
                    format!("tool-result-{tool_call_id}"),
                    tool_call_id.clone(),
                    tool_result_text(&content),
                ));
                return vec![TurnEffect::AgentResultArrived { tool_call_id }];
            }
            ChatEvent::Unknown => {}
        }
        Vec::new()
    }

    fn finish_tool_call(&self, timeline: &mut Vec<Message>, call: ToolCall) -> TurnEffect {
        let raw_args = call.function.arguments;
        let parsed = if raw_args.trim().is_empty() {
            Ok(json!({}))
        } else {
            serde_json::from_str::<Value>(&raw_args)
        };
        match parsed {
            Ok(args) => TurnEffect::ExecuteTool {
                tool_call_id: call.id,
                tool_name: call.function.name,
                args,
                raw_args,
            },
            Err(error) => {
                let error = format!("Invalid arguments for {}: {error}", call.function.name);
                let mut message = Message::tool(
                    format!("tool-error-{}", call.id),
                    call.id.clone(),
                    error.clone(),
                );
                message.error = Some(error.clone());
                timeline.push(message);
                TurnEffect::ToolFailed {
                    tool_call_id: call.id,
                    tool_name: call.function.name,
                    error,
                }
            }
        }
    }
}

fn find_message<'a>(timeline: &'a mut [Message], id: &str) -> Option<&'a mut Message> {
    timeline.iter_mut().rev().find(|message| message.id == id)
}

fn find_tool_call<'a>(timeline: &'a mut [Message], tool_call_id: &str) -> Option<&'a mut ToolCall> {
    timeline
        .iter_mut()
        .rev()
        .filter(|message| message.role == Role::Assistant)
        .flat_map(|message| message.tool_calls.iter_mut())
        .find(|call| call.id == tool_call_id)
}

/// Agent tool results may arrive as MCP content (`{"content":[{"type":"text",...}]}`);
/// anything else is shown verbatim.
pub(super) fn tool_result_text(content: &str) -> String {
    let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(content) else {
        return content.to_string();
    };
    let Some(Value::Array(items)) = payload.get("content") else {
        return content.to_string();
    };
    items
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n")
}
