use serde::{Deserialize, Serialize};

/// One AG-UI event pushed by the agent while a turn is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatEvent {
    #[serde(rename_all = "camelCase")]
    RunStarted {
        #[serde(default)]
        thread_id: Option<String>,
        #[serde(default)]
        run_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    RunFinished {
        #[serde(default)]
        thread_id: Option<String>,
        #[serde(default)]
        run_id: Option<String>,
    },
    RunError {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TextMessageStart { message_id: String },
    #[serde(rename_all = "camelCase")]
    TextMessageContent { message_id: String, delta: String },
    #[serde(rename_all = "camelCase")]
    TextMessageEnd { message_id: String },
    #[serde(rename_all = "camelCase")]
    ToolCallStart {
        tool_call_id: String,
        tool_call_name: String,
        #[serde(default)]
        parent_message_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolCallArgs { tool_call_id: String, delta: String },
    #[serde(rename_all = "camelCase")]
    ToolCallEnd { tool_call_id: String },
    #[serde(rename_all = "camelCase")]
    ToolCallResult {
        tool_call_id: String,
        content: String,
    },
    #[serde(other)]
    Unknown,
}
