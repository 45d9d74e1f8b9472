use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Binary(BinaryContent),
}

/// Inline attachment, typically an uploaded image, carried as base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryContent {
    pub mime_type: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON argument text, accumulated while streaming.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: String::new(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Stand-in for an assistant reply that has not started streaming yet.
    /// Never serialized, so it cannot leak into storage or the agent history.
    #[serde(skip)]
    pub loading: bool,
}

impl Message {
    fn bare(id: String, role: Role) -> Self {
        Self {
            id,
            role,
            content: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            error: None,
            run_id: None,
            loading: false,
        }
    }

    pub fn user(id: impl Into<String>, content: MessageContent) -> Self {
        let mut message = Self::bare(id.into(), Role::User);
        message.content = Some(content);
        message
    }

    pub fn assistant(id: impl Into<String>) -> Self {
        Self::bare(id.into(), Role::Assistant)
    }

    pub fn tool(
        id: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut message = Self::bare(id.into(), Role::Tool);
        message.content = Some(MessageContent::Text(content.into()));
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    pub fn system(id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut message = Self::bare(id.into(), Role::System);
        message.content = Some(MessageContent::Text(text.into()));
        message
    }

    pub fn loading(id: impl Into<String>) -> Self {
        let mut message = Self::bare(id.into(), Role::Assistant);
        message.loading = true;
        message
    }

    /// Concatenated text of the message; binary parts are skipped.
    pub fn text(&self) -> String {
        match &self.content {
            None => String::new(),
            Some(MessageContent::Text(text)) => text.clone(),
            Some(MessageContent::Parts(parts)) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Binary(_) => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn attachments(&self) -> Vec<BinaryContent> {
        match &self.content {
            Some(MessageContent::Parts(parts)) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Binary(binary) => Some(binary.clone()),
                    ContentPart::Text { .. } => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn push_text(&mut self, delta: &str) {
        match &mut self.content {
            Some(MessageContent::Text(text)) => text.push_str(delta),
            Some(MessageContent::Parts(parts)) => parts.push(ContentPart::Text {
                text: delta.to_string(),
            }),
            None => self.content = Some(MessageContent::Text(delta.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wire_shape_uses_camel_case_and_skips_empty_fields() {
        let mut message = Message::assistant("msg-1");
        message.push_text("hello");
        message.run_id = Some("run-1".to_string());
        let mut call = ToolCall::new("call-1", "search");
        call.function.arguments = "{\"q\":1}".to_string();
        message.tool_calls.push(call);

        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(
            value,
            json!({
                "id": "msg-1",
                "role": "assistant",
                "content": "hello",
                "runId": "run-1",
                "toolCalls": [{
                    "id": "call-1",
                    "type": "function",
                    "function": {"name": "search", "arguments": "{\"q\":1}"}
                }]
            })
        );
    }

    #[test]
    fn test_loading_flag_is_never_serialized() {
        let placeholder = Message::loading("loading-1");
        let value = serde_json::to_value(&placeholder).expect("serialize");
        assert!(value.get("loading").is_none());

        let restored: Message = serde_json::from_value(value).expect("deserialize");
        assert!(!restored.loading);
    }

    #[test]
    fn test_text_and_attachments_from_parts() {
        let image = BinaryContent {
            mime_type: "image/png".to_string(),
            data: "aGk=".to_string(),
            filename: None,
        };
        let message = Message::user(
            "msg-2",
            MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "look".to_string(),
                },
                ContentPart::Binary(image.clone()),
            ]),
        );

        assert_eq!(message.text(), "look");
        assert_eq!(message.attachments(), vec![image]);

        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["content"][1]["type"], "binary");
        assert_eq!(value["content"][1]["mimeType"], "image/png");
    }
}
