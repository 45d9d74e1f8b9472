mod http;
mod logging;
mod sse;

pub use http::HttpAgentTransport;
pub use sse::SseEventParser;

use crate::types::{ChatEvent, Message};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Events of one agent run, in emission order.
pub type TurnStream = BoxStream<'static, Result<ChatEvent>>;

#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub conversation_id: String,
    /// The new user message, or a tool result being reported back.
    pub message: Message,
    /// Everything before `message`, oldest first.
    pub history: Vec<Message>,
}

impl TurnRequest {
    pub fn text(&self) -> String {
        self.message.text()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_turn(&self, request: TurnRequest) -> Result<TurnStream>;

    /// Abort whatever run is in flight. Must be harmless when nothing is.
    fn abort(&self);

    /// Forget the finished run without cancelling it. Called when the agent
    /// reports the run as finished.
    fn reset_connection(&self) {}

    fn new_conversation_id(&self) -> String;

    fn conversation_id(&self) -> String;

    fn set_conversation_id(&self, id: &str);
}
