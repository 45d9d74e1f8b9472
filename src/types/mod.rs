mod event;
mod message;

pub use event::ChatEvent;
pub use message::{
    BinaryContent, ContentPart, FunctionCall, Message, MessageContent, Role, ToolCall,
};
