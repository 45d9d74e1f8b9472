//! Turnkeeper: the coordination layer behind a streaming chat assistant.
//!
//! Three pieces cooperate to run one conversational turn at a time:
//!
//! - [`tools::ConfirmationGate`] parks tool executions until a human approves
//!   or rejects them, and broadcasts the live set of pending requests.
//! - [`tools::ToolExecutionRouter`] decides whether a tool runs through a
//!   registered action, waits for the remote agent, or needs a confirmation
//!   first.
//! - [`state::ConversationStreamController`] owns the timeline and the
//!   single-flight turn lifecycle: submit, stream, stop, resend, restore.
//!
//! Collaborators (agent transport, persistence, action registry, warning
//! sink) are plain traits handed to the constructors.
//!
//! ```no_run
//! use std::sync::Arc;
//! use turnkeeper::config::EngineConfig;
//! use turnkeeper::persistence::InMemoryConversationStore;
//! use turnkeeper::state::{ConversationStreamController, UserInput};
//! use turnkeeper::tools::{ConfirmationGate, RegisteredActions, ToolExecutionRouter};
//! use turnkeeper::transport::HttpAgentTransport;
//! use turnkeeper::TracingNotifier;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = EngineConfig::load()?;
//! config.validate()?;
//! turnkeeper::logging::init_logging(&config)?;
//!
//! let gate = Arc::new(ConfirmationGate::new());
//! let router = Arc::new(ToolExecutionRouter::new(
//!     Arc::new(RegisteredActions::new()),
//!     Arc::clone(&gate),
//! ));
//! let controller = ConversationStreamController::new(
//!     Arc::new(HttpAgentTransport::new(&config)),
//!     Arc::new(InMemoryConversationStore::new()),
//!     router,
//!     Arc::new(TracingNotifier),
//! );
//!
//! controller.submit(UserInput::text("Show me the slowest queries")).await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod ids;
pub mod logging;
mod notify;
pub mod persistence;
pub mod state;
#[cfg(test)]
pub(crate) mod test_support;
pub mod tools;
pub mod transport;
pub mod types;
pub mod util;

pub use notify::{Notifier, TracingNotifier};
