mod confirmation;
mod ledger;
mod registry;
mod router;

pub use confirmation::{
    ConfirmationGate, ConfirmationRequest, ConfirmationResponse, PendingConfirmation,
};
pub use ledger::{PendingToolCall, PendingToolLedger};
pub use registry::{
    ActionError, ActionRegistry, ActionRequest, Authorization, RegisteredActions, ToolDefinition,
};
pub use router::{merge_args, ToolExecutionRouter, ToolResult, ToolSource};
