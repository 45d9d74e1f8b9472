use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A tool call handed to the remote agent, kept until its result event
/// arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    /// Raw argument text as streamed by the agent.
    pub args: String,
}

/// Tool calls awaiting an out-of-band result, keyed by tool call id.
#[derive(Debug, Default)]
pub struct PendingToolLedger {
    calls: Mutex<HashMap<String, PendingToolCall>>,
}

impl PendingToolLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_tool_pending(&self, tool_call_id: &str, call: PendingToolCall) {
        self.lock_calls().insert(tool_call_id.to_string(), call);
    }

    pub fn is_pending_agent_response(&self, tool_call_id: &str) -> bool {
        self.lock_calls().contains_key(tool_call_id)
    }

    pub fn pending_tool(&self, tool_call_id: &str) -> Option<PendingToolCall> {
        self.lock_calls().get(tool_call_id).cloned()
    }

    pub fn clear_pending_tool(&self, tool_call_id: &str) {
        self.lock_calls().remove(tool_call_id);
    }

    pub fn clear_all_pending_tools(&self) {
        self.lock_calls().clear();
    }

    pub fn len(&self) -> usize {
        self.lock_calls().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_calls().is_empty()
    }

    fn lock_calls(&self) -> MutexGuard<'_, HashMap<String, PendingToolCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, args: &str) -> PendingToolCall {
        PendingToolCall {
            id: id.to_string(),
            name: "search_docs".to_string(),
            args: args.to_string(),
        }
    }

    #[test]
    fn test_mark_lookup_and_clear() {
        let ledger = PendingToolLedger::new();
        assert!(!ledger.is_pending_agent_response("call-1"));

        ledger.mark_tool_pending("call-1", call("call-1", "{}"));
        assert!(ledger.is_pending_agent_response("call-1"));
        assert_eq!(ledger.pending_tool("call-1"), Some(call("call-1", "{}")));
        assert_eq!(ledger.pending_tool("call-2"), None);

        ledger.clear_pending_tool("call-1");
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_marking_twice_keeps_one_entry() {
        let ledger = PendingToolLedger::new();
        ledger.mark_tool_pending("call-1", call("call-1", "{}"));
        ledger.mark_tool_pending("call-1", call("call-1", "{\"q\":2}"));

        assert_eq!(ledger.len(), 1);
        assert_eq!(
            ledger.pending_tool("call-1").map(|c| c.args),
            Some("{\"q\":2}".to_string())
        );
    }

    #[test]
    fn test_clear_all() {
        let ledger = PendingToolLedger::new();
        ledger.mark_tool_pending("call-1", call("call-1", "{}"));
        ledger.mark_tool_pending("call-2", call("call-2", "{}"));
        ledger.clear_all_pending_tools();
        assert!(ledger.is_empty());
        ledger.clear_pending_tool("call-1");
    }
}
