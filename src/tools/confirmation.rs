//! Human-in-the-loop rendezvous for tool calls.
//!
//! Each request parks a oneshot sender in the gate until `approve`, `reject`
//! or `clean_all` resolves it. The pending set is republished on a `watch`
//! channel after every mutation, while the gate's lock is still held, so an
//! observer never sees a request that has no resolver or the reverse.

use crate::ids::MonotonicClock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, watch};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRequest {
    pub id: String,
    pub tool_name: String,
    pub tool_call_id: String,
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Unix milliseconds; unique per gate.
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationResponse {
    pub id: String,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_args: Option<Value>,
    #[serde(default)]
    pub cancelled: bool,
}

impl ConfirmationResponse {
    fn approved(id: String, modified_args: Option<Value>) -> Self {
        Self {
            id,
            approved: true,
            modified_args,
            cancelled: false,
        }
    }

    fn rejected(id: String) -> Self {
        Self {
            id,
            approved: false,
            modified_args: None,
            cancelled: false,
        }
    }

    fn cancelled(id: String) -> Self {
        Self {
            id,
            approved: false,
            modified_args: None,
            cancelled: true,
        }
    }
}

/// A registered request whose answer has not been awaited yet.
pub struct PendingConfirmation {
    request: ConfirmationRequest,
    response_rx: oneshot::Receiver<ConfirmationResponse>,
}

impl PendingConfirmation {
    pub fn id(&self) -> &str {
        &self.request.id
    }

    pub fn request(&self) -> &ConfirmationRequest {
        &self.request
    }

    /// Waits for the decision. A gate dropped without resolving counts as a
    /// cancellation.
    pub async fn wait(self) -> ConfirmationResponse {
        match self.response_rx.await {
            Ok(response) => response,
            Err(_) => {
                debug!(confirmation_id = %self.request.id, "confirmation resolver dropped");
                ConfirmationResponse::cancelled(self.request.id)
            }
        }
    }
}

#[derive(Default)]
struct GateState {
    pending: Vec<ConfirmationRequest>,
    resolvers: HashMap<String, oneshot::Sender<ConfirmationResponse>>,
}

pub struct ConfirmationGate {
    state: Mutex<GateState>,
    pending_tx: watch::Sender<Vec<ConfirmationRequest>>,
    clock: MonotonicClock,
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmationGate {
    pub fn new() -> Self {
        let (pending_tx, _) = watch::channel(Vec::new());
        Self {
            state: Mutex::new(GateState::default()),
            pending_tx,
            clock: MonotonicClock::new(),
        }
    }

    /// Registers a request and waits for its resolution. Never fails: every
    /// outcome, including teardown, is a [`ConfirmationResponse`].
    pub async fn request_confirmation(
        &self,
        tool_name: &str,
        tool_call_id: &str,
        args: Value,
        description: Option<String>,
    ) -> ConfirmationResponse {
        self.begin_confirmation(tool_name, tool_call_id, args, description)
            .wait()
            .await
    }

    /// Registers a request without waiting, so the caller can learn the id or
    /// race the answer against a timer.
    pub fn begin_confirmation(
        &self,
        tool_name: &str,
        tool_call_id: &str,
        args: Value,
        description: Option<String>,
    ) -> PendingConfirmation {
        let timestamp = self.clock.stamp();
        let request = ConfirmationRequest {
            id: format!("confirm-{tool_call_id}-{timestamp}"),
            tool_name: tool_name.to_string(),
            tool_call_id: tool_call_id.to_string(),
            args,
            description,
            timestamp,
        };
        let (response_tx, response_rx) = oneshot::channel();

        let mut state = self.lock_state();
        state.resolvers.insert(request.id.clone(), response_tx);
        state.pending.push(request.clone());
        self.publish(&state);
        drop(state);

        debug!(
            confirmation_id = %request.id,
            tool = %request.tool_name,
            "confirmation requested"
        );
        PendingConfirmation {
            request,
            response_rx,
        }
    }

    pub fn approve(&self, id: &str, modified_args: Option<Value>) {
        self.resolve(
            id,
            ConfirmationResponse::approved(id.to_string(), modified_args),
        );
    }

    pub fn reject(&self, id: &str) {
        self.resolve(id, ConfirmationResponse::rejected(id.to_string()));
    }

    pub fn pending_confirmations(&self) -> Vec<ConfirmationRequest> {
        self.lock_state().pending.clone()
    }

    pub fn has_pending_confirmations(&self) -> bool {
        !self.lock_state().pending.is_empty()
    }

    /// Live view of the pending set; the current value is visible immediately.
    pub fn subscribe_to_pending(&self) -> watch::Receiver<Vec<ConfirmationRequest>> {
        self.pending_tx.subscribe()
    }

    /// Resolves everything still pending as cancelled. Called when the owning
    /// conversation goes away so no waiter is left hanging.
    pub fn clean_all(&self) {
        let mut state = self.lock_state();
        let resolvers = std::mem::take(&mut state.resolvers);
        state.pending.clear();
        self.publish(&state);
        drop(state);

        if !resolvers.is_empty() {
            debug!(count = resolvers.len(), "cancelling pending confirmations");
        }
        for (id, response_tx) in resolvers {
            let _ = response_tx.send(ConfirmationResponse::cancelled(id));
        }
    }

    fn resolve(&self, id: &str, response: ConfirmationResponse) {
        let mut state = self.lock_state();
        let Some(response_tx) = state.resolvers.remove(id) else {
            debug!(confirmation_id = id, "ignoring resolution for unknown confirmation");
            return;
        };
        state.pending.retain(|request| request.id != id);
        self.publish(&state);
        drop(state);

        debug!(
            confirmation_id = id,
            approved = response.approved,
            "confirmation resolved"
        );
        // The waiter may have given up already; the request is gone either way.
        let _ = response_tx.send(response);
    }

    fn publish(&self, state: &GateState) {
        self.pending_tx.send_replace(state.pending.clone());
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
