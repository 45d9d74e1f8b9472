use super::streaming::ChatEventReducer;
use crate::ids::IdGenerator;
use crate::notify::Notifier;
use crate::persistence::ConversationStore;
use crate::tools::ToolExecutionRouter;
use crate::transport::Transport;
use crate::types::{BinaryContent, ContentPart, Message, MessageContent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    /// Request sent, no event received yet.
    Sending,
    Streaming,
}

impl TurnPhase {
    pub fn is_busy(self) -> bool {
        !matches!(self, TurnPhase::Idle)
    }
}

/// How the last turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Stopped,
    Errored,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserInput {
    pub content: String,
    pub attachments: Vec<BinaryContent>,
}

impl UserInput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<BinaryContent>) -> Self {
        self.attachments = attachments;
        self
    }

    pub(super) fn into_message(self, id: String) -> Message {
        if self.attachments.is_empty() {
            return Message::user(id, MessageContent::Text(self.content));
        }
        let mut parts = vec![ContentPart::Text { text: self.content }];
        parts.extend(self.attachments.into_iter().map(ContentPart::Binary));
        Message::user(id, MessageContent::Parts(parts))
    }
}

/// Timeline as of one mutation, numbered in mutation order.
pub(super) struct TimelineSnapshot {
    pub(super) seq: u64,
    pub(super) conversation_id: String,
    pub(super) timeline: Vec<Message>,
}

pub(super) struct ActiveTurn {
    pub(super) id: u64,
    pub(super) cancel: CancellationToken,
    pub(super) streaming: bool,
}

#[derive(Default)]
pub(super) struct ControllerState {
    pub(super) timeline: Vec<Message>,
    pub(super) active_turn: Option<ActiveTurn>,
    pub(super) last_outcome: Option<TurnOutcome>,
    pub(super) loading_message_id: Option<String>,
    pub(super) reducer: ChatEventReducer,
    pub(super) data_source_id: Option<String>,
    pub(super) next_turn_id: u64,
    pub(super) snapshot_seq: u64,
    pub(super) restore_epoch: u64,
    pub(super) restoring: bool,
}

impl ControllerState {
    pub(super) fn phase(&self) -> TurnPhase {
        match &self.active_turn {
            None => TurnPhase::Idle,
            Some(turn) if turn.streaming => TurnPhase::Streaming,
            Some(_) => TurnPhase::Sending,
        }
    }

    pub(super) fn is_current(&self, turn_id: u64) -> bool {
        self.active_turn
            .as_ref()
            .is_some_and(|turn| turn.id == turn_id)
    }

    /// Timeline without the loading placeholder.
    pub(super) fn persistable(&self) -> Vec<Message> {
        self.timeline
            .iter()
            .filter(|message| !message.loading)
            .cloned()
            .collect()
    }

    pub(super) fn remove_placeholder(&mut self) -> bool {
        let Some(loading_id) = self.loading_message_id.take() else {
            return false;
        };
        self.timeline.retain(|message| message.id != loading_id);
        true
    }

    pub(super) fn finish_turn(&mut self, outcome: TurnOutcome) -> Option<ActiveTurn> {
        self.remove_placeholder();
        self.last_outcome = Some(outcome);
        self.active_turn.take()
    }

    /// Drops the running turn and everything derived from the old timeline.
    pub(super) fn release_for_replacement(&mut self, timeline: Vec<Message>) -> Option<ActiveTurn> {
        self.loading_message_id = None;
        self.timeline = timeline;
        self.last_outcome = None;
        self.reducer.reset();
        self.active_turn.take()
    }
}

pub(super) struct Shared {
    pub(super) state: Mutex<ControllerState>,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) store: Arc<dyn ConversationStore>,
    pub(super) router: Arc<ToolExecutionRouter>,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) phase_tx: watch::Sender<TurnPhase>,
    pub(super) ids: IdGenerator,
    /// Highest snapshot written per conversation. Held across `save` so
    /// writes reach the store one at a time.
    pub(super) saved_seq: AsyncMutex<HashMap<String, u64>>,
}

/// Owns the timeline and runs at most one turn at a time. Cheap to clone;
/// clones share state.
#[derive(Clone)]
pub struct ConversationStreamController {
    pub(super) shared: Arc<Shared>,
}

impl ConversationStreamController {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn ConversationStore>,
        router: Arc<ToolExecutionRouter>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (phase_tx, _) = watch::channel(TurnPhase::Idle);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ControllerState::default()),
                transport,
                store,
                router,
                notifier,
                phase_tx,
                ids: IdGenerator::new(),
                saved_seq: AsyncMutex::new(HashMap::new()),
            }),
        }
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Must be taken with the state lock held, right after the mutation it
    /// records.
    pub(super) fn take_snapshot(&self, state: &mut ControllerState) -> TimelineSnapshot {
        state.snapshot_seq += 1;
        TimelineSnapshot {
            seq: state.snapshot_seq,
            conversation_id: self.shared.transport.conversation_id(),
            timeline: state.persistable(),
        }
    }

    /// Called with the state lock held so observers never see a phase older
    /// than the state that produced it.
    pub(super) fn publish_phase(&self, state: &ControllerState) {
        self.shared.phase_tx.send_replace(state.phase());
    }

    pub fn timeline(&self) -> Vec<Message> {
        self.lock().timeline.clone()
    }

    pub fn phase(&self) -> TurnPhase {
        self.lock().phase()
    }

    pub fn is_busy(&self) -> bool {
        self.phase().is_busy()
    }

    pub fn last_outcome(&self) -> Option<TurnOutcome> {
        self.lock().last_outcome
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<TurnPhase> {
        self.shared.phase_tx.subscribe()
    }

    pub fn is_restoring(&self) -> bool {
        self.lock().restoring
    }

    /// Data source merged into the arguments of every tool the agent calls.
    pub fn set_data_source_id(&self, data_source_id: Option<String>) {
        self.lock().data_source_id = data_source_id;
    }

    pub fn router(&self) -> &Arc<ToolExecutionRouter> {
        &self.shared.router
    }

    pub fn conversation_id(&self) -> String {
        self.shared.transport.conversation_id()
    }
}
