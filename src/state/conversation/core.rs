use super::state::{
    ActiveTurn, ConversationStreamController, TimelineSnapshot, TurnOutcome, UserInput,
};
use super::streaming::TurnEffect;
use super::tools::ToolOutcome;
use crate::transport::{TurnRequest, TurnStream};
use crate::types::{ChatEvent, Message, Role};
use futures::stream::SelectAll;
use futures::StreamExt;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SEND_FAILED_TITLE: &str = "Failed to send message";

impl ConversationStreamController {
    /// Starts a turn for `input`. Ignored while another turn is busy and when
    /// the content is empty; whitespace-only content is sent as is.
    ///
    /// Returns once the agent accepted the request (or refused it); events are
    /// applied on a background task.
    pub async fn submit(&self, input: UserInput) {
        if input.content.is_empty() {
            debug!("ignoring empty submit");
            return;
        }

        let (turn_id, cancel, request, snapshot) = {
            let mut state = self.lock();
            if state.active_turn.is_some() {
                debug!("turn already in flight; ignoring submit");
                return;
            }

            let history = state.persistable();
            let message = input.into_message(self.shared.ids.message_id());
            state.timeline.push(message.clone());
            let snapshot = self.take_snapshot(&mut state);

            let loading_id = self.shared.ids.next("loading");
            state.timeline.push(Message::loading(loading_id.clone()));
            state.loading_message_id = Some(loading_id);

            state.next_turn_id += 1;
            let turn_id = state.next_turn_id;
            let cancel = CancellationToken::new();
            state.active_turn = Some(ActiveTurn {
                id: turn_id,
                cancel: cancel.clone(),
                streaming: false,
            });
            self.publish_phase(&state);

            let request = TurnRequest {
                conversation_id: self.shared.transport.conversation_id(),
                message,
                history,
            };
            (turn_id, cancel, request, snapshot)
        };
        debug!(turn_id, "turn started");

        self.persist(snapshot).await;

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(turn_id, "turn stopped before the stream opened");
                return;
            }
            sent = self.shared.transport.send_turn(request) => sent,
        };
        match sent {
            Ok(stream) => {
                tokio::spawn(self.clone().pump(turn_id, cancel, stream));
            }
            Err(error) => self.fail_turn(turn_id, &error),
        }
    }

    /// Cancels the busy turn. Already-applied events stay in the timeline.
    pub fn stop(&self) {
        let turn = {
            let mut state = self.lock();
            if state.active_turn.is_none() {
                return;
            }
            let Some(turn) = state.finish_turn(TurnOutcome::Stopped) else {
                return;
            };
            self.publish_phase(&state);
            turn
        };
        self.shared.transport.abort();
        turn.cancel.cancel();
        debug!(turn_id = turn.id, "turn stopped");
    }

    pub fn start_new_chat(&self) {
        let released = {
            let mut state = self.lock();
            let released = state.release_for_replacement(Vec::new());
            state.restore_epoch += 1;
            state.restoring = false;
            self.publish_phase(&state);
            released
        };
        if let Some(turn) = released {
            turn.cancel.cancel();
        }
        self.shared.router.clear_all_pending_tools();
        let conversation_id = self.shared.transport.new_conversation_id();
        debug!(%conversation_id, "started new chat");
    }

    /// Drops `message_id` and everything after it, then submits that user
    /// message again.
    pub async fn resend(&self, message_id: &str) {
        let (input, snapshot) = {
            let mut state = self.lock();
            if state.active_turn.is_some() {
                debug!(message_id, "turn in flight; ignoring resend");
                return;
            }
            let Some(index) = state
                .timeline
                .iter()
                .position(|message| message.id == message_id)
            else {
                warn!(message_id, "resend of unknown message");
                return;
            };
            let message = &state.timeline[index];
            if message.role != Role::User {
                warn!(message_id, role = ?message.role, "only user messages can be resent");
                return;
            }
            let input = UserInput {
                content: message.text(),
                attachments: message.attachments(),
            };
            state.timeline.truncate(index);
            (input, self.take_snapshot(&mut state))
        };
        self.persist(snapshot).await;
        self.submit(input).await;
    }

    /// Stops any turn and cancels every confirmation still waiting.
    pub fn teardown(&self) {
        self.stop();
        self.shared.router.gate().clean_all();
    }

    async fn pump(self, turn_id: u64, cancel: CancellationToken, stream: TurnStream) {
        let (tool_tx, mut tool_rx) = mpsc::unbounded_channel::<ToolOutcome>();
        let mut streams = SelectAll::new();
        streams.push(stream);
        let mut outstanding = 0usize;
        let mut arrived = HashSet::new();

        loop {
            if streams.is_empty() && outstanding == 0 {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(turn_id, "turn pump cancelled");
                    return;
                }
                Some(outcome) = tool_rx.recv(), if outstanding > 0 => {
                    outstanding -= 1;
                    match self.settle_tool(turn_id, &cancel, outcome, &arrived).await {
                        Ok(Some(follow_up)) => streams.push(follow_up),
                        Ok(None) => {}
                        Err(error) => {
                            self.fail_turn(turn_id, &error);
                            return;
                        }
                    }
                }
                item = streams.next(), if !streams.is_empty() => match item {
                    Some(Ok(event)) => {
                        let run_finished = matches!(event, ChatEvent::RunFinished { .. });
                        let Some((effects, snapshot)) = self.apply_event(turn_id, event) else {
                            return;
                        };
                        if run_finished {
                            self.shared.transport.reset_connection();
                        }
                        self.persist(snapshot).await;
                        for effect in effects {
                            match effect {
                                TurnEffect::ExecuteTool { tool_call_id, tool_name, args, raw_args } => {
                                    self.spawn_tool(&tool_tx, tool_call_id, tool_name, args, raw_args);
                                    outstanding += 1;
                                }
                                TurnEffect::ToolFailed { tool_call_id, tool_name, error } => {
                                    let _ = tool_tx.send(ToolOutcome::Failed { tool_call_id, tool_name, error });
                                    outstanding += 1;
                                }
                                TurnEffect::AgentResultArrived { tool_call_id } => {
                                    self.shared.router.clear_pending_tool(&tool_call_id);
                                    arrived.insert(tool_call_id);
                                }
                            }
                        }
                    }
                    Some(Err(error)) => {
                        self.fail_turn(turn_id, &error);
                        return;
                    }
                    None => {}
                },
            }
        }
        self.complete_turn(turn_id);
    }

    /// Folds `event` into the timeline. `None` when the turn is no longer the
    /// active one.
    fn apply_event(
        &self,
        turn_id: u64,
        event: ChatEvent,
    ) -> Option<(Vec<TurnEffect>, TimelineSnapshot)> {
        let mut state = self.lock();
        if !state.is_current(turn_id) {
            debug!(turn_id, "dropping event for stale turn");
            return None;
        }

        let first_event = state
            .active_turn
            .as_ref()
            .is_some_and(|turn| !turn.streaming);
        if first_event {
            state.remove_placeholder();
            if let Some(turn) = state.active_turn.as_mut() {
                turn.streaming = true;
            }
            self.publish_phase(&state);
            debug!(turn_id, "turn streaming");
        }

        let state = &mut *state;
        let effects = state.reducer.apply(&mut state.timeline, event);
        Some((effects, self.take_snapshot(state)))
    }

    pub(super) fn fail_turn(&self, turn_id: u64, error: &anyhow::Error) {
        {
            let mut state = self.lock();
            if !state.is_current(turn_id) {
                debug!(turn_id, error = %format!("{error:#}"), "ignoring failure of stale turn");
                return;
            }
            state.finish_turn(TurnOutcome::Errored);
            self.publish_phase(&state);
        }
        warn!(turn_id, error = %format!("{error:#}"), "turn failed");
        self.shared
            .notifier
            .notify_warning(SEND_FAILED_TITLE, &format!("{error:#}"));
    }

    fn complete_turn(&self, turn_id: u64) {
        let mut state = self.lock();
        if !state.is_current(turn_id) {
            return;
        }
        state.finish_turn(TurnOutcome::Completed);
        self.publish_phase(&state);
        debug!(turn_id, "turn completed");
    }
}
