use super::state::{ConversationStreamController, TimelineSnapshot};
use crate::persistence::{ConversationPage, PageRequest, SavedConversation};
use crate::types::Message;
use anyhow::Result;
use tracing::{debug, warn};

const RESTORE_FAILED_TITLE: &str = "Failed to restore conversation";

impl ConversationStreamController {
    /// Saves `snapshot` under the conversation id it was taken for. A snapshot
    /// older than one already written is dropped, so a slow save can never
    /// overwrite a newer timeline. Failures are logged; the in-memory timeline
    /// stays authoritative.
    pub(super) async fn persist(&self, snapshot: TimelineSnapshot) {
        let TimelineSnapshot {
            seq,
            conversation_id,
            timeline,
        } = snapshot;

        let mut saved = self.shared.saved_seq.lock().await;
        if saved.get(&conversation_id).is_some_and(|&last| seq <= last) {
            debug!(%conversation_id, seq, "skipping stale timeline snapshot");
            return;
        }
        match self.shared.store.save(&conversation_id, &timeline).await {
            Ok(()) => {
                saved.insert(conversation_id, seq);
            }
            Err(error) => warn!(
                %conversation_id,
                error = %format!("{error:#}"),
                "failed to persist timeline"
            ),
        }
    }

    /// Replaces the timeline with the most recently saved conversation and
    /// returns it. `None` when nothing was saved, the lookup failed, or the
    /// restore was invalidated while in flight.
    pub async fn restore(&self) -> Option<Vec<Message>> {
        self.restore_from_store(None).await
    }

    /// Like [`restore`](Self::restore), for a specific conversation.
    pub async fn load_conversation(&self, conversation_id: &str) -> Option<Vec<Message>> {
        self.restore_from_store(Some(conversation_id)).await
    }

    /// Makes any restore or load still in flight discard its result.
    pub fn invalidate_restore(&self) {
        let mut state = self.lock();
        state.restore_epoch += 1;
        state.restoring = false;
    }

    /// # Errors
    /// Returns an error if the store cannot list conversations.
    pub async fn list_conversations(&self, page: PageRequest) -> Result<ConversationPage> {
        self.shared.store.list_conversations(page).await
    }

    async fn restore_from_store(&self, conversation_id: Option<&str>) -> Option<Vec<Message>> {
        let epoch = {
            let mut state = self.lock();
            state.restore_epoch += 1;
            state.restoring = true;
            state.restore_epoch
        };

        let lookup = match conversation_id {
            None => self.shared.store.restore_latest().await,
            Some(id) => self.shared.store.load(id).await.map(Some),
        };

        let mut state = self.lock();
        if state.restore_epoch != epoch {
            debug!(epoch, "discarding invalidated restore");
            return None;
        }
        state.restoring = false;

        match lookup {
            Ok(Some(SavedConversation { id, timeline })) => {
                let restored = timeline.clone();
                let released = state.release_for_replacement(timeline);
                self.publish_phase(&state);
                drop(state);

                if let Some(turn) = released {
                    turn.cancel.cancel();
                }
                self.shared.router.clear_all_pending_tools();
                self.shared.transport.set_conversation_id(&id);
                debug!(conversation_id = %id, "conversation restored");
                Some(restored)
            }
            Ok(None) => {
                debug!("no saved conversation to restore");
                None
            }
            Err(error) => {
                drop(state);
                warn!(error = %format!("{error:#}"), "restore failed");
                self.shared
                    .notifier
                    .notify_warning(RESTORE_FAILED_TITLE, &format!("{error:#}"));
                None
            }
        }
    }
}
