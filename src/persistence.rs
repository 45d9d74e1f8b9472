//! Storage hand-off for conversation timelines.
//!
//! The controller saves after every timeline mutation and restores either the
//! most recent conversation or one picked from the history list.
//! [`InMemoryConversationStore`] serves tests and hosts that keep history only
//! for the lifetime of the process.

use crate::ids::now_unix_millis;
use crate::types::{Message, Role};
use crate::util::truncate_chars;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

const TITLE_MAX_CHARS: usize = 80;
const UNTITLED: &str = "New conversation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedConversation {
    pub id: String,
    pub timeline: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    /// Zero-based.
    pub page: usize,
    pub page_size: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            page_size: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPage {
    pub conversations: Vec<ConversationSummary>,
    pub total: usize,
    pub has_more: bool,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Replace the stored timeline of `conversation_id`.
    ///
    /// # Errors
    /// Returns an error if the timeline cannot be written.
    async fn save(&self, conversation_id: &str, timeline: &[Message]) -> Result<()>;

    /// The most recently saved conversation, if any.
    ///
    /// # Errors
    /// Returns an error if storage cannot be read.
    async fn restore_latest(&self) -> Result<Option<SavedConversation>>;

    /// # Errors
    /// Returns an error if the conversation does not exist or cannot be read.
    async fn load(&self, conversation_id: &str) -> Result<SavedConversation>;

    /// Newest first.
    ///
    /// # Errors
    /// Returns an error if storage cannot be read.
    async fn list_conversations(&self, page: PageRequest) -> Result<ConversationPage>;
}

struct StoredConversation {
    timeline: Vec<Message>,
    updated_at: u64,
    revision: u64,
}

#[derive(Default)]
struct StoreState {
    conversations: HashMap<String, StoredConversation>,
    revision: u64,
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    state: RwLock<StoreState>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn conversation_title(timeline: &[Message]) -> String {
    timeline
        .iter()
        .find(|message| message.role == Role::User)
        .map(|message| message.text())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .map(|text| truncate_chars(&text, TITLE_MAX_CHARS))
        .unwrap_or_else(|| UNTITLED.to_string())
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn save(&self, conversation_id: &str, timeline: &[Message]) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.revision += 1;
        let revision = state.revision;
        let timeline = timeline
            .iter()
            .filter(|message| !message.loading)
            .cloned()
            .collect();
        state.conversations.insert(
            conversation_id.to_string(),
            StoredConversation {
                timeline,
                updated_at: now_unix_millis(),
                revision,
            },
        );
        Ok(())
    }

    async fn restore_latest(&self) -> Result<Option<SavedConversation>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .conversations
            .iter()
            .max_by_key(|(_, stored)| stored.revision)
            .map(|(id, stored)| SavedConversation {
                id: id.clone(),
                timeline: stored.timeline.clone(),
            }))
    }

    async fn load(&self, conversation_id: &str) -> Result<SavedConversation> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let Some(stored) = state.conversations.get(conversation_id) else {
            bail!("conversation {conversation_id} not found");
        };
        Ok(SavedConversation {
            id: conversation_id.to_string(),
            timeline: stored.timeline.clone(),
        })
    }

    async fn list_conversations(&self, page: PageRequest) -> Result<ConversationPage> {
        if page.page_size == 0 {
            bail!("page size must be positive");
        }
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<(&String, &StoredConversation)> = state.conversations.iter().collect();
        entries.sort_by(|a, b| b.1.revision.cmp(&a.1.revision));

        let total = entries.len();
        let start = page.page.saturating_mul(page.page_size).min(total);
        let end = start.saturating_add(page.page_size).min(total);
        let conversations = entries[start..end]
            .iter()
            .map(|(id, stored)| ConversationSummary {
                id: (*id).clone(),
                title: conversation_title(&stored.timeline),
                message_count: stored.timeline.len(),
                updated_at: stored.updated_at,
            })
            .collect();

        Ok(ConversationPage {
            conversations,
            total,
            has_more: end < total,
        })
    }
}
