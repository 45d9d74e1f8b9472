use crate::notify::Notifier;
use crate::persistence::{
    ConversationPage, ConversationStore, InMemoryConversationStore, PageRequest, SavedConversation,
};
use crate::state::{ConversationStreamController, TurnPhase};
use crate::transport::{Transport, TurnRequest, TurnStream};
use crate::types::{ChatEvent, Message};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::{mpsc, oneshot, Notify};

/// Process-wide lock for tests that mutate environment variables.
/// Use `.blocking_lock()` in sync tests and `.lock().await` in async tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

const WAIT_LIMIT: Duration = Duration::from_secs(5);

enum Script {
    Events(Vec<Result<ChatEvent>>),
    Live(mpsc::UnboundedReceiver<Result<ChatEvent>>),
    Reject(String),
    Held(oneshot::Receiver<()>),
}

/// Transport that replays one queued script per `send_turn` call.
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<TurnRequest>>,
    aborts: AtomicUsize,
    resets: AtomicUsize,
    conversation_id: Mutex<String>,
    new_conversations: AtomicUsize,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            aborts: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            conversation_id: Mutex::new("thread-test".to_string()),
            new_conversations: AtomicUsize::new(0),
        }
    }

    fn push(&self, script: Script) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(script);
    }

    pub fn push_events(&self, events: Vec<ChatEvent>) {
        self.push(Script::Events(events.into_iter().map(Ok).collect()));
    }

    pub fn push_events_then_error(&self, events: Vec<ChatEvent>, error: &str) {
        let mut items: Vec<Result<ChatEvent>> = events.into_iter().map(Ok).collect();
        items.push(Err(anyhow!(error.to_string())));
        self.push(Script::Events(items));
    }

    /// Stream whose events are fed by the returned sender; it ends when the
    /// sender is dropped.
    pub fn push_live(&self) -> mpsc::UnboundedSender<Result<ChatEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Script::Live(rx));
        tx
    }

    pub fn push_reject(&self, error: &str) {
        self.push(Script::Reject(error.to_string()));
    }

    /// `send_turn` stays pending until the returned sender fires or drops,
    /// then yields an empty stream.
    pub fn push_held(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.push(Script::Held(rx));
        tx
    }

    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn new_conversation_count(&self) -> usize {
        self.new_conversations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send_turn(&self, request: TurnRequest) -> Result<TurnStream> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match script {
            None => bail!("no scripted turn left"),
            Some(Script::Reject(error)) => bail!(error),
            Some(Script::Events(items)) => Ok(stream::iter(items).boxed()),
            Some(Script::Live(rx)) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            Some(Script::Held(rx)) => {
                let _ = rx.await;
                Ok(stream::empty().boxed())
            }
        }
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }

    fn reset_connection(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn new_conversation_id(&self) -> String {
        let n = self.new_conversations.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("thread-new-{n}");
        *self
            .conversation_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = id.clone();
        id
    }

    fn conversation_id(&self) -> String {
        self.conversation_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_conversation_id(&self, id: &str) {
        *self
            .conversation_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = id.to_string();
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    warnings: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn warnings(&self) -> Vec<(String, String)> {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_warning(&self, title: &str, text: &str) {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((title.to_string(), text.to_string()));
    }
}

/// In-memory store whose lookups can be held back or made to fail.
#[derive(Default)]
pub struct ScriptedStore {
    pub inner: InMemoryConversationStore,
    hold_lookups: AtomicBool,
    fail_lookups: AtomicBool,
    release: Notify,
    hold_next_save: AtomicBool,
    held_saves: AtomicUsize,
    release_save: Notify,
}

impl ScriptedStore {
    pub fn hold_lookups(&self) {
        self.hold_lookups.store(true, Ordering::SeqCst);
    }

    pub fn release_lookup(&self) {
        self.release.notify_one();
    }

    pub fn fail_lookups(&self) {
        self.fail_lookups.store(true, Ordering::SeqCst);
    }

    /// The next `save` parks before writing until `release_save` is called.
    pub fn hold_next_save(&self) {
        self.hold_next_save.store(true, Ordering::SeqCst);
    }

    pub fn release_save(&self) {
        self.release_save.notify_one();
    }

    /// Number of saves that have parked so far.
    pub fn held_saves(&self) -> usize {
        self.held_saves.load(Ordering::SeqCst)
    }

    async fn before_lookup(&self) -> Result<()> {
        if self.hold_lookups.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        if self.fail_lookups.load(Ordering::SeqCst) {
            bail!("storage unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for ScriptedStore {
    async fn save(&self, conversation_id: &str, timeline: &[Message]) -> Result<()> {
        if self.hold_next_save.swap(false, Ordering::SeqCst) {
            self.held_saves.fetch_add(1, Ordering::SeqCst);
            self.release_save.notified().await;
        }
        self.inner.save(conversation_id, timeline).await
    }

    async fn restore_latest(&self) -> Result<Option<SavedConversation>> {
        self.before_lookup().await?;
        self.inner.restore_latest().await
    }

    async fn load(&self, conversation_id: &str) -> Result<SavedConversation> {
        self.before_lookup().await?;
        self.inner.load(conversation_id).await
    }

    async fn list_conversations(&self, page: PageRequest) -> Result<ConversationPage> {
        self.inner.list_conversations(page).await
    }
}

pub fn text_reply(message_id: &str, text: &str) -> Vec<ChatEvent> {
    vec![
        ChatEvent::RunStarted {
            thread_id: Some("thread-test".to_string()),
            run_id: Some("run-1".to_string()),
        },
        ChatEvent::TextMessageStart {
            message_id: message_id.to_string(),
        },
        ChatEvent::TextMessageContent {
            message_id: message_id.to_string(),
            delta: text.to_string(),
        },
        ChatEvent::TextMessageEnd {
            message_id: message_id.to_string(),
        },
        ChatEvent::RunFinished {
            thread_id: None,
            run_id: None,
        },
    ]
}

pub fn tool_call(message_id: &str, tool_call_id: &str, name: &str, args: &str) -> Vec<ChatEvent> {
    vec![
        ChatEvent::TextMessageStart {
            message_id: message_id.to_string(),
        },
        ChatEvent::ToolCallStart {
            tool_call_id: tool_call_id.to_string(),
            tool_call_name: name.to_string(),
            parent_message_id: None,
        },
        ChatEvent::ToolCallArgs {
            tool_call_id: tool_call_id.to_string(),
            delta: args.to_string(),
        },
        ChatEvent::ToolCallEnd {
            tool_call_id: tool_call_id.to_string(),
        },
        ChatEvent::TextMessageEnd {
            message_id: message_id.to_string(),
        },
    ]
}

pub async fn within_limit<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT_LIMIT, future)
        .await
        .expect("timed out waiting")
}

pub async fn wait_for_phase(controller: &ConversationStreamController, phase: TurnPhase) {
    let mut rx = controller.subscribe_phase();
    within_limit(rx.wait_for(|current| *current == phase))
        .await
        .expect("phase channel closed");
}

/// Yields to other tasks until `check` holds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    within_limit(async {
        while !check() {
            tokio::task::yield_now().await;
        }
    })
    .await;
}
