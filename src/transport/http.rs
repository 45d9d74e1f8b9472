use super::logging::emit_debug_payload;
use super::sse::SseEventParser;
use super::{Transport, TurnRequest, TurnStream};
use crate::config::EngineConfig;
use crate::ids::IdGenerator;
use crate::tools::ToolDefinition;
use crate::types::{ChatEvent, Message};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunAgentInput {
    thread_id: String,
    run_id: String,
    messages: Vec<Message>,
    tools: Vec<ToolDefinition>,
    context: Vec<Value>,
    state: Value,
    forwarded_props: Value,
}

/// Talks to an AG-UI agent server: one POST per run, events streamed back as
/// server-sent `data:` lines.
pub struct HttpAgentTransport {
    http: reqwest::Client,
    agent_url: String,
    debug_payload: bool,
    ids: IdGenerator,
    thread_id: Mutex<String>,
    active_run: Mutex<Option<CancellationToken>>,
    tools: Mutex<Vec<ToolDefinition>>,
}

impl HttpAgentTransport {
    pub fn new(config: &EngineConfig) -> Self {
        let ids = IdGenerator::new();
        let thread_id = ids.next("thread");
        Self {
            http: reqwest::Client::new(),
            agent_url: config.agent_url.trim().to_string(),
            debug_payload: config.debug_payload,
            ids,
            thread_id: Mutex::new(thread_id),
            active_run: Mutex::new(None),
            tools: Mutex::new(Vec::new()),
        }
    }

    /// Tool definitions advertised to the agent with every run.
    pub fn set_tools(&self, tools: Vec<ToolDefinition>) {
        *lock(&self.tools) = tools;
    }

    fn begin_run(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.active_run).replace(token.clone()) {
            debug!("aborting previous agent run");
            previous.cancel();
        }
        token
    }

    fn build_payload(&self, request: TurnRequest) -> RunAgentInput {
        let mut messages = request.history;
        messages.push(request.message);
        RunAgentInput {
            thread_id: request.conversation_id,
            run_id: self.ids.next("run"),
            messages,
            tools: lock(&self.tools).clone(),
            context: Vec::new(),
            state: json!({}),
            forwarded_props: json!({}),
        }
    }
}

#[async_trait]
impl Transport for HttpAgentTransport {
    async fn send_turn(&self, request: TurnRequest) -> Result<TurnStream> {
        let cancel = self.begin_run();
        let payload = serde_json::to_value(self.build_payload(request))?;
        if self.debug_payload {
            emit_debug_payload(&self.agent_url, &payload);
        }

        let send = self
            .http
            .post(&self.agent_url)
            .header("content-type", "application/json")
            .header("accept", "text/event-stream")
            .header("osd-xsrf", "true")
            .json(&payload)
            .send();
        let response = tokio::select! {
            _ = cancel.cancelled() => bail!("agent request to '{}' was aborted", self.agent_url),
            response = send => response.map_err(|error| map_request_error(error, &self.agent_url))?,
        };

        let status = response.status();
        if !status.is_success() {
            bail!("HTTP error! status: {}", status.as_u16());
        }

        let request_url = self.agent_url.clone();
        let bytes: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(move |item| item.map_err(|error| map_request_error(error, &request_url))),
        );
        Ok(events_from_bytes(bytes)
            .take_until(cancel.cancelled_owned())
            .boxed())
    }

    fn abort(&self) {
        if let Some(token) = lock(&self.active_run).take() {
            debug!("aborting agent run");
            token.cancel();
        }
    }

    fn reset_connection(&self) {
        lock(&self.active_run).take();
    }

    fn new_conversation_id(&self) -> String {
        let id = self.ids.next("thread");
        *lock(&self.thread_id) = id.clone();
        id
    }

    fn conversation_id(&self) -> String {
        lock(&self.thread_id).clone()
    }

    fn set_conversation_id(&self, id: &str) {
        *lock(&self.thread_id) = id.to_string();
    }
}

struct SseState {
    bytes: ByteStream,
    parser: SseEventParser,
    queue: VecDeque<ChatEvent>,
    done: bool,
}

/// Turns raw body chunks into events. A transport error ends the stream
/// after being yielded once.
pub(crate) fn events_from_bytes(bytes: ByteStream) -> impl Stream<Item = Result<ChatEvent>> + Send {
    let state = SseState {
        bytes,
        parser: SseEventParser::new(),
        queue: VecDeque::new(),
        done: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queue.pop_front() {
                return Some((Ok(event), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.parser.process(&chunk);
                    state.queue.extend(events);
                }
                Some(Err(error)) => {
                    state.done = true;
                    return Some((Err(error), state));
                }
                None => {
                    state.done = true;
                    let events = state.parser.finish();
                    state.queue.extend(events);
                }
            }
        }
    })
}

fn map_request_error(error: reqwest::Error, request_url: &str) -> anyhow::Error {
    if error.is_connect() {
        return anyhow!("cannot reach agent endpoint '{}': {}", request_url, error);
    }
    if error.is_timeout() {
        return anyhow!("agent request to '{}' timed out: {}", request_url, error);
    }
    if let Some(status) = error.status() {
        return anyhow!("HTTP error! status: {}", status.as_u16());
    }
    anyhow!("agent request to '{}' failed: {}", request_url, error)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
