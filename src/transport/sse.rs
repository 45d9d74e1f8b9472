use super::logging::{emit_sse_encoding_error, emit_sse_parse_error};
use crate::types::ChatEvent;

/// Incremental `data: {json}` line parser for the agent's event stream.
#[derive(Default)]
pub struct SseEventParser {
    buffer: Vec<u8>,
}

impl SseEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one network chunk and returns every event completed by it. A
    /// trailing partial line stays buffered as raw bytes, so a character split
    /// across chunks is decoded only once it is whole.
    pub fn process(&mut self, chunk: &[u8]) -> Vec<ChatEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        let mut start = 0;

        while let Some(end) = self.buffer[start..].iter().position(|byte| *byte == b'\n') {
            let line_end = start + end;
            if let Some(event) = decode_line(&self.buffer[start..line_end]) {
                events.push(event);
            }
            start = line_end + 1;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }

        events
    }

    /// Parses whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Vec<ChatEvent> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest).into_iter().collect()
    }
}

fn decode_line(raw: &[u8]) -> Option<ChatEvent> {
    match std::str::from_utf8(raw) {
        Ok(line) => parse_line(line),
        Err(error) => {
            emit_sse_encoding_error(&String::from_utf8_lossy(raw), &error);
            None
        }
    }
}

fn parse_line(raw: &str) -> Option<ChatEvent> {
    let line = raw.trim_end_matches('\r');
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<ChatEvent>(data) {
        Ok(event) => Some(event),
        Err(error) => {
            emit_sse_parse_error(line, &error);
            None
        }
    }
}
