use serde_json::Value;
use tracing::{debug, warn};

pub fn emit_debug_payload(request_url: &str, payload: &Value) {
    let formatted_payload = serde_json::to_string_pretty(payload)
        .unwrap_or_else(|_| "<payload serialization error>".to_string());
    debug!(url = request_url, payload = %formatted_payload, "agent request payload");
}

pub fn emit_sse_parse_error(line: &str, parse_error: &serde_json::Error) {
    warn!(error = %parse_error, line, "failed to parse SSE data");
}

pub fn emit_sse_encoding_error(line: &str, encoding_error: &std::str::Utf8Error) {
    warn!(error = %encoding_error, line, "SSE line is not valid UTF-8");
}
