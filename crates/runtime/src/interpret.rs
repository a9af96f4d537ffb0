//! Decodes agent SSE payloads into [`AgentEvent`]s.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use crate::stream::{AgentEvent, ContentFragment, SseEvent};

/// Literal data of the stream termination event.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    #[error("malformed agent event ({reason}): {data}")]
    Malformed { reason: String, data: String },
}

impl InterpretError {
    fn malformed(reason: impl Into<String>, data: &str) -> Self {
        InterpretError::Malformed {
            reason: reason.into(),
            data: truncate(data, 200),
        }
    }
}

/// Interpret one event. Undecodable payloads are an error rather than being
/// skipped, so a corrupt delta is never applied to the transcript.
pub fn interpret_event(event: &SseEvent) -> Result<AgentEvent, InterpretError> {
    let data = event.data.trim();
    trace!(event = ?event.event, data, "agent sse event");

    if data == DONE_SENTINEL {
        return Ok(AgentEvent::Done);
    }

    let parsed: Value = serde_json::from_str(data)
        .map_err(|e| InterpretError::malformed(e.to_string(), data))?;

    if let Some(code) = error_code(&parsed) {
        let message = parsed["message"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| format!("agent service returned error code {}", code));
        return Ok(AgentEvent::UpstreamError { code, message });
    }

    let content = parsed["delta"]["content"]
        .as_array()
        .ok_or_else(|| InterpretError::malformed("missing delta.content", data))?;

    Ok(AgentEvent::Delta(
        content.iter().map(fragment_from_value).collect(),
    ))
}

/// A present, non-empty `code` marks an in-band error.
fn error_code(parsed: &Value) -> Option<String> {
    match &parsed["code"] {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Classify one `delta.content[]` item. Items without a `type` are
/// recognised by which payload key they carry.
pub fn fragment_from_value(item: &Value) -> ContentFragment {
    let kind = item["type"].as_str().or_else(|| {
        ["text", "tool_use", "tool_results", "table", "chart"]
            .into_iter()
            .find(|key| item.get(key).is_some())
    });

    let fragment = match kind {
        Some("text") => item["text"].as_str().map(|t| ContentFragment::Text(t.to_string())),
        Some("tool_use") => decode(&item["tool_use"]).map(ContentFragment::ToolUse),
        Some("tool_results") => decode(&item["tool_results"]).map(ContentFragment::ToolResults),
        Some("table") => item.get("table").cloned().map(ContentFragment::Table),
        Some("chart") => item.get("chart").cloned().map(ContentFragment::Chart),
        _ => None,
    };

    fragment.unwrap_or_else(|| ContentFragment::Unknown(item.clone()))
}

fn decode<T: DeserializeOwned>(value: &Value) -> Option<T> {
    serde_json::from_value(value.clone()).ok()
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
