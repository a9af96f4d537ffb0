use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{ToolResults, ToolUse};

/// One server-sent event as delivered by the transport: the optional event
/// name and the (possibly multi-line, joined) data field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
        }
    }

    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
        }
    }
}

/// One piece of content inside a streamed delta.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentFragment {
    Text(String),
    ToolUse(ToolUse),
    ToolResults(ToolResults),
    Table(Value),
    Chart(Value),
    /// Any shape this client does not understand, kept verbatim.
    Unknown(Value),
}

impl ContentFragment {
    pub fn kind(&self) -> &'static str {
        match self {
            ContentFragment::Text(_) => "text",
            ContentFragment::ToolUse(_) => "tool_use",
            ContentFragment::ToolResults(_) => "tool_results",
            ContentFragment::Table(_) => "table",
            ContentFragment::Chart(_) => "chart",
            ContentFragment::Unknown(_) => "unknown",
        }
    }
}

/// A decoded agent stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// The `[DONE]` sentinel.
    Done,
    /// The service reported an error in-band.
    UpstreamError { code: String, message: String },
    /// Ordered content fragments of one delta.
    Delta(Vec<ContentFragment>),
}
