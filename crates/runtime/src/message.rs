//! Conversation data model shared with the agent service wire format.
//!
//! Blocks serialize with a `type` tag exactly as the agent `:run` endpoint
//! expects them in `messages[].content[]`, so a [`Message`] can be sent back
//! upstream as history without translation. The one exception is
//! [`ContentBlock::SqlTable`], which is produced locally and must be stripped
//! before a transcript is sent (see [`crate::transcript::strip_sql_tables`]).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Client-generated message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A message in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// An assistant message with no content, ready to accumulate deltas.
    pub fn empty_assistant(id: MessageId) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: Vec::new(),
        }
    }

    /// A single-text-block user message.
    pub fn user(id: MessageId, text: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Concatenated text of all `text` blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// One typed block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { tool_use: ToolUse },
    ToolResults { tool_results: ToolResults },
    /// Table payload as streamed by the agent.
    Table { table: Value },
    Chart { chart: Value },
    /// Markdown rendering of a statement result. Local only.
    SqlTable { text: String, primary: bool },
}

impl ContentBlock {
    pub fn kind(&self) -> &'static str {
        match self {
            ContentBlock::Text { .. } => "text",
            ContentBlock::ToolUse { .. } => "tool_use",
            ContentBlock::ToolResults { .. } => "tool_results",
            ContentBlock::Table { .. } => "table",
            ContentBlock::Chart { .. } => "chart",
            ContentBlock::SqlTable { .. } => "sql_table",
        }
    }
}

/// Tool invocation as streamed. Keys without a typed field are kept in
/// `extra` so the block goes back upstream exactly as it arrived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub tool_use_id: String,
    pub name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResults {
    /// Not always sent; only `content` is needed to detect generated SQL.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub content: Vec<ToolResultContent>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToolResults {
    /// The first JSON-typed item, which carries generated SQL for the
    /// text-to-SQL tool.
    pub fn first_json(&self) -> Option<&Value> {
        self.content.iter().find_map(|item| match item {
            ToolResultContent::Json { json } => Some(json),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultContent {
    Json { json: Value },
    Text { text: String },
}
