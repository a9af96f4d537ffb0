//! Turns successive session snapshots into the terminal output that is new
//! since the previous snapshot.

use std::collections::HashMap;

use talkdata_runtime::{ContentBlock, Message, MessageId, Role, ToolResultContent};

/// One printable piece of assistant output.
#[derive(Debug, Clone, PartialEq)]
pub enum Piece {
    /// A new assistant message begins.
    MessageStart,
    Text(String),
    ToolUse { name: String },
    ToolResults { name: String, summary: String },
    SqlTable { markdown: String, primary: bool },
    Table,
    Chart,
}

#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    /// Blocks fully printed.
    blocks: usize,
    /// Bytes of the trailing text block already printed.
    text_len: usize,
}

/// Remembers how much of each assistant message has been printed.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    progress: HashMap<MessageId, Progress>,
}

impl TranscriptPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything in `messages` not printed yet, in transcript order.
    pub fn diff(&mut self, messages: &[Message]) -> Vec<Piece> {
        let mut pieces = Vec::new();
        for message in messages.iter().filter(|m| m.role == Role::Assistant) {
            if !self.progress.contains_key(&message.id) {
                if message.content.is_empty() {
                    continue;
                }
                pieces.push(Piece::MessageStart);
            }
            let progress = self.progress.entry(message.id.clone()).or_default();
            advance(message, progress, &mut pieces);
        }
        pieces
    }
}

fn advance(message: &Message, progress: &mut Progress, pieces: &mut Vec<Piece>) {
    let last = message.content.len().saturating_sub(1);
    while let Some(block) = message.content.get(progress.blocks) {
        if let ContentBlock::Text { text } = block {
            // The trailing text block may still grow.
            if let Some(rest) = text.get(progress.text_len..).filter(|r| !r.is_empty()) {
                pieces.push(Piece::Text(rest.to_string()));
            }
            if progress.blocks == last {
                progress.text_len = text.len();
                return;
            }
        } else {
            pieces.push(piece_for(block));
        }
        progress.blocks += 1;
        progress.text_len = 0;
    }
}

fn piece_for(block: &ContentBlock) -> Piece {
    match block {
        ContentBlock::Text { text } => Piece::Text(text.clone()),
        ContentBlock::ToolUse { tool_use } => Piece::ToolUse {
            name: tool_use.name.clone(),
        },
        ContentBlock::ToolResults { tool_results } => Piece::ToolResults {
            name: tool_results.name.clone(),
            summary: summarize(&tool_results.content),
        },
        ContentBlock::SqlTable { text, primary } => Piece::SqlTable {
            markdown: text.clone(),
            primary: *primary,
        },
        ContentBlock::Table { .. } => Piece::Table,
        ContentBlock::Chart { .. } => Piece::Chart,
    }
}

fn summarize(content: &[ToolResultContent]) -> String {
    let Some(first) = content.first() else {
        return "(empty)".to_string();
    };
    match first {
        ToolResultContent::Json { json } => {
            if let Some(sql) = json["sql"].as_str() {
                return sql.to_string();
            }
            if let Some(results) = json["searchResults"].as_array() {
                return format!("{} search results", results.len());
            }
            let raw = json.to_string();
            match raw.char_indices().nth(120) {
                Some((idx, _)) => format!("{}...", &raw[..idx]),
                None => raw,
            }
        }
        ToolResultContent::Text { text } => text.clone(),
    }
}
