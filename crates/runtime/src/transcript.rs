use serde::{Deserialize, Serialize};

use crate::message::{ContentBlock, Message, MessageId};

/// Ordered conversation history as shown to the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Replace the message with the same id in place, or append it if the id
    /// is not in the transcript yet.
    pub fn upsert(&mut self, message: &Message) {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(slot) => slot.clone_from(message),
            None => self.messages.push(message.clone()),
        }
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let idx = self.messages.iter().position(|m| &m.id == id)?;
        Some(self.messages.remove(idx))
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Copy of `messages` without `sql_table` blocks, which the agent service
/// rejects as input. Block order and every other block type are preserved.
pub fn strip_sql_tables(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .map(|message| Message {
            id: message.id.clone(),
            role: message.role,
            content: message
                .content
                .iter()
                .filter(|block| !matches!(block, ContentBlock::SqlTable { .. }))
                .cloned()
                .collect(),
        })
        .collect()
}
