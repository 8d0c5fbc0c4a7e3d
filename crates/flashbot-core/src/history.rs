use std::collections::{HashMap, VecDeque};

use crate::domain::{ChatId, Role};

#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
}

/// Per-chat rolling transcript of the last few exchanges.
///
/// Bounded per chat; nothing is persisted across restarts.
pub struct ChatHistory {
    limit: usize,
    chats: HashMap<i64, VecDeque<HistoryEntry>>,
}

impl ChatHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            chats: HashMap::new(),
        }
    }

    pub fn record(&mut self, chat_id: ChatId, role: Role, text: &str) {
        let entries = self.chats.entry(chat_id.0).or_default();
        entries.push_back(HistoryEntry {
            role,
            text: text.to_string(),
        });
        while entries.len() > self.limit {
            entries.pop_front();
        }
    }

    /// Render the chat's history as `ROLE: text` lines, oldest first.
    pub fn transcript(&self, chat_id: ChatId) -> String {
        let Some(entries) = self.chats.get(&chat_id.0) else {
            return String::new();
        };

        entries
            .iter()
            .map(|e| format!("{}: {}", e.role.as_str(), e.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
