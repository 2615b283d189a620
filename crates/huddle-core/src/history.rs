//! Append-only message log.
//!
//! IDs are assigned by [`MessageLog::append`] under the caller's `&mut`
//! borrow, so they are unique and increase in append order.

use huddle_protocol::{now_millis, Author, ChatMessage, MessageId, MessageKind};
use std::collections::VecDeque;

/// Number of messages returned when a caller does not specify a limit.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Ordered message history.
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: VecDeque<ChatMessage>,
    next_id: MessageId,
    /// Keep at most this many messages; `None` keeps everything.
    retention: Option<usize>,
    /// Messages ever appended, including evicted ones.
    total_appended: u64,
}

impl MessageLog {
    /// Create an unbounded log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log that keeps only the newest `retention` messages.
    #[must_use]
    pub fn with_retention(retention: Option<usize>) -> Self {
        Self {
            retention: retention.map(|n| n.max(1)),
            ..Self::default()
        }
    }

    /// Append a message and return the stored copy with its assigned ID.
    pub fn append(
        &mut self,
        author: Author,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> ChatMessage {
        self.next_id += 1;
        let message = ChatMessage {
            id: self.next_id,
            author,
            content: content.into(),
            timestamp: now_millis(),
            kind,
        };

        self.messages.push_back(message.clone());
        self.total_appended += 1;

        if let Some(max) = self.retention {
            while self.messages.len() > max {
                self.messages.pop_front();
            }
        }

        message
    }

    /// Append a system message.
    pub fn append_system(&mut self, content: impl Into<String>) -> ChatMessage {
        self.append(Author::System, content, MessageKind::System)
    }

    /// The most recent `limit` messages, oldest first.
    #[must_use]
    pub fn tail(&self, limit: usize) -> Vec<ChatMessage> {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages.iter().skip(skip).cloned().collect()
    }

    /// Number of retained messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Total number of messages ever appended.
    #[must_use]
    pub fn total_appended(&self) -> u64 {
        self.total_appended
    }
}
