//! Conversation history, keyed by thread id.
//!
//! History is the only state that outlives a turn. It is reached through the
//! injected [`ConversationHistory`] trait — `get` returns the ordered
//! message list for a thread, `append` adds to it — and is mutated only by
//! appending.

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::message::Message;

#[async_trait]
pub trait ConversationHistory: Send + Sync {
    /// Ordered messages for a thread; empty for unknown threads.
    async fn get(&self, thread_id: &str) -> Vec<Message>;

    /// Append one message to a thread, creating the thread if needed.
    async fn append(&self, thread_id: &str, message: Message);
}

/// In-memory history store.
#[derive(Default)]
pub struct MemoryHistory {
    threads: RwLock<FxHashMap<String, Vec<Message>>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages in a thread.
    pub fn len(&self, thread_id: &str) -> usize {
        self.threads
            .read()
            .get(thread_id)
            .map_or(0, |messages| messages.len())
    }

    pub fn is_empty(&self, thread_id: &str) -> bool {
        self.len(thread_id) == 0
    }
}

#[async_trait]
impl ConversationHistory for MemoryHistory {
    async fn get(&self, thread_id: &str) -> Vec<Message> {
        self.threads
            .read()
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn append(&self, thread_id: &str, message: Message) {
        self.threads
            .write()
            .entry(thread_id.to_string())
            .or_default()
            .push(message);
    }
}
