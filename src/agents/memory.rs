// Per-thread conversation checkpoints

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{LLMMessage, MessageRole};

struct Checkpoint {
    messages: Vec<LLMMessage>,
    stamp: u64,
}

#[derive(Default)]
struct Threads {
    entries: HashMap<String, Checkpoint>,
    clock: u64,
}

/// In-process message history keyed by thread id.
///
/// A thread's history is replaced only after a turn completes, so a failed or
/// timed-out turn leaves the previous checkpoint untouched. At most
/// `max_threads` threads are kept; the one committed least recently goes first.
pub struct ConversationMemory {
    threads: RwLock<Threads>,
    max_messages: usize,
    max_threads: usize,
}

impl ConversationMemory {
    pub fn new(max_messages: usize, max_threads: usize) -> Self {
        Self {
            threads: RwLock::new(Threads::default()),
            max_messages: max_messages.max(1),
            max_threads: max_threads.max(1),
        }
    }

    pub async fn history(&self, thread_id: &str) -> Option<Vec<LLMMessage>> {
        self.threads
            .read()
            .await
            .entries
            .get(thread_id)
            .map(|c| c.messages.clone())
    }

    pub async fn contains(&self, thread_id: &str) -> bool {
        self.threads.read().await.entries.contains_key(thread_id)
    }

    pub async fn len(&self) -> usize {
        self.threads.read().await.entries.len()
    }

    pub async fn commit(&self, thread_id: &str, mut messages: Vec<LLMMessage>) {
        trim_history(&mut messages, self.max_messages);

        let mut threads = self.threads.write().await;
        threads.clock += 1;
        let stamp = threads.clock;

        if !threads.entries.contains_key(thread_id) && threads.entries.len() >= self.max_threads {
            let oldest = threads
                .entries
                .iter()
                .min_by_key(|(_, c)| c.stamp)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                debug!(thread_id = %oldest, "Evicting least recently used conversation");
                threads.entries.remove(&oldest);
            }
        }
        threads
            .entries
            .insert(thread_id.to_string(), Checkpoint { messages, stamp });
    }

    pub async fn forget(&self, thread_id: &str) {
        self.threads.write().await.entries.remove(thread_id);
    }
}

/// Drop the oldest messages so at most `max` remain, cutting only where a
/// user message starts a turn. A single turn longer than `max` is kept whole.
fn trim_history(messages: &mut Vec<LLMMessage>, max: usize) {
    if messages.len() <= max {
        return;
    }
    let earliest = messages.len() - max;
    let cut = messages[earliest..]
        .iter()
        .position(|m| m.role == MessageRole::User)
        .map(|offset| earliest + offset)
        .or_else(|| messages.iter().rposition(|m| m.role == MessageRole::User))
        .unwrap_or(0);
    messages.drain(..cut);
}
