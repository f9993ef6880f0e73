use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::sleep;

pub const MAX_TURNS: usize = 10; // (user, assistant) pairs kept per session
pub const SESSION_TTL: Duration = Duration::from_secs(1800);
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String, // user | assistant
    pub content: String,
}

struct SessionEntry {
    messages: Vec<ChatTurn>,
    last_active: DateTime<Utc>,
}

/// Per-session chat history, in memory only. Reading a never-written session
/// id creates its (empty) entry and stamps it active.
pub struct ConversationMemory {
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        ConversationMemory {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_history(&self, session_id: &str) -> Vec<ChatTurn> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                messages: Vec::new(),
                last_active: Utc::now(),
            });
        entry.last_active = Utc::now();
        entry.messages.clone()
    }

    pub async fn add_turn(&self, session_id: &str, user_message: &str, assistant_reply: &str) {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                messages: Vec::new(),
                last_active: Utc::now(),
            });
        entry.last_active = Utc::now();
        entry.messages.push(ChatTurn {
            role: "user".to_string(),
            content: user_message.to_string(),
        });
        entry.messages.push(ChatTurn {
            role: "assistant".to_string(),
            content: assistant_reply.to_string(),
        });

        // Trim to the most recent turns.
        let max_messages = MAX_TURNS * 2;
        if entry.messages.len() > max_messages {
            let excess = entry.messages.len() - max_messages;
            entry.messages.drain(..excess);
        }
    }

    pub async fn clear_session(&self, session_id: &str) {
        self.sessions.lock().await.remove(session_id);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn evict_expired(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(SESSION_TTL.as_secs() as i64);
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_active >= cutoff);
        before - sessions.len()
    }
}

/// Background TTL sweep. Spawned at startup and aborted on shutdown; the
/// sleep is the cancellation point.
pub async fn run_cleanup_loop(memory: std::sync::Arc<ConversationMemory>) {
    loop {
        sleep(CLEANUP_INTERVAL).await;
        let evicted = memory.evict_expired().await;
        if evicted > 0 {
            log::debug!("[Memory] Evicted {} expired sessions", evicted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_of_unknown_session_creates_the_entry() {
        let memory = ConversationMemory::new();
        assert_eq!(memory.session_count().await, 0);
        let history = memory.get_history("brand-new").await;
        assert!(history.is_empty());
        assert_eq!(memory.session_count().await, 1);
    }

    #[tokio::test]
    async fn turns_accumulate_in_order() {
        let memory = ConversationMemory::new();
        memory.add_turn("s1", "what is T1110?", "Brute Force.").await;
        let history = memory.get_history("s1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "assistant");
        assert_eq!(history[1].content, "Brute Force.");
    }

    #[tokio::test]
    async fn history_is_capped_at_max_turns() {
        let memory = ConversationMemory::new();
        for i in 0..(MAX_TURNS + 5) {
            memory
                .add_turn("s1", &format!("q{}", i), &format!("a{}", i))
                .await;
        }
        let history = memory.get_history("s1").await;
        assert_eq!(history.len(), MAX_TURNS * 2);
        // Oldest turns were dropped.
        assert_eq!(history[0].content, "q5");
    }

    #[tokio::test]
    async fn clear_session_removes_it() {
        let memory = ConversationMemory::new();
        memory.add_turn("s1", "hello", "hi").await;
        memory.clear_session("s1").await;
        assert_eq!(memory.session_count().await, 0);
    }

    #[tokio::test]
    async fn fresh_sessions_survive_eviction() {
        let memory = ConversationMemory::new();
        memory.add_turn("s1", "hello", "hi").await;
        assert_eq!(memory.evict_expired().await, 0);
        assert_eq!(memory.session_count().await, 1);
    }
}
