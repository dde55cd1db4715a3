//! Per-conversation session state
//!
//! Process-held only: created lazily on the first message, mutated every
//! turn, lost on restart. Losing it is acceptable — the worst case is the
//! user being asked again.

use crate::state_machine::ChatState;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Bounded history window shared with the intent extractor
pub const MAX_HISTORY_TURNS: usize = 10;

/// One (utterance, response) pair
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryTurn {
    pub utterance: String,
    pub response: String,
}

/// Fixed-capacity ring of recent turns; the oldest is evicted on overflow
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    turns: Vec<HistoryTurn>,
}

impl History {
    pub fn push(&mut self, utterance: impl Into<String>, response: impl Into<String>) {
        self.turns.push(HistoryTurn {
            utterance: utterance.into(),
            response: response.into(),
        });
        if self.turns.len() > MAX_HISTORY_TURNS {
            self.turns.remove(0);
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn turns(&self) -> &[HistoryTurn] {
        &self.turns
    }
}

/// Everything the orchestrator keeps between turns of one conversation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub state: ChatState,
    pub history: History,
}

/// Keyed session store. One user drives one conversation at a time, so a
/// take/put cycle per turn is all the coordination needed.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove the session for this conversation, creating it lazily
    pub async fn take(&self, conversation_id: &str) -> Session {
        self.sessions
            .lock()
            .await
            .remove(conversation_id)
            .unwrap_or_default()
    }

    pub async fn put(&self, conversation_id: &str, session: Session) {
        self.sessions
            .lock()
            .await
            .insert(conversation_id.to_string(), session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_evicts_oldest_on_overflow() {
        let mut history = History::default();
        for i in 0..15 {
            history.push(format!("u{i}"), format!("r{i}"));
        }
        assert_eq!(history.turns().len(), MAX_HISTORY_TURNS);
        assert_eq!(history.turns()[0].utterance, "u5");
        assert_eq!(history.turns().last().unwrap().utterance, "u14");
    }

    #[tokio::test]
    async fn sessions_are_created_lazily_and_round_trip() {
        let store = SessionStore::new();
        let mut session = store.take("chat-1").await;
        assert_eq!(session, Session::default());

        session.history.push("hi", "hello");
        store.put("chat-1", session.clone()).await;

        let again = store.take("chat-1").await;
        assert_eq!(again, session);
        // take removes; a second take starts fresh
        assert_eq!(store.take("chat-1").await, Session::default());
    }
}
