//! Session State Store
//!
//! Owns the ordered turn log. Turns are only ever appended; the trailing turn is the
//! only one that may be amended in place, and only while it is still streaming.

use crate::turn::{OutboundMessage, Turn};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SessionStore {
    turns: Vec<Turn>,
}

impl SessionStore {
    pub fn new(seed: Turn) -> Self {
        Self { turns: vec![seed] }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    fn streaming_tail(&self) -> bool {
        self.turns.last().is_some_and(|t| t.streaming)
    }

    /// Appends a finished turn. Any open streaming turn is frozen first.
    pub fn append(&mut self, turn: Turn) {
        if let Some(last) = self.turns.last_mut() {
            last.streaming = false;
        }
        self.turns.push(Turn {
            streaming: false,
            ..turn
        });
    }

    /// Replaces the open streaming turn with `turn`, or appends it as the new one.
    pub fn append_or_replace_streaming(&mut self, turn: Turn) {
        let turn = Turn {
            streaming: true,
            ..turn
        };
        match self.turns.last_mut() {
            Some(last) if last.streaming => *last = turn,
            _ => self.turns.push(turn),
        }
    }

    /// Finalizes the open streaming turn as `turn`, which carries its permanent id.
    pub fn commit_turn(&mut self, turn: Turn) {
        let turn = Turn {
            streaming: false,
            ..turn
        };
        debug!(turn_id = %turn.id, "Committing turn");
        match self.turns.last_mut() {
            Some(last) if last.streaming => *last = turn,
            _ => self.turns.push(turn),
        }
    }

    /// Drops the open streaming turn, if any, leaving no trace of it.
    pub fn discard_streaming(&mut self) -> bool {
        if self.streaming_tail() {
            self.turns.pop();
            true
        } else {
            false
        }
    }

    /// Replaces the whole log with a single seed turn.
    pub fn reset(&mut self, seed: Turn) {
        self.turns.clear();
        self.turns.push(Turn {
            streaming: false,
            ..seed
        });
    }

    /// The conversation as sent to the backend: hidden turns included, open
    /// streaming turns excluded.
    pub fn outbound(&self) -> Vec<OutboundMessage> {
        self.turns
            .iter()
            .filter(|t| !t.streaming)
            .map(OutboundMessage::from)
            .collect()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Turn::seed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::Role;

    #[test]
    fn test_streaming_turn_is_replaced_in_place() {
        let mut store = SessionStore::default();
        store.append(Turn::user("hi"));
        store.append_or_replace_streaming(Turn::assistant("Hel"));
        store.append_or_replace_streaming(Turn::assistant("Hello"));

        assert_eq!(store.turns().len(), 3);
        let last = store.last().unwrap();
        assert!(last.streaming);
        assert_eq!(last.content, "Hello");
    }

    #[test]
    fn test_commit_freezes_streaming_turn() {
        let mut store = SessionStore::default();
        store.append_or_replace_streaming(Turn::assistant("partial"));
        let committed = Turn::assistant("final");
        let committed_id = committed.id;
        store.commit_turn(committed);

        assert_eq!(store.turns().len(), 2);
        let last = store.last().unwrap();
        assert!(!last.streaming);
        assert_eq!(last.id, committed_id);

        // A new streaming turn must not overwrite the committed one.
        store.append_or_replace_streaming(Turn::assistant("next"));
        assert_eq!(store.turns().len(), 3);
        assert_eq!(store.turns()[1].content, "final");
    }

    #[test]
    fn test_commit_without_streaming_appends() {
        let mut store = SessionStore::default();
        store.commit_turn(Turn::assistant("standalone"));
        assert_eq!(store.turns().len(), 2);
    }

    #[test]
    fn test_discard_streaming_leaves_no_trace() {
        let mut store = SessionStore::default();
        store.append(Turn::user("question"));
        store.append_or_replace_streaming(Turn::assistant("half an ans"));
        assert!(store.discard_streaming());
        assert_eq!(store.turns().len(), 2);
        assert!(!store.discard_streaming());
    }

    #[test]
    fn test_outbound_includes_hidden_excludes_streaming() {
        let mut store = SessionStore::default();
        store.append(Turn::hidden_user("I choose option b"));
        store.append_or_replace_streaming(Turn::assistant("typing"));

        let outbound = store.outbound();
        assert_eq!(outbound.len(), 2);
        assert_eq!(outbound[1].role, Role::User);
        assert_eq!(outbound[1].content, "I choose option b");
    }

    #[test]
    fn test_reset_leaves_single_seed() {
        let mut store = SessionStore::default();
        store.append(Turn::user("a"));
        store.append_or_replace_streaming(Turn::assistant("b"));
        store.reset(Turn::seed());

        assert_eq!(store.turns().len(), 1);
        assert_eq!(store.turns()[0].role, Role::Assistant);
        assert!(!store.turns()[0].streaming);
    }
}
