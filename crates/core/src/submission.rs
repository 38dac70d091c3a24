//! Answer Submission Controller
//!
//! Records at most one selected option per presented question and produces the hidden
//! user turn that carries the selection to the backend.

use crate::{correlator::find_question, turn::Turn};
use std::collections::HashMap;
use tracing::debug;

/// The canonical phrase sent to the backend for a selection.
pub fn answer_phrase(option_id: &str) -> String {
    format!("I choose option {option_id}")
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The selection was recorded; the hidden turn must be appended and sent.
    Accepted(Turn),
    AlreadyAnswered,
    UnknownQuestion,
}

#[derive(Debug, Clone, Default)]
pub struct AnswerLedger {
    selections: HashMap<String, String>,
}

impl AnswerLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `option_id` for `question_id` if the question was presented in `turns`
    /// and has not been answered yet.
    pub fn submit(&mut self, turns: &[Turn], question_id: &str, option_id: &str) -> SubmitOutcome {
        if self.selections.contains_key(question_id) {
            debug!(%question_id, "Ignoring repeated answer");
            return SubmitOutcome::AlreadyAnswered;
        }
        if find_question(turns, question_id).is_none() {
            debug!(%question_id, "Ignoring answer for a question that was never presented");
            return SubmitOutcome::UnknownQuestion;
        }
        self.selections
            .insert(question_id.to_string(), option_id.to_string());
        SubmitOutcome::Accepted(Turn::hidden_user(answer_phrase(option_id)))
    }

    pub fn selected(&self, question_id: &str) -> Option<&str> {
        self.selections.get(question_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    pub fn clear(&mut self) {
        self.selections.clear();
    }
}
