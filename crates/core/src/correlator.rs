//! Tool-Call Correlator
//!
//! Pure derivations over the turn log. Each assistant turn's raw `ToolPart`s are turned
//! into typed `ToolInvocation`s; the cross-turn views (question count, latest
//! assessment, question lookup) are recomputed from scratch on every change.

use crate::{
    tools::{Assessment, ToolKind, ToolPayload},
    turn::{PartState, ToolPart, Turn},
};
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

/// A typed tool exchange within one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    /// Announced but not yet resolved; `args` are provisional.
    Call {
        call_id: String,
        kind: ToolKind,
        args: Value,
    },
    Result {
        call_id: String,
        payload: ToolPayload,
    },
}

impl ToolInvocation {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolInvocation::Call { kind, .. } => *kind,
            ToolInvocation::Result { payload, .. } => payload.kind(),
        }
    }

    pub fn call_id(&self) -> &str {
        match self {
            ToolInvocation::Call { call_id, .. } | ToolInvocation::Result { call_id, .. } => {
                call_id
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ToolInvocation::Call { .. })
    }
}

fn correlate(part: &ToolPart) -> Option<ToolInvocation> {
    let Ok(kind) = part.tool_name.parse::<ToolKind>() else {
        return None;
    };
    match (part.state, &part.result) {
        (PartState::Result, Some(result)) => match ToolPayload::from_result(kind, result) {
            Ok(payload) => Some(ToolInvocation::Result {
                call_id: part.call_id.clone(),
                payload,
            }),
            Err(e) => {
                warn!(tool = %kind, call_id = %part.call_id, error = %e, "Discarding tool result that fails its schema");
                None
            }
        },
        _ => Some(ToolInvocation::Call {
            call_id: part.call_id.clone(),
            kind,
            args: part.args.clone(),
        }),
    }
}

/// The turn's invocations of known tools, in the order they appeared.
pub fn invocations(turn: &Turn) -> Vec<ToolInvocation> {
    turn.parts.iter().filter_map(correlate).collect()
}

/// True when the turn's most recent invocation is still waiting for its result.
pub fn awaiting_tool_result(turn: &Turn) -> bool {
    invocations(turn).last().is_some_and(ToolInvocation::is_pending)
}

fn question_payloads(turns: &[Turn]) -> impl Iterator<Item = ToolPayload> + '_ {
    turns
        .iter()
        .flat_map(invocations)
        .filter_map(|inv| match inv {
            ToolInvocation::Result { payload, .. } if !payload.kind().is_terminal() => {
                Some(payload)
            }
            _ => None,
        })
}

/// Number of distinct question ids presented across the whole log.
pub fn derive_question_count(turns: &[Turn]) -> usize {
    question_payloads(turns)
        .filter_map(|p| p.question_id().map(str::to_owned))
        .collect::<HashSet<_>>()
        .len()
}

/// The resolved, non-terminal question with `question_id`, if one was presented.
pub fn find_question(turns: &[Turn], question_id: &str) -> Option<ToolPayload> {
    question_payloads(turns).find(|p| p.question_id() == Some(question_id))
}

/// The most recent resolved assessment anywhere in the log.
pub fn derive_latest_assessment(turns: &[Turn]) -> Option<Assessment> {
    turns
        .iter()
        .flat_map(invocations)
        .filter_map(|inv| match inv {
            ToolInvocation::Result {
                payload: ToolPayload::AssessmentResult(assessment),
                ..
            } => Some(assessment),
            _ => None,
        })
        .last()
}
