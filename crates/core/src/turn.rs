//! Conversation Turns
//!
//! A `Turn` is one entry of the append-only conversation log. Assistant turns may
//! carry raw structured sub-parts (`ToolPart`) decoded from the backend stream; the
//! typed view over those parts lives in `correlator`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Content of the first assistant turn of every session.
pub const SEED_GREETING: &str = "Welcome to the English Level Assessment! I'll ask you a series of questions to determine your English proficiency level. Let's start! What's your name?";

/// Content of the synthetic turn shown after a transport failure.
pub const TRANSPORT_ERROR_REPLY: &str = "Sorry, I encountered an error. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Lifecycle of a structured sub-part within an assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartState {
    /// The tool was announced; `args` may still be partial.
    Call,
    /// The tool produced its payload.
    Result,
}

/// A raw tool sub-part, kept exactly as it arrived on the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPart {
    pub call_id: String,
    pub tool_name: String,
    pub state: PartState,
    /// Arguments as announced by the model. `Value::Null` until known.
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ToolPart {
    pub fn call(call_id: impl Into<String>, tool_name: impl Into<String>, args: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            state: PartState::Call,
            args,
            result: None,
        }
    }

    pub fn resolved(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: Value,
        result: Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            state: PartState::Result,
            args,
            result: Some(result),
        }
    }
}

/// One conversational entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    /// Sent to the backend but never rendered.
    #[serde(default)]
    pub hidden: bool,
    /// True while the turn is still being filled by an open stream.
    #[serde(default)]
    pub streaming: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<ToolPart>,
}

impl Turn {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            hidden: false,
            streaming: false,
            parts: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// A user turn produced by answer submission rather than typed input.
    pub fn hidden_user(content: impl Into<String>) -> Self {
        Self {
            hidden: true,
            ..Self::new(Role::User, content)
        }
    }

    pub fn seed() -> Self {
        Self::assistant(SEED_GREETING)
    }

    pub fn with_parts(mut self, parts: Vec<ToolPart>) -> Self {
        self.parts = parts;
        self
    }
}

/// A completed tool exchange as sent back to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: Value,
    pub result: Value,
}

/// The `{role, content}` wire shape of one turn in an outbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<OutboundToolInvocation>,
}

impl From<&Turn> for OutboundMessage {
    fn from(turn: &Turn) -> Self {
        let tool_invocations = turn
            .parts
            .iter()
            .filter_map(|part| {
                part.result.as_ref().map(|result| OutboundToolInvocation {
                    tool_call_id: part.call_id.clone(),
                    tool_name: part.tool_name.clone(),
                    args: part.args.clone(),
                    result: result.clone(),
                })
            })
            .collect();
        Self {
            role: turn.role,
            content: turn.content.clone(),
            tool_invocations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hidden_user_turn() {
        let turn = Turn::hidden_user("I choose option b");
        assert_eq!(turn.role, Role::User);
        assert!(turn.hidden);
        assert!(!turn.streaming);
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
        assert_eq!(format!("{}", Role::Assistant), "assistant");
    }

    #[test]
    fn test_outbound_message_keeps_only_resolved_tools() {
        let turn = Turn::assistant("Here is a question").with_parts(vec![
            ToolPart::resolved(
                "call-1",
                "multipleChoice",
                json!({"question": "?"}),
                json!({"question": "?", "questionId": "q-1", "options": []}),
            ),
            ToolPart::call("call-2", "paraphrasingTask", json!({})),
        ]);

        let message = OutboundMessage::from(&turn);
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.tool_invocations.len(), 1);
        assert_eq!(message.tool_invocations[0].tool_call_id, "call-1");

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["toolInvocations"][0]["toolName"], "multipleChoice");
    }

    #[test]
    fn test_outbound_message_omits_empty_tool_list() {
        let message = OutboundMessage::from(&Turn::user("hello"));
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hello"}"#);
    }
}
