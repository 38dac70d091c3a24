//! Defines the WebSocket message protocol between the browser client and the API server.

use levelcheck_core::SessionView;
use serde::{Deserialize, Serialize};

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Free-form text typed by the user.
    UserMessage { text: String },
    /// A click on one option of a presented question.
    SubmitAnswer {
        #[serde(rename = "questionId")]
        question_id: String,
        #[serde(rename = "optionId")]
        option_id: String,
    },
    /// Discards the interview and starts over from the greeting.
    Restart,
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The full rendering state, pushed after every change.
    Snapshot { view: SessionView },
    /// The last client message could not be acted upon.
    Rejected { reason: String },
    /// Reports a protocol error to the client.
    Error { message: String },
}
