//! Data Stream Codec
//!
//! The backend response is a line-oriented text stream. Every line is one frame of the
//! form `<code>:<json>`:
//!
//! | code | event                                            |
//! |------|--------------------------------------------------|
//! | `0`  | text delta (JSON string)                         |
//! | `b`  | tool call streaming start `{toolCallId,toolName}`|
//! | `c`  | tool call args delta `{toolCallId,argsTextDelta}`|
//! | `9`  | tool call `{toolCallId,toolName,args}`           |
//! | `a`  | tool result `{toolCallId,result}`                |
//! | `3`  | error (JSON string)                              |
//! | `d`  | finish `{finishReason}`                          |
//!
//! Unknown codes are skipped so newer backends can add frames freely.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

/// One decoded backend event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCallStart {
        call_id: String,
        tool_name: String,
    },
    ToolCallDelta {
        call_id: String,
        args_delta: String,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
        args: Value,
    },
    ToolResult {
        call_id: String,
        result: Value,
    },
    /// The backend reported a failure in-band.
    Error(String),
    Finish {
        reason: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Frame is missing the ':' separator")]
    MissingSeparator,
    #[error("Invalid payload for frame '{code}': {source}")]
    InvalidPayload {
        code: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallStartFrame {
    tool_call_id: String,
    tool_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallDeltaFrame {
    tool_call_id: String,
    args_text_delta: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallFrame {
    tool_call_id: String,
    tool_name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolResultFrame {
    tool_call_id: String,
    result: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinishFrame {
    #[serde(default)]
    finish_reason: Option<String>,
}

/// Encodes one event as a newline-terminated frame.
pub fn encode_event(event: &StreamEvent) -> String {
    let (code, payload) = match event {
        StreamEvent::TextDelta(text) => ('0', json!(text)),
        StreamEvent::ToolCallStart { call_id, tool_name } => (
            'b',
            json!({"toolCallId": call_id, "toolName": tool_name}),
        ),
        StreamEvent::ToolCallDelta {
            call_id,
            args_delta,
        } => (
            'c',
            json!({"toolCallId": call_id, "argsTextDelta": args_delta}),
        ),
        StreamEvent::ToolCall {
            call_id,
            tool_name,
            args,
        } => (
            '9',
            json!({"toolCallId": call_id, "toolName": tool_name, "args": args}),
        ),
        StreamEvent::ToolResult { call_id, result } => {
            ('a', json!({"toolCallId": call_id, "result": result}))
        }
        StreamEvent::Error(message) => ('3', json!(message)),
        StreamEvent::Finish { reason } => ('d', json!({"finishReason": reason})),
    };
    format!("{code}:{payload}\n")
}

/// Decodes a single frame (without its trailing newline).
///
/// Returns `Ok(None)` for blank lines and unknown frame codes.
pub fn decode_line(line: &str) -> Result<Option<StreamEvent>, ProtocolError> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return Ok(None);
    }
    let (code, payload) = line
        .split_once(':')
        .ok_or(ProtocolError::MissingSeparator)?;

    fn parse<T: serde::de::DeserializeOwned>(
        code: &str,
        payload: &str,
    ) -> Result<T, ProtocolError> {
        serde_json::from_str(payload).map_err(|source| ProtocolError::InvalidPayload {
            code: code.to_string(),
            source,
        })
    }

    let event = match code {
        "0" => StreamEvent::TextDelta(parse(code, payload)?),
        "b" => {
            let frame: ToolCallStartFrame = parse(code, payload)?;
            StreamEvent::ToolCallStart {
                call_id: frame.tool_call_id,
                tool_name: frame.tool_name,
            }
        }
        "c" => {
            let frame: ToolCallDeltaFrame = parse(code, payload)?;
            StreamEvent::ToolCallDelta {
                call_id: frame.tool_call_id,
                args_delta: frame.args_text_delta,
            }
        }
        "9" => {
            let frame: ToolCallFrame = parse(code, payload)?;
            StreamEvent::ToolCall {
                call_id: frame.tool_call_id,
                tool_name: frame.tool_name,
                args: frame.args,
            }
        }
        "a" => {
            let frame: ToolResultFrame = parse(code, payload)?;
            StreamEvent::ToolResult {
                call_id: frame.tool_call_id,
                result: frame.result,
            }
        }
        "3" => StreamEvent::Error(parse(code, payload)?),
        "d" => {
            let frame: FinishFrame = parse(code, payload)?;
            StreamEvent::Finish {
                reason: frame.finish_reason,
            }
        }
        other => {
            debug!(code = other, "Skipping unknown stream frame");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

/// Incremental decoder for a chunked data stream.
///
/// Chunks may split frames, and may split multi-byte UTF-8 sequences; bytes are held
/// until a full line is available.
#[derive(Debug, Default)]
pub struct DataStreamDecoder {
    pending: Vec<u8>,
}

impl DataStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            Self::decode_into(&line[..line.len() - 1], &mut events);
        }
        events
    }

    /// Flushes a trailing frame that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.pending);
        let mut events = Vec::new();
        Self::decode_into(&rest, &mut events);
        events
    }

    fn decode_into(bytes: &[u8], events: &mut Vec<StreamEvent>) {
        let line = match std::str::from_utf8(bytes) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Dropping stream frame with invalid UTF-8");
                return;
            }
        };
        match decode_line(line) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Dropping malformed stream frame"),
        }
    }
}
