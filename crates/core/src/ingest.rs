//! Streaming Ingest Adapter
//!
//! Folds the events of one backend response into a single assistant turn. Text is
//! concatenated into a buffer and re-rendered on every chunk, except that anything
//! from the assessment marker onwards is never shown while streaming. Tool sub-parts
//! are upserted by call id, so duplicate or early results are absorbed.

use crate::{
    extract::{ASSESSMENT_MARKER, decode_embedded_assessment, split_on_marker},
    protocol::StreamEvent,
    tools::Assessment,
    turn::{PartState, Role, ToolPart, Turn},
};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPhase {
    Idle,
    Streaming,
}

/// The final state of a closed stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub turn: Turn,
    /// Decoded from text following the assessment marker, if any.
    pub assessment: Option<Assessment>,
}

#[derive(Debug)]
pub struct StreamIngest {
    phase: IngestPhase,
    streaming_id: Uuid,
    buffer: String,
    visible: String,
    parts: Vec<ToolPart>,
    arg_text: HashMap<String, String>,
    early_results: HashMap<String, Value>,
}

impl Default for StreamIngest {
    fn default() -> Self {
        Self {
            phase: IngestPhase::Idle,
            streaming_id: Uuid::new_v4(),
            buffer: String::new(),
            visible: String::new(),
            parts: Vec::new(),
            arg_text: HashMap::new(),
            early_results: HashMap::new(),
        }
    }
}

/// Length of the longest proper prefix of the marker that `text` ends with.
fn partial_marker_len(text: &str) -> usize {
    (1..ASSESSMENT_MARKER.len())
        .rev()
        .find(|&n| text.ends_with(&ASSESSMENT_MARKER[..n]))
        .unwrap_or(0)
}

impl StreamIngest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> IngestPhase {
        self.phase
    }

    /// Starts a new response, discarding anything left from a previous one.
    pub fn begin(&mut self) {
        *self = Self {
            phase: IngestPhase::Streaming,
            ..Self::default()
        };
    }

    /// Drops the in-progress response without committing any of it.
    pub fn abort(&mut self) {
        *self = Self::default();
    }

    fn render(&self) -> Turn {
        Turn {
            id: self.streaming_id,
            role: Role::Assistant,
            content: self.visible.clone(),
            hidden: false,
            streaming: true,
            parts: self.parts.clone(),
        }
    }

    fn part_mut(&mut self, call_id: &str) -> Option<&mut ToolPart> {
        self.parts.iter_mut().find(|p| p.call_id == call_id)
    }

    fn upsert_call(&mut self, call_id: String, tool_name: String, args: Option<Value>) {
        if let Some(part) = self.part_mut(&call_id) {
            part.tool_name = tool_name;
            if let Some(args) = args {
                part.args = args;
            }
            return;
        }
        let mut part = ToolPart::call(call_id.clone(), tool_name, args.unwrap_or(Value::Null));
        if let Some(result) = self.early_results.remove(&call_id) {
            part.state = PartState::Result;
            part.result = Some(result);
        }
        self.parts.push(part);
    }

    /// Applies one content event and returns the re-rendered streaming turn.
    ///
    /// Error and finish events carry no content and return `None`; the caller owns
    /// the stream lifecycle.
    pub fn apply(&mut self, event: StreamEvent) -> Option<Turn> {
        if self.phase != IngestPhase::Streaming {
            debug!(phase = ?self.phase, "Ignoring stream event outside of streaming phase");
            return None;
        }
        match event {
            StreamEvent::TextDelta(chunk) => {
                self.buffer.push_str(&chunk);
                if !self.buffer.contains(ASSESSMENT_MARKER) {
                    let keep = self.buffer.len() - partial_marker_len(&self.buffer);
                    self.visible = self.buffer[..keep].to_string();
                }
            }
            StreamEvent::ToolCallStart { call_id, tool_name } => {
                self.arg_text.insert(call_id.clone(), String::new());
                self.upsert_call(call_id, tool_name, None);
            }
            StreamEvent::ToolCallDelta {
                call_id,
                args_delta,
            } => {
                let text = self.arg_text.entry(call_id.clone()).or_default();
                text.push_str(&args_delta);
                // Provisional args are only exposed once the fragment parses.
                if let Ok(args) = serde_json::from_str::<Value>(text) {
                    if let Some(part) = self.part_mut(&call_id) {
                        part.args = args;
                    }
                }
            }
            StreamEvent::ToolCall {
                call_id,
                tool_name,
                args,
            } => {
                self.arg_text.remove(&call_id);
                self.upsert_call(call_id, tool_name, Some(args));
            }
            StreamEvent::ToolResult { call_id, result } => match self.part_mut(&call_id) {
                Some(part) => {
                    part.state = PartState::Result;
                    part.result = Some(result);
                }
                None => {
                    debug!(%call_id, "Tool result arrived before its call");
                    self.early_results.insert(call_id, result);
                    return None;
                }
            },
            StreamEvent::Error(_) | StreamEvent::Finish { .. } => return None,
        }
        Some(self.render())
    }

    /// Closes the stream and produces the final turn with a fresh permanent id.
    pub fn finish(&mut self) -> Committed {
        if !self.early_results.is_empty() {
            warn!(
                orphaned = self.early_results.len(),
                "Stream closed with tool results that never matched a call"
            );
        }

        let buffer = std::mem::take(&mut self.buffer);
        let (content, assessment) = match split_on_marker(&buffer) {
            Some((display, blob)) => (display.to_string(), decode_embedded_assessment(blob.trim())),
            None => (buffer.clone(), None),
        };
        let turn = Turn::assistant(content).with_parts(std::mem::take(&mut self.parts));

        self.abort();
        Committed { turn, assessment }
    }
}
