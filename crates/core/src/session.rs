//! Interview Session Orchestrator
//!
//! `InterviewSession` is the single owner of all per-interview state: the turn log,
//! the ingest state machine for the one request that may be in flight, the recorded
//! answers, and the derived progress and assessment. Every mutation is synchronous;
//! the async side (`runner`) only delivers events tagged with the request generation
//! they belong to, and events for any other generation are dropped.

use crate::{
    correlator::{ToolInvocation, awaiting_tool_result, derive_question_count, invocations},
    extract::extract_assessment,
    ingest::StreamIngest,
    protocol::StreamEvent,
    store::SessionStore,
    submission::{AnswerLedger, SubmitOutcome},
    tools::{Assessment, ToolKind, ToolPayload},
    turn::{OutboundMessage, Role, TRANSPORT_ERROR_REPLY, Turn},
};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Number of questions the progress indicator is scaled against.
pub const DEFAULT_TOTAL_QUESTIONS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Message is empty")]
    EmptyInput,
    #[error("A response is still streaming")]
    Busy,
    #[error("The assessment is already complete")]
    Complete,
}

/// An outbound request the caller must deliver to the backend.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub generation: u64,
    pub messages: Vec<OutboundMessage>,
    pub cancel: CancellationToken,
}

#[derive(Debug)]
struct InFlight {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Debug)]
pub struct InterviewSession {
    store: SessionStore,
    ingest: StreamIngest,
    answers: AnswerLedger,
    question_count: usize,
    assessment: Option<Assessment>,
    ingested_assessment: Option<Assessment>,
    in_flight: Option<InFlight>,
    generation: u64,
    total_questions: usize,
}

impl Default for InterviewSession {
    fn default() -> Self {
        Self::new(DEFAULT_TOTAL_QUESTIONS)
    }
}

impl InterviewSession {
    pub fn new(total_questions: usize) -> Self {
        Self {
            store: SessionStore::new(Turn::seed()),
            ingest: StreamIngest::new(),
            answers: AnswerLedger::new(),
            question_count: 0,
            assessment: None,
            ingested_assessment: None,
            in_flight: None,
            generation: 0,
            total_questions,
        }
    }

    // --- Read Side ---

    pub fn turns(&self) -> &[Turn] {
        self.store.turns()
    }

    pub fn question_count(&self) -> usize {
        self.question_count
    }

    pub fn total_questions(&self) -> usize {
        self.total_questions
    }

    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }

    pub fn selected_option(&self, question_id: &str) -> Option<&str> {
        self.answers.selected(question_id)
    }

    pub fn assessment(&self) -> Option<&Assessment> {
        self.assessment.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.assessment.is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// True while the latest turn announced a tool whose result has not arrived.
    pub fn is_awaiting_tool(&self) -> bool {
        self.store.last().is_some_and(awaiting_tool_result)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|f| f.generation == generation)
    }

    // --- Outbound Operations ---

    /// Appends typed user input and opens the next request.
    pub fn send_turn(&mut self, text: &str) -> Result<PendingRequest, SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::EmptyInput);
        }
        if self.is_busy() {
            return Err(SessionError::Busy);
        }
        if self.is_complete() {
            return Err(SessionError::Complete);
        }
        self.store.append(Turn::user(text));
        Ok(self.start_request())
    }

    /// Records an answer and opens the next request.
    ///
    /// Returns `None` when the submission is ignored: a response is streaming, the
    /// question was already answered, or it was never presented.
    pub fn submit_answer(&mut self, question_id: &str, option_id: &str) -> Option<PendingRequest> {
        if self.is_busy() {
            debug!(%question_id, "Ignoring answer while a response is streaming");
            return None;
        }
        match self.answers.submit(self.store.turns(), question_id, option_id) {
            SubmitOutcome::Accepted(turn) => {
                info!(%question_id, %option_id, "Answer recorded");
                self.store.append(turn);
                Some(self.start_request())
            }
            SubmitOutcome::AlreadyAnswered | SubmitOutcome::UnknownQuestion => None,
        }
    }

    fn start_request(&mut self) -> PendingRequest {
        self.generation += 1;
        let cancel = CancellationToken::new();
        self.ingest.begin();
        self.in_flight = Some(InFlight {
            generation: self.generation,
            cancel: cancel.clone(),
        });
        debug!(generation = self.generation, "Opening backend request");
        PendingRequest {
            generation: self.generation,
            messages: self.store.outbound(),
            cancel,
        }
    }

    // --- Inbound Stream ---

    /// Folds one backend event into the session. Returns whether anything changed.
    pub fn apply_event(&mut self, generation: u64, event: StreamEvent) -> bool {
        if !self.is_current(generation) {
            debug!(generation, "Dropping event from a stale request");
            return false;
        }
        if let StreamEvent::Error(message) = event {
            return self.fail(generation, &message);
        }
        match self.ingest.apply(event) {
            Some(turn) => {
                self.store.append_or_replace_streaming(turn);
                self.refresh();
                true
            }
            None => false,
        }
    }

    /// Commits the response of `generation` after its stream closed cleanly.
    pub fn finish(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        let committed = self.ingest.finish();
        self.store.commit_turn(committed.turn);
        if committed.assessment.is_some() {
            self.ingested_assessment = committed.assessment;
        }
        self.in_flight = None;
        self.refresh();
        true
    }

    /// Discards the partial response of `generation` and shows the error turn.
    pub fn fail(&mut self, generation: u64, reason: &str) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        error!(generation, %reason, "Backend request failed");
        self.ingest.abort();
        self.store.discard_streaming();
        self.store.append(Turn::assistant(TRANSPORT_ERROR_REPLY));
        self.in_flight = None;
        self.rederive_assessment();
        true
    }

    /// Aborts the in-flight request, if any, leaving no trace of its partial turn.
    pub fn cancel(&mut self) -> bool {
        let Some(in_flight) = self.in_flight.take() else {
            return false;
        };
        info!(generation = in_flight.generation, "Cancelling backend request");
        in_flight.cancel.cancel();
        self.ingest.abort();
        self.store.discard_streaming();
        self.rederive_assessment();
        true
    }

    /// Starts the interview over from the seed turn.
    pub fn restart(&mut self) {
        self.cancel();
        self.store.reset(Turn::seed());
        self.answers.clear();
        self.question_count = 0;
        self.assessment = None;
        self.ingested_assessment = None;
        info!("Session restarted");
    }

    /// Drops an assessment that only the discarded streaming turn carried.
    fn rederive_assessment(&mut self) {
        self.assessment = None;
        self.refresh();
    }

    fn refresh(&mut self) {
        let turns = self.store.turns();
        let count = derive_question_count(turns);
        if count != self.question_count {
            info!(question_count = count, "Question count changed");
            self.question_count = count;
        }

        // Once the carrying turn is committed, the assessment is final.
        if self.assessment.is_none() {
            self.assessment =
                extract_assessment(turns).or_else(|| self.ingested_assessment.clone());
            if let Some(assessment) = &self.assessment {
                info!(level = ?assessment.level, "Assessment complete");
            }
        }
    }

    // --- Rendering View ---

    pub fn view(&self) -> SessionView {
        let turns = self
            .turns()
            .iter()
            .filter(|t| !t.hidden)
            .map(|t| TurnView {
                id: t.id,
                role: t.role,
                content: t.content.clone(),
                streaming: t.streaming,
                invocations: invocations(t)
                    .into_iter()
                    .map(|inv| self.invocation_view(inv))
                    .collect(),
            })
            .collect();
        let progress_percent = if self.total_questions == 0 {
            0
        } else {
            ((self.question_count as f64 / self.total_questions as f64) * 100.0).round() as u32
        };
        SessionView {
            turns,
            question_count: self.question_count,
            total_questions: self.total_questions,
            progress_percent,
            busy: self.is_busy(),
            awaiting_tool: self.is_awaiting_tool(),
            complete: self.is_complete(),
            assessment: self.assessment.clone(),
        }
    }

    fn invocation_view(&self, invocation: ToolInvocation) -> InvocationView {
        match invocation {
            ToolInvocation::Call {
                call_id,
                kind,
                args,
            } => InvocationView::Call {
                call_id,
                tool_name: kind,
                args,
            },
            ToolInvocation::Result { call_id, payload } => {
                let selection = payload
                    .question_id()
                    .and_then(|qid| self.answers.selected(qid))
                    .map(|option_id| {
                        let choice = payload.choice(option_id);
                        SelectionView {
                            option_id: option_id.to_string(),
                            label: choice.and_then(|c| c.label).map(str::to_owned),
                            text: payload.option_text(option_id).to_string(),
                        }
                    });
                InvocationView::Result {
                    call_id,
                    payload,
                    selection,
                }
            }
        }
    }
}

impl Drop for InterviewSession {
    fn drop(&mut self) {
        if let Some(in_flight) = &self.in_flight {
            in_flight.cancel.cancel();
        }
    }
}

/// Snapshot handed to rendering collaborators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub turns: Vec<TurnView>,
    pub question_count: usize,
    pub total_questions: usize,
    pub progress_percent: u32,
    pub busy: bool,
    pub awaiting_tool: bool,
    pub complete: bool,
    pub assessment: Option<Assessment>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnView {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub streaming: bool,
    pub invocations: Vec<InvocationView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum InvocationView {
    Call {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "toolName")]
        tool_name: ToolKind,
        args: Value,
    },
    Result {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(flatten)]
        payload: ToolPayload,
        /// The user's answer, once given.
        selection: Option<SelectionView>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionView {
    pub option_id: String,
    pub label: Option<String>,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ProficiencyLevel;
    use serde_json::json;

    fn text(s: &str) -> StreamEvent {
        StreamEvent::TextDelta(s.to_string())
    }

    fn present_question(session: &mut InterviewSession, generation: u64, qid: &str) {
        session.apply_event(
            generation,
            StreamEvent::ToolCall {
                call_id: format!("call-{qid}"),
                tool_name: "multipleChoice".into(),
                args: json!({}),
            },
        );
        session.apply_event(
            generation,
            StreamEvent::ToolResult {
                call_id: format!("call-{qid}"),
                result: json!({
                    "question": "Pick one",
                    "options": [
                        {"id": "a", "label": "A", "text": "first"},
                        {"id": "b", "label": "B", "text": "second"}
                    ],
                    "questionId": qid
                }),
            },
        );
    }

    fn assessment_result(level: &str) -> StreamEvent {
        StreamEvent::ToolResult {
            call_id: "assess".into(),
            result: json!({
                "level": level,
                "strengths": [],
                "weaknesses": [],
                "recommendations": []
            }),
        }
    }

    #[test]
    fn test_plain_text_turn() {
        let mut session = InterviewSession::default();
        let request = session.send_turn("My name is Sam").unwrap();
        assert_eq!(request.messages.len(), 2);
        assert!(session.is_busy());

        session.apply_event(request.generation, text("The answer is "));
        session.apply_event(request.generation, text("42."));
        assert!(session.finish(request.generation));

        let last = session.turns().last().unwrap();
        assert_eq!(last.content, "The answer is 42.");
        assert!(last.parts.is_empty());
        assert_eq!(session.question_count(), 0);
        assert!(!session.is_busy());
    }

    #[test]
    fn test_single_request_in_flight() {
        let mut session = InterviewSession::default();
        session.send_turn("hello").unwrap();
        assert_eq!(session.send_turn("again").unwrap_err(), SessionError::Busy);
        assert_eq!(session.send_turn("   ").unwrap_err(), SessionError::EmptyInput);
    }

    #[test]
    fn test_answer_submission_flow() {
        let mut session = InterviewSession::default();
        let request = session.send_turn("ready").unwrap();
        present_question(&mut session, request.generation, "q-1");

        // Busy sessions ignore clicks.
        assert!(session.submit_answer("q-1", "b").is_none());
        session.finish(request.generation);
        assert_eq!(session.question_count(), 1);

        let turns_before = session.turns().len();
        let next = session.submit_answer("q-1", "b").unwrap();
        assert_eq!(session.turns().len(), turns_before + 1);
        let hidden = session.turns().last().unwrap();
        assert!(hidden.hidden);
        assert!(hidden.content.contains('b'));
        assert_eq!(next.messages.last().unwrap().content, "I choose option b");
        session.finish(next.generation);

        // A second click on the same question does nothing.
        let turns_after = session.turns().len();
        assert!(session.submit_answer("q-1", "a").is_none());
        assert_eq!(session.turns().len(), turns_after);
        assert_eq!(session.selected_option("q-1"), Some("b"));
        assert_eq!(session.answered_count(), 1);
    }

    #[test]
    fn test_view_hides_hidden_turns_and_shows_selection() {
        let mut session = InterviewSession::default();
        let request = session.send_turn("ready").unwrap();
        present_question(&mut session, request.generation, "q-1");
        session.finish(request.generation);
        let next = session.submit_answer("q-1", "b").unwrap();
        session.finish(next.generation);

        let view = session.view();
        assert!(view.turns.iter().all(|t| t.content != "I choose option b"));
        assert_eq!(view.question_count, 1);
        assert_eq!(view.progress_percent, 10);

        let json = serde_json::to_value(&view).unwrap();
        let invocation = &json["turns"][2]["invocations"][0];
        assert_eq!(invocation["state"], "result");
        assert_eq!(invocation["toolName"], "multipleChoice");
        assert_eq!(invocation["payload"]["questionId"], "q-1");
        assert_eq!(invocation["selection"]["label"], "B");
        assert_eq!(invocation["selection"]["text"], "second");
    }

    #[test]
    fn test_awaiting_tool_while_call_is_pending() {
        let mut session = InterviewSession::default();
        let request = session.send_turn("go").unwrap();
        session.apply_event(
            request.generation,
            StreamEvent::ToolCallStart {
                call_id: "c1".into(),
                tool_name: "readingComprehension".into(),
            },
        );
        assert!(session.is_awaiting_tool());
        assert!(session.view().awaiting_tool);
    }

    #[test]
    fn test_structured_assessment_completes_mid_stream() {
        let mut session = InterviewSession::default();
        let request = session.send_turn("done?").unwrap();
        session.apply_event(
            request.generation,
            StreamEvent::ToolCall {
                call_id: "assess".into(),
                tool_name: "assessmentResult".into(),
                args: json!({}),
            },
        );
        assert!(!session.is_complete());
        session.apply_event(request.generation, assessment_result("C1"));
        assert!(session.is_complete());
        assert!(session.is_busy());
        assert_eq!(session.assessment().unwrap().level, ProficiencyLevel::C1);
    }

    #[test]
    fn test_structured_beats_text_marker() {
        let mut session = InterviewSession::default();
        let request = session.send_turn("finish").unwrap();
        session.apply_event(
            request.generation,
            text(r#"Done. ASSESSMENT_RESULT: {"level":"B2","strengths":[],"weaknesses":[],"recommendations":[]}"#),
        );
        session.apply_event(
            request.generation,
            StreamEvent::ToolCall {
                call_id: "assess".into(),
                tool_name: "assessmentResult".into(),
                args: json!({}),
            },
        );
        session.apply_event(request.generation, assessment_result("C2"));
        session.finish(request.generation);
        assert_eq!(session.assessment().unwrap().level, ProficiencyLevel::C2);
    }

    #[test]
    fn test_text_marker_assessment_from_stream() {
        let mut session = InterviewSession::default();
        let request = session.send_turn("finish").unwrap();
        session.apply_event(request.generation, text("Done. "));
        session.apply_event(
            request.generation,
            text(r#"ASSESSMENT_RESULT: {"level":"B2","strengths":[],"weaknesses":[],"recommendations":[]}"#),
        );
        assert_eq!(session.turns().last().unwrap().content, "Done. ");
        assert!(!session.is_complete());

        session.finish(request.generation);
        assert!(session.is_complete());
        let assessment = session.assessment().unwrap();
        assert_eq!(assessment.level, ProficiencyLevel::B2);
        assert!(assessment.strengths.is_empty());
        assert_eq!(session.send_turn("more").unwrap_err(), SessionError::Complete);
    }

    #[test]
    fn test_malformed_text_assessment_keeps_session_open() {
        let mut session = InterviewSession::default();
        let request = session.send_turn("finish").unwrap();
        session.apply_event(request.generation, text("ASSESSMENT_RESULT: {\"level\": 3}"));
        session.finish(request.generation);
        assert!(!session.is_complete());
        assert!(session.send_turn("keep going").is_ok());
    }

    #[test]
    fn test_transport_failure_discards_partial_turn() {
        let mut session = InterviewSession::default();
        let request = session.send_turn("hello").unwrap();
        session.apply_event(request.generation, text("half a sent"));
        assert!(session.fail(request.generation, "connection reset"));

        let turns = session.turns();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[2].content, TRANSPORT_ERROR_REPLY);
        assert!(!turns[2].streaming);
        assert!(!session.is_busy());
    }

    #[test]
    fn test_in_band_error_event_is_a_transport_failure() {
        let mut session = InterviewSession::default();
        let request = session.send_turn("hello").unwrap();
        session.apply_event(request.generation, text("partial"));
        assert!(session.apply_event(request.generation, StreamEvent::Error("quota".into())));
        assert_eq!(session.turns().last().unwrap().content, TRANSPORT_ERROR_REPLY);
    }

    #[test]
    fn test_restart_is_total_and_stale_events_are_dropped() {
        let mut session = InterviewSession::default();
        let request = session.send_turn("ready").unwrap();
        present_question(&mut session, request.generation, "q-1");
        session.finish(request.generation);
        let next = session.submit_answer("q-1", "a").unwrap();
        session.apply_event(next.generation, text("Good. Next"));

        session.restart();
        assert!(next.cancel.is_cancelled());
        assert_eq!(session.turns().len(), 1);
        assert_eq!(session.answered_count(), 0);
        assert_eq!(session.question_count(), 0);
        assert!(session.assessment().is_none());
        assert!(!session.is_complete());
        assert!(!session.is_busy());

        assert!(!session.apply_event(next.generation, text("late chunk")));
        assert!(!session.finish(next.generation));
        assert_eq!(session.turns().len(), 1);
    }

    #[test]
    fn test_cancel_leaves_no_trace() {
        let mut session = InterviewSession::default();
        let request = session.send_turn("hello").unwrap();
        session.apply_event(request.generation, text("streamed so far"));
        assert!(session.cancel());
        assert!(request.cancel.is_cancelled());
        assert_eq!(session.turns().len(), 2);
        assert_eq!(session.turns().last().unwrap().role, Role::User);
        assert!(!session.cancel());
    }

    #[test]
    fn test_failed_turn_takes_its_assessment_with_it() {
        let mut session = InterviewSession::default();
        let request = session.send_turn("done?").unwrap();
        session.apply_event(
            request.generation,
            StreamEvent::ToolCall {
                call_id: "assess".into(),
                tool_name: "assessmentResult".into(),
                args: json!({}),
            },
        );
        session.apply_event(request.generation, assessment_result("B1"));
        assert!(session.is_complete());

        session.fail(request.generation, "connection reset");
        assert!(!session.is_complete());
        assert!(session.assessment().is_none());
        assert!(!session.view().complete);
        assert!(session.send_turn("try again").is_ok());
    }

    #[test]
    fn test_cancelled_turn_takes_its_assessment_with_it() {
        let mut session = InterviewSession::default();
        let request = session.send_turn("done?").unwrap();
        session.apply_event(
            request.generation,
            StreamEvent::ToolCall {
                call_id: "assess".into(),
                tool_name: "assessmentResult".into(),
                args: json!({}),
            },
        );
        session.apply_event(request.generation, assessment_result("A2"));
        assert!(session.cancel());
        assert!(!session.is_complete());
        assert_eq!(session.turns().len(), 2);
    }

    #[test]
    fn test_committed_assessment_survives_later_failure() {
        let mut session = InterviewSession::default();
        let request = session.send_turn("finish").unwrap();
        session.apply_event(
            request.generation,
            text(r#"ASSESSMENT_RESULT: {"level":"C1","strengths":[],"weaknesses":[],"recommendations":[]}"#),
        );
        present_question(&mut session, request.generation, "q-1");
        session.finish(request.generation);
        assert!(session.is_complete());

        let next = session.submit_answer("q-1", "a").unwrap();
        session.apply_event(next.generation, text("Thanks"));
        session.fail(next.generation, "reset");
        assert_eq!(session.assessment().unwrap().level, ProficiencyLevel::C1);
    }

    #[test]
    fn test_dropping_session_cancels_in_flight_request() {
        let mut session = InterviewSession::default();
        let request = session.send_turn("hello").unwrap();
        drop(session);
        assert!(request.cancel.is_cancelled());
    }
}
