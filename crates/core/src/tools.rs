//! Interview Tools
//!
//! This module defines the fixed set of structured tools the model may invoke during
//! an interview: six question kinds plus the terminal assessment. Each kind has an
//! argument struct (advertised to the model as a JSON schema) and a result payload
//! (the arguments plus a generated `questionId`, or a timestamp for the assessment).
//!
//! `ToolPayload` is the closed union over all result payloads, keyed by `toolName`.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments for tool {tool}: {source}")]
    InvalidArguments {
        tool: ToolKind,
        #[source]
        source: serde_json::Error,
    },
}

/// The fixed set of tool names understood by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolKind {
    MultipleChoice,
    ReadingComprehension,
    ErrorIdentification,
    #[serde(rename = "paraphrasingTask")]
    Paraphrasing,
    IdiomaticExpression,
    ConditionalScenario,
    AssessmentResult,
}

impl ToolKind {
    pub const ALL: [ToolKind; 7] = [
        ToolKind::AssessmentResult,
        ToolKind::MultipleChoice,
        ToolKind::ReadingComprehension,
        ToolKind::ErrorIdentification,
        ToolKind::Paraphrasing,
        ToolKind::IdiomaticExpression,
        ToolKind::ConditionalScenario,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::MultipleChoice => "multipleChoice",
            ToolKind::ReadingComprehension => "readingComprehension",
            ToolKind::ErrorIdentification => "errorIdentification",
            ToolKind::Paraphrasing => "paraphrasingTask",
            ToolKind::IdiomaticExpression => "idiomaticExpression",
            ToolKind::ConditionalScenario => "conditionalScenario",
            ToolKind::AssessmentResult => "assessmentResult",
        }
    }

    /// The assessment ends the interview; every other kind is a question.
    pub fn is_terminal(self) -> bool {
        matches!(self, ToolKind::AssessmentResult)
    }

    fn id_prefix(self) -> &'static str {
        match self {
            ToolKind::MultipleChoice => "q",
            ToolKind::ReadingComprehension => "rc",
            ToolKind::ErrorIdentification => "ei",
            ToolKind::Paraphrasing => "pt",
            ToolKind::IdiomaticExpression => "ie",
            ToolKind::ConditionalScenario => "cs",
            ToolKind::AssessmentResult => "ar",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ToolKind::MultipleChoice => "Present a multiple choice question to the user",
            ToolKind::ReadingComprehension => {
                "Present a reading comprehension passage with question to the user"
            }
            ToolKind::ErrorIdentification => {
                "Present a sentence with potential errors for the user to identify"
            }
            ToolKind::Paraphrasing => "Present a sentence to be paraphrased with options",
            ToolKind::IdiomaticExpression => {
                "Present an idiomatic expression with context and question"
            }
            ToolKind::ConditionalScenario => {
                "Present a conditional or hypothetical scenario with a question"
            }
            ToolKind::AssessmentResult => {
                "Provide an assessment of the user's English proficiency level"
            }
        }
    }

    fn parameters(self) -> Value {
        let schema = match self {
            ToolKind::MultipleChoice => schemars::schema_for!(MultipleChoice),
            ToolKind::ReadingComprehension => schemars::schema_for!(ReadingComprehension),
            ToolKind::ErrorIdentification => schemars::schema_for!(ErrorIdentification),
            ToolKind::Paraphrasing => schemars::schema_for!(Paraphrasing),
            ToolKind::IdiomaticExpression => schemars::schema_for!(IdiomaticExpression),
            ToolKind::ConditionalScenario => schemars::schema_for!(ConditionalScenario),
            ToolKind::AssessmentResult => schemars::schema_for!(Assessment),
        };
        schema.to_value()
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ToolKind {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| ToolError::UnknownTool(s.to_string()))
    }
}

// --- Argument Structures ---

/// A selectable answer shared by most question kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
    /// Display label such as "A" or "B".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A clickable word in an error identification sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorOption {
    pub id: String,
    /// Zero-based index into the sentence's space-separated words.
    pub position: usize,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MultipleChoice {
    pub question: String,
    pub options: Vec<QuestionOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReadingComprehension {
    pub passage: String,
    pub question: String,
    pub options: Vec<QuestionOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorIdentification {
    pub sentence: String,
    pub options: Vec<ErrorOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Paraphrasing {
    pub sentence: String,
    pub options: Vec<QuestionOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IdiomaticExpression {
    pub context: String,
    pub expression: String,
    pub question: String,
    pub options: Vec<QuestionOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConditionalScenario {
    pub scenario: String,
    pub question: String,
    pub options: Vec<QuestionOption>,
}

/// The six CEFR tiers, ordered from beginner to proficient.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum ProficiencyLevel {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

/// The terminal record of an interview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Assessment {
    pub level: ProficiencyLevel,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommendations: Vec<String>,
    /// Set when the assessment tool runs; absent for assessments parsed from text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(skip)]
    pub timestamp: Option<DateTime<Utc>>,
}

// --- Result Payloads ---

/// A question payload: the model's arguments plus the generated `questionId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question<T> {
    #[serde(flatten)]
    pub body: T,
    #[serde(rename = "questionId")]
    pub question_id: String,
}

/// A borrowed view of one selectable answer, independent of question kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Choice<'a> {
    pub id: &'a str,
    pub label: Option<&'a str>,
    pub text: &'a str,
}

/// Result payload of any interview tool, tagged by tool name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "toolName", content = "payload", rename_all = "camelCase")]
pub enum ToolPayload {
    MultipleChoice(Question<MultipleChoice>),
    ReadingComprehension(Question<ReadingComprehension>),
    ErrorIdentification(Question<ErrorIdentification>),
    #[serde(rename = "paraphrasingTask")]
    Paraphrasing(Question<Paraphrasing>),
    IdiomaticExpression(Question<IdiomaticExpression>),
    ConditionalScenario(Question<ConditionalScenario>),
    AssessmentResult(Assessment),
}

impl ToolPayload {
    /// Decodes a result value for `kind`, validating it against the kind's schema.
    pub fn from_result(kind: ToolKind, value: &Value) -> Result<Self, serde_json::Error> {
        let value = value.clone();
        Ok(match kind {
            ToolKind::MultipleChoice => ToolPayload::MultipleChoice(serde_json::from_value(value)?),
            ToolKind::ReadingComprehension => {
                ToolPayload::ReadingComprehension(serde_json::from_value(value)?)
            }
            ToolKind::ErrorIdentification => {
                ToolPayload::ErrorIdentification(serde_json::from_value(value)?)
            }
            ToolKind::Paraphrasing => ToolPayload::Paraphrasing(serde_json::from_value(value)?),
            ToolKind::IdiomaticExpression => {
                ToolPayload::IdiomaticExpression(serde_json::from_value(value)?)
            }
            ToolKind::ConditionalScenario => {
                ToolPayload::ConditionalScenario(serde_json::from_value(value)?)
            }
            ToolKind::AssessmentResult => {
                ToolPayload::AssessmentResult(serde_json::from_value(value)?)
            }
        })
    }

    /// Serializes the payload body without the `toolName` tag.
    pub fn to_result_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            ToolPayload::MultipleChoice(q) => serde_json::to_value(q),
            ToolPayload::ReadingComprehension(q) => serde_json::to_value(q),
            ToolPayload::ErrorIdentification(q) => serde_json::to_value(q),
            ToolPayload::Paraphrasing(q) => serde_json::to_value(q),
            ToolPayload::IdiomaticExpression(q) => serde_json::to_value(q),
            ToolPayload::ConditionalScenario(q) => serde_json::to_value(q),
            ToolPayload::AssessmentResult(a) => serde_json::to_value(a),
        }
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            ToolPayload::MultipleChoice(_) => ToolKind::MultipleChoice,
            ToolPayload::ReadingComprehension(_) => ToolKind::ReadingComprehension,
            ToolPayload::ErrorIdentification(_) => ToolKind::ErrorIdentification,
            ToolPayload::Paraphrasing(_) => ToolKind::Paraphrasing,
            ToolPayload::IdiomaticExpression(_) => ToolKind::IdiomaticExpression,
            ToolPayload::ConditionalScenario(_) => ToolKind::ConditionalScenario,
            ToolPayload::AssessmentResult(_) => ToolKind::AssessmentResult,
        }
    }

    /// The generated question id, or `None` for the terminal assessment.
    pub fn question_id(&self) -> Option<&str> {
        match self {
            ToolPayload::MultipleChoice(q) => Some(&q.question_id),
            ToolPayload::ReadingComprehension(q) => Some(&q.question_id),
            ToolPayload::ErrorIdentification(q) => Some(&q.question_id),
            ToolPayload::Paraphrasing(q) => Some(&q.question_id),
            ToolPayload::IdiomaticExpression(q) => Some(&q.question_id),
            ToolPayload::ConditionalScenario(q) => Some(&q.question_id),
            ToolPayload::AssessmentResult(_) => None,
        }
    }

    pub fn choices(&self) -> Vec<Choice<'_>> {
        fn plain(options: &[QuestionOption]) -> Vec<Choice<'_>> {
            options
                .iter()
                .map(|o| Choice {
                    id: &o.id,
                    label: o.label.as_deref(),
                    text: &o.text,
                })
                .collect()
        }
        match self {
            ToolPayload::MultipleChoice(q) => plain(&q.body.options),
            ToolPayload::ReadingComprehension(q) => plain(&q.body.options),
            ToolPayload::Paraphrasing(q) => plain(&q.body.options),
            ToolPayload::IdiomaticExpression(q) => plain(&q.body.options),
            ToolPayload::ConditionalScenario(q) => plain(&q.body.options),
            ToolPayload::ErrorIdentification(q) => q
                .body
                .options
                .iter()
                .map(|o| Choice {
                    id: &o.id,
                    label: o.label.as_deref(),
                    text: &o.text,
                })
                .collect(),
            ToolPayload::AssessmentResult(_) => Vec::new(),
        }
    }

    pub fn choice(&self, option_id: &str) -> Option<Choice<'_>> {
        self.choices().into_iter().find(|c| c.id == option_id)
    }

    /// Display text for an option; falls back to the id itself when unknown.
    pub fn option_text<'a>(&'a self, option_id: &'a str) -> &'a str {
        self.choice(option_id).map(|c| c.text).unwrap_or(option_id)
    }
}

// --- Tool Execution ---

/// A tool as advertised to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    ToolKind::ALL
        .into_iter()
        .map(|kind| ToolDefinition {
            name: kind.name(),
            description: kind.description(),
            parameters: kind.parameters(),
        })
        .collect()
}

/// Runs a tool call: validates the arguments and returns the result payload.
///
/// Question kinds receive a `questionId` of the form `<prefix>-<unix millis>-<uuid>`,
/// unique even for calls made within the same millisecond; the assessment receives the
/// current timestamp.
pub fn execute_tool(tool_name: &str, args: &Value) -> Result<ToolPayload, ToolError> {
    let kind: ToolKind = tool_name.parse()?;
    info!(tool = %kind, "Executing interview tool");

    let invalid = |source: serde_json::Error| ToolError::InvalidArguments { tool: kind, source };
    let question_id = format!(
        "{}-{}-{}",
        kind.id_prefix(),
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    );

    fn question<T: serde::de::DeserializeOwned>(
        args: &Value,
        question_id: String,
    ) -> Result<Question<T>, serde_json::Error> {
        Ok(Question {
            body: serde_json::from_value(args.clone())?,
            question_id,
        })
    }

    let payload = match kind {
        ToolKind::MultipleChoice => {
            ToolPayload::MultipleChoice(question(args, question_id).map_err(invalid)?)
        }
        ToolKind::ReadingComprehension => {
            ToolPayload::ReadingComprehension(question(args, question_id).map_err(invalid)?)
        }
        ToolKind::ErrorIdentification => {
            ToolPayload::ErrorIdentification(question(args, question_id).map_err(invalid)?)
        }
        ToolKind::Paraphrasing => {
            ToolPayload::Paraphrasing(question(args, question_id).map_err(invalid)?)
        }
        ToolKind::IdiomaticExpression => {
            ToolPayload::IdiomaticExpression(question(args, question_id).map_err(invalid)?)
        }
        ToolKind::ConditionalScenario => {
            ToolPayload::ConditionalScenario(question(args, question_id).map_err(invalid)?)
        }
        ToolKind::AssessmentResult => {
            let mut assessment: Assessment =
                serde_json::from_value(args.clone()).map_err(invalid)?;
            assessment.timestamp = Some(Utc::now());
            ToolPayload::AssessmentResult(assessment)
        }
    };
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn choice_args() -> Value {
        json!({
            "question": "Pick the closest synonym for 'ubiquitous'",
            "options": [
                {"id": "a", "label": "A", "text": "rare"},
                {"id": "b", "label": "B", "text": "everywhere"}
            ]
        })
    }

    #[test]
    fn test_tool_kind_names_round_trip() {
        for kind in ToolKind::ALL {
            assert_eq!(kind.name().parse::<ToolKind>().unwrap(), kind);
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                Value::String(kind.name().to_string())
            );
        }
        assert!(matches!(
            "essayTask".parse::<ToolKind>(),
            Err(ToolError::UnknownTool(name)) if name == "essayTask"
        ));
    }

    #[test]
    fn test_only_assessment_is_terminal() {
        let terminal: Vec<_> = ToolKind::ALL.into_iter().filter(|k| k.is_terminal()).collect();
        assert_eq!(terminal, vec![ToolKind::AssessmentResult]);
    }

    #[test]
    fn test_execute_question_tool_generates_prefixed_id() {
        let payload = execute_tool("multipleChoice", &choice_args()).unwrap();
        let id = payload.question_id().unwrap();
        assert!(id.starts_with("q-"), "unexpected id {id}");
        assert_eq!(payload.option_text("b"), "everywhere");
        assert_eq!(payload.option_text("z"), "z");

        let value = payload.to_result_value().unwrap();
        assert_eq!(value["questionId"], id);
        assert_eq!(value["question"], "Pick the closest synonym for 'ubiquitous'");
    }

    #[test]
    fn test_execute_paraphrasing_uses_pt_prefix() {
        let args = json!({"sentence": "It is raining heavily.", "options": []});
        let payload = execute_tool("paraphrasingTask", &args).unwrap();
        assert_eq!(payload.kind(), ToolKind::Paraphrasing);
        assert!(payload.question_id().unwrap().starts_with("pt-"));
    }

    #[test]
    fn test_back_to_back_calls_get_distinct_ids() {
        let first = execute_tool("multipleChoice", &choice_args()).unwrap();
        let second = execute_tool("multipleChoice", &choice_args()).unwrap();
        assert_ne!(first.question_id(), second.question_id());
    }

    #[test]
    fn test_execute_assessment_adds_timestamp() {
        let args = json!({
            "level": "C1",
            "strengths": ["Rich vocabulary"],
            "weaknesses": [],
            "recommendations": ["Read academic journals"]
        });
        let payload = execute_tool("assessmentResult", &args).unwrap();
        match payload {
            ToolPayload::AssessmentResult(a) => {
                assert_eq!(a.level, ProficiencyLevel::C1);
                assert!(a.timestamp.is_some());
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_execute_rejects_invalid_arguments() {
        let err = execute_tool("assessmentResult", &json!({"level": "D4"})).unwrap_err();
        assert!(matches!(
            err,
            ToolError::InvalidArguments { tool: ToolKind::AssessmentResult, .. }
        ));
    }

    #[test]
    fn test_from_result_requires_question_id() {
        let err = ToolPayload::from_result(ToolKind::MultipleChoice, &choice_args());
        assert!(err.is_err());

        let mut value = choice_args();
        value["questionId"] = json!("q-1");
        let payload = ToolPayload::from_result(ToolKind::MultipleChoice, &value).unwrap();
        assert_eq!(payload.question_id(), Some("q-1"));
    }

    #[test]
    fn test_proficiency_levels_are_ordered() {
        assert!(ProficiencyLevel::A1 < ProficiencyLevel::A2);
        assert!(ProficiencyLevel::B2 < ProficiencyLevel::C1);
        assert!(ProficiencyLevel::C1 < ProficiencyLevel::C2);
    }

    #[test]
    fn test_tool_definitions_cover_every_kind() {
        let defs = tool_definitions();
        assert_eq!(defs.len(), 7);
        let assessment = defs.iter().find(|d| d.name == "assessmentResult").unwrap();
        let props = &assessment.parameters["properties"];
        assert!(props.get("level").is_some());
        assert!(props.get("timestamp").is_none());
    }

    #[test]
    fn test_tagged_payload_serialization() {
        let payload = execute_tool("multipleChoice", &choice_args()).unwrap();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["toolName"], "multipleChoice");
        assert_eq!(json["payload"]["options"][1]["id"], "b");
    }
}
