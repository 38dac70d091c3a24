//! Assessment Extractor
//!
//! The final assessment can arrive two ways, tried in this order:
//!
//! 1. **Structured**: an `assessmentResult` tool result anywhere in the log. Its payload
//!    is used as-is.
//! 2. **Text**: the latest assistant turn contains `ASSESSMENT_RESULT:` followed by a
//!    JSON object. This is a compatibility path for backends that predate the tool.
//!
//! Both paths validate against the `Assessment` schema. A payload that fails validation
//! means "no assessment yet"; it is logged and never treated as fatal.

use crate::{
    correlator::derive_latest_assessment,
    tools::Assessment,
    turn::{Role, Turn},
};
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

/// Delimiter that precedes an assessment embedded in free text.
pub const ASSESSMENT_MARKER: &str = "ASSESSMENT_RESULT:";

static FIRST_OBJECT: LazyLock<Regex> = LazyLock::new(|| {
    // Non-greedy: the first '{' through the first following '}'.
    Regex::new(r"\{[\s\S]*?\}").expect("static regex is valid")
});

/// Splits `text` once on the marker into `(before, after)`.
pub fn split_on_marker(text: &str) -> Option<(&str, &str)> {
    text.split_once(ASSESSMENT_MARKER)
}

/// Decodes the first `{...}` span of `text` as an assessment.
pub fn decode_embedded_assessment(text: &str) -> Option<Assessment> {
    let Some(span) = FIRST_OBJECT.find(text) else {
        warn!("Assessment marker present but no JSON object follows it");
        return None;
    };
    match serde_json::from_str::<Assessment>(span.as_str()) {
        Ok(assessment) => Some(assessment),
        Err(e) => {
            warn!(error = %e, "Error processing assessment result");
            None
        }
    }
}

/// The text path: only the latest assistant turn is consulted.
pub fn text_assessment(turns: &[Turn]) -> Option<Assessment> {
    let latest = turns.iter().rev().find(|t| t.role == Role::Assistant)?;
    let (_, rest) = split_on_marker(&latest.content)?;
    decode_embedded_assessment(rest.trim())
}

/// Runs both extraction paths in priority order.
pub fn extract_assessment(turns: &[Turn]) -> Option<Assessment> {
    derive_latest_assessment(turns).or_else(|| text_assessment(turns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tools::ProficiencyLevel, turn::ToolPart};
    use serde_json::json;

    const LEGACY_B2: &str = r#"Done. ASSESSMENT_RESULT: {"level":"B2","strengths":[],"weaknesses":[],"recommendations":[]}"#;

    #[test]
    fn test_text_path_extracts_embedded_json() {
        let turns = vec![Turn::seed(), Turn::user("ok"), Turn::assistant(LEGACY_B2)];
        let assessment = extract_assessment(&turns).unwrap();
        assert_eq!(assessment.level, ProficiencyLevel::B2);
        assert!(assessment.strengths.is_empty());
        assert!(assessment.weaknesses.is_empty());
        assert!(assessment.recommendations.is_empty());
        assert!(assessment.timestamp.is_none());
    }

    #[test]
    fn test_text_path_handles_multiline_json_and_trailing_text() {
        let content = "# Assessment Complete\n\nASSESSMENT_RESULT: {\n  \"level\": \"C1\",\n  \"strengths\": [\"a\"],\n  \"weaknesses\": [\"b\"],\n  \"recommendations\": [\"c\"]\n}\nGood luck!";
        let turns = vec![Turn::assistant(content)];
        assert_eq!(
            extract_assessment(&turns).unwrap().level,
            ProficiencyLevel::C1
        );
    }

    #[test]
    fn test_text_path_rejects_schema_mismatch() {
        let content = r#"ASSESSMENT_RESULT: {"level":"Z9","strengths":[],"weaknesses":[],"recommendations":[]}"#;
        assert!(extract_assessment(&[Turn::assistant(content)]).is_none());

        let truncated = r#"ASSESSMENT_RESULT: {"level":"B2","strengths":["#;
        assert!(extract_assessment(&[Turn::assistant(truncated)]).is_none());
    }

    #[test]
    fn test_text_path_only_reads_latest_assistant_turn() {
        let turns = vec![Turn::assistant(LEGACY_B2), Turn::assistant("Let's continue.")];
        assert!(extract_assessment(&turns).is_none());
    }

    #[test]
    fn test_structured_path_takes_priority() {
        let structured = ToolPart::resolved(
            "call-9",
            "assessmentResult",
            json!({}),
            json!({
                "level": "C2",
                "strengths": ["nuance"],
                "weaknesses": [],
                "recommendations": []
            }),
        );
        let turns = vec![
            Turn::assistant("").with_parts(vec![structured]),
            Turn::assistant(LEGACY_B2),
        ];
        let assessment = extract_assessment(&turns).unwrap();
        assert_eq!(assessment.level, ProficiencyLevel::C2);
        assert_eq!(assessment.strengths, vec!["nuance".to_string()]);
    }

    #[test]
    fn test_split_on_marker_splits_once() {
        let (before, after) = split_on_marker("a ASSESSMENT_RESULT: b ASSESSMENT_RESULT: c").unwrap();
        assert_eq!(before, "a ");
        assert_eq!(after, " b ASSESSMENT_RESULT: c");
        assert!(split_on_marker("nothing here").is_none());
    }
}
