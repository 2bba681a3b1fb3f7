//! Strategy cascade over raw model text.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::strategies::{fallback, Strategy};
use crate::domain::assessment::AssessmentRecord;

/// Which strategy produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMethod {
    DirectJson,
    CodeBlock,
    PatternMatch,
    Reconstruction,
    Fallback,
}

/// Outcome of one strategy, or of the whole cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ParseResult {
    Parsed {
        data: AssessmentRecord,
        method: ParseMethod,
        confidence: f64,
        #[serde(
            rename = "validationErrors",
            default,
            skip_serializing_if = "Vec::is_empty"
        )]
        validation_errors: Vec<String>,
    },
    Failed {
        method: ParseMethod,
        errors: Vec<String>,
    },
}

impl ParseResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Parsed { .. })
    }

    pub fn method(&self) -> ParseMethod {
        match self {
            Self::Parsed { method, .. } | Self::Failed { method, .. } => *method,
        }
    }

    /// Zero for failures.
    pub fn confidence(&self) -> f64 {
        match self {
            Self::Parsed { confidence, .. } => *confidence,
            Self::Failed { .. } => 0.0,
        }
    }

    pub fn data(&self) -> Option<&AssessmentRecord> {
        match self {
            Self::Parsed { data, .. } => Some(data),
            Self::Failed { .. } => None,
        }
    }

    /// Low confidence or an explicit review flag.
    pub fn needs_review(&self) -> bool {
        match self {
            Self::Parsed {
                data, confidence, ..
            } => data.requires_review || *confidence < REVIEW_THRESHOLD,
            Self::Failed { .. } => true,
        }
    }
}

/// Results below this confidence should be looked at by a person.
pub const REVIEW_THRESHOLD: f64 = 0.75;

/// Try each strategy in order and keep the first success.
///
/// Never fails: when every strategy is exhausted the fallback record is returned,
/// carrying the errors collected along the way.
pub fn parse_with_fallbacks(raw: &str) -> ParseResult {
    let mut errors = Vec::new();

    for strategy in Strategy::CASCADE {
        match strategy.run(raw) {
            ParseResult::Failed { method, errors: e } => {
                debug!(method = ?method, errors = ?e, "Parse strategy failed");
                errors.extend(e.into_iter().map(|msg| format!("{:?}: {}", method, msg)));
            }
            parsed => {
                debug!(
                    method = ?parsed.method(),
                    confidence = parsed.confidence(),
                    "Parsed model response"
                );
                return parsed;
            }
        }
    }

    warn!(
        response_len = raw.len(),
        "No strategy could parse the model response; using fallback record"
    );
    fallback(raw, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::assessment::{Cleanliness, Rating};
    use proptest::prelude::*;

    #[test]
    fn direct_json_with_uppercase_rating() {
        let raw = r#"{"description":"x","condition":{"rating":"EXCELLENT","summary":"s"},"cleanliness":"professional_clean"}"#;
        let result = parse_with_fallbacks(raw);

        assert_eq!(result.method(), ParseMethod::DirectJson);
        assert!((0.95..=1.0).contains(&result.confidence()));
        let data = result.data().unwrap();
        assert_eq!(data.condition.rating, Rating::Excellent);
        assert_eq!(data.cleanliness, Cleanliness::ProfessionalClean);
    }

    #[test]
    fn review_flag_follows_confidence_and_record() {
        let clean = parse_with_fallbacks(
            r#"{"description":"Door","condition":{"rating":"good","summary":"Sound","points":[]},"cleanliness":"domestic_clean"}"#,
        );
        assert!(!clean.needs_review());

        let flagged = parse_with_fallbacks(
            r#"{"description":"Door","condition":{"rating":"good","summary":"Sound","points":[]},"cleanliness":"domestic_clean","requiresReview":true}"#,
        );
        assert!(flagged.needs_review());

        assert!(parse_with_fallbacks("no idea").needs_review());
        assert!(ParseResult::Failed {
            method: ParseMethod::DirectJson,
            errors: vec![]
        }
        .needs_review());
    }

    #[test]
    fn complete_direct_json_earns_full_confidence() {
        let raw = r#"{"description":"Door","condition":{"rating":"good","summary":"Sound","points":[]},"cleanliness":"domestic_clean"}"#;
        assert_eq!(parse_with_fallbacks(raw).confidence(), 1.0);
    }

    #[test]
    fn fenced_json_in_prose() {
        let raw = "Here is my assessment:\n```json\n{\"description\": \"Hob\", \"condition\": {\"summary\": \"Burn marks\", \"rating\": \"Fair\"}, \"cleanliness\": \"Not Clean\"}\n```\nLet me know!";
        let result = parse_with_fallbacks(raw);
        assert_eq!(result.method(), ParseMethod::CodeBlock);
        assert_eq!(result.data().unwrap().cleanliness, Cleanliness::NotClean);
    }

    #[test]
    fn prose_falls_through_to_reconstruction() {
        let raw = "The wall is painted white, in GOOD condition, CLEANLINESS: domestic clean";
        let result = parse_with_fallbacks(raw);

        assert!(result.is_success());
        assert_eq!(result.method(), ParseMethod::Reconstruction);
        assert!((result.confidence() - 0.70).abs() < 1e-9);
        let data = result.data().unwrap();
        assert_eq!(data.condition.rating, Rating::Good);
        assert_eq!(data.cleanliness, Cleanliness::DomesticClean);
        assert!(result.needs_review());
    }

    #[test]
    fn cleanliness_rating_line_does_not_set_condition() {
        let result = parse_with_fallbacks(
            "Description: Oak door\nCleanliness rating: professional clean\nCondition: poor, deep scratches",
        );
        assert_eq!(result.method(), ParseMethod::Reconstruction);
        let data = result.data().unwrap();
        assert_eq!(data.condition.rating, Rating::Poor);
        assert_eq!(data.cleanliness, Cleanliness::ProfessionalClean);

        let result = parse_with_fallbacks("Overall condition is poor.\nCleanliness rating: not clean");
        assert_eq!(result.method(), ParseMethod::Reconstruction);
        let data = result.data().unwrap();
        assert_eq!(data.condition.rating, Rating::Poor);
        assert_eq!(data.cleanliness, Cleanliness::NotClean);
    }

    #[test]
    fn truncated_json_is_reconstructed() {
        let raw = r#"{"description": "Bay window", "condition": {"summary": "Sill rot", "rating": "poor"}, "cleanliness": "domestic_clean_high_le"#;
        let result = parse_with_fallbacks(raw);
        assert_eq!(result.method(), ParseMethod::Reconstruction);
        let data = result.data().unwrap();
        assert_eq!(data.description, "Bay window");
        assert_eq!(data.condition.rating, Rating::Poor);
        assert_eq!(data.cleanliness, Cleanliness::DomesticCleanHighLevel);
    }

    #[test]
    fn unparseable_input_uses_fallback() {
        for raw in ["", "   ", "I cannot assess this image.", "{{{{", "[1, 2"] {
            let result = parse_with_fallbacks(raw);
            assert!(result.is_success(), "input {:?}", raw);
            assert_eq!(result.method(), ParseMethod::Fallback, "input {:?}", raw);
            assert_eq!(result.confidence(), 0.5);
            assert!(result.data().unwrap().requires_review);
        }
    }

    #[test]
    fn serializes_with_status_tag() {
        let value = serde_json::to_value(parse_with_fallbacks("nothing useful")).unwrap();
        assert_eq!(value["status"], "parsed");
        assert_eq!(value["method"], "fallback");
        assert_eq!(value["data"]["requiresReview"], true);
        assert!(value["validationErrors"].as_array().unwrap().len() >= 4);
    }

    proptest! {
        #[test]
        fn cascade_always_succeeds_with_closed_enums(raw in ".{0,400}") {
            let result = parse_with_fallbacks(&raw);
            prop_assert!(result.is_success());
            let data = result.data().unwrap();
            prop_assert!(Rating::ALL.contains(&data.condition.rating));
            prop_assert!(Cleanliness::ALL.contains(&data.cleanliness));
            prop_assert!((0.0..=1.0).contains(&result.confidence()));
        }

        #[test]
        fn cascade_survives_json_like_noise(raw in r#"[{}\[\]":, a-z0-9]{0,200}"#) {
            prop_assert!(parse_with_fallbacks(&raw).is_success());
        }
    }
}
