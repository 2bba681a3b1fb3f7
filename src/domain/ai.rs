//! Request/response DTOs for the vision assessment endpoints.

use serde::{Deserialize, Serialize};

use super::assessment::AssessmentRecord;

/// Whether photos document the start or the end of a tenancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionMode {
    #[default]
    CheckIn,
    CheckOut,
}

/// Request to assess a component from photos.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessRequest {
    /// Images as data URIs.
    pub images: Vec<String>,
    pub component_name: String,
    #[serde(default)]
    pub room_type: Option<String>,
    #[serde(default)]
    pub inspection_mode: InspectionMode,
    /// Check-in record to compare against when assessing a check-out.
    #[serde(default)]
    pub check_in_assessment: Option<AssessmentRecord>,
}

/// Parse raw model text without calling the model.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseRequest {
    pub raw_text: String,
}

/// Coerce an externally produced record onto the closed schema.
#[derive(Debug, Clone, Deserialize)]
pub struct NormalizeRequest {
    pub candidate: serde_json::Value,
}

/// Response for an assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessResponse {
    pub component_name: String,
    pub result: crate::analysis::ParseResult,
    /// Low confidence or flagged by the parser; the UI asks a person to confirm.
    pub needs_review: bool,
    pub cached: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::parse_with_fallbacks;

    #[test]
    fn assess_response_serializes_review_flag() {
        let result = parse_with_fallbacks("unreadable");
        let response = AssessResponse {
            component_name: "Oven".to_string(),
            needs_review: result.needs_review(),
            result,
            cached: false,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["componentName"], "Oven");
        assert_eq!(value["needsReview"], true);
        assert_eq!(value["result"]["method"], "fallback");
    }
}
