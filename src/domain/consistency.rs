//! Types for cross-photo consistency checks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::assessment::AssessmentRecord;

/// Capture conditions of one photo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetadata {
    #[serde(default)]
    pub lighting: Option<String>,
    #[serde(default)]
    pub angle: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedAction {
    Accept,
    Review,
    Retake,
}

/// Individual sub-scores, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyScores {
    pub material: f64,
    pub condition: f64,
    pub cleanliness: f64,
    pub lighting: f64,
    pub temporal: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_consistent: bool,
    pub confidence: ConfidenceTier,
    pub discrepancies: Vec<String>,
    pub recommended_action: RecommendedAction,
    pub validation_score: f64,
    pub scores: ConsistencyScores,
}

/// Request body for the consistency endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyRequest {
    pub assessments: Vec<AssessmentRecord>,
    #[serde(default)]
    pub metadata: Vec<SourceMetadata>,
}
