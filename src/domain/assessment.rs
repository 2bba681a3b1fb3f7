//! Component assessment records produced from vision model output.
//!
//! Field names serialize in camelCase to match what the inspection UI stores.

use serde::{Deserialize, Serialize};

/// Overall condition rating, best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl Rating {
    pub const ALL: [Rating; 5] = [
        Rating::Excellent,
        Rating::Good,
        Rating::Fair,
        Rating::Poor,
        Rating::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::Critical => "critical",
        }
    }

    /// Position on the severity scale, 0 = excellent.
    pub fn rank(self) -> u8 {
        self as u8
    }
}

/// Cleanliness grade, cleanest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cleanliness {
    ProfessionalClean,
    ProfessionalCleanWithOmissions,
    DomesticCleanHighLevel,
    DomesticClean,
    NotClean,
}

impl Cleanliness {
    pub const ALL: [Cleanliness; 5] = [
        Cleanliness::ProfessionalClean,
        Cleanliness::ProfessionalCleanWithOmissions,
        Cleanliness::DomesticCleanHighLevel,
        Cleanliness::DomesticClean,
        Cleanliness::NotClean,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProfessionalClean => "professional_clean",
            Self::ProfessionalCleanWithOmissions => "professional_clean_with_omissions",
            Self::DomesticCleanHighLevel => "domestic_clean_high_level",
            Self::DomesticClean => "domestic_clean",
            Self::NotClean => "not_clean",
        }
    }

    pub fn rank(self) -> u8 {
        self as u8
    }
}

/// A condition bullet: either plain text or an object the model chose to structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionPoint {
    Text(String),
    Structured(StructuredPoint),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredPoint {
    pub point: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub summary: String,
    #[serde(default)]
    pub points: Vec<ConditionPoint>,
    pub rating: Rating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefectCategory {
    Structural,
    Surface,
    Functional,
    Aesthetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DefectSeverity {
    Critical,
    Major,
    Moderate,
    Minor,
    Trace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RepairUrgency {
    Immediate,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CostBand {
    High,
    Medium,
    Low,
}

impl DefectSeverity {
    pub fn default_urgency(self) -> RepairUrgency {
        match self {
            Self::Critical => RepairUrgency::Immediate,
            Self::Major => RepairUrgency::High,
            Self::Moderate => RepairUrgency::Medium,
            Self::Minor | Self::Trace => RepairUrgency::Low,
        }
    }

    pub fn default_cost(self) -> CostBand {
        match self {
            Self::Critical | Self::Major => CostBand::High,
            Self::Moderate => CostBand::Medium,
            Self::Minor | Self::Trace => CostBand::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefectLocation {
    pub area: String,
    pub extent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefectRecord {
    pub id: String,
    pub category: DefectCategory,
    #[serde(rename = "type")]
    pub defect_type: String,
    pub severity: DefectSeverity,
    pub confidence: f64,
    pub location: DefectLocation,
    pub description: String,
    pub supporting_evidence: u32,
    pub repair_urgency: RepairUrgency,
    pub estimated_cost: CostBand,
}

/// One component inside a multi-component scene assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentAssessment {
    pub name: String,
    pub description: String,
    pub condition: Condition,
    pub cleanliness: Cleanliness,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub defects: Vec<DefectRecord>,
}

/// Normalized assessment of a rented property component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRecord {
    pub description: String,
    pub condition: Condition,
    pub cleanliness: Cleanliness,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defects: Option<Vec<DefectRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<ComponentAssessment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub requires_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response_excerpt: Option<String>,
}
