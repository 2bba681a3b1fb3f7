//! Coercion of loosely structured model output into an [`AssessmentRecord`].
//!
//! Every candidate produced by a parsing strategy passes through here. Missing fields
//! are defaulted and recorded as warnings; free-text ratings and cleanliness grades are
//! folded onto their closed enums. Normalizing an already normalized record is a no-op.

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::domain::assessment::{
    AssessmentRecord, Cleanliness, ComponentAssessment, Condition, ConditionPoint, CostBand,
    DefectCategory, DefectLocation, DefectRecord, DefectSeverity, Rating, RepairUrgency,
    StructuredPoint,
};

pub const DEFAULT_DESCRIPTION: &str = "No description provided";
pub const DEFAULT_SUMMARY: &str = "Condition not specified";

/// Keys that identify an object as an assessment at all.
const ASSESSMENT_KEYS: &[&str] = &[
    "description",
    "condition",
    "rating",
    "cleanliness",
    "summary",
    "defects",
    "components",
];

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),

    #[error("object has none of the assessment fields")]
    UnrecognizedShape,
}

/// Normalized record plus a note for every field that had to be defaulted.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub record: AssessmentRecord,
    pub warnings: Vec<String>,
}

/// The response layouts the model has produced over time.
#[derive(Debug)]
pub enum AssessmentShape<'a> {
    /// Single component: `{description, condition, cleanliness, ...}`.
    Legacy(&'a Map<String, Value>),
    /// Whole scene: `{sceneSummary, components: [...]}`.
    MultiComponent {
        root: &'a Map<String, Value>,
        scene_summary: String,
        components: &'a [Value],
    },
}

impl<'a> AssessmentShape<'a> {
    pub fn detect(value: &'a Value) -> Result<Self, NormalizeError> {
        let root = value
            .as_object()
            .ok_or_else(|| NormalizeError::NotAnObject(json_type(value)))?;

        let scene_summary = field(root, &["sceneSummary", "scene_summary"]).and_then(text);
        let components = field(root, &["components"]).and_then(Value::as_array);
        if let (Some(scene_summary), Some(components)) = (scene_summary, components) {
            return Ok(Self::MultiComponent {
                root,
                scene_summary,
                components,
            });
        }

        if ASSESSMENT_KEYS.iter().any(|k| root.contains_key(*k)) {
            Ok(Self::Legacy(root))
        } else {
            Err(NormalizeError::UnrecognizedShape)
        }
    }
}

/// Normalize a candidate, discarding the defaulting notes. Idempotent on its own output.
pub fn validate_and_normalize_structure(
    candidate: &Value,
) -> Result<AssessmentRecord, NormalizeError> {
    normalize_with_warnings(candidate).map(|n| n.record)
}

pub fn normalize_with_warnings(candidate: &Value) -> Result<Normalized, NormalizeError> {
    let mut warnings = Vec::new();
    let record = match AssessmentShape::detect(candidate)? {
        AssessmentShape::Legacy(root) => normalize_legacy(root, &mut warnings),
        AssessmentShape::MultiComponent {
            root,
            scene_summary,
            components,
        } => normalize_multi_component(root, scene_summary, components, &mut warnings),
    };
    Ok(Normalized { record, warnings })
}

fn normalize_legacy(root: &Map<String, Value>, warnings: &mut Vec<String>) -> AssessmentRecord {
    let description = field(root, &["description"]).and_then(text).unwrap_or_else(|| {
        warnings.push("description missing; defaulted".to_string());
        DEFAULT_DESCRIPTION.to_string()
    });

    let condition = normalize_condition(root, warnings);
    let cleanliness = cleanliness_field(root, warnings);

    let defects = field(root, &["defects"])
        .and_then(Value::as_array)
        .map(|items| normalize_defects(items));

    let components = field(root, &["components"])
        .and_then(Value::as_array)
        .map(|items| normalize_components(items, warnings));

    AssessmentRecord {
        description,
        condition,
        cleanliness,
        defects,
        components,
        analysis_metadata: analysis_metadata(root),
        requires_review: field(root, &["requiresReview", "requires_review"])
            .and_then(Value::as_bool)
            .unwrap_or(false),
        raw_response_excerpt: field(root, &["rawResponseExcerpt", "raw_response_excerpt"])
            .and_then(text),
    }
}

fn normalize_multi_component(
    root: &Map<String, Value>,
    scene_summary: String,
    components: &[Value],
    warnings: &mut Vec<String>,
) -> AssessmentRecord {
    let components = normalize_components(components, warnings);

    let rating = components
        .iter()
        .map(|c| c.condition.rating)
        .max()
        .unwrap_or_else(|| {
            warnings.push("no components; rating defaulted".to_string());
            Rating::Fair
        });
    let cleanliness = components
        .iter()
        .map(|c| c.cleanliness)
        .max()
        .unwrap_or(Cleanliness::DomesticClean);

    let summary = if components.is_empty() {
        scene_summary.clone()
    } else {
        components
            .iter()
            .map(|c| format!("{}: {}", c.name, c.condition.summary))
            .collect::<Vec<_>>()
            .join("; ")
    };
    let points = components
        .iter()
        .flat_map(|c| c.condition.points.iter().cloned())
        .collect();

    AssessmentRecord {
        description: scene_summary,
        condition: Condition {
            summary,
            points,
            rating,
        },
        cleanliness,
        defects: field(root, &["defects"])
            .and_then(Value::as_array)
            .map(|items| normalize_defects(items)),
        components: Some(components),
        analysis_metadata: analysis_metadata(root),
        requires_review: field(root, &["requiresReview", "requires_review"])
            .and_then(Value::as_bool)
            .unwrap_or(false),
        raw_response_excerpt: None,
    }
}

fn normalize_components(items: &[Value], warnings: &mut Vec<String>) -> Vec<ComponentAssessment> {
    items
        .iter()
        .filter_map(Value::as_object)
        .enumerate()
        .map(|(i, obj)| {
            let mut local = Vec::new();
            let name = field(obj, &["name", "component", "componentName"])
                .and_then(text)
                .unwrap_or_else(|| format!("Component {}", i + 1));
            let component = ComponentAssessment {
                description: field(obj, &["description"])
                    .and_then(text)
                    .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
                condition: normalize_condition(obj, &mut local),
                cleanliness: cleanliness_field(obj, &mut local),
                defects: field(obj, &["defects"])
                    .and_then(Value::as_array)
                    .map(|d| normalize_defects(d))
                    .unwrap_or_default(),
                name,
            };
            warnings.extend(local.into_iter().map(|w| format!("{}: {}", component.name, w)));
            component
        })
        .collect()
}

fn normalize_condition(root: &Map<String, Value>, warnings: &mut Vec<String>) -> Condition {
    let top_rating = field(root, &["rating", "conditionRating", "condition_rating"]).and_then(text);
    let top_points = field(root, &["points"]);

    let (summary, points, rating_text) = match root.get("condition") {
        Some(Value::Object(c)) => (
            field(c, &["summary", "description"]).and_then(text),
            field(c, &["points", "details"]).or(top_points),
            field(c, &["rating"]).and_then(text).or(top_rating),
        ),
        Some(v) => (text(v), top_points, top_rating),
        None => (
            field(root, &["summary"]).and_then(text),
            top_points,
            top_rating,
        ),
    };

    let summary = summary.unwrap_or_else(|| {
        warnings.push("condition summary missing; defaulted".to_string());
        DEFAULT_SUMMARY.to_string()
    });

    let rating = match rating_text {
        Some(r) => normalize_rating(&r),
        None => {
            warnings.push("condition rating missing; inferred from summary".to_string());
            normalize_rating(&summary)
        }
    };

    Condition {
        summary,
        points: points.map(normalize_points).unwrap_or_default(),
        rating,
    }
}

fn normalize_points(value: &Value) -> Vec<ConditionPoint> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(obj) => {
                let point = field(obj, &["point", "text", "description", "issue"]).and_then(text)?;
                Some(ConditionPoint::Structured(StructuredPoint {
                    point,
                    location: field(obj, &["location", "area"]).and_then(text),
                    severity: field(obj, &["severity"]).and_then(text),
                }))
            }
            other => text(other).map(ConditionPoint::Text),
        })
        .collect()
}

fn cleanliness_field(root: &Map<String, Value>, warnings: &mut Vec<String>) -> Cleanliness {
    let raw = match field(root, &["cleanliness", "cleanlinessRating", "cleanliness_rating"]) {
        Some(Value::Object(obj)) => field(obj, &["rating", "level", "grade"]).and_then(text),
        Some(v) => text(v),
        None => None,
    };
    match raw {
        Some(s) => normalize_cleanliness(&s),
        None => {
            warnings.push("cleanliness missing; defaulted".to_string());
            Cleanliness::DomesticClean
        }
    }
}

fn normalize_defects(items: &[Value]) -> Vec<DefectRecord> {
    items
        .iter()
        .filter_map(Value::as_object)
        .enumerate()
        .map(|(i, obj)| normalize_defect(i, obj))
        .collect()
}

fn normalize_defect(index: usize, obj: &Map<String, Value>) -> DefectRecord {
    let severity = field(obj, &["severity"])
        .and_then(text)
        .map(|s| normalize_severity(&s))
        .unwrap_or(DefectSeverity::Minor);

    let location = match field(obj, &["location"]) {
        Some(Value::Object(loc)) => DefectLocation {
            area: field(loc, &["area"])
                .and_then(text)
                .unwrap_or_else(|| "unspecified".to_string()),
            extent: field(loc, &["extent"])
                .and_then(text)
                .unwrap_or_else(|| "localized".to_string()),
        },
        Some(v) => DefectLocation {
            area: text(v).unwrap_or_else(|| "unspecified".to_string()),
            extent: "localized".to_string(),
        },
        None => DefectLocation {
            area: "unspecified".to_string(),
            extent: "localized".to_string(),
        },
    };

    DefectRecord {
        id: field(obj, &["id"])
            .and_then(text)
            .unwrap_or_else(|| format!("defect-{}", index + 1)),
        category: field(obj, &["category"])
            .and_then(text)
            .map(|s| normalize_category(&s))
            .unwrap_or(DefectCategory::Surface),
        defect_type: field(obj, &["type", "defectType", "defect_type"])
            .and_then(text)
            .unwrap_or_else(|| "unspecified".to_string()),
        severity,
        confidence: field(obj, &["confidence"])
            .and_then(number)
            .map(normalize_confidence)
            .unwrap_or(0.5),
        location,
        description: field(obj, &["description"]).and_then(text).unwrap_or_default(),
        supporting_evidence: field(obj, &["supportingEvidence", "supporting_evidence"])
            .and_then(number)
            .map(|n| n.max(0.0).round() as u32)
            .unwrap_or(1),
        repair_urgency: field(obj, &["repairUrgency", "repair_urgency"])
            .and_then(text)
            .and_then(|s| parse_urgency(&s))
            .unwrap_or_else(|| severity.default_urgency()),
        estimated_cost: field(obj, &["estimatedCost", "estimated_cost"])
            .and_then(text)
            .and_then(|s| parse_cost(&s))
            .unwrap_or_else(|| severity.default_cost()),
    }
}

/// Fold a free-text rating onto the closed rating set; unknown text becomes `fair`.
pub fn normalize_rating(raw: &str) -> Rating {
    let s = raw.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| s.contains(w));

    if has(&["excellent"]) {
        Rating::Excellent
    } else if has(&["good"]) {
        Rating::Good
    } else if has(&["fair"]) {
        Rating::Fair
    } else if has(&["poor"]) {
        Rating::Poor
    } else if has(&["critical"]) {
        Rating::Critical
    } else if has(&["severe", "unsafe", "dangerous", "hazard"]) {
        Rating::Critical
    } else if has(&["bad", "damaged", "broken", "worn out"]) {
        Rating::Poor
    } else if has(&["pristine", "perfect", "immaculate", "as new", "brand new"]) {
        Rating::Excellent
    } else {
        Rating::Fair
    }
}

/// Fold a free-text cleanliness grade onto the closed set; unknown text becomes
/// `domestic_clean`.
pub fn normalize_cleanliness(raw: &str) -> Cleanliness {
    let s: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect();

    if s.contains("not_clean") || s.contains("unclean") || s.contains("dirty") || s.contains("filthy")
    {
        Cleanliness::NotClean
    } else if s.contains("professional") {
        if s.contains("omission") {
            Cleanliness::ProfessionalCleanWithOmissions
        } else {
            Cleanliness::ProfessionalClean
        }
    } else if s.contains("high_level") || (s.contains("domestic") && s.contains("high")) {
        Cleanliness::DomesticCleanHighLevel
    } else {
        Cleanliness::DomesticClean
    }
}

pub fn normalize_severity(raw: &str) -> DefectSeverity {
    let s = raw.to_uppercase();
    if s.contains("CRITICAL") {
        DefectSeverity::Critical
    } else if s.contains("MAJOR") || s.contains("SEVERE") || s.contains("HIGH") {
        DefectSeverity::Major
    } else if s.contains("MODERATE") || s.contains("MEDIUM") {
        DefectSeverity::Moderate
    } else if s.contains("TRACE") || s.contains("NEGLIGIBLE") {
        DefectSeverity::Trace
    } else {
        DefectSeverity::Minor
    }
}

fn normalize_category(raw: &str) -> DefectCategory {
    let s = raw.to_lowercase();
    if s.contains("struct") {
        DefectCategory::Structural
    } else if s.contains("function") || s.contains("mechanic") || s.contains("operation") {
        DefectCategory::Functional
    } else if s.contains("aesthetic") || s.contains("cosmetic") {
        DefectCategory::Aesthetic
    } else {
        DefectCategory::Surface
    }
}

fn parse_urgency(raw: &str) -> Option<RepairUrgency> {
    let s = raw.to_uppercase();
    if s.contains("IMMEDIATE") || s.contains("URGENT") {
        Some(RepairUrgency::Immediate)
    } else if s.contains("HIGH") {
        Some(RepairUrgency::High)
    } else if s.contains("MEDIUM") || s.contains("MODERATE") {
        Some(RepairUrgency::Medium)
    } else if s.contains("LOW") {
        Some(RepairUrgency::Low)
    } else {
        None
    }
}

fn parse_cost(raw: &str) -> Option<CostBand> {
    let s = raw.to_uppercase();
    if s.contains("HIGH") {
        Some(CostBand::High)
    } else if s.contains("MEDIUM") || s.contains("MODERATE") {
        Some(CostBand::Medium)
    } else if s.contains("LOW") {
        Some(CostBand::Low)
    } else {
        None
    }
}

/// Percentages (e.g. `85`) are scaled down; everything ends up in `[0, 1]` at three
/// decimal places so a JSON round trip can't drift the value.
fn normalize_confidence(value: f64) -> f64 {
    let scaled = if value > 1.0 && value <= 100.0 {
        value / 100.0
    } else {
        value
    };
    if scaled.is_finite() {
        (scaled.clamp(0.0, 1.0) * 1000.0).round() / 1000.0
    } else {
        0.5
    }
}

fn analysis_metadata(root: &Map<String, Value>) -> Option<Value> {
    field(root, &["analysisMetadata", "analysis_metadata"])
        .filter(|v| v.is_object())
        .cloned()
}

/// First present key among `names`.
fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| obj.get(*n)).filter(|v| !v.is_null())
}

/// Non-empty trimmed text from a string, number or bool.
fn text(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Record for a response nothing could be recovered from.
pub fn placeholder_record(raw_excerpt: String) -> AssessmentRecord {
    AssessmentRecord {
        description: "Automated assessment unavailable; manual review required".to_string(),
        condition: Condition {
            summary: "Unable to determine condition from automated analysis".to_string(),
            points: Vec::new(),
            rating: Rating::Fair,
        },
        cleanliness: Cleanliness::DomesticClean,
        defects: None,
        components: None,
        analysis_metadata: Some(json!({ "source": "fallback" })),
        requires_review: true,
        raw_response_excerpt: Some(raw_excerpt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn renormalize(record: &AssessmentRecord) -> AssessmentRecord {
        let value = serde_json::to_value(record).unwrap();
        validate_and_normalize_structure(&value).unwrap()
    }

    #[test]
    fn ratings_fold_onto_closed_set() {
        assert_eq!(normalize_rating("EXCELLENT"), Rating::Excellent);
        assert_eq!(normalize_rating("Very Good"), Rating::Good);
        assert_eq!(normalize_rating("fair to middling"), Rating::Fair);
        assert_eq!(normalize_rating("Poor"), Rating::Poor);
        assert_eq!(normalize_rating("CRITICAL - unsafe"), Rating::Critical);
        assert_eq!(normalize_rating("badly damaged"), Rating::Poor);
        assert_eq!(normalize_rating("sparkly"), Rating::Fair);
        assert_eq!(normalize_rating(""), Rating::Fair);
    }

    #[test]
    fn cleanliness_folds_onto_closed_set() {
        assert_eq!(normalize_cleanliness("Professional Clean"), Cleanliness::ProfessionalClean);
        assert_eq!(
            normalize_cleanliness("professional clean with omissions"),
            Cleanliness::ProfessionalCleanWithOmissions
        );
        assert_eq!(
            normalize_cleanliness("Domestic-Clean High Level"),
            Cleanliness::DomesticCleanHighLevel
        );
        assert_eq!(normalize_cleanliness("domestic clean"), Cleanliness::DomesticClean);
        assert_eq!(normalize_cleanliness("NOT CLEAN"), Cleanliness::NotClean);
        assert_eq!(normalize_cleanliness("quite dirty"), Cleanliness::NotClean);
        assert_eq!(normalize_cleanliness("spotless?"), Cleanliness::DomesticClean);
    }

    #[test]
    fn defaults_missing_fields_with_warnings() {
        let n = normalize_with_warnings(&json!({ "description": "Kitchen worktop" })).unwrap();
        assert_eq!(n.record.description, "Kitchen worktop");
        assert_eq!(n.record.condition.summary, DEFAULT_SUMMARY);
        assert_eq!(n.record.condition.rating, Rating::Fair);
        assert_eq!(n.record.cleanliness, Cleanliness::DomesticClean);
        assert_eq!(n.warnings.len(), 3);
    }

    #[test]
    fn string_condition_and_top_level_rating() {
        let record = validate_and_normalize_structure(&json!({
            "description": "Carpet",
            "condition": "Worn in the doorway",
            "rating": "Poor",
            "cleanliness": "Domestic Clean",
            "points": ["fraying edge", {"point": "stain", "location": "by window"}]
        }))
        .unwrap();

        assert_eq!(record.condition.summary, "Worn in the doorway");
        assert_eq!(record.condition.rating, Rating::Poor);
        assert_eq!(record.condition.points.len(), 2);
        assert_eq!(
            record.condition.points[1],
            ConditionPoint::Structured(StructuredPoint {
                point: "stain".to_string(),
                location: Some("by window".to_string()),
                severity: None,
            })
        );
    }

    #[test]
    fn defects_are_defaulted_field_by_field() {
        let record = validate_and_normalize_structure(&json!({
            "description": "Wall",
            "defects": [
                { "severity": "major", "confidence": 85, "category": "Structural crack" },
                { "type": "scuff" },
                "not an object"
            ]
        }))
        .unwrap();

        let defects = record.defects.unwrap();
        assert_eq!(defects.len(), 2);
        assert_eq!(defects[0].id, "defect-1");
        assert_eq!(defects[0].severity, DefectSeverity::Major);
        assert_eq!(defects[0].category, DefectCategory::Structural);
        assert!((defects[0].confidence - 0.85).abs() < 1e-9);
        assert_eq!(defects[0].repair_urgency, RepairUrgency::High);
        assert_eq!(defects[0].estimated_cost, CostBand::High);
        assert_eq!(defects[1].defect_type, "scuff");
        assert_eq!(defects[1].severity, DefectSeverity::Minor);
        assert_eq!(defects[1].supporting_evidence, 1);
        assert_eq!(defects[1].location.area, "unspecified");
    }

    #[test]
    fn multi_component_takes_worst_rating_and_cleanliness() {
        let value = json!({
            "sceneSummary": "Bathroom with bath, basin and tiles",
            "components": [
                { "name": "Bath", "condition": { "summary": "Sound", "rating": "good" }, "cleanliness": "professional clean" },
                { "name": "Tiles", "condition": { "summary": "Cracked tile", "rating": "poor" }, "cleanliness": "domestic clean" }
            ]
        });
        assert!(matches!(
            AssessmentShape::detect(&value).unwrap(),
            AssessmentShape::MultiComponent { .. }
        ));

        let record = validate_and_normalize_structure(&value).unwrap();
        assert_eq!(record.description, "Bathroom with bath, basin and tiles");
        assert_eq!(record.condition.rating, Rating::Poor);
        assert_eq!(record.cleanliness, Cleanliness::DomesticClean);
        assert_eq!(record.condition.summary, "Bath: Sound; Tiles: Cracked tile");
        assert_eq!(record.components.as_ref().unwrap().len(), 2);

        assert_eq!(renormalize(&record), record);
    }

    #[test]
    fn rejects_non_objects_and_unknown_shapes() {
        assert_eq!(
            validate_and_normalize_structure(&json!([1, 2])).unwrap_err(),
            NormalizeError::NotAnObject("array")
        );
        assert_eq!(
            validate_and_normalize_structure(&json!({ "foo": 1 })).unwrap_err(),
            NormalizeError::UnrecognizedShape
        );
    }

    #[test]
    fn placeholder_is_stable_under_normalization() {
        let record = placeholder_record("garbled".to_string());
        assert_eq!(renormalize(&record), record);
    }

    fn arb_text() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("EXCELLENT".to_string()),
            Just("very good".to_string()),
            Just("Professional clean with omissions".to_string()),
            Just("not clean".to_string()),
            "[ a-zA-Z_-]{0,24}",
        ]
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(
            description in arb_text(),
            summary in arb_text(),
            rating in arb_text(),
            cleanliness in arb_text(),
            severity in arb_text(),
            confidence in -5.0f64..150.0,
            points in proptest::collection::vec(arb_text(), 0..4),
        ) {
            let value = json!({
                "description": description,
                "condition": { "summary": summary, "rating": rating, "points": points },
                "cleanliness": cleanliness,
                "defects": [{ "severity": severity, "confidence": confidence }],
            });
            let once = validate_and_normalize_structure(&value).unwrap();
            let twice = renormalize(&once);
            prop_assert_eq!(once, twice);
        }
    }
}
