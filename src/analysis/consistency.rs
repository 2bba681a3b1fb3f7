//! Cross-photo consistency scoring.
//!
//! Several photos of the same component should produce compatible assessments. This
//! scores how well they agree on material, condition, cleanliness and capture conditions,
//! and recommends whether to accept the result, review it or retake the photos. Pure
//! computation; no model calls.

use std::collections::{BTreeSet, HashSet};

use chrono::Duration;
use tracing::debug;

use crate::domain::assessment::AssessmentRecord;
use crate::domain::consistency::{
    ConfidenceTier, ConsistencyScores, RecommendedAction, SourceMetadata, ValidationResult,
};

const MATERIAL_WEIGHT: f64 = 0.3;
const CONDITION_WEIGHT: f64 = 0.3;
const CLEANLINESS_WEIGHT: f64 = 0.2;
const LIGHTING_WEIGHT: f64 = 0.1;
const TEMPORAL_WEIGHT: f64 = 0.1;

const HIGH_CONFIDENCE: f64 = 0.8;
const MEDIUM_CONFIDENCE: f64 = 0.6;

/// Words that identify what a component is made of.
const MATERIALS: &[&str] = &[
    "wood", "wooden", "oak", "pine", "timber", "walnut", "mdf", "laminate", "veneer", "tile",
    "tiles", "tiled", "ceramic", "porcelain", "marble", "granite", "quartz", "stone", "slate",
    "brick", "concrete", "plaster", "plasterboard", "paint", "painted", "wallpaper", "carpet",
    "carpeted", "vinyl", "linoleum", "rubber", "glass", "mirror", "metal", "steel",
    "stainless", "aluminium", "aluminum", "chrome", "brass", "copper", "iron", "plastic", "upvc",
    "pvc", "acrylic", "fabric", "leather", "upholstered",
];

/// Score agreement between assessments of the same subject.
///
/// `metadata` is matched to `assessments` by position; missing entries are treated as
/// unknown capture conditions.
pub fn validate(assessments: &[AssessmentRecord], metadata: &[SourceMetadata]) -> ValidationResult {
    if assessments.is_empty() {
        return ValidationResult {
            is_consistent: false,
            confidence: ConfidenceTier::Low,
            discrepancies: vec!["No assessments to compare".to_string()],
            recommended_action: RecommendedAction::Retake,
            validation_score: 0.0,
            scores: ConsistencyScores {
                material: 0.0,
                condition: 0.0,
                cleanliness: 0.0,
                lighting: 0.0,
                temporal: 0.0,
            },
        };
    }

    let mut discrepancies = Vec::new();
    let scores = ConsistencyScores {
        material: material_score(assessments, &mut discrepancies),
        condition: condition_score(assessments, &mut discrepancies),
        cleanliness: cleanliness_score(assessments, &mut discrepancies),
        lighting: lighting_score(metadata, &mut discrepancies),
        temporal: temporal_score(metadata, &mut discrepancies),
    };

    let weighted = scores.material * MATERIAL_WEIGHT
        + scores.condition * CONDITION_WEIGHT
        + scores.cleanliness * CLEANLINESS_WEIGHT
        + scores.lighting * LIGHTING_WEIGHT
        + scores.temporal * TEMPORAL_WEIGHT;
    let validation_score = (weighted.clamp(0.0, 1.0) * 1000.0).round() / 1000.0;

    let confidence = if validation_score >= HIGH_CONFIDENCE {
        ConfidenceTier::High
    } else if validation_score >= MEDIUM_CONFIDENCE {
        ConfidenceTier::Medium
    } else {
        ConfidenceTier::Low
    };

    let recommended_action = if confidence == ConfidenceTier::Low
        || discrepancies.len() > 2
        || validation_score < 0.4
    {
        RecommendedAction::Retake
    } else if confidence == ConfidenceTier::High
        && discrepancies.is_empty()
        && validation_score > 0.8
    {
        RecommendedAction::Accept
    } else {
        RecommendedAction::Review
    };

    debug!(
        sources = assessments.len(),
        validation_score,
        discrepancies = discrepancies.len(),
        action = ?recommended_action,
        "Consistency validated"
    );

    ValidationResult {
        is_consistent: discrepancies.len() < 2 && validation_score > 0.6,
        confidence,
        discrepancies,
        recommended_action,
        validation_score,
        scores,
    }
}

/// Mean pairwise Jaccard similarity of the material words each source mentions.
fn material_score(assessments: &[AssessmentRecord], discrepancies: &mut Vec<String>) -> f64 {
    let sets: Vec<BTreeSet<&'static str>> = assessments.iter().map(materials_of).collect();
    if sets.iter().all(BTreeSet::is_empty) {
        return 1.0;
    }

    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in sets.iter().enumerate() {
        for b in &sets[i + 1..] {
            total += match (a.is_empty(), b.is_empty()) {
                (true, true) => 1.0,
                // One photo just didn't say; that's weaker than a contradiction
                (true, false) | (false, true) => 0.5,
                (false, false) => {
                    a.intersection(b).count() as f64 / a.union(b).count() as f64
                }
            };
            pairs += 1;
        }
    }
    let score = if pairs == 0 { 1.0 } else { total / pairs as f64 };

    if score < 0.5 {
        let seen: Vec<String> = sets
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.iter().copied().collect::<Vec<_>>().join("/"))
            .collect();
        discrepancies.push(format!(
            "Material identification differs between sources ({})",
            seen.join(" vs ")
        ));
    }
    score
}

fn materials_of(record: &AssessmentRecord) -> BTreeSet<&'static str> {
    let text = format!("{} {}", record.description, record.condition.summary).to_lowercase();
    let words: HashSet<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    MATERIALS
        .iter()
        .copied()
        .filter(|m| words.contains(m))
        .collect()
}

/// Spread on a ranked scale: agreement 0.9, one step 0.7, two steps 0.4, worse 0.2.
fn spread_score(spread: u8) -> f64 {
    match spread {
        0 => 0.9,
        1 => 0.7,
        2 => 0.4,
        _ => 0.2,
    }
}

fn condition_score(assessments: &[AssessmentRecord], discrepancies: &mut Vec<String>) -> f64 {
    let ratings = assessments.iter().map(|a| a.condition.rating);
    let (Some(best), Some(worst)) = (ratings.clone().min(), ratings.max()) else {
        return 1.0;
    };
    let spread = worst.rank() - best.rank();
    if spread >= 2 {
        discrepancies.push(format!(
            "Condition ratings range from {} to {}",
            best.as_str(),
            worst.as_str()
        ));
    }
    spread_score(spread)
}

fn cleanliness_score(assessments: &[AssessmentRecord], discrepancies: &mut Vec<String>) -> f64 {
    let grades = assessments.iter().map(|a| a.cleanliness);
    let (Some(best), Some(worst)) = (grades.clone().min(), grades.max()) else {
        return 1.0;
    };
    let spread = worst.rank() - best.rank();
    if spread >= 2 {
        discrepancies.push(format!(
            "Cleanliness grades range from {} to {}",
            best.as_str(),
            worst.as_str()
        ));
    }
    spread_score(spread)
}

/// Tolerates some variation in lighting and angle; many distinct setups lower the score.
fn lighting_score(metadata: &[SourceMetadata], discrepancies: &mut Vec<String>) -> f64 {
    let lighting = distinct(metadata.iter().map(|m| &m.lighting));
    let angles = distinct(metadata.iter().map(|m| &m.angle));

    let mut score: f64 = 1.0;
    score -= 0.2 * lighting.len().saturating_sub(1) as f64;
    score -= 0.1 * angles.len().saturating_sub(1) as f64;
    if lighting
        .iter()
        .any(|l| ["dark", "dim", "low", "poor"].iter().any(|w| l.contains(w)))
    {
        score -= 0.2;
    }
    let score = score.clamp(0.0, 1.0);

    if score < 0.6 {
        discrepancies.push("Lighting or camera angle varies significantly between photos".to_string());
    }
    score
}

fn distinct<'a>(values: impl Iterator<Item = &'a Option<String>>) -> HashSet<String> {
    values
        .flatten()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Photos taken far apart in time may show different states of the same subject.
fn temporal_score(metadata: &[SourceMetadata], discrepancies: &mut Vec<String>) -> f64 {
    let stamps = metadata.iter().filter_map(|m| m.timestamp);
    let (Some(first), Some(last)) = (stamps.clone().min(), stamps.max()) else {
        return 1.0;
    };
    let spread = last - first;

    if spread > Duration::hours(24) {
        discrepancies.push(format!(
            "Photos were taken {} hours apart",
            spread.num_hours()
        ));
    }

    if spread <= Duration::hours(1) {
        1.0
    } else if spread <= Duration::hours(24) {
        0.8
    } else if spread <= Duration::days(7) {
        0.5
    } else {
        0.2
    }
}
