//! Prompt text for component assessments.

use crate::domain::ai::InspectionMode;
use crate::domain::assessment::{AssessmentRecord, Cleanliness, Rating};

const RESPONSE_SCHEMA: &str = r#"Respond with a single JSON object and nothing else:
{
  "description": "what the component is: material, colour, type",
  "condition": {
    "summary": "one sentence on overall condition",
    "points": ["each observed issue or notable feature"],
    "rating": "{RATINGS}"
  },
  "cleanliness": "{CLEANLINESS}",
  "defects": [
    {
      "category": "structural | surface | functional | aesthetic",
      "type": "short defect name",
      "severity": "CRITICAL | MAJOR | MODERATE | MINOR | TRACE",
      "confidence": 0.0,
      "location": { "area": "where on the component", "extent": "localized | widespread" },
      "description": "what is visible",
      "supportingEvidence": 1
    }
  ]
}
If the photos show several distinct components, respond instead with
{"sceneSummary": "...", "components": [{"name": "...", "description": "...", "condition": {...}, "cleanliness": "..."}]}"#;

/// Prompt for assessing one component from its photos.
pub fn assessment_prompt(
    component_name: &str,
    room_type: Option<&str>,
    mode: InspectionMode,
    check_in: Option<&AssessmentRecord>,
) -> String {
    let mut prompt = format!(
        "You are a property inventory clerk assessing the {} {}.\n",
        component_name.trim(),
        room_type
            .map(|r| format!("in the {}", r.trim()))
            .unwrap_or_else(|| "shown".to_string())
    );

    prompt.push_str(
        "Describe only what is visible in the photos. Rate condition and cleanliness using \
         the fixed scales below; do not invent other grades.\n",
    );

    match (mode, check_in) {
        (InspectionMode::CheckOut, Some(previous)) => {
            prompt.push_str(&format!(
                "This is a check-out inspection. At check-in the component was recorded as: \
                 \"{}\", condition {} (\"{}\"), cleanliness {}. Note any change, distinguishing \
                 fair wear and tear from damage.\n",
                previous.description,
                previous.condition.rating.as_str(),
                previous.condition.summary,
                previous.cleanliness.as_str(),
            ));
        }
        (InspectionMode::CheckOut, None) => {
            prompt.push_str("This is a check-out inspection. Note any damage or wear.\n");
        }
        (InspectionMode::CheckIn, _) => {
            prompt.push_str(
                "This is a check-in inspection. Record existing defects precisely so they \
                 can be compared at check-out.\n",
            );
        }
    }

    prompt.push('\n');
    prompt.push_str(&response_schema());
    prompt
}

/// The schema with the grade scales filled in from the record enums.
fn response_schema() -> String {
    let ratings: Vec<&str> = Rating::ALL.iter().map(|r| r.as_str()).collect();
    let grades: Vec<&str> = Cleanliness::ALL.iter().map(|c| c.as_str()).collect();
    RESPONSE_SCHEMA
        .replace("{RATINGS}", &ratings.join(" | "))
        .replace("{CLEANLINESS}", &grades.join(" | "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::normalize::placeholder_record;

    #[test]
    fn mentions_component_room_and_schema() {
        let p = assessment_prompt("oven", Some("kitchen"), InspectionMode::CheckIn, None);
        assert!(p.contains("assessing the oven in the kitchen"));
        assert!(p.contains("check-in inspection"));
        assert!(p.contains("\"cleanliness\""));
        assert!(p.contains("\"rating\": \"excellent | good | fair | poor | critical\""));
        assert!(p.contains("professional_clean_with_omissions | domestic_clean_high_level"));
        assert!(!p.contains("{RATINGS}") && !p.contains("{CLEANLINESS}"));
    }

    #[test]
    fn check_out_includes_check_in_record() {
        let previous = placeholder_record(String::new());
        let p = assessment_prompt("door", None, InspectionMode::CheckOut, Some(&previous));
        assert!(p.contains("assessing the door shown"));
        assert!(p.contains("condition fair"));
        assert!(p.contains("cleanliness domestic_clean"));
    }
}
