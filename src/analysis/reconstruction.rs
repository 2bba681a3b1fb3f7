//! Field-by-field recovery for responses that are not parseable as JSON.
//!
//! Each field is looked up through a battery of patterns (quoted key, markdown bold,
//! heading, bracket label, colon label), list items through bullet/numbered patterns,
//! and the pieces are assembled into a JSON candidate for normalization.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde_json::{json, Map, Value};

lazy_static! {
    static ref DESCRIPTION_PATTERNS: Vec<Regex> =
        field_patterns("description|component description|desc");
    static ref SUMMARY_PATTERNS: Vec<Regex> =
        field_patterns("condition summary|summary|condition");
    static ref QUALIFIED_RATING_PATTERNS: Vec<Regex> =
        field_patterns("overall condition rating|condition rating|overall rating");
    static ref BARE_RATING_PATTERNS: Vec<Regex> = field_patterns("rating");
    static ref CLEANLINESS_PATTERNS: Vec<Regex> =
        field_patterns("cleanliness rating|cleanliness|cleaning standard");

    /// "in GOOD condition"
    static ref RATING_BEFORE_CONDITION: Regex = Regex::new(
        r"(?i)\b(excellent|good|fair|poor|critical)\s+(?:overall\s+)?condition\b"
    ).unwrap();

    /// "condition is poor", "condition rated as fair"
    static ref RATING_AFTER_CONDITION: Regex = Regex::new(
        r"(?i)\bcondition\s*(?:is|was|:|-|=)?\s*(?:rated\s+)?(?:as\s+)?(excellent|good|fair|poor|critical)\b"
    ).unwrap();

    static ref CLEANLINESS_PHRASE: Regex = Regex::new(
        r"(?i)\b(professional(?:ly)?[\s_-]+clean(?:ed)?(?:[\s_-]+with[\s_-]+omissions)?|domestic[\s_-]+clean(?:[\s_-]+high[\s_-]+level)?|not[\s_-]+clean|unclean|dirty)\b"
    ).unwrap();

    /// "- item", "* item", "• item", "1. item", "2) item"
    static ref LIST_ITEM: Regex = Regex::new(
        r"(?m)^[ \t]*(?:[-•*]|\d{1,2}[.)])[ \t]+(.+?)[ \t]*$"
    ).unwrap();
}

const MAX_POINTS: usize = 20;
const MAX_DESCRIPTION_CHARS: usize = 300;

/// Build the pattern battery for a `|`-separated list of field labels.
fn field_patterns(names: &str) -> Vec<Regex> {
    let patterns = [
        // "description": "text   (closing quote optional for truncated output)
        format!(r#"(?i)"(?:{names})"\s*:\s*"((?:[^"\\]|\\.)*)"#),
        // **Description:** text  /  **Description**: text
        format!(r"(?i)\*\*\s*(?:{names})\s*:?\s*\*\*\s*:?[ \t]*([^\n]+)"),
        // ## Description\ntext
        format!(r"(?im)^[ \t]*#{{1,6}}[ \t]*(?:{names})[ \t]*:?[ \t]*\n+[ \t]*([^\n#]+)"),
        // [Description] text
        format!(r"(?i)\[(?:{names})\]\s*:?[ \t]*([^\n]+)"),
        // Description: text
        format!(r"(?im)(?:^|[\s,;(])(?:{names})[ \t]*[:=][ \t]*([^\n]+)"),
    ];
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
}

/// Result of a reconstruction pass.
#[derive(Debug, Clone)]
pub struct Reconstructed {
    pub candidate: Value,
    /// Number of fields located explicitly in the text.
    pub fields_found: usize,
}

/// Recover what fields we can. `None` when nothing recognizable was found.
pub fn reconstruct(raw: &str) -> Option<Reconstructed> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    let description = first_match(&DESCRIPTION_PATTERNS, text);
    let summary = first_match(&SUMMARY_PATTERNS, text);
    let rating = first_match(&QUALIFIED_RATING_PATTERNS, text)
        .or_else(|| capture(&RATING_BEFORE_CONDITION, text))
        .or_else(|| capture(&RATING_AFTER_CONDITION, text))
        .or_else(|| bare_rating_label(text));
    let cleanliness = first_match(&CLEANLINESS_PATTERNS, text)
        .or_else(|| capture(&CLEANLINESS_PHRASE, text));

    let fields_found = [&description, &summary, &rating, &cleanliness]
        .iter()
        .filter(|f| f.is_some())
        .count();
    if fields_found == 0 {
        return None;
    }

    let points: Vec<String> = LIST_ITEM
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| clean_value(m.as_str())))
        .filter(|s| !s.is_empty())
        .take(MAX_POINTS)
        .collect();

    let mut condition = Map::new();
    if let Some(summary) = summary {
        condition.insert("summary".to_string(), json!(summary));
    }
    if let Some(rating) = rating {
        condition.insert("rating".to_string(), json!(rating));
    }
    condition.insert("points".to_string(), json!(points));

    let mut candidate = Map::new();
    let description = description.or_else(|| leading_sentence(text));
    if let Some(description) = description {
        candidate.insert("description".to_string(), json!(description));
    }
    candidate.insert("condition".to_string(), Value::Object(condition));
    if let Some(cleanliness) = cleanliness {
        candidate.insert("cleanliness".to_string(), json!(cleanliness));
    }

    Some(Reconstructed {
        candidate: Value::Object(candidate),
        fields_found,
    })
}

fn first_match(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|re| capture(re, text))
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| clean_value(&unescape(m.as_str())))
        .find(|s| !s.is_empty())
}

/// A plain "Rating:" label, skipping ones that belong to another field
/// ("Cleanliness rating: ...").
fn bare_rating_label(text: &str) -> Option<String> {
    BARE_RATING_PATTERNS.iter().find_map(|re| {
        re.captures_iter(text)
            .filter(|c| !label_qualified_by(text, c, "cleanliness"))
            .filter_map(|c| c.get(1))
            .map(|m| clean_value(&unescape(m.as_str())))
            .find(|s| !s.is_empty())
    })
}

/// Whether the word right before the matched "rating" label is `qualifier`.
fn label_qualified_by(text: &str, caps: &Captures, qualifier: &str) -> bool {
    let (Some(whole), Some(value)) = (caps.get(0), caps.get(1)) else {
        return false;
    };
    let line_start = text[..whole.start()].rfind('\n').map_or(0, |i| i + 1);
    let head = text[line_start..value.start()].to_ascii_lowercase();
    let Some(at) = head.rfind("rating") else {
        return false;
    };
    head[..at]
        .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
        .ends_with(qualifier)
}

/// Undo JSON string escapes when the capture came from a quoted value.
fn unescape(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.replace('\\', ""))
}

fn clean_value(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '*' || c == '`')
        .trim_end_matches(&[',', ';'][..])
        .trim()
        .to_string()
}

/// Free prose usually opens by saying what the component is.
fn leading_sentence(text: &str) -> Option<String> {
    if text.starts_with('{') || text.starts_with('[') {
        return None;
    }
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line.trim_start_matches('#').trim();
    let sentence = match line.find(". ") {
        Some(end) => &line[..=end],
        None => line,
    };
    let sentence: String = sentence.chars().take(MAX_DESCRIPTION_CHARS).collect();
    let sentence = clean_value(&sentence);
    (!sentence.is_empty()).then_some(sentence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colon_labels_and_rating_phrase() {
        let r = reconstruct(
            "The wall is painted white, in GOOD condition, CLEANLINESS: domestic clean",
        )
        .unwrap();
        assert_eq!(r.fields_found, 2);
        assert_eq!(r.candidate["condition"]["rating"], json!("GOOD"));
        assert_eq!(r.candidate["cleanliness"], json!("domestic clean"));
        assert_eq!(
            r.candidate["description"],
            json!("The wall is painted white, in GOOD condition, CLEANLINESS: domestic clean")
        );
    }

    #[test]
    fn markdown_bold_heading_and_bullets() {
        let text = "## Description\nSolid oak dining table\n\n\
                    **Rating:** Fair\n\
                    **Cleanliness**: professional clean with omissions\n\n\
                    Observations:\n\
                    - scratch on top surface\n\
                    * water ring near edge\n\
                    1. loose leg joint\n";
        let r = reconstruct(text).unwrap();
        assert_eq!(r.candidate["description"], json!("Solid oak dining table"));
        assert_eq!(r.candidate["condition"]["rating"], json!("Fair"));
        assert_eq!(
            r.candidate["cleanliness"],
            json!("professional clean with omissions")
        );
        assert_eq!(
            r.candidate["condition"]["points"],
            json!(["scratch on top surface", "water ring near edge", "loose leg joint"])
        );
        assert!(r.fields_found >= 3);
    }

    #[test]
    fn truncated_json_quoted_keys() {
        let text = r#"{"description": "Double \"glazed\" window", "condition": {"rating": "poor", "summary": "Seal failed, condensation between pa"#;
        let r = reconstruct(text).unwrap();
        assert_eq!(r.candidate["description"], json!("Double \"glazed\" window"));
        assert_eq!(r.candidate["condition"]["rating"], json!("poor"));
        assert_eq!(
            r.candidate["condition"]["summary"],
            json!("Seal failed, condensation between pa")
        );
    }

    #[test]
    fn bracket_labels() {
        let r = reconstruct("[Cleanliness] not clean\n[Rating] critical").unwrap();
        assert_eq!(r.candidate["cleanliness"], json!("not clean"));
        assert_eq!(r.candidate["condition"]["rating"], json!("critical"));
    }

    #[test]
    fn cleanliness_rating_label_is_not_the_condition_rating() {
        let r = reconstruct(
            "Description: Oak door\nCleanliness rating: professional clean\nCondition: poor, deep scratches",
        )
        .unwrap();
        assert_eq!(r.candidate["condition"]["rating"], json!("poor"));
        assert_eq!(r.candidate["cleanliness"], json!("professional clean"));

        let r = reconstruct("Overall condition is poor.\nCleanliness rating: not clean").unwrap();
        assert_eq!(r.candidate["condition"]["rating"], json!("poor"));
        assert_eq!(r.candidate["cleanliness"], json!("not clean"));
    }

    #[test]
    fn bare_rating_label_after_cleanliness_line() {
        let r = reconstruct("Cleanliness rating: dirty\nRating: good").unwrap();
        assert_eq!(r.candidate["condition"]["rating"], json!("good"));
        assert_eq!(r.candidate["cleanliness"], json!("dirty"));
    }

    #[test]
    fn nothing_recognizable() {
        assert!(reconstruct("").is_none());
        assert!(reconstruct("   ").is_none());
        assert!(reconstruct("I'm sorry, I can't help with that.").is_none());
    }
}
