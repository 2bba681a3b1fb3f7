//! Parsing strategies, ordered from strictest to most lenient.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use super::normalize::{normalize_with_warnings, placeholder_record, NormalizeError};
use super::parser::{ParseMethod, ParseResult};
use super::reconstruction::reconstruct;

lazy_static! {
    /// ```json ... ``` or bare ``` ... ``` blocks
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap();

    /// Trailing commas before a closing bracket
    static ref TRAILING_COMMA: Regex = Regex::new(r",(\s*[}\]])").unwrap();
}

/// Field names that anchor a brace-delimited fragment as an assessment.
const ANCHOR_KEYS: &[&str] = &[
    "\"description\"",
    "\"condition\"",
    "\"cleanliness\"",
    "\"sceneSummary\"",
];

/// Upper bound on fragments tried, so pathological input stays linear-ish.
const MAX_FRAGMENTS: usize = 32;

/// Characters of the raw response kept on a fallback record.
pub const RAW_EXCERPT_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("response is empty")]
    Empty,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("no fenced code block found")]
    NoCodeBlock,

    #[error("no anchored JSON fragment found")]
    NoFragment,

    #[error("no recognizable fields found")]
    NoFields,

    #[error("candidate rejected: {0}")]
    Rejected(#[from] NormalizeError),
}

/// A parsed but not yet normalized candidate.
#[derive(Debug)]
pub struct Candidate {
    pub value: Value,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    DirectJson,
    CodeBlock,
    PatternMatch,
    Reconstruction,
}

impl Strategy {
    /// Every strategy in priority order; [`fallback`] runs after these.
    pub const CASCADE: [Strategy; 4] = [
        Strategy::DirectJson,
        Strategy::CodeBlock,
        Strategy::PatternMatch,
        Strategy::Reconstruction,
    ];

    pub fn method(self) -> ParseMethod {
        match self {
            Self::DirectJson => ParseMethod::DirectJson,
            Self::CodeBlock => ParseMethod::CodeBlock,
            Self::PatternMatch => ParseMethod::PatternMatch,
            Self::Reconstruction => ParseMethod::Reconstruction,
        }
    }

    /// Run this strategy alone, normalizing whatever it extracts.
    pub fn run(self, raw: &str) -> ParseResult {
        let text = raw.trim();
        let extracted = match self {
            _ if text.is_empty() => Err(StrategyError::Empty),
            Self::DirectJson => direct_json(text),
            Self::CodeBlock => code_block(text),
            Self::PatternMatch => pattern_match(text),
            Self::Reconstruction => reconstruct(text)
                .map(|r| Candidate {
                    value: r.candidate,
                    confidence: if r.fields_found >= 3 { 0.75 } else { 0.70 },
                })
                .ok_or(StrategyError::NoFields),
        };

        let outcome = extracted.and_then(|candidate| {
            let normalized = normalize_with_warnings(&candidate.value)?;
            Ok((candidate, normalized))
        });

        match outcome {
            Ok((candidate, normalized)) => {
                // A clean direct parse is the only case that earns full confidence
                let confidence = if self == Self::DirectJson && !normalized.warnings.is_empty() {
                    0.95
                } else {
                    candidate.confidence
                };
                ParseResult::Parsed {
                    data: normalized.record,
                    method: self.method(),
                    confidence,
                    validation_errors: normalized.warnings,
                }
            }
            Err(e) => ParseResult::Failed {
                method: self.method(),
                errors: vec![e.to_string()],
            },
        }
    }
}

fn direct_json(text: &str) -> Result<Candidate, StrategyError> {
    let value = serde_json::from_str(text).map_err(|e| StrategyError::InvalidJson(e.to_string()))?;
    Ok(Candidate {
        value,
        confidence: 1.0,
    })
}

fn code_block(text: &str) -> Result<Candidate, StrategyError> {
    let mut last_error = StrategyError::NoCodeBlock;
    for caps in FENCED_BLOCK.captures_iter(text) {
        let Some(body) = caps.get(1).map(|m| m.as_str().trim()) else {
            continue;
        };
        match serde_json::from_str::<Value>(body) {
            Ok(value) if value.is_object() => {
                return Ok(Candidate {
                    value,
                    confidence: 0.90,
                })
            }
            Ok(_) => last_error = StrategyError::InvalidJson("code block is not an object".into()),
            Err(e) => last_error = StrategyError::InvalidJson(e.to_string()),
        }
    }
    Err(last_error)
}

fn pattern_match(text: &str) -> Result<Candidate, StrategyError> {
    let fragments = balanced_objects(text)
        .into_iter()
        .filter(|f| ANCHOR_KEYS.iter().any(|k| f.contains(k)))
        .take(MAX_FRAGMENTS);

    for fragment in fragments {
        if let Ok(value) = serde_json::from_str::<Value>(fragment) {
            if super::normalize::AssessmentShape::detect(&value).is_ok() {
                return Ok(Candidate {
                    value,
                    confidence: 0.85,
                });
            }
        }
        let repaired = TRAILING_COMMA.replace_all(fragment, "$1");
        if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
            if super::normalize::AssessmentShape::detect(&value).is_ok() {
                return Ok(Candidate {
                    value,
                    confidence: 0.80,
                });
            }
        }
    }
    Err(StrategyError::NoFragment)
}

/// Every `{...}` span with balanced braces, outermost first, string literals respected.
fn balanced_objects(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();

    for (start, _) in text.match_indices('{').take(MAX_FRAGMENTS * 8) {
        if found.len() >= MAX_FRAGMENTS * 2 {
            break;
        }
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (offset, &b) in bytes[start..].iter().enumerate() {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        found.push(&text[start..=start + offset]);
                        break;
                    }
                }
                _ => {}
            }
        }
    }
    found
}

/// Terminal strategy: a minimal valid record flagged for review. Cannot fail.
pub fn fallback(raw: &str, errors: Vec<String>) -> ParseResult {
    let excerpt: String = raw.trim().chars().take(RAW_EXCERPT_CHARS).collect();
    ParseResult::Parsed {
        data: placeholder_record(excerpt),
        method: ParseMethod::Fallback,
        confidence: 0.5,
        validation_errors: errors,
    }
}
