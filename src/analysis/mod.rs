//! Turning vision model output into structured assessments.
//!
//! - `parser`: strategy cascade over raw text; always yields a record
//! - `strategies`: individual extraction strategies
//! - `reconstruction`: field-by-field recovery from prose or truncated JSON
//! - `normalize`: coercion of candidates onto the closed record schema
//! - `consistency`: agreement scoring across photos of one subject

pub mod consistency;
pub mod normalize;
pub mod parser;
pub mod reconstruction;
pub mod strategies;

pub use normalize::validate_and_normalize_structure;
pub use parser::{parse_with_fallbacks, ParseMethod, ParseResult};
