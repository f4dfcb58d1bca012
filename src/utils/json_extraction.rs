//! JSON extraction utilities for parsing LLM responses.
//!
//! Responses from a text-generation capability are expected to be JSON, but
//! frequently arrive wrapped in prose or markdown fences. Parsing happens in
//! two steps:
//! 1. Direct parse of the trimmed content
//! 2. Parse of the first balanced delimiter-enclosed substring
//!
//! # Example
//!
//! ```
//! use autoresearch::utils::json_extraction::{parse_structured, ExpectedShape};
//!
//! let response = "Here is the result: {\"name\": \"example\", \"value\": 42} hope it helps";
//! let value = parse_structured(response, ExpectedShape::Object).unwrap();
//! assert_eq!(value["value"], 42);
//! ```

use serde_json::Value;
use thiserror::Error;

/// Error type for JSON extraction failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated: {unclosed_braces} unclosed braces, {unclosed_brackets} unclosed brackets")]
    Truncated {
        unclosed_braces: usize,
        unclosed_brackets: usize,
    },
    #[error("No JSON content found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },
    #[error("Balanced JSON candidate failed to parse: {0}")]
    Invalid(String),
}

/// The top-level structure a caller expects to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedShape {
    /// A `{...}` mapping.
    Object,
    /// A `[...]` sequence. A lone object is also accepted.
    Array,
}

/// Analysis result for JSON structure
#[derive(Debug, Clone, PartialEq)]
pub struct JsonStructureAnalysis {
    /// Number of unclosed braces ('{' without matching '}')
    pub unclosed_braces: usize,
    /// Number of unclosed brackets ('[' without matching ']')
    pub unclosed_brackets: usize,
    /// Whether we ended inside a string literal
    pub in_string: bool,
}

/// Scans content and tracks brace/bracket depth to detect incomplete JSON.
pub fn analyze_json_structure(s: &str) -> JsonStructureAnalysis {
    let mut brace_depth: isize = 0;
    let mut bracket_depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => brace_depth += 1,
            '}' if !in_string => brace_depth -= 1,
            '[' if !in_string => bracket_depth += 1,
            ']' if !in_string => bracket_depth -= 1,
            _ => {}
        }
    }

    JsonStructureAnalysis {
        unclosed_braces: brace_depth.max(0) as usize,
        unclosed_brackets: bracket_depth.max(0) as usize,
        in_string,
    }
}

/// Parses structured data out of an LLM response.
///
/// Tries a direct parse first. On failure, locates the first balanced
/// delimiter-enclosed substring for the expected shape and parses that.
/// For [`ExpectedShape::Array`] a balanced object is tried when no array
/// candidate parses.
pub fn parse_structured(content: &str, shape: ExpectedShape) -> Result<Value, JsonExtractionError> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() || value.is_array() {
            return Ok(value);
        }
    }

    let delimiters: &[(char, char)] = match shape {
        ExpectedShape::Object => &[('{', '}')],
        ExpectedShape::Array => &[('[', ']'), ('{', '}')],
    };

    let mut last_invalid = None;
    for &(open, close) in delimiters {
        let Some(start) = trimmed.find(open) else {
            continue;
        };
        let candidate = &trimmed[start..];
        match find_matching(candidate, open, close) {
            Some(end) => match serde_json::from_str::<Value>(&candidate[..=end]) {
                Ok(value) => return Ok(value),
                Err(e) => last_invalid = Some(e.to_string()),
            },
            None => {
                let analysis = analyze_json_structure(candidate);
                if analysis.unclosed_braces > 0 || analysis.unclosed_brackets > 0 {
                    return Err(JsonExtractionError::Truncated {
                        unclosed_braces: analysis.unclosed_braces,
                        unclosed_brackets: analysis.unclosed_brackets,
                    });
                }
            }
        }
    }

    if let Some(reason) = last_invalid {
        return Err(JsonExtractionError::Invalid(reason));
    }

    Err(JsonExtractionError::NotFound {
        content_preview: preview(trimmed, 50),
    })
}

/// Returns at most `max_chars` characters of `s`, on a char boundary.
pub fn preview(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Finds the matching closing brace for a string starting with '{'.
///
/// Handles nested braces, string literals and escape sequences.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    find_matching(s, '{', '}')
}

/// Finds the matching closing bracket for a string starting with '['.
pub fn find_matching_bracket(s: &str) -> Option<usize> {
    find_matching(s, '[', ']')
}

fn find_matching(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}
