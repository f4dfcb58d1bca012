//! Shared utility functions for autoresearch.
//!
//! This module provides common utilities used across multiple modules,
//! including JSON extraction from LLM responses.

pub mod json_extraction;

pub use json_extraction::{
    analyze_json_structure, find_matching_brace, find_matching_bracket, parse_structured,
    preview, ExpectedShape, JsonExtractionError, JsonStructureAnalysis,
};
