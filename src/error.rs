//! Error types for autoresearch operations.
//!
//! Defines the error taxonomy shared by the pipeline:
//! - Remote capability failures (text generation, search, dataset lookup)
//! - Stage failures caught at the per-stage boundary
//! - Pipeline failures (iteration failures and fatal setup errors)

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("LLM response contained no content")]
    EmptyResponse,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the search, dataset repository and dataset fetch capabilities.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("{capability} request failed: {message}")]
    RequestFailed {
        capability: &'static str,
        message: String,
    },

    #[error("{capability} returned an unexpected payload: {message}")]
    UnexpectedPayload {
        capability: &'static str,
        message: String,
    },

    #[error("Unsupported dataset format: {0}")]
    UnsupportedFormat(String),

    #[error("Dataset '{0}' contained no usable rows")]
    EmptyDataset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur inside a single stage.
///
/// Every variant is recoverable at the orchestrator's per-stage boundary,
/// where it is replaced with the stage's degraded default.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Capability '{0}' is not configured")]
    CapabilityUnavailable(&'static str),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Template rendering error: {0}")]
    Template(#[from] tera::Error),

    #[error("Chart rendering error: {0}")]
    Chart(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that escape a stage boundary.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The structured store could not be constructed. Fatal.
    #[error("Structured store error: {0}")]
    Store(#[from] crate::memory::StoreError),

    /// Configuration was rejected before the run started. Fatal.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::pipeline::ConfigError),

    /// Output directories could not be prepared. Fatal.
    #[error("Setup failed: {0}")]
    Setup(String),

    /// A stage failed and its degraded default could not be produced either.
    #[error("Stage '{stage}' failed and no degraded default could be produced: {reason}")]
    DegradedDefault { stage: String, reason: String },
}
