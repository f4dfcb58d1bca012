//! Primary-then-fallback decision making.
//!
//! A [`DualStrategyTask`] describes one decision: how to prompt the model,
//! which fields a usable answer must carry, how to convert that answer, and
//! a deterministic local fallback. [`DualStrategyDecider::decide`] always
//! returns a value of the task's output type; capability failures,
//! malformed responses and missing fields all route to the fallback.
//!
//! There is no retry. A failed primary attempt goes straight to the fallback.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::error::LlmError;
use crate::llm::{invoke, LlmProvider, LlmSettings};
use crate::utils::{parse_structured, ExpectedShape, JsonExtractionError};

/// Why the primary strategy was abandoned.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("text generation capability unavailable")]
    Unavailable,

    #[error("capability call failed: {0}")]
    Capability(#[from] LlmError),

    #[error("response was not structured data: {0}")]
    Malformed(#[from] JsonExtractionError),

    #[error("response missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("response rejected: {0}")]
    Rejected(String),
}

/// One decision with a remote primary strategy and a local fallback.
pub trait DualStrategyTask: Send + Sync {
    type Output: Send;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// The prompt sent to the text-generation capability.
    fn prompt(&self) -> String;

    /// Fields that must be present (and non-null) in the parsed response.
    fn required_fields(&self) -> &'static [&'static str];

    fn expected_shape(&self) -> ExpectedShape {
        ExpectedShape::Object
    }

    /// Converts a validated response into the output type.
    fn from_structured(&self, value: &Value) -> Result<Self::Output, String>;

    /// Deterministic fallback. Must not fail.
    fn fallback(&self, reason: &str) -> Self::Output;
}

/// Which strategy produced a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Primary,
    Fallback { reason: String },
}

impl Strategy {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Strategy::Fallback { .. })
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Primary => write!(f, "primary"),
            Strategy::Fallback { .. } => write!(f, "fallback"),
        }
    }
}

/// A decided value and the strategy that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision<T> {
    pub value: T,
    pub strategy: Strategy,
}

/// Runs [`DualStrategyTask`]s against an optional text-generation capability.
#[derive(Clone)]
pub struct DualStrategyDecider {
    llm: Option<Arc<dyn LlmProvider>>,
    settings: LlmSettings,
}

impl fmt::Debug for DualStrategyDecider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualStrategyDecider")
            .field("llm", &self.llm.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

impl DualStrategyDecider {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>, settings: LlmSettings) -> Self {
        Self { llm, settings }
    }

    /// A decider that always falls back.
    pub fn offline() -> Self {
        Self::new(None, LlmSettings::default())
    }

    pub fn has_capability(&self) -> bool {
        self.llm.is_some()
    }

    /// Decides `task`, falling back on any primary failure.
    pub async fn decide<T: DualStrategyTask>(&self, task: &T) -> Decision<T::Output> {
        match self.try_primary(task).await {
            Ok(value) => {
                tracing::debug!(task = task.name(), "Primary strategy succeeded");
                Decision {
                    value,
                    strategy: Strategy::Primary,
                }
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(
                    task = task.name(),
                    reason = %reason,
                    "Falling back to heuristic strategy"
                );
                Decision {
                    value: task.fallback(&reason),
                    strategy: Strategy::Fallback { reason },
                }
            }
        }
    }

    /// Runs only the primary strategy.
    pub async fn try_primary<T: DualStrategyTask>(
        &self,
        task: &T,
    ) -> Result<T::Output, DecisionError> {
        let llm = self.llm.as_deref().ok_or(DecisionError::Unavailable)?;
        let content = invoke(llm, &task.prompt(), &self.settings).await?;
        let parsed = parse_structured(&content, task.expected_shape())?;

        let missing = missing_fields(&parsed, task.required_fields());
        if !missing.is_empty() {
            return Err(DecisionError::MissingFields(missing));
        }

        task.from_structured(&parsed).map_err(DecisionError::Rejected)
    }
}

/// Lists the required fields absent (or null) in `value`.
pub fn missing_fields(value: &Value, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|field| value.get(**field).map_or(true, Value::is_null))
        .map(|field| field.to_string())
        .collect()
}
