//! Question generation: 3 to 5 research questions for the chosen domain.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{to_value, Stage, StageContext, StageKind, StageOutput};
use crate::error::StageError;
use crate::llm::{invoke, LlmProvider};
use crate::normalize;
use crate::pipeline::PipelineConfig;
use crate::records::QuestionRecord;
use crate::utils::{parse_structured, ExpectedShape};

const QUESTIONS_PROMPT: &str = r#"You are a senior research scientist tasked with proposing new, innovative questions in the domain of "{domain_name}".

Domain context:
{domain_description}

Requirements:
- Generate 3 to 5 highly specific and novel research questions.
- Include the reasoning behind why each question matters.
- Include a brief potential impact if answered.

Return a strict JSON array:
[
  {
    "question": "...",
    "reasoning": "...",
    "potential_impact": "..."
  }
]"#;

/// Generates research questions for the stored domain.
pub struct QuestionGenerationStage {
    config: Arc<PipelineConfig>,
    llm: Option<Arc<dyn LlmProvider>>,
}

impl QuestionGenerationStage {
    pub fn new(config: Arc<PipelineConfig>, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { config, llm }
    }
}

#[async_trait]
impl Stage for QuestionGenerationStage {
    fn kind(&self) -> StageKind {
        StageKind::QuestionGeneration
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let llm = self
            .llm
            .as_deref()
            .ok_or(StageError::CapabilityUnavailable("text generation"))?;

        let domain = ctx.domain();
        let description = if domain.description.trim().is_empty() {
            "No description available."
        } else {
            domain.description.as_str()
        };
        let prompt = QUESTIONS_PROMPT
            .replace("{domain_name}", &domain.name)
            .replace("{domain_description}", description);

        let content = invoke(llm, &prompt, &self.config.llm_settings()).await?;

        match parse_structured(&content, ExpectedShape::Array) {
            Ok(parsed) => {
                let questions: Vec<QuestionRecord> = normalize::questions(&parsed)
                    .into_iter()
                    .filter(|q| q.is_error() || !q.question.trim().is_empty())
                    .collect();
                tracing::info!(
                    count = questions.len(),
                    domain = %domain.name,
                    "Generated research questions"
                );
                Ok(StageOutput::ok(to_value(&questions)?))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Question output was not valid JSON");
                let questions = vec![QuestionRecord::parse_error(content)];
                Ok(StageOutput::degraded(to_value(&questions)?))
            }
        }
    }

    fn degraded(&self, _error: &StageError) -> Result<Value, StageError> {
        Ok(Value::Array(Vec::new()))
    }
}
