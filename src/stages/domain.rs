//! Domain discovery: pick one promising research domain from web search context.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{to_value, Stage, StageContext, StageKind, StageOutput};
use crate::capabilities::WebSearch;
use crate::error::StageError;
use crate::llm::{invoke, LlmProvider};
use crate::normalize;
use crate::pipeline::PipelineConfig;
use crate::records::DomainRecord;
use crate::utils::{parse_structured, ExpectedShape};

/// Prompt for choosing a domain from search results.
const DOMAIN_PROMPT: &str = r#"You are an autonomous scientific domain scout.

Given these recent search results:
{search_results}

Step 1: Analyze all fields: scientific, technological, social, environmental and interdisciplinary.
Step 2: Identify 5 new or emerging domains that became relevant recently.
Step 3: Pick ONE domain that seems most promising for research based on novelty, potential impact and available data.

Return ONLY a valid JSON object with fields:
{
  "domain_name": "string",
  "description": "string",
  "sources": ["list of URLs"],
  "confidence_score": 0.0
}
confidence_score is a float between 0 and 1."#;

/// Placeholder used when search is unavailable or fails.
const NO_SEARCH_CONTEXT: &str = "(no search results available)";

/// Discovers the research domain for an iteration.
pub struct DomainDiscoveryStage {
    config: Arc<PipelineConfig>,
    llm: Option<Arc<dyn LlmProvider>>,
    search: Option<Arc<dyn WebSearch>>,
}

impl DomainDiscoveryStage {
    pub fn new(
        config: Arc<PipelineConfig>,
        llm: Option<Arc<dyn LlmProvider>>,
        search: Option<Arc<dyn WebSearch>>,
    ) -> Self {
        Self {
            config,
            llm,
            search,
        }
    }

    async fn search_context(&self) -> String {
        let Some(search) = &self.search else {
            return NO_SEARCH_CONTEXT.to_string();
        };
        match search.run(&self.config.domain_query).await {
            Ok(results) if !results.trim().is_empty() => results,
            Ok(_) => NO_SEARCH_CONTEXT.to_string(),
            Err(e) => {
                tracing::warn!(
                    search = search.name(),
                    error = %e,
                    "Domain search failed; continuing without context"
                );
                NO_SEARCH_CONTEXT.to_string()
            }
        }
    }
}

#[async_trait]
impl Stage for DomainDiscoveryStage {
    fn kind(&self) -> StageKind {
        StageKind::DomainDiscovery
    }

    async fn execute(&self, _ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let llm = self
            .llm
            .as_deref()
            .ok_or(StageError::CapabilityUnavailable("text generation"))?;

        let context = self.search_context().await;
        let prompt = DOMAIN_PROMPT.replace("{search_results}", &context);
        let content = invoke(llm, &prompt, &self.config.llm_settings()).await?;

        let parsed = parse_structured(&content, ExpectedShape::Array)
            .map_err(|e| StageError::MalformedResponse(e.to_string()))?;
        let record = match &parsed {
            Value::Array(items) => normalize::best_domain(items).ok_or_else(|| {
                StageError::MalformedResponse("domain list contained no objects".to_string())
            })?,
            other => normalize::domain(other),
        };

        if record.is_unknown() {
            return Err(StageError::MalformedResponse(
                "response did not name a domain".to_string(),
            ));
        }

        tracing::info!(domain = %record.name, confidence = record.confidence, "Domain identified");
        Ok(StageOutput::ok(to_value(&record)?))
    }

    fn degraded(&self, _error: &StageError) -> Result<Value, StageError> {
        to_value(&DomainRecord::unknown())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapabilityError;
    use crate::llm::testing::ScriptedLlm;
    use crate::memory::StructuredStore;
    use tempfile::TempDir;

    struct FixedSearch(Result<String, ()>);

    #[async_trait]
    impl WebSearch for FixedSearch {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn run(&self, _query: &str) -> Result<String, CapabilityError> {
            self.0.clone().map_err(|_| CapabilityError::RequestFailed {
                capability: "fixed",
                message: "offline".to_string(),
            })
        }
    }

    fn stage(llm: Arc<ScriptedLlm>, search: Option<FixedSearch>) -> DomainDiscoveryStage {
        DomainDiscoveryStage::new(
            Arc::new(PipelineConfig::default()),
            Some(llm),
            search.map(|s| Arc::new(s) as Arc<dyn WebSearch>),
        )
    }

    #[tokio::test]
    async fn test_domain_from_llm_with_search_context() {
        let dir = TempDir::new().expect("tempdir");
        let store = StructuredStore::open(dir.path()).expect("open");
        let llm = Arc::new(ScriptedLlm::always(
            r#"{"domain_name": "Microplastic Ecotoxicology", "description": "Effects of microplastics", "sources": ["https://a"], "confidence_score": 0.82}"#,
        ));
        let stage = stage(llm.clone(), Some(FixedSearch(Ok("Title: microplastics".to_string()))));

        let output = stage.execute(&StageContext::new(1, &store)).await.expect("execute");
        let record = normalize::domain(&output.value);
        assert_eq!(record.name, "Microplastic Ecotoxicology");
        assert!((record.confidence - 0.82).abs() < 1e-9);
        assert!(llm.prompts()[0].contains("Title: microplastics"));
    }

    #[tokio::test]
    async fn test_search_failure_continues_with_empty_context() {
        let dir = TempDir::new().expect("tempdir");
        let store = StructuredStore::open(dir.path()).expect("open");
        let llm = Arc::new(ScriptedLlm::always(r#"{"domain_name": "Agrivoltaics"}"#));
        let stage = stage(llm.clone(), Some(FixedSearch(Err(()))));

        let output = stage.execute(&StageContext::new(1, &store)).await.expect("execute");
        assert_eq!(output.value["name"], "Agrivoltaics");
        assert!(llm.prompts()[0].contains(NO_SEARCH_CONTEXT));
    }

    #[tokio::test]
    async fn test_list_response_picks_highest_confidence() {
        let dir = TempDir::new().expect("tempdir");
        let store = StructuredStore::open(dir.path()).expect("open");
        let llm = Arc::new(ScriptedLlm::always(
            r#"Candidates: [{"domain_name": "A", "confidence_score": 0.3}, {"domain_name": "B", "confidence_score": 0.7}]"#,
        ));
        let output = stage(llm, None)
            .execute(&StageContext::new(1, &store))
            .await
            .expect("execute");
        assert_eq!(output.value["name"], "B");
    }

    #[tokio::test]
    async fn test_unparseable_response_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let store = StructuredStore::open(dir.path()).expect("open");
        let llm = Arc::new(ScriptedLlm::always("I could not decide."));
        let result = stage(llm, None).execute(&StageContext::new(1, &store)).await;
        assert!(matches!(result, Err(StageError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn test_missing_llm_and_degraded_default() {
        let dir = TempDir::new().expect("tempdir");
        let store = StructuredStore::open(dir.path()).expect("open");
        let stage = DomainDiscoveryStage::new(Arc::new(PipelineConfig::default()), None, None);

        let err = stage
            .execute(&StageContext::new(1, &store))
            .await
            .expect_err("no llm");
        assert!(matches!(err, StageError::CapabilityUnavailable(_)));

        let fallback = stage.degraded(&err).expect("default");
        assert!(normalize::domain(&fallback).is_unknown());
    }
}
