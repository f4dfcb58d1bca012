//! External capabilities consumed by the pipeline.
//!
//! Each capability is a narrow async trait so stages can be tested with
//! in-process fakes and deployments can swap providers:
//! - [`LlmProvider`]: remote text generation (see [`crate::llm`])
//! - [`WebSearch`]: free-text web search
//! - [`DatasetRepository`]: dataset URL lookup by domain
//! - [`DatasetFetcher`]: download and basic cleaning of one dataset file
//!
//! Every capability is optional except the fetcher; stages degrade when one
//! is missing.

pub mod datasets;
pub mod search;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::CapabilityError;
use crate::llm::LlmProvider;
use crate::records::DatasetRecord;

pub use datasets::{
    is_dataset_file, DataGovRepository, HttpDatasetFetcher, ZenodoRepository,
};
pub use search::TavilySearch;

/// Free-text web search.
#[async_trait]
pub trait WebSearch: Send + Sync {
    fn name(&self) -> &str;

    /// Runs `query` and returns the results flattened to prompt-ready text.
    async fn run(&self, query: &str) -> Result<String, CapabilityError>;
}

/// Dataset lookup by domain name.
#[async_trait]
pub trait DatasetRepository: Send + Sync {
    fn name(&self) -> &str;

    /// Returns candidate dataset file URLs for `domain`.
    async fn search(&self, domain: &str) -> Result<Vec<String>, CapabilityError>;
}

/// Download and cleaning of one dataset file.
#[async_trait]
pub trait DatasetFetcher: Send + Sync {
    /// Fetches `url`, writes a cleaned copy under `dest_dir` and describes it.
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<DatasetRecord, CapabilityError>;
}

/// The capability set injected into the standard stages.
#[derive(Clone)]
pub struct Capabilities {
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub search: Option<Arc<dyn WebSearch>>,
    pub repositories: Vec<Arc<dyn DatasetRepository>>,
    pub fetcher: Arc<dyn DatasetFetcher>,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("llm", &self.llm.is_some())
            .field("search", &self.search.as_ref().map(|s| s.name().to_string()))
            .field(
                "repositories",
                &self.repositories.iter().map(|r| r.name().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::offline()
    }
}

impl Capabilities {
    /// No remote capabilities: every stage runs its local fallback.
    pub fn offline() -> Self {
        Self {
            llm: None,
            search: None,
            repositories: Vec::new(),
            fetcher: Arc::new(HttpDatasetFetcher::default()),
        }
    }

    /// Public repositories (data.gov and Zenodo) plus the given LLM and
    /// optional Tavily search key.
    pub fn online(llm: Option<Arc<dyn LlmProvider>>, tavily_api_key: Option<String>) -> Self {
        Self {
            llm,
            search: tavily_api_key
                .map(|key| Arc::new(TavilySearch::new(key)) as Arc<dyn WebSearch>),
            repositories: vec![
                Arc::new(DataGovRepository::default()),
                Arc::new(ZenodoRepository::default()),
            ],
            fetcher: Arc::new(HttpDatasetFetcher::default()),
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_search(mut self, search: Arc<dyn WebSearch>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_repository(mut self, repository: Arc<dyn DatasetRepository>) -> Self {
        self.repositories.push(repository);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn DatasetFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }
}

/// Builds an HTTP client with a request timeout.
pub(crate) fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("autoresearch/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            Client::new()
        })
}

/// Maps a non-success HTTP response to a capability error.
pub(crate) async fn check_status(
    capability: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, CapabilityError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(CapabilityError::RequestFailed {
        capability,
        message: format!("API returned status {}: {}", status, crate::utils::preview(&body, 200)),
    })
}
