//! Dataset discovery: find, download and clean datasets for the domain.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{to_value, Stage, StageContext, StageKind, StageOutput};
use crate::capabilities::{is_dataset_file, DatasetFetcher, DatasetRepository};
use crate::error::StageError;
use crate::pipeline::PipelineConfig;
use crate::records::DataInfo;

/// Summary stored when the stage itself fails.
pub const FAILED_SUMMARY: &str = "DataFinder failed.";

/// Searches every repository and fetches up to `max_datasets` files.
pub struct DatasetDiscoveryStage {
    config: Arc<PipelineConfig>,
    repositories: Vec<Arc<dyn DatasetRepository>>,
    fetcher: Arc<dyn DatasetFetcher>,
}

impl DatasetDiscoveryStage {
    pub fn new(
        config: Arc<PipelineConfig>,
        repositories: Vec<Arc<dyn DatasetRepository>>,
        fetcher: Arc<dyn DatasetFetcher>,
    ) -> Self {
        Self {
            config,
            repositories,
            fetcher,
        }
    }

    /// Collects candidate URLs from all repositories: dataset files only,
    /// de-duplicated in first-seen order, at most twice the dataset limit.
    async fn candidate_urls(&self, domain: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut urls = Vec::new();
        for repository in &self.repositories {
            match repository.search(domain).await {
                Ok(found) => {
                    tracing::debug!(
                        repository = repository.name(),
                        found = found.len(),
                        "Repository searched"
                    );
                    for url in found {
                        if is_dataset_file(&url) && seen.insert(url.clone()) {
                            urls.push(url);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        repository = repository.name(),
                        error = %e,
                        "Repository search failed; skipping"
                    );
                }
            }
        }
        urls.truncate(self.config.max_datasets * 2);
        urls
    }
}

#[async_trait]
impl Stage for DatasetDiscoveryStage {
    fn kind(&self) -> StageKind {
        StageKind::DatasetDiscovery
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let domain = ctx.domain().name;
        tracing::info!(domain = %domain, "Searching for datasets");

        let candidates = self.candidate_urls(&domain).await;
        tracing::info!(candidates = candidates.len(), "Candidate dataset URLs collected");

        let data_dir = self.config.data_dir();
        let mut metadata = Vec::new();
        for url in &candidates {
            if metadata.len() >= self.config.max_datasets {
                break;
            }
            match self.fetcher.fetch(url, &data_dir).await {
                Ok(record) => {
                    tracing::info!(
                        url = %url,
                        rows = record.rows,
                        columns = record.columns,
                        "Dataset processed"
                    );
                    metadata.push(record);
                }
                Err(e) => tracing::warn!(url = %url, error = %e, "Failed to process dataset"),
            }
        }

        let info = DataInfo {
            status: if metadata.is_empty() {
                "no_data_found".to_string()
            } else {
                "success".to_string()
            },
            summary: format!("Found {} valid datasets for '{}'", metadata.len(), domain),
            domain,
            metadata,
        };
        Ok(StageOutput::ok(to_value(&info)?))
    }

    fn degraded(&self, _error: &StageError) -> Result<Value, StageError> {
        to_value(&DataInfo::from_summary(FAILED_SUMMARY))
    }
}
