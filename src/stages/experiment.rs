//! Experiment design: dataset analysis, an experiment proposal and one chart.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::chart::{self, ChartSpecTask};
use super::{to_value, Stage, StageContext, StageKind, StageOutput};
use crate::decider::{DualStrategyDecider, DualStrategyTask};
use crate::error::StageError;
use crate::llm::LlmProvider;
use crate::normalize;
use crate::pipeline::PipelineConfig;
use crate::records::{
    DataInfo, DatasetSummary, DomainRecord, ExperimentProposal, ExperimentRecord, VisualizationSpec,
};

/// File the full experiment record is also written to.
pub const DESIGN_FILE: &str = "final_experiment_design.json";

const PROPOSAL_PROMPT: &str = r#"You are a scientific experiment designer. Based on this domain and dataset summary, propose experiments.

Domain: {domain_name}
Description: {domain_description}
Dataset Summary: {dataset_summary}

Return a JSON object with these keys:
- hypotheses: list of hypotheses (id, description, predicted_outcome)
- experiment_design: methods, metrics, tools
- expected_outcome: success criteria
- visualization_to_generate: {
    "type": "bar_chart" | "line_chart" | "pie_chart" | "scatter_plot",
    "data": {
        "labels": [...],
        "values": {
            "Metric A": [...],
            "Metric B": [...]
        }
    },
    "description": "short explanation"
}
Output pure JSON only, no markdown, no explanations."#;

/// Builds one analysis entry per dataset record.
pub fn analyze_datasets(info: &DataInfo) -> Vec<DatasetSummary> {
    info.metadata
        .iter()
        .map(|record| {
            let source = if record.file_path.is_empty() {
                record.source_url.as_str()
            } else {
                record.file_path.as_str()
            };
            let dataset_name = source
                .rsplit(['/', '\\'])
                .find(|segment| !segment.is_empty())
                .unwrap_or(source)
                .to_string();
            DatasetSummary {
                dataset_name,
                file_path: record.file_path.clone(),
                rows: record.rows,
                columns: record.columns,
                column_names: record.column_names.clone(),
            }
        })
        .collect()
}

/// Requests an experiment proposal; falls back to an empty proposal.
pub struct ProposalTask {
    domain: DomainRecord,
    dataset_summary: String,
}

impl ProposalTask {
    pub fn new(domain: DomainRecord, summaries: &[DatasetSummary]) -> Self {
        let dataset_summary =
            serde_json::to_string_pretty(summaries).unwrap_or_else(|_| "[]".to_string());
        Self {
            domain,
            dataset_summary,
        }
    }
}

impl DualStrategyTask for ProposalTask {
    type Output = ExperimentProposal;

    fn name(&self) -> &'static str {
        "experiment_proposal"
    }

    fn prompt(&self) -> String {
        let description = if self.domain.description.trim().is_empty() {
            "No description available."
        } else {
            self.domain.description.as_str()
        };
        PROPOSAL_PROMPT
            .replace("{domain_name}", &self.domain.name)
            .replace("{domain_description}", description)
            .replace("{dataset_summary}", &self.dataset_summary)
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["hypotheses"]
    }

    fn from_structured(&self, value: &Value) -> Result<Self::Output, String> {
        Ok(normalize::proposal(value))
    }

    fn fallback(&self, reason: &str) -> Self::Output {
        ExperimentProposal {
            notes: Some(format!("Experiment proposal unavailable: {reason}")),
            ..ExperimentProposal::default()
        }
    }
}

/// Designs the experiment for the stored domain and datasets.
pub struct ExperimentDesignStage {
    config: Arc<PipelineConfig>,
    decider: DualStrategyDecider,
}

impl ExperimentDesignStage {
    pub fn new(config: Arc<PipelineConfig>, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        let decider = DualStrategyDecider::new(llm, config.llm_settings());
        Self { config, decider }
    }

    /// Produces an existing chart file: the proposal's own spec, then a
    /// model-generated contextual spec, then the placeholder.
    async fn visualize(
        &self,
        proposal_spec: Option<&VisualizationSpec>,
        domain: &DomainRecord,
        dir: &Path,
    ) -> Result<PathBuf, StageError> {
        if let Some(spec) = proposal_spec.filter(|s| s.is_usable()) {
            match chart::render_chart(spec, dir) {
                Ok(path) => return Ok(path),
                Err(e) => tracing::warn!(error = %e, "Proposal chart could not be rendered"),
            }
        }

        if let Some(spec) = self.decider.decide(&ChartSpecTask::new(domain.clone())).await.value {
            match chart::render_chart(&spec, dir) {
                Ok(path) => return Ok(path),
                Err(e) => tracing::warn!(error = %e, "Contextual chart could not be rendered"),
            }
        }

        tracing::info!("No visualization generated; using placeholder chart");
        chart::write_placeholder(dir)
    }
}

#[async_trait]
impl Stage for ExperimentDesignStage {
    fn kind(&self) -> StageKind {
        StageKind::ExperimentDesign
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let domain = ctx.domain();
        let summaries = analyze_datasets(&ctx.data_info());
        tracing::info!(domain = %domain.name, datasets = summaries.len(), "Designing experiment");

        let decision = self.decider.decide(&ProposalTask::new(domain.clone(), &summaries)).await;
        let proposal = decision.value;

        let dir = self.config.experiments_dir();
        let chart_path = self
            .visualize(proposal.visualization_spec.as_ref(), &domain, &dir)
            .await?;

        let record = ExperimentRecord {
            dataset_analysis: summaries,
            experiment_proposal: proposal,
            visualization_path: Some(chart_path.display().to_string()),
            summary: None,
            error: None,
        };

        let value = to_value(&record)?;
        let design_path = dir.join(DESIGN_FILE);
        std::fs::write(&design_path, serde_json::to_string_pretty(&value)?)?;
        tracing::info!(
            path = %design_path.display(),
            strategy = %decision.strategy,
            "Experiment design saved"
        );

        if decision.strategy.is_fallback() {
            Ok(StageOutput::degraded(value))
        } else {
            Ok(StageOutput::ok(value))
        }
    }

    fn degraded(&self, error: &StageError) -> Result<Value, StageError> {
        let placeholder = chart::write_placeholder(&self.config.experiments_dir())?;
        to_value(&ExperimentRecord {
            visualization_path: Some(placeholder.display().to_string()),
            error: Some(error.to_string()),
            ..ExperimentRecord::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{Reply, ScriptedLlm};
    use crate::memory::StructuredStore;
    use crate::records::DatasetRecord;
    use crate::stages::StageStatus;
    use serde_json::json;
    use tempfile::TempDir;

    const PROPOSAL: &str = r#"{
        "hypotheses": [{"id": "H1", "description": "Noise lowers accuracy", "predicted_outcome": "drop"}],
        "experiment_design": {"methods": ["Random forest"], "metrics": ["F1"], "tools": ["PyTorch"]},
        "expected_outcome": "F1 above 0.8",
        "visualization_to_generate": {
            "type": "line_chart",
            "data": {"labels": ["a", "b"], "values": {"F1": [0.7, 0.8]}},
            "description": "F1 by condition"
        }
    }"#;

    fn setup(dir: &TempDir) -> (Arc<PipelineConfig>, StructuredStore) {
        let config = Arc::new(PipelineConfig::default().with_output_dir(dir.path()));
        let mut store = StructuredStore::open(config.memory_dir()).expect("open");
        store.add("domain", json!({"name": "Acoustic Ecology", "description": "Soundscapes"}));
        (config, store)
    }

    #[test]
    fn test_analyze_datasets_names_from_paths() {
        let info = DataInfo {
            metadata: vec![
                DatasetRecord {
                    source_url: "https://x.example/birds.csv".into(),
                    file_path: "/data/cleaned_birds.csv".into(),
                    rows: 40,
                    columns: 2,
                    ..DatasetRecord::default()
                },
                DatasetRecord {
                    source_url: "https://x.example/frogs.json".into(),
                    ..DatasetRecord::default()
                },
            ],
            ..DataInfo::default()
        };
        let summaries = analyze_datasets(&info);
        assert_eq!(summaries[0].dataset_name, "cleaned_birds.csv");
        assert_eq!(summaries[0].rows, 40);
        assert_eq!(summaries[1].dataset_name, "frogs.json");
    }

    #[tokio::test]
    async fn test_proposal_chart_is_rendered() {
        let dir = TempDir::new().expect("tempdir");
        let (config, store) = setup(&dir);
        std::fs::create_dir_all(config.experiments_dir()).expect("mkdir");
        let llm = Arc::new(ScriptedLlm::always(PROPOSAL));
        let stage = ExperimentDesignStage::new(config.clone(), Some(llm.clone()));

        let output = stage.execute(&StageContext::new(1, &store)).await.expect("execute");
        assert_eq!(output.status, StageStatus::Ok);

        let record = normalize::experiment(&output.value);
        assert_eq!(record.experiment_proposal.hypotheses[0].id, "H1");
        assert_eq!(record.experiment_proposal.tools[0].name, "PyTorch");
        let path = PathBuf::from(record.visualization_path.expect("chart path"));
        assert!(path.is_file());
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("visualization_")));
        assert!(config.experiments_dir().join(DESIGN_FILE).is_file());
        assert_eq!(llm.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_contextual_chart_when_proposal_has_none() {
        let dir = TempDir::new().expect("tempdir");
        let (config, store) = setup(&dir);
        std::fs::create_dir_all(config.experiments_dir()).expect("mkdir");
        let llm = Arc::new(ScriptedLlm::sequence(vec![
            Reply::Text(r#"{"hypotheses": ["Birdsong shifts earlier"]}"#.to_string()),
            Reply::Text(
                r#"{"labels": ["Dawn", "Dusk"], "values": {"Calls": [30, 12]}, "type": "bar_chart"}"#
                    .to_string(),
            ),
        ]));
        let stage = ExperimentDesignStage::new(config, Some(llm.clone()));

        let output = stage.execute(&StageContext::new(1, &store)).await.expect("execute");
        let record = normalize::experiment(&output.value);
        let path = record.visualization_path.expect("chart path");
        assert!(path.contains("visualization_"));
        assert!(llm.prompts()[1].contains("Acoustic Ecology"));
    }

    #[tokio::test]
    async fn test_offline_uses_fallback_and_placeholder() {
        let dir = TempDir::new().expect("tempdir");
        let (config, store) = setup(&dir);
        std::fs::create_dir_all(config.experiments_dir()).expect("mkdir");
        let stage = ExperimentDesignStage::new(config.clone(), None);

        let output = stage.execute(&StageContext::new(1, &store)).await.expect("execute");
        assert_eq!(output.status, StageStatus::Degraded);

        let record = normalize::experiment(&output.value);
        assert!(record.experiment_proposal.hypotheses.is_empty());
        assert!(record.experiment_proposal.methods.is_empty());
        assert!(record.experiment_proposal.notes.is_some());
        let path = PathBuf::from(record.visualization_path.expect("chart path"));
        assert_eq!(path, config.experiments_dir().join(chart::PLACEHOLDER_FILE));
        assert!(path.is_file());
    }

    #[test]
    fn test_degraded_default_writes_placeholder() {
        let dir = TempDir::new().expect("tempdir");
        let config = Arc::new(PipelineConfig::default().with_output_dir(dir.path()));
        let stage = ExperimentDesignStage::new(config.clone(), None);

        let value = stage
            .degraded(&StageError::MalformedResponse("bad".to_string()))
            .expect("default");
        let record = normalize::experiment(&value);
        assert!(record.dataset_analysis.is_empty());
        assert!(PathBuf::from(record.visualization_path.expect("path")).is_file());
        assert!(record.error.is_some());
    }

    #[test]
    fn test_degraded_default_fails_when_placeholder_cannot_be_written() {
        let dir = TempDir::new().expect("tempdir");
        // A file where the results directory should be.
        std::fs::write(dir.path().join("results"), "not a dir").expect("write");
        let config = Arc::new(PipelineConfig::default().with_output_dir(dir.path()));
        let stage = ExperimentDesignStage::new(config, None);
        assert!(stage
            .degraded(&StageError::MalformedResponse("bad".to_string()))
            .is_err());
    }
}
