//! Pipeline stages.
//!
//! Every stage implements [`Stage`]: it reads its inputs from the structured
//! store (through [`StageContext`], which normalizes them), produces one JSON
//! record, and knows how to build a degraded default when it fails. Stages
//! never call each other; the orchestrator writes each output to the store
//! before the next stage runs.
//!
//! Standard order:
//! 1. [`DomainDiscoveryStage`]
//! 2. [`QuestionGenerationStage`]
//! 3. [`DatasetDiscoveryStage`]
//! 4. [`ExperimentDesignStage`]
//! 5. [`CritiqueStage`]
//! 6. [`ReportSynthesisStage`]

pub mod chart;
pub mod critique;
pub mod datasets;
pub mod domain;
pub mod experiment;
pub mod questions;
pub mod report;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capabilities::Capabilities;
use crate::error::StageError;
use crate::memory::StructuredStore;
use crate::normalize;
use crate::pipeline::PipelineConfig;
use crate::records::{CritiqueRecord, DataInfo, DomainRecord, ExperimentRecord, QuestionRecord};

pub use critique::CritiqueStage;
pub use datasets::DatasetDiscoveryStage;
pub use domain::DomainDiscoveryStage;
pub use experiment::ExperimentDesignStage;
pub use questions::QuestionGenerationStage;
pub use report::ReportSynthesisStage;

/// Identifies a stage and the keys its output is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    DomainDiscovery,
    QuestionGeneration,
    DatasetDiscovery,
    ExperimentDesign,
    Critique,
    ReportSynthesis,
}

impl StageKind {
    /// All stages in execution order.
    pub fn all() -> [StageKind; 6] {
        [
            StageKind::DomainDiscovery,
            StageKind::QuestionGeneration,
            StageKind::DatasetDiscovery,
            StageKind::ExperimentDesign,
            StageKind::Critique,
            StageKind::ReportSynthesis,
        ]
    }

    /// Key of this stage's output in the structured store.
    pub fn store_key(&self) -> &'static str {
        match self {
            StageKind::DomainDiscovery => "domain",
            StageKind::QuestionGeneration => "questions",
            StageKind::DatasetDiscovery => "data",
            StageKind::ExperimentDesign => "experiment",
            StageKind::Critique => "critique",
            StageKind::ReportSynthesis => "paper",
        }
    }

    /// Key of this stage's output in an iteration record.
    pub fn summary_key(&self) -> &'static str {
        match self {
            StageKind::DomainDiscovery => "domain",
            StageKind::QuestionGeneration => "questions",
            StageKind::DatasetDiscovery => "data_info",
            StageKind::ExperimentDesign => "experiment_results",
            StageKind::Critique => "critique",
            StageKind::ReportSynthesis => "paper",
        }
    }

    /// Returns the display name for this stage.
    pub fn display_name(&self) -> &'static str {
        match self {
            StageKind::DomainDiscovery => "Domain Discovery",
            StageKind::QuestionGeneration => "Question Generation",
            StageKind::DatasetDiscovery => "Dataset Discovery",
            StageKind::ExperimentDesign => "Experiment Design",
            StageKind::Critique => "Critique",
            StageKind::ReportSynthesis => "Report Synthesis",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// How a stage's stored output was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Normal output.
    Ok,
    /// The stage ran but had to fall back for part of its output.
    Degraded,
    /// The stage failed; its degraded default was stored instead.
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Ok => "ok",
            StageStatus::Degraded => "degraded",
            StageStatus::Failed => "failed",
        }
    }
}

/// The record a stage produced, with its status tag.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub value: Value,
    pub status: StageStatus,
}

impl StageOutput {
    pub fn ok(value: Value) -> Self {
        Self {
            value,
            status: StageStatus::Ok,
        }
    }

    pub fn degraded(value: Value) -> Self {
        Self {
            value,
            status: StageStatus::Degraded,
        }
    }
}

static NULL: Value = Value::Null;

/// Read-only view of the store handed to a stage.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub iteration: usize,
    pub store: &'a StructuredStore,
}

impl<'a> StageContext<'a> {
    pub fn new(iteration: usize, store: &'a StructuredStore) -> Self {
        Self { iteration, store }
    }

    /// Raw stored output of `kind`, or null.
    pub fn raw(&self, kind: StageKind) -> &'a Value {
        self.store.get(kind.store_key()).unwrap_or(&NULL)
    }

    pub fn domain(&self) -> DomainRecord {
        normalize::domain(self.raw(StageKind::DomainDiscovery))
    }

    pub fn questions(&self) -> Vec<QuestionRecord> {
        normalize::questions(self.raw(StageKind::QuestionGeneration))
    }

    pub fn data_info(&self) -> DataInfo {
        normalize::data_info(self.raw(StageKind::DatasetDiscovery))
    }

    pub fn experiment(&self) -> ExperimentRecord {
        normalize::experiment(self.raw(StageKind::ExperimentDesign))
    }

    pub fn critique(&self) -> CritiqueRecord {
        normalize::critique(self.raw(StageKind::Critique))
    }
}

/// One pipeline step.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Runs the stage against the current store contents.
    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError>;

    /// Builds the schema-valid placeholder stored when `execute` fails.
    ///
    /// An error here means no default could be produced and fails the
    /// whole iteration.
    fn degraded(&self, error: &StageError) -> Result<Value, StageError>;
}

/// Builds the six standard stages in execution order.
pub fn standard_stages(config: Arc<PipelineConfig>, caps: &Capabilities) -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(DomainDiscoveryStage::new(
            config.clone(),
            caps.llm.clone(),
            caps.search.clone(),
        )),
        Arc::new(QuestionGenerationStage::new(config.clone(), caps.llm.clone())),
        Arc::new(DatasetDiscoveryStage::new(
            config.clone(),
            caps.repositories.clone(),
            caps.fetcher.clone(),
        )),
        Arc::new(ExperimentDesignStage::new(config.clone(), caps.llm.clone())),
        Arc::new(CritiqueStage::new(config.clone(), caps.llm.clone())),
        Arc::new(ReportSynthesisStage::new(config, caps.llm.clone())),
    ]
}

/// Serializes a record for the store.
pub(crate) fn to_value<T: Serialize>(record: &T) -> Result<Value, StageError> {
    Ok(serde_json::to_value(record)?)
}
