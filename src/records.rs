//! Canonical typed records exchanged between stages.
//!
//! Each stage writes exactly one of these (serialized to JSON) into the
//! structured store per iteration. Stages never consume raw store values;
//! they go through [`crate::normalize`] first, which always yields one of
//! the types below.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name used when no usable domain could be determined.
pub const UNKNOWN_DOMAIN: &str = "Unknown Domain";

/// The research domain chosen for an iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub sources: Vec<String>,
    /// Confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f64,
}

impl DomainRecord {
    /// Creates a record with no sources and zero confidence.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            sources: Vec::new(),
            confidence: 0.0,
        }
    }

    /// The placeholder domain used when discovery fails.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_DOMAIN, "")
    }

    /// Whether this is the placeholder domain.
    pub fn is_unknown(&self) -> bool {
        self.name.trim().is_empty() || self.name == UNKNOWN_DOMAIN
    }
}

/// One generated research question.
///
/// A question list degenerates to a single error record when the model's
/// output could not be parsed; `error` and `raw_output` are set only then.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub potential_impact: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

impl QuestionRecord {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    /// The error record substituted for an unparseable question list.
    pub fn parse_error(raw_output: impl Into<String>) -> Self {
        Self {
            error: Some("JSON parsing failed".to_string()),
            raw_output: Some(raw_output.into()),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Metadata for one downloaded and cleaned dataset file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub source_url: String,
    pub file_path: String,
    pub rows: u64,
    pub columns: u64,
    #[serde(default)]
    pub column_names: Vec<String>,
    #[serde(default)]
    pub size_mb: f64,
}

/// Output of dataset discovery: the dataset set plus a summary line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataInfo {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub summary: String,
    /// The dataset set; between 0 and `max_datasets` entries.
    #[serde(default)]
    pub metadata: Vec<DatasetRecord>,
}

impl DataInfo {
    /// Wraps free text that could not be parsed as dataset information.
    pub fn from_summary(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Self::default()
        }
    }
}

/// Per-dataset analysis produced by the experiment design stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub dataset_name: String,
    #[serde(default)]
    pub file_path: String,
    /// Sample count (rows for tabular data).
    #[serde(default)]
    pub rows: u64,
    #[serde(default)]
    pub columns: u64,
    #[serde(default)]
    pub column_names: Vec<String>,
}

/// A hypothesis in an experiment proposal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub predicted_outcome: String,
}

/// A named method, metric or tool in an experiment proposal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl ProposalItem {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Supported chart types. Anything unrecognised renders as a bar chart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    #[default]
    Bar,
    Line,
    Scatter,
    Pie,
}

impl ChartType {
    /// Parses loose chart names such as `bar_chart`, `Line`, `scatter_plot`.
    pub fn parse(name: &str) -> Self {
        let lowered = name.trim().to_lowercase();
        let stem = lowered
            .trim_end_matches("_chart")
            .trim_end_matches("_plot")
            .trim_end_matches(" chart")
            .trim_end_matches(" plot");
        match stem {
            "line" => ChartType::Line,
            "scatter" => ChartType::Scatter,
            "pie" => ChartType::Pie,
            _ => ChartType::Bar,
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartType::Bar => write!(f, "bar"),
            ChartType::Line => write!(f, "line"),
            ChartType::Scatter => write!(f, "scatter"),
            ChartType::Pie => write!(f, "pie"),
        }
    }
}

/// Labels/values specification for one chart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualizationSpec {
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub labels: Vec<String>,
    /// Metric name to one value per label.
    pub values: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub description: String,
}

impl VisualizationSpec {
    /// A spec is usable when it has labels and at least one non-empty series.
    pub fn is_usable(&self) -> bool {
        !self.labels.is_empty() && self.values.values().any(|series| !series.is_empty())
    }
}

/// The experiment plan proposed for an iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentProposal {
    #[serde(default)]
    pub hypotheses: Vec<Hypothesis>,
    #[serde(default)]
    pub methods: Vec<ProposalItem>,
    #[serde(default)]
    pub metrics: Vec<ProposalItem>,
    #[serde(default)]
    pub tools: Vec<ProposalItem>,
    #[serde(default)]
    pub expected_outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization_spec: Option<VisualizationSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Output of the experiment design stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    #[serde(default)]
    pub dataset_analysis: Vec<DatasetSummary>,
    #[serde(default)]
    pub experiment_proposal: ExperimentProposal,
    /// Path of the chart artifact. Always set (and existing) when produced by
    /// the experiment design stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Structured review of an experiment.
///
/// The shape is identical whichever strategy produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueRecord {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub risks: Vec<String>,
    pub recommended_fixes: Vec<String>,
    /// Score in `[0, 1]`, higher is better.
    pub critique_score: f64,
    pub iterate: bool,
    pub suggested_next_steps: Vec<String>,
    pub notes: String,
}

impl Default for CritiqueRecord {
    fn default() -> Self {
        Self {
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            risks: Vec::new(),
            recommended_fixes: Vec::new(),
            critique_score: 0.0,
            iterate: true,
            suggested_next_steps: Vec::new(),
            notes: String::new(),
        }
    }
}

impl CritiqueRecord {
    /// Wraps free text that could not be parsed as a critique.
    pub fn from_notes(notes: impl Into<String>) -> Self {
        Self {
            notes: notes.into(),
            ..Self::default()
        }
    }
}

/// Output of the report synthesis stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PaperRecord {
    Success {
        markdown_path: String,
        html_path: String,
    },
    Error {
        error: String,
    },
}
