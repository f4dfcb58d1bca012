//! Run summary: the persisted record of one research cycle.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::stages::StageStatus;

/// Outcome of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationStatus {
    Success,
    Failed,
}

impl fmt::Display for IterationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterationStatus::Success => write!(f, "success"),
            IterationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Overall outcome of a cycle.
///
/// A cycle that reached the end is `Success` even when iterations failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
}

/// One iteration's status and every stage output, keyed by summary key
/// (`domain`, `questions`, `data_info`, `experiment_results`, `critique`,
/// `paper`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub status: IterationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stage_status: BTreeMap<String, StageStatus>,
    #[serde(flatten)]
    pub outputs: Map<String, Value>,
}

impl IterationRecord {
    pub fn success(
        iteration: usize,
        outputs: Map<String,
        Value>,
        stage_status: BTreeMap<String,
        StageStatus>,
    ) -> Self {
        Self {
            iteration,
            status: IterationStatus::Success,
            error: None,
            stage_status,
            outputs,
        }
    }

    pub fn failed(iteration: usize, error: impl Into<String>) -> Self {
        Self {
            iteration,
            status: IterationStatus::Failed,
            error: Some(error.into()),
            stage_status: BTreeMap::new(),
            outputs: Map::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == IterationStatus::Success
    }

    /// Stored output for a summary key, if the iteration produced one.
    pub fn output(&self, key: &str) -> Option<&Value> {
        self.outputs.get(key)
    }
}

/// The aggregate report of a multi-iteration cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub results: Vec<IterationRecord>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            results: Vec::new(),
        }
    }

    pub fn push(&mut self, record: IterationRecord) {
        self.results.push(record);
    }

    /// Marks the cycle as finished.
    pub fn complete(&mut self) {
        self.status = RunStatus::Success;
        self.completed_at = Some(Utc::now());
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Writes the summary as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}
