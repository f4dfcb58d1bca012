//! Pipeline configuration.
//!
//! All settings are passed explicitly at construction time; nothing in the
//! pipeline reads the process environment. Configuration can be built with
//! the `with_*` methods or loaded from a YAML file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::{LlmSettings, DEFAULT_MODEL};

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML for this schema.
    #[error("Invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration for the research pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root directory for memory, results and downloaded data.
    pub output_dir: PathBuf,

    // LLM settings
    /// Model identifier passed to the text-generation capability.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens per response.
    pub max_tokens: u32,

    // Stage settings
    /// Search query used for domain discovery.
    pub domain_query: String,
    /// Maximum datasets fetched per iteration.
    pub max_datasets: usize,
    /// Whether the report draft is polished by the LLM.
    pub polish_report: bool,
    /// Datasets with fewer rows than this are flagged as small samples.
    pub small_sample_threshold: u64,
    /// Tool names recognised as mainstream ML toolkits (case-insensitive).
    pub ml_toolkits: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./autoresearch_output"),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            domain_query: "emerging interdisciplinary research domains with open datasets"
                .to_string(),
            max_datasets: 3,
            polish_report: true,
            small_sample_threshold: 10,
            ml_toolkits: vec!["tensorflow".to_string(), "pytorch".to_string()],
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a YAML file. Missing keys take defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "output_dir cannot be empty".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_tokens must be greater than 0".to_string(),
            ));
        }

        if self.max_datasets == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_datasets must be greater than 0".to_string(),
            ));
        }

        if self.domain_query.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "domain_query cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Sampling settings for every LLM call.
    pub fn llm_settings(&self) -> LlmSettings {
        LlmSettings {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Directory of the structured store.
    pub fn memory_dir(&self) -> PathBuf {
        self.output_dir.join("memory_store")
    }

    /// Directory of run results.
    pub fn results_dir(&self) -> PathBuf {
        self.output_dir.join("results")
    }

    /// Directory of experiment artifacts (charts, design JSON).
    pub fn experiments_dir(&self) -> PathBuf {
        self.results_dir().join("experiments")
    }

    /// Directory of the generated paper.
    pub fn paper_dir(&self) -> PathBuf {
        self.results_dir().join("final_paper")
    }

    /// Directory of downloaded and cleaned datasets.
    pub fn data_dir(&self) -> PathBuf {
        self.output_dir.join("data")
    }

    /// Path of the persisted run summary.
    pub fn run_summary_path(&self) -> PathBuf {
        self.results_dir().join("run_summary.json")
    }

    /// Builder method to set the output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Builder method to set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Builder method to set temperature.
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    /// Builder method to set the maximum response tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Builder method to set the domain search query.
    pub fn with_domain_query(mut self, query: impl Into<String>) -> Self {
        self.domain_query = query.into();
        self
    }

    /// Builder method to set the dataset limit.
    pub fn with_max_datasets(mut self, max: usize) -> Self {
        self.max_datasets = max;
        self
    }

    /// Builder method to enable or disable report polishing.
    pub fn with_polish_report(mut self, enabled: bool) -> Self {
        self.polish_report = enabled;
        self
    }

    /// Builder method to set the small-sample threshold.
    pub fn with_small_sample_threshold(mut self, rows: u64) -> Self {
        self.small_sample_threshold = rows;
        self
    }

    /// Builder method to set the recognised ML toolkits.
    pub fn with_ml_toolkits(mut self, toolkits: Vec<String>) -> Self {
        self.ml_toolkits = toolkits;
        self
    }
}
