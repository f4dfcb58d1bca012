//! Critique: review the experiment design, remotely or by rule.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{to_value, Stage, StageContext, StageKind, StageOutput};
use crate::decider::{DualStrategyDecider, DualStrategyTask};
use crate::error::StageError;
use crate::llm::LlmProvider;
use crate::normalize;
use crate::pipeline::PipelineConfig;
use crate::records::{CritiqueRecord, DomainRecord, ExperimentRecord};

const CRITIQUE_PROMPT: &str = r#"You are a critical, constructive peer reviewer for computational experiments.
Given the research domain, dataset analysis and the proposed experiment plan, produce a structured critique.

Domain:
{domain}

Dataset analysis:
{dataset_analysis}

Experiment proposal:
{experiment_proposal}

Provide a JSON object with the following fields:
- strengths: list of concise strengths (max 6)
- weaknesses: list of concise weaknesses (max 6)
- risks: list of possible risks or invalid assumptions (max 6)
- recommended_fixes: array of short actionable fixes or alternative approaches
- critique_score: number between 0 and 1 (higher = better)
- iterate: boolean (should we iterate another cycle?)
- suggested_next_steps: list of 3 prioritized steps (short text)
- notes: any additional brief comments

Be concise. Output only valid JSON."#;

const NEXT_STEPS: [&str; 3] = [
    "Run EDA to compute class imbalance and per-condition sample counts.",
    "Implement a simple baseline model (e.g., logistic regression on engineered features) to get baseline metrics.",
    "If sample counts are low, apply augmentation or combine similar datasets.",
];

/// Thresholds used by the rule-based critique.
#[derive(Debug, Clone)]
pub struct HeuristicRules {
    /// Datasets with fewer rows than this are a small-sample risk.
    pub small_sample_threshold: u64,
    /// Lowercase toolkit names that count as mainstream ML tooling.
    pub ml_toolkits: Vec<String>,
}

impl HeuristicRules {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            small_sample_threshold: config.small_sample_threshold,
            ml_toolkits: config.ml_toolkits.iter().map(|t| t.to_lowercase()).collect(),
        }
    }
}

impl Default for HeuristicRules {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Rule-based critique of an experiment record.
///
/// Score: 0.5 base, `0.15 * (1 | -0.1)` for methods, `0.1 * (1 | -0.15)` for
/// metrics, `0.1 * (0 | 0.05)` for risks present/absent, clamped to `[0, 1]`
/// and rounded to 3 decimals.
pub fn heuristic_critique(
    experiment: &ExperimentRecord,
    rules: &HeuristicRules,
    reason: &str,
) -> CritiqueRecord {
    let datasets = &experiment.dataset_analysis;
    let proposal = &experiment.experiment_proposal;
    let has_methods = !proposal.methods.is_empty();
    let has_metrics = !proposal.metrics.is_empty();
    let small_sample = datasets.iter().any(|d| d.rows < rules.small_sample_threshold);
    let has_toolkit = proposal.tools.iter().any(|tool| {
        let name = tool.name.to_lowercase();
        rules.ml_toolkits.iter().any(|toolkit| name.contains(toolkit.as_str()))
    });

    let mut strengths = Vec::new();
    let mut weaknesses = Vec::new();
    let mut risks = Vec::new();
    let mut fixes = Vec::new();

    if datasets.is_empty() {
        weaknesses.push("No datasets available for analysis.".to_string());
    } else {
        strengths.push("Real datasets are available for analysis.".to_string());
        strengths.push(format!("Found {} dataset(s) with summary statistics.", datasets.len()));
    }

    if has_methods {
        strengths.push("Experiment proposal includes concrete methods.".to_string());
    } else {
        weaknesses.push("Experiment proposal lacks concrete methods.".to_string());
    }

    if has_metrics {
        strengths.push("Relevant metrics have been proposed.".to_string());
    } else {
        weaknesses.push("No clear evaluation metrics provided.".to_string());
    }

    if small_sample {
        risks.push(
            "Small sample size in at least one dataset may limit statistical power.".to_string(),
        );
    }
    if !has_metrics {
        risks.push("No quantitative evaluation may lead to ambiguous conclusions.".to_string());
    }

    if has_toolkit {
        strengths.push("Proposal references robust ML toolkits for model training.".to_string());
    } else {
        weaknesses.push("No mainstream ML toolset specified (TensorFlow/PyTorch).".to_string());
    }

    if !has_metrics {
        fixes.push(
            "Define 2-3 measurable quantitative metrics with thresholds for success.".to_string(),
        );
    }
    if small_sample {
        fixes.push(
            "Aggregate smaller datasets or use data augmentation to increase sample size.".to_string(),
        );
    }
    fixes.push("Add a control group or baseline model to quantify improvement.".to_string());

    // Missing methods or metrics subtract only 0.015 each.
    let mut score: f64 = 0.5;
    score += 0.15 * if has_methods { 1.0 } else { -0.1 };
    score += 0.1 * if has_metrics { 1.0 } else { -0.15 };
    score += 0.1 * if risks.is_empty() { 0.05 } else { 0.0 };
    let score = round3(score.clamp(0.0, 1.0));

    let iterate = !weaknesses.is_empty() || !risks.is_empty() || score < 0.8;

    CritiqueRecord {
        strengths,
        weaknesses,
        risks,
        recommended_fixes: fixes,
        critique_score: score,
        iterate,
        suggested_next_steps: NEXT_STEPS.iter().map(|s| s.to_string()).collect(),
        notes: format!(
            "Used heuristic fallback critique (text generation unavailable or failed): {reason}"
        ),
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Critique decision: model review first, rules on any failure.
pub struct CritiqueTask {
    domain: DomainRecord,
    experiment: ExperimentRecord,
    rules: HeuristicRules,
}

impl CritiqueTask {
    pub fn new(domain: DomainRecord, experiment: ExperimentRecord, rules: HeuristicRules) -> Self {
        Self {
            domain,
            experiment,
            rules,
        }
    }
}

impl DualStrategyTask for CritiqueTask {
    type Output = CritiqueRecord;

    fn name(&self) -> &'static str {
        "critique"
    }

    fn prompt(&self) -> String {
        let pretty =
            |value: Result<String, serde_json::Error>| value.unwrap_or_else(|_| "{}".to_string());
        CRITIQUE_PROMPT
            .replace("{domain}", &pretty(serde_json::to_string_pretty(&self.domain)))
            .replace(
                "{dataset_analysis}",
                &pretty(serde_json::to_string_pretty(&self.experiment.dataset_analysis)),
            )
            .replace(
                "{experiment_proposal}",
                &pretty(serde_json::to_string_pretty(&self.experiment.experiment_proposal)),
            )
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["strengths", "weaknesses", "recommended_fixes", "critique_score", "iterate"]
    }

    fn from_structured(&self, value: &Value) -> Result<Self::Output, String> {
        Ok(normalize::critique(value))
    }

    fn fallback(&self, reason: &str) -> Self::Output {
        heuristic_critique(&self.experiment, &self.rules, reason)
    }
}

/// Critiques the stored experiment.
pub struct CritiqueStage {
    config: Arc<PipelineConfig>,
    decider: DualStrategyDecider,
}

impl CritiqueStage {
    pub fn new(config: Arc<PipelineConfig>, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        let decider = DualStrategyDecider::new(llm, config.llm_settings());
        Self { config, decider }
    }
}

#[async_trait]
impl Stage for CritiqueStage {
    fn kind(&self) -> StageKind {
        StageKind::Critique
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let task = CritiqueTask::new(
            ctx.domain(),
            ctx.experiment(),
            HeuristicRules::from_config(&self.config),
        );
        let decision = self.decider.decide(&task).await;
        let record = decision.value;
        tracing::info!(
            strategy = %decision.strategy,
            score = record.critique_score,
            iterate = record.iterate,
            "Critique completed"
        );

        let value = to_value(&record)?;
        if decision.strategy.is_fallback() {
            Ok(StageOutput::degraded(value))
        } else {
            Ok(StageOutput::ok(value))
        }
    }

    fn degraded(&self, error: &StageError) -> Result<Value, StageError> {
        to_value(&CritiqueRecord {
            weaknesses: vec!["Critic agent failed unexpectedly.".to_string()],
            recommended_fixes: vec!["Inspect logs.".to_string()],
            suggested_next_steps: vec!["Check critique stage logs for errors.".to_string()],
            notes: format!("Exception: {error}"),
            ..CritiqueRecord::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlm;
    use crate::memory::StructuredStore;
    use crate::records::{DatasetSummary, ExperimentProposal, ProposalItem};
    use crate::stages::StageStatus;
    use serde_json::json;
    use tempfile::TempDir;

    fn experiment(
        datasets: &[u64],
        methods: bool,
        metrics: bool,
        tools: &[&str],
    ) -> ExperimentRecord {
        ExperimentRecord {
            dataset_analysis: datasets
                .iter()
                .map(|rows| DatasetSummary {
                    dataset_name: "d.csv".to_string(),
                    rows: *rows,
                    ..DatasetSummary::default()
                })
                .collect(),
            experiment_proposal: ExperimentProposal {
                methods: if methods {
                    vec![ProposalItem::new("Regression", "")]
                } else {
                    Vec::new()
                },
                metrics: if metrics {
                    vec![ProposalItem::new("RMSE", "")]
                } else {
                    Vec::new()
                },
                tools: tools.iter().map(|t| ProposalItem::new(*t, "")).collect(),
                ..ExperimentProposal::default()
            },
            ..ExperimentRecord::default()
        }
    }

    #[test]
    fn test_heuristic_full_marks() {
        let record = heuristic_critique(
            &experiment(&[50], true, true, &["PyTorch"]),
            &HeuristicRules::default(),
            "offline",
        );
        assert_eq!(record.critique_score, 0.755);
        assert!(record.weaknesses.is_empty());
        assert!(record.risks.is_empty());
        assert_eq!(record.strengths.len(), 5);
        // Below 0.8 so still iterates.
        assert!(record.iterate);
        assert_eq!(
            record.recommended_fixes,
            vec!["Add a control group or baseline model to quantify improvement."]
        );
        assert_eq!(record.suggested_next_steps.len(), 3);
        assert!(record.notes.contains("offline"));
    }

    #[test]
    fn test_heuristic_penalties() {
        let record = heuristic_critique(
            &experiment(&[], false, false, &[]),
            &HeuristicRules::default(),
            "x",
        );
        // 0.5 - 0.015 - 0.015 + 0
        assert_eq!(record.critique_score, 0.47);
        assert!(record.strengths.is_empty());
        assert_eq!(record.weaknesses[0], "No datasets available for analysis.");
        assert_eq!(
            record.risks,
            vec!["No quantitative evaluation may lead to ambiguous conclusions."]
        );
        assert_eq!(record.recommended_fixes.len(), 2);
        assert!(record.iterate);
    }

    #[test]
    fn test_heuristic_small_sample_risk() {
        let record = heuristic_critique(
            &experiment(&[500, 4], true, true, &["tensorflow"]),
            &HeuristicRules::default(),
            "x",
        );
        assert_eq!(record.critique_score, 0.75);
        assert_eq!(record.risks.len(), 1);
        assert!(record.recommended_fixes[0].starts_with("Aggregate smaller datasets"));
    }

    #[test]
    fn test_heuristic_score_bounds() {
        let rules = HeuristicRules::default();
        for datasets in [&[][..], &[3][..], &[100][..]] {
            for methods in [false, true] {
                for metrics in [false, true] {
                    let record = heuristic_critique(
                        &experiment(datasets, methods, metrics, &[]),
                        &rules,
                        "x",
                    );
                    assert!((0.0..=1.0).contains(&record.critique_score));
                    if !metrics {
                        assert!(record.iterate);
                    }
                    if methods && metrics && !datasets.contains(&3) {
                        assert!(record.critique_score >= 0.75);
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn test_llm_critique_missing_optional_fields_are_filled() {
        let dir = TempDir::new().expect("tempdir");
        let store = StructuredStore::open(dir.path()).expect("open");
        let llm = Arc::new(ScriptedLlm::always(
            r#"{"strengths": ["clear"], "weaknesses": [], "recommended_fixes": [{"fix": "add baseline", "alternative": "ablation"}], "critique_score": 1.4, "iterate": false}"#,
        ));
        let stage = CritiqueStage::new(Arc::new(PipelineConfig::default()), Some(llm));

        let output = stage.execute(&StageContext::new(1, &store)).await.expect("execute");
        assert_eq!(output.status, StageStatus::Ok);
        let record = normalize::critique(&output.value);
        assert_eq!(record.critique_score, 1.0);
        assert!(!record.iterate);
        assert!(record.risks.is_empty());
        assert_eq!(record.recommended_fixes, vec!["add baseline (Alternative: ablation)"]);
        for key in ["risks", "suggested_next_steps", "notes"] {
            assert!(output.value.get(key).is_some(), "missing {key}");
        }
    }

    #[tokio::test]
    async fn test_missing_required_field_uses_heuristic() {
        let dir = TempDir::new().expect("tempdir");
        let mut store = StructuredStore::open(dir.path()).expect("open");
        store.add("experiment", json!({"experiment_proposal": {"methods": ["ANOVA"]}}));
        let llm = Arc::new(ScriptedLlm::always(r#"{"strengths": ["ok"], "critique_score": 0.9}"#));
        let stage = CritiqueStage::new(Arc::new(PipelineConfig::default()), Some(llm));

        let output = stage.execute(&StageContext::new(1, &store)).await.expect("execute");
        assert_eq!(output.status, StageStatus::Degraded);
        let record = normalize::critique(&output.value);
        assert!(record.notes.starts_with("Used heuristic fallback critique"));
        assert!(
            record.strengths.contains(&"Experiment proposal includes concrete methods.".to_string())
        );
    }

    #[test]
    fn test_degraded_default() {
        let stage = CritiqueStage::new(Arc::new(PipelineConfig::default()), None);
        let value = stage
            .degraded(&StageError::MalformedResponse("boom".to_string()))
            .expect("default");
        let record = normalize::critique(&value);
        assert_eq!(record.weaknesses, vec!["Critic agent failed unexpectedly."]);
        assert_eq!(record.recommended_fixes, vec!["Inspect logs."]);
        assert_eq!(record.critique_score, 0.0);
        assert!(record.iterate);
    }
}
