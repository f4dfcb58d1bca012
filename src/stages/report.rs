//! Report synthesis: compose the research paper from everything in the store.
//!
//! The paper is rendered twice from one tera context, once as markdown and
//! once as HTML. When enabled, the markdown draft is sent through the model
//! for an editing pass; the edited text is only kept if every figure
//! reference survived, otherwise the draft is written as is.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tera::{Context, Tera};
use walkdir::WalkDir;

use super::{to_value, Stage, StageContext, StageKind, StageOutput};
use crate::error::StageError;
use crate::llm::{invoke, LlmProvider};
use crate::pipeline::PipelineConfig;
use crate::records::{CritiqueRecord, Hypothesis, PaperRecord};

pub const MARKDOWN_FILE: &str = "mini_research_paper.md";
pub const HTML_FILE: &str = "mini_research_paper.html";

const FIGURE_EXTENSIONS: &[&str] = &["svg", "png", "jpg", "jpeg"];

const FUTURE_WORK: &str = "Future iterations can include additional datasets, multi-modal reasoning, and reinforcement-based refinement of hypotheses.";

const POLISH_PROMPT: &str = r#"You are a professional academic editor.
Refine the following markdown-formatted research paper for clarity and style.
Keep all image references and structure unchanged.
Output Markdown only.

{paper}"#;

const MARKDOWN_TEMPLATE: &str = r#"# {{ title }}

**Date:** {{ date }}

## Abstract
{{ abstract_text }}

## Introduction
{{ introduction }}

{% if questions %}## Research Questions
{% for q in questions %}**Q{{ loop.index }}:** {{ q }}
{% endfor %}
{% endif %}## Dataset Summary
{{ data_summary }}
{% for ds in datasets %}- **Dataset:** {{ ds.name }}
  - Rows: {{ ds.rows }}, Columns: {{ ds.columns }}
  - Source: {{ ds.source }}
{% endfor %}
## Experiment Design and Methods
{% if hypotheses %}### Hypotheses
{% for h in hypotheses %}- **{{ h.id }}:** {{ h.description }}{% if h.predicted_outcome %}
  - Predicted: {{ h.predicted_outcome }}{% endif %}
{% endfor %}
{% endif %}{% if methods %}### Methods
{% for m in methods %}- {{ m }}
{% endfor %}
{% endif %}{% if metrics %}### Metrics
{% for m in metrics %}- {{ m }}
{% endfor %}
{% endif %}{% if expected_outcome %}**Expected outcome:** {{ expected_outcome }}

{% endif %}## Results and Visualizations
{% for fig in figures %}![{{ fig.caption }}]({{ fig.path }})
*Figure: {{ fig.title }}*

{% else %}_No visualizations found._

{% endfor %}## Critique and Limitations
{% if critique %}**Critique Score:** {{ critique.critique_score }}

{% if critique.strengths %}### Strengths
{% for s in critique.strengths %}- {{ s }}
{% endfor %}
{% endif %}{% if critique.weaknesses %}### Weaknesses
{% for w in critique.weaknesses %}- {{ w }}
{% endfor %}
{% endif %}{% if critique.risks %}### Risks
{% for r in critique.risks %}- {{ r }}
{% endfor %}
{% endif %}{% if critique.recommended_fixes %}### Recommended Fixes
{% for f in critique.recommended_fixes %}- {{ f }}
{% endfor %}
{% endif %}{% else %}_No critique available._

{% endif %}## Future Work
{{ future_work }}

---
*Generated autonomously by the autoresearch pipeline.*
"#;

const HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{{ title }}</title>
</head>
<body>
<h1>{{ title }}</h1>
<p><strong>Date:</strong> {{ date }}</p>
<h2>Abstract</h2>
<p>{{ abstract_text }}</p>
<h2>Introduction</h2>
<p>{{ introduction }}</p>
{% if questions %}<h2>Research Questions</h2>
<ol>
{% for q in questions %}<li>{{ q }}</li>
{% endfor %}</ol>
{% endif %}<h2>Dataset Summary</h2>
<p>{{ data_summary }}</p>
{% if datasets %}<ul>
{% for ds in datasets %}<li><strong>{{ ds.name }}</strong>: {{ ds.rows }} rows, {{ ds.columns }} columns ({{ ds.source }})</li>
{% endfor %}</ul>
{% endif %}<h2>Experiment Design and Methods</h2>
{% if hypotheses %}<h3>Hypotheses</h3>
<ul>
{% for h in hypotheses %}<li><strong>{{ h.id }}:</strong> {{ h.description }}{% if h.predicted_outcome %} <em>Predicted: {{ h.predicted_outcome }}</em>{% endif %}</li>
{% endfor %}</ul>
{% endif %}{% if methods %}<h3>Methods</h3>
<ul>
{% for m in methods %}<li>{{ m }}</li>
{% endfor %}</ul>
{% endif %}{% if metrics %}<h3>Metrics</h3>
<ul>
{% for m in metrics %}<li>{{ m }}</li>
{% endfor %}</ul>
{% endif %}{% if expected_outcome %}<p><strong>Expected outcome:</strong> {{ expected_outcome }}</p>
{% endif %}<h2>Results and Visualizations</h2>
{% for fig in figures %}<figure>
<img src="{{ fig.path }}" alt="{{ fig.caption }}">
<figcaption>Figure: {{ fig.title }}</figcaption>
</figure>
{% else %}<p><em>No visualizations found.</em></p>
{% endfor %}<h2>Critique and Limitations</h2>
{% if critique %}<p><strong>Critique Score:</strong> {{ critique.critique_score }}</p>
{% for section in critique_sections %}<h3>{{ section.heading }}</h3>
<ul>
{% for item in section.items %}<li>{{ item }}</li>
{% endfor %}</ul>
{% endfor %}{% else %}<p><em>No critique available.</em></p>
{% endif %}<h2>Future Work</h2>
<p>{{ future_work }}</p>
<hr>
<p><em>Generated autonomously by the autoresearch pipeline.</em></p>
</body>
</html>
"#;

#[derive(Debug, Clone, Serialize)]
struct DatasetLine {
    name: String,
    rows: u64,
    columns: u64,
    source: String,
}

#[derive(Debug, Clone, Serialize)]
struct Figure {
    path: String,
    caption: String,
    title: String,
}

#[derive(Debug, Clone, Serialize)]
struct CritiqueSection {
    heading: &'static str,
    items: Vec<String>,
}

/// Everything the paper templates need.
#[derive(Debug, Clone, Serialize)]
struct PaperContext {
    title: String,
    date: String,
    abstract_text: String,
    introduction: String,
    questions: Vec<String>,
    data_summary: String,
    datasets: Vec<DatasetLine>,
    hypotheses: Vec<Hypothesis>,
    methods: Vec<String>,
    metrics: Vec<String>,
    expected_outcome: String,
    figures: Vec<Figure>,
    critique: Option<CritiqueRecord>,
    critique_sections: Vec<CritiqueSection>,
    future_work: &'static str,
}

fn file_name(path: &str) -> String {
    path.rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty())
        .unwrap_or(path)
        .to_string()
}

fn figure(path: &Path) -> Figure {
    let caption = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("figure")
        .replace('_', " ");
    let title = caption
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    Figure {
        path: path.display().to_string(),
        caption,
        title,
    }
}

/// Existing figure files: the experiment's chart first, then any image in
/// `experiments_dir`, without duplicates.
pub fn collect_figures(visualization_path: Option<&str>, experiments_dir: &Path) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = visualization_path.map(PathBuf::from).into_iter().collect();

    if experiments_dir.is_dir() {
        let images = WalkDir::new(experiments_dir)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|ext| FIGURE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            });
        candidates.extend(images);
    }

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|path| path.is_file())
        .filter(|path| seen.insert(path.canonicalize().unwrap_or_else(|_| path.clone())))
        .collect()
}

/// Drops a surrounding code fence the model sometimes adds.
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Composes the paper from the stored records.
pub struct ReportSynthesisStage {
    config: Arc<PipelineConfig>,
    llm: Option<Arc<dyn LlmProvider>>,
}

impl ReportSynthesisStage {
    pub fn new(config: Arc<PipelineConfig>, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { config, llm }
    }

    fn build_context(&self, ctx: &StageContext<'_>) -> PaperContext {
        let domain = ctx.domain();
        let data = ctx.data_info();
        let experiment = ctx.experiment();
        let critique = ctx.critique();
        let proposal = &experiment.experiment_proposal;

        let figures = collect_figures(
            experiment.visualization_path.as_deref(),
            &self.config.experiments_dir(),
        );

        let critique_available = critique != CritiqueRecord::default();
        let critique_sections = [
            ("Strengths", &critique.strengths),
            ("Weaknesses", &critique.weaknesses),
            ("Risks", &critique.risks),
            ("Recommended Fixes", &critique.recommended_fixes),
        ]
        .into_iter()
        .filter(|(_, items)| !items.is_empty())
        .map(|(heading, items)| CritiqueSection {
            heading,
            items: items.clone(),
        })
        .collect();

        let item_line = |name: &str, description: &str| {
            if description.is_empty() {
                name.to_string()
            } else {
                format!("{name}: {description}")
            }
        };

        PaperContext {
            title: format!("Autonomous Research on {}", domain.name),
            date: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            abstract_text: format!(
                "This paper explores the emerging field of {}, investigated autonomously by an iterative research pipeline. \
                 The pipeline discovers domains, generates questions, finds datasets, designs experiments and critiques its own output for refinement.",
                domain.name
            ),
            introduction: if domain.description.is_empty() {
                "No description available.".to_string()
            } else {
                domain.description.clone()
            },
            questions: ctx
                .questions()
                .into_iter()
                .filter(|q| !q.is_error() && !q.question.is_empty())
                .map(|q| q.question)
                .collect(),
            data_summary: data.summary.clone(),
            datasets: data
                .metadata
                .iter()
                .map(|d| DatasetLine {
                    name: file_name(if d.file_path.is_empty() {
                        &d.source_url
                    } else {
                        &d.file_path
                    }),
                    rows: d.rows,
                    columns: d.columns,
                    source: d.source_url.clone(),
                })
                .collect(),
            hypotheses: proposal.hypotheses.clone(),
            methods: proposal.methods.iter().map(|m| item_line(&m.name, &m.description)).collect(),
            metrics: proposal.metrics.iter().map(|m| item_line(&m.name, &m.description)).collect(),
            expected_outcome: proposal.expected_outcome.clone(),
            figures: figures.iter().map(|p| figure(p)).collect(),
            critique: critique_available.then_some(critique),
            critique_sections,
            future_work: FUTURE_WORK,
        }
    }

    /// Sends the draft for editing. Returns `None` when polishing is
    /// disabled, fails, or loses a figure reference.
    async fn polish(&self, draft: &str, figures: &[Figure]) -> Option<String> {
        if !self.config.polish_report {
            return None;
        }
        let llm = self.llm.as_deref()?;
        let prompt = POLISH_PROMPT.replace("{paper}", draft);
        match invoke(llm, &prompt, &self.config.llm_settings()).await {
            Ok(content) => {
                let polished = strip_fence(&content);
                let missing = figures.iter().filter(|f| !polished.contains(&f.path)).count();
                if missing > 0 {
                    tracing::warn!(
                        missing,
                        "Polished paper dropped figure references; keeping draft"
                    );
                    None
                } else {
                    Some(format!("{polished}\n"))
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Paper polishing failed; keeping draft");
                None
            }
        }
    }
}

#[async_trait]
impl Stage for ReportSynthesisStage {
    fn kind(&self) -> StageKind {
        StageKind::ReportSynthesis
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> Result<StageOutput, StageError> {
        let paper = self.build_context(ctx);
        tracing::info!(figures = paper.figures.len(), "Composing research paper");

        let context = Context::from_serialize(&paper)?;
        let draft = Tera::one_off(MARKDOWN_TEMPLATE, &context, false)?;
        let html = Tera::one_off(HTML_TEMPLATE, &context, true)?;
        let markdown = self.polish(&draft, &paper.figures).await.unwrap_or(draft);

        let dir = self.config.paper_dir();
        std::fs::create_dir_all(&dir)?;
        let markdown_path = dir.join(MARKDOWN_FILE);
        let html_path = dir.join(HTML_FILE);
        std::fs::write(&markdown_path, markdown)?;
        std::fs::write(&html_path, html)?;
        tracing::info!(
            markdown = %markdown_path.display(),
            html = %html_path.display(),
            "Research paper saved"
        );

        Ok(StageOutput::ok(to_value(&PaperRecord::Success {
            markdown_path: markdown_path.display().to_string(),
            html_path: html_path.display().to_string(),
        })?))
    }

    fn degraded(&self, error: &StageError) -> Result<Value, StageError> {
        to_value(&PaperRecord::Error {
            error: error.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlm;
    use crate::memory::StructuredStore;
    use crate::stages::chart;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup(dir: &TempDir, polish: bool) -> (Arc<PipelineConfig>, StructuredStore) {
        let config = Arc::new(
            PipelineConfig::default()
                .with_output_dir(dir.path())
                .with_polish_report(polish),
        );
        let store = StructuredStore::open(config.memory_dir()).expect("open");
        (config, store)
    }

    fn populate(store: &mut StructuredStore, chart_path: &Path) {
        store.add(
            "domain",
            json!({"name": "Urban Heat Islands", "description": "City temperature anomalies"}),
        );
        store.add(
            "questions",
            json!([{"question": "Do green roofs cool streets?"}, {"error": "JSON parsing failed", "raw_output": "x"}]),
        );
        store.add("data", json!("Found nothing useful"));
        store.add(
            "experiment",
            json!({
                "experiment_proposal": {"hypotheses": ["Roofs reduce heat"], "methods": [{"name": "Regression", "description": "OLS"}]},
                "visualization_path": chart_path.display().to_string()
            }),
        );
        store.add(
            "critique",
            json!({"strengths": ["clear"], "critique_score": 0.6, "recommended_fixes": [{"fix": "more sites"}]}),
        );
    }

    #[tokio::test]
    async fn test_paper_written_from_store() {
        let dir = TempDir::new().expect("tempdir");
        let (config, mut store) = setup(&dir, false);
        let chart_path = chart::write_placeholder(&config.experiments_dir()).expect("chart");
        populate(&mut store, &chart_path);

        let stage = ReportSynthesisStage::new(config.clone(), None);
        let output = stage.execute(&StageContext::new(1, &store)).await.expect("execute");
        assert_eq!(output.value["status"], "success");

        let markdown = std::fs::read_to_string(config.paper_dir().join(MARKDOWN_FILE)).expect("md");
        assert!(markdown.starts_with("# Autonomous Research on Urban Heat Islands"));
        assert!(markdown.contains("**Q1:** Do green roofs cool streets?"));
        assert!(!markdown.contains("**Q2:**"));
        assert!(markdown.contains("Found nothing useful"));
        assert!(markdown.contains("- **H1:** Roofs reduce heat"));
        assert!(markdown.contains("- Regression: OLS"));
        assert!(markdown.contains(&format!("]({})", chart_path.display())));
        assert!(markdown.contains("**Critique Score:** 0.6"));
        assert!(markdown.contains("- more sites"));
        assert_eq!(markdown.matches("![").count(), 1);

        let html = std::fs::read_to_string(config.paper_dir().join(HTML_FILE)).expect("html");
        assert!(html.contains("<h1>Autonomous Research on Urban Heat Islands</h1>"));
        assert!(html.contains("<img src="));
    }

    #[tokio::test]
    async fn test_empty_store_still_produces_paper() {
        let dir = TempDir::new().expect("tempdir");
        let (config, store) = setup(&dir, true);
        let stage = ReportSynthesisStage::new(config.clone(), None);

        let output = stage.execute(&StageContext::new(1, &store)).await.expect("execute");
        assert_eq!(output.value["status"], "success");
        let markdown = std::fs::read_to_string(config.paper_dir().join(MARKDOWN_FILE)).expect("md");
        assert!(markdown.contains("Unknown Domain"));
        assert!(markdown.contains("_No visualizations found._"));
        assert!(markdown.contains("_No critique available._"));
    }

    #[tokio::test]
    async fn test_polish_kept_only_when_figures_survive() {
        let dir = TempDir::new().expect("tempdir");
        let (config, mut store) = setup(&dir, true);
        let chart_path = chart::write_placeholder(&config.experiments_dir()).expect("chart");
        populate(&mut store, &chart_path);

        let dropped = ReportSynthesisStage::new(config.clone(), Some(Arc::new(ScriptedLlm::always("# Shorter paper"))));
        dropped.execute(&StageContext::new(1, &store)).await.expect("execute");
        let markdown = std::fs::read_to_string(config.paper_dir().join(MARKDOWN_FILE)).expect("md");
        assert!(markdown.contains("## Research Questions"));

        let polished = format!("```markdown\n# Edited\n![chart]({})\n```", chart_path.display());
        let kept = ReportSynthesisStage::new(config.clone(), Some(Arc::new(ScriptedLlm::always(polished))));
        kept.execute(&StageContext::new(1, &store)).await.expect("execute");
        let markdown = std::fs::read_to_string(config.paper_dir().join(MARKDOWN_FILE)).expect("md");
        assert!(markdown.starts_with("# Edited"));
        assert!(!markdown.contains("```"));
    }

    #[test]
    fn test_collect_figures_dedupes_and_filters() {
        let dir = TempDir::new().expect("tempdir");
        let experiments = dir.path().join("experiments");
        std::fs::create_dir_all(&experiments).expect("mkdir");
        std::fs::write(experiments.join("a_chart.svg"), "<svg/>").expect("write");
        std::fs::write(experiments.join("b.PNG"), "png").expect("write");
        std::fs::write(experiments.join("notes.json"), "{}").expect("write");

        let chart = experiments.join("a_chart.svg");
        let missing = dir.path().join("gone.svg");
        let figures = collect_figures(Some(&chart.display().to_string()), &experiments);
        assert_eq!(figures, vec![chart.clone(), experiments.join("b.PNG")]);

        let figures = collect_figures(
            Some(&missing.display().to_string()),
            &dir.path().join("nope"),
        );
        assert!(figures.is_empty());
        assert_eq!(figure(&chart).title, "A Chart");
    }

    #[test]
    fn test_degraded_default() {
        let stage = ReportSynthesisStage::new(Arc::new(PipelineConfig::default()), None);
        let value = stage
            .degraded(&StageError::Io(std::io::Error::other("disk full")))
            .expect("default");
        assert_eq!(value["status"], "error");
        assert!(value["error"].as_str().is_some_and(|e| e.contains("disk full")));
    }
}
