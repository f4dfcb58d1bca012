//! Chart specification requests and SVG chart rendering.
//!
//! Charts are written as standalone SVG documents rendered with tera. Bar,
//! line, scatter and pie layouts are computed here; the template only places
//! the resulting shapes.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tera::{Context, Tera};

use crate::decider::DualStrategyTask;
use crate::error::StageError;
use crate::normalize;
use crate::records::{ChartType, DomainRecord, VisualizationSpec};

/// File name of the placeholder chart.
pub const PLACEHOLDER_FILE: &str = "default_chart.svg";

const WIDTH: f64 = 640.0;
const HEIGHT: f64 = 400.0;
const MARGIN_LEFT: f64 = 60.0;
const MARGIN_RIGHT: f64 = 150.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_BOTTOM: f64 = 60.0;

const PALETTE: &[&str] = &[
    "#4e79a7", "#f28e2b", "#e15759", "#76b7b2", "#59a14f", "#edc948", "#b07aa1", "#ff9da7",
];

const CHART_TEMPLATE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="{{ width }}" height="{{ height }}" viewBox="0 0 {{ width }} {{ height }}">
  <rect x="0" y="0" width="{{ width }}" height="{{ height }}" fill="#ffffff"/>
  <text x="{{ title_x }}" y="28" text-anchor="middle" font-family="sans-serif" font-size="16">{{ title }}</text>
{% for shape in shapes %}{% if shape.kind == "rect" %}  <rect x="{{ shape.x }}" y="{{ shape.y }}" width="{{ shape.width }}" height="{{ shape.height }}" fill="{{ shape.color }}"/>
{% elif shape.kind == "polyline" %}  <polyline points="{{ shape.points }}" fill="none" stroke="{{ shape.color }}" stroke-width="2"/>
{% elif shape.kind == "circle" %}  <circle cx="{{ shape.cx }}" cy="{{ shape.cy }}" r="{{ shape.r }}" fill="{{ shape.color }}"/>
{% elif shape.kind == "path" %}  <path d="{{ shape.d }}" fill="{{ shape.color }}" stroke="#ffffff" stroke-width="1"/>
{% elif shape.kind == "line" %}  <line x1="{{ shape.x1 }}" y1="{{ shape.y1 }}" x2="{{ shape.x2 }}" y2="{{ shape.y2 }}" stroke="#333333" stroke-width="1"/>
{% elif shape.kind == "text" %}  <text x="{{ shape.x }}" y="{{ shape.y }}" text-anchor="{{ shape.anchor }}" font-family="sans-serif" font-size="11">{{ shape.content }}</text>
{% endif %}{% endfor %}</svg>
"##;

const CHART_SPEC_PROMPT: &str = r#"You are a scientific visualization assistant. Create a small dataset to visualize trends in this domain:
Domain: {domain_name}
Description: {domain_description}

Output JSON only:
{
  "labels": ["Label A", "Label B", "Label C"],
  "values": {
    "Metric 1": [10, 20, 30],
    "Metric 2": [15, 25, 35]
  },
  "type": "bar_chart"
}

Guidelines:
- Labels are conditions, techniques, or scenarios relevant to this domain.
- Metrics are meaningful quantitative aspects (efficiency, accuracy, impact).
- Numbers are between 1 and 100.
- Output strictly JSON, no markdown or text outside JSON."#;

/// Asks the model for a small synthetic chart dataset for a domain.
///
/// Falls back to `None`, which sends the caller to the placeholder chart.
pub struct ChartSpecTask {
    domain: DomainRecord,
}

impl ChartSpecTask {
    pub fn new(domain: DomainRecord) -> Self {
        Self { domain }
    }
}

impl DualStrategyTask for ChartSpecTask {
    type Output = Option<VisualizationSpec>;

    fn name(&self) -> &'static str {
        "chart_spec"
    }

    fn prompt(&self) -> String {
        CHART_SPEC_PROMPT
            .replace("{domain_name}", &self.domain.name)
            .replace("{domain_description}", &self.domain.description)
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["labels", "values"]
    }

    fn from_structured(&self, value: &Value) -> Result<Self::Output, String> {
        let mut spec = normalize::visualization_spec(value)
            .ok_or_else(|| "chart spec is not an object".to_string())?;
        if !spec.is_usable() {
            return Err("chart spec has no labels or values".to_string());
        }
        if spec.description.is_empty() {
            spec.description = format!(
                "Contextual {} chart for {}",
                spec.chart_type,
                self.domain.name
            );
        }
        Ok(Some(spec))
    }

    fn fallback(&self, _reason: &str) -> Self::Output {
        None
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Shape {
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        color: &'static str,
    },
    Polyline {
        points: String,
        color: &'static str,
    },
    Circle {
        cx: f64,
        cy: f64,
        r: f64,
        color: &'static str,
    },
    Path {
        d: String,
        color: &'static str,
    },
    Line {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
    },
    Text {
        x: f64,
        y: f64,
        anchor: &'static str,
        content: String,
    },
}

fn color(index: usize) -> &'static str {
    PALETTE[index % PALETTE.len()]
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn text(x: f64, y: f64, anchor: &'static str, content: impl Into<String>) -> Shape {
    Shape::Text {
        x: round1(x),
        y: round1(y),
        anchor,
        content: content.into(),
    }
}

/// Series clipped to the label count, negatives treated as zero.
fn series(spec: &VisualizationSpec) -> Vec<(&str, Vec<f64>)> {
    spec.values
        .iter()
        .map(|(name, values)| {
            let clipped = values
                .iter()
                .take(spec.labels.len())
                .map(|v| v.max(0.0))
                .collect();
            (name.as_str(), clipped)
        })
        .filter(|(_, values): &(&str, Vec<f64>)| !values.is_empty())
        .collect()
}

fn axes_and_legend(spec: &VisualizationSpec, names: &[&str], max: f64) -> Vec<Shape> {
    let bottom = HEIGHT - MARGIN_BOTTOM;
    let right = WIDTH - MARGIN_RIGHT;
    let mut shapes = vec![
        Shape::Line {
            x1: MARGIN_LEFT,
            y1: bottom,
            x2: right,
            y2: bottom,
        },
        Shape::Line {
            x1: MARGIN_LEFT,
            y1: MARGIN_TOP,
            x2: MARGIN_LEFT,
            y2: bottom,
        },
        text(MARGIN_LEFT - 6.0, bottom + 4.0, "end", "0"),
        text(MARGIN_LEFT - 6.0, MARGIN_TOP + 4.0, "end", format!("{}", round1(max))),
    ];

    let slot = (right - MARGIN_LEFT) / spec.labels.len().max(1) as f64;
    for (i, label) in spec.labels.iter().enumerate() {
        shapes.push(text(
            MARGIN_LEFT + slot * (i as f64 + 0.5),
            bottom + 18.0,
            "middle",
            label.clone(),
        ));
    }
    for (i, name) in names.iter().enumerate() {
        shapes.push(legend_entry(i, name));
    }
    shapes
}

fn legend_entry(index: usize, name: &str) -> Shape {
    text(
        WIDTH - MARGIN_RIGHT + 16.0,
        MARGIN_TOP + 16.0 * index as f64 + 10.0,
        "start",
        format!("\u{25a0} {name}"),
    )
}

fn legend_swatch(index: usize) -> Shape {
    Shape::Rect {
        x: WIDTH - MARGIN_RIGHT + 4.0,
        y: MARGIN_TOP + 16.0 * index as f64 + 1.0,
        width: 10.0,
        height: 10.0,
        color: color(index),
    }
}

fn cartesian_shapes(spec: &VisualizationSpec) -> Vec<Shape> {
    let data = series(spec);
    let names: Vec<&str> = data.iter().map(|(n, _)| *n).collect();
    let max = data
        .iter()
        .flat_map(|(_, v)| v.iter().copied())
        .fold(0.0_f64, f64::max)
        .max(1e-9);

    let bottom = HEIGHT - MARGIN_BOTTOM;
    let plot_h = bottom - MARGIN_TOP;
    let plot_w = WIDTH - MARGIN_RIGHT - MARGIN_LEFT;
    let slot = plot_w / spec.labels.len().max(1) as f64;
    let scale = |v: f64| v / max * plot_h;

    let mut shapes = axes_and_legend(spec, &names, max);
    for (s, (_, values)) in data.iter().enumerate() {
        shapes.push(legend_swatch(s));
        match spec.chart_type {
            ChartType::Line | ChartType::Scatter => {
                let points: Vec<(f64, f64)> = values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| {
                        (
                            round1(MARGIN_LEFT + slot * (i as f64 + 0.5)),
                            round1(bottom - scale(*v)),
                        )
                    })
                    .collect();
                if spec.chart_type == ChartType::Line {
                    shapes.push(Shape::Polyline {
                        points: points
                            .iter()
                            .map(|(x, y)| format!("{x},{y}"))
                            .collect::<Vec<_>>()
                            .join(" "),
                        color: color(s),
                    });
                }
                for (cx, cy) in points {
                    shapes.push(Shape::Circle {
                        cx,
                        cy,
                        r: 4.0,
                        color: color(s),
                    });
                }
            }
            _ => {
                let bar_w = slot * 0.8 / data.len() as f64;
                for (i, v) in values.iter().enumerate() {
                    let h = scale(*v);
                    shapes.push(Shape::Rect {
                        x: round1(MARGIN_LEFT + slot * i as f64 + slot * 0.1 + bar_w * s as f64),
                        y: round1(bottom - h),
                        width: round1(bar_w),
                        height: round1(h),
                        color: color(s),
                    });
                }
            }
        }
    }
    shapes
}

fn pie_shapes(spec: &VisualizationSpec) -> Vec<Shape> {
    let data = series(spec);
    let Some((_, values)) = data.first() else {
        return Vec::new();
    };
    let total: f64 = values.iter().sum();
    let (cx, cy, r) = (MARGIN_LEFT + 160.0, HEIGHT / 2.0 + 10.0, 140.0);
    let mut shapes = Vec::new();

    if total <= 0.0 {
        shapes.push(Shape::Circle {
            cx,
            cy,
            r,
            color: "#dddddd",
        });
        return shapes;
    }

    let mut angle = -std::f64::consts::FRAC_PI_2;
    for (i, v) in values.iter().enumerate() {
        let fraction = v / total;
        if fraction >= 0.9999 {
            shapes.push(Shape::Circle {
                cx,
                cy,
                r,
                color: color(i),
            });
        } else if fraction > 0.0 {
            let end = angle + fraction * std::f64::consts::TAU;
            let large_arc = if fraction > 0.5 { 1 } else { 0 };
            shapes.push(Shape::Path {
                d: format!(
                    "M {} {} L {} {} A {r} {r} 0 {large_arc} 1 {} {} Z",
                    round1(cx),
                    round1(cy),
                    round1(cx + r * angle.cos()),
                    round1(cy + r * angle.sin()),
                    round1(cx + r * end.cos()),
                    round1(cy + r * end.sin()),
                ),
                color: color(i),
            });
            angle = end;
        }
        let label = spec.labels.get(i).map(String::as_str).unwrap_or("");
        shapes.push(legend_swatch(i));
        shapes.push(legend_entry(i, &format!("{label} ({:.1}%)", fraction * 100.0)));
    }
    shapes
}

fn render_svg(title: &str, shapes: &[Shape]) -> Result<String, StageError> {
    let mut context = Context::new();
    context.insert("width", &WIDTH);
    context.insert("height", &HEIGHT);
    context.insert("title_x", &(WIDTH / 2.0));
    context.insert("title", title);
    context.insert("shapes", shapes);
    Ok(Tera::one_off(CHART_TEMPLATE, &context, true)?)
}

/// Renders `spec` into `dir/visualization_<suffix>.svg` and returns the path.
///
/// The file is checked to exist after writing.
pub fn render_chart(spec: &VisualizationSpec, dir: &Path) -> Result<PathBuf, StageError> {
    if !spec.is_usable() {
        return Err(StageError::Chart("chart spec has no labels or values".to_string()));
    }
    let shapes = match spec.chart_type {
        ChartType::Pie => pie_shapes(spec),
        _ => cartesian_shapes(spec),
    };
    let title = if spec.description.is_empty() {
        format!("{} chart", spec.chart_type)
    } else {
        spec.description.clone()
    };
    let svg = render_svg(&title, &shapes)?;

    std::fs::create_dir_all(dir)?;
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let path = dir.join(format!("visualization_{}.svg", &suffix[..8]));
    std::fs::write(&path, svg)?;
    ensure_exists(&path)?;
    Ok(path)
}

/// Writes the "no visualization generated" placeholder (once) and returns its path.
pub fn write_placeholder(dir: &Path) -> Result<PathBuf, StageError> {
    let path = dir.join(PLACEHOLDER_FILE);
    if !path.is_file() {
        std::fs::create_dir_all(dir)?;
        let svg = render_svg("No Visualization Generated", &[])?;
        std::fs::write(&path, svg)?;
    }
    ensure_exists(&path)?;
    Ok(path)
}

fn ensure_exists(path: &Path) -> Result<(), StageError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(StageError::Chart(format!(
            "chart artifact missing after write: {}",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decider::DualStrategyDecider;
    use crate::llm::testing::ScriptedLlm;
    use crate::llm::LlmSettings;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn spec(chart_type: ChartType) -> VisualizationSpec {
        VisualizationSpec {
            chart_type,
            labels: vec!["Low".into(), "Mid".into(), "High & <Peak>".into()],
            values: BTreeMap::from([
                ("Accuracy".to_string(), vec![40.0, 65.0, 90.0]),
                ("Recall".to_string(), vec![30.0, 55.0]),
            ]),
            description: "Model accuracy by noise level".to_string(),
        }
    }

    #[test]
    fn test_render_every_chart_type() {
        let dir = TempDir::new().expect("tempdir");
        for chart_type in [ChartType::Bar, ChartType::Line, ChartType::Scatter, ChartType::Pie] {
            let path = render_chart(&spec(chart_type), dir.path()).expect("render");
            assert!(path.is_file());
            let svg = std::fs::read_to_string(&path).expect("read");
            assert!(svg.starts_with("<svg"));
            assert!(svg.contains("Model accuracy by noise level"));
            assert!(!svg.contains("<Peak>"), "labels must be escaped");
        }
    }

    #[test]
    fn test_bar_chart_has_one_rect_per_value() {
        let shapes = cartesian_shapes(&spec(ChartType::Bar));
        let bars = shapes
            .iter()
            .filter(|s| matches!(s, Shape::Rect { width, .. } if *width > 10.0))
            .count();
        assert_eq!(bars, 5);
    }

    #[test]
    fn test_unusable_spec_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let result = render_chart(&VisualizationSpec::default(), dir.path());
        assert!(matches!(result, Err(StageError::Chart(_))));
    }

    #[test]
    fn test_file_names_do_not_collide() {
        let dir = TempDir::new().expect("tempdir");
        let a = render_chart(&spec(ChartType::Bar), dir.path()).expect("a");
        let b = render_chart(&spec(ChartType::Bar), dir.path()).expect("b");
        assert_ne!(a, b);
    }

    #[test]
    fn test_placeholder_is_written_once() {
        let dir = TempDir::new().expect("tempdir");
        let first = write_placeholder(&dir.path().join("nested")).expect("placeholder");
        let second = write_placeholder(&dir.path().join("nested")).expect("placeholder");
        assert_eq!(first, second);
        assert!(first.ends_with(PLACEHOLDER_FILE));
        let svg = std::fs::read_to_string(&first).expect("read");
        assert!(svg.contains("No Visualization Generated"));
    }

    #[tokio::test]
    async fn test_chart_spec_task_primary_and_fallback() {
        let domain = DomainRecord::new("Tidal Energy", "Marine power");
        let decider = DualStrategyDecider::new(
            Some(Arc::new(ScriptedLlm::always(
                r#"{"labels": ["A", "B"], "values": {"Output": [10, 20]}, "type": "line_chart"}"#,
            ))),
            LlmSettings::default(),
        );
        let decision = decider.decide(&ChartSpecTask::new(domain.clone())).await;
        let spec = decision.value.expect("primary spec");
        assert_eq!(spec.chart_type, ChartType::Line);
        assert!(spec.description.contains("Tidal Energy"));

        let empty = DualStrategyDecider::new(
            Some(Arc::new(ScriptedLlm::always(r#"{"labels": [], "values": {}}"#))),
            LlmSettings::default(),
        );
        assert!(empty.decide(&ChartSpecTask::new(domain)).await.value.is_none());
    }
}
