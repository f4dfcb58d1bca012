//! Lenient coercion of stored stage outputs into canonical records.
//!
//! Anything read back from the structured store may be a raw string, a
//! partially shaped structure, or a well formed record. Each function here
//! accepts any [`Value`] and always returns the canonical record type, so a
//! stage never branches on the shape of its inputs.
//!
//! Every function is idempotent: serializing its output and normalizing
//! again yields an equal record.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::records::{
    ChartType, CritiqueRecord, DataInfo, DatasetRecord, DatasetSummary, DomainRecord,
    ExperimentProposal, ExperimentRecord, Hypothesis, ProposalItem, QuestionRecord,
    VisualizationSpec, UNKNOWN_DOMAIN,
};
use crate::utils::{parse_structured, ExpectedShape};

/// Coerces a domain descriptor.
///
/// A string becomes the domain name. A list picks the entry with the
/// highest confidence.
pub fn domain(value: &Value) -> DomainRecord {
    match value {
        Value::String(s) if s.trim().is_empty() => DomainRecord::unknown(),
        Value::String(s) => DomainRecord::new(s.trim(), ""),
        Value::Object(map) => domain_from_map(map),
        Value::Array(items) => best_domain(items).unwrap_or_else(DomainRecord::unknown),
        Value::Null => DomainRecord::unknown(),
        other => DomainRecord::new(UNKNOWN_DOMAIN, other.to_string()),
    }
}

/// Picks the object entry with the highest confidence from a list of candidates.
pub fn best_domain(items: &[Value]) -> Option<DomainRecord> {
    items
        .iter()
        .filter_map(Value::as_object)
        .map(domain_from_map)
        .fold(None, |best: Option<DomainRecord>, candidate| match best {
            Some(current) if current.confidence >= candidate.confidence => Some(current),
            _ => Some(candidate),
        })
}

fn domain_from_map(map: &Map<String, Value>) -> DomainRecord {
    let name = first(map, &["name", "domain_name", "domain"])
        .map(text)
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_DOMAIN.to_string());
    let description = first(map, &["description"]).map(text).unwrap_or_default();

    DomainRecord {
        name,
        description,
        sources: first(map, &["sources", "source"])
            .map(string_list)
            .unwrap_or_default(),
        confidence: first(map, &["confidence", "confidence_score"])
            .and_then(number)
            .map(unit_interval)
            .unwrap_or(0.0),
    }
}

/// Coerces a question list.
pub fn questions(value: &Value) -> Vec<QuestionRecord> {
    match value {
        Value::String(s) => {
            if s.trim().is_empty() {
                return Vec::new();
            }
            match parse_structured(s, ExpectedShape::Array) {
                Ok(parsed) => questions(&parsed),
                Err(_) => vec![QuestionRecord::new(s.trim())],
            }
        }
        Value::Array(items) => items.iter().map(question_record).collect(),
        Value::Object(map) => match map.get("questions") {
            Some(inner @ Value::Array(_)) => questions(inner),
            _ => vec![question_record(value)],
        },
        Value::Null => Vec::new(),
        other => vec![QuestionRecord::new(other.to_string())],
    }
}

fn question_record(value: &Value) -> QuestionRecord {
    let Value::Object(map) = value else {
        return QuestionRecord::new(text(value));
    };
    QuestionRecord {
        question: first(map, &["question", "text"]).map(text).unwrap_or_default(),
        reasoning: first(map, &["reasoning", "rationale"])
            .map(text)
            .unwrap_or_default(),
        potential_impact: first(map, &["potential_impact", "impact"])
            .map(text)
            .unwrap_or_default(),
        error: first(map, &["error"]).map(text),
        raw_output: first(map, &["raw_output"]).map(text),
    }
}

/// Coerces dataset discovery output. The dataset list is always present.
pub fn data_info(value: &Value) -> DataInfo {
    match value {
        Value::String(s) => match parse_structured(s, ExpectedShape::Object) {
            Ok(parsed @ Value::Object(_)) => data_info(&parsed),
            _ => DataInfo::from_summary(s.as_str()),
        },
        Value::Object(map) => DataInfo {
            status: first(map, &["status"]).map(text).unwrap_or_default(),
            domain: first(map, &["domain"]).map(text).unwrap_or_default(),
            summary: first(map, &["summary"]).map(text).unwrap_or_default(),
            metadata: first(map, &["metadata", "datasets"])
                .map(dataset_list)
                .unwrap_or_default(),
        },
        Value::Array(_) => DataInfo {
            metadata: dataset_list(value),
            ..DataInfo::default()
        },
        Value::Null => DataInfo::default(),
        other => DataInfo::from_summary(other.to_string()),
    }
}

fn dataset_list(value: &Value) -> Vec<DatasetRecord> {
    match value {
        Value::Array(items) => items.iter().filter_map(dataset_record).collect(),
        Value::Object(_) => dataset_record(value).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn dataset_record(value: &Value) -> Option<DatasetRecord> {
    match value {
        Value::String(url) if !url.trim().is_empty() => Some(DatasetRecord {
            source_url: url.trim().to_string(),
            ..DatasetRecord::default()
        }),
        Value::Object(outer) => {
            // Fetch results are sometimes wrapped as {url, output: {...}}.
            let merged = match outer.get("output") {
                Some(Value::Object(inner)) => {
                    let mut merged = inner.clone();
                    for (k, v) in outer {
                        if k != "output" {
                            merged.entry(k.clone()).or_insert_with(|| v.clone());
                        }
                    }
                    merged
                }
                _ => outer.clone(),
            };
            let (columns, column_names) = column_info(&merged);
            Some(DatasetRecord {
                source_url: first(&merged, &["source_url", "url", "source"])
                    .map(text)
                    .unwrap_or_default(),
                file_path: first(&merged, &["file_path", "cleaned_path", "path"])
                    .map(text)
                    .unwrap_or_default(),
                rows: first(&merged, &["rows", "num_rows", "num_samples", "num_images"])
                    .and_then(count)
                    .unwrap_or(0),
                columns,
                column_names,
                size_mb: first(&merged, &["size_mb"]).and_then(number).unwrap_or(0.0),
            })
        }
        _ => None,
    }
}

/// Reads a column count and names, accepting `columns` as either a count or
/// a list of names.
fn column_info(map: &Map<String, Value>) -> (u64, Vec<String>) {
    let mut names = first(map, &["column_names"])
        .map(string_list)
        .unwrap_or_default();
    let mut columns = first(map, &["num_columns"]).and_then(count);
    match map.get("columns") {
        Some(list @ Value::Array(_)) => {
            if names.is_empty() {
                names = string_list(list);
            }
            columns = columns.or(Some(names.len() as u64));
        }
        Some(other) => columns = columns.or_else(|| count(other)),
        None => {}
    }
    (columns.unwrap_or(names.len() as u64), names)
}

/// Coerces an experiment result. Both the analysis and the proposal are
/// always present.
pub fn experiment(value: &Value) -> ExperimentRecord {
    match value {
        Value::String(s) => match parse_structured(s, ExpectedShape::Object) {
            Ok(parsed @ Value::Object(_)) => experiment(&parsed),
            _ => ExperimentRecord {
                summary: Some(s.clone()),
                ..ExperimentRecord::default()
            },
        },
        Value::Object(map) => {
            let proposal_source = first(map, &["experiment_proposal", "proposal"]).or_else(|| {
                let looks_like_proposal = ["hypotheses", "methods", "experiment_design"]
                    .iter()
                    .any(|k| map.contains_key(*k));
                looks_like_proposal.then_some(value)
            });
            ExperimentRecord {
                dataset_analysis: match map.get("dataset_analysis") {
                    Some(Value::Array(items)) => items.iter().filter_map(dataset_summary).collect(),
                    _ => Vec::new(),
                },
                experiment_proposal: proposal_source.map(proposal).unwrap_or_default(),
                visualization_path: first(map, &["visualization_path"]).map(text),
                summary: first(map, &["summary"]).map(text),
                error: first(map, &["error"]).map(text),
            }
        }
        Value::Null => ExperimentRecord::default(),
        other => ExperimentRecord {
            summary: Some(other.to_string()),
            ..ExperimentRecord::default()
        },
    }
}

fn dataset_summary(value: &Value) -> Option<DatasetSummary> {
    let map = value.as_object()?;
    let (columns, column_names) = column_info(map);
    Some(DatasetSummary {
        dataset_name: first(map, &["dataset_name", "name", "dataset"])
            .map(text)
            .unwrap_or_default(),
        file_path: first(map, &["file_path", "path"]).map(text).unwrap_or_default(),
        rows: first(map, &["rows", "num_samples", "num_images", "num_rows"])
            .and_then(count)
            .unwrap_or(0),
        columns,
        column_names,
    })
}

/// Coerces an experiment proposal.
pub fn proposal(value: &Value) -> ExperimentProposal {
    let map = match value {
        Value::Object(map) => map,
        Value::String(s) => {
            return match parse_structured(s, ExpectedShape::Object) {
                Ok(parsed @ Value::Object(_)) => proposal(&parsed),
                _ => ExperimentProposal {
                    notes: Some(s.clone()),
                    ..ExperimentProposal::default()
                },
            };
        }
        _ => return ExperimentProposal::default(),
    };

    let design = map.get("experiment_design").and_then(Value::as_object);
    let section = |key: &str| -> Vec<ProposalItem> {
        map.get(key)
            .or_else(|| design.and_then(|d| d.get(key)))
            .map(|v| proposal_items(v, key))
            .unwrap_or_default()
    };

    ExperimentProposal {
        hypotheses: match map.get("hypotheses") {
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| hypothesis(i, item))
                .collect(),
            Some(single @ Value::String(s)) if !s.trim().is_empty() => vec![hypothesis(0, single)],
            _ => Vec::new(),
        },
        methods: section("methods"),
        metrics: section("metrics"),
        tools: section("tools"),
        expected_outcome: first(map, &["expected_outcome", "expected_outcomes"])
            .map(|v| match v {
                Value::Array(_) => string_list(v).join("; "),
                other => text(other),
            })
            .unwrap_or_default(),
        visualization_spec: first(map, &["visualization_spec", "visualization_to_generate"])
            .and_then(visualization_spec),
        notes: first(map, &["notes"]).map(text),
    }
}

fn hypothesis(index: usize, value: &Value) -> Hypothesis {
    let default_id = format!("H{}", index + 1);
    match value {
        Value::Object(map) => Hypothesis {
            id: first(map, &["id"]).map(text).unwrap_or(default_id),
            description: first(map, &["description", "hypothesis", "statement"])
                .map(text)
                .unwrap_or_default(),
            predicted_outcome: first(map, &["predicted_outcome", "prediction"])
                .map(text)
                .unwrap_or_default(),
        },
        other => Hypothesis {
            id: default_id,
            description: text(other),
            predicted_outcome: String::new(),
        },
    }
}

fn proposal_items(value: &Value, section: &str) -> Vec<ProposalItem> {
    // "methods" -> "method"
    let singular = section.trim_end_matches('s');
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => {
                let name = first(map, &["name", singular, "title"]).map(text).unwrap_or_default();
                let description = first(map, &["description", "details"])
                    .map(text)
                    .unwrap_or_default();
                (!name.is_empty() || !description.is_empty())
                    .then(|| ProposalItem::new(name, description))
            }
            Value::String(s) if !s.trim().is_empty() => Some(ProposalItem::new(s.trim(), "")),
            Value::String(_) | Value::Null => None,
            other => Some(ProposalItem::new(other.to_string(), "")),
        })
        .collect()
}

/// Coerces a chart specification. Returns `None` for anything that is not a
/// mapping.
pub fn visualization_spec(value: &Value) -> Option<VisualizationSpec> {
    let map = match value {
        Value::Object(map) => map,
        Value::String(s) => {
            return match parse_structured(s, ExpectedShape::Object) {
                Ok(parsed @ Value::Object(_)) => visualization_spec(&parsed),
                _ => None,
            };
        }
        _ => return None,
    };
    let data = map.get("data").and_then(Value::as_object);
    let lookup = |key: &str| map.get(key).or_else(|| data.and_then(|d| d.get(key)));

    let values = match lookup("values") {
        Some(Value::Object(series)) => series
            .iter()
            .map(|(metric, nums)| (metric.clone(), numbers(nums)))
            .collect(),
        Some(list @ Value::Array(_)) => {
            let mut series = BTreeMap::new();
            series.insert("value".to_string(), numbers(list));
            series
        }
        _ => BTreeMap::new(),
    };

    Some(VisualizationSpec {
        chart_type: first(map, &["type", "chart_type"])
            .map(|v| ChartType::parse(&text(v)))
            .unwrap_or_default(),
        labels: lookup("labels").map(string_list).unwrap_or_default(),
        values,
        description: first(map, &["description", "title"])
            .map(text)
            .unwrap_or_default(),
    })
}

/// Coerces a critique. The full critique shape is always present.
pub fn critique(value: &Value) -> CritiqueRecord {
    match value {
        Value::String(s) => match parse_structured(s, ExpectedShape::Object) {
            Ok(parsed @ Value::Object(_)) => critique(&parsed),
            _ => CritiqueRecord::from_notes(s.as_str()),
        },
        Value::Object(map) => CritiqueRecord {
            strengths: first(map, &["strengths"]).map(string_list).unwrap_or_default(),
            weaknesses: first(map, &["weaknesses"]).map(string_list).unwrap_or_default(),
            risks: first(map, &["risks"]).map(string_list).unwrap_or_default(),
            recommended_fixes: first(map, &["recommended_fixes", "fixes"])
                .map(fix_list)
                .unwrap_or_default(),
            critique_score: first(map, &["critique_score", "score"])
                .and_then(number)
                .map(unit_interval)
                .unwrap_or(0.0),
            iterate: first(map, &["iterate"]).and_then(flag).unwrap_or(true),
            suggested_next_steps: first(map, &["suggested_next_steps", "next_steps"])
                .map(string_list)
                .unwrap_or_default(),
            notes: first(map, &["notes"]).map(text).unwrap_or_default(),
        },
        Value::Null => CritiqueRecord::default(),
        other => CritiqueRecord::from_notes(other.to_string()),
    }
}

fn fix_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item.as_object() {
                Some(map) if map.contains_key("fix") => {
                    let fix = first(map, &["fix"]).map(text).unwrap_or_default();
                    if fix.trim().is_empty() {
                        return None;
                    }
                    match first(map, &["alternative"]).map(text) {
                        Some(alt) if !alt.is_empty() => Some(format!("{fix} (Alternative: {alt})")),
                        _ => Some(fix),
                    }
                }
                _ => list_item(item),
            })
            .collect(),
        other => string_list(other),
    }
}

/// Returns the first present, non-null value among `keys`.
fn first<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find(|v| !v.is_null())
}

/// Renders a value as plain text. Strings are returned without quotes.
pub fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(list_item).collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.clone()],
        Value::Null | Value::String(_) => Vec::new(),
        other => list_item(other).into_iter().collect(),
    }
}

fn list_item(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if s.trim().is_empty() => None,
        Value::Null => None,
        Value::Object(map) => {
            let name = first(map, &["name", "title"]).map(text);
            let description = first(map, &["description"]).map(text);
            match (name, description) {
                (Some(n), Some(d)) => Some(format!("{n}: {d}")),
                (Some(only), None) | (None, Some(only)) => Some(only),
                (None, None) => Some(value.to_string()),
            }
        }
        other => Some(text(other)),
    }
}

fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn numbers(value: &Value) -> Vec<f64> {
    match value {
        Value::Array(items) => items.iter().filter_map(number).collect(),
        other => number(other).into_iter().collect(),
    }
}

fn flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn unit_interval(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}
