//! Response normalization: any raw reply in, one canonical
//! [`AnalysisResult`] out, never an error.
//!
//! Three tiers, first success wins:
//! 1. Structured: the reply is (or contains) a JSON object; map its
//!    fields, repairing broken JSON if needed.
//! 2. Labeled sections: scan free text for `Summary:` / `## Insights`
//!    style headers.
//! 3. Heuristics: bullets become insights, frequent tokens become
//!    category suggestions, a keyword table guesses the analysis type.
//!
//! A tier counts as a success when it recovers at least one canonical
//! field. Unrecovered fields keep their defaults; relevance is clamped
//! to [0, 1]; the provider id and timestamp always come from call
//! context, never from the reply.

mod extract;
mod heuristics;
mod repair;
mod sections;

use serde_json::{Map, Value};

use crate::content::AnalysisResult;
use crate::provider::RawReply;
use sections::Field;

pub use repair::try_repair_json;

/// Free-text replies larger than this are truncated before scanning.
const MAX_INPUT_BYTES: usize = 262_144;
const MAX_INSIGHTS: usize = 20;
const MAX_CATEGORIES: usize = 10;
const SUMMARY_FALLBACK_CHARS: usize = 400;

/// Convert a raw provider reply into the canonical result. Infallible:
/// the worst possible input yields a result with every field at its
/// default, stamped with `provider`.
pub fn normalize(reply: &RawReply, required_fields: &[String], provider: &str) -> AnalysisResult {
    let mut result = AnalysisResult::empty(provider);

    match reply {
        RawReply::Structured(map) => {
            apply_structured(map, &mut result);
        }
        RawReply::FreeText(text) => {
            let bounded = sections::bound_to_char(text, MAX_INPUT_BYTES);
            let cleaned = extract::preprocess(bounded);
            if !try_structured_tier(&cleaned, required_fields, &mut result)
                && !try_sections_tier(&cleaned, &mut result)
            {
                apply_heuristics(&cleaned, &mut result);
            }
        }
    }

    finalize(&mut result);
    result
}

/// Tier 1 over free text: pull a JSON object out of a code fence or the
/// raw text, repairing it if the strict parse fails.
fn try_structured_tier(text: &str, required_fields: &[String], result: &mut AnalysisResult) -> bool {
    let candidates = [
        extract::extract_code_block(text, "json"),
        extract::find_bracketed(text, '{', '}'),
    ];

    for candidate in candidates.into_iter().flatten() {
        let parsed: Option<Value> = serde_json::from_str(candidate)
            .ok()
            .or_else(|| try_repair_json(candidate).and_then(|s| serde_json::from_str(&s).ok()));
        if let Some(Value::Object(map)) = parsed {
            if map_matches(&map, required_fields) && apply_structured(&map, result) {
                return true;
            }
        }
    }
    false
}

/// A candidate object must share at least one key (alias-aware) with the
/// expected fields, so an unrelated embedded JSON blob does not win.
fn map_matches(map: &Map<String, Value>, required_fields: &[String]) -> bool {
    if required_fields.is_empty() {
        return true;
    }
    map.keys()
        .filter_map(|k| field_for_key(k))
        .any(|field| required_fields.iter().any(|rf| field_for_key(rf) == Some(field)))
}

fn try_sections_tier(text: &str, result: &mut AnalysisResult) -> bool {
    let found = sections::find_sections(text);
    if found.is_empty() {
        return false;
    }
    for (field, body) in found {
        match field {
            Field::Summary => result.summary = body,
            Field::Insights => result.insights = list_from_text(&body),
            Field::Categories => result.categories = list_from_text(&body),
            Field::Relevance => {
                if let Some(score) = parse_relevance(&body) {
                    result.relevance = score;
                }
            }
            Field::AnalysisType => result.analysis_type = body,
        }
    }
    true
}

fn apply_heuristics(text: &str, result: &mut AnalysisResult) {
    result.summary = heuristics::first_paragraph(text, SUMMARY_FALLBACK_CHARS);
    result.insights = heuristics::bullet_insights(text);
    result.categories = heuristics::frequent_tokens(text, 5);
    if let Some(label) = heuristics::guess_analysis_type(text) {
        result.analysis_type = label;
    }
}

/// Map a structured object's fields into the result. Returns true when at
/// least one canonical field was recovered.
fn apply_structured(map: &Map<String, Value>, result: &mut AnalysisResult) -> bool {
    let mut recovered = false;
    for (key, value) in map {
        let Some(field) = field_for_key(key) else {
            continue;
        };
        match field {
            Field::Summary => {
                if let Some(s) = value_to_string(value) {
                    result.summary = s;
                    recovered = true;
                }
            }
            Field::Insights => {
                let list = value_to_list(value);
                if !list.is_empty() {
                    result.insights = list;
                    recovered = true;
                }
            }
            Field::Categories => {
                let list = value_to_list(value);
                if !list.is_empty() {
                    result.categories = list;
                    recovered = true;
                }
            }
            Field::Relevance => {
                if let Some(score) = value_to_relevance(value) {
                    result.relevance = score;
                    recovered = true;
                }
            }
            Field::AnalysisType => {
                if let Some(s) = value_to_string(value) {
                    result.analysis_type = s;
                    recovered = true;
                }
            }
        }
    }
    recovered
}

/// Alias-aware field lookup shared by the structured tier and the
/// candidate-match check.
fn field_for_key(key: &str) -> Option<Field> {
    let lower = key.trim().to_lowercase();
    match lower.as_str() {
        "summary" | "overview" => Some(Field::Summary),
        "insights" | "key_insights" | "key insights" | "key_points" | "findings" => {
            Some(Field::Insights)
        }
        "categories" | "tags" | "topics" => Some(Field::Categories),
        "relevance" | "relevance_score" | "score" => Some(Field::Relevance),
        "analysis_type" | "analysis type" | "type" => Some(Field::AnalysisType),
        _ => None,
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Coerce a value into a string list: arrays element-wise, strings split
/// on newlines or commas.
fn value_to_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(value_to_string).collect(),
        Value::String(s) => list_from_text(s),
        _ => Vec::new(),
    }
}

/// Split free text into list entries: bullet lines if present, otherwise
/// newline- or comma-separated values.
fn list_from_text(text: &str) -> Vec<String> {
    let bullets = heuristics::bullet_insights(text);
    if !bullets.is_empty() {
        return bullets;
    }
    let separator = if text.contains('\n') { '\n' } else { ',' };
    text.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn value_to_relevance(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_relevance(s),
        _ => None,
    }
}

/// Parse a relevance score from text: plain float, percentage, or the
/// first number on the line.
fn parse_relevance(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if let Some(pct) = trimmed.strip_suffix('%') {
        return pct.trim().parse::<f64>().ok().map(|v| v / 100.0);
    }
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }
    // First numeric token in a sentence like "Score: 0.7 out of 1".
    trimmed
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .find(|tok| !tok.is_empty() && tok.chars().any(|c| c.is_ascii_digit()))
        .and_then(|tok| tok.parse::<f64>().ok())
}

/// Enforce the output invariant: relevance in [0, 1], categories
/// deduplicated and capped, insights capped. NaN relevance collapses to
/// the default.
fn finalize(result: &mut AnalysisResult) {
    result.relevance = if result.relevance.is_nan() {
        0.0
    } else {
        result.relevance.clamp(0.0, 1.0)
    };

    let mut seen = std::collections::HashSet::new();
    result
        .categories
        .retain(|c| seen.insert(c.to_lowercase()));
    result.categories.truncate(MAX_CATEGORIES);
    result.insights.truncate(MAX_INSIGHTS);
}
