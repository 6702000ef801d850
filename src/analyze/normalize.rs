// src/analyze/normalize.rs
//! Model output normalization.
//!
//! The delegate returns text that is *believed* to be JSON. This module turns it
//! into the strict [`AnalysisMatch`] schema and never fails on bad content:
//! unparseable text becomes an empty result flagged in its metadata, a missing
//! `matches` list becomes an empty one, and every missing field gets a default.
//!
//! Untyped model data only lives in [`RawMatch`], which is coerced field by
//! field into [`AnalysisMatch`] before leaving this module.

use metrics::counter;
use serde_json::{Map, Value};

use crate::analyze::schema::{AnalysisMatch, MatchMetadata, SOURCE_LABEL};
use crate::ingest::FeedSnapshot;

pub const DEFAULT_RELEVANCE: f64 = 0.5;
pub const UNKNOWN: &str = "Unknown";
pub const UNTITLED: &str = "Untitled";
pub const NO_SUMMARY: &str = "No summary available";
pub const PARSE_ERROR_MESSAGE: &str = "Failed to parse model response";

/// Longest summary derived from `content`, in characters.
const SUMMARY_CHARS: usize = 200;
/// Longest raw model output echoed into logs, in characters.
const LOG_RAW_CHARS: usize = 2_000;

/// Values used when the model leaves date or link out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchDefaults {
    pub publication_date: String,
    pub source_url: String,
}

impl Default for MatchDefaults {
    fn default() -> Self {
        Self {
            publication_date: UNKNOWN.to_string(),
            source_url: String::new(),
        }
    }
}

impl MatchDefaults {
    pub fn from_snapshot(snap: &FeedSnapshot) -> Self {
        let publication_date = if snap.publication_date.trim().is_empty() {
            UNKNOWN.to_string()
        } else {
            snap.publication_date.clone()
        };
        Self {
            publication_date,
            source_url: snap.source_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResponse {
    /// In the order the model produced them.
    pub matches: Vec<AnalysisMatch>,
    /// Model-provided metadata, or the parse-failure marker.
    pub metadata: Map<String, Value>,
    failed: bool,
}

impl NormalizedResponse {
    /// True only for the fallback; a model that writes `parse_error` itself does not count.
    pub fn parse_failed(&self) -> bool {
        self.failed
    }
}

/// Normalize raw delegate output. Never panics, never errors.
pub fn normalize_response(raw: &str, defaults: &MatchDefaults) -> NormalizedResponse {
    let Some(doc) = parse_model_json(raw) else {
        counter!("normalize_fallback_total").increment(1);
        tracing::warn!(
            raw_len = raw.len(),
            raw = %truncate_chars(raw, LOG_RAW_CHARS),
            "model response is not JSON; returning empty result"
        );
        return fallback(PARSE_ERROR_MESSAGE);
    };

    let obj = doc.as_object();
    let metadata = obj
        .and_then(|o| o.get("metadata"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let matches = match obj.and_then(|o| o.get("matches")).and_then(Value::as_array) {
        Some(items) => items
            .iter()
            .map(|v| RawMatch::from_value(v).into_match(defaults))
            .collect(),
        None => {
            tracing::debug!("model response has no matches list; using an empty one");
            Vec::new()
        }
    };

    NormalizedResponse {
        matches,
        metadata,
        failed: false,
    }
}

/// Empty result carrying an error marker in its metadata.
pub fn fallback(message: &str) -> NormalizedResponse {
    let mut metadata = Map::new();
    metadata.insert("error".to_string(), Value::String(message.to_string()));
    metadata.insert("parse_error".to_string(), Value::Bool(true));
    NormalizedResponse {
        matches: Vec::new(),
        metadata,
        failed: true,
    }
}

/// Parse as-is, then without Markdown fences, then the outermost `{...}` slice.
pub fn parse_model_json(raw: &str) -> Option<Value> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Some(v);
    }
    let unfenced = strip_code_fence(text);
    if unfenced != text {
        if let Ok(v) = serde_json::from_str::<Value>(unfenced) {
            return Some(v);
        }
    }
    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&unfenced[start..=end]).ok()
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // drop the info string ("json") up to the first newline
    let body = rest.split_once('\n').map_or("", |(_, b)| b);
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

/// One model match with nothing guaranteed.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RawMatch {
    pub document_type: Option<String>,
    pub issuing_body: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub publication_date: Option<String>,
    pub relevance_score: Option<f64>,
    pub source_url: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub procedure_code: Option<String>,
}

impl RawMatch {
    /// Lenient extraction. Non-object input yields an all-`None` match.
    pub fn from_value(v: &Value) -> Self {
        let Some(obj) = v.as_object() else {
            return RawMatch::default();
        };
        let meta = obj.get("metadata").and_then(Value::as_object);
        let nested = |key: &str| meta.and_then(|m| text_field(m, key)).or_else(|| text_field(obj, key));

        RawMatch {
            document_type: text_field(obj, "document_type"),
            issuing_body: text_field(obj, "issuing_body"),
            title: text_field(obj, "title"),
            summary: text_field(obj, "summary"),
            content: text_field(obj, "content"),
            publication_date: text_field(obj, "publication_date").or_else(|| {
                obj.get("dates")
                    .and_then(Value::as_object)
                    .and_then(|d| text_field(d, "publication_date"))
            }),
            relevance_score: score_field(obj.get("relevance_score")),
            source_url: text_field(obj, "source_url")
                .or_else(|| text_field(obj, "url"))
                .or_else(|| text_field(obj, "link")),
            category: nested("category"),
            subcategory: nested("subcategory"),
            procedure_code: nested("procedure_code"),
        }
    }

    pub fn into_match(self, defaults: &MatchDefaults) -> AnalysisMatch {
        let summary = match (&self.content, self.summary) {
            (Some(_), Some(s)) => s,
            (Some(c), None) => excerpt(c),
            // no content: any model summary is ignored
            (None, _) => NO_SUMMARY.to_string(),
        };
        AnalysisMatch {
            document_type: self.document_type.unwrap_or_else(|| UNKNOWN.to_string()),
            issuing_body: self.issuing_body.unwrap_or_else(|| UNKNOWN.to_string()),
            title: self.title.unwrap_or_else(|| UNTITLED.to_string()),
            summary,
            content: self.content.unwrap_or_default(),
            publication_date: self
                .publication_date
                .unwrap_or_else(|| defaults.publication_date.clone()),
            relevance_score: self.relevance_score.unwrap_or(DEFAULT_RELEVANCE),
            source_url: self
                .source_url
                .unwrap_or_else(|| defaults.source_url.clone()),
            source: SOURCE_LABEL.to_string(),
            metadata: MatchMetadata {
                category: self.category.unwrap_or_else(|| UNKNOWN.to_string()),
                subcategory: self.subcategory.unwrap_or_else(|| UNKNOWN.to_string()),
                procedure_code: self.procedure_code,
            },
        }
    }
}

fn excerpt(content: &str) -> String {
    content.chars().take(SUMMARY_CHARS).collect::<String>().trim_end().to_string()
}

/// Non-empty trimmed string; numbers are stringified.
fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Number or numeric string, clamped into `[0, 1]`.
fn score_field(v: Option<&Value>) -> Option<f64> {
    let score = match v? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    score.is_finite().then(|| score.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn norm(raw: &str) -> NormalizedResponse {
        normalize_response(raw, &MatchDefaults::default())
    }

    #[test]
    fn sparse_match_gets_every_default() {
        let out = norm(r#"{"matches":[{"document_type":"Resolution","relevance_score":0.9}],"metadata":{}}"#);
        assert_eq!(out.matches.len(), 1);
        let m = &out.matches[0];
        assert_eq!(m.document_type, "Resolution");
        assert_eq!(m.relevance_score, 0.9);
        assert_eq!(m.issuing_body, "Unknown");
        assert_eq!(m.title, "Untitled");
        assert_eq!(m.summary, "No summary available");
        assert_eq!(m.source, "DOGA");
        assert_eq!(m.metadata.category, "Unknown");
        assert_eq!(m.metadata.procedure_code, None);
        assert!(!out.parse_failed());
    }

    #[test]
    fn non_json_falls_back_with_error_flag() {
        let out = norm("sorry, I cannot help");
        assert!(out.matches.is_empty());
        assert_eq!(out.metadata["error"], json!(PARSE_ERROR_MESSAGE));
        assert!(out.parse_failed());

        assert!(norm("").parse_failed());
        assert!(norm("{ broken").parse_failed());
    }

    #[test]
    fn model_written_error_keys_are_not_a_parse_failure() {
        let out = norm(r#"{"matches":[],"metadata":{"parse_error":true,"error":"none found"}}"#);
        assert!(!out.parse_failed());
        assert_eq!(out.metadata["error"], json!("none found"));
    }

    #[test]
    fn missing_or_wrong_matches_list_becomes_empty() {
        let out = norm(r#"{"metadata":{"note":"nothing relevant"}}"#);
        assert!(out.matches.is_empty());
        assert_eq!(out.metadata["note"], json!("nothing relevant"));
        assert!(!out.parse_failed());

        let out = norm(r#"{"matches":"none"}"#);
        assert!(out.matches.is_empty());
        assert!(out.metadata.is_empty());

        let out = norm(r#"[1, 2, 3]"#);
        assert!(out.matches.is_empty());
    }

    #[test]
    fn fenced_and_wrapped_json_is_recovered() {
        let fenced = "```json\n{\"matches\":[{\"title\":\"ORDEN\"}]}\n```";
        assert_eq!(norm(fenced).matches[0].title, "ORDEN");

        let chatty = "Here is the analysis:\n{\"matches\":[{\"title\":\"EDICTO\"}]}\nHope it helps.";
        assert_eq!(norm(chatty).matches[0].title, "EDICTO");
    }

    #[test]
    fn summary_prefers_model_summary_then_content() {
        let out = norm(
            r#"{"matches":[
                {"content":"Full text of the order","summary":"Short"},
                {"content":"Full text of the order"},
                {"summary":"Orphan summary"}
            ]}"#,
        );
        assert_eq!(out.matches[0].summary, "Short");
        assert_eq!(out.matches[1].summary, "Full text of the order");
        assert_eq!(out.matches[2].summary, NO_SUMMARY);
    }

    #[test]
    fn long_content_summary_is_capped() {
        let content = "á".repeat(500);
        let raw = json!({ "matches": [{ "content": content }] }).to_string();
        let m = &norm(&raw).matches[0];
        assert_eq!(m.summary.chars().count(), 200);
        assert_eq!(m.content.chars().count(), 500);
    }

    #[test]
    fn scores_are_coerced_and_clamped() {
        let out = norm(
            r#"{"matches":[
                {"relevance_score":"0.75"},
                {"relevance_score":7},
                {"relevance_score":-1},
                {"relevance_score":"high"},
                {"relevance_score":null}
            ]}"#,
        );
        let scores: Vec<f64> = out.matches.iter().map(|m| m.relevance_score).collect();
        assert_eq!(scores, vec![0.75, 1.0, 0.0, 0.5, 0.5]);
    }

    #[test]
    fn nested_metadata_and_aliases() {
        let out = norm(
            r#"{"matches":[
                {"metadata":{"category":"III. Otras disposiciones","procedure_code":"ED531F"},
                 "subcategory":"Servicio Gallego de Salud",
                 "url":"https://www.xunta.gal/dog/x.html",
                 "dates":{"publication_date":"2025-01-16"}},
                {"metadata":"not an object","category":"  "}
            ]}"#,
        );
        let a = &out.matches[0];
        assert_eq!(a.metadata.category, "III. Otras disposiciones");
        assert_eq!(a.metadata.subcategory, "Servicio Gallego de Salud");
        assert_eq!(a.metadata.procedure_code.as_deref(), Some("ED531F"));
        assert_eq!(a.source_url, "https://www.xunta.gal/dog/x.html");
        assert_eq!(a.publication_date, "2025-01-16");

        let b = &out.matches[1];
        assert_eq!(b.metadata.category, "Unknown");
        assert_eq!(b.metadata.subcategory, "Unknown");
    }

    #[test]
    fn non_object_elements_keep_their_slot() {
        let out = norm(r#"{"matches":[42, {"title":"B"}]}"#);
        assert_eq!(out.matches.len(), 2);
        assert_eq!(out.matches[0].title, "Untitled");
        assert_eq!(out.matches[1].title, "B");
    }

    #[test]
    fn snapshot_defaults_fill_date_and_link() {
        let defaults = MatchDefaults {
            publication_date: "2025-01-16".into(),
            source_url: "https://feed.example/rss".into(),
        };
        let out = normalize_response(r#"{"matches":[{}]}"#, &defaults);
        assert_eq!(out.matches[0].publication_date, "2025-01-16");
        assert_eq!(out.matches[0].source_url, "https://feed.example/rss");
    }

    #[test]
    fn normalizing_twice_is_stable() {
        let first = norm(
            r#"{"matches":[
                {"document_type":"ORDER","content":"Texto completo","relevance_score":0.3,
                 "metadata":{"procedure_code":"PR001"}},
                {"title":"Only a title"}
            ]}"#,
        );
        let again = json!({ "matches": first.matches }).to_string();
        let second = norm(&again);
        assert_eq!(first.matches, second.matches);
    }
}
