// src/analyze/schema.rs
//! Caller-facing match schema. Every field is always populated.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Constant source label attached to every match.
pub const SOURCE_LABEL: &str = "DOGA";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchMetadata {
    pub category: String,
    pub subcategory: String,
    pub procedure_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisMatch {
    pub document_type: String,
    pub issuing_body: String,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub publication_date: String,
    /// Always within `[0, 1]`.
    pub relevance_score: f64,
    pub source_url: String,
    pub source: String,
    pub metadata: MatchMetadata,
}

/// Outcome of one query: the original prompt, its matches and free-form metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub prompt: String,
    pub matches: Vec<AnalysisMatch>,
    pub metadata: Map<String, Value>,
}

/// Keep the first `limit` matches in delegate order. `limit <= 0` keeps all.
pub fn apply_limit(matches: &mut Vec<AnalysisMatch>, limit: i64) {
    if limit > 0 {
        let cap = usize::try_from(limit).unwrap_or(usize::MAX);
        matches.truncate(cap);
    }
}

/// Highest relevance among the matches, `None` for an empty list.
pub fn max_relevance(matches: &[AnalysisMatch]) -> Option<f64> {
    matches
        .iter()
        .map(|m| m.relevance_score)
        .fold(None, |acc, s| Some(acc.map_or(s, |a: f64| a.max(s))))
}
