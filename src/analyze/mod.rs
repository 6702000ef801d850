// src/analyze/mod.rs
//! Per-query pipeline pieces: query cleanup, prompt composition, delegate, normalization.

pub mod ai_adapter;
pub mod normalize;
pub mod schema;

use once_cell::sync::Lazy;
use regex::Regex;

pub use ai_adapter::{build_delegate, AnalysisDelegate, DynDelegate, MockDelegate};
pub use normalize::{normalize_response, MatchDefaults, NormalizedResponse};
pub use schema::{AnalysisMatch, AnalysisResult, MatchMetadata};

static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Collapse whitespace runs to one space and trim.
pub fn clean_query(raw: &str) -> String {
    RE_WS.replace_all(raw, " ").trim().to_string()
}

/// `User Query: <query>\n\nDOGA Content: <entries>`. No escaping, no truncation.
pub fn compose_prompt(query: &str, serialized_entries: &str) -> String {
    format!("User Query: {query}\n\nDOGA Content: {serialized_entries}")
}

/// Short stable id for a query, so logs never carry the raw text.
pub fn prompt_id(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_query_collapses_and_trims() {
        assert_eq!(clean_query("  find \n\t resolutions   about  grants "), "find resolutions about grants");
        assert_eq!(clean_query("   "), "");
    }

    #[test]
    fn compose_prompt_uses_two_part_template() {
        let p = compose_prompt("find orders", "[]");
        assert_eq!(p, "User Query: find orders\n\nDOGA Content: []");
    }

    #[test]
    fn prompt_id_is_short_and_stable() {
        let a = prompt_id("find resolutions");
        assert_eq!(a.len(), 12);
        assert_eq!(a, prompt_id("find resolutions"));
        assert_ne!(a, prompt_id("find orders"));
    }
}
