// src/ingest/mod.rs
pub mod dates;
pub mod providers;
pub mod types;

use metrics::{describe_counter, describe_histogram};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;

pub use providers::doga_rss::DogaRssSource;
pub use types::{FeedEntry, FeedInfo, FeedSnapshot, FeedSource};

/// Separator the gazette puts between category and issuing body inside `<description>`.
pub const CATEGORY_DELIMITER: &str = "</br>";

static RE_ISSUE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Diario núm,\s*(\d+)").expect("valid issue number regex"));
static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("valid tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feed_fetch_total", "Feed downloads attempted.");
        describe_counter!("feed_errors_total", "Feed fetch/parse/shape failures.");
        describe_counter!("feed_entries_total", "Entries extracted from the feed.");
        describe_histogram!("feed_parse_ms", "Feed parse time in milliseconds.");
    });
}

/// Decode entities, drop markup, collapse whitespace.
pub fn clean_field(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    let stripped = RE_TAGS.replace_all(&decoded, " ");
    RE_WS.replace_all(&stripped, " ").trim().to_string()
}

/// Split a raw item description into (category, subcategory).
///
/// The gazette writes `Category</br>Issuing body</br>...`. Only the first two
/// segments are used; a missing segment yields an empty string.
pub fn split_category(description: &str) -> (String, String) {
    let mut parts = description.split(CATEGORY_DELIMITER);
    let category = parts.next().map(clean_field).unwrap_or_default();
    let subcategory = parts.next().map(clean_field).unwrap_or_default();
    (category, subcategory)
}

/// Issue number from the channel description ("... Diario núm, 10 ..."). Empty when absent.
pub fn extract_issue_number(channel_description: &str) -> String {
    RE_ISSUE_NUMBER
        .captures(channel_description)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}
