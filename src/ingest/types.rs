// src/ingest/types.rs
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// One official document as listed in the gazette feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub description: String,
    pub link: String,
    /// `YYYY-MM-DD` when the feed date could be parsed, raw feed text otherwise.
    pub publication_date: String,
    pub category: String,
    pub subcategory: String,
}

/// Feed-level metadata, as echoed back to callers under `doga_info`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedInfo {
    pub issue_number: String,
    pub publication_date: String,
    pub source_url: String,
}

/// One fetch of the feed. Shared read-only across every query of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSnapshot {
    pub entries: Vec<FeedEntry>,
    pub issue_number: String,
    pub publication_date: String,
    pub source_url: String,
}

impl FeedSnapshot {
    pub fn info(&self) -> FeedInfo {
        FeedInfo {
            issue_number: self.issue_number.clone(),
            publication_date: self.publication_date.clone(),
            source_url: self.source_url.clone(),
        }
    }

    /// Entries as the text block handed to the model.
    pub fn serialized_entries(&self) -> String {
        // Vec<FeedEntry> of plain strings cannot fail to serialize.
        serde_json::to_string_pretty(&self.entries).unwrap_or_else(|_| "[]".to_string())
    }
}

#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<FeedSnapshot, FeedError>;
    fn url(&self) -> &str;
}
