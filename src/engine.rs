// src/engine.rs
//! Batch engine: one feed fetch, then every query analysed concurrently.
//!
//! Ordering: results are collected by input index, never by completion time.
//! Isolation: each branch turns its own delegate failure into an error-carrying
//! result, so one failing query never cancels or fails its siblings. Only feed
//! ingestion (which happens before fan-out) can fail the whole batch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use metrics::{counter, describe_counter, histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::analyze::normalize::{normalize_response, MatchDefaults};
use crate::analyze::schema::{apply_limit, max_relevance, AnalysisResult};
use crate::analyze::{clean_query, compose_prompt, prompt_id, DynDelegate};
use crate::error::{AppError, DelegateError};
use crate::ingest::{dates::to_iso_date, FeedInfo, FeedSource};

/// Result metadata keys only the pipeline may set.
const FAILURE_KEYS: [&str; 3] = ["error", "parse_error", "delegate_error"];

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("analyze_batches_total", "Batches that passed validation.");
        describe_counter!("analyze_queries_total", "Queries analysed.");
        describe_counter!("delegate_calls_total", "Language model calls.");
        describe_counter!("delegate_errors_total", "Language model calls that failed.");
    });
}

/// Validated `POST /analyze-text` body.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub texts: Vec<String>,
    pub user_id: Option<String>,
    pub subscription_id: Option<String>,
    /// Request metadata keys other than the two ids; copied into every result.
    pub extra_metadata: Map<String, Value>,
    /// `<= 0` means unlimited.
    pub limit: i64,
    pub date: Option<String>,
}

impl BatchRequest {
    /// Validate a raw JSON body. `texts` must be a non-empty array of strings.
    pub fn from_json(body: &Value, default_limit: i64) -> Result<Self, AppError> {
        let items = body
            .get("texts")
            .and_then(Value::as_array)
            .filter(|a| !a.is_empty())
            .ok_or_else(AppError::texts_required)?;

        let texts = items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| AppError::Validation("Every text prompt must be a string".into()))?;

        let mut extra_metadata = body
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let user_id = extra_metadata.remove("user_id").and_then(id_value);
        let subscription_id = extra_metadata.remove("subscription_id").and_then(id_value);

        let limit = match body.get("limit") {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(default_limit),
            _ => default_limit,
        };

        let date = body
            .get("date")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(to_iso_date);

        Ok(Self {
            texts,
            user_id,
            subscription_id,
            extra_metadata,
            limit,
            date,
        })
    }
}

fn id_value(v: Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchMetadata {
    pub user_id: Option<String>,
    pub subscription_id: Option<String>,
    pub total_items_processed: usize,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchResponse {
    pub query_date: String,
    pub doga_info: FeedInfo,
    pub results: Vec<AnalysisResult>,
    pub metadata: BatchMetadata,
}

pub struct Engine {
    feed: Arc<dyn FeedSource>,
    delegate: DynDelegate,
    delegate_timeout: Duration,
}

impl Engine {
    pub fn new(feed: Arc<dyn FeedSource>, delegate: DynDelegate, delegate_timeout: Duration) -> Self {
        Self {
            feed,
            delegate,
            delegate_timeout,
        }
    }

    pub fn delegate_name(&self) -> &'static str {
        self.delegate.provider_name()
    }

    pub async fn run_batch(&self, req: BatchRequest, req_id: &str) -> Result<BatchResponse, AppError> {
        ensure_metrics_described();
        counter!("analyze_batches_total").increment(1);

        tracing::debug!(%req_id, url = %self.feed.url(), "fetching DOGA RSS feed");
        let snapshot = self.feed.fetch_snapshot().await?;
        tracing::debug!(%req_id, entries = snapshot.entries.len(), "DOGA content fetched");

        let started = Instant::now();
        let serialized = snapshot.serialized_entries();
        let defaults = MatchDefaults::from_snapshot(&snapshot);

        tracing::debug!(%req_id, prompt_count = req.texts.len(), "processing prompts");
        let branches = req
            .texts
            .iter()
            .enumerate()
            .map(|(index, text)| self.run_query(index, text, &serialized, &defaults, &req, req_id));
        let (results, failures): (Vec<AnalysisResult>, Vec<bool>) =
            join_all(branches).await.into_iter().unzip();

        let elapsed = started.elapsed();
        histogram!("analyze_batch_ms").record(elapsed.as_secs_f64() * 1_000.0);
        let failed = failures.iter().filter(|f| **f).count();
        tracing::info!(
            %req_id,
            results = results.len(),
            failed,
            elapsed_ms = elapsed.as_millis() as u64,
            "all analyses completed"
        );

        Ok(BatchResponse {
            query_date: req
                .date
                .clone()
                .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string()),
            doga_info: snapshot.info(),
            results,
            metadata: BatchMetadata {
                user_id: req.user_id,
                subscription_id: req.subscription_id,
                total_items_processed: snapshot.entries.len(),
                processing_time_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            },
        })
    }

    /// One query branch. Always yields a result, plus whether it failed.
    async fn run_query(
        &self,
        index: usize,
        text: &str,
        serialized_entries: &str,
        defaults: &MatchDefaults,
        req: &BatchRequest,
        req_id: &str,
    ) -> (AnalysisResult, bool) {
        counter!("analyze_queries_total").increment(1);
        let pid = prompt_id(text);

        let cleaned = clean_query(text);
        let prompt = compose_prompt(&cleaned, serialized_entries);
        tracing::debug!(
            %req_id,
            prompt_index = index,
            prompt_id = %pid,
            combined_len = prompt.len(),
            "starting analysis"
        );

        // (matches, model metadata, pipeline failure marker)
        let (mut matches, mut model_metadata, failure) = match self.call_delegate(&prompt).await {
            Ok(raw) => {
                let n = normalize_response(&raw, defaults);
                tracing::debug!(
                    %req_id,
                    prompt_index = index,
                    prompt_id = %pid,
                    matches = n.matches.len(),
                    parse_failed = n.parse_failed(),
                    "analysis completed"
                );
                if n.parse_failed() {
                    (n.matches, Map::new(), Some(n.metadata))
                } else {
                    (n.matches, n.metadata, None)
                }
            }
            Err(e) => {
                counter!("delegate_errors_total", "provider" => self.delegate.provider_name())
                    .increment(1);
                tracing::error!(
                    %req_id,
                    prompt_index = index,
                    prompt_id = %pid,
                    error = %e,
                    "analysis delegate failed"
                );
                (Vec::new(), Map::new(), Some(delegate_failure(&e)))
            }
        };
        apply_limit(&mut matches, req.limit);

        // Error markers belong to the pipeline, and the caller's passthrough wins over the model.
        let owned_by_pipeline = |k: &String| FAILURE_KEYS.contains(&k.as_str());
        model_metadata.retain(|k, _| !owned_by_pipeline(k));
        let mut metadata = model_metadata;
        metadata.extend(
            req.extra_metadata
                .iter()
                .filter(|(k, _)| !owned_by_pipeline(k))
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        let failed = failure.is_some();
        if let Some(marker) = failure {
            metadata.extend(marker);
        }
        metadata.insert("match_count".into(), Value::from(matches.len()));
        metadata.insert(
            "max_relevance".into(),
            max_relevance(&matches).map_or(Value::Null, Value::from),
        );
        metadata.insert("user_id".into(), opt_string(&req.user_id));
        metadata.insert("subscription_id".into(), opt_string(&req.subscription_id));

        let result = AnalysisResult {
            prompt: text.to_string(),
            matches,
            metadata,
        };
        (result, failed)
    }

    async fn call_delegate(&self, prompt: &str) -> Result<String, DelegateError> {
        counter!("delegate_calls_total", "provider" => self.delegate.provider_name()).increment(1);
        match tokio::time::timeout(self.delegate_timeout, self.delegate.analyze(prompt)).await {
            Ok(res) => res,
            Err(_) => Err(DelegateError::Timeout(self.delegate_timeout.as_secs())),
        }
    }
}

fn delegate_failure(e: &DelegateError) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("error".into(), Value::String(e.to_string()));
    metadata.insert("delegate_error".into(), Value::Bool(true));
    metadata
}

fn opt_string(v: &Option<String>) -> Value {
    v.as_ref().map_or(Value::Null, |s| Value::String(s.clone()))
}
