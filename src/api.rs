// src/api.rs
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, Request},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::analyze::{build_delegate, DynDelegate};
use crate::api_docs::api_docs;
use crate::config::AppConfig;
use crate::engine::{BatchRequest, BatchResponse, Engine};
use crate::error::AppError;
use crate::ingest::{DogaRssSource, FeedSource};

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Match limit when the request carries none.
    pub default_limit: i64,
}

impl AppState {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        delegate: DynDelegate,
        delegate_timeout: Duration,
        default_limit: i64,
    ) -> Self {
        Self {
            engine: Arc::new(Engine::new(feed, delegate, delegate_timeout)),
            default_limit,
        }
    }

    /// Wire the production collaborators from config.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let feed = DogaRssSource::from_url(
            cfg.feed_url.clone(),
            Duration::from_secs(cfg.feed_timeout_secs),
        )?;
        let delegate = build_delegate(&cfg.ai)?;
        tracing::info!(
            feed_url = %cfg.feed_url,
            provider = delegate.provider_name(),
            model = %cfg.ai.model,
            "app state ready"
        );
        Ok(Self::new(
            Arc::new(feed),
            delegate,
            Duration::from_secs(cfg.ai.timeout_secs),
            cfg.default_limit,
        ))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/help", get(help))
        .route("/analyze-text", post(analyze_text))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
            let req_id = request_id(req.headers());
            tracing::info_span!("http", method = %req.method(), uri = %req.uri(), %req_id)
        }))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string()
}

/// A panicking handler still answers with the standard 500 envelope.
fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| err.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(panic = %detail, "handler panicked");
    AppError::Internal("Internal server error".to_string()).into_response()
}

async fn help() -> Json<Value> {
    Json(api_docs())
}

async fn analyze_text(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<BatchResponse>, AppError> {
    let req_id = request_id(&headers);

    // A body that is not JSON at all gets the same 400 as a missing `texts`.
    let Json(body) = body.map_err(|e| {
        tracing::debug!(%req_id, error = %e, "request body is not valid JSON");
        AppError::texts_required()
    })?;

    let req = BatchRequest::from_json(&body, state.default_limit).inspect_err(|e| {
        tracing::debug!(%req_id, error = %e, "invalid analyze-text request");
    })?;

    let resp = state.engine.run_batch(req, &req_id).await?;
    Ok(Json(resp))
}
