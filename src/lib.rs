// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod analyze;
pub mod api;
pub mod api_docs;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod metrics;

pub use crate::api::{router, AppState};
pub use crate::config::AppConfig;
pub use crate::engine::{BatchRequest, BatchResponse, Engine};
pub use crate::error::{AppError, DelegateError, FeedError};
