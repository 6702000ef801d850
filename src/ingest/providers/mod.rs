// src/ingest/providers/mod.rs
pub mod doga_rss;
