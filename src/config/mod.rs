// src/config/mod.rs
//! Process configuration: optional TOML file overlaid by environment variables.

pub mod ai;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub use ai::{DelegateConfig, Provider};

// --- env defaults & names ---
pub const DEFAULT_CONFIG_PATH: &str = "config/doga.toml";
pub const DEFAULT_FEED_URL: &str =
    "https://www.xunta.gal/diario-oficial-galicia/rss/Sumario_es.rss";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_LOG_LEVEL: &str = "debug";
pub const DEFAULT_FEED_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_MATCH_LIMIT: i64 = 5;

pub const ENV_CONFIG_PATH: &str = "DOGA_CONFIG_PATH";
pub const ENV_PORT: &str = "PORT";
pub const ENV_BIND_ADDR: &str = "BIND_ADDR";
pub const ENV_FEED_URL: &str = "DOGA_URL";
pub const ENV_FEED_TIMEOUT_SECS: &str = "FEED_TIMEOUT_SECS";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";
pub const ENV_MATCH_LIMIT: &str = "DEFAULT_MATCH_LIMIT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Compact
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub port: u16,
    pub feed_url: String,
    pub feed_timeout_secs: u64,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Match limit used when a request does not carry one. `<= 0` means unlimited.
    pub default_limit: i64,
    pub ai: DelegateConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            port: DEFAULT_PORT,
            feed_url: DEFAULT_FEED_URL.to_string(),
            feed_timeout_secs: DEFAULT_FEED_TIMEOUT_SECS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_format: LogFormat::Compact,
            default_limit: DEFAULT_MATCH_LIMIT,
            ai: DelegateConfig::default(),
        }
    }
}

/// On-disk shape of `config/doga.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub bind_addr: Option<String>,
    pub port: Option<u16>,
    pub feed_url: Option<String>,
    pub feed_timeout_secs: Option<u64>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub default_limit: Option<i64>,
    #[serde(default)]
    pub ai: ai::FileAiConfig,
}

impl FileConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("parsing config {}", path.display()))
    }
}

impl AppConfig {
    /// Load using the process environment:
    /// 1) $DOGA_CONFIG_PATH (must exist when set)
    /// 2) config/doga.toml (optional)
    /// 3) env vars override file values
    pub fn load() -> Result<Self> {
        let file = match std::env::var(ENV_CONFIG_PATH) {
            Ok(p) => FileConfig::load_from_file(PathBuf::from(p))?,
            Err(_) => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    FileConfig::load_from_file(default)?
                } else {
                    FileConfig::default()
                }
            }
        };
        Self::from_sources(file, |k| std::env::var(k).ok())
    }

    /// Merge a file config with an env lookup. Env wins; blank env values are ignored.
    pub fn from_sources<F>(file: FileConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |k: &str| env(k).filter(|v| !v.trim().is_empty());
        let mut cfg = AppConfig::default();

        if let Some(v) = env(ENV_BIND_ADDR).or(file.bind_addr) {
            cfg.bind_addr = v;
        }
        if let Some(v) = env(ENV_PORT) {
            cfg.port = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_PORT} must be a port number, got {v:?}"))?;
        } else if let Some(p) = file.port {
            cfg.port = p;
        }
        if let Some(v) = env(ENV_FEED_URL).or(file.feed_url) {
            cfg.feed_url = v.trim().to_string();
        }
        if let Some(v) = parse_env(&env, ENV_FEED_TIMEOUT_SECS)?.or(file.feed_timeout_secs) {
            cfg.feed_timeout_secs = v.max(1);
        }
        if let Some(v) = env(ENV_LOG_LEVEL).or(file.log_level) {
            cfg.log_level = v.trim().to_ascii_lowercase();
        }
        if let Some(v) = env(ENV_LOG_FORMAT).or(file.log_format) {
            cfg.log_format = LogFormat::parse(&v);
        }
        if let Some(v) = parse_env(&env, ENV_MATCH_LIMIT)?.or(file.default_limit) {
            cfg.default_limit = v;
        }

        cfg.ai = DelegateConfig::from_sources(file.ai, &env)?;
        Ok(cfg)
    }
}

pub(crate) fn parse_env<F, T>(env: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(None),
    }
}
