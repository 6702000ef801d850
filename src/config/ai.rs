// src/config/ai.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MAX_TOKENS: u32 = 2000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub const ENV_PROVIDER: &str = "AI_PROVIDER";
pub const ENV_TEST_MODE: &str = "AI_TEST_MODE";
pub const ENV_MODEL: &str = "OPENAI_MODEL";
pub const ENV_BASE_URL: &str = "OPENAI_BASE_URL";
pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_API_KEY_FILE: &str = "OPENAI_API_KEY_FILE";
pub const ENV_MAX_TOKENS: &str = "AI_MAX_TOKENS";
pub const ENV_TIMEOUT_SECS: &str = "AI_TIMEOUT_SECS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Mock,
    Disabled,
}

impl Provider {
    /// "openai" | "mock" | "disabled" (case-insensitive). Unknown names disable the delegate.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Provider::OpenAi,
            "mock" => Provider::Mock,
            _ => Provider::Disabled,
        }
    }
}

/// `[ai]` table of `config/doga.toml`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileAiConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// "ENV" means: read from OPENAI_API_KEY. Prefer the env var or a key file.
    pub api_key: Option<String>,
    pub api_key_file: Option<String>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
}

#[derive(Clone)]
pub struct DelegateConfig {
    pub provider: Provider,
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub max_tokens: u32,
    /// Upper bound for one delegate call; the batch never waits longer per query.
    pub timeout_secs: u64,
}

// Never print the key itself.
impl std::fmt::Debug for DelegateConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("key_len", &self.api_key.len())
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for DelegateConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl DelegateConfig {
    pub fn from_sources<F>(file: FileAiConfig, env: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = DelegateConfig::default();

        if let Some(p) = env(ENV_PROVIDER).or(file.provider) {
            cfg.provider = Provider::parse(&p);
        }
        // Deterministic local runs regardless of configured provider.
        if env(ENV_TEST_MODE).is_some_and(|v| v.trim() == "mock") {
            cfg.provider = Provider::Mock;
        }
        if let Some(m) = env(ENV_MODEL).or(file.model) {
            cfg.model = m.trim().to_string();
        }
        if let Some(u) = env(ENV_BASE_URL).or(file.base_url) {
            cfg.base_url = u.trim().trim_end_matches('/').to_string();
        }
        if let Some(n) = super::parse_env::<_, u32>(env, ENV_MAX_TOKENS)?.or(file.max_tokens) {
            cfg.max_tokens = n.max(1);
        }
        if let Some(n) = super::parse_env::<_, u64>(env, ENV_TIMEOUT_SECS)?.or(file.timeout_secs)
        {
            cfg.timeout_secs = n.max(1);
        }

        cfg.api_key = resolve_api_key(&file.api_key, &file.api_key_file, env)?;
        Ok(cfg)
    }

    pub fn has_credential(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Credential lookup order:
/// 1) $OPENAI_API_KEY
/// 2) secret file at $OPENAI_API_KEY_FILE (or `api_key_file` in the config file)
/// 3) `api_key` in the config file, unless it is the "ENV" marker
///
/// Missing credentials are not an error here; the delegate factory decides.
fn resolve_api_key<F>(
    file_key: &Option<String>,
    file_key_path: &Option<String>,
    env: &F,
) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(k) = env(ENV_API_KEY) {
        return Ok(k.trim().to_string());
    }
    if let Some(path) = env(ENV_API_KEY_FILE).or_else(|| file_key_path.clone()) {
        let key = fs::read_to_string(&path)
            .with_context(|| format!("reading API key secret from {path}"))?;
        return Ok(key.trim().to_string());
    }
    match file_key.as_deref().map(str::trim) {
        Some(k) if !k.eq_ignore_ascii_case("env") => Ok(k.to_string()),
        _ => Ok(String::new()),
    }
}
