//! Analysis delegate: the external language model behind a trait object.
//!
//! The delegate is constructed once at startup and injected into the app
//! state. It is called once per query, without retries.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::{DelegateConfig, Provider};
use crate::error::DelegateError;

/// Instruction sent with every prompt. Describes the JSON the normalizer expects.
pub const SYSTEM_PROMPT: &str = "You are a DOGA (Diario Oficial de Galicia) analysis assistant. \
You receive a user query and the latest DOGA RSS items as JSON. Select the items relevant to the query \
and answer with JSON only, no prose, using exactly this shape: \
{\"matches\": [{\"document_type\": \"ORDER|RESOLUTION|ANNOUNCEMENT|EDICT|...\", \
\"issuing_body\": \"organization that issued the document\", \"title\": \"complete document title\", \
\"summary\": \"one sentence summary\", \"content\": \"main subject matter\", \
\"publication_date\": \"YYYY-MM-DD\", \"relevance_score\": 0.0-1.0, \"source_url\": \"item link\", \
\"metadata\": {\"category\": \"main category\", \"subcategory\": \"subcategory\", \
\"procedure_code\": \"official procedure code or null\"}}], \"metadata\": {}}. \
Order matches from most to least relevant. If nothing matches, return {\"matches\": [], \"metadata\": {}}.";

/// Boxed future returned by delegates.
pub type DelegateFuture<'a> = Pin<Box<dyn Future<Output = Result<String, DelegateError>> + Send + 'a>>;

/// Given a composed prompt, returns text believed to be JSON.
pub trait AnalysisDelegate: Send + Sync {
    fn analyze<'a>(&'a self, prompt: &'a str) -> DelegateFuture<'a>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynDelegate = Arc<dyn AnalysisDelegate>;

/// Factory: build the delegate selected by config.
///
/// * `Provider::Mock` returns [`MockDelegate::canned`].
/// * `Provider::OpenAi` without a credential returns a [`DisabledDelegate`], so the
///   service still starts and each query reports the configuration error.
pub fn build_delegate(cfg: &DelegateConfig) -> anyhow::Result<DynDelegate> {
    match cfg.provider {
        Provider::Mock => Ok(Arc::new(MockDelegate::canned())),
        Provider::Disabled => Ok(Arc::new(DisabledDelegate::new("AI provider is disabled"))),
        Provider::OpenAi if !cfg.has_credential() => {
            tracing::warn!("OPENAI_API_KEY is not set; analysis requests will fail per query");
            Ok(Arc::new(DisabledDelegate::new(
                "OPENAI_API_KEY environment variable is not set",
            )))
        }
        Provider::OpenAi => Ok(Arc::new(OpenAiDelegate::new(cfg)?)),
    }
}

// ------------------------------------------------------------
// OpenAI
// ------------------------------------------------------------

/// OpenAI Chat Completions delegate.
pub struct OpenAiDelegate {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiDelegate {
    pub fn new(cfg: &DelegateConfig) -> anyhow::Result<Self> {
        // The engine enforces the per-call timeout; this one only bounds a stuck socket.
        let http = reqwest::Client::builder()
            .user_agent(concat!("doga-analyzer/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(cfg.timeout_secs.saturating_add(5)))
            .build()
            .context("building OpenAI http client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", cfg.base_url),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String, DelegateError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            choices: Vec<Choice>,
            usage: Option<Usage>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct Usage {
            prompt_tokens: Option<u64>,
            completion_tokens: Option<u64>,
            total_tokens: Option<u64>,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.2,
            max_tokens: self.max_tokens,
        };

        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "sending request to OpenAI");
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| DelegateError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DelegateError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| DelegateError::Transport(format!("decoding completion: {e}")))?;

        if let Some(u) = &body.usage {
            tracing::debug!(
                prompt_tokens = u.prompt_tokens,
                completion_tokens = u.completion_tokens,
                total_tokens = u.total_tokens,
                "OpenAI response received"
            );
        }

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(DelegateError::EmptyResponse)
    }
}

impl AnalysisDelegate for OpenAiDelegate {
    fn analyze<'a>(&'a self, prompt: &'a str) -> DelegateFuture<'a> {
        Box::pin(self.complete(prompt))
    }
    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Disabled / mock
// ------------------------------------------------------------

/// Fails every call with `DelegateError::NotConfigured`.
pub struct DisabledDelegate {
    reason: String,
}

impl DisabledDelegate {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl AnalysisDelegate for DisabledDelegate {
    fn analyze<'a>(&'a self, _prompt: &'a str) -> DelegateFuture<'a> {
        let reason = self.reason.clone();
        Box::pin(async move { Err(DelegateError::NotConfigured(reason)) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

type ReplyFn = dyn Fn(&str) -> Result<String, DelegateError> + Send + Sync;
type LatencyFn = dyn Fn(&str) -> Duration + Send + Sync;

/// Deterministic delegate for tests and local runs.
pub struct MockDelegate {
    reply: Box<ReplyFn>,
    latency: Box<LatencyFn>,
}

impl MockDelegate {
    /// Same reply for every prompt.
    pub fn fixed(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::from_fn(move |_| Ok(reply.clone()))
    }

    /// Reply computed from the composed prompt.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&str) -> Result<String, DelegateError> + Send + Sync + 'static,
    {
        Self {
            reply: Box::new(f),
            latency: Box::new(|_| Duration::ZERO),
        }
    }

    /// Simulated network latency per prompt.
    pub fn with_latency<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Duration + Send + Sync + 'static,
    {
        self.latency = Box::new(f);
        self
    }

    /// Reply used by `AI_TEST_MODE=mock`.
    pub fn canned() -> Self {
        Self::fixed(
            r#"{"matches":[{"document_type":"ANNOUNCEMENT","issuing_body":"Mock","title":"Mock match","content":"Deterministic mock analysis","relevance_score":0.5}],"metadata":{"mock":true}}"#,
        )
    }
}

impl AnalysisDelegate for MockDelegate {
    fn analyze<'a>(&'a self, prompt: &'a str) -> DelegateFuture<'a> {
        Box::pin(async move {
            let wait = (self.latency)(prompt);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            (self.reply)(prompt)
        })
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}
