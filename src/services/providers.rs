// AI Provider Service
// Gemini (native generateContent) and Groq (OpenAI-compatible chat) calls.
// Provider order and fallback are chosen per call through ProviderStrategy.

use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::config_store::{AppConfig, ConfigStore};

const GEMINI_DEFAULT_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GROQ_DEFAULT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

pub const GEMINI_DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const GROQ_DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

/// Groq rejects very large prompts; longer user prompts are cut here.
const GROQ_PROMPT_LIMIT: usize = 45_000;
const HTTP_TIMEOUT_SECS: u64 = 80;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Missing content in response")]
    MissingContent,
    #[error("JSON parse error: {0}")]
    JsonError(String),
    #[error("API key not configured")]
    MissingApiKey,
}

impl ProviderError {
    /// Rejected or absent credentials: 401/403, or a 400 that names the key.
    pub fn is_credential_failure(&self) -> bool {
        match self {
            Self::MissingApiKey => true,
            Self::ApiError { status, message } => {
                if *status == 401 || *status == 403 {
                    return true;
                }
                let lower = message.to_lowercase();
                *status == 400 && (lower.contains("api key") || lower.contains("api_key"))
            }
            _ => false,
        }
    }

    /// The service could not be reached at all.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Self::HttpError(e) if e.is_connect() || e.is_timeout() || e.is_request())
    }

    /// Credential failures outrank transport failures, which outrank the rest.
    fn severity(&self) -> u8 {
        if self.is_credential_failure() {
            2
        } else if self.is_transport_failure() {
            1
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Groq,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Gemini, ProviderKind::Groq];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Groq => "groq",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "gemini" | "google" => Some(Self::Gemini),
            "groq" | "llama" => Some(Self::Groq),
            _ => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Gemini => GEMINI_DEFAULT_MODEL,
            Self::Groq => GROQ_DEFAULT_MODEL,
        }
    }

    fn env_keys(&self) -> [&'static str; 2] {
        match self {
            Self::Gemini => ["GEMINI_API_KEY", "TESIS_FORENSICS_GEMINI_API_KEY"],
            Self::Groq => ["GROQ_API_KEY", "TESIS_FORENSICS_GROQ_API_KEY"],
        }
    }
}

/// `name[:model]`, e.g. `gemini:gemini-1.5-pro`.
pub fn parse_provider(value: &str) -> Option<(ProviderKind, Option<String>)> {
    let mut parts = value.splitn(2, ':');
    let kind = ProviderKind::parse(parts.next().unwrap_or_default())?;
    let model = parts
        .next()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string);
    Some((kind, model))
}

/// One provider the judge may call, with its resolved credentials.
#[derive(Debug, Clone)]
pub struct ProviderRoute {
    pub kind: ProviderKind,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl ProviderRoute {
    pub fn new(kind: ProviderKind, api_key: Option<String>) -> Self {
        Self {
            kind,
            model: kind.default_model().to_string(),
            api_key,
            base_url: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn label(&self) -> String {
        format!("{}:{}", self.kind.name(), self.model)
    }
}

/// Ordered provider chain for one call. Owned by the caller; nothing about a
/// failed provider is remembered across calls.
#[derive(Debug, Clone)]
pub struct ProviderStrategy {
    routes: Vec<ProviderRoute>,
    fallback_on_error: bool,
}

impl ProviderStrategy {
    pub fn new(routes: Vec<ProviderRoute>) -> Self {
        Self {
            routes,
            fallback_on_error: true,
        }
    }

    pub fn single(route: ProviderRoute) -> Self {
        Self {
            routes: vec![route],
            fallback_on_error: false,
        }
    }

    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_on_error = enabled;
        self
    }

    /// Default provider first, then the remaining enabled providers.
    pub fn from_config(config: &AppConfig, store: Option<&ConfigStore>) -> Self {
        let head = config
            .default_provider
            .as_deref()
            .and_then(ProviderKind::parse)
            .unwrap_or(ProviderKind::Gemini);

        let mut order = vec![head];
        order.extend(ProviderKind::ALL.iter().copied().filter(|k| *k != head));

        let routes = order
            .into_iter()
            .filter_map(|kind| {
                let provider_cfg = config.providers.get(kind.name());
                if provider_cfg.is_some_and(|p| !p.enabled) {
                    return None;
                }
                let key = get_api_key(kind, store).or_else(|| {
                    config
                        .api_keys
                        .get(kind.name())
                        .map(|k| k.trim().to_string())
                        .filter(|k| is_usable_key(kind, k))
                });
                let mut route = ProviderRoute::new(kind, key);
                if let Some(cfg) = provider_cfg {
                    if let Some(model) = cfg.model.as_deref().filter(|m| !m.trim().is_empty()) {
                        route = route.with_model(model);
                    }
                    if let Some(url) = cfg.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
                        route = route.with_base_url(url);
                    }
                }
                Some(route)
            })
            .collect();

        Self::new(routes)
    }

    pub fn routes(&self) -> &[ProviderRoute] {
        &self.routes
    }

    pub fn fallback_on_error(&self) -> bool {
        self.fallback_on_error
    }

    pub fn has_credentials(&self) -> bool {
        self.routes.iter().any(|r| r.api_key.is_some())
    }
}

/// A system/user prompt pair expecting a text (usually JSON) completion.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub system: String,
    pub user: String,
    pub temperature: f64,
    pub max_tokens: i32,
    pub json_mode: bool,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: i32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageResponse>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
    reasoning_content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResult {
    pub content: String,
    pub latency_ms: i64,
    pub provider: String,
}

pub struct ProviderClient {
    client: Client,
    gemini_url: String,
    groq_url: String,
}

impl Default for ProviderClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self::with_client(client)
    }

    pub fn with_proxy(proxy_url: &str) -> Result<Self, ProviderError> {
        let proxy = reqwest::Proxy::all(proxy_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .proxy(proxy)
            .build()?;
        Ok(Self::with_client(client))
    }

    /// Honour the proxy section of the config when it is enabled.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        match config.proxy.as_ref().filter(|p| p.enabled) {
            Some(proxy) => match proxy.https.as_deref().or(proxy.http.as_deref()) {
                Some(url) => Self::with_proxy(url),
                None => Ok(Self::new()),
            },
            None => Ok(Self::new()),
        }
    }

    fn with_client(client: Client) -> Self {
        let gemini_url = env::var("GEMINI_API_URL").unwrap_or_else(|_| GEMINI_DEFAULT_URL.to_string());
        let groq_url = env::var("GROQ_API_URL").unwrap_or_else(|_| GROQ_DEFAULT_URL.to_string());
        Self {
            client,
            gemini_url,
            groq_url,
        }
    }

    /// Walk the strategy's routes in order. Routes without a key are skipped;
    /// a failing route hands over to the next one only when fallback is enabled.
    pub async fn generate(
        &self,
        strategy: &ProviderStrategy,
        request: &GenerateRequest,
    ) -> Result<ChatResult, ProviderError> {
        let mut last_err: Option<ProviderError> = None;

        for route in strategy.routes() {
            let Some(api_key) = route.api_key.as_deref() else {
                debug!("[PROVIDER] skipping {} (no API key)", route.label());
                continue;
            };

            info!("[PROVIDER] request provider={} model={}", route.kind.name(), route.model);
            let result = match route.kind {
                ProviderKind::Gemini => {
                    let base = route.base_url.as_deref().unwrap_or(&self.gemini_url);
                    self.call_gemini_api(base, &route.model, api_key, request).await
                }
                ProviderKind::Groq => {
                    let url = route.base_url.as_deref().unwrap_or(&self.groq_url);
                    self.call_chat_api(url, &route.model, api_key, request).await
                }
            };

            match result {
                Ok(mut chat) => {
                    chat.provider = route.label();
                    info!(
                        "[PROVIDER] ok provider={} latency_ms={}",
                        chat.provider, chat.latency_ms
                    );
                    return Ok(chat);
                }
                Err(e) if strategy.fallback_on_error() => {
                    warn!("[PROVIDER] {} failed, trying next route: {}", route.label(), e);
                    // A rejected key must survive a later route's outage.
                    if last_err.as_ref().map_or(true, |prev| e.severity() >= prev.severity()) {
                        last_err = Some(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(ProviderError::MissingApiKey))
    }

    async fn call_gemini_api(
        &self,
        base_url: &str,
        model: &str,
        api_key: &str,
        request: &GenerateRequest,
    ) -> Result<ChatResult, ProviderError> {
        let url = format!("{}/models/{}:generateContent", base_url.trim_end_matches('/'), model);
        let mime = if request.json_mode { "application/json" } else { "text/plain" };

        let mut body = serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": request.user}]}],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
                "responseMimeType": mime
            }
        });
        if !request.system.is_empty() {
            body["systemInstruction"] = serde_json::json!({"parts": [{"text": request.system}]});
        }

        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let latency_ms = start.elapsed().as_millis() as i64;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        // {"candidates":[{"content":{"parts":[{"text":"..."}]}}]}
        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::JsonError(e.to_string()))?;

        let content = data["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string())
            .ok_or(ProviderError::MissingContent)?;

        Ok(ChatResult {
            content,
            latency_ms,
            provider: String::new(),
        })
    }

    async fn call_chat_api(
        &self,
        url: &str,
        model: &str,
        api_key: &str,
        request: &GenerateRequest,
    ) -> Result<ChatResult, ProviderError> {
        let user = truncate_prompt(&request.user, GROQ_PROMPT_LIMIT);

        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: request.system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: user,
        });

        let chat_request = ChatRequest {
            model: model.to_string(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request.json_mode.then(|| ResponseFormat {
                r#type: "json_object".to_string(),
            }),
        };

        let start = Instant::now();

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&chat_request)
            .send()
            .await?;

        let latency_ms = start.elapsed().as_millis() as i64;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let data: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::JsonError(e.to_string()))?;

        let message = data
            .choices
            .as_ref()
            .and_then(|c| c.first())
            .and_then(|c| c.message.as_ref());

        let mut content = message
            .and_then(|m| m.content.clone())
            .filter(|c| !c.trim().is_empty());

        // Reasoning models sometimes leave the JSON only in reasoning_content.
        if content.is_none() {
            if let Some(reasoning) = message.and_then(|m| m.reasoning_content.as_deref()) {
                content = json_object_re().find(reasoning).map(|m| m.as_str().to_string());
            }
        }

        let content = content.ok_or(ProviderError::MissingContent)?;

        Ok(ChatResult {
            content,
            latency_ms,
            provider: String::new(),
        })
    }
}

fn json_object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("json object regex"))
}

fn truncate_prompt(prompt: &str, limit: usize) -> String {
    if prompt.chars().count() <= limit {
        return prompt.to_string();
    }
    warn!("[PROVIDER] truncating prompt ({} chars)", prompt.chars().count());
    let cut: String = prompt.chars().take(limit).collect();
    format!("{}\n\n[...TRUNCATED...]", cut)
}

/// Reject obviously fake keys; Gemini keys have a recognisable shape.
pub fn is_usable_key(kind: ProviderKind, key: &str) -> bool {
    let key = key.trim();
    if key.is_empty() || key.to_uppercase().contains("PLACEHOLDER") {
        return false;
    }
    match kind {
        ProviderKind::Gemini => key.starts_with("AIza") && key.len() >= 35,
        ProviderKind::Groq => true,
    }
}

/// Get API key from environment, then from the config store.
pub fn get_api_key(kind: ProviderKind, store: Option<&ConfigStore>) -> Option<String> {
    for var in kind.env_keys() {
        if let Ok(val) = env::var(var) {
            let v = val.trim();
            if is_usable_key(kind, v) {
                return Some(v.to_string());
            }
        }
    }

    let store = store?;
    match store.get_api_key(kind.name()) {
        Ok(Some(key)) if is_usable_key(kind, &key) => Some(key.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            warn!("[PROVIDER] could not read API key from config: {}", e);
            None
        }
    }
}
