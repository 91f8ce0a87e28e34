//! Text-in/text-out oracle calls, routed per task.

use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{LlmConfig, ProviderConfig, ProviderKind, TaskRoute};
use crate::error::{CurationError, Result};

pub const TASK_SUMMARIZE_FEED: &str = "summarize_feed";
pub const TASK_EXTRACT_SIGNALS: &str = "extract_signals";

pub trait Oracle {
    fn run(&self, task: &str, prompt: &str) -> Result<String>;
}

impl<F> Oracle for F
where
    F: Fn(&str, &str) -> Result<String>,
{
    fn run(&self, task: &str, prompt: &str) -> Result<String> {
        self(task, prompt)
    }
}

/// Oracle backed by the HTTP endpoint of the routed provider.
pub struct HttpOracle {
    llm: LlmConfig,
    agent: ureq::Agent,
}

impl HttpOracle {
    pub fn new(llm: &LlmConfig) -> Self {
        let timeout = Duration::from_millis(llm.timeout_ms);
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout(timeout)
            .build();
        Self {
            llm: llm.clone(),
            agent,
        }
    }

    /// Pick provider and model for a task, falling back to the default route
    /// when the routed provider's API key is not set.
    fn resolve(&self, task: &str) -> Result<(&ProviderConfig, &TaskRoute)> {
        let route = self
            .llm
            .task_routing
            .get(task)
            .ok_or_else(|| CurationError::oracle(task, "no routing for task"))?;

        let provider = self.provider(task, &route.provider)?;
        if key_missing(provider) {
            warn!(
                task,
                provider = %route.provider,
                fallback = %self.llm.default_route.provider,
                "API key not set, using default route"
            );
            let fallback = &self.llm.default_route;
            let provider = self.provider(task, &fallback.provider)?;
            if key_missing(provider) {
                return Err(CurationError::oracle(task, "API key not set for default provider"));
            }
            return Ok((provider, fallback));
        }
        Ok((provider, route))
    }

    fn provider(&self, task: &str, name: &str) -> Result<&ProviderConfig> {
        self.llm
            .providers
            .get(name)
            .ok_or_else(|| CurationError::oracle(task, format!("unknown provider {name}")))
    }

    fn call(&self, task: &str, provider: &ProviderConfig, model: &str, prompt: &str) -> Result<String> {
        let body = request_body(provider.kind, model, prompt, self.llm.temperature, self.llm.max_output_tokens);
        let mut request = self.agent.post(&endpoint(provider, model));
        match provider.kind {
            ProviderKind::Ollama => {}
            ProviderKind::Openai => {
                if let Some(key) = api_key(provider) {
                    request = request.set("Authorization", &format!("Bearer {key}"));
                }
            }
            ProviderKind::Anthropic => {
                let key = required_key(task, provider)?;
                request = request
                    .set("x-api-key", &key)
                    .set("anthropic-version", ANTHROPIC_VERSION);
            }
            ProviderKind::Google => {
                let key = required_key(task, provider)?;
                request = request.set("x-goog-api-key", &key);
            }
        }

        let response: Value = request
            .send_json(body)
            .map_err(|err| CurationError::oracle(task, err))?
            .into_json()
            .map_err(|err| CurationError::oracle(task, err))?;
        let pointer = text_pointer(provider.kind);
        response
            .pointer(pointer)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CurationError::oracle(task, format!("no text at {pointer}")))
    }
}

impl Oracle for HttpOracle {
    fn run(&self, task: &str, prompt: &str) -> Result<String> {
        let (provider, route) = self.resolve(task)?;
        info!(task, provider = %route.provider, model = %route.model, prompt_chars = prompt.len(), "oracle call");
        let text = self.call(task, provider, &route.model, prompt)?;
        info!(task, response_chars = text.len(), "oracle response");
        Ok(text)
    }
}

const ANTHROPIC_VERSION: &str = "2023-06-01";

fn endpoint(provider: &ProviderConfig, model: &str) -> String {
    let base = provider.base_url.trim_end_matches('/');
    match provider.kind {
        ProviderKind::Ollama => format!("{base}/api/generate"),
        ProviderKind::Openai => format!("{base}/chat/completions"),
        ProviderKind::Anthropic => format!("{base}/messages"),
        ProviderKind::Google => format!("{base}/models/{model}:generateContent"),
    }
}

fn request_body(kind: ProviderKind, model: &str, prompt: &str, temperature: f64, max_tokens: u32) -> Value {
    match kind {
        ProviderKind::Ollama => json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": temperature, "num_predict": max_tokens },
        }),
        ProviderKind::Openai => json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": temperature,
            "max_tokens": max_tokens,
        }),
        ProviderKind::Anthropic => json!({
            "model": model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": [{ "role": "user", "content": prompt }],
        }),
        ProviderKind::Google => json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": temperature, "maxOutputTokens": max_tokens },
        }),
    }
}

/// JSON pointer to the generated text in each provider's response.
fn text_pointer(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Ollama => "/response",
        ProviderKind::Openai => "/choices/0/message/content",
        ProviderKind::Anthropic => "/content/0/text",
        ProviderKind::Google => "/candidates/0/content/parts/0/text",
    }
}

fn api_key(provider: &ProviderConfig) -> Option<String> {
    let var = provider.api_key_env.as_deref()?;
    std::env::var(var).ok().filter(|value| !value.is_empty())
}

fn required_key(task: &str, provider: &ProviderConfig) -> Result<String> {
    api_key(provider).ok_or_else(|| {
        let var = provider.api_key_env.as_deref().unwrap_or("api_key_env");
        CurationError::oracle(task, format!("{var} is not set"))
    })
}

fn key_missing(provider: &ProviderConfig) -> bool {
    match provider.kind {
        ProviderKind::Anthropic | ProviderKind::Google => api_key(provider).is_none(),
        ProviderKind::Ollama | ProviderKind::Openai => provider.api_key_env.is_some() && api_key(provider).is_none(),
    }
}

// -- model listing --

/// A text-generation model reported by a local Ollama server.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalModel {
    pub id: String,
    pub label: String,
    pub size: String,
}

const NON_CHAT_MARKERS: [&str; 2] = ["embed", "rerank"];

/// Ask an Ollama server which models it has. An error means the server is
/// not reachable.
pub fn ollama_models(base_url: &str) -> Result<Vec<LocalModel>> {
    let agent = ureq::AgentBuilder::new().timeout(Duration::from_secs(5)).build();
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
    let tags: Value = agent
        .get(&url)
        .call()
        .map_err(|err| CurationError::oracle("ollama_models", err))?
        .into_json()
        .map_err(|err| CurationError::oracle("ollama_models", err))?;
    let models = parse_ollama_tags(&tags);
    debug!(url = %url, count = models.len(), "ollama models listed");
    Ok(models)
}

/// Text-generation entries of an `/api/tags` response. Embedding and
/// reranker models are left out.
pub fn parse_ollama_tags(tags: &Value) -> Vec<LocalModel> {
    tags.get("models")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            let id = entry.get("name").and_then(Value::as_str)?;
            let lower = id.to_lowercase();
            if NON_CHAT_MARKERS.iter().any(|marker| lower.contains(marker)) {
                return None;
            }
            let size = entry.get("size").and_then(Value::as_u64).map(human_size).unwrap_or_default();
            Some(LocalModel {
                id: id.to_string(),
                label: model_label(id),
                size,
            })
        })
        .collect()
}

fn model_label(id: &str) -> String {
    let base = id.strip_suffix(":latest").unwrap_or(id);
    let mut label = String::with_capacity(base.len());
    let mut boundary = true;
    for c in base.chars() {
        let c = if c == '-' || c == '_' { ' ' } else { c };
        if boundary {
            label.extend(c.to_uppercase());
        } else {
            label.push(c);
        }
        boundary = !c.is_alphanumeric();
    }
    label
}

fn human_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes >= 1e9 {
        format!("{:.1} GB", bytes / 1e9)
    } else if bytes >= 1e6 {
        format!("{:.0} MB", bytes / 1e6)
    } else {
        format!("{bytes} B")
    }
}

/// One provider's entry in the model listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderModels {
    pub key: String,
    pub label: String,
    pub kind: ProviderKind,
    /// API key set, or for Ollama, the server answered.
    pub available: bool,
    pub models: Vec<String>,
}

impl ProviderModels {
    pub fn offers(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}

/// Providers with their selectable models. Ollama entries list what
/// `local_models` reports, or the configured models when it fails.
pub fn model_catalog(llm: &LlmConfig, local_models: &dyn Fn(&str) -> Result<Vec<LocalModel>>) -> Vec<ProviderModels> {
    llm.providers
        .iter()
        .map(|(key, provider)| {
            let (available, models) = match provider.kind {
                ProviderKind::Ollama => match local_models(&provider.base_url) {
                    Ok(found) => (true, found.into_iter().map(|m| m.id).collect()),
                    Err(err) => {
                        warn!(provider = %key, error = %err, "ollama not reachable");
                        (false, provider.models.clone())
                    }
                },
                _ => (!key_missing(provider), provider.models.clone()),
            };
            ProviderModels {
                key: key.clone(),
                label: provider.display_name(key).to_string(),
                kind: provider.kind,
                available,
                models,
            }
        })
        .collect()
}
