//! Generative model providers.
//!
//! Unified interface for the single structured-generation call the
//! pipeline makes per job attempt. Supports Anthropic, OpenAI-compatible
//! and Ollama backends behind one trait; each client makes exactly one
//! non-streaming chat completion request.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::PlanError;

const PROVIDER_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-attempt deadline. A generation call that outlives this is
/// cancelled and surfaced as an upstream failure so the queue's retry
/// policy can take over instead of the call pinning a worker slot.
pub const DEFAULT_CALL_DEADLINE_SECS: u64 = 120;

/// Supported provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Anthropic,
    OpenAi,
    Ollama,
}

/// Declarative provider configuration, loaded from the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_call_deadline_secs")]
    pub call_deadline_secs: u64,
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_call_deadline_secs() -> u64 {
    DEFAULT_CALL_DEADLINE_SECS
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.model.is_empty() {
            return Err("model must not be empty".to_string());
        }
        match self.provider_type {
            ProviderType::Anthropic | ProviderType::OpenAi => {
                if self.api_key.as_deref().unwrap_or("").is_empty() {
                    return Err("api_key is required".to_string());
                }
            }
            ProviderType::Ollama => {}
        }
        if self.call_deadline_secs == 0 {
            return Err("call_deadline_secs must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Result of one generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
}

/// One-shot generative client. The pipeline issues exactly one call per
/// job attempt; no tool loop, no streaming.
#[async_trait]
pub trait GenerativeClient: Send + Sync {
    /// Generate a completion from a system prompt and a user prompt.
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<CompletionResponse, PlanError>;

    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;
}

fn build_http_client() -> Result<Client, PlanError> {
    Client::builder()
        .no_proxy()
        .connect_timeout(PROVIDER_HTTP_CONNECT_TIMEOUT)
        .build()
        .map_err(|e| PlanError::ConfigError(format!("Failed to create HTTP client: {}", e)))
}

fn map_http_error(error: reqwest::Error) -> PlanError {
    if error.is_status() {
        let status = error.status().map(|s| s.as_u16()).unwrap_or(0);
        match status {
            401 | 403 => PlanError::ProviderAuthFailed(format!("Authentication failed: {}", error)),
            429 => PlanError::ProviderRateLimit(format!("Rate limit exceeded: {}", error)),
            404 => PlanError::ProviderModelNotFound(format!("Model not found: {}", error)),
            _ => PlanError::UpstreamCall(format!("Request failed with status {}: {}", status, error)),
        }
    } else if error.is_timeout() {
        PlanError::UpstreamCall(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        PlanError::UpstreamCall(format!("Connection error: {}", error))
    } else {
        PlanError::UpstreamCall(format!("HTTP error: {}", error))
    }
}

fn map_error_status(status: u16, body: String) -> PlanError {
    match status {
        401 | 403 => PlanError::ProviderAuthFailed(format!("Authentication failed: {}", body)),
        429 => PlanError::ProviderRateLimit(format!("Rate limit exceeded: {}", body)),
        404 => PlanError::ProviderModelNotFound(format!("Model not found: {}", body)),
        _ => PlanError::UpstreamCall(format!("Request failed with status {}: {}", status, body)),
    }
}

/// Run a provider call under the configured per-attempt deadline.
async fn with_deadline<F, T>(deadline_secs: u64, fut: F) -> Result<T, PlanError>
where
    F: std::future::Future<Output = Result<T, PlanError>>,
{
    match tokio::time::timeout(Duration::from_secs(deadline_secs), fut).await {
        Ok(result) => result,
        Err(_) => Err(PlanError::UpstreamTimeout(deadline_secs)),
    }
}

/// Anthropic messages API client.
pub struct AnthropicClient {
    client: Client,
    model: String,
    api_key: String,
    endpoint: String,
    max_tokens: u32,
    temperature: Option<f32>,
    deadline_secs: u64,
}

impl AnthropicClient {
    pub fn new(config: &ProviderConfig, model_override: Option<&str>) -> Result<Self, PlanError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| PlanError::ProviderNotConfigured("anthropic api_key missing".into()))?;
        Ok(Self {
            client: build_http_client()?,
            model: model_override.unwrap_or(&config.model).to_string(),
            api_key,
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            deadline_secs: config.call_deadline_secs,
        })
    }
}

#[async_trait]
impl GenerativeClient for AnthropicClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<CompletionResponse, PlanError> {
        let url = format!("{}/v1/messages", self.endpoint.trim_end_matches('/'));
        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system_prompt,
            "messages": [{ "role": "user", "content": user_prompt }],
        });
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }

        let request = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body);

        with_deadline(self.deadline_secs, async {
            let response = request.send().await.map_err(map_http_error)?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(map_error_status(status, text));
            }

            #[derive(Deserialize)]
            struct AnthropicResponse {
                content: Vec<AnthropicContent>,
                model: String,
                usage: Option<AnthropicUsage>,
            }
            #[derive(Deserialize)]
            struct AnthropicContent {
                text: String,
            }
            #[derive(Deserialize)]
            struct AnthropicUsage {
                input_tokens: u32,
                output_tokens: u32,
            }

            let completion: AnthropicResponse = response
                .json()
                .await
                .map_err(|e| PlanError::UpstreamCall(format!("Failed to parse response: {}", e)))?;

            let content = completion
                .content
                .first()
                .map(|c| c.text.clone())
                .ok_or_else(|| PlanError::UpstreamCall("No content in response".to_string()))?;

            let usage = completion
                .usage
                .map(|u| TokenUsage {
                    prompt_tokens: u.input_tokens,
                    completion_tokens: u.output_tokens,
                })
                .unwrap_or_default();

            Ok(CompletionResponse {
                content,
                model: completion.model,
                usage,
            })
        })
        .await
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// OpenAI-compatible chat completion wire format, shared by the OpenAI
// and Ollama clients.
#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatWireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct ChatWireMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatWireMessage,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

async fn complete_openai_compatible(
    client: &Client,
    url: &str,
    api_key: Option<&str>,
    request: &ChatCompletionRequest,
    deadline_secs: u64,
) -> Result<CompletionResponse, PlanError> {
    let mut builder = client.post(url).header("Content-Type", "application/json");
    if let Some(key) = api_key {
        builder = builder.header("Authorization", format!("Bearer {}", key));
    }
    let builder = builder.json(request);

    with_deadline(deadline_secs, async {
        let response = builder.send().await.map_err(map_http_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(map_error_status(status, text));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| PlanError::UpstreamCall(format!("Failed to parse response: {}", e)))?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| PlanError::UpstreamCall("No choices in response".to_string()))?;

        let usage = completion
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            content: choice.message.content,
            model: completion.model,
            usage,
        })
    })
    .await
}

/// OpenAI (or any OpenAI-compatible endpoint) client.
pub struct OpenAiClient {
    client: Client,
    model: String,
    api_key: String,
    base_url: String,
    max_tokens: u32,
    temperature: Option<f32>,
    deadline_secs: u64,
}

impl OpenAiClient {
    pub fn new(config: &ProviderConfig, model_override: Option<&str>) -> Result<Self, PlanError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| PlanError::ProviderNotConfigured("openai api_key missing".into()))?;
        Ok(Self {
            client: build_http_client()?,
            model: model_override.unwrap_or(&config.model).to_string(),
            api_key,
            base_url: config
                .endpoint
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            deadline_secs: config.call_deadline_secs,
        })
    }
}

#[async_trait]
impl GenerativeClient for OpenAiClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<CompletionResponse, PlanError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatWireMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatWireMessage {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        complete_openai_compatible(
            &self.client,
            &url,
            Some(&self.api_key),
            &request,
            self.deadline_secs,
        )
        .await
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Ollama client (local models, OpenAI-compatible API surface).
pub struct OllamaClient {
    client: Client,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: Option<f32>,
    deadline_secs: u64,
}

impl OllamaClient {
    pub fn new(config: &ProviderConfig, model_override: Option<&str>) -> Result<Self, PlanError> {
        Ok(Self {
            client: build_http_client()?,
            model: model_override.unwrap_or(&config.model).to_string(),
            base_url: config
                .endpoint
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            deadline_secs: config.call_deadline_secs,
        })
    }
}

#[async_trait]
impl GenerativeClient for OllamaClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<CompletionResponse, PlanError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatWireMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatWireMessage {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        complete_openai_compatible(&self.client, &url, None, &request, self.deadline_secs).await
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Resolves a model id to a ready client. The queue depends on this
/// seam rather than on the registry directly, so tests can substitute
/// scripted clients.
pub trait ClientFactory: Send + Sync {
    fn create_client(&self, model_id: &str) -> Result<Box<dyn GenerativeClient>, PlanError>;
}

/// Registry of named provider configurations.
///
/// Jobs carry a model id; the registry resolves the configured provider
/// and builds a client pinned to the job's model.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderConfig>,
    default_provider: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(
        providers: &HashMap<String, ProviderConfig>,
        default_provider: Option<String>,
    ) -> Self {
        Self {
            providers: providers.clone(),
            default_provider,
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, config: ProviderConfig) {
        self.providers.insert(name.into(), config);
    }

    pub fn set_default(&mut self, name: impl Into<String>) {
        self.default_provider = Some(name.into());
    }

    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    fn default_name(&self) -> Result<&str, PlanError> {
        if let Some(name) = &self.default_provider {
            return Ok(name.as_str());
        }
        // A single configured provider is an unambiguous default.
        if self.providers.len() == 1 {
            if let Some(name) = self.providers.keys().next() {
                return Ok(name.as_str());
            }
        }
        Err(PlanError::ProviderNotConfigured(
            "no default provider configured".to_string(),
        ))
    }

    pub fn create_named_client(
        &self,
        name: &str,
        model_override: Option<&str>,
    ) -> Result<Box<dyn GenerativeClient>, PlanError> {
        let config = self.providers.get(name).ok_or_else(|| {
            PlanError::ProviderNotConfigured(format!("Provider not found: {}", name))
        })?;
        match config.provider_type {
            ProviderType::Anthropic => {
                Ok(Box::new(AnthropicClient::new(config, model_override)?))
            }
            ProviderType::OpenAi => Ok(Box::new(OpenAiClient::new(config, model_override)?)),
            ProviderType::Ollama => Ok(Box::new(OllamaClient::new(config, model_override)?)),
        }
    }
}

impl ClientFactory for ProviderRegistry {
    /// Build a client for the default provider, pinned to `model_id`.
    fn create_client(&self, model_id: &str) -> Result<Box<dyn GenerativeClient>, PlanError> {
        let name = self.default_name()?.to_string();
        self.create_named_client(&name, Some(model_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anthropic_config() -> ProviderConfig {
        ProviderConfig {
            provider_type: ProviderType::Anthropic,
            model: "claude-sonnet-4-20250514".to_string(),
            api_key: Some("test-key".to_string()),
            endpoint: None,
            max_tokens: 8192,
            temperature: None,
            call_deadline_secs: DEFAULT_CALL_DEADLINE_SECS,
        }
    }

    #[test]
    fn registry_resolves_single_provider_as_default() {
        let mut registry = ProviderRegistry::new();
        registry.insert("anthropic", anthropic_config());
        let client = registry.create_client("claude-sonnet-4-20250514").unwrap();
        assert_eq!(client.provider_name(), "anthropic");
        assert_eq!(client.model_name(), "claude-sonnet-4-20250514");
    }

    #[test]
    fn registry_honors_model_override() {
        let mut registry = ProviderRegistry::new();
        registry.insert("anthropic", anthropic_config());
        registry.set_default("anthropic");
        let client = registry.create_client("claude-opus-4-20250514").unwrap();
        assert_eq!(client.model_name(), "claude-opus-4-20250514");
    }

    #[test]
    fn registry_rejects_unknown_provider() {
        let registry = ProviderRegistry::new();
        let err = registry
            .create_named_client("missing", None)
            .err()
            .unwrap();
        assert!(matches!(err, PlanError::ProviderNotConfigured(_)));
    }

    #[test]
    fn ambiguous_default_is_an_error() {
        let mut registry = ProviderRegistry::new();
        registry.insert("a", anthropic_config());
        registry.insert("b", anthropic_config());
        assert!(registry.create_client("some-model").is_err());
    }

    #[test]
    fn anthropic_config_requires_api_key() {
        let mut config = anthropic_config();
        config.api_key = None;
        assert!(config.validate().is_err());
        assert!(AnthropicClient::new(&config, None).is_err());
    }

    #[test]
    fn ollama_config_needs_no_api_key() {
        let config = ProviderConfig {
            provider_type: ProviderType::Ollama,
            model: "llama3".to_string(),
            api_key: None,
            endpoint: None,
            max_tokens: 8192,
            temperature: Some(0.7),
            call_deadline_secs: DEFAULT_CALL_DEADLINE_SECS,
        };
        assert!(config.validate().is_ok());
        let client = OllamaClient::new(&config, None).unwrap();
        assert_eq!(client.provider_name(), "ollama");
    }

    #[tokio::test]
    async fn deadline_expiry_maps_to_timeout_error() {
        let result: Result<(), PlanError> = with_deadline(1, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        // 1s wall-clock in a test is tolerable; the point is the mapping.
        assert!(matches!(result, Err(PlanError::UpstreamTimeout(1))));
    }
}
