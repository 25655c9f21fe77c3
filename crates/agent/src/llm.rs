use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use dealpilot_core::config::{LlmConfig, LlmProvider};
use dealpilot_core::domain::agent::TokenUsage;

use crate::error::AgentError;
use crate::usage::{AnthropicUsage, OllamaUsage, OpenAiUsage};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 1024;
const RETRY_BASE_DELAY_MS: u64 = 250;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Per-call tuning. Unset fields fall back to the client's configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LlmCallOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// A finished completion with usage already normalized.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatCompletion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

impl ChatCompletion {
    pub fn new(text: impl Into<String>, usage: Option<TokenUsage>) -> Self {
        Self { text: text.into(), usage }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate_chat(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
        options: &LlmCallOptions,
    ) -> Result<ChatCompletion>;
}

/// Chat-completion client for the providers the platform supports.
pub struct HttpLlmClient {
    client: Client,
    provider: LlmProvider,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    max_retries: u32,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| AgentError::ClientConfig(error.to_string()))?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(config.provider).to_string())
            .trim_end_matches('/')
            .to_string();

        if config.provider != LlmProvider::Ollama && config.api_key.is_none() {
            return Err(AgentError::ClientConfig(format!(
                "provider `{}` requires an api key",
                provider_name(config.provider)
            )));
        }

        Ok(Self {
            client,
            provider: config.provider,
            base_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    fn endpoint(&self) -> String {
        match self.provider {
            LlmProvider::OpenAi => format!("{}/v1/chat/completions", self.base_url),
            LlmProvider::Anthropic => format!("{}/v1/messages", self.base_url),
            LlmProvider::Ollama => format!("{}/api/chat", self.base_url),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let Some(api_key) = self.api_key.as_ref() else {
            return request;
        };
        match self.provider {
            LlmProvider::OpenAi => request.bearer_auth(api_key.expose_secret()),
            LlmProvider::Anthropic => request
                .header("x-api-key", api_key.expose_secret())
                .header("anthropic-version", ANTHROPIC_VERSION),
            LlmProvider::Ollama => request,
        }
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
        options: &LlmCallOptions,
    ) -> Value {
        let model = options.model.as_deref().unwrap_or(&self.model);
        match self.provider {
            LlmProvider::OpenAi => {
                let mut body = json!({
                    "model": model,
                    "messages": with_system_message(messages, system_prompt),
                });
                if let Some(temperature) = options.temperature {
                    body["temperature"] = json!(temperature);
                }
                if let Some(max_tokens) = options.max_tokens {
                    body["max_tokens"] = json!(max_tokens);
                }
                body
            }
            LlmProvider::Anthropic => {
                let mut body = json!({
                    "model": model,
                    "messages": messages,
                    "max_tokens": options.max_tokens.unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
                });
                if let Some(system_prompt) = system_prompt {
                    body["system"] = json!(system_prompt);
                }
                if let Some(temperature) = options.temperature {
                    body["temperature"] = json!(temperature);
                }
                body
            }
            LlmProvider::Ollama => {
                let mut tuning = serde_json::Map::new();
                if let Some(temperature) = options.temperature {
                    tuning.insert("temperature".to_string(), json!(temperature));
                }
                if let Some(max_tokens) = options.max_tokens {
                    tuning.insert("num_predict".to_string(), json!(max_tokens));
                }
                json!({
                    "model": model,
                    "messages": with_system_message(messages, system_prompt),
                    "stream": false,
                    "options": tuning,
                })
            }
        }
    }

    async fn send_once(&self, body: &Value) -> Result<Value, Attempt> {
        let request = self.authorize(self.client.post(self.endpoint())).json(body);
        let response = request.send().await.map_err(|error| Attempt::Retry(error.into()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|error| Attempt::Fatal(anyhow!("unreadable provider response: {error}")));
        }

        let detail = response.text().await.unwrap_or_default();
        let error = anyhow!("provider returned {status}: {detail}");
        if is_retryable(status) {
            Err(Attempt::Retry(error))
        } else {
            Err(Attempt::Fatal(error))
        }
    }
}

enum Attempt {
    Retry(anyhow::Error),
    Fatal(anyhow::Error),
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate_chat(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
        options: &LlmCallOptions,
    ) -> Result<ChatCompletion> {
        let body = self.request_body(messages, system_prompt, options);

        let mut attempt = 0;
        let raw = loop {
            match self.send_once(&body).await {
                Ok(raw) => break raw,
                Err(Attempt::Retry(error)) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "llm.request.retry",
                        provider = provider_name(self.provider),
                        attempt,
                        error = %error,
                        "retrying llm request"
                    );
                    let backoff = Duration::from_millis(RETRY_BASE_DELAY_MS * u64::from(attempt));
                    tokio::time::sleep(backoff).await;
                }
                Err(Attempt::Retry(error)) | Err(Attempt::Fatal(error)) => return Err(error),
            }
        };

        let completion = parse_completion(self.provider, raw)?;
        debug!(
            event_name = "llm.request.completed",
            provider = provider_name(self.provider),
            tokens = completion.usage.map(|usage| usage.total),
            "llm request completed"
        );
        Ok(completion)
    }
}

fn with_system_message(messages: &[ChatMessage], system_prompt: Option<&str>) -> Vec<ChatMessage> {
    let mut all = Vec::with_capacity(messages.len() + 1);
    if let Some(system_prompt) = system_prompt {
        all.push(ChatMessage { role: ChatRole::System, content: system_prompt.to_string() });
    }
    all.extend(messages.iter().cloned());
    all
}

fn default_base_url(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAi => "https://api.openai.com",
        LlmProvider::Anthropic => "https://api.anthropic.com",
        LlmProvider::Ollama => "http://localhost:11434",
    }
}

fn provider_name(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAi => "open_ai",
        LlmProvider::Anthropic => "anthropic",
        LlmProvider::Ollama => "ollama",
    }
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
    #[serde(flatten)]
    usage: OllamaUsage,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

/// Extracts the reply text and normalized usage from a provider response body.
pub fn parse_completion(provider: LlmProvider, raw: Value) -> Result<ChatCompletion> {
    match provider {
        LlmProvider::OpenAi => {
            let response: OpenAiResponse =
                serde_json::from_value(raw).context("unexpected openai response shape")?;
            let Some(choice) = response.choices.into_iter().next() else {
                bail!("openai response contained no choices");
            };
            Ok(ChatCompletion {
                text: choice.message.content.unwrap_or_default(),
                usage: response.usage.map(TokenUsage::from),
            })
        }
        LlmProvider::Anthropic => {
            let response: AnthropicResponse =
                serde_json::from_value(raw).context("unexpected anthropic response shape")?;
            let text = response
                .content
                .into_iter()
                .filter(|block| block.kind == "text")
                .filter_map(|block| block.text)
                .collect::<Vec<_>>()
                .join("");
            Ok(ChatCompletion { text, usage: response.usage.map(TokenUsage::from) })
        }
        LlmProvider::Ollama => {
            let response: OllamaResponse =
                serde_json::from_value(raw).context("unexpected ollama response shape")?;
            Ok(ChatCompletion {
                text: response.message.content,
                usage: Some(TokenUsage::from(response.usage)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use serde_json::json;

    use dealpilot_core::config::{LlmConfig, LlmProvider};
    use dealpilot_core::domain::agent::TokenUsage;

    use super::{parse_completion, ChatMessage, HttpLlmClient, LlmCallOptions};

    fn config(provider: LlmProvider, api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: api_key.map(|key| SecretString::from(key.to_string())),
            base_url: Some("http://llm.internal/".to_string()),
            model: "test-model".to_string(),
            timeout_secs: 5,
            max_retries: 0,
        }
    }

    #[test]
    fn parses_openai_completion() {
        let completion = parse_completion(
            LlmProvider::OpenAi,
            json!({
                "choices": [{"message": {"role": "assistant", "content": "Deal looks healthy"}}],
                "usage": {"prompt_tokens": 100, "completion_tokens": 25, "total_tokens": 125}
            }),
        )
        .expect("parse openai");

        assert_eq!(completion.text, "Deal looks healthy");
        assert_eq!(completion.usage, Some(TokenUsage::new(100, 25)));
    }

    #[test]
    fn parses_anthropic_text_blocks() {
        let completion = parse_completion(
            LlmProvider::Anthropic,
            json!({
                "content": [
                    {"type": "text", "text": "{\"score\": "},
                    {"type": "tool_use", "id": "t1"},
                    {"type": "text", "text": "42}"}
                ],
                "usage": {"input_tokens": 60, "output_tokens": 12}
            }),
        )
        .expect("parse anthropic");

        assert_eq!(completion.text, "{\"score\": 42}");
        assert_eq!(completion.usage, Some(TokenUsage::new(60, 12)));
    }

    #[test]
    fn parses_ollama_completion() {
        let completion = parse_completion(
            LlmProvider::Ollama,
            json!({
                "model": "llama3.1",
                "message": {"role": "assistant", "content": "ok"},
                "done": true,
                "prompt_eval_count": 30,
                "eval_count": 5
            }),
        )
        .expect("parse ollama");

        assert_eq!(completion.usage, Some(TokenUsage::new(30, 5)));
    }

    #[test]
    fn openai_without_choices_is_an_error() {
        let error = parse_completion(LlmProvider::OpenAi, json!({"choices": []}))
            .expect_err("no choices");
        assert!(error.to_string().contains("no choices"));
    }

    #[test]
    fn hosted_providers_require_api_key() {
        assert!(HttpLlmClient::from_config(&config(LlmProvider::Anthropic, None)).is_err());
        assert!(HttpLlmClient::from_config(&config(LlmProvider::Ollama, None)).is_ok());
    }

    #[test]
    fn request_bodies_place_system_prompt_per_provider() {
        let messages = [ChatMessage::user("Summarize deal D-42")];
        let options = LlmCallOptions { max_tokens: Some(200), ..LlmCallOptions::default() };

        let openai = HttpLlmClient::from_config(&config(LlmProvider::OpenAi, Some("sk-test")))
            .expect("openai client");
        let body = openai.request_body(&messages, Some("You are a sales analyst"), &options);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Summarize deal D-42");
        assert_eq!(body["max_tokens"], 200);
        assert_eq!(openai.endpoint(), "http://llm.internal/v1/chat/completions");

        let anthropic =
            HttpLlmClient::from_config(&config(LlmProvider::Anthropic, Some("sk-ant-test")))
                .expect("anthropic client");
        let body = anthropic.request_body(&messages, Some("You are a sales analyst"), &options);
        assert_eq!(body["system"], "You are a sales analyst");
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));

        let ollama = HttpLlmClient::from_config(&config(LlmProvider::Ollama, None))
            .expect("ollama client");
        let body = ollama.request_body(&messages, None, &options);
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 200);
        assert_eq!(ollama.endpoint(), "http://llm.internal/api/chat");
    }
}
