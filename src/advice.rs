// Treatment advice from a remote chat-completions model

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::AdviceConfig;
use crate::errors::{DiagnosisError, Result};

pub const SYSTEM_PROMPT: &str = "You are an agronomy assistant for coffee plants. \
You should provide detailed, friendly, and practical advice to coffee farmers based on system diagnoses. \
Make the responses as human like as possible and lively as possible.";

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Anything that can answer a chat conversation.
///
/// Implementations must return within their configured timeout and report
/// every failure (network, auth, quota, empty reply) as an `Err`.
pub trait AdviceProvider {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// What the advice prompt needs to know about a diagnosis
#[derive(Debug, Clone, PartialEq)]
pub enum AdviceRequest<'a> {
    Diagnosed {
        label: &'a str,
        confidence: f64,
        advice: &'a str,
    },
    Unresolved {
        reason: &'a str,
        advice: &'a str,
    },
}

impl AdviceRequest<'_> {
    pub fn prompt(&self) -> String {
        match self {
            AdviceRequest::Diagnosed { label, confidence, advice } => format!(
                "The system detected {} with {:.1}% confidence. Advice: {}. \
                 Give the user detailed next steps for treating or preventing this disease in coffee plants. \
                 Make it practical and easy to follow. Also make it quite friendly and lively. \
                 Make it considerably short but informative.",
                label,
                confidence * 100.0,
                advice
            ),
            AdviceRequest::Unresolved { reason, advice } => format!(
                "System could not confidently classify the image. Reason: {}. Advice: {}.",
                reason, advice
            ),
        }
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(self.prompt())]
    }
}

/// Ask the model for advice; errors are returned, never panicked on
pub fn generate_advice(client: &dyn AdviceProvider, request: &AdviceRequest<'_>) -> Result<String> {
    let text = client.complete(&request.messages())?;
    if text.trim().is_empty() {
        return Err(DiagnosisError::Advice("model returned an empty reply".to_string()));
    }
    Ok(text)
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiClient {
    base_url: String,
    model: String,
    api_key_env: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    timeout_secs: u64,
    client: reqwest::blocking::Client,
}

impl OpenAiClient {
    /// Build from config. The API key is read from the environment now, but a
    /// missing key only surfaces as an error when a completion is requested.
    pub fn from_config(config: &AdviceConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DiagnosisError::Advice(format!("Failed to create HTTP client: {}", e)))?;

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            log::warn!("{} is not set; advice requests will fail", config.api_key_env);
        }

        Ok(Self {
            base_url: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_secs: config.timeout_secs,
            client,
        })
    }
}

/// Request body for /chat/completions
#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

impl AdviceProvider for OpenAiClient {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| DiagnosisError::MissingCredential(self.api_key_env.clone()))?;

        let url = format!("{}/chat/completions", self.base_url);
        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        log::debug!("POST {} ({} messages)", url, messages.len());

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    DiagnosisError::Advice(format!("Request timed out after {}s", self.timeout_secs))
                } else if e.is_connect() {
                    DiagnosisError::Advice(format!("Could not connect to {}", self.base_url))
                } else {
                    DiagnosisError::Advice(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(DiagnosisError::Advice(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let parsed: CompletionResponse = response
            .json()
            .map_err(|e| DiagnosisError::Advice(format!("Malformed response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| DiagnosisError::Advice("response contained no message".to_string()))
    }
}

/// Fixed-reply client for tests and offline runs
pub struct StaticAdvisor {
    reply: std::result::Result<String, String>,
}

impl StaticAdvisor {
    pub fn replying(reply: &str) -> Self {
        Self { reply: Ok(reply.to_string()) }
    }

    pub fn failing(message: &str) -> Self {
        Self { reply: Err(message.to_string()) }
    }
}

impl AdviceProvider for StaticAdvisor {
    fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        self.reply.clone().map_err(DiagnosisError::Advice)
    }
}
