use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use async_trait::async_trait;
use tracing::debug;

use super::{TranslationProvider, TranslationRequest};
use crate::config::TranslateConfig;
use crate::error::{Result, VadsrtError};
use crate::language::LanguageTag;

const SYSTEM_PROMPT: &str = "You are a professional subtitle translator. \
You must return ONLY a valid JSON array of translated strings, nothing else.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

/// Client for `POST {base_url}/chat/completions` with a bearer key
pub struct ChatCompletionClient {
    name: String,
    client: Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    request_timeout_secs: u64,
    probe_timeout_secs: u64,
}

impl ChatCompletionClient {
    pub fn new(
        name: &str,
        base_url: &str,
        api_key: &str,
        model: &str,
        config: &TranslateConfig,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| VadsrtError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: format!("{} ({})", name, model),
            client,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature: config.temperature,
            request_timeout_secs: config.request_timeout_secs,
            probe_timeout_secs: config.probe_timeout_secs,
        })
    }

    async fn send(&self, request: &ChatRequest, timeout_secs: u64) -> Result<String> {
        debug!("Sending chat request to: {}", self.url);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(timeout_secs))
            .json(request)
            .send()
            .await
            .map_err(|e| classify_send_error(e, timeout_secs))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_send_error(e, timeout_secs))?;

        if !status.is_success() {
            return Err(VadsrtError::Translation(format!(
                "API error {}: {}",
                status,
                error_detail(&body)
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| VadsrtError::Translation(format!("Failed to parse response: {}", e)))?;

        match parsed.choices.into_iter().next() {
            Some(choice) => Ok(choice.message.content),
            None => Err(VadsrtError::Translation(format!(
                "API returned no choices: {}",
                parsed
                    .error
                    .map(|e| error_detail(&e.to_string()))
                    .unwrap_or_else(|| truncate(&body, 500))
            ))),
        }
    }
}

#[async_trait]
impl TranslationProvider for ChatCompletionClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn translate(&self, request: &TranslationRequest) -> Result<Vec<String>> {
        let chat = ChatRequest {
            model: self.model.clone(),
            messages: build_messages(&request.lines, &request.target)?,
            temperature: Some(self.temperature),
            max_tokens: None,
        };

        let content = self.send(&chat, self.request_timeout_secs).await?;
        debug!("Raw response for batch {}: {}", request.batch_id, truncate(&content, 500));
        parse_translation_array(&content)
    }

    async fn probe(&self) -> Result<()> {
        let chat = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::new("user", "hi")],
            temperature: None,
            max_tokens: Some(1),
        };
        self.send(&chat, self.probe_timeout_secs).await.map(|_| ())
    }
}

fn classify_send_error(error: reqwest::Error, timeout_secs: u64) -> VadsrtError {
    if error.is_timeout() {
        VadsrtError::Timeout(timeout_secs)
    } else if error.is_connect() {
        VadsrtError::ProviderUnavailable(error.to_string())
    } else {
        VadsrtError::Http(error)
    }
}

/// System and user messages asking for exactly one translated string per line.
pub fn build_messages(lines: &[String], target: &LanguageTag) -> Result<Vec<ChatMessage>> {
    let payload = serde_json::to_string(lines)?;
    let prompt = format!(
        "Translate the following subtitle texts to {}.\n\
         Return ONLY a JSON array of {} translated strings in the same order. \
         Do not include any explanation.\n\n{}",
        target.display_name(),
        lines.len(),
        payload
    );
    Ok(vec![
        ChatMessage::new("system", SYSTEM_PROMPT),
        ChatMessage::new("user", prompt),
    ])
}

/// Pull the translated lines out of a model reply.
///
/// Accepts a bare JSON array, one wrapped in a markdown fence, one preceded by
/// a `<think>` block, or an object whose first array value holds the lines.
pub fn parse_translation_array(content: &str) -> Result<Vec<String>> {
    let cleaned = strip_markdown_code_block(strip_think_block(content));

    let value: Value = match serde_json::from_str(cleaned) {
        Ok(value) => value,
        Err(e) => match (cleaned.find('['), cleaned.rfind(']')) {
            (Some(start), Some(end)) if start < end => serde_json::from_str(&cleaned[start..=end])
                .map_err(|_| VadsrtError::Translation(format!("Response is not JSON: {}", e)))?,
            _ => return Err(VadsrtError::Translation(format!("Response is not JSON: {}", e))),
        },
    };

    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => map
            .into_iter()
            .find_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .ok_or_else(|| VadsrtError::Translation("Response object holds no array".to_string()))?,
        other => {
            return Err(VadsrtError::Translation(format!(
                "Expected a JSON array, got {}",
                json_type_name(&other)
            )))
        }
    };

    Ok(items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        })
        .collect())
}

fn strip_think_block(content: &str) -> &str {
    let trimmed = content.trim();
    if trimmed.starts_with("<think>") {
        if let Some(end) = trimmed.find("</think>") {
            return trimmed[end + "</think>".len()..].trim();
        }
    }
    trimmed
}

fn strip_markdown_code_block(content: &str) -> &str {
    let content = content.trim();
    if !content.starts_with("```") {
        return content;
    }
    let body = match content.find('\n') {
        Some(newline) => &content[newline + 1..],
        None => content.trim_start_matches('`'),
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Best human-readable message from an error body
fn error_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
            return message.to_string();
        }
        if let Some(message) = value.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
        if let Some(message) = value.get("error").and_then(Value::as_str) {
            return message.to_string();
        }
    }
    truncate(body, 500)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
