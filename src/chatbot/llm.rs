//! OpenAI-compatible chat completion client (Groq by default).

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::chatbot::green_api::check_status;
use crate::chatbot::services::{Content, LanguageModel, LlmMessage, ModelInfo};
use crate::config::LlmConfig;
use crate::error::{Error, Result};

/// Substrings of model ids that are not chat models.
const NON_CHAT_MARKERS: [&str; 4] = ["whisper", "embed", "guard", "tool"];

pub struct OpenAiCompatClient {
    client: reqwest::Client,
    config: LlmConfig,
    models: Mutex<Option<Vec<ModelInfo>>>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: Value,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize, Debug)]
struct ModelEntry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    owned_by: String,
    context_window: Option<u64>,
}

impl OpenAiCompatClient {
    pub fn new(config: LlmConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config, models: Mutex::new(None) })
    }

    fn require_key(&self) -> Result<&str> {
        if self.config.api_key.is_empty() {
            return Err(Error::NotConfigured("LLM API key"));
        }
        Ok(&self.config.api_key)
    }

    async fn fetch_models(&self) -> Result<Vec<ModelInfo>> {
        let key = self.require_key()?;
        let response = self
            .client
            .get(format!("{}/models", self.config.base_url))
            .bearer_auth(key)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(Error::from_request)?;
        let list: ModelList = check_status(response).await?.json().await?;
        Ok(chat_models(list.data))
    }
}

fn chat_models(entries: Vec<ModelEntry>) -> Vec<ModelInfo> {
    entries
        .into_iter()
        .filter(|m| !m.id.is_empty() && !NON_CHAT_MARKERS.iter().any(|x| m.id.contains(x)))
        .map(|m| {
            let description = match m.context_window {
                Some(ctx) if ctx > 0 => format!("{} | {}k context", m.owned_by, ctx / 1000),
                _ => m.owned_by,
            };
            ModelInfo { id: m.id, description }
        })
        .collect()
}

/// Used when the provider's model list cannot be fetched.
pub fn fallback_models() -> Vec<ModelInfo> {
    [
        ("llama-3.3-70b-versatile", "Llama 3.3 70B"),
        ("llama-3.1-8b-instant", "Llama 3.1 8B (fast)"),
        ("gemma2-9b-it", "Gemma 2 9B"),
        ("mixtral-8x7b-32768", "Mixtral 8x7B"),
    ]
    .into_iter()
    .map(|(id, description)| ModelInfo { id: id.to_string(), description: description.to_string() })
    .collect()
}

fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Provider wire content for one message. Files that are missing or not an
/// image are skipped.
async fn wire_content(content: &Content) -> Value {
    match content {
        Content::Text(text) => Value::String(text.clone()),
        Content::Structured { text, files } => {
            let mut parts = Vec::new();
            if !text.is_empty() {
                parts.push(json!({ "type": "text", "text": text }));
            }
            for file in files {
                let Some(mime) = image_mime(file) else { continue };
                match tokio::fs::read(file).await {
                    Ok(bytes) => {
                        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                        parts.push(json!({
                            "type": "image_url",
                            "image_url": { "url": format!("data:{mime};base64,{encoded}") }
                        }));
                    }
                    Err(e) => warn!("Skipping attachment {}: {e}", file.display()),
                }
            }
            Value::Array(parts)
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatClient {
    async fn complete(&self, messages: &[LlmMessage], model: Option<&str>) -> Result<String> {
        let key = self.require_key()?;
        let model = model.unwrap_or(self.config.model.as_str());

        let mut wire = Vec::with_capacity(messages.len() + 1);
        if !self.config.system_prompt.is_empty() {
            wire.push(WireMessage {
                role: "system",
                content: Value::String(self.config.system_prompt.clone()),
            });
        }
        for message in messages {
            wire.push(WireMessage {
                role: message.role.as_str(),
                content: wire_content(&message.content).await,
            });
        }

        debug!("🧠 Calling {model} with {} messages", wire.len());
        let request = ChatRequest { model, messages: wire };
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(key)
            .json(&request)
            .send()
            .await
            .map_err(Error::from_request)?;
        let parsed: ChatResponse = check_status(response).await?.json().await?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(Error::EmptyResponse)
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    async fn list_models(&self) -> Vec<ModelInfo> {
        let cached = self.models.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(cached) = cached {
            return cached;
        }
        match self.fetch_models().await {
            Ok(models) if !models.is_empty() => {
                info!("📋 Loaded {} models from provider", models.len());
                *self.models.lock().unwrap_or_else(|e| e.into_inner()) = Some(models.clone());
                models
            }
            Ok(_) => fallback_models(),
            Err(e) => {
                warn!("Failed to fetch models: {e}");
                fallback_models()
            }
        }
    }

    async fn health(&self) -> Result<String> {
        let models = self.fetch_models().await?;
        Ok(format!("{} models available", models.len()))
    }
}
