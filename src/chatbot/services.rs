//! Capabilities the pipeline consumes from external collaborators.
//!
//! Each trait has one production client in this crate and in-memory doubles
//! in the tests. The engine only ever sees `Arc<dyn Trait>`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Author of a history entry or provider message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// Turn content: plain text, or text plus local files for multi-modal models.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text(String),
    Structured { text: String, files: Vec<PathBuf> },
}

impl Content {
    pub fn text(&self) -> &str {
        match self {
            Content::Text(t) => t,
            Content::Structured { text, .. } => text,
        }
    }
}

/// Provider-agnostic chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmMessage {
    pub role: Role,
    pub content: Content,
}

/// A model the chat can switch to.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub id: String,
    pub description: String,
}

/// A message as returned by the gateway journal endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayMessage {
    #[serde(default)]
    pub id_message: String,
    /// `incoming` or `outgoing`.
    #[serde(default, rename = "type")]
    pub direction: String,
    #[serde(default)]
    pub type_message: String,
    pub sender_name: Option<String>,
    pub text_message: Option<String>,
    pub extended_text_message: Option<GatewayExtendedText>,
    pub download_url: Option<String>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayExtendedText {
    #[serde(default)]
    pub text: String,
}

impl GatewayMessage {
    pub fn is_outgoing(&self) -> bool {
        self.direction == "outgoing"
    }
}

/// One persisted history line.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatHistoryEntry {
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

/// Per-chat switches, upserted as a whole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSettings {
    pub chat_id: String,
    pub ai_enabled: bool,
    pub transcribe_mode: bool,
    pub preferred_model: Option<String>,
}

impl ChatSettings {
    pub fn new(chat_id: &str) -> Self {
        Self { chat_id: chat_id.to_string(), ..Default::default() }
    }
}

/// Message captured in a group for summaries.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMessage {
    pub sender: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlacklistEntry {
    pub user_id: String,
    pub reason: String,
}

/// Output of the image generator. The file lives in the media directory.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub path: PathBuf,
    pub prompt: String,
    pub seed: u32,
}

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()>;
    async fn send_file_upload(&self, chat_id: &str, path: &Path, caption: &str) -> Result<()>;
    async fn download_to_file(&self, url: &str, path: &Path) -> Result<()>;
    async fn get_message(&self, chat_id: &str, message_id: &str) -> Result<Option<GatewayMessage>>;
    /// Newest first.
    async fn recent_history(&self, chat_id: &str, count: usize) -> Result<Vec<GatewayMessage>>;
    async fn health(&self) -> Result<String>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, messages: &[LlmMessage], model: Option<&str>) -> Result<String>;
    fn default_model(&self) -> &str;
    /// Never fails; falls back to a fixed list.
    async fn list_models(&self) -> Vec<ModelInfo>;
    async fn health(&self) -> Result<String>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, path: &Path) -> Result<String>;
    async fn health(&self) -> Result<String>;
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn append_history(&self, chat_id: &str, role: Role, content: &str) -> Result<()>;
    /// Most recent `limit` entries, oldest first.
    async fn recent_history(&self, chat_id: &str, limit: usize) -> Result<Vec<ChatHistoryEntry>>;
    async fn history_len(&self, chat_id: &str) -> Result<usize>;
    async fn clear_history(&self, chat_id: &str) -> Result<()>;

    async fn add_group_message(&self, chat_id: &str, sender: &str, content: &str) -> Result<()>;
    /// Most recent `limit` captured group messages, oldest first.
    async fn group_messages(&self, chat_id: &str, limit: usize) -> Result<Vec<GroupMessage>>;
    async fn clear_group_messages(&self, chat_id: &str) -> Result<()>;

    /// Defaults when the chat has no record yet.
    async fn settings(&self, chat_id: &str) -> Result<ChatSettings>;
    async fn save_settings(&self, settings: &ChatSettings) -> Result<()>;

    async fn blacklist_add(&self, user_id: &str, reason: &str) -> Result<()>;
    /// Returns whether the user was listed.
    async fn blacklist_remove(&self, user_id: &str) -> Result<bool>;
    async fn is_blacklisted(&self, user_id: &str) -> Result<bool>;
    async fn blacklist(&self) -> Result<Vec<BlacklistEntry>>;

    async fn health(&self) -> Result<String>;
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search_and_summarize(&self, query: &str, model: Option<&str>) -> Result<String>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image(&self, prompt: &str, model: Option<&str>) -> Result<GeneratedImage>;
}

/// Everything the engine needs, constructed once at startup.
#[derive(Clone)]
pub struct Services {
    pub gateway: Arc<dyn Gateway>,
    pub llm: Arc<dyn LanguageModel>,
    pub transcriber: Arc<dyn Transcriber>,
    pub store: Arc<dyn Store>,
    pub search: Arc<dyn WebSearch>,
    pub images: Arc<dyn ImageGenerator>,
}
