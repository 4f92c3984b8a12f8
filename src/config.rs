use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file '{}': {source}", path.display())]
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    #[error("failed to parse config file '{}': {source}", path.display())]
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    #[error("config validation error: {0}")]
    Validation(String),
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful WhatsApp assistant.
IMPORTANT: Always respond in the SAME LANGUAGE the user writes to you.
You can understand voice messages (transcribed) and see images. Be concise but helpful.";

const DEFAULT_SUMMARY_PROMPT: &str = "You receive the message history of a group chat. \
Write a short, structured summary of the discussion. Highlight the key topics, decisions and \
important points. Answer in the language most of the chat uses.";

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default = "default_app_name")]
    app_name: String,
    #[serde(default = "default_listen_addr")]
    listen_addr: String,
    /// Directory for state files (database, logs). Defaults to current directory.
    data_dir: Option<String>,
    /// Scratch directory for downloaded media. Defaults to `{data_dir}/media`.
    media_dir: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    http_timeout_secs: u64,
    /// Chat that receives WARN/ERROR log lines.
    log_chat_id: Option<String>,
    #[serde(default)]
    green_api: GreenApiFile,
    #[serde(default)]
    llm: LlmFile,
    #[serde(default)]
    transcription: TranscriptionFile,
    #[serde(default)]
    bot: BotFile,
    #[serde(default)]
    limits: LimitsFile,
}

#[derive(Deserialize, Default)]
struct GreenApiFile {
    #[serde(default)]
    instance_id: String,
    #[serde(default)]
    token: String,
    host: Option<String>,
    media_host: Option<String>,
}

#[derive(Deserialize, Default)]
struct LlmFile {
    #[serde(default)]
    api_key: String,
    base_url: Option<String>,
    model: Option<String>,
    system_prompt: Option<String>,
}

#[derive(Deserialize, Default)]
struct TranscriptionFile {
    #[serde(default)]
    api_key: String,
    base_url: Option<String>,
    model: Option<String>,
}

#[derive(Deserialize, Default)]
struct BotFile {
    nickname: Option<String>,
    admin_id: Option<String>,
    history_limit: Option<usize>,
    summary_message_count: Option<usize>,
    summary_prompt: Option<String>,
}

#[derive(Deserialize, Default)]
struct LimitsFile {
    max_requests_per_window: Option<u32>,
    rate_window_secs: Option<u64>,
    dedup_window_secs: Option<u64>,
}

fn default_app_name() -> String {
    "WhatsApp AI Bot".to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

/// Messaging gateway account.
#[derive(Debug, Clone)]
pub struct GreenApiConfig {
    pub instance_id: String,
    pub token: String,
    pub host: String,
    /// Host used for multipart uploads.
    pub media_host: String,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub system_prompt: String,
}

#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Conversational behaviour of the bot.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Trigger word in group chats.
    pub nickname: String,
    /// Sender id allowed to run admin commands.
    pub admin_id: Option<String>,
    pub history_limit: usize,
    pub summary_message_count: usize,
    pub summary_prompt: String,
    pub media_dir: PathBuf,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            nickname: "ботяра".to_string(),
            admin_id: None,
            history_limit: 20,
            summary_message_count: 50,
            summary_prompt: DEFAULT_SUMMARY_PROMPT.to_string(),
            media_dir: std::env::temp_dir(),
        }
    }
}

/// Admission control limits.
#[derive(Debug, Clone, Copy)]
pub struct LimitsConfig {
    pub max_requests_per_window: u32,
    pub rate_window: Duration,
    pub dedup_window: Duration,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_requests_per_window: 30,
            rate_window: Duration::from_secs(60),
            dedup_window: Duration::from_secs(600),
        }
    }
}

pub struct Config {
    pub app_name: String,
    pub listen_addr: String,
    /// Directory for state files (database, logs).
    pub data_dir: PathBuf,
    pub http_timeout: Duration,
    pub log_chat_id: Option<String>,
    pub green_api: GreenApiConfig,
    pub llm: LlmConfig,
    pub transcription: TranscriptionConfig,
    pub bot: BotConfig,
    pub limits: LimitsConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Load with an explicit environment lookup (secrets override file values).
    pub fn load_with_env<P, F>(path: P, env: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let mut file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = env("GREEN_API_INSTANCE_ID") {
            file.green_api.instance_id = v;
        }
        if let Some(v) = env("GREEN_API_TOKEN") {
            file.green_api.token = v;
        }
        if let Some(v) = env("LLM_API_KEY") {
            file.llm.api_key = v;
        }
        if let Some(v) = env("TRANSCRIPTION_API_KEY") {
            file.transcription.api_key = v;
        }
        if let Some(v) = env("ADMIN_CHAT_ID") {
            file.bot.admin_id = Some(v);
        }

        // Validate required fields
        if file.green_api.instance_id.is_empty() {
            return Err(ConfigError::Validation("green_api.instance_id is required".into()));
        }
        if file.green_api.token.is_empty() {
            return Err(ConfigError::Validation("green_api.token is required".into()));
        }

        let defaults = LimitsConfig::default();
        let limits = LimitsConfig {
            max_requests_per_window: file
                .limits
                .max_requests_per_window
                .unwrap_or(defaults.max_requests_per_window),
            rate_window: file
                .limits
                .rate_window_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_window),
            dedup_window: file
                .limits
                .dedup_window_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedup_window),
        };
        if limits.max_requests_per_window == 0 {
            return Err(ConfigError::Validation("limits.max_requests_per_window must be > 0".into()));
        }
        if limits.rate_window.is_zero() || limits.dedup_window.is_zero() {
            return Err(ConfigError::Validation("limits windows must be > 0 seconds".into()));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let media_dir = file
            .media_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("media"));

        let bot_defaults = BotConfig::default();
        let nickname = file.bot.nickname.unwrap_or(bot_defaults.nickname);
        if nickname.trim().is_empty() {
            return Err(ConfigError::Validation("bot.nickname must not be empty".into()));
        }
        let bot = BotConfig {
            nickname,
            admin_id: file.bot.admin_id.filter(|id| !id.is_empty()),
            history_limit: file.bot.history_limit.unwrap_or(bot_defaults.history_limit),
            summary_message_count: file
                .bot
                .summary_message_count
                .unwrap_or(bot_defaults.summary_message_count),
            summary_prompt: file.bot.summary_prompt.unwrap_or(bot_defaults.summary_prompt),
            media_dir,
        };

        let host = file
            .green_api
            .host
            .unwrap_or_else(|| "https://api.green-api.com".to_string());
        // Uploads go through a per-instance media host keyed by the id prefix
        let media_host = file.green_api.media_host.unwrap_or_else(|| {
            let prefix: String = file.green_api.instance_id.chars().take(4).collect();
            format!("https://{prefix}.api.greenapi.com")
        });

        let groq = "https://api.groq.com/openai/v1".to_string();

        Ok(Self {
            app_name: file.app_name,
            listen_addr: file.listen_addr,
            data_dir,
            http_timeout: Duration::from_secs(file.http_timeout_secs.max(1)),
            log_chat_id: file.log_chat_id,
            green_api: GreenApiConfig {
                instance_id: file.green_api.instance_id,
                token: file.green_api.token,
                host: host.trim_end_matches('/').to_string(),
                media_host: media_host.trim_end_matches('/').to_string(),
            },
            llm: LlmConfig {
                api_key: file.llm.api_key,
                base_url: file.llm.base_url.unwrap_or_else(|| groq.clone()),
                model: file
                    .llm
                    .model
                    .unwrap_or_else(|| "llama-3.3-70b-versatile".to_string()),
                system_prompt: file
                    .llm
                    .system_prompt
                    .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            },
            transcription: TranscriptionConfig {
                api_key: file.transcription.api_key,
                base_url: file.transcription.base_url.unwrap_or(groq),
                model: file
                    .transcription
                    .model
                    .unwrap_or_else(|| "whisper-large-v3-turbo".to_string()),
            },
            bot,
            limits,
        })
    }
}
