use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::prelude::*;

use greenrelay::chatbot::chat_log::ChatLogLayer;
use greenrelay::chatbot::image_gen::PollinationsClient;
use greenrelay::chatbot::search::DuckDuckGoSearch;
use greenrelay::chatbot::services::{Gateway, LanguageModel, Services};
use greenrelay::chatbot::{
    CachedTranscriber, ChatbotEngine, Database, GreenApiClient, OpenAiCompatClient, WhisperApiClient,
};
use greenrelay::config::Config;
use greenrelay::server::{self, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "relay.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let gateway: Arc<dyn Gateway> = match GreenApiClient::new(&config.green_api, config.http_timeout) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("Failed to create gateway client: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create {}: {e}", log_dir.display());
        return ExitCode::FAILURE;
    }
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("relay.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file: {e}");
            return ExitCode::FAILURE;
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id.clone() {
        let chat_layer = ChatLogLayer::new(gateway.clone(), log_chat_id);
        registry.with(chat_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting {}...", config.app_name);
    info!("Loaded config from {config_path}");

    match start(config, gateway).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Relay stopped: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn start(config: Config, gateway: Arc<dyn Gateway>) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.bot.media_dir)?;

    let llm: Arc<dyn LanguageModel> = Arc::new(OpenAiCompatClient::new(config.llm, config.http_timeout)?);
    let whisper = WhisperApiClient::new(config.transcription, config.http_timeout)?;
    let services = Services {
        gateway,
        llm: llm.clone(),
        transcriber: Arc::new(CachedTranscriber::new(Arc::new(whisper))),
        store: Arc::new(Database::open(&config.data_dir.join("relay.db"))?),
        search: Arc::new(DuckDuckGoSearch::new(llm.clone())?),
        images: Arc::new(PollinationsClient::new(llm, config.bot.media_dir.clone())?),
    };

    info!(
        "Bot nickname: {}, admin: {}",
        config.bot.nickname,
        config.bot.admin_id.as_deref().unwrap_or("none")
    );
    let engine = Arc::new(ChatbotEngine::new(config.bot, config.limits, services));
    let app = server::router(AppState { engine, app_name: config.app_name });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("🌐 Listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down");
            }
        })
        .await?;
    Ok(())
}
