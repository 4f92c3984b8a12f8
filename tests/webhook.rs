//! Router-level tests for the webhook and health endpoints.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use greenrelay::chatbot::services::{
    Gateway, GatewayMessage, GeneratedImage, ImageGenerator, LanguageModel, LlmMessage, ModelInfo,
    Services, Transcriber, WebSearch,
};
use greenrelay::chatbot::{ChatbotEngine, Database};
use greenrelay::config::{BotConfig, LimitsConfig};
use greenrelay::error::{Error, Result};
use greenrelay::server::{AppState, router};

#[derive(Default)]
struct RecordingGateway {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Gateway for RecordingGateway {
    async fn send_text(&self, _chat_id: &str, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
    async fn send_file_upload(&self, _chat_id: &str, _path: &Path, _caption: &str) -> Result<()> {
        Ok(())
    }
    async fn download_to_file(&self, _url: &str, _path: &Path) -> Result<()> {
        Err(Error::EmptyResponse)
    }
    async fn get_message(&self, _chat_id: &str, _id: &str) -> Result<Option<GatewayMessage>> {
        Ok(None)
    }
    async fn recent_history(&self, _chat_id: &str, _count: usize) -> Result<Vec<GatewayMessage>> {
        Ok(Vec::new())
    }
    async fn health(&self) -> Result<String> {
        Ok("authorized".into())
    }
}

#[derive(Default)]
struct EchoLlm {
    down: AtomicBool,
}

#[async_trait]
impl LanguageModel for EchoLlm {
    async fn complete(&self, messages: &[LlmMessage], _model: Option<&str>) -> Result<String> {
        let last = messages.last().map(|m| m.content.text().to_string()).unwrap_or_default();
        Ok(format!("echo: {last}"))
    }
    fn default_model(&self) -> &str {
        "echo"
    }
    async fn list_models(&self) -> Vec<ModelInfo> {
        Vec::new()
    }
    async fn health(&self) -> Result<String> {
        if self.down.load(Ordering::SeqCst) {
            Err(Error::Api { status: 401, body: "invalid key".into() })
        } else {
            Ok("ok".into())
        }
    }
}

#[derive(Default)]
struct QuietTranscriber {
    down: AtomicBool,
}

#[async_trait]
impl Transcriber for QuietTranscriber {
    async fn transcribe(&self, _path: &Path) -> Result<String> {
        Ok(String::new())
    }
    async fn health(&self) -> Result<String> {
        if self.down.load(Ordering::SeqCst) {
            Err(Error::Timeout)
        } else {
            Ok("reachable".into())
        }
    }
}

struct Silent;

#[async_trait]
impl WebSearch for Silent {
    async fn search_and_summarize(&self, _query: &str, _model: Option<&str>) -> Result<String> {
        Ok(String::new())
    }
}

#[async_trait]
impl ImageGenerator for Silent {
    async fn generate_image(&self, _prompt: &str, _model: Option<&str>) -> Result<GeneratedImage> {
        Err(Error::InvalidInput("disabled".into()))
    }
}

struct TestApp {
    state: AppState,
    gateway: Arc<RecordingGateway>,
    llm: Arc<EchoLlm>,
    transcriber: Arc<QuietTranscriber>,
}

fn app_with(limits: LimitsConfig) -> TestApp {
    let gateway = Arc::new(RecordingGateway::default());
    let llm = Arc::new(EchoLlm::default());
    let transcriber = Arc::new(QuietTranscriber::default());
    let services = Services {
        gateway: gateway.clone(),
        llm: llm.clone(),
        transcriber: transcriber.clone(),
        store: Arc::new(Database::in_memory().unwrap()),
        search: Arc::new(Silent),
        images: Arc::new(Silent),
    };
    let engine = ChatbotEngine::new(BotConfig::default(), limits, services);
    TestApp {
        state: AppState { engine: Arc::new(engine), app_name: "Test Relay".into() },
        gateway,
        llm,
        transcriber,
    }
}

fn app() -> TestApp {
    app_with(LimitsConfig::default())
}

async fn call(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn post_webhook(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

fn message(id: &str, chat: &str, text: &str) -> String {
    json!({
        "typeWebhook": "incomingMessageReceived",
        "idMessage": id,
        "senderData": {"chatId": chat, "senderName": "Aida"},
        "messageData": {"typeMessage": "textMessage", "textMessageData": {"textMessage": text}}
    })
    .to_string()
}

#[tokio::test]
async fn test_root() {
    let app = app();
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, body) = call(&app.state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "service": "Test Relay"}));
}

#[tokio::test]
async fn test_invalid_json() {
    let app = app();
    let (status, body) = call(&app.state, post_webhook("{not json")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "error", "message": "Invalid JSON"}));
}

#[tokio::test]
async fn test_status_events_are_ignored() {
    let app = app();
    let payload = json!({"typeWebhook": "outgoingMessageStatus", "idMessage": "X1"}).to_string();
    let (_, body) = call(&app.state, post_webhook(payload)).await;
    assert_eq!(body["status"], "ignored");

    let payload = json!({
        "typeWebhook": "incomingMessageReceived",
        "senderData": {"chatId": "1@c.us"},
        "messageData": {"typeMessage": "textMessage"}
    })
    .to_string();
    let (_, body) = call(&app.state, post_webhook(payload)).await;
    assert_eq!(body["status"], "ignored");
}

#[tokio::test]
async fn test_duplicate_is_reported() {
    let app = app();
    let payload = message("D1", "77011234567@c.us", "hi");

    let (_, first) = call(&app.state, post_webhook(payload.clone())).await;
    assert_eq!(first["status"], "received");
    let (_, second) = call(&app.state, post_webhook(payload)).await;
    assert_eq!(second["status"], "duplicate");
}

#[tokio::test]
async fn test_rate_limited_is_reported() {
    let app = app_with(LimitsConfig { max_requests_per_window: 1, ..Default::default() });

    let (_, first) = call(&app.state, post_webhook(message("R1", "1@c.us", "a"))).await;
    assert_eq!(first["status"], "received");
    let (_, second) = call(&app.state, post_webhook(message("R2", "1@c.us", "b"))).await;
    assert_eq!(second["status"], "rate_limited");
    // another chat has its own window
    let (_, other) = call(&app.state, post_webhook(message("R3", "2@c.us", "c"))).await;
    assert_eq!(other["status"], "received");
}

#[tokio::test]
async fn test_received_message_is_answered_in_background() {
    let app = app();
    let (_, body) = call(&app.state, post_webhook(message("B1", "1@c.us", "ping"))).await;
    assert_eq!(body["status"], "received");

    for _ in 0..50 {
        if !app.gateway.sent.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(*app.gateway.sent.lock().unwrap(), vec!["echo: ping".to_string()]);
}

#[tokio::test]
async fn test_health_reports_components() {
    let app = app();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = call(&app.state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["gateway"]["healthy"], true);
    assert_eq!(body["components"]["store"]["healthy"], true);
    assert_eq!(body["components"]["transcription"]["healthy"], true);
    assert!(body["timestamp"].as_u64().is_some());
}

#[tokio::test]
async fn test_health_degraded_when_a_component_fails() {
    let app = app();
    app.llm.down.store(true, Ordering::SeqCst);
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = call(&app.state, request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["components"]["llm"]["healthy"], false);
    assert_eq!(body["components"]["gateway"]["healthy"], true);
}

#[tokio::test]
async fn test_health_degraded_when_transcription_is_down() {
    let app = app();
    app.transcriber.down.store(true, Ordering::SeqCst);
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = call(&app.state, request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["components"]["transcription"]["healthy"], false);
    assert_eq!(body["components"]["llm"]["healthy"], true);
}
