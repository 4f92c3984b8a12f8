//! Webhook and health endpoints.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::chatbot::engine::{ChatbotEngine, PipelineOutcome};
use crate::chatbot::message::InboundEvent;
use crate::error::Result;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ChatbotEngine>,
    pub app_name: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/webhook", post(webhook))
        .with_state(state)
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"status": "ok", "service": state.app_name}))
}

fn component(result: Result<String>) -> (bool, Value) {
    match result {
        Ok(details) => (true, json!({"healthy": true, "details": details})),
        Err(e) => (false, json!({"healthy": false, "details": e.to_string()})),
    }
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let services = state.engine.services();
    let (gateway, store, llm, transcription) = tokio::join!(
        services.gateway.health(),
        services.store.health(),
        services.llm.health(),
        services.transcriber.health(),
    );

    let (gateway_ok, gateway) = component(gateway);
    let (store_ok, store) = component(store);
    let (llm_ok, llm) = component(llm);
    let (transcription_ok, transcription) = component(transcription);
    let healthy = gateway_ok && store_ok && llm_ok && transcription_ok;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let body = json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "components": {
            "gateway": gateway,
            "store": store,
            "llm": llm,
            "transcription": transcription,
        },
        "timestamp": timestamp,
    });

    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body))
}

/// Admission runs before responding; the pipeline runs on its own task.
async fn webhook(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let event: InboundEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Failed to parse webhook JSON: {e}");
            return Json(json!({"status": "error", "message": "Invalid JSON"}));
        }
    };
    debug!(kind = %event.type_webhook, "Webhook received");

    if let Some(outcome) = state.engine.admit(&event) {
        let status = match outcome {
            PipelineOutcome::Duplicate => "duplicate",
            PipelineOutcome::RateLimited => "rate_limited",
            _ => "ignored",
        };
        return Json(json!({"status": status}));
    }

    info!(
        chat_id = event.chat_id(),
        message_id = event.message_id(),
        "📩 Message accepted"
    );
    let engine = state.engine.clone();
    tokio::spawn(async move {
        engine.run_admitted(event).await;
    });
    Json(json!({"status": "received"}))
}
