//! Chatbot module - relays WhatsApp messages to an LLM.

pub mod admission;
pub mod chat_log;
pub mod commands;
pub mod context;
pub mod database;
pub mod engine;
pub mod extractor;
pub mod green_api;
pub mod group;
pub mod image_gen;
pub mod llm;
pub mod media;
pub mod message;
pub mod quoted;
pub mod search;
pub mod services;
pub mod stt;
pub mod summary;


pub use database::Database;
pub use engine::{ChatbotEngine, PipelineOutcome};
pub use green_api::GreenApiClient;
pub use llm::OpenAiCompatClient;
pub use message::InboundEvent;
pub use services::Services;
pub use stt::{CachedTranscriber, WhisperApiClient};
