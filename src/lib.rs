pub mod chatbot;
pub mod config;
pub mod error;
pub mod server;
