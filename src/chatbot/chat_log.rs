use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::chatbot::services::Gateway;

const MAX_LOG_CHARS: usize = 4000;

/// Events from the gateway client are not forwarded; a failing send would
/// otherwise log itself forever.
const GATEWAY_TARGET: &str = "greenrelay::chatbot::green_api";

/// Forwards WARN and ERROR events to an admin chat through the gateway.
pub struct ChatLogLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl ChatLogLayer {
    /// Must be called inside a tokio runtime.
    pub fn new(gateway: Arc<dyn Gateway>, chat_id: String) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                let text = truncate(&text);
                if let Err(e) = gateway.send_text(&chat_id, &text).await {
                    eprintln!("Failed to forward log to {chat_id}: {e}");
                }
            }
        });

        Self { tx }
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() > MAX_LOG_CHARS {
        let truncated: String = text.chars().take(MAX_LOG_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

/// Whether an event should reach the admin chat.
fn forwarded(level: Level, target: &str) -> bool {
    level <= Level::WARN && !target.starts_with(GATEWAY_TARGET)
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let fields = std::mem::take(&mut self.message);
            self.message = format!("{value:?}");
            if !fields.is_empty() {
                self.message.push_str(&format!(" ({fields})"));
            }
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_debug(field, &format_args!("{value}"));
    }
}

impl<S: Subscriber> Layer<S> for ChatLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();
        if !forwarded(level, metadata.target()) {
            return;
        }

        let mut visitor = MessageVisitor { message: String::new() };
        event.record(&mut visitor);

        let text = match level {
            Level::ERROR => format!("❌ {}", visitor.message),
            _ => format!("⚠️ {}", visitor.message),
        };

        if self.tx.send(text).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_warn_and_error_are_forwarded() {
        assert!(forwarded(Level::ERROR, "greenrelay::chatbot::engine"));
        assert!(forwarded(Level::WARN, "greenrelay::server"));
        assert!(!forwarded(Level::INFO, "greenrelay::chatbot::engine"));
        assert!(!forwarded(Level::DEBUG, "greenrelay::chatbot::engine"));
    }

    #[test]
    fn test_gateway_events_are_not_forwarded() {
        assert!(!forwarded(Level::ERROR, "greenrelay::chatbot::green_api"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short"), "short");
        let long = "я".repeat(MAX_LOG_CHARS + 10);
        let cut = truncate(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), MAX_LOG_CHARS + 3);
    }
}
