//! Resolves the message a reply points at into extra context for the turn.

use std::path::Path;

use tracing::{info, warn};

use crate::chatbot::media::ScratchFile;
use crate::chatbot::message::QuotedKind;
use crate::chatbot::services::Services;

pub const VOICE_PLACEHOLDER: &str = "[voice message]";
pub const VOICE_NO_URL: &str = "[voice message - URL unavailable]";
pub const VOICE_UNRECOGNIZED: &str = "[voice message - could not recognize]";

/// `None` means the quote adds nothing (unknown type or empty text).
pub async fn resolve(
    quoted: &QuotedKind,
    chat_id: &str,
    services: &Services,
    media_dir: &Path,
) -> Option<String> {
    match quoted {
        QuotedKind::Voice { stanza_id } => {
            Some(transcribe_quoted_voice(chat_id, stanza_id, services, media_dir).await)
        }
        QuotedKind::Text(text) if !text.is_empty() => Some(format!("[quoted message]: {text}")),
        QuotedKind::Text(_) => None,
        QuotedKind::Unsupported(kind) => {
            info!("Ignoring quoted message of type {kind}");
            None
        }
    }
}

async fn transcribe_quoted_voice(
    chat_id: &str,
    stanza_id: &str,
    services: &Services,
    media_dir: &Path,
) -> String {
    let original = match services.gateway.get_message(chat_id, stanza_id).await {
        Ok(Some(message)) => message,
        Ok(None) => {
            warn!("Quoted message {stanza_id} not found");
            return VOICE_PLACEHOLDER.to_string();
        }
        Err(e) => {
            warn!("Could not fetch quoted message {stanza_id}: {e}");
            return VOICE_PLACEHOLDER.to_string();
        }
    };

    let Some(url) = original.download_url.as_deref().filter(|u| !u.is_empty()) else {
        return VOICE_NO_URL.to_string();
    };

    let scratch = ScratchFile::in_dir(media_dir, &format!("quoted_{chat_id}_{stanza_id}"), "ogg");
    if let Err(e) = services.gateway.download_to_file(url, scratch.path()).await {
        warn!("Failed to download quoted voice {stanza_id}: {e}");
        return VOICE_PLACEHOLDER.to_string();
    }

    match services.transcriber.transcribe(scratch.path()).await {
        Ok(text) if !text.is_empty() => {
            let sender = original
                .sender_name
                .as_deref()
                .filter(|s| !s.is_empty())
                .unwrap_or("someone");
            info!("🎙️ Transcribed quoted voice from {sender}");
            format!("[voice message from {sender}]: {text}")
        }
        Ok(_) => VOICE_UNRECOGNIZED.to_string(),
        Err(e) => {
            warn!("Failed to transcribe quoted voice {stanza_id}: {e}");
            VOICE_PLACEHOLDER.to_string()
        }
    }
}
