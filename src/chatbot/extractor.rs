//! Turns an inbound event into a [`NormalizedTurn`].
//!
//! Enrichment failures (download, transcription) become placeholder text so
//! the turn still reaches the model.

use std::path::Path;

use tracing::{info, warn};

use crate::chatbot::media::ScratchFile;
use crate::chatbot::message::{InboundEvent, MediaContent, MessageKind, NormalizedTurn};
use crate::chatbot::quoted;
use crate::chatbot::services::{ChatSettings, Services};

pub const VOICE_UNAVAILABLE: &str = "(Could not get the voice message)";
pub const VOICE_UNRECOGNIZED: &str = "(Could not recognize the voice message)";
pub const IMAGE_DEFAULT: &str = "The user sent an image.";

#[derive(Debug)]
pub enum Extraction {
    Turn(NormalizedTurn),
    /// Button press, routed to the button action table.
    Button { id: String, label: String },
    /// Transcribe-only mode: the transcription was sent back, nothing else to do.
    Transcribed,
    /// Message type the relay does not handle.
    Unhandled(String),
}

pub async fn extract(
    event: &InboundEvent,
    settings: &ChatSettings,
    services: &Services,
    media_dir: &Path,
) -> Extraction {
    let chat_id = event.chat_id();
    match event.kind() {
        MessageKind::Text(text) => Extraction::Turn(NormalizedTurn::text(text)),
        MessageKind::ExtendedText { text, quoted } => {
            let quoted_context = match &quoted {
                Some(q) => quoted::resolve(q, chat_id, services, media_dir).await,
                None => None,
            };
            Extraction::Turn(NormalizedTurn { text, quoted_context, ..Default::default() })
        }
        MessageKind::Audio { download_url } => {
            audio_turn(event, download_url.as_deref(), settings, services, media_dir).await
        }
        MessageKind::Image { download_url, caption } => {
            Extraction::Turn(image_turn(event, download_url.as_deref(), caption, services, media_dir).await)
        }
        MessageKind::Button { id, label } => Extraction::Button { id, label },
        MessageKind::Unhandled(kind) => Extraction::Unhandled(kind),
    }
}

fn scratch_for(event: &InboundEvent, media_dir: &Path, extension: &str) -> ScratchFile {
    ScratchFile::in_dir(media_dir, &format!("{}_{}", event.chat_id(), event.message_id()), extension)
}

async fn audio_turn(
    event: &InboundEvent,
    download_url: Option<&str>,
    settings: &ChatSettings,
    services: &Services,
    media_dir: &Path,
) -> Extraction {
    let Some(url) = download_url else {
        return Extraction::Turn(NormalizedTurn::text(VOICE_UNAVAILABLE));
    };

    let scratch = scratch_for(event, media_dir, "ogg");
    if let Err(e) = services.gateway.download_to_file(url, scratch.path()).await {
        warn!(message_id = event.message_id(), "Voice download failed: {e}");
        return Extraction::Turn(NormalizedTurn::text(VOICE_UNAVAILABLE));
    }

    let transcription = match services.transcriber.transcribe(scratch.path()).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => return Extraction::Turn(NormalizedTurn::text(VOICE_UNRECOGNIZED)),
        Err(e) => {
            warn!(message_id = event.message_id(), "Transcription failed: {e}");
            return Extraction::Turn(NormalizedTurn::text(VOICE_UNRECOGNIZED));
        }
    };
    drop(scratch);

    if settings.transcribe_mode {
        let reply = format!("🎙️ *Transcription:*\n\n{transcription}");
        if let Err(e) = services.gateway.send_text(event.chat_id(), &reply).await {
            warn!(chat_id = event.chat_id(), "Failed to send transcription: {e}");
        }
        info!(chat_id = event.chat_id(), "🎙️ Sent transcription (transcribe-only mode)");
        return Extraction::Transcribed;
    }

    Extraction::Turn(NormalizedTurn {
        text: format!("The user sent a voice message. Text: {transcription}"),
        transcript: Some(transcription),
        ..Default::default()
    })
}

async fn image_turn(
    event: &InboundEvent,
    download_url: Option<&str>,
    caption: Option<String>,
    services: &Services,
    media_dir: &Path,
) -> NormalizedTurn {
    let Some(url) = download_url else {
        return NormalizedTurn::text(IMAGE_DEFAULT);
    };

    let file = scratch_for(event, media_dir, "jpg");
    if let Err(e) = services.gateway.download_to_file(url, file.path()).await {
        warn!(message_id = event.message_id(), "Image download failed: {e}");
        return NormalizedTurn::text(IMAGE_DEFAULT);
    }

    let caption = caption.unwrap_or_else(|| IMAGE_DEFAULT.to_string());
    NormalizedTurn {
        text: format!("The user sent an image. Caption: {caption}"),
        media: Some(MediaContent { caption, file }),
        ..Default::default()
    }
}
