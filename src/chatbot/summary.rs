//! `/summary` for group chats.
//!
//! Reads the gateway's own chat journal first (it includes messages sent
//! while the relay was down) and falls back to the locally captured buffer.

use std::path::Path;

use tracing::{info, warn};

use crate::chatbot::media::ScratchFile;
use crate::chatbot::services::{Content, GatewayMessage, LlmMessage, Role, Services};
use crate::config::BotConfig;
use crate::error::Result;

/// Upper bound on transcript text sent to the model.
pub const MAX_TRANSCRIPT_CHARS: usize = 4000;
const TRUNCATED_MARKER: &str = "...[truncated]...\n";

pub const NOTHING_TO_SUMMARIZE: &str = "No messages to summarize.";

struct Transcript {
    lines: Vec<String>,
    voice_count: usize,
}

pub async fn summarize(
    chat_id: &str,
    services: &Services,
    bot: &BotConfig,
    model: Option<&str>,
) -> Result<String> {
    let transcript = match services.gateway.recent_history(chat_id, bot.summary_message_count).await {
        Ok(history) if !history.is_empty() => {
            from_gateway(history, services, &bot.media_dir).await
        }
        Ok(_) => from_buffer(chat_id, services, bot.summary_message_count).await?,
        Err(e) => {
            warn!(chat_id, "Chat history unavailable, using captured messages: {e}");
            from_buffer(chat_id, services, bot.summary_message_count).await?
        }
    };

    if transcript.lines.is_empty() {
        return Ok(NOTHING_TO_SUMMARIZE.to_string());
    }

    let text = clip_transcript(&transcript.lines.join("\n"), MAX_TRANSCRIPT_CHARS);
    let messages = [LlmMessage {
        role: Role::User,
        content: Content::Text(format!("{}\n\n{text}", bot.summary_prompt)),
    }];
    let summary = services.llm.complete(&messages, model).await?;
    info!(chat_id, "📋 Summarized {} messages", transcript.lines.len());

    Ok(format!(
        "{}\n\n{summary}",
        summary_header(transcript.lines.len(), transcript.voice_count)
    ))
}

pub fn summary_header(messages: usize, voice: usize) -> String {
    if voice > 0 {
        format!("📋 *Summary* ({messages} messages, 🎙️ {voice}):")
    } else {
        format!("📋 *Summary* ({messages} messages):")
    }
}

/// Keep the most recent `max` characters.
pub fn clip_transcript(text: &str, max: usize) -> String {
    let total = text.chars().count();
    if total <= max {
        return text.to_string();
    }
    let tail: String = text.chars().skip(total - max).collect();
    format!("{TRUNCATED_MARKER}{tail}")
}

async fn from_buffer(chat_id: &str, services: &Services, count: usize) -> Result<Transcript> {
    let messages = services.store.group_messages(chat_id, count).await?;
    Ok(Transcript {
        lines: messages
            .into_iter()
            .map(|m| format!("{}: {}", m.sender, m.content))
            .collect(),
        voice_count: 0,
    })
}

/// The gateway returns newest first.
async fn from_gateway(history: Vec<GatewayMessage>, services: &Services, media_dir: &Path) -> Transcript {
    let mut transcript = Transcript { lines: Vec::new(), voice_count: 0 };
    for message in history.into_iter().rev() {
        let sender = if message.is_outgoing() {
            "Bot".to_string()
        } else {
            message.sender_name.clone().filter(|s| !s.is_empty()).unwrap_or_else(|| "?".into())
        };

        let content = match message.type_message.as_str() {
            "textMessage" => message.text_message.clone(),
            "extendedTextMessage" => message.extended_text_message.as_ref().map(|e| e.text.clone()),
            "audioMessage" | "voiceMessage" => {
                let text = transcribe_entry(&message, services, media_dir).await;
                if text.is_some() {
                    transcript.voice_count += 1;
                }
                Some(text.map(|t| format!("[🎙️]: {t}")).unwrap_or_else(|| "[🎙️]".into()))
            }
            "imageMessage" => Some(format!("[📷] {}", message.caption.clone().unwrap_or_default())),
            _ => None,
        };

        if let Some(content) = content.filter(|c| !c.trim().is_empty()) {
            transcript.lines.push(format!("{sender}: {content}"));
        }
    }
    transcript
}

async fn transcribe_entry(message: &GatewayMessage, services: &Services, media_dir: &Path) -> Option<String> {
    let url = message.download_url.as_deref().filter(|u| !u.is_empty())?;
    let id = if message.id_message.is_empty() { "tmp" } else { message.id_message.as_str() };
    let scratch = ScratchFile::in_dir(media_dir, &format!("sum_{id}"), "ogg");

    if let Err(e) = services.gateway.download_to_file(url, scratch.path()).await {
        warn!("Summary voice download failed: {e}");
        return None;
    }
    match services.transcriber.transcribe(scratch.path()).await {
        Ok(text) if !text.is_empty() => Some(text),
        Ok(_) => None,
        Err(e) => {
            warn!("Summary voice transcription failed: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_keeps_recent_tail() {
        assert_eq!(clip_transcript("short", 10), "short");
        let clipped = clip_transcript("aaaaabbbbb", 5);
        assert_eq!(clipped, format!("{TRUNCATED_MARKER}bbbbb"));
    }

    #[test]
    fn test_clip_counts_chars_not_bytes() {
        let text = "привет мир";
        assert_eq!(clip_transcript(text, 10), text);
        assert!(clip_transcript(text, 3).ends_with("мир"));
    }

    #[test]
    fn test_header() {
        assert_eq!(summary_header(12, 0), "📋 *Summary* (12 messages):");
        assert_eq!(summary_header(12, 3), "📋 *Summary* (12 messages, 🎙️ 3):");
    }
}
