//! Builds the provider message list for one turn.

use crate::chatbot::message::NormalizedTurn;
use crate::chatbot::services::{ChatHistoryEntry, Content, LlmMessage, Role};

/// Persisted history (oldest first) followed by the current user turn.
///
/// In groups `speaker` names the sender, written as `"{speaker}: {text}"` to
/// match the stored group history lines.
pub fn assemble(
    history: &[ChatHistoryEntry],
    turn: &NormalizedTurn,
    speaker: Option<&str>,
) -> Vec<LlmMessage> {
    let mut messages: Vec<LlmMessage> = history
        .iter()
        .map(|entry| LlmMessage {
            role: entry.role,
            content: Content::Text(entry.content.clone()),
        })
        .collect();
    messages.push(LlmMessage { role: Role::User, content: turn_content(turn, speaker) });
    messages
}

/// Images go out as structured content carrying the caption and the file.
pub fn turn_content(turn: &NormalizedTurn, speaker: Option<&str>) -> Content {
    let quoted = turn.quoted_context.as_deref();
    match &turn.media {
        Some(media) => Content::Structured {
            text: with_quote(quoted, &spoken_by(speaker, &media.caption)),
            files: vec![media.file.path().to_path_buf()],
        },
        None => Content::Text(with_quote(quoted, &spoken_by(speaker, &turn.text))),
    }
}

fn spoken_by(speaker: Option<&str>, text: &str) -> String {
    match speaker {
        Some(name) => format!("{name}: {text}"),
        None => text.to_string(),
    }
}

fn with_quote(quoted: Option<&str>, text: &str) -> String {
    match quoted {
        Some(q) => format!("{q}\n\nUser question: {text}"),
        None => text.to_string(),
    }
}
