//! Inbound webhook events and the normalized turn handed to the context assembler.
//!
//! The gateway posts loosely-typed JSON keyed by `typeMessage`. Everything the
//! pipeline needs is decoded once into [`MessageKind`], so downstream code
//! matches on variants instead of strings.

use serde::Deserialize;

use crate::chatbot::media::ScratchFile;

/// The only webhook kind that carries a user message.
pub const INCOMING_MESSAGE: &str = "incomingMessageReceived";

/// Chat ids with this suffix are group chats.
const GROUP_SUFFIX: &str = "@g.us";

/// Raw webhook payload (fields the relay uses).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    #[serde(default)]
    pub type_webhook: String,
    #[serde(default)]
    pub id_message: Option<String>,
    #[serde(default)]
    pub sender_data: SenderData,
    #[serde(default)]
    pub message_data: MessageData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderData {
    #[serde(default)]
    pub chat_id: String,
    /// Absent for direct chats, where the chat id is the sender.
    pub sender: Option<String>,
    pub sender_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    #[serde(default)]
    pub type_message: String,
    pub text_message_data: Option<TextMessageData>,
    pub extended_text_message_data: Option<ExtendedTextMessageData>,
    pub file_message_data: Option<FileMessageData>,
    pub quoted_message: Option<QuotedMessage>,
    pub buttons_response_message: Option<ButtonsResponse>,
    pub interactive_response_message: Option<ButtonsResponse>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMessageData {
    #[serde(default)]
    pub text_message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedTextMessageData {
    #[serde(default)]
    pub text: String,
    pub quoted_message: Option<QuotedMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMessageData {
    pub download_url: Option<String>,
    pub caption: Option<String>,
}

/// Reply reference embedded in a message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotedMessage {
    pub stanza_id: Option<String>,
    #[serde(default)]
    pub type_message: String,
    pub text_message: Option<String>,
    pub extended_text_message: Option<QuotedExtendedText>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuotedExtendedText {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonsResponse {
    #[serde(default)]
    pub selected_button_id: String,
    #[serde(default)]
    pub selected_button_text: String,
}

/// Declared type of a quoted message.
#[derive(Debug, Clone, PartialEq)]
pub enum QuotedKind {
    Voice { stanza_id: String },
    Text(String),
    Unsupported(String),
}

/// Decoded message variant.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Text(String),
    ExtendedText { text: String, quoted: Option<QuotedKind> },
    Audio { download_url: Option<String> },
    Image { download_url: Option<String>, caption: Option<String> },
    Button { id: String, label: String },
    Unhandled(String),
}

impl QuotedMessage {
    pub fn kind(&self) -> QuotedKind {
        match self.type_message.as_str() {
            "audioMessage" | "voiceMessage" => match &self.stanza_id {
                Some(id) if !id.is_empty() => QuotedKind::Voice { stanza_id: id.clone() },
                _ => QuotedKind::Unsupported(self.type_message.clone()),
            },
            "textMessage" => QuotedKind::Text(self.text_message.clone().unwrap_or_default()),
            "extendedTextMessage" => {
                let text = self
                    .extended_text_message
                    .as_ref()
                    .map(|e| e.text.clone())
                    .filter(|t| !t.is_empty())
                    .or_else(|| self.text_message.clone())
                    .unwrap_or_default();
                QuotedKind::Text(text)
            }
            other => QuotedKind::Unsupported(other.to_string()),
        }
    }
}

impl InboundEvent {
    pub fn is_incoming_message(&self) -> bool {
        self.type_webhook == INCOMING_MESSAGE
    }

    pub fn message_id(&self) -> &str {
        self.id_message.as_deref().unwrap_or_default()
    }

    pub fn chat_id(&self) -> &str {
        &self.sender_data.chat_id
    }

    /// Sender identity; direct chats fall back to the chat id.
    pub fn sender_id(&self) -> &str {
        self.sender_data
            .sender
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.sender_data.chat_id)
    }

    pub fn sender_name(&self) -> &str {
        self.sender_data
            .sender_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or("User")
    }

    pub fn is_group(&self) -> bool {
        is_group_chat(self.chat_id())
    }

    pub fn kind(&self) -> MessageKind {
        let data = &self.message_data;
        match data.type_message.as_str() {
            "textMessage" => MessageKind::Text(
                data.text_message_data
                    .as_ref()
                    .map(|t| t.text_message.clone())
                    .unwrap_or_default(),
            ),
            "extendedTextMessage" | "quotedMessage" => {
                let ext = data.extended_text_message_data.as_ref();
                let quoted = ext
                    .and_then(|e| e.quoted_message.as_ref())
                    .or(data.quoted_message.as_ref())
                    .map(QuotedMessage::kind);
                MessageKind::ExtendedText {
                    text: ext.map(|e| e.text.clone()).unwrap_or_default(),
                    quoted,
                }
            }
            "audioMessage" | "voiceMessage" => MessageKind::Audio {
                download_url: data
                    .file_message_data
                    .as_ref()
                    .and_then(|f| f.download_url.clone())
                    .filter(|u| !u.is_empty()),
            },
            "imageMessage" => {
                let file = data.file_message_data.as_ref();
                MessageKind::Image {
                    download_url: file
                        .and_then(|f| f.download_url.clone())
                        .filter(|u| !u.is_empty()),
                    caption: file
                        .and_then(|f| f.caption.clone())
                        .filter(|c| !c.is_empty()),
                }
            }
            "buttonsResponseMessage" | "interactiveButtonsResponse" => {
                let button = data
                    .buttons_response_message
                    .as_ref()
                    .or(data.interactive_response_message.as_ref())
                    .cloned()
                    .unwrap_or_default();
                MessageKind::Button {
                    id: button.selected_button_id,
                    label: button.selected_button_text,
                }
            }
            other => MessageKind::Unhandled(other.to_string()),
        }
    }
}

pub fn is_group_chat(chat_id: &str) -> bool {
    chat_id.ends_with(GROUP_SUFFIX)
}

/// Downloaded image attached to the current turn.
#[derive(Debug)]
pub struct MediaContent {
    pub caption: String,
    /// Removed from disk when the turn is dropped.
    pub file: ScratchFile,
}

/// One user turn after extraction and quote resolution.
#[derive(Debug, Default)]
pub struct NormalizedTurn {
    pub text: String,
    pub media: Option<MediaContent>,
    pub quoted_context: Option<String>,
    /// Bare transcription for voice turns (what group capture stores).
    pub transcript: Option<String>,
}

impl NormalizedTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Default::default() }
    }

    /// Content recorded for group summaries.
    pub fn capture_text(&self) -> &str {
        self.transcript.as_deref().unwrap_or(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> InboundEvent {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_text_message() {
        let event = parse(r#"{
            "typeWebhook": "incomingMessageReceived",
            "idMessage": "BAE5F4886F6F2D05",
            "senderData": {"chatId": "77011234567@c.us", "senderName": "Aida"},
            "messageData": {
                "typeMessage": "textMessage",
                "textMessageData": {"textMessage": "Hello, bot!"}
            }
        }"#);
        assert!(event.is_incoming_message());
        assert_eq!(event.message_id(), "BAE5F4886F6F2D05");
        assert_eq!(event.sender_id(), "77011234567@c.us");
        assert_eq!(event.sender_name(), "Aida");
        assert!(!event.is_group());
        assert_eq!(event.kind(), MessageKind::Text("Hello, bot!".into()));
    }

    #[test]
    fn test_group_sender_differs_from_chat() {
        let event = parse(r#"{
            "typeWebhook": "incomingMessageReceived",
            "idMessage": "A1",
            "senderData": {"chatId": "120363043@g.us", "sender": "77019876543@c.us"},
            "messageData": {"typeMessage": "textMessage", "textMessageData": {"textMessage": "hi"}}
        }"#);
        assert!(event.is_group());
        assert_eq!(event.sender_id(), "77019876543@c.us");
        assert_eq!(event.sender_name(), "User");
    }

    #[test]
    fn test_extended_text_with_quoted_voice() {
        let event = parse(r#"{
            "typeWebhook": "incomingMessageReceived",
            "idMessage": "A2",
            "senderData": {"chatId": "77011234567@c.us"},
            "messageData": {
                "typeMessage": "extendedTextMessage",
                "extendedTextMessageData": {
                    "text": "what did he say?",
                    "quotedMessage": {"stanzaId": "Q1", "typeMessage": "audioMessage"}
                }
            }
        }"#);
        assert_eq!(
            event.kind(),
            MessageKind::ExtendedText {
                text: "what did he say?".into(),
                quoted: Some(QuotedKind::Voice { stanza_id: "Q1".into() }),
            }
        );
    }

    #[test]
    fn test_quoted_message_type_reads_top_level_quote() {
        let event = parse(r#"{
            "typeWebhook": "incomingMessageReceived",
            "idMessage": "A3",
            "senderData": {"chatId": "77011234567@c.us"},
            "messageData": {
                "typeMessage": "quotedMessage",
                "extendedTextMessageData": {"text": "agreed"},
                "quotedMessage": {"stanzaId": "Q2", "typeMessage": "textMessage", "textMessage": "rust?"}
            }
        }"#);
        assert_eq!(
            event.kind(),
            MessageKind::ExtendedText {
                text: "agreed".into(),
                quoted: Some(QuotedKind::Text("rust?".into())),
            }
        );
    }

    #[test]
    fn test_quoted_extended_text_falls_back_to_text_message() {
        let quoted = QuotedMessage {
            stanza_id: Some("Q".into()),
            type_message: "extendedTextMessage".into(),
            text_message: Some("fallback".into()),
            extended_text_message: None,
        };
        assert_eq!(quoted.kind(), QuotedKind::Text("fallback".into()));
    }

    #[test]
    fn test_quoted_voice_without_stanza_is_unsupported() {
        let quoted = QuotedMessage {
            type_message: "voiceMessage".into(),
            ..Default::default()
        };
        assert!(matches!(quoted.kind(), QuotedKind::Unsupported(_)));
    }

    #[test]
    fn test_image_and_audio() {
        let image = parse(r#"{
            "typeWebhook": "incomingMessageReceived",
            "idMessage": "I1",
            "senderData": {"chatId": "1@c.us"},
            "messageData": {
                "typeMessage": "imageMessage",
                "fileMessageData": {"downloadUrl": "https://cdn/x.jpg", "caption": "my cat"}
            }
        }"#);
        assert_eq!(
            image.kind(),
            MessageKind::Image {
                download_url: Some("https://cdn/x.jpg".into()),
                caption: Some("my cat".into()),
            }
        );

        let voice = parse(r#"{
            "typeWebhook": "incomingMessageReceived",
            "idMessage": "V1",
            "senderData": {"chatId": "1@c.us"},
            "messageData": {"typeMessage": "voiceMessage", "fileMessageData": {"downloadUrl": ""}}
        }"#);
        assert_eq!(voice.kind(), MessageKind::Audio { download_url: None });
    }

    #[test]
    fn test_button_response() {
        let event = parse(r#"{
            "typeWebhook": "incomingMessageReceived",
            "idMessage": "B1",
            "senderData": {"chatId": "1@c.us"},
            "messageData": {
                "typeMessage": "buttonsResponseMessage",
                "buttonsResponseMessage": {"selectedButtonId": "btn_reset", "selectedButtonText": "Reset"}
            }
        }"#);
        assert_eq!(
            event.kind(),
            MessageKind::Button { id: "btn_reset".into(), label: "Reset".into() }
        );
    }

    #[test]
    fn test_unknown_type_is_unhandled() {
        let event = parse(r#"{
            "typeWebhook": "incomingMessageReceived",
            "idMessage": "S1",
            "senderData": {"chatId": "1@c.us"},
            "messageData": {"typeMessage": "stickerMessage"}
        }"#);
        assert_eq!(event.kind(), MessageKind::Unhandled("stickerMessage".into()));
    }

    #[test]
    fn test_capture_text_prefers_transcript() {
        let mut turn = NormalizedTurn::text("The user sent a voice message. Text: hi");
        assert_eq!(turn.capture_text(), "The user sent a voice message. Text: hi");
        turn.transcript = Some("hi".into());
        assert_eq!(turn.capture_text(), "hi");
    }
}
