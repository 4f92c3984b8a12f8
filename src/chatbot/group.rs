//! When the bot speaks up in a group chat.

use regex::Regex;

/// Nickname matcher, compiled once from the configured nickname.
pub struct NicknameTrigger {
    nickname: String,
    word: Option<Regex>,
}

impl NicknameTrigger {
    pub fn new(nickname: &str) -> Self {
        let nickname = nickname.trim().to_lowercase();
        // `\b` is Unicode-aware, so Cyrillic nicknames match as whole words.
        let word = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&nickname))).ok();
        Self { nickname, word }
    }

    /// Whole-word mention anywhere, or the message opens with `nick ` / `nick,`.
    pub fn is_mentioned(&self, text: &str) -> bool {
        if self.word.as_ref().is_some_and(|re| re.is_match(text)) {
            return true;
        }
        let lower = text.to_lowercase();
        lower.starts_with(&format!("{} ", self.nickname))
            || lower.starts_with(&format!("{},", self.nickname))
    }

    /// Reply when auto-reply is on for the chat or the bot was addressed.
    pub fn should_reply(&self, ai_enabled: bool, text: &str) -> bool {
        let mentioned = self.is_mentioned(text);
        ai_enabled || mentioned
    }
}
