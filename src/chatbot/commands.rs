//! Slash commands and button actions.
//!
//! Commands live in a registry built once at startup. A command is matched
//! on its leading `/token` (case-insensitive); the rest of the text is its
//! argument string. Admin commands are invisible to everyone but the admin,
//! so for other senders they fall through to normal conversation.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::chatbot::media::ScratchFile;
use crate::chatbot::services::{ChatSettings, Services};
use crate::chatbot::summary;
use crate::config::BotConfig;
use crate::error::{Error, Result};

pub const NOT_CONFIGURED_REPLY: &str = "⚙️ The AI service is not configured.";
const COMMAND_FAILED_REPLY: &str = "❌ Command failed. Please try again later.";
const UPLOAD_FAILED_REPLY: &str = "❌ Could not send the picture. Please try again.";

/// What a command sends back. Exactly one of these per recognized command.
#[derive(Debug)]
pub enum Reply {
    Text(String),
    /// Generated image; removed from disk once the upload attempt is over.
    Image { file: ScratchFile, caption: String },
}

impl Reply {
    fn text(s: impl Into<String>) -> Self {
        Reply::Text(s.into())
    }
}

/// Everything a command may look at or change.
pub struct CommandContext<'a> {
    pub chat_id: &'a str,
    pub sender_id: &'a str,
    pub is_group: bool,
    pub settings: &'a ChatSettings,
    pub services: &'a Services,
    pub bot: &'a BotConfig,
    pub registry: &'a CommandRegistry,
}

impl CommandContext<'_> {
    fn model(&self) -> Option<&str> {
        self.settings.preferred_model.as_deref()
    }

    fn active_model(&self) -> &str {
        self.model().unwrap_or_else(|| self.services.llm.default_model())
    }
}

#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn admin_only(&self) -> bool {
        false
    }
    async fn execute(&self, args: &str, ctx: &CommandContext<'_>) -> Result<Reply>;
}

/// Split `/Name rest of text` into (`name`, `rest of text`).
pub fn parse_command(text: &str) -> Option<(String, &str)> {
    let body = text.trim().strip_prefix('/')?;
    let (token, args) = match body.find(char::is_whitespace) {
        Some(i) => (&body[..i], body[i..].trim()),
        None => (body, ""),
    };
    if token.is_empty() {
        return None;
    }
    Some((token.to_lowercase(), args))
}

pub struct CommandRegistry {
    commands: Vec<Box<dyn Command>>,
}

impl CommandRegistry {
    pub fn builtin() -> Self {
        Self {
            commands: vec![
                Box::new(ResetCommand),
                Box::new(AiCommand),
                Box::new(SummaryCommand),
                Box::new(TranscribeCommand),
                Box::new(StatsCommand),
                Box::new(ModelCommand),
                Box::new(SearchCommand),
                Box::new(DrawCommand),
                Box::new(HelpCommand),
                Box::new(BanCommand),
                Box::new(UnbanCommand),
                Box::new(BlacklistCommand),
            ],
        }
    }

    /// Admin commands are only found for the admin.
    pub fn find(&self, name: &str, is_admin: bool) -> Option<&dyn Command> {
        self.commands
            .iter()
            .find(|c| c.name() == name && (is_admin || !c.admin_only()))
            .map(|c| c.as_ref())
    }

    pub fn help_text(&self, nickname: &str) -> String {
        let mut lines = vec!["📚 *Bot commands:*".to_string(), String::new()];
        for command in self.commands.iter().filter(|c| !c.admin_only()) {
            lines.push(format!("/{} - {}", command.name(), command.description()));
        }
        lines.push(String::new());
        lines.push(format!("💡 Nickname: *{nickname}*"));
        lines.join("\n")
    }
}

/// Run a command and convert any failure into a user-facing reply.
pub async fn run(command: &dyn Command, args: &str, ctx: &CommandContext<'_>) -> Reply {
    match command.execute(args, ctx).await {
        Ok(reply) => reply,
        Err(Error::NotConfigured(what)) => {
            warn!(chat_id = ctx.chat_id, "/{}: {what} is not configured", command.name());
            Reply::text(NOT_CONFIGURED_REPLY)
        }
        Err(e) => {
            warn!(chat_id = ctx.chat_id, "/{} failed: {e}", command.name());
            Reply::text(COMMAND_FAILED_REPLY)
        }
    }
}

/// Deliver a reply. Image uploads that fail are replaced by a text notice.
pub async fn deliver(reply: Reply, chat_id: &str, services: &Services) {
    match reply {
        Reply::Text(text) => {
            if let Err(e) = services.gateway.send_text(chat_id, &text).await {
                warn!(chat_id, "Failed to send command reply: {e}");
            }
        }
        Reply::Image { file, caption } => {
            let uploaded = services.gateway.send_file_upload(chat_id, file.path(), &caption).await;
            drop(file);
            if let Err(e) = uploaded {
                warn!(chat_id, "Image upload failed: {e}");
                if let Err(e) = services.gateway.send_text(chat_id, UPLOAD_FAILED_REPLY).await {
                    warn!(chat_id, "Failed to send upload notice: {e}");
                }
            }
        }
    }
}

// ==================== BUTTONS ====================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    Reset,
    Help,
    Transcribe,
    AiOn,
    AiOff,
    Unknown(String),
}

impl ButtonAction {
    pub fn parse(id: &str) -> Self {
        match id {
            "btn_reset" => ButtonAction::Reset,
            "btn_help" => ButtonAction::Help,
            "btn_transcribe" => ButtonAction::Transcribe,
            "btn_ai_on" => ButtonAction::AiOn,
            "btn_ai_off" => ButtonAction::AiOff,
            other => ButtonAction::Unknown(other.to_string()),
        }
    }

    /// The text command a button stands for, with its arguments.
    pub fn as_command(&self) -> Option<(&'static str, &'static str)> {
        match self {
            ButtonAction::Reset => Some(("reset", "")),
            ButtonAction::Help => Some(("help", "")),
            ButtonAction::Transcribe => Some(("transcribe", "")),
            ButtonAction::AiOn => Some(("ai", "on")),
            ButtonAction::AiOff => Some(("ai", "off")),
            ButtonAction::Unknown(_) => None,
        }
    }
}

// ==================== BUILT-IN COMMANDS ====================

struct AiCommand;

#[async_trait]
impl Command for AiCommand {
    fn name(&self) -> &'static str {
        "ai"
    }
    fn description(&self) -> &'static str {
        "on|off - auto-replies in groups"
    }
    async fn execute(&self, args: &str, ctx: &CommandContext<'_>) -> Result<Reply> {
        let enabled = match args.to_lowercase().as_str() {
            "on" => true,
            "off" => false,
            _ => return Ok(Reply::text("Usage: /ai on | /ai off")),
        };
        let mut settings = ctx.settings.clone();
        settings.ai_enabled = enabled;
        ctx.services.store.save_settings(&settings).await?;
        Ok(Reply::text(if enabled {
            "🤖 Auto-replies enabled."
        } else {
            "😴 Auto-replies disabled."
        }))
    }
}

struct ResetCommand;

#[async_trait]
impl Command for ResetCommand {
    fn name(&self) -> &'static str {
        "reset"
    }
    fn description(&self) -> &'static str {
        "clear the bot's memory"
    }
    async fn execute(&self, _args: &str, ctx: &CommandContext<'_>) -> Result<Reply> {
        ctx.services.store.clear_history(ctx.chat_id).await?;
        ctx.services.store.clear_group_messages(ctx.chat_id).await?;
        info!(chat_id = ctx.chat_id, "🔄 Context reset");
        Ok(Reply::text("🔄 Context reset."))
    }
}

struct HelpCommand;

#[async_trait]
impl Command for HelpCommand {
    fn name(&self) -> &'static str {
        "help"
    }
    fn description(&self) -> &'static str {
        "this list"
    }
    async fn execute(&self, _args: &str, ctx: &CommandContext<'_>) -> Result<Reply> {
        Ok(Reply::Text(ctx.registry.help_text(&ctx.bot.nickname)))
    }
}

struct TranscribeCommand;

#[async_trait]
impl Command for TranscribeCommand {
    fn name(&self) -> &'static str {
        "transcribe"
    }
    fn description(&self) -> &'static str {
        "toggle transcribe-only mode for voice messages"
    }
    async fn execute(&self, _args: &str, ctx: &CommandContext<'_>) -> Result<Reply> {
        let mut settings = ctx.settings.clone();
        settings.transcribe_mode = !settings.transcribe_mode;
        ctx.services.store.save_settings(&settings).await?;
        Ok(Reply::text(if settings.transcribe_mode {
            "🎙️ Transcribe-only mode ON"
        } else {
            "🤖 Transcribe-only mode OFF"
        }))
    }
}

struct StatsCommand;

#[async_trait]
impl Command for StatsCommand {
    fn name(&self) -> &'static str {
        "stats"
    }
    fn description(&self) -> &'static str {
        "memory and model statistics"
    }
    async fn execute(&self, _args: &str, ctx: &CommandContext<'_>) -> Result<Reply> {
        let stored = ctx.services.store.history_len(ctx.chat_id).await?;
        Ok(Reply::Text(format!(
            "📊 *Stats:*\n\n💬 Messages in memory: {stored}\n🧠 Model: {}\n🤖 Nickname: {}",
            ctx.active_model(),
            ctx.bot.nickname
        )))
    }
}

struct ModelCommand;

#[async_trait]
impl Command for ModelCommand {
    fn name(&self) -> &'static str {
        "model"
    }
    fn description(&self) -> &'static str {
        "[name|default] - list or switch the AI model"
    }
    async fn execute(&self, args: &str, ctx: &CommandContext<'_>) -> Result<Reply> {
        if args.eq_ignore_ascii_case("default") {
            let mut settings = ctx.settings.clone();
            settings.preferred_model = None;
            ctx.services.store.save_settings(&settings).await?;
            return Ok(Reply::Text(format!(
                "🧠 Model reset to default: {}",
                ctx.services.llm.default_model()
            )));
        }

        let models = ctx.services.llm.list_models().await;
        if args.is_empty() {
            let current = ctx.active_model();
            let mut lines = vec![format!("🧠 *Current model:* {current}"), String::new()];
            for m in &models {
                let marker = if m.id == current { "✅" } else { "•" };
                lines.push(format!("{marker} {} - {}", m.id, m.description));
            }
            lines.push(String::new());
            lines.push("Switch: /model <name>, reset: /model default".to_string());
            return Ok(Reply::Text(lines.join("\n")));
        }

        let Some(model) = models.iter().find(|m| m.id == args) else {
            return Ok(Reply::Text(format!("❌ Unknown model: {args}\n\nSee /model for the list.")));
        };
        let mut settings = ctx.settings.clone();
        settings.preferred_model = Some(model.id.clone());
        ctx.services.store.save_settings(&settings).await?;
        info!(chat_id = ctx.chat_id, "🧠 Model set to {}", model.id);
        Ok(Reply::Text(format!("🧠 Model set: {}", model.id)))
    }
}

struct SearchCommand;

#[async_trait]
impl Command for SearchCommand {
    fn name(&self) -> &'static str {
        "search"
    }
    fn description(&self) -> &'static str {
        "<query> - web search with an AI answer"
    }
    async fn execute(&self, args: &str, ctx: &CommandContext<'_>) -> Result<Reply> {
        if args.is_empty() {
            return Ok(Reply::text(
                "🔍 *Web search*\n\nUsage: /search <query>\nExample: /search weather in Almaty",
            ));
        }
        let answer = ctx.services.search.search_and_summarize(args, ctx.model()).await?;
        Ok(Reply::Text(answer))
    }
}

struct DrawCommand;

#[async_trait]
impl Command for DrawCommand {
    fn name(&self) -> &'static str {
        "draw"
    }
    fn description(&self) -> &'static str {
        "<description> - generate a picture"
    }
    async fn execute(&self, args: &str, ctx: &CommandContext<'_>) -> Result<Reply> {
        if args.is_empty() {
            return Ok(Reply::text(
                "🎨 *Image generation*\n\nUsage: /draw <description>\nExample: /draw a cat in space",
            ));
        }
        match ctx.services.images.generate_image(args, ctx.model()).await {
            Ok(image) => {
                let file = ScratchFile::new(image.path);
                Ok(Reply::Image { caption: draw_caption(args, &image.prompt, image.seed), file })
            }
            Err(e) => {
                warn!(chat_id = ctx.chat_id, "Image generation failed: {e}");
                Ok(Reply::text(
                    "❌ Image generation failed.\n\n💡 Try another prompt, a simpler description or English.",
                ))
            }
        }
    }
}

pub fn draw_caption(prompt: &str, enhanced: &str, seed: u32) -> String {
    let preview: String = if enhanced.chars().count() > 150 {
        format!("{}...", enhanced.chars().take(150).collect::<String>())
    } else {
        enhanced.to_string()
    };
    format!("🎨 *{prompt}*\n\n✨ _{preview}_\n\n🌱 Seed: {seed}")
}

struct SummaryCommand;

#[async_trait]
impl Command for SummaryCommand {
    fn name(&self) -> &'static str {
        "summary"
    }
    fn description(&self) -> &'static str {
        "summarize the group chat"
    }
    async fn execute(&self, _args: &str, ctx: &CommandContext<'_>) -> Result<Reply> {
        if !ctx.is_group {
            return Ok(Reply::text("This command is only available in groups."));
        }
        let text = summary::summarize(ctx.chat_id, ctx.services, ctx.bot, ctx.model()).await?;
        Ok(Reply::Text(text))
    }
}

// ==================== ADMIN COMMANDS ====================

struct BanCommand;

#[async_trait]
impl Command for BanCommand {
    fn name(&self) -> &'static str {
        "ban"
    }
    fn description(&self) -> &'static str {
        "<id> [reason] - block a user"
    }
    fn admin_only(&self) -> bool {
        true
    }
    async fn execute(&self, args: &str, ctx: &CommandContext<'_>) -> Result<Reply> {
        let mut parts = args.splitn(2, char::is_whitespace);
        let Some(target) = parts.next().filter(|t| !t.is_empty()) else {
            return Ok(Reply::text("Usage: /ban <id> [reason]"));
        };
        let reason = parts.next().map(str::trim).filter(|r| !r.is_empty()).unwrap_or("blocked");
        ctx.services.store.blacklist_add(target, reason).await?;
        info!(admin = ctx.sender_id, "🚫 Banned {target}: {reason}");
        Ok(Reply::Text(format!("🚫 {target} blocked")))
    }
}

struct UnbanCommand;

#[async_trait]
impl Command for UnbanCommand {
    fn name(&self) -> &'static str {
        "unban"
    }
    fn description(&self) -> &'static str {
        "<id> - unblock a user"
    }
    fn admin_only(&self) -> bool {
        true
    }
    async fn execute(&self, args: &str, ctx: &CommandContext<'_>) -> Result<Reply> {
        let Some(target) = args.split_whitespace().next() else {
            return Ok(Reply::text("Usage: /unban <id>"));
        };
        if ctx.services.store.blacklist_remove(target).await? {
            info!(admin = ctx.sender_id, "✅ Unbanned {target}");
            Ok(Reply::Text(format!("✅ {target} unblocked")))
        } else {
            Ok(Reply::Text(format!("{target} is not blocked")))
        }
    }
}

struct BlacklistCommand;

#[async_trait]
impl Command for BlacklistCommand {
    fn name(&self) -> &'static str {
        "blacklist"
    }
    fn description(&self) -> &'static str {
        "list blocked users"
    }
    fn admin_only(&self) -> bool {
        true
    }
    async fn execute(&self, _args: &str, ctx: &CommandContext<'_>) -> Result<Reply> {
        let entries = ctx.services.store.blacklist().await?;
        if entries.is_empty() {
            return Ok(Reply::text("Blacklist is empty"));
        }
        let lines: Vec<String> = entries
            .iter()
            .map(|e| format!("• {} ({})", e.user_id, e.reason))
            .collect();
        Ok(Reply::Text(format!("🚫 Blacklist:\n{}", lines.join("\n"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("/reset"), Some(("reset".to_string(), "")));
        assert_eq!(parse_command("  /AI On "), Some(("ai".to_string(), "On")));
        assert_eq!(
            parse_command("/search   rust async  book"),
            Some(("search".to_string(), "rust async  book"))
        );
        assert_eq!(parse_command("hello /reset"), None);
        assert_eq!(parse_command("/"), None);
        assert_eq!(parse_command("/ reset"), None);
    }

    #[test]
    fn test_registry_hides_admin_commands() {
        let registry = CommandRegistry::builtin();
        assert!(registry.find("reset", false).is_some());
        assert!(registry.find("ban", false).is_none());
        assert!(registry.find("ban", true).is_some());
        assert!(registry.find("unknown", true).is_none());
    }

    #[test]
    fn test_help_lists_public_commands() {
        let help = CommandRegistry::builtin().help_text("ботяра");
        assert!(help.contains("/reset - "));
        assert!(help.contains("/draw - "));
        assert!(!help.contains("/ban"));
        assert!(help.contains("ботяра"));
    }

    #[test]
    fn test_button_actions() {
        assert_eq!(ButtonAction::parse("btn_reset").as_command(), Some(("reset", "")));
        assert_eq!(ButtonAction::parse("btn_ai_off").as_command(), Some(("ai", "off")));
        let unknown = ButtonAction::parse("btn_pizza");
        assert_eq!(unknown, ButtonAction::Unknown("btn_pizza".into()));
        assert_eq!(unknown.as_command(), None);
    }

    #[test]
    fn test_draw_caption() {
        let caption = draw_caption("cat", "A cat", 7);
        assert_eq!(caption, "🎨 *cat*\n\n✨ _A cat_\n\n🌱 Seed: 7");

        let long = "x".repeat(200);
        let caption = draw_caption("cat", &long, 7);
        assert!(caption.contains(&format!("_{}..._", "x".repeat(150))));
    }
}
