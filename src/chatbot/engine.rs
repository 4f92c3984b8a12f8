//! Chatbot engine - turns one inbound gateway event into at most one reply.
//!
//! Order of a run: admission, blacklist, extraction, commands, group capture
//! and trigger, context assembly, completion, persistence, send. Every
//! collaborator failure is handled here; nothing escapes a run.

use tracing::{debug, error, info, warn};

use crate::chatbot::admission::{Admission, Verdict};
use crate::chatbot::commands::{self, ButtonAction, CommandContext, CommandRegistry, NOT_CONFIGURED_REPLY};
use crate::chatbot::context;
use crate::chatbot::extractor::{self, Extraction};
use crate::chatbot::group::NicknameTrigger;
use crate::chatbot::message::{InboundEvent, NormalizedTurn};
use crate::chatbot::services::{ChatHistoryEntry, ChatSettings, Role, Services};
use crate::config::{BotConfig, LimitsConfig};
use crate::error::Error;

pub const APOLOGY_REPLY: &str = "❌ Could not get a response from the AI. Please try again later.";

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Duplicate,
    RateLimited,
    /// Not a user message, no message id, or nothing to respond to.
    Ignored,
    Blacklisted,
    /// Transcribe-only mode answered with the transcription.
    Transcribed,
    Button,
    Command(String),
    /// Group message stored, bot not addressed.
    NotTriggered,
    Replied,
    LlmFailed,
}

pub struct ChatbotEngine {
    bot: BotConfig,
    services: Services,
    admission: Admission,
    commands: CommandRegistry,
    trigger: NicknameTrigger,
}

impl ChatbotEngine {
    pub fn new(bot: BotConfig, limits: LimitsConfig, services: Services) -> Self {
        let trigger = NicknameTrigger::new(&bot.nickname);
        Self {
            bot,
            services,
            admission: Admission::new(limits),
            commands: CommandRegistry::builtin(),
            trigger,
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Admission control only. `None` means the event may proceed.
    pub fn admit(&self, event: &InboundEvent) -> Option<PipelineOutcome> {
        if !event.is_incoming_message() || event.message_id().is_empty() {
            return Some(PipelineOutcome::Ignored);
        }
        match self.admission.admit(event.message_id(), event.chat_id()) {
            Verdict::Allowed => None,
            Verdict::Duplicate => {
                debug!(message_id = event.message_id(), "Duplicate delivery dropped");
                Some(PipelineOutcome::Duplicate)
            }
            Verdict::RateLimited => {
                warn!(chat_id = event.chat_id(), "⏳ Rate limit exceeded, dropping message");
                Some(PipelineOutcome::RateLimited)
            }
        }
    }

    /// Admission followed by the full pipeline.
    pub async fn handle_event(&self, event: InboundEvent) -> PipelineOutcome {
        if let Some(outcome) = self.admit(&event) {
            return outcome;
        }
        self.run_admitted(event).await
    }

    /// The pipeline for an event that already passed [`Self::admit`].
    pub async fn run_admitted(&self, event: InboundEvent) -> PipelineOutcome {
        let outcome = self.process(&event).await;
        info!(
            chat_id = event.chat_id(),
            message_id = event.message_id(),
            outcome = ?outcome,
            "📨 Event processed"
        );
        outcome
    }

    async fn process(&self, event: &InboundEvent) -> PipelineOutcome {
        let chat_id = event.chat_id();
        let sender_id = event.sender_id();
        if chat_id.is_empty() {
            return PipelineOutcome::Ignored;
        }

        let store = &self.services.store;
        match store.is_blacklisted(sender_id).await {
            Ok(true) => {
                info!(sender = sender_id, "🚫 Ignoring blacklisted sender");
                return PipelineOutcome::Blacklisted;
            }
            Ok(false) => {}
            Err(e) => warn!(sender = sender_id, "Blacklist lookup failed, continuing: {e}"),
        }

        let settings = store.settings(chat_id).await.unwrap_or_else(|e| {
            warn!(chat_id, "Settings lookup failed, using defaults: {e}");
            ChatSettings::new(chat_id)
        });

        let turn = match extractor::extract(event, &settings, &self.services, &self.bot.media_dir).await {
            Extraction::Turn(turn) => turn,
            Extraction::Button { id, label } => {
                self.press_button(event, &settings, &id, &label).await;
                return PipelineOutcome::Button;
            }
            Extraction::Transcribed => return PipelineOutcome::Transcribed,
            Extraction::Unhandled(kind) => {
                debug!(chat_id, "Unhandled message type {kind}");
                return PipelineOutcome::Ignored;
            }
        };
        if turn.text.trim().is_empty() {
            return PipelineOutcome::Ignored;
        }

        if let Some(name) = self.dispatch_command(event, &settings, &turn.text).await {
            return PipelineOutcome::Command(name);
        }

        let is_group = event.is_group();
        let captured = if is_group {
            let line = self.capture_group_message(event, &turn).await;
            if !self.trigger.should_reply(settings.ai_enabled, &turn.text) {
                return PipelineOutcome::NotTriggered;
            }
            line
        } else {
            None
        };

        let history = self.load_history(chat_id, captured.as_deref()).await;
        let speaker = is_group.then(|| event.sender_name());
        let messages = context::assemble(&history, &turn, speaker);

        let model = settings.preferred_model.as_deref();
        let reply = match self.services.llm.complete(&messages, model).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(chat_id, "LLM request failed: {e}");
                let text = match e {
                    Error::NotConfigured(_) => NOT_CONFIGURED_REPLY,
                    _ => APOLOGY_REPLY,
                };
                self.send(chat_id, text).await;
                return PipelineOutcome::LlmFailed;
            }
        };

        self.persist_exchange(chat_id, is_group, &turn, &reply).await;
        self.send(chat_id, &reply).await;
        // `turn` owns any downloaded image; it is removed when the run ends.
        drop(turn);
        PipelineOutcome::Replied
    }

    fn is_admin(&self, sender_id: &str) -> bool {
        self.bot.admin_id.as_deref().is_some_and(|admin| admin == sender_id)
    }

    fn command_context<'a>(&'a self, event: &'a InboundEvent, settings: &'a ChatSettings) -> CommandContext<'a> {
        CommandContext {
            chat_id: event.chat_id(),
            sender_id: event.sender_id(),
            is_group: event.is_group(),
            settings,
            services: &self.services,
            bot: &self.bot,
            registry: &self.commands,
        }
    }

    /// Returns the command name when the text was a recognized command.
    async fn dispatch_command(&self, event: &InboundEvent, settings: &ChatSettings, text: &str) -> Option<String> {
        let (name, args) = commands::parse_command(text)?;
        let command = self.commands.find(&name, self.is_admin(event.sender_id()))?;
        info!(chat_id = event.chat_id(), "⚡ Command /{name}");

        let ctx = self.command_context(event, settings);
        let reply = commands::run(command, args, &ctx).await;
        commands::deliver(reply, event.chat_id(), &self.services).await;
        Some(name)
    }

    async fn press_button(&self, event: &InboundEvent, settings: &ChatSettings, id: &str, label: &str) {
        let action = ButtonAction::parse(id);
        info!(chat_id = event.chat_id(), "🔘 Button {id} ({label})");
        let Some((name, args)) = action.as_command() else {
            info!(chat_id = event.chat_id(), "Unknown button action: {id}");
            return;
        };
        let Some(command) = self.commands.find(name, false) else {
            return;
        };
        let ctx = self.command_context(event, settings);
        let reply = commands::run(command, args, &ctx).await;
        commands::deliver(reply, event.chat_id(), &self.services).await;
    }

    /// Store every group message for summaries and as a history line. Returns
    /// the history line written, if any.
    async fn capture_group_message(&self, event: &InboundEvent, turn: &NormalizedTurn) -> Option<String> {
        let chat_id = event.chat_id();
        let sender = event.sender_name();
        let content = turn.capture_text();
        let store = &self.services.store;

        if let Err(e) = store.add_group_message(chat_id, sender, content).await {
            warn!(chat_id, "Failed to store group message: {e}");
        }
        let line = format!("{sender}: {content}");
        match store.append_history(chat_id, Role::User, &line).await {
            Ok(()) => Some(line),
            Err(e) => {
                warn!(chat_id, "Failed to store group history line: {e}");
                None
            }
        }
    }

    /// Recent history, oldest first. The line just captured for a group
    /// message is left out, since the turn itself carries it.
    async fn load_history(&self, chat_id: &str, captured: Option<&str>) -> Vec<ChatHistoryEntry> {
        let limit = self.bot.history_limit;
        let fetch = if captured.is_some() { limit + 1 } else { limit };
        let mut history = match self.services.store.recent_history(chat_id, fetch).await {
            Ok(history) => history,
            Err(e) => {
                warn!(chat_id, "History lookup failed, continuing without it: {e}");
                return Vec::new();
            }
        };
        let captured_is_last = captured
            .is_some_and(|line| history.last().is_some_and(|e| e.role == Role::User && e.content == line));
        if captured_is_last {
            history.pop();
        }
        if history.len() > limit {
            let excess = history.len() - limit;
            history.drain(..excess);
        }
        history
    }

    async fn persist_exchange(&self, chat_id: &str, is_group: bool, turn: &NormalizedTurn, reply: &str) {
        let store = &self.services.store;
        if !is_group {
            if let Err(e) = store.append_history(chat_id, Role::User, &turn.text).await {
                warn!(chat_id, "Failed to save user turn: {e}");
            }
        }
        if let Err(e) = store.append_history(chat_id, Role::Assistant, reply).await {
            warn!(chat_id, "Failed to save assistant turn: {e}");
        }
    }

    async fn send(&self, chat_id: &str, text: &str) {
        match self.services.gateway.send_text(chat_id, text).await {
            Ok(()) => {
                let preview: String = text.chars().take(50).collect();
                info!(chat_id, "📤 Sent: \"{preview}\"");
            }
            Err(e) => error!(chat_id, "Failed to send message: {e}"),
        }
    }
}
