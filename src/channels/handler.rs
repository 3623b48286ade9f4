//! The chat handler: decides whether to answer and what to say.
//!
//! Surfaces translate platform events into [`InboundMessage`]s; this handler
//! routes them to commands or to the conversation of their session key.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::config::ProviderConfig;
use crate::error::ErrorKind;
use crate::session::{GenerationOutcome, SessionManager};

use super::commands::{format_memories, Command, MEMORIES_CLEARED};
use super::types::{EventHandler, InboundMessage, OutboundMessage, ReadyInfo};

/// Answers chat messages and commands for one bot.
pub struct ChatHandler {
    sessions: SessionManager,
    bot_nicknames: Vec<String>,
    conditional_response: bool,
    identity: RwLock<Option<ReadyInfo>>,
}

impl ChatHandler {
    pub fn new(sessions: SessionManager, provider: &ProviderConfig) -> Self {
        Self {
            sessions,
            bot_nicknames: provider.bot_nicknames.clone(),
            conditional_response: provider.conditional_response,
            identity: RwLock::new(None),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Account identity reported by the surface, once connected.
    pub async fn identity(&self) -> Option<ReadyInfo> {
        self.identity.read().await.clone()
    }

    /// Whether a chat message (not a command) should get a reply.
    ///
    /// Without conditional responses every message is answered. With them, the
    /// message has to mention the bot, reply to the bot, or contain one of its
    /// nicknames.
    pub fn should_respond(&self, msg: &InboundMessage) -> bool {
        if !self.conditional_response {
            return true;
        }
        msg.mentions_bot
            || msg.replies_to_bot
            || self
                .bot_nicknames
                .iter()
                .any(|nick| !nick.is_empty() && msg.content.contains(nick.as_str()))
    }

    /// Produce the reply text for `msg`, or `None` to stay silent.
    pub async fn handle(&self, msg: &InboundMessage) -> Option<String> {
        if msg.content.trim().is_empty() {
            return None;
        }

        if let Some(command) = Command::parse(&msg.content) {
            info!(command = %command, sender = %msg.sender_name, session = %msg.session_key(), "Running command");
            return Some(self.run_command(command, msg).await);
        }

        if !self.should_respond(msg) {
            debug!(session = %msg.session_key(), "Message does not address the bot; ignoring");
            return None;
        }

        self.chat(msg).await
    }

    async fn chat(&self, msg: &InboundMessage) -> Option<String> {
        let conversation = self.sessions.get_or_create(&msg.session_key()).await;
        let mut conversation = conversation.lock().await;

        if let Err(e) = conversation.append_turn(&msg.sender_name, &msg.content) {
            error!(error = %e, session = %msg.session_key(), "Could not store message");
            return Some(ErrorKind::GenericError.user_message());
        }

        let bot_name = self.sessions.settings().bot_name.clone();
        Some(conversation.generate(&bot_name).await.into_reply())
    }

    async fn run_command(&self, command: Command, msg: &InboundMessage) -> String {
        let conversation = self.sessions.get_or_create(&msg.session_key()).await;
        let mut conversation = conversation.lock().await;

        match command {
            Command::ClearMemories => {
                conversation.clear();
                MEMORIES_CLEARED.to_string()
            }
            Command::DisplayMemories => format_memories(conversation.memories()),
            Command::RegenerateResponse => match conversation.regenerate(&msg.sender_name).await {
                Ok(outcome) => outcome.into_reply(),
                Err(refused) => refused.to_string(),
            },
            Command::Autocomplete => {
                let outcome = conversation.autocomplete(&msg.sender_name).await;
                command_reply(&command, outcome, |text| {
                    format!("{}: {}", msg.sender_name, text.trim_end())
                })
            }
            Command::Generate(ref prompt) if prompt.is_empty() => {
                "Usage: /generate <prompt>".to_string()
            }
            Command::Generate(ref prompt) => {
                let outcome = conversation.generate_raw(prompt).await;
                command_reply(&command, outcome, |text| {
                    format!("**{}**\n{}", prompt, text.trim_end())
                })
            }
        }
    }
}

/// Reply for a command whose generation does not touch memory on failure.
fn command_reply(
    command: &Command,
    outcome: GenerationOutcome,
    render: impl FnOnce(&str) -> String,
) -> String {
    match outcome {
        GenerationOutcome::Success(text) => render(&text),
        GenerationOutcome::Failure(ErrorKind::EmptyOutput) => format!(
            "The requested command {} failed to generate anything. Check your parameters, \
             certain models do not like it when do_sample = False is your only parameter. \
             Short prompts may also cause this.",
            command.name()
        ),
        GenerationOutcome::Failure(kind) => kind.user_message(),
    }
}

#[async_trait]
impl EventHandler for ChatHandler {
    async fn on_ready(&self, info: &ReadyInfo) {
        info!(bot_id = %info.bot_id, bot_name = %info.bot_name, "Connected and ready");
        *self.identity.write().await = Some(info.clone());
    }

    fn wants(&self, msg: &InboundMessage) -> bool {
        !msg.content.trim().is_empty()
            && (Command::parse(&msg.content).is_some() || self.should_respond(msg))
    }

    async fn on_message(&self, msg: &InboundMessage) -> Option<OutboundMessage> {
        self.handle(msg)
            .await
            .map(|reply| OutboundMessage::reply_to(msg, &reply))
    }
}

/// Shared handle handed to surfaces.
pub type SharedHandler = Arc<dyn EventHandler>;
