//! Channel trait and message types for Netherworld
//!
//! A channel is a chat surface (Discord, the terminal). It turns platform
//! events into [`InboundMessage`]s, hands them to an [`EventHandler`], and
//! delivers the [`OutboundMessage`] the handler answers with.

use async_trait::async_trait;

use crate::error::Result;

/// A message seen on a chat surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// The surface this message came from (e.g. "discord", "terminal")
    pub channel: String,
    /// Unique identifier of the sender
    pub sender_id: String,
    /// Display name used as the speaker label in the transcript
    pub sender_name: String,
    /// Unique identifier of the chat (Discord channel id)
    pub chat_id: String,
    /// The text content of the message
    pub content: String,
    /// Platform message id, used to reply in thread
    pub message_id: Option<String>,
    /// The bot user is mentioned in the message
    pub mentions_bot: bool,
    /// The message replies to one of the bot's messages
    pub replies_to_bot: bool,
}

impl InboundMessage {
    /// Creates a new inbound message with the required fields.
    ///
    /// # Example
    /// ```
    /// use netherworld::channels::InboundMessage;
    ///
    /// let msg = InboundMessage::new("discord", "42", "Anna", "1001", "hello Bob");
    /// assert_eq!(msg.session_key(), "discord:1001");
    /// assert!(!msg.mentions_bot);
    /// ```
    pub fn new(
        channel: &str,
        sender_id: &str,
        sender_name: &str,
        chat_id: &str,
        content: &str,
    ) -> Self {
        Self {
            channel: channel.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            message_id: None,
            mentions_bot: false,
            replies_to_bot: false,
        }
    }

    /// Sets the platform message id (builder pattern).
    pub fn with_message_id(mut self, message_id: &str) -> Self {
        self.message_id = Some(message_id.to_string());
        self
    }

    /// Marks how the message addresses the bot (builder pattern).
    pub fn addressing(mut self, mentions_bot: bool, replies_to_bot: bool) -> Self {
        self.mentions_bot = mentions_bot;
        self.replies_to_bot = replies_to_bot;
        self
    }

    /// Session routing key, `"channel:chat_id"`.
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

/// A message to deliver on a chat surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    /// Message id to reply to
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    pub fn new(channel: &str, chat_id: &str, content: &str) -> Self {
        Self {
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            content: content.to_string(),
            reply_to: None,
        }
    }

    /// Sets the message ID to reply to (builder pattern).
    ///
    /// # Example
    /// ```
    /// use netherworld::channels::OutboundMessage;
    ///
    /// let msg = OutboundMessage::new("discord", "1001", "hi").with_reply("555");
    /// assert_eq!(msg.reply_to, Some("555".to_string()));
    /// ```
    pub fn with_reply(mut self, message_id: &str) -> Self {
        self.reply_to = Some(message_id.to_string());
        self
    }

    /// Creates a reply in the same chat, threaded on the inbound message
    /// when it carries an id.
    pub fn reply_to(msg: &InboundMessage, content: &str) -> Self {
        let out = Self::new(&msg.channel, &msg.chat_id, content);
        match &msg.message_id {
            Some(id) => out.with_reply(id),
            None => out,
        }
    }
}

/// Identity of the bot account once a surface is connected.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadyInfo {
    pub bot_id: String,
    pub bot_name: String,
}

/// Callbacks a surface invokes on platform events.
///
/// The surface owns the connection; the handler owns what to say. Handlers
/// must be shareable across the tasks a surface spawns per message.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// The surface connected and knows its own identity.
    async fn on_ready(&self, info: &ReadyInfo);

    /// Cheap pre-check so a surface can skip typing indicators and task
    /// spawns for messages the handler would ignore.
    fn wants(&self, _msg: &InboundMessage) -> bool {
        true
    }

    /// A message arrived. Returns the reply to deliver, if any.
    async fn on_message(&self, msg: &InboundMessage) -> Option<OutboundMessage>;
}

/// The `Channel` trait defines the lifecycle of a chat surface.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Returns the name of this channel (e.g. "discord").
    fn name(&self) -> &str;

    /// Starts the channel. Long-running work is spawned and this returns once
    /// it is underway.
    async fn start(&mut self) -> Result<()>;

    /// Stops the channel and waits for its background work to wind down.
    async fn stop(&mut self) -> Result<()>;

    /// Delivers a message through this channel.
    async fn send(&self, msg: OutboundMessage) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Checks if a user is allowed to talk to the bot on this channel.
    fn is_allowed(&self, user_id: &str) -> bool;
}

/// Base configuration shared by all channels.
#[derive(Debug, Clone, Default)]
pub struct BaseChannelConfig {
    /// The name of the channel
    pub name: String,
    /// List of allowed user IDs (empty = allow all)
    pub allowlist: Vec<String>,
}

impl BaseChannelConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            allowlist: Vec::new(),
        }
    }

    /// Creates a new `BaseChannelConfig` with the given name and allowlist.
    ///
    /// # Example
    ///
    /// ```
    /// use netherworld::channels::BaseChannelConfig;
    ///
    /// let config = BaseChannelConfig::with_allowlist("discord", vec!["user1".to_string()]);
    /// assert!(config.is_allowed("user1"));
    /// assert!(!config.is_allowed("user2"));
    /// ```
    pub fn with_allowlist(name: &str, allowlist: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            allowlist,
        }
    }

    /// If the allowlist is empty, all users are allowed.
    pub fn is_allowed(&self, user_id: &str) -> bool {
        self.allowlist.is_empty() || self.allowlist.iter().any(|id| id == user_id)
    }
}
