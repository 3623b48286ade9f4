//! Discord channel implementation.
//!
//! Connects to Discord via the Gateway WebSocket API (v10) for inbound messages
//! and uses the REST API for replies and typing indicators. Uses raw
//! `tokio-tungstenite` and `reqwest` -- no third-party Discord SDK crate required.
//!
//! # Gateway flow
//!
//! 1. GET `https://discord.com/api/v10/gateway` to obtain the WebSocket URL.
//! 2. Connect via `tokio-tungstenite`.
//! 3. Receive opcode 10 (HELLO) -- extract `heartbeat_interval`.
//! 4. Send opcode 2 (IDENTIFY) with bot token and intents.
//! 5. Start a periodic heartbeat task (opcode 1).
//! 6. On `READY`, remember the bot's user id and set the presence (opcode 3).
//! 7. On `MESSAGE_CREATE`, spawn a task that types, asks the handler, and replies.
//! 8. Reconnect with exponential backoff on disconnection.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::config::{ProviderConfig, StatusType};
use crate::error::{NetherError, Result};

use super::handler::SharedHandler;
use super::types::{BaseChannelConfig, Channel, InboundMessage, OutboundMessage, ReadyInfo};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Maximum reconnect delay (in seconds) for exponential backoff.
const MAX_RECONNECT_DELAY_SECS: u64 = 120;
/// Base reconnect delay (in seconds).
const BASE_RECONNECT_DELAY_SECS: u64 = 2;
/// Maximum number of consecutive reconnect attempts before resetting backoff.
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Heartbeat interval used when HELLO carries none.
const DEFAULT_HEARTBEAT_MS: u64 = 41250;

/// Discord Gateway intents bitmask.
/// GUILDS (1 << 0) | GUILD_MESSAGES (1 << 9) | DIRECT_MESSAGES (1 << 12) | MESSAGE_CONTENT (1 << 15)
const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 12) | (1 << 15);

/// Discord message content length limit, in characters.
const DISCORD_MAX_MESSAGE_LENGTH: usize = 2000;

/// A typing indicator lasts about ten seconds; refresh before it lapses.
const TYPING_REFRESH: Duration = Duration::from_secs(8);

/// Message types that carry user chat. Everything else is a system message.
const DEFAULT_MESSAGE_TYPE: u8 = 0;
const REPLY_MESSAGE_TYPE: u8 = 19;

// ---------------------------------------------------------------------------
// Gateway payload types (deserialization)
// ---------------------------------------------------------------------------

/// Top-level Discord Gateway payload.
#[derive(Debug, Deserialize)]
struct GatewayPayload {
    /// Gateway opcode.
    op: u8,
    /// Event data (shape depends on opcode / event name).
    #[serde(default)]
    d: Option<Value>,
    /// Sequence number (used for heartbeat and resume).
    #[serde(default)]
    s: Option<u64>,
    /// Event name (only present for opcode 0 / DISPATCH).
    #[serde(default)]
    t: Option<String>,
}

/// The `d` field of a HELLO (opcode 10) payload.
#[derive(Debug, Deserialize)]
struct HelloData {
    heartbeat_interval: u64,
}

/// The `d` field of a READY dispatch event.
#[derive(Debug, Deserialize)]
struct ReadyData {
    user: DiscordUser,
}

/// The `d` field of a MESSAGE_CREATE dispatch event.
#[derive(Debug, Deserialize)]
struct MessageCreateData {
    #[serde(default)]
    content: String,
    channel_id: String,
    author: DiscordUser,
    id: String,
    #[serde(default, rename = "type")]
    kind: u8,
    #[serde(default)]
    mentions: Vec<DiscordUser>,
    #[serde(default)]
    referenced_message: Option<Box<ReferencedMessage>>,
}

/// The message a reply points at. Only its author matters here.
#[derive(Debug, Deserialize)]
struct ReferencedMessage {
    author: DiscordUser,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    /// The user's snowflake ID.
    id: String,
    #[serde(default)]
    username: String,
    /// Whether the user is a bot.
    #[serde(default)]
    bot: Option<bool>,
}

/// Response from GET /gateway.
#[derive(Debug, Deserialize)]
struct GatewayResponse {
    url: String,
}

// ---------------------------------------------------------------------------
// REST client
// ---------------------------------------------------------------------------

/// Authenticated access to the Discord REST API.
#[derive(Clone)]
struct DiscordRest {
    client: reqwest::Client,
    token: String,
    api_base: String,
}

impl DiscordRest {
    fn new(client: reqwest::Client, token: &str) -> Self {
        Self {
            client,
            token: token.trim().to_string(),
            api_base: DISCORD_API_BASE.to_string(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token)
    }

    /// Fetches the Gateway WebSocket URL from the Discord REST API.
    async fn fetch_gateway_url(&self) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/gateway", self.api_base))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| {
                NetherError::Channel(format!("Failed to fetch Discord Gateway URL: {}", e))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            NetherError::Channel(format!("Failed to read Discord Gateway response: {}", e))
        })?;

        if !status.is_success() {
            return Err(NetherError::Channel(format!(
                "Discord Gateway HTTP {}: {}",
                status, body
            )));
        }

        gateway_url_from_body(&body)
    }

    /// Posts a message to a channel.
    async fn send_message(&self, msg: &OutboundMessage) -> Result<()> {
        let payload = build_send_payload(msg)?;
        let url = format!("{}/channels/{}/messages", self.api_base, msg.chat_id.trim());

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&payload)
            .send()
            .await
            .map_err(|e| NetherError::Channel(format!("Failed to call Discord API: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NetherError::Channel(format!(
                "Discord API returned HTTP {}: {}",
                status, body
            )));
        }

        debug!(channel_id = %msg.chat_id, "Discord: message sent");
        Ok(())
    }

    async fn trigger_typing(&self, channel_id: &str) -> Result<()> {
        let url = format!("{}/channels/{}/typing", self.api_base, channel_id);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .header("Content-Length", "0")
            .send()
            .await
            .map_err(|e| NetherError::Channel(format!("Failed to trigger typing: {}", e)))?;

        if !response.status().is_success() {
            return Err(NetherError::Channel(format!(
                "Discord typing returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Keep the typing indicator alive until the returned task is aborted.
    fn start_typing(&self, channel_id: &str) -> JoinHandle<()> {
        let rest = self.clone();
        let channel_id = channel_id.to_string();
        tokio::spawn(async move {
            loop {
                if let Err(e) = rest.trigger_typing(&channel_id).await {
                    debug!(error = %e, "Discord: typing indicator failed");
                }
                tokio::time::sleep(TYPING_REFRESH).await;
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Gateway payload helpers
// ---------------------------------------------------------------------------

fn gateway_url_from_body(body: &str) -> Result<String> {
    let parsed: GatewayResponse = serde_json::from_str(body).map_err(|e| {
        NetherError::Channel(format!("Invalid Discord Gateway response JSON: {}", e))
    })?;

    let url = parsed.url.trim();
    if url.is_empty() {
        return Err(NetherError::Channel(
            "Discord Gateway response missing URL".to_string(),
        ));
    }

    Ok(format!("{}/?v=10&encoding=json", url))
}

/// Builds the IDENTIFY payload (opcode 2).
fn build_identify_payload(token: &str) -> String {
    json!({
        "op": 2,
        "d": {
            "token": token,
            "intents": GATEWAY_INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "netherworld",
                "device": "netherworld"
            }
        }
    })
    .to_string()
}

/// Builds a heartbeat payload (opcode 1).
fn build_heartbeat_payload(sequence: Option<u64>) -> String {
    json!({
        "op": 1,
        "d": sequence
    })
    .to_string()
}

/// Builds a PRESENCE UPDATE payload (opcode 3), or `None` when the config
/// asks for no activity.
fn build_presence_payload(status_type: Option<StatusType>, body: Option<&str>) -> Option<String> {
    let kind = status_type?;
    let name = body.map(str::trim).filter(|b| !b.is_empty())?;
    Some(
        json!({
            "op": 3,
            "d": {
                "since": null,
                "activities": [{ "name": name, "type": kind.activity_code() }],
                "status": "online",
                "afk": false
            }
        })
        .to_string(),
    )
}

/// Extracts the heartbeat interval (ms) from a HELLO payload.
fn extract_heartbeat_interval(data: &Value) -> Result<u64> {
    let hello = HelloData::deserialize(data)
        .map_err(|e| NetherError::Channel(format!("Invalid Discord HELLO payload: {}", e)))?;
    Ok(hello.heartbeat_interval)
}

fn parse_ready(data: &Value) -> Option<ReadyInfo> {
    let ready = ReadyData::deserialize(data).ok()?;
    Some(ReadyInfo {
        bot_id: ready.user.id,
        bot_name: ready.user.username,
    })
}

/// Parses a MESSAGE_CREATE dispatch event into an `InboundMessage`,
/// returning `None` if the message should be ignored (own or bot author,
/// system message, empty content, disallowed user).
fn parse_message_create(
    data: &Value,
    bot_id: Option<&str>,
    base_config: &BaseChannelConfig,
) -> Option<InboundMessage> {
    let msg = MessageCreateData::deserialize(data).ok()?;

    if msg.author.bot.unwrap_or(false) || Some(msg.author.id.as_str()) == bot_id {
        return None;
    }

    if msg.kind != DEFAULT_MESSAGE_TYPE && msg.kind != REPLY_MESSAGE_TYPE {
        debug!(kind = msg.kind, "Discord: ignoring system message");
        return None;
    }

    let content = msg.content.trim();
    let sender_id = msg.author.id.trim();
    let channel_id = msg.channel_id.trim();
    if content.is_empty() || sender_id.is_empty() || channel_id.is_empty() {
        return None;
    }

    if !base_config.is_allowed(sender_id) {
        info!(
            "Discord: user {} not in allowlist, ignoring message",
            sender_id
        );
        return None;
    }

    let (mentions_bot, replies_to_bot) = match bot_id {
        Some(bot_id) => (
            msg.mentions.iter().any(|u| u.id == bot_id),
            msg.referenced_message
                .as_ref()
                .is_some_and(|r| r.author.id == bot_id),
        ),
        None => (false, false),
    };

    let sender_name = if msg.author.username.is_empty() {
        sender_id
    } else {
        msg.author.username.as_str()
    };

    Some(
        InboundMessage::new("discord", sender_id, sender_name, channel_id, content)
            .with_message_id(&msg.id)
            .addressing(mentions_bot, replies_to_bot),
    )
}

/// Calculates the exponential backoff delay for a given attempt number.
fn backoff_delay(attempt: u32) -> Duration {
    let delay_secs = BASE_RECONNECT_DELAY_SECS
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(MAX_RECONNECT_DELAY_SECS);
    Duration::from_secs(delay_secs)
}

/// Cut `content` to Discord's limit, counting characters.
fn truncate_for_discord(content: &str) -> String {
    if content.chars().count() <= DISCORD_MAX_MESSAGE_LENGTH {
        return content.to_string();
    }
    let kept: String = content
        .chars()
        .take(DISCORD_MAX_MESSAGE_LENGTH.saturating_sub(3))
        .collect();
    format!("{}...", kept)
}

/// Builds the JSON body for a channel message POST request.
fn build_send_payload(msg: &OutboundMessage) -> Result<Value> {
    if msg.chat_id.trim().is_empty() {
        return Err(NetherError::Channel(
            "Discord channel ID cannot be empty".to_string(),
        ));
    }

    let mut payload = json!({ "content": truncate_for_discord(&msg.content) });

    if let Some(ref reply_id) = msg.reply_to {
        if let Some(map) = payload.as_object_mut() {
            map.insert(
                "message_reference".to_string(),
                json!({ "message_id": reply_id, "fail_if_not_exists": false }),
            );
        }
    }

    Ok(payload)
}

/// Hand one message to the handler on its own task, typing while it works.
fn dispatch_message(handler: &SharedHandler, rest: &DiscordRest, inbound: InboundMessage) {
    if !handler.wants(&inbound) {
        debug!(channel_id = %inbound.chat_id, "Discord: message not addressed to the bot");
        return;
    }

    let handler = Arc::clone(handler);
    let rest = rest.clone();
    tokio::spawn(async move {
        let typing = rest.start_typing(&inbound.chat_id);
        let reply = handler.on_message(&inbound).await;
        typing.abort();

        if let Some(reply) = reply {
            if let Err(e) = rest.send_message(&reply).await {
                error!(error = %e, channel_id = %inbound.chat_id, "Discord: failed to send reply");
            }
        }
    });
}

// ---------------------------------------------------------------------------
// DiscordChannel
// ---------------------------------------------------------------------------

/// Discord surface backed by the Gateway WebSocket API (inbound) and REST
/// API (outbound).
pub struct DiscordChannel {
    provider: ProviderConfig,
    base_config: BaseChannelConfig,
    handler: SharedHandler,
    running: Arc<AtomicBool>,
    shutdown_tx: Option<watch::Sender<bool>>,
    gateway_task: Option<JoinHandle<()>>,
    rest: DiscordRest,
}

impl DiscordChannel {
    /// Creates a new Discord channel for one bot.
    pub fn new(provider: ProviderConfig, handler: SharedHandler) -> Self {
        let base_config = BaseChannelConfig::with_allowlist("discord", provider.allow_from.clone());
        let rest = DiscordRest::new(reqwest::Client::new(), &provider.token);

        Self {
            provider,
            base_config,
            handler,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: None,
            gateway_task: None,
            rest,
        }
    }

    pub fn provider_config(&self) -> &ProviderConfig {
        &self.provider
    }

    /// Resolves once the gateway task has exited.
    pub async fn wait(&mut self) {
        if let Some(task) = self.gateway_task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Discord gateway task panicked");
            }
        }
    }

    /// Main gateway loop: connects, identifies, heartbeats, and dispatches.
    /// Reconnects with exponential backoff on any disconnect.
    async fn run_gateway_loop(
        rest: DiscordRest,
        handler: SharedHandler,
        base_config: BaseChannelConfig,
        presence: Option<String>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut reconnect_attempt: u32 = 0;
        let mut bot_id: Option<String> = None;

        loop {
            if *shutdown_rx.borrow() {
                info!("Discord gateway shutdown requested");
                return;
            }

            // --- Fetch gateway URL ---
            let ws_url = tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Discord gateway shutdown requested");
                    return;
                }
                result = rest.fetch_gateway_url() => {
                    match result {
                        Ok(url) => url,
                        Err(e) => {
                            warn!("Discord: failed to fetch gateway URL: {}", e);
                            let delay = backoff_delay(reconnect_attempt);
                            reconnect_attempt =
                                (reconnect_attempt + 1).min(MAX_RECONNECT_ATTEMPTS);
                            tokio::select! {
                                _ = shutdown_rx.changed() => return,
                                _ = tokio::time::sleep(delay) => continue,
                            }
                        }
                    }
                }
            };

            // --- WebSocket connect ---
            let ws_stream = tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Discord gateway shutdown requested");
                    return;
                }
                result = connect_async(ws_url.as_str()) => {
                    match result {
                        Ok((stream, _)) => stream,
                        Err(e) => {
                            warn!("Discord: WebSocket connect failed: {}", e);
                            let delay = backoff_delay(reconnect_attempt);
                            reconnect_attempt =
                                (reconnect_attempt + 1).min(MAX_RECONNECT_ATTEMPTS);
                            tokio::select! {
                                _ = shutdown_rx.changed() => return,
                                _ = tokio::time::sleep(delay) => continue,
                            }
                        }
                    }
                }
            };

            info!("Discord gateway WebSocket connected");
            reconnect_attempt = 0;

            let (mut ws_writer, mut ws_reader) = ws_stream.split();

            // --- Wait for HELLO (opcode 10) ---
            let heartbeat_interval = loop {
                let next = tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("Discord gateway shutdown requested");
                        return;
                    }
                    msg = ws_reader.next() => msg,
                };

                match next {
                    Some(Ok(WsMessage::Text(raw))) => {
                        match serde_json::from_str::<GatewayPayload>(&raw) {
                            Ok(payload) if payload.op == 10 => {
                                match payload.d.as_ref().map(extract_heartbeat_interval) {
                                    Some(Ok(interval)) => {
                                        debug!("Discord HELLO: heartbeat_interval = {}ms", interval);
                                        break interval;
                                    }
                                    Some(Err(e)) => {
                                        warn!("Discord: invalid HELLO data: {}", e);
                                        break DEFAULT_HEARTBEAT_MS;
                                    }
                                    None => {
                                        warn!("Discord: HELLO without data, using default interval");
                                        break DEFAULT_HEARTBEAT_MS;
                                    }
                                }
                            }
                            Ok(_) => debug!("Discord: ignoring pre-HELLO payload"),
                            Err(e) => debug!("Discord: failed to parse pre-HELLO payload: {}", e),
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Discord: WebSocket error waiting for HELLO: {}", e);
                        break 0;
                    }
                    None => {
                        warn!("Discord: WebSocket closed before HELLO");
                        break 0;
                    }
                }
            };

            // An interval of 0 means the handshake failed; reconnect.
            if heartbeat_interval == 0 {
                let delay = backoff_delay(reconnect_attempt);
                reconnect_attempt = (reconnect_attempt + 1).min(MAX_RECONNECT_ATTEMPTS);
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = tokio::time::sleep(delay) => continue,
                }
            }

            // --- Send IDENTIFY (opcode 2) ---
            let identify = build_identify_payload(&rest.token);
            if let Err(e) = ws_writer.send(WsMessage::Text(identify.into())).await {
                warn!("Discord: failed to send IDENTIFY: {}", e);
                let delay = backoff_delay(reconnect_attempt);
                reconnect_attempt = (reconnect_attempt + 1).min(MAX_RECONNECT_ATTEMPTS);
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = tokio::time::sleep(delay) => continue,
                }
            }

            // --- Spawn heartbeat task ---
            let sequence = Arc::new(AtomicU64::new(0));
            let sequence_valid = Arc::new(AtomicBool::new(false));
            let (heartbeat_tx, mut heartbeat_rx) = tokio::sync::mpsc::channel::<String>(16);

            let heartbeat_task = tokio::spawn({
                let mut shutdown = shutdown_rx.clone();
                let sequence = Arc::clone(&sequence);
                let sequence_valid = Arc::clone(&sequence_valid);
                async move {
                    let interval = Duration::from_millis(heartbeat_interval);
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => {
                                debug!("Discord heartbeat task shutting down");
                                return;
                            }
                            _ = tokio::time::sleep(interval) => {
                                let s = sequence_valid
                                    .load(Ordering::SeqCst)
                                    .then(|| sequence.load(Ordering::SeqCst));
                                if heartbeat_tx.send(build_heartbeat_payload(s)).await.is_err() {
                                    debug!("Discord heartbeat channel closed");
                                    return;
                                }
                            }
                        }
                    }
                }
            });

            // --- Main dispatch loop ---
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("Discord gateway shutdown requested");
                        heartbeat_task.abort();
                        let _ = ws_writer.send(WsMessage::Close(None)).await;
                        return;
                    }

                    hb = heartbeat_rx.recv() => {
                        match hb {
                            Some(payload) => {
                                if let Err(e) = ws_writer.send(WsMessage::Text(payload.into())).await {
                                    warn!("Discord: heartbeat send failed: {}", e);
                                    break;
                                }
                            }
                            None => {
                                debug!("Discord heartbeat channel closed");
                                break;
                            }
                        }
                    }

                    msg = ws_reader.next() => {
                        let raw = match msg {
                            Some(Ok(WsMessage::Text(raw))) => raw,
                            Some(Ok(WsMessage::Ping(payload))) => {
                                if let Err(e) = ws_writer.send(WsMessage::Pong(payload)).await {
                                    warn!("Discord: pong send failed: {}", e);
                                    break;
                                }
                                continue;
                            }
                            Some(Ok(WsMessage::Close(frame))) => {
                                info!("Discord: WebSocket closed by server: {:?}", frame);
                                break;
                            }
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                warn!("Discord: WebSocket stream error: {}", e);
                                break;
                            }
                            None => {
                                warn!("Discord: WebSocket stream ended");
                                break;
                            }
                        };

                        let payload = match serde_json::from_str::<GatewayPayload>(&raw) {
                            Ok(payload) => payload,
                            Err(e) => {
                                debug!("Discord: failed to parse gateway payload: {}", e);
                                continue;
                            }
                        };

                        if let Some(s) = payload.s {
                            sequence.store(s, Ordering::SeqCst);
                            sequence_valid.store(true, Ordering::SeqCst);
                        }

                        match payload.op {
                            // DISPATCH
                            0 => match (payload.t.as_deref(), payload.d.as_ref()) {
                                (Some("READY"), Some(data)) => {
                                    let Some(ready) = parse_ready(data) else {
                                        warn!("Discord: READY without a user");
                                        continue;
                                    };
                                    bot_id = Some(ready.bot_id.clone());
                                    handler.on_ready(&ready).await;

                                    if let Some(presence) = &presence {
                                        if let Err(e) = ws_writer.send(WsMessage::Text(presence.clone().into())).await {
                                            warn!("Discord: presence update failed: {}", e);
                                        }
                                    }
                                }
                                (Some("MESSAGE_CREATE"), Some(data)) => {
                                    if let Some(inbound) =
                                        parse_message_create(data, bot_id.as_deref(), &base_config)
                                    {
                                        dispatch_message(&handler, &rest, inbound);
                                    }
                                }
                                (Some(event_name), _) => {
                                    debug!("Discord: ignoring event {}", event_name);
                                }
                                (None, _) => {}
                            },
                            // HEARTBEAT request from server
                            1 => {
                                let s = sequence_valid
                                    .load(Ordering::SeqCst)
                                    .then(|| sequence.load(Ordering::SeqCst));
                                let hb = build_heartbeat_payload(s);
                                if let Err(e) = ws_writer.send(WsMessage::Text(hb.into())).await {
                                    warn!("Discord: heartbeat response send failed: {}", e);
                                    break;
                                }
                            }
                            // RECONNECT
                            7 => {
                                info!("Discord: server requested reconnect");
                                break;
                            }
                            // INVALID SESSION
                            9 => {
                                warn!("Discord: invalid session, reconnecting");
                                break;
                            }
                            // HEARTBEAT ACK
                            11 => debug!("Discord: heartbeat ACK received"),
                            op => debug!("Discord: unhandled opcode {}", op),
                        }
                    }
                }
            }

            heartbeat_task.abort();

            // --- Wait before reconnecting ---
            let delay = backoff_delay(reconnect_attempt);
            reconnect_attempt = (reconnect_attempt + 1).min(MAX_RECONNECT_ATTEMPTS);
            info!("Discord: reconnecting in {} seconds", delay.as_secs());
            tokio::select! {
                _ = shutdown_rx.changed() => return,
                _ = tokio::time::sleep(delay) => {},
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Channel trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("Discord channel already running");
            return Ok(());
        }

        if self.rest.token.is_empty() {
            self.running.store(false, Ordering::SeqCst);
            return Err(NetherError::Config("Discord bot token is empty".to_string()));
        }

        if self.base_config.allowlist.is_empty() {
            warn!(
                bot = %self.provider.bot_name,
                "Discord allow_from is empty; every user can talk to the bot"
            );
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        let presence = build_presence_payload(
            self.provider.status_type,
            self.provider.status_body.as_deref(),
        );

        info!(bot = %self.provider.bot_name, "Starting Discord channel with Gateway WebSocket");
        self.gateway_task = Some(tokio::spawn(Self::run_gateway_loop(
            self.rest.clone(),
            Arc::clone(&self.handler),
            self.base_config.clone(),
            presence,
            shutdown_rx,
        )));

        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            info!("Discord channel already stopped");
            return Ok(());
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        self.wait().await;

        info!("Discord channel stopped");
        Ok(())
    }

    async fn send(&self, msg: OutboundMessage) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(NetherError::Channel(
                "Discord channel not running".to_string(),
            ));
        }
        self.rest.send_message(&msg).await
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_allowed(&self, user_id: &str) -> bool {
        self.base_config.is_allowed(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::types::EventHandler;

    struct SilentHandler;

    #[async_trait]
    impl EventHandler for SilentHandler {
        async fn on_ready(&self, _info: &ReadyInfo) {}

        async fn on_message(&self, _msg: &InboundMessage) -> Option<OutboundMessage> {
            None
        }
    }

    fn test_provider() -> ProviderConfig {
        ProviderConfig {
            bot_name: "Bob".to_string(),
            token: "test-bot-token".to_string(),
            allow_from: vec!["123456789".to_string()],
            ..Default::default()
        }
    }

    fn channel(provider: ProviderConfig) -> DiscordChannel {
        DiscordChannel::new(provider, Arc::new(SilentHandler))
    }

    fn allow_all() -> BaseChannelConfig {
        BaseChannelConfig::new("discord")
    }

    fn message_json(author_id: &str, content: &str) -> Value {
        json!({
            "id": "555",
            "channel_id": "1001",
            "content": content,
            "type": 0,
            "author": { "id": author_id, "username": "anna" }
        })
    }

    #[test]
    fn test_channel_name_and_allowlist() {
        let channel = channel(test_provider());
        assert_eq!(channel.name(), "discord");
        assert!(channel.is_allowed("123456789"));
        assert!(!channel.is_allowed("999999999"));
        assert!(!channel.is_running());
        assert_eq!(channel.provider_config().bot_name, "Bob");
    }

    #[test]
    fn test_gateway_url_formatting() {
        let url = gateway_url_from_body(r#"{"url": "wss://gateway.discord.gg"}"#).unwrap();
        assert_eq!(url, "wss://gateway.discord.gg/?v=10&encoding=json");
        assert!(gateway_url_from_body(r#"{"url": "  "}"#).is_err());
        assert!(gateway_url_from_body("not json").is_err());
    }

    #[test]
    fn test_identify_payload() {
        let payload: Value = serde_json::from_str(&build_identify_payload("tok")).unwrap();
        assert_eq!(payload["op"], 2);
        assert_eq!(payload["d"]["token"], "tok");
        assert_eq!(payload["d"]["intents"], GATEWAY_INTENTS);
        assert_eq!(payload["d"]["properties"]["browser"], "netherworld");
    }

    #[test]
    fn test_heartbeat_payload() {
        let with_seq: Value = serde_json::from_str(&build_heartbeat_payload(Some(42))).unwrap();
        assert_eq!(with_seq, json!({"op": 1, "d": 42}));
        let without: Value = serde_json::from_str(&build_heartbeat_payload(None)).unwrap();
        assert_eq!(without, json!({"op": 1, "d": null}));
    }

    #[test]
    fn test_heartbeat_interval_extraction() {
        assert_eq!(
            extract_heartbeat_interval(&json!({"heartbeat_interval": 41250})).unwrap(),
            41250
        );
        assert!(extract_heartbeat_interval(&json!({"wrong": 1})).is_err());
    }

    #[test]
    fn test_presence_payload() {
        let payload = build_presence_payload(Some(StatusType::Watching), Some("the stars")).unwrap();
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["op"], 3);
        assert_eq!(value["d"]["activities"][0]["name"], "the stars");
        assert_eq!(value["d"]["activities"][0]["type"], 3);

        assert!(build_presence_payload(None, Some("x")).is_none());
        assert!(build_presence_payload(Some(StatusType::Playing), None).is_none());
        assert!(build_presence_payload(Some(StatusType::Playing), Some("  ")).is_none());
    }

    #[test]
    fn test_parse_ready() {
        let ready = parse_ready(&json!({
            "v": 10,
            "session_id": "abc",
            "user": {"id": "42", "username": "Bob", "bot": true}
        }))
        .unwrap();
        assert_eq!(ready.bot_id, "42");
        assert_eq!(ready.bot_name, "Bob");
        assert!(parse_ready(&json!({"v": 10})).is_none());
    }

    #[test]
    fn test_message_create_basic() {
        let inbound =
            parse_message_create(&message_json("7", "  hello  "), Some("42"), &allow_all()).unwrap();
        assert_eq!(inbound.channel, "discord");
        assert_eq!(inbound.sender_id, "7");
        assert_eq!(inbound.sender_name, "anna");
        assert_eq!(inbound.chat_id, "1001");
        assert_eq!(inbound.content, "hello");
        assert_eq!(inbound.message_id.as_deref(), Some("555"));
        assert!(!inbound.mentions_bot);
        assert!(!inbound.replies_to_bot);
    }

    #[test]
    fn test_message_create_mentions_and_reply() {
        let mut data = message_json("7", "hey <@42>");
        data["mentions"] = json!([{"id": "42", "username": "Bob"}]);
        let inbound = parse_message_create(&data, Some("42"), &allow_all()).unwrap();
        assert!(inbound.mentions_bot);

        let mut data = message_json("7", "sure");
        data["type"] = json!(19);
        data["referenced_message"] = json!({"id": "1", "author": {"id": "42", "username": "Bob"}});
        let inbound = parse_message_create(&data, Some("42"), &allow_all()).unwrap();
        assert!(inbound.replies_to_bot);
        assert!(!inbound.mentions_bot);

        // Before READY the bot id is unknown, so nothing counts as addressing.
        let inbound = parse_message_create(&data, None, &allow_all()).unwrap();
        assert!(!inbound.replies_to_bot);
    }

    #[test]
    fn test_message_create_ignored_cases() {
        let mut bot_author = message_json("8", "beep");
        bot_author["author"]["bot"] = json!(true);
        assert!(parse_message_create(&bot_author, Some("42"), &allow_all()).is_none());

        assert!(parse_message_create(&message_json("42", "me"), Some("42"), &allow_all()).is_none());
        assert!(parse_message_create(&message_json("7", "   "), Some("42"), &allow_all()).is_none());

        let mut pinned = message_json("7", "pinned a message");
        pinned["type"] = json!(6);
        assert!(parse_message_create(&pinned, Some("42"), &allow_all()).is_none());

        let strict = BaseChannelConfig::with_allowlist("discord", vec!["1".to_string()]);
        assert!(parse_message_create(&message_json("7", "hi"), Some("42"), &strict).is_none());

        assert!(parse_message_create(&json!({"content": "x"}), Some("42"), &allow_all()).is_none());
    }

    #[test]
    fn test_missing_username_falls_back_to_id() {
        let data = json!({
            "id": "555", "channel_id": "1001", "content": "hi",
            "author": {"id": "7"}
        });
        let inbound = parse_message_create(&data, Some("42"), &allow_all()).unwrap();
        assert_eq!(inbound.sender_name, "7");
    }

    #[test]
    fn test_outbound_payload_with_reply() {
        let msg = OutboundMessage::new("discord", "1001", "Hello").with_reply("555");
        let payload = build_send_payload(&msg).unwrap();
        assert_eq!(payload["content"], "Hello");
        assert_eq!(payload["message_reference"]["message_id"], "555");

        let plain = build_send_payload(&OutboundMessage::new("discord", "1001", "x")).unwrap();
        assert!(plain.get("message_reference").is_none());
    }

    #[test]
    fn test_outbound_empty_channel_id() {
        let msg = OutboundMessage::new("discord", "  ", "Hello");
        assert!(build_send_payload(&msg).is_err());
    }

    #[test]
    fn test_truncation_counts_characters() {
        let short = "é".repeat(DISCORD_MAX_MESSAGE_LENGTH);
        assert_eq!(truncate_for_discord(&short), short);

        let long = "é".repeat(DISCORD_MAX_MESSAGE_LENGTH + 10);
        let cut = truncate_for_discord(&long);
        assert_eq!(cut.chars().count(), DISCORD_MAX_MESSAGE_LENGTH);
        assert!(cut.ends_with("..."));
    }

    #[tokio::test]
    async fn test_start_without_token() {
        let mut provider = test_provider();
        provider.token = "   ".to_string();
        let mut channel = channel(provider);
        assert!(matches!(channel.start().await, Err(NetherError::Config(_))));
        assert!(!channel.is_running());
    }

    #[tokio::test]
    async fn test_stop_not_running() {
        let mut channel = channel(test_provider());
        assert!(channel.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_send_not_running() {
        let channel = channel(test_provider());
        let result = channel
            .send(OutboundMessage::new("discord", "1001", "hi"))
            .await;
        assert!(matches!(result, Err(NetherError::Channel(_))));
    }

    #[test]
    fn test_backoff_delay_increases_exponentially() {
        assert_eq!(backoff_delay(0), Duration::from_secs(2));
        assert_eq!(backoff_delay(1), Duration::from_secs(4));
        assert_eq!(backoff_delay(2), Duration::from_secs(8));
        assert_eq!(backoff_delay(5), Duration::from_secs(64));
    }

    #[test]
    fn test_backoff_delay_caps_at_max() {
        assert_eq!(backoff_delay(6), Duration::from_secs(MAX_RECONNECT_DELAY_SECS));
        assert_eq!(backoff_delay(30), Duration::from_secs(MAX_RECONNECT_DELAY_SECS));
    }
}
