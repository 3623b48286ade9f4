//! Channels module - chat surfaces (Discord, terminal)
//!
//! A surface owns the platform connection and nothing else. It turns platform
//! events into [`InboundMessage`]s and hands them to an [`EventHandler`];
//! [`ChatHandler`] is the handler that talks to the conversations.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐   ┌───────────────┐
//! │DiscordChannel │   │TerminalChannel│
//! └──────┬────────┘   └──────┬────────┘
//!        │  InboundMessage   │
//!        └────────┬──────────┘
//!                 ▼
//!          ┌─────────────┐   commands / chat   ┌────────────────┐
//!          │ ChatHandler │ ──────────────────▶ │ SessionManager │
//!          └─────────────┘                     └────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use netherworld::channels::{ChatHandler, EventHandler, InboundMessage};
//! use netherworld::config::ProviderConfig;
//! use netherworld::memory::{Budget, EvictionPolicy};
//! use netherworld::session::{SessionManager, SessionSettings};
//! use netherworld::tokenizer::CharTokenizer;
//! # use netherworld::backend::{Backend, GenerateRequest, LoadRequest};
//! # use netherworld::error::ErrorKind;
//! # struct Offline;
//! # #[async_trait::async_trait]
//! # impl Backend for Offline {
//! #     async fn load(&self, _: &LoadRequest) -> netherworld::Result<()> { Ok(()) }
//! #     async fn generate(&self, _: &GenerateRequest) -> Result<String, ErrorKind> {
//! #         Err(ErrorKind::TransportError)
//! #     }
//! #     fn name(&self) -> &str { "offline" }
//! # }
//!
//! # tokio_test::block_on(async {
//! let settings = SessionSettings::new("", &CharTokenizer, Budget::new(64, 0), EvictionPolicy::None);
//! let sessions = SessionManager::new(Arc::new(settings), Arc::new(CharTokenizer), Arc::new(Offline));
//! let handler = ChatHandler::new(sessions, &ProviderConfig::default());
//!
//! let msg = InboundMessage::new("terminal", "local", "Anna", "local", "/display_memories");
//! let reply = handler.on_message(&msg).await.unwrap();
//! assert_eq!(reply.content, "No memories in chat history. Silence is Golden.");
//! # })
//! ```

pub mod commands;
pub mod discord;
pub mod handler;
pub mod terminal;
mod types;

pub use commands::Command;
pub use discord::DiscordChannel;
pub use handler::{ChatHandler, SharedHandler};
pub use terminal::TerminalChannel;
pub use types::{
    BaseChannelConfig, Channel, EventHandler, InboundMessage, OutboundMessage, ReadyInfo,
};
