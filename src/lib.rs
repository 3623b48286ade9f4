//! Netherworld - chat front-end with bounded conversational memory
//!
//! Each conversation keeps a transcript (a fixed preamble plus turns), trims
//! it to the backend's context window with an eviction policy, and sends it
//! as a base64-framed token payload to a remote generation server.

pub mod backend;
pub mod channels;
pub mod config;
pub mod error;
pub mod memory;
pub mod session;
pub mod tokenizer;
pub mod utils;

pub use backend::{Backend, HttpBackend};
pub use channels::{ChatHandler, EventHandler, InboundMessage, OutboundMessage};
pub use config::Config;
pub use error::{ErrorKind, NetherError, Result};
pub use memory::{Budget, EvictionPolicy, Transcript};
pub use session::{Conversation, GenerationOutcome, SessionManager, SessionSettings};
pub use tokenizer::Tokenizer;
