//! Configuration type definitions for Netherworld
//!
//! One JSON file describes one bot: which backend to talk to, how to tokenize,
//! what to send with every generation request and which surface to run on.
//! All types implement serde traits and have sensible defaults, so a partial
//! file deserializes and `config check` can point at what is missing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::memory::EvictionPolicy;

/// Main configuration struct for one bot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the generation backend lives
    pub backend_settings: BackendConfig,
    /// Forwarded verbatim to the backend's `/load` endpoint
    pub model_settings: Map<String, Value>,
    /// Which vocabulary the backend model uses
    pub tokenizer_settings: TokenizerConfig,
    /// Sampler and syntax settings sent with every generation
    pub generation_settings: GenerationConfig,
    /// Preamble text
    pub input_settings: InputConfig,
    /// Presentation surface and names
    pub provider_settings: ProviderConfig,
    /// Memory management and device selection
    pub netherworld_settings: NetherworldConfig,
    /// Forwarded with every generation (after logit bias preparation)
    pub experimental_settings: Option<Value>,
    /// Log output
    pub logging: LoggingConfig,
}

// ============================================================================
// Backend
// ============================================================================

/// Default timeout for a single `/generate` call, in seconds.
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 120;

/// Generation backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL, e.g. `http://localhost:8000`
    pub url: String,
    /// Per-request timeout; `0` disables the deadline
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: DEFAULT_BACKEND_TIMEOUT_SECS,
        }
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

/// Default BPE vocabulary (GPT-2).
pub const DEFAULT_ENCODING: &str = "r50k_base";

/// Tokenizer selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// `r50k_base`, `p50k_base`, `cl100k_base`, `o200k_base` or `char`
    pub encoding: String,
    /// Ids dropped on decode; the encoding's defaults when unset
    pub special_token_ids: Option<Vec<u32>>,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            encoding: DEFAULT_ENCODING.to_string(),
            special_token_ids: None,
        }
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Newline in the GPT-2 vocabulary; stops generation at the end of a line.
pub const DEFAULT_EOS_TOKEN_ID: u32 = 198;
/// `<|endoftext|>` in the GPT-2 vocabulary.
pub const DEFAULT_PAD_TOKEN_ID: u32 = 50256;

/// Generation settings, split the way the backend documents them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// temperature, top_p, top_k, repetition_penalty...
    pub sampler_settings: Map<String, Value>,
    /// max_length, eos/pad ids, bad words...
    pub syntax_settings: SyntaxSettings,
}

/// Syntax settings. Keys the front-end does not interpret pass through in
/// `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntaxSettings {
    /// Context window of the model, in tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eos_token_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pad_token_id: Option<u32>,
    /// Words the model must never produce; tokenized before sending
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bad_words_ids: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// Input
// ============================================================================

/// The bot's description and an optional scripted exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub prompt: String,
    /// Appended to `prompt` to form the preamble
    pub example_conversation: Option<String>,
}

impl InputConfig {
    /// The text that heads every transcript.
    pub fn preamble(&self) -> String {
        match &self.example_conversation {
            Some(example) => format!("{}{}", self.prompt, example),
            None => self.prompt.clone(),
        }
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Which presentation surface runs the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    #[default]
    Terminal,
    Discord,
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderType::Terminal => write!(f, "terminal"),
            ProviderType::Discord => write!(f, "discord"),
        }
    }
}

/// Presence activity shown next to the bot's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusType {
    Playing,
    Listening,
    Watching,
}

impl StatusType {
    /// Discord activity type code.
    pub fn activity_code(&self) -> u8 {
        match self {
            StatusType::Playing => 0,
            StatusType::Listening => 2,
            StatusType::Watching => 3,
        }
    }
}

/// Presentation surface settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    /// Speaker label for the human side (terminal) and fallback for Discord
    pub user_name: String,
    /// Speaker label for the bot
    pub bot_name: String,
    /// Discord bot token
    pub token: String,
    /// Extra names that count as addressing the bot
    pub bot_nicknames: Vec<String>,
    /// Only answer when addressed
    pub conditional_response: bool,
    /// Discord user ids allowed to talk to the bot (empty = everyone)
    pub allow_from: Vec<String>,
    pub status_type: Option<StatusType>,
    pub status_body: Option<String>,
}

// ============================================================================
// Memory
// ============================================================================

/// Default device passed to the backend.
pub const DEFAULT_DEVICE: &str = "cpu";

/// Front-end memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetherworldConfig {
    pub memory_cycler: EvictionPolicy,
    /// Tokens kept free for the reply
    pub extra_budget: usize,
    /// Device string forwarded to the backend (`cpu`, `cuda:0`, ...)
    pub device: String,
}

impl Default for NetherworldConfig {
    fn default() -> Self {
        Self {
            memory_cycler: EvictionPolicy::None,
            extra_budget: 0,
            device: DEFAULT_DEVICE.to_string(),
        }
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human-readable output
    Pretty,
    /// Compact single-line output with targets
    #[default]
    Component,
    /// JSON lines
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
    /// Append logs to this file instead of stderr
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Component,
            file: None,
        }
    }
}
