//! Error types for Netherworld
//!
//! This module defines all error types used throughout the front-end.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use std::fmt;
use thiserror::Error;

// ============================================================================
// Generation Error Classification
// ============================================================================

/// Classification of a failed generation round-trip.
///
/// Every backend-side failure is converted into one of these tags so the
/// generation coordinator can decide how to reconcile the transcript.
/// The legacy integer codes (`0`, `-1`, `-2`, HTTP status) are kept
/// reachable through [`ErrorKind::legacy_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The transport call exceeded its deadline
    Timeout,
    /// Connection-level failure (DNS, refusal, reset)
    TransportError,
    /// Uncategorized failure during the call or while decoding its result
    GenericError,
    /// Backend answered with a non-2xx status
    HttpError(u16),
    /// Backend returned empty or whitespace-only text
    EmptyOutput,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "generation timed out"),
            ErrorKind::TransportError => write!(f, "transport error during generation"),
            ErrorKind::GenericError => write!(f, "generic error during generation"),
            ErrorKind::HttpError(code) => write!(f, "backend returned HTTP {}", code),
            ErrorKind::EmptyOutput => write!(f, "backend returned empty output"),
        }
    }
}

impl ErrorKind {
    /// Returns `true` if the user may simply try the same turn again.
    ///
    /// `EmptyOutput` is not retryable: the transcript is cleared instead.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::EmptyOutput)
    }

    /// Returns `true` if this failure wipes the whole transcript rather than
    /// just the pending turn.
    pub fn clears_transcript(&self) -> bool {
        matches!(self, ErrorKind::EmptyOutput)
    }

    /// The integer code older front-ends used as a sentinel return value.
    pub fn legacy_code(&self) -> Option<i32> {
        match self {
            ErrorKind::Timeout => Some(0),
            ErrorKind::TransportError => Some(-1),
            ErrorKind::GenericError => Some(-2),
            ErrorKind::HttpError(code) => Some(i32::from(*code)),
            ErrorKind::EmptyOutput => None,
        }
    }

    /// Inverse of [`ErrorKind::legacy_code`].
    pub fn from_legacy_code(code: i32) -> Self {
        match code {
            0 => ErrorKind::Timeout,
            -1 => ErrorKind::TransportError,
            -2 => ErrorKind::GenericError,
            other => match u16::try_from(other) {
                Ok(status) => ErrorKind::HttpError(status),
                Err(_) => ErrorKind::GenericError,
            },
        }
    }

    /// The notice shown to the person chatting with the bot.
    pub fn user_message(&self) -> String {
        match self {
            ErrorKind::Timeout => {
                "There was a timeout error during generation. Please check the console error logs."
                    .to_string()
            }
            ErrorKind::TransportError => {
                "There was a request error during generation. Please check the console error logs."
                    .to_string()
            }
            ErrorKind::GenericError => {
                "There was a generic error during generation. Please check the console error logs."
                    .to_string()
            }
            ErrorKind::HttpError(code) => format!(
                "There was an http error during generation. Please check the following status \
                 code: {}, and also please check the console error logs.",
                code
            ),
            ErrorKind::EmptyOutput => "I don't know what to say, so I cleared my memories.".to_string(),
        }
    }
}

impl From<ErrorKind> for NetherError {
    fn from(kind: ErrorKind) -> Self {
        NetherError::Backend(kind)
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for Netherworld operations.
#[derive(Error, Debug)]
pub enum NetherError {
    /// Configuration-related errors (invalid config, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Classified backend failure
    #[error("Backend error: {0}")]
    Backend(ErrorKind),

    /// The backend could not load a model (fatal at startup)
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    /// Tokenizer failures (unknown encoding, undecodable ids)
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Wire payload could not be framed or unframed
    #[error("Codec error: {0}")]
    Codec(String),

    /// Only the preamble is left; there is nothing to pop
    #[error("Transcript has no turns to remove")]
    EmptyTranscript,

    /// Channel errors (connection failures, message routing issues, etc.)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A specialized `Result` type for Netherworld operations.
pub type Result<T> = std::result::Result<T, NetherError>;
