//! Backend module - the remote text-generation server
//!
//! The front-end never runs a model. It asks a backend to load one at startup
//! (`POST /load`) and then sends the framed transcript with every generation
//! request (`POST /generate`). The [`Backend`] trait hides the transport so
//! the coordinator can be driven by an in-process mock in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use netherworld::backend::{Backend, GenerateRequest, HttpBackend};
//!
//! async fn example() {
//!     let backend = HttpBackend::new("http://localhost:8000", None).unwrap();
//!     let request = GenerateRequest::new("\"WzE1NDk2XQ==\"", serde_json::json!({}), None, "cpu");
//!     match backend.generate(&request).await {
//!         Ok(payload) => println!("framed reply: {}", payload),
//!         Err(kind) => println!("{}", kind.user_message()),
//!     }
//! }
//! ```

pub mod error_classifier;
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::error;

use crate::error::{ErrorKind, Result};

pub use error_classifier::classify_error_message;
pub use http::HttpBackend;

/// Body of `POST /load`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadRequest {
    pub device: String,
    pub model_settings: Map<String, Value>,
}

/// Body of `POST /generate`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerateRequest {
    /// Framed token payload (see [`crate::memory::codec`])
    pub chat_history: String,
    /// Merged sampler and syntax settings
    pub generation_settings: Value,
    pub experimental_settings: Option<Value>,
    pub device: String,
}

impl GenerateRequest {
    pub fn new(
        chat_history: impl Into<String>,
        generation_settings: Value,
        experimental_settings: Option<Value>,
        device: impl Into<String>,
    ) -> Self {
        Self {
            chat_history: chat_history.into(),
            generation_settings,
            experimental_settings,
            device: device.into(),
        }
    }
}

/// Body of a successful `POST /generate`.
///
/// Backends answer either `{"chat_history": "<payload>"}` or the bare payload
/// string.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum GenerateResponse {
    Wrapped { chat_history: String },
    Bare(String),
}

impl GenerateResponse {
    /// The framed token payload.
    pub fn into_payload(self) -> String {
        match self {
            GenerateResponse::Wrapped { chat_history } => chat_history,
            GenerateResponse::Bare(payload) => payload,
        }
    }
}

/// A generation server.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Ask the backend to load the configured model.
    ///
    /// Failure here is fatal for the bot that requested it.
    async fn load(&self, request: &LoadRequest) -> Result<()>;

    /// Run one generation and return the framed payload the backend sent
    /// back. Exactly one attempt is made; failures are classified.
    async fn generate(&self, request: &GenerateRequest) -> std::result::Result<String, ErrorKind>;

    /// Backend name used in logs.
    fn name(&self) -> &str;
}

/// Map a non-success HTTP status into an [`ErrorKind`], logging what the
/// status usually means.
pub fn parse_backend_error(status: u16, body: &str) -> ErrorKind {
    match status {
        400..=499 => error!(status, body, "The backend rejected the generation request"),
        500..=599 => error!(status, body, "The backend failed during generation"),
        _ => error!(status, body, "Unknown HTTP generation error"),
    }
    ErrorKind::HttpError(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_backend_error_keeps_status() {
        assert_eq!(parse_backend_error(400, "bad"), ErrorKind::HttpError(400));
        assert_eq!(parse_backend_error(500, ""), ErrorKind::HttpError(500));
        assert_eq!(parse_backend_error(504, "gateway"), ErrorKind::HttpError(504));
        assert_eq!(parse_backend_error(302, ""), ErrorKind::HttpError(302));
    }

    #[test]
    fn test_generate_request_serializes_null_experimental() {
        let req = GenerateRequest::new("\"abc\"", json!({"max_length": 10}), None, "cpu");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["chat_history"], "\"abc\"");
        assert_eq!(value["generation_settings"]["max_length"], 10);
        assert!(value["experimental_settings"].is_null());
        assert_eq!(value["device"], "cpu");
    }

    #[test]
    fn test_generate_response_wrapped() {
        let resp: GenerateResponse =
            serde_json::from_str(r#"{"chat_history": "\"WzFd\""}"#).unwrap();
        assert_eq!(resp.into_payload(), "\"WzFd\"");
    }

    #[test]
    fn test_generate_response_bare() {
        let resp: GenerateResponse = serde_json::from_str(r#""WzFd""#).unwrap();
        assert_eq!(resp.into_payload(), "WzFd");
    }

    #[test]
    fn test_load_request_shape() {
        let mut model_settings = Map::new();
        model_settings.insert("model".to_string(), json!("EleutherAI/gpt-neo-125M"));
        let req = LoadRequest {
            device: "cuda:0".to_string(),
            model_settings,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["device"], "cuda:0");
        assert_eq!(value["model_settings"]["model"], "EleutherAI/gpt-neo-125M");
    }
}
