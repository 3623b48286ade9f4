//! Session module - one conversation per chat surface key
//!
//! This module provides:
//! - [`SessionSettings`]: immutable per-bot settings prepared from the config
//! - [`Conversation`]: the generation coordinator for a single transcript
//! - [`SessionManager`]: the registry mapping session keys to conversations
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
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
//! #[tokio::main]
//! async fn main() {
//!     let settings = SessionSettings::new("You are Bob.\n", &CharTokenizer, Budget::new(256, 32), EvictionPolicy::BySentence);
//!     let manager = SessionManager::new(Arc::new(settings), Arc::new(CharTokenizer), Arc::new(Offline));
//!
//!     let conversation = manager.get_or_create("discord:42").await;
//!     let mut conversation = conversation.lock().await;
//!     conversation.append_turn("Anna", "hi").unwrap();
//!     assert_eq!(conversation.memories(), &["Anna: hi\n".to_string()]);
//! }
//! ```

pub mod conversation;
pub mod settings;

pub use conversation::{Conversation, GenerationOutcome, RegenerateError};
pub use settings::SessionSettings;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::backend::Backend;
use crate::tokenizer::Tokenizer;

/// A conversation shared between the tasks that serve one session key.
pub type SharedConversation = Arc<Mutex<Conversation>>;

/// Registry of conversations, keyed by surface and chat
/// (e.g. `"discord:1234"`, `"terminal"`).
///
/// # Thread Safety
///
/// The map sits behind an `RwLock` and every conversation behind its own
/// `Mutex`. A caller holds the conversation lock for a whole
/// append-generate-reconcile unit, so a second message for the same key waits
/// while other keys proceed.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, SharedConversation>>>,
    settings: Arc<SessionSettings>,
    tokenizer: Arc<dyn Tokenizer>,
    backend: Arc<dyn Backend>,
}

impl SessionManager {
    pub fn new(
        settings: Arc<SessionSettings>,
        tokenizer: Arc<dyn Tokenizer>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            settings,
            tokenizer,
            backend,
        }
    }

    pub fn settings(&self) -> &Arc<SessionSettings> {
        &self.settings
    }

    /// Get the conversation for `key`, creating an empty one if needed.
    pub async fn get_or_create(&self, key: &str) -> SharedConversation {
        if let Some(existing) = self.sessions.read().await.get(key) {
            return Arc::clone(existing);
        }

        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(key.to_string()).or_insert_with(|| {
            debug!(session = key, "Creating conversation");
            Arc::new(Mutex::new(Conversation::new(
                Arc::clone(&self.settings),
                Arc::clone(&self.tokenizer),
                Arc::clone(&self.backend),
            )))
        }))
    }

    /// Get the conversation for `key` if it exists.
    pub async fn get(&self, key: &str) -> Option<SharedConversation> {
        self.sessions.read().await.get(key).cloned()
    }

    /// Drop the conversation for `key`. Returns `true` if it existed.
    pub async fn remove(&self, key: &str) -> bool {
        self.sessions.write().await.remove(key).is_some()
    }

    /// Keys of all live conversations.
    pub async fn keys(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GenerateRequest, LoadRequest};
    use crate::error::{ErrorKind, Result};
    use crate::memory::{Budget, EvictionPolicy};
    use crate::tokenizer::CharTokenizer;
    use async_trait::async_trait;

    struct UnreachableBackend;

    #[async_trait]
    impl Backend for UnreachableBackend {
        async fn load(&self, _request: &LoadRequest) -> Result<()> {
            Ok(())
        }

        async fn generate(
            &self,
            _request: &GenerateRequest,
        ) -> std::result::Result<String, ErrorKind> {
            Err(ErrorKind::TransportError)
        }

        fn name(&self) -> &str {
            "unreachable"
        }
    }

    fn manager() -> SessionManager {
        let settings =
            SessionSettings::new("P", &CharTokenizer, Budget::new(100, 0), EvictionPolicy::None);
        SessionManager::new(
            Arc::new(settings),
            Arc::new(CharTokenizer),
            Arc::new(UnreachableBackend),
        )
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_conversation() {
        let manager = manager();
        let a = manager.get_or_create("discord:1").await;
        a.lock().await.append_turn("Anna", "hi").unwrap();

        let again = manager.get_or_create("discord:1").await;
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(again.lock().await.memories().len(), 1);
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let manager = manager();
        manager
            .get_or_create("discord:1")
            .await
            .lock()
            .await
            .append_turn("Anna", "hi")
            .unwrap();
        let other = manager.get_or_create("discord:2").await;
        assert!(other.lock().await.memories().is_empty());

        let mut keys = manager.keys().await;
        keys.sort();
        assert_eq!(keys, vec!["discord:1", "discord:2"]);
    }

    #[tokio::test]
    async fn test_get_and_remove() {
        let manager = manager();
        assert!(manager.get("terminal").await.is_none());
        manager.get_or_create("terminal").await;
        assert!(manager.get("terminal").await.is_some());
        assert!(manager.remove("terminal").await);
        assert!(!manager.remove("terminal").await);
        assert!(manager.is_empty().await);
    }
}
