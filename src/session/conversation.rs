//! Generation coordinator for one conversation.
//!
//! A generation walks `Idle -> Requested -> {Succeeded, Failed}`:
//!
//! - **Requested**: a `"{speaker}:"` placeholder is appended and evicted with
//!   the rest, the transcript is framed and exactly one backend call is made.
//! - **Succeeded**: the placeholder is replaced by `"{speaker}: {text}"`.
//! - **Failed**: the placeholder is removed. An empty reply additionally
//!   clears the transcript, since a model that answered nothing to this
//!   history will keep doing so.
//!
//! Taking `&mut self` for the whole walk means one generation per transcript
//! at a time; [`SessionManager`](super::SessionManager) wraps each
//! conversation in a mutex so concurrent callers queue.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::backend::{Backend, GenerateRequest};
use crate::error::{ErrorKind, Result};
use crate::memory::{decode_generation, encode_tokens, encode_transcript, Transcript};
use crate::tokenizer::Tokenizer;

use super::SessionSettings;

/// Result of one generation round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Detokenized, non-blank reply text
    Success(String),
    Failure(ErrorKind),
}

impl GenerationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, GenerationOutcome::Success(_))
    }

    /// The reply text, if the generation succeeded.
    pub fn text(&self) -> Option<&str> {
        match self {
            GenerationOutcome::Success(text) => Some(text),
            GenerationOutcome::Failure(_) => None,
        }
    }

    /// The failure kind, if the generation failed.
    pub fn error(&self) -> Option<ErrorKind> {
        match self {
            GenerationOutcome::Success(_) => None,
            GenerationOutcome::Failure(kind) => Some(*kind),
        }
    }

    /// What to show the person chatting: the reply or the failure notice.
    pub fn into_reply(self) -> String {
        match self {
            GenerationOutcome::Success(text) => text.trim_end().to_string(),
            GenerationOutcome::Failure(kind) => kind.user_message(),
        }
    }
}

/// Why a regeneration request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegenerateError {
    /// Only the preamble is in memory
    NothingToRegenerate,
    /// The newest turn is not the bot's
    NotABotTurn,
    /// The bot's newest turn answered somebody else
    NotYourTurn,
}

impl fmt::Display for RegenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegenerateError::NothingToRegenerate => {
                write!(f, "There is no prior chat history. There is nothing to regenerate!")
            }
            RegenerateError::NotABotTurn => write!(
                f,
                "The most recent message wasn't a bot message! Only regen the most recent bot message."
            ),
            RegenerateError::NotYourTurn => write!(
                f,
                "Last message was a response to someone else. Only regen responses sent to you!"
            ),
        }
    }
}

impl std::error::Error for RegenerateError {}

/// One conversation's transcript plus the collaborators needed to extend it.
pub struct Conversation {
    transcript: Transcript,
    settings: Arc<SessionSettings>,
    tokenizer: Arc<dyn Tokenizer>,
    backend: Arc<dyn Backend>,
}

impl fmt::Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("transcript", &self.transcript)
            .field("tokenizer", &self.tokenizer.name())
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Conversation {
    pub fn new(
        settings: Arc<SessionSettings>,
        tokenizer: Arc<dyn Tokenizer>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        if settings.preamble_oversized() {
            error!(
                preamble_tokens = settings.preamble_tokens,
                max_tokens = settings.budget.max_tokens,
                "Your prompt is larger than your max length. Please increase max_length in your settings!"
            );
        }
        Self {
            transcript: Transcript::new(&settings.preamble),
            settings,
            tokenizer,
            backend,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Read-only view of the transcript.
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Append a raw entry and run the eviction policy.
    pub fn append(&mut self, entry: impl Into<String>) -> Result<()> {
        self.transcript.append(entry);
        self.evict()
    }

    /// Append `"{speaker}: {text}\n"` and run the eviction policy.
    pub fn append_turn(&mut self, speaker: &str, text: &str) -> Result<()> {
        self.append(format!("{}: {}\n", speaker, text))
    }

    fn evict(&mut self) -> Result<()> {
        self.settings.policy.apply_to(
            &mut self.transcript,
            self.settings.preamble_tokens,
            self.tokenizer.as_ref(),
            self.settings.budget,
        )
    }

    /// Generate the next turn for `speaker` and commit it to memory.
    pub async fn generate(&mut self, speaker: &str) -> GenerationOutcome {
        let experimental = self.settings.experimental_settings.clone();
        let outcome = self.request_with_placeholder(speaker, experimental).await;

        match &outcome {
            GenerationOutcome::Success(text) => {
                let mut entry = format!("{}: {}", speaker, text);
                if !entry.ends_with('\n') {
                    entry.push('\n');
                }
                if let Err(e) = self.append(entry) {
                    error!(error = %e, "Eviction failed after reply; transcript left unevicted");
                }
            }
            GenerationOutcome::Failure(kind) if kind.clears_transcript() => {
                warn!("Backend produced no text; clearing memories");
                self.transcript.clear();
            }
            GenerationOutcome::Failure(_) => {}
        }
        outcome
    }

    /// Predict what `user` would say next without storing the prediction.
    ///
    /// Experimental settings are left out so biases meant for the bot do not
    /// shape the user's voice. The transcript is put back exactly as it was,
    /// so an empty prediction does not clear memory either.
    pub async fn autocomplete(&mut self, user: &str) -> GenerationOutcome {
        let before = self.transcript.snapshot();
        let outcome = self.request_with_placeholder(user, None).await;
        self.transcript.replace_entries(before);
        outcome
    }

    /// Drop the bot's newest turn and generate it again.
    ///
    /// `requester` must be the speaker of the turn the bot answered.
    pub async fn regenerate(
        &mut self,
        requester: &str,
    ) -> std::result::Result<GenerationOutcome, RegenerateError> {
        let turns = self.transcript.turns();
        let Some(last) = turns.last() else {
            return Err(RegenerateError::NothingToRegenerate);
        };
        let bot_prefix = format!("{}:", self.settings.bot_name);
        if !last.starts_with(&bot_prefix) {
            return Err(RegenerateError::NotABotTurn);
        }
        if turns.len() >= 2 {
            let prompted_by = &turns[turns.len() - 2];
            if !prompted_by.starts_with(&format!("{}:", requester)) {
                return Err(RegenerateError::NotYourTurn);
            }
        }

        self.transcript
            .pop_last()
            .map_err(|_| RegenerateError::NothingToRegenerate)?;
        let bot_name = self.settings.bot_name.clone();
        Ok(self.generate(&bot_name).await)
    }

    /// Generate from a free-standing prompt. Memory is neither read nor
    /// written.
    pub async fn generate_raw(&self, prompt: &str) -> GenerationOutcome {
        let framed = match encode_tokens(&self.tokenizer.encode(prompt)) {
            Ok(framed) => framed,
            Err(e) => {
                error!(error = %e, "Could not frame prompt");
                return GenerationOutcome::Failure(ErrorKind::GenericError);
            }
        };
        self.request(framed, self.settings.experimental_settings.clone())
            .await
    }

    /// Forget every turn.
    pub fn clear(&mut self) {
        self.transcript.clear();
        info!("Memories cleared");
    }

    /// Remove and return the newest entry.
    pub fn pop_last(&mut self) -> Result<String> {
        self.transcript.pop_last()
    }

    /// Owned copy of the transcript, preamble first.
    pub fn snapshot(&self) -> Vec<String> {
        self.transcript.snapshot()
    }

    /// The turns after the preamble.
    pub fn memories(&self) -> &[String] {
        self.transcript.turns()
    }

    /// Append the placeholder, generate, and take the placeholder back out.
    ///
    /// On success only the placeholder is removed, and only while it is still
    /// the newest entry; eviction may already have consumed it. On failure the
    /// transcript is restored to what it was before the placeholder went in,
    /// undoing any eviction the placeholder caused.
    async fn request_with_placeholder(
        &mut self,
        speaker: &str,
        experimental_settings: Option<serde_json::Value>,
    ) -> GenerationOutcome {
        let before = self.transcript.snapshot();
        let placeholder = format!("{}:", speaker);
        if let Err(e) = self.append(placeholder.clone()) {
            error!(error = %e, "Eviction failed while preparing generation");
            self.transcript.replace_entries(before);
            return GenerationOutcome::Failure(ErrorKind::GenericError);
        }

        let outcome = match encode_transcript(self.transcript.entries(), self.tokenizer.as_ref()) {
            Ok(framed) => self.request(framed, experimental_settings).await,
            Err(e) => {
                error!(error = %e, "Could not frame transcript");
                GenerationOutcome::Failure(ErrorKind::GenericError)
            }
        };

        if outcome.is_success() {
            self.remove_placeholder(&placeholder);
        } else {
            debug!("Generation failed; restoring transcript");
            self.transcript.replace_entries(before);
        }
        outcome
    }

    fn remove_placeholder(&mut self, placeholder: &str) {
        if self.transcript.last() != placeholder || self.transcript.pop_last().is_err() {
            debug!("Placeholder already evicted");
        }
    }

    /// One backend call: send, unframe, detokenize, reject blank text.
    async fn request(
        &self,
        chat_history: String,
        experimental_settings: Option<serde_json::Value>,
    ) -> GenerationOutcome {
        let request = GenerateRequest::new(
            chat_history,
            self.settings.generation_settings.clone(),
            experimental_settings,
            self.settings.device.clone(),
        );

        let payload = match self.backend.generate(&request).await {
            Ok(payload) => payload,
            Err(kind) => return GenerationOutcome::Failure(kind),
        };

        let text = match decode_generation(&payload)
            .and_then(|ids| self.tokenizer.decode(&ids))
        {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Could not decode generated payload");
                return GenerationOutcome::Failure(ErrorKind::GenericError);
            }
        };

        if text.trim().is_empty() {
            return GenerationOutcome::Failure(ErrorKind::EmptyOutput);
        }
        GenerationOutcome::Success(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LoadRequest;
    use crate::memory::{Budget, EvictionPolicy};
    use crate::tokenizer::CharTokenizer;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns canned replies in order and records every request.
    struct ScriptedBackend {
        replies: Mutex<Vec<std::result::Result<String, ErrorKind>>>,
        requests: Mutex<Vec<GenerateRequest>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<std::result::Result<&str, ErrorKind>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .rev()
                        .map(|r| r.map(|text| encode_tokens(&CharTokenizer.encode(text)).unwrap()))
                        .collect(),
                ),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn last_request(&self) -> GenerateRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn load(&self, _request: &LoadRequest) -> Result<()> {
            Ok(())
        }

        async fn generate(
            &self,
            request: &GenerateRequest,
        ) -> std::result::Result<String, ErrorKind> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(ErrorKind::GenericError))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn conversation(backend: Arc<ScriptedBackend>, policy: EvictionPolicy) -> Conversation {
        let settings = SessionSettings::new("P\n", &CharTokenizer, Budget::new(1000, 0), policy)
            .with_names("Anna", "Bob");
        Conversation::new(Arc::new(settings), Arc::new(CharTokenizer), backend)
    }

    /// Room for the preamble and two 9-token turns, but not the placeholder.
    fn tight_conversation(backend: Arc<ScriptedBackend>, policy: EvictionPolicy) -> Conversation {
        let settings = SessionSettings::new("P\n", &CharTokenizer, Budget::new(20, 0), policy)
            .with_names("Anna", "Bob");
        let mut conv = Conversation::new(Arc::new(settings), Arc::new(CharTokenizer), backend);
        conv.append_turn("Anna", "hi").unwrap();
        conv.append_turn("Anna", "yo").unwrap();
        conv
    }

    fn sent_text(request: &GenerateRequest) -> String {
        let ids = decode_generation(&request.chat_history).unwrap();
        CharTokenizer.decode(&ids).unwrap()
    }

    #[tokio::test]
    async fn test_generate_success_commits_reply() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok("hello\n")]));
        let mut conv = conversation(backend.clone(), EvictionPolicy::None);
        conv.append_turn("Anna", "hi").unwrap();

        let outcome = conv.generate("Bob").await;
        assert_eq!(outcome, GenerationOutcome::Success("hello\n".to_string()));
        assert_eq!(conv.snapshot(), vec!["P\n", "Anna: hi\n", "Bob: hello\n"]);
        assert_eq!(sent_text(&backend.last_request()), "P\nAnna: hi\nBob:");
    }

    #[tokio::test]
    async fn test_generate_reply_gets_newline() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(" hello")]));
        let mut conv = conversation(backend, EvictionPolicy::None);
        conv.generate("Bob").await;
        assert_eq!(conv.transcript().last(), "Bob:  hello\n");
    }

    #[tokio::test]
    async fn test_generate_failure_rolls_back() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(ErrorKind::Timeout)]));
        let mut conv = conversation(backend, EvictionPolicy::None);
        conv.append_turn("Anna", "hi").unwrap();
        let before = conv.snapshot();

        let outcome = conv.generate("Bob").await;
        assert_eq!(outcome.error(), Some(ErrorKind::Timeout));
        assert_eq!(conv.snapshot(), before);
    }

    #[tokio::test]
    async fn test_failure_undoes_placeholder_eviction() {
        for policy in [EvictionPolicy::BySentence, EvictionPolicy::ByToken] {
            let backend = Arc::new(ScriptedBackend::new(vec![Err(ErrorKind::HttpError(500))]));
            let mut conv = tight_conversation(backend.clone(), policy);
            let before = conv.snapshot();
            assert_eq!(before, vec!["P\n", "Anna: hi\n", "Anna: yo\n"]);

            let outcome = conv.generate("Bob").await;
            assert_eq!(outcome.error(), Some(ErrorKind::HttpError(500)));
            // The placeholder forced an eviction before the request went out.
            assert!(!sent_text(&backend.last_request()).contains("Anna: hi"));
            assert_eq!(conv.snapshot(), before, "{} lost history", policy);
        }
    }

    #[tokio::test]
    async fn test_autocomplete_undoes_placeholder_eviction() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok("sure"),
            Err(ErrorKind::TransportError),
        ]));
        let mut conv = tight_conversation(backend, EvictionPolicy::BySentence);
        let before = conv.snapshot();

        assert!(conv.autocomplete("Anna").await.is_success());
        assert_eq!(conv.snapshot(), before);

        assert_eq!(
            conv.autocomplete("Anna").await.error(),
            Some(ErrorKind::TransportError)
        );
        assert_eq!(conv.snapshot(), before);
    }

    #[tokio::test]
    async fn test_generate_empty_output_clears() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok("  \n")]));
        let mut conv = conversation(backend, EvictionPolicy::None);
        conv.append_turn("Anna", "hi").unwrap();

        let outcome = conv.generate("Bob").await;
        assert_eq!(outcome, GenerationOutcome::Failure(ErrorKind::EmptyOutput));
        assert_eq!(conv.snapshot(), vec!["P\n"]);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_generic() {
        let backend = Arc::new(ScriptedBackend {
            replies: Mutex::new(vec![Ok("%%%".to_string())]),
            requests: Mutex::new(Vec::new()),
        });
        let mut conv = conversation(backend, EvictionPolicy::None);
        let outcome = conv.generate("Bob").await;
        assert_eq!(outcome.error(), Some(ErrorKind::GenericError));
        assert_eq!(conv.snapshot(), vec!["P\n"]);
    }

    #[tokio::test]
    async fn test_autocomplete_leaves_memory_untouched() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok("I am fine\n")]));
        let mut conv = conversation(backend.clone(), EvictionPolicy::None);
        conv.append_turn("Bob", "how are you?").unwrap();
        let before = conv.snapshot();

        let outcome = conv.autocomplete("Anna").await;
        assert_eq!(outcome.text(), Some("I am fine\n"));
        assert_eq!(conv.snapshot(), before);
        assert!(backend.last_request().experimental_settings.is_none());
        assert!(sent_text(&backend.last_request()).ends_with("Anna:"));
    }

    #[tokio::test]
    async fn test_autocomplete_empty_does_not_clear() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok("")]));
        let mut conv = conversation(backend, EvictionPolicy::None);
        conv.append_turn("Bob", "hey").unwrap();
        let outcome = conv.autocomplete("Anna").await;
        assert_eq!(outcome.error(), Some(ErrorKind::EmptyOutput));
        assert_eq!(conv.snapshot(), vec!["P\n", "Bob: hey\n"]);
    }

    #[tokio::test]
    async fn test_regenerate_replaces_bot_turn() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok("first\n"), Ok("second\n")]));
        let mut conv = conversation(backend, EvictionPolicy::None);
        conv.append_turn("Anna", "hi").unwrap();
        conv.generate("Bob").await;

        let outcome = conv.regenerate("Anna").await.unwrap();
        assert_eq!(outcome.text(), Some("second\n"));
        assert_eq!(conv.snapshot(), vec!["P\n", "Anna: hi\n", "Bob: second\n"]);
    }

    #[tokio::test]
    async fn test_regenerate_refusals() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok("yo\n")]));
        let mut conv = conversation(backend, EvictionPolicy::None);
        assert_eq!(
            conv.regenerate("Anna").await.unwrap_err(),
            RegenerateError::NothingToRegenerate
        );

        conv.append_turn("Anna", "hi").unwrap();
        assert_eq!(
            conv.regenerate("Anna").await.unwrap_err(),
            RegenerateError::NotABotTurn
        );

        conv.generate("Bob").await;
        assert_eq!(
            conv.regenerate("Carl").await.unwrap_err(),
            RegenerateError::NotYourTurn
        );
        assert_eq!(conv.memories().len(), 2);
    }

    #[tokio::test]
    async fn test_generate_raw_bypasses_memory() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok("once upon a time")]));
        let conv = conversation(backend.clone(), EvictionPolicy::None);

        let outcome = conv.generate_raw("Tell me a story").await;
        assert_eq!(outcome.text(), Some("once upon a time"));
        assert_eq!(conv.snapshot(), vec!["P\n"]);
        assert_eq!(sent_text(&backend.last_request()), "Tell me a story");
    }

    #[tokio::test]
    async fn test_clear_and_pop_last() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let mut conv = conversation(backend, EvictionPolicy::None);
        conv.append_turn("Anna", "one").unwrap();
        conv.append_turn("Anna", "two").unwrap();
        assert_eq!(conv.pop_last().unwrap(), "Anna: two\n");
        conv.clear();
        assert!(conv.memories().is_empty());
        assert!(conv.pop_last().is_err());
    }

    #[test]
    fn test_outcome_into_reply() {
        assert_eq!(
            GenerationOutcome::Success("hi\n".to_string()).into_reply(),
            "hi"
        );
        assert!(GenerationOutcome::Failure(ErrorKind::HttpError(500))
            .into_reply()
            .contains("500"));
    }
}
