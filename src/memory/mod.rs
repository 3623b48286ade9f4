//! Short-term conversational memory.
//!
//! A [`Transcript`] holds the preamble plus the turns of one conversation. An
//! [`EvictionPolicy`] keeps it inside a token [`Budget`], and the codec frames
//! it for the generation backend.

pub mod codec;
pub mod eviction;
pub mod transcript;

pub use codec::{decode_generation, encode_tokens, encode_transcript};
pub use eviction::{evict_by_sentence, evict_by_token, Budget, EvictionPolicy};
pub use transcript::Transcript;
