//! Tokenizer adapters.
//!
//! The memory manager never tokenizes text itself; it goes through the
//! [`Tokenizer`] trait so the same budget logic works with any vocabulary.
//! Two adapters ship with the crate:
//!
//! - [`TiktokenTokenizer`]: BPE vocabularies from `tiktoken-rs`. `r50k_base` is
//!   the GPT-2 vocabulary used by GPT-Neo/GPT-J style backends.
//! - [`CharTokenizer`]: one token per Unicode scalar value. Deterministic and
//!   lossless, handy for character-level backends and for tests.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tiktoken_rs::CoreBPE;

use crate::config::TokenizerConfig;
use crate::error::{NetherError, Result};

/// Text <-> token id conversion.
pub trait Tokenizer: Send + Sync {
    /// Encode text into token ids. Pure; never fails.
    fn encode(&self, text: &str) -> Vec<u32>;

    /// Decode token ids back into text, dropping special tokens.
    fn decode(&self, tokens: &[u32]) -> Result<String>;

    /// Number of tokens `text` encodes to.
    fn token_count(&self, text: &str) -> usize {
        self.encode(text).len()
    }

    /// Short identifier used in logs.
    fn name(&self) -> &str;
}

// ============================================================================
// tiktoken
// ============================================================================

static R50K: OnceCell<Arc<CoreBPE>> = OnceCell::new();
static P50K: OnceCell<Arc<CoreBPE>> = OnceCell::new();
static CL100K: OnceCell<Arc<CoreBPE>> = OnceCell::new();
static O200K: OnceCell<Arc<CoreBPE>> = OnceCell::new();

fn load_bpe(encoding: &str) -> std::result::Result<CoreBPE, String> {
    let loaded = match encoding {
        "r50k_base" | "gpt2" => tiktoken_rs::r50k_base(),
        "p50k_base" => tiktoken_rs::p50k_base(),
        "cl100k_base" => tiktoken_rs::cl100k_base(),
        "o200k_base" => tiktoken_rs::o200k_base(),
        other => return Err(format!("unknown tokenizer encoding '{}'", other)),
    };
    loaded.map_err(|e| format!("failed to load {}: {}", encoding, e))
}

/// Vocabulary loading is expensive, so each encoding is built once per process
/// and shared by every session.
fn shared_bpe(encoding: &str) -> Result<Arc<CoreBPE>> {
    let cell = match encoding {
        "r50k_base" | "gpt2" => &R50K,
        "p50k_base" => &P50K,
        "cl100k_base" => &CL100K,
        "o200k_base" => &O200K,
        other => {
            return Err(NetherError::Tokenizer(format!(
                "unknown tokenizer encoding '{}'",
                other
            )))
        }
    };
    cell.get_or_try_init(|| load_bpe(encoding).map(Arc::new))
        .cloned()
        .map_err(NetherError::Tokenizer)
}

/// Special token ids dropped on decode when the config does not list its own.
fn default_special_ids(encoding: &str) -> Vec<u32> {
    match encoding {
        "r50k_base" | "gpt2" | "p50k_base" => vec![50256],
        "cl100k_base" => vec![100257, 100258, 100259, 100260, 100276],
        "o200k_base" => vec![199999, 200018],
        _ => Vec::new(),
    }
}

/// BPE tokenizer backed by `tiktoken-rs`.
#[derive(Clone)]
pub struct TiktokenTokenizer {
    encoding: String,
    bpe: Arc<CoreBPE>,
    special_ids: HashSet<u32>,
}

impl std::fmt::Debug for TiktokenTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenTokenizer")
            .field("encoding", &self.encoding)
            .field("special_ids", &self.special_ids)
            .finish()
    }
}

impl TiktokenTokenizer {
    /// Load a named encoding with its default special tokens.
    pub fn new(encoding: &str) -> Result<Self> {
        Self::with_special_ids(encoding, default_special_ids(encoding))
    }

    /// Load a named encoding and skip the given ids on decode.
    pub fn with_special_ids(encoding: &str, special_ids: Vec<u32>) -> Result<Self> {
        let bpe = shared_bpe(encoding)?;
        Ok(Self {
            encoding: encoding.to_string(),
            bpe,
            special_ids: special_ids.into_iter().collect(),
        })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe.encode_ordinary(text)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        let kept: Vec<u32> = tokens
            .iter()
            .copied()
            .filter(|id| !self.special_ids.contains(id))
            .collect();
        self.bpe.decode(kept).map_err(|e| {
            NetherError::Tokenizer(format!("{} decode failed: {}", self.encoding, e))
        })
    }

    fn name(&self) -> &str {
        &self.encoding
    }
}

// ============================================================================
// Character tokenizer
// ============================================================================

/// One token per Unicode scalar value; the id is the code point.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        text.chars().map(u32::from).collect()
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        tokens
            .iter()
            .map(|&id| {
                char::from_u32(id).ok_or_else(|| {
                    NetherError::Tokenizer(format!("{} is not a valid character token", id))
                })
            })
            .collect()
    }

    fn name(&self) -> &str {
        "char"
    }
}

/// Build the tokenizer described by the config.
pub fn from_config(cfg: &TokenizerConfig) -> Result<Arc<dyn Tokenizer>> {
    if cfg.encoding == "char" {
        return Ok(Arc::new(CharTokenizer));
    }
    let tokenizer = match &cfg.special_token_ids {
        Some(ids) => TiktokenTokenizer::with_special_ids(&cfg.encoding, ids.clone())?,
        None => TiktokenTokenizer::new(&cfg.encoding)?,
    };
    Ok(Arc::new(tokenizer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_tokenizer_counts_scalars() {
        let tok = CharTokenizer;
        assert_eq!(tok.token_count("héllo"), 5);
        assert_eq!(tok.encode("ab"), vec![97, 98]);
    }

    #[test]
    fn test_char_tokenizer_decode_roundtrip() {
        let tok = CharTokenizer;
        let ids = tok.encode("Bob: hi\n");
        assert_eq!(tok.decode(&ids).unwrap(), "Bob: hi\n");
    }

    #[test]
    fn test_char_tokenizer_rejects_surrogate() {
        let tok = CharTokenizer;
        assert!(tok.decode(&[0xD800]).is_err());
    }

    #[test]
    fn test_unknown_encoding() {
        let err = TiktokenTokenizer::new("nonsense_base").unwrap_err();
        assert!(err.to_string().contains("unknown tokenizer encoding"));
    }

    #[test]
    fn test_r50k_skips_end_of_text() {
        let tok = TiktokenTokenizer::new("r50k_base").unwrap();
        let mut ids = tok.encode("Hello there");
        ids.push(50256);
        assert_eq!(tok.decode(&ids).unwrap(), "Hello there");
    }

    #[test]
    fn test_r50k_newline_token() {
        let tok = TiktokenTokenizer::new("r50k_base").unwrap();
        assert_eq!(tok.encode("\n"), vec![198]);
    }

    #[test]
    fn test_from_config_char() {
        let cfg = TokenizerConfig {
            encoding: "char".to_string(),
            special_token_ids: None,
        };
        let tok = from_config(&cfg).unwrap();
        assert_eq!(tok.name(), "char");
    }
}
