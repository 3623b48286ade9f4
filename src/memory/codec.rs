//! Wire framing for token payloads.
//!
//! The backend exchanges token id lists as a base64 string of their JSON
//! text, and that string is itself JSON-encoded once more before it goes into
//! the request body:
//!
//! ```text
//! [15496, 11, 995]  ->  "WzE1NDk2LCAxMSwgOTk1XQ=="  ->  "\"WzE1NDk2LCAxMSwgOTk1XQ==\""
//! ```
//!
//! Responses come back either with or without the outer quoting and hold
//! either a flat id list or a batch (`[[ids], ...]`) of which only the first
//! row matters.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;

use crate::error::{NetherError, Result};
use crate::tokenizer::Tokenizer;

/// Frame an already-tokenized prompt.
pub fn encode_tokens(tokens: &[u32]) -> Result<String> {
    let ids = serde_json::to_string(tokens)?;
    let b64 = STANDARD.encode(ids.as_bytes());
    Ok(serde_json::to_string(&b64)?)
}

/// Join the transcript entries, tokenize and frame them for `/generate`.
///
/// # Example
/// ```
/// use netherworld::memory::encode_transcript;
/// use netherworld::tokenizer::CharTokenizer;
///
/// let payload = encode_transcript(&["a".to_string(), "b".to_string()], &CharTokenizer).unwrap();
/// // [97,98] -> Wzk3LDk4XQ==
/// assert_eq!(payload, "\"Wzk3LDk4XQ==\"");
/// ```
pub fn encode_transcript(entries: &[String], tokenizer: &dyn Tokenizer) -> Result<String> {
    encode_tokens(&tokenizer.encode(&entries.concat()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenRows {
    Flat(Vec<u32>),
    Batched(Vec<Vec<u32>>),
}

/// Unframe the backend's generated payload into token ids.
pub fn decode_generation(payload: &str) -> Result<Vec<u32>> {
    let trimmed = payload.trim();
    let b64 = if trimmed.starts_with('"') {
        serde_json::from_str::<String>(trimmed)
            .map_err(|e| NetherError::Codec(format!("payload is not a JSON string: {}", e)))?
    } else {
        trimmed.to_string()
    };

    let raw = STANDARD
        .decode(b64.trim())
        .map_err(|e| NetherError::Codec(format!("invalid base64 payload: {}", e)))?;
    let text = String::from_utf8(raw)
        .map_err(|e| NetherError::Codec(format!("payload is not UTF-8: {}", e)))?;

    let rows: TokenRows = serde_json::from_str(&text)
        .map_err(|e| NetherError::Codec(format!("payload is not a token array: {}", e)))?;

    match rows {
        TokenRows::Flat(ids) => Ok(ids),
        TokenRows::Batched(mut batch) => {
            if batch.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(batch.swap_remove(0))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::CharTokenizer;

    fn frame(json: &str) -> String {
        STANDARD.encode(json.as_bytes())
    }

    #[test]
    fn test_encode_tokens_double_encodes() {
        let payload = encode_tokens(&[1, 2, 3]).unwrap();
        let inner: String = serde_json::from_str(&payload).unwrap();
        let bytes = STANDARD.decode(inner).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "[1,2,3]");
    }

    #[test]
    fn test_encode_transcript_matches_tokenizer() {
        let entries = vec!["You are Bob.".to_string(), "Anna: hi\n".to_string()];
        let payload = encode_transcript(&entries, &CharTokenizer).unwrap();
        let inner: String = serde_json::from_str(&payload).unwrap();
        let ids: Vec<u32> = serde_json::from_slice(&STANDARD.decode(inner).unwrap()).unwrap();
        assert_eq!(ids, CharTokenizer.encode("You are Bob.Anna: hi\n"));
    }

    #[test]
    fn test_encode_empty_transcript() {
        let payload = encode_tokens(&[]).unwrap();
        assert_eq!(payload, format!("\"{}\"", frame("[]")));
    }

    #[test]
    fn test_decode_bare_flat() {
        assert_eq!(decode_generation(&frame("[5, 6, 7]")).unwrap(), vec![5, 6, 7]);
    }

    #[test]
    fn test_decode_quoted_batched() {
        let quoted = format!("\"{}\"", frame("[[5, 6], [9]]"));
        assert_eq!(decode_generation(&quoted).unwrap(), vec![5, 6]);
    }

    #[test]
    fn test_decode_empty_batch() {
        assert!(decode_generation(&frame("[]")).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_generation("not base64!!"),
            Err(NetherError::Codec(_))
        ));
        assert!(matches!(
            decode_generation(&frame("{\"a\": 1}")),
            Err(NetherError::Codec(_))
        ));
    }

    #[test]
    fn test_request_payload_is_accepted_by_decoder() {
        let payload = encode_tokens(&[42, 43]).unwrap();
        assert_eq!(decode_generation(&payload).unwrap(), vec![42, 43]);
    }
}
