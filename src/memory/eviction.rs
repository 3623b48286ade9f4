//! Token-budget eviction strategies.
//!
//! Two interchangeable strategies shrink a transcript so it fits the context
//! window of the backend model:
//!
//! - **ByToken**: one encode and one decode per pass. Drops tokens from the
//!   front of the concatenated turns, so the oldest surviving line may start
//!   mid-sentence.
//! - **BySentence**: drops whole turns, oldest first, re-measuring after every
//!   removal. Every surviving entry is an untruncated turn.
//!
//! Both take the full entry list (preamble at position 0) and hand it back
//! with the preamble still at position 0. Both are idempotent: a transcript
//! that already fits is returned unchanged.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::tokenizer::Tokenizer;

use super::Transcript;

/// Decoding a token slice can fail when the cut lands inside a multi-byte
/// character; the cut is nudged forward at most this many tokens.
const MAX_CUT_ADJUST: usize = 4;

/// Which eviction strategy runs after each append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Never shrink; the caller enforces limits some other way.
    #[default]
    None,
    /// Drop whole turns, oldest first.
    BySentence,
    /// Drop leading tokens of the concatenated turns.
    ByToken,
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EvictionPolicy::None => "none",
            EvictionPolicy::BySentence => "by_sentence",
            EvictionPolicy::ByToken => "by_token",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(EvictionPolicy::None),
            "by_sentence" => Ok(EvictionPolicy::BySentence),
            "by_token" => Ok(EvictionPolicy::ByToken),
            other => Err(format!(
                "unknown memory cycler '{}' (expected none, by_sentence or by_token)",
                other
            )),
        }
    }
}

/// Context window size and the headroom kept free for the model's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    /// Total context window, in tokens.
    pub max_tokens: usize,
    /// Tokens kept free for the continuation.
    pub reserve_tokens: usize,
}

impl Budget {
    pub fn new(max_tokens: usize, reserve_tokens: usize) -> Self {
        Self {
            max_tokens,
            reserve_tokens,
        }
    }

    /// The working ceiling eviction targets: `max_tokens - reserve_tokens`.
    pub fn ceiling(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserve_tokens)
    }
}

impl EvictionPolicy {
    /// Run this strategy over `entries` (preamble first).
    pub fn apply(
        &self,
        entries: Vec<String>,
        preamble_tokens: usize,
        tokenizer: &dyn Tokenizer,
        budget: Budget,
    ) -> Result<Vec<String>> {
        match self {
            EvictionPolicy::None => Ok(entries),
            EvictionPolicy::BySentence => Ok(evict_by_sentence(
                entries,
                preamble_tokens,
                tokenizer,
                budget,
            )),
            EvictionPolicy::ByToken => evict_by_token(entries, preamble_tokens, tokenizer, budget),
        }
    }

    /// Run this strategy over a transcript in place.
    pub fn apply_to(
        &self,
        transcript: &mut Transcript,
        preamble_tokens: usize,
        tokenizer: &dyn Tokenizer,
        budget: Budget,
    ) -> Result<()> {
        if *self == EvictionPolicy::None {
            return Ok(());
        }
        let evicted = self.apply(transcript.snapshot(), preamble_tokens, tokenizer, budget)?;
        transcript.replace_entries(evicted);
        Ok(())
    }
}

fn warn_if_preamble_oversized(preamble_tokens: usize, budget: Budget) {
    if preamble_tokens > budget.max_tokens {
        error!(
            preamble_tokens,
            max_tokens = budget.max_tokens,
            "Your prompt is larger than your max length. Please increase max_length in your settings!"
        );
    }
}

/// Split `entries` into the preamble and the concatenated turns.
fn split_preamble(mut entries: Vec<String>) -> (String, Vec<String>) {
    if entries.is_empty() {
        return (String::new(), entries);
    }
    let preamble = entries.remove(0);
    (preamble, entries)
}

/// How many turn tokens a ByToken cut keeps.
///
/// Normally whatever room the ceiling leaves after the preamble. A preamble
/// larger than the whole window keeps `preamble_tokens - max_tokens`.
fn cut_length(preamble_tokens: usize, budget: Budget) -> usize {
    if preamble_tokens > budget.max_tokens {
        preamble_tokens - budget.max_tokens
    } else {
        budget.ceiling().saturating_sub(preamble_tokens)
    }
}

/// Which trim warning to log before dropping the oldest of `remaining` turns.
fn trim_warning(remaining: usize) -> Option<&'static str> {
    match remaining {
        2 => Some(
            "Your most recent message to the bot has been trimmed from short term memory! \
             Consider increasing max_length or lowering extra_budget.",
        ),
        1 => Some(
            "The bot's most recent message has been trimmed from short term memory! \
             Consider increasing max_length or lowering extra_budget.",
        ),
        _ => None,
    }
}

/// Single-pass token truncation.
///
/// When the turns plus the preamble exceed `budget.ceiling()`, the most recent
/// `ceiling - preamble_tokens` tokens of the concatenated turns are kept,
/// decoded, and split back into entries on newline boundaries (each newline
/// stays with the line it ends). Otherwise `entries` is returned unchanged.
///
/// # Example
/// ```
/// use netherworld::memory::{evict_by_token, Budget};
/// use netherworld::tokenizer::CharTokenizer;
///
/// let entries = vec!["P".to_string(), "ab\n".to_string(), "cd\n".to_string()];
/// let out = evict_by_token(entries, 1, &CharTokenizer, Budget::new(4, 0)).unwrap();
/// assert_eq!(out, vec!["P", "cd\n"]);
/// ```
pub fn evict_by_token(
    entries: Vec<String>,
    preamble_tokens: usize,
    tokenizer: &dyn Tokenizer,
    budget: Budget,
) -> Result<Vec<String>> {
    warn_if_preamble_oversized(preamble_tokens, budget);

    let (preamble, turns) = split_preamble(entries);
    let tokens = tokenizer.encode(&turns.concat());
    let total = tokens.len() + preamble_tokens;

    if total <= budget.ceiling() {
        let mut unchanged = Vec::with_capacity(turns.len() + 1);
        unchanged.push(preamble);
        unchanged.extend(turns);
        return Ok(unchanged);
    }

    let keep_len = cut_length(preamble_tokens, budget);
    let mut keep_from = tokens.len().saturating_sub(keep_len);

    let mut decoded = tokenizer.decode(&tokens[keep_from..]);
    let mut attempts = 0;
    while decoded.is_err() && attempts < MAX_CUT_ADJUST && keep_from < tokens.len() {
        keep_from += 1;
        attempts += 1;
        decoded = tokenizer.decode(&tokens[keep_from..]);
    }
    let text = decoded?;

    debug!(
        dropped_tokens = keep_from,
        kept_tokens = tokens.len() - keep_from,
        "Evicted leading tokens from transcript"
    );

    let kept_total = preamble_tokens + (tokens.len() - keep_from);
    if kept_total > budget.ceiling() {
        warn!(
            total = kept_total,
            ceiling = budget.ceiling(),
            "Memory budget starved: the preamble alone exceeds the budget"
        );
    }

    let mut result = Vec::new();
    result.push(preamble);
    result.extend(
        text.split_inclusive('\n')
            .filter(|line| !line.is_empty())
            .map(str::to_string),
    );
    Ok(result)
}

/// Iterative whole-turn eviction.
///
/// Drops the oldest turn while the turns plus the preamble exceed
/// `budget.ceiling()` and at least one turn remains.
///
/// # Example
/// ```
/// use netherworld::memory::{evict_by_sentence, Budget};
/// use netherworld::tokenizer::CharTokenizer;
///
/// let entries = vec!["P".to_string(), "ab\n".to_string(), "cd\n".to_string()];
/// let out = evict_by_sentence(entries, 1, &CharTokenizer, Budget::new(4, 0));
/// assert_eq!(out, vec!["P", "cd\n"]);
/// ```
pub fn evict_by_sentence(
    entries: Vec<String>,
    preamble_tokens: usize,
    tokenizer: &dyn Tokenizer,
    budget: Budget,
) -> Vec<String> {
    warn_if_preamble_oversized(preamble_tokens, budget);

    let (preamble, mut turns) = split_preamble(entries);
    let ceiling = budget.ceiling();
    let mut total = tokenizer.token_count(&turns.concat()) + preamble_tokens;
    let mut removed = 0usize;

    while total > ceiling && !turns.is_empty() {
        if let Some(message) = trim_warning(turns.len()) {
            warn!("{}", message);
        }
        turns.remove(0);
        removed += 1;
        total = tokenizer.token_count(&turns.concat()) + preamble_tokens;
    }

    if removed > 0 {
        debug!(removed, remaining = turns.len(), "Evicted oldest turns");
    }
    if total > ceiling {
        warn!(
            total,
            ceiling, "Memory budget starved: the preamble alone exceeds the budget"
        );
    }

    let mut result = Vec::with_capacity(turns.len() + 1);
    result.push(preamble);
    result.extend(turns);
    result
}
