//! Per-bot settings shared by every conversation.

use serde_json::{Map, Value};

use crate::config::{Config, DEFAULT_EOS_TOKEN_ID, DEFAULT_PAD_TOKEN_ID};
use crate::error::{NetherError, Result};
use crate::memory::{Budget, EvictionPolicy};
use crate::tokenizer::Tokenizer;

/// Immutable settings derived from one config file.
///
/// Built once at startup and shared through an `Arc` by every conversation
/// of the bot. Word lists in the config are already tokenized here, so the
/// request path only copies JSON values.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub preamble: String,
    /// Token count of `preamble`, measured once
    pub preamble_tokens: usize,
    pub budget: Budget,
    pub policy: EvictionPolicy,
    pub user_name: String,
    pub bot_name: String,
    /// Sampler and syntax settings merged into one object
    pub generation_settings: Value,
    pub experimental_settings: Option<Value>,
    pub device: String,
}

impl SessionSettings {
    /// Prepare settings from a loaded config.
    ///
    /// # Errors
    ///
    /// Returns [`NetherError::Config`] when `max_length` is missing or a
    /// logit bias entry is not exactly one token.
    pub fn from_config(config: &Config, tokenizer: &dyn Tokenizer) -> Result<Self> {
        let max_length = config
            .generation_settings
            .syntax_settings
            .max_length
            .ok_or_else(|| {
                NetherError::Config(
                    "generation_settings.syntax_settings.max_length is required".to_string(),
                )
            })?;

        let preamble = config.preamble();
        let preamble_tokens = tokenizer.token_count(&preamble);

        let experimental_settings = match &config.experimental_settings {
            Some(value) => Some(prepare_experimental_settings(value, tokenizer)?),
            None => None,
        };

        Ok(Self {
            preamble,
            preamble_tokens,
            budget: Budget::new(max_length, config.netherworld_settings.extra_budget),
            policy: config.netherworld_settings.memory_cycler,
            user_name: config.provider_settings.user_name.clone(),
            bot_name: config.provider_settings.bot_name.clone(),
            generation_settings: merge_generation_settings(config, tokenizer)?,
            experimental_settings,
            device: config.netherworld_settings.device.clone(),
        })
    }

    /// Minimal settings for a bot with no sampler configuration.
    pub fn new(
        preamble: &str,
        tokenizer: &dyn Tokenizer,
        budget: Budget,
        policy: EvictionPolicy,
    ) -> Self {
        let mut generation_settings = Map::new();
        generation_settings.insert("max_length".to_string(), Value::from(budget.max_tokens));
        Self {
            preamble: preamble.to_string(),
            preamble_tokens: tokenizer.token_count(preamble),
            budget,
            policy,
            user_name: "User".to_string(),
            bot_name: "Bot".to_string(),
            generation_settings: Value::Object(generation_settings),
            experimental_settings: None,
            device: crate::config::DEFAULT_DEVICE.to_string(),
        }
    }

    pub fn with_names(mut self, user_name: &str, bot_name: &str) -> Self {
        self.user_name = user_name.to_string();
        self.bot_name = bot_name.to_string();
        self
    }

    /// Returns `true` when the preamble alone overflows the context window.
    pub fn preamble_oversized(&self) -> bool {
        self.preamble_tokens > self.budget.max_tokens
    }
}

/// Sampler settings overlaid with syntax settings (syntax wins), with the
/// default end-of-sequence and padding ids filled in and bad words tokenized.
fn merge_generation_settings(config: &Config, tokenizer: &dyn Tokenizer) -> Result<Value> {
    let syntax = &config.generation_settings.syntax_settings;
    let mut merged = config.generation_settings.sampler_settings.clone();

    let syntax_value = serde_json::to_value(syntax)?;
    if let Value::Object(syntax_map) = syntax_value {
        merged.extend(syntax_map);
    }

    merged
        .entry("eos_token_id".to_string())
        .or_insert_with(|| Value::from(DEFAULT_EOS_TOKEN_ID));
    merged
        .entry("pad_token_id".to_string())
        .or_insert_with(|| Value::from(DEFAULT_PAD_TOKEN_ID));

    if let Some(words) = &syntax.bad_words_ids {
        let ids: Vec<Vec<u32>> = words.iter().map(|w| tokenizer.encode(w)).collect();
        merged.insert("bad_words_ids".to_string(), serde_json::to_value(ids)?);
    }

    Ok(Value::Object(merged))
}

/// Replace the words in `experimental_processors.logit_bias` with their
/// token ids.
///
/// Accepts either `{"word": bias}` or `[["word", bias], ...]` and always
/// produces `[[token_id, bias], ...]`.
fn prepare_experimental_settings(value: &Value, tokenizer: &dyn Tokenizer) -> Result<Value> {
    let mut prepared = value.clone();
    let bias = match prepared
        .get_mut("experimental_processors")
        .and_then(|p| p.get_mut("logit_bias"))
    {
        Some(bias) => bias,
        None => return Ok(value.clone()),
    };

    let pairs: Vec<(Value, Value)> = match bias {
        Value::Object(map) => map
            .iter()
            .map(|(word, b)| (Value::String(word.clone()), b.clone()))
            .collect(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item.as_array().map(Vec::as_slice) {
                Some([word, b]) => Ok((word.clone(), b.clone())),
                _ => Err(NetherError::Config(format!(
                    "logit_bias entries must be [word, bias] pairs, got {}",
                    item
                ))),
            })
            .collect::<Result<_>>()?,
        other => {
            return Err(NetherError::Config(format!(
                "logit_bias must be an object or a list of pairs, got {}",
                other
            )))
        }
    };

    let mut tokenized = Vec::with_capacity(pairs.len());
    for (word, b) in pairs {
        let token = match word {
            Value::String(word) => single_token(&word, tokenizer)?,
            Value::Number(n) => n
                .as_u64()
                .and_then(|id| u32::try_from(id).ok())
                .ok_or_else(|| NetherError::Config(format!("invalid token id {}", n)))?,
            other => {
                return Err(NetherError::Config(format!(
                    "logit_bias word must be a string, got {}",
                    other
                )))
            }
        };
        tokenized.push(Value::Array(vec![Value::from(token), b]));
    }
    *bias = Value::Array(tokenized);
    Ok(prepared)
}

fn single_token(word: &str, tokenizer: &dyn Tokenizer) -> Result<u32> {
    match tokenizer.encode(word).as_slice() {
        [token] => Ok(*token),
        tokens => Err(NetherError::Config(format!(
            "You can only bias one token at a time! '{}' is {} tokens",
            word,
            tokens.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::CharTokenizer;
    use serde_json::json;

    fn config(extra: Value) -> Config {
        let mut base = json!({
            "backend_settings": {"url": "http://localhost:8000"},
            "generation_settings": {
                "sampler_settings": {"temperature": 0.7, "max_length": 1},
                "syntax_settings": {"max_length": 40}
            },
            "input_settings": {"prompt": "You are Bob.", "example_conversation": "\n"},
            "provider_settings": {"user_name": "Anna", "bot_name": "Bob"},
            "netherworld_settings": {"memory_cycler": "by_sentence", "extra_budget": 5}
        });
        if let (Some(base_map), Value::Object(extra_map)) = (base.as_object_mut(), extra) {
            base_map.extend(extra_map);
        }
        serde_json::from_value(base).unwrap()
    }

    #[test]
    fn test_from_config_basics() {
        let settings = SessionSettings::from_config(&config(json!({})), &CharTokenizer).unwrap();
        assert_eq!(settings.preamble, "You are Bob.\n");
        assert_eq!(settings.preamble_tokens, 13);
        assert_eq!(settings.budget, Budget::new(40, 5));
        assert_eq!(settings.policy, EvictionPolicy::BySentence);
        assert_eq!(settings.user_name, "Anna");
        assert_eq!(settings.bot_name, "Bob");
        assert_eq!(settings.device, "cpu");
        assert!(!settings.preamble_oversized());
    }

    #[test]
    fn test_generation_settings_merge_syntax_wins() {
        let settings = SessionSettings::from_config(&config(json!({})), &CharTokenizer).unwrap();
        let gen = &settings.generation_settings;
        assert_eq!(gen["temperature"], 0.7);
        assert_eq!(gen["max_length"], 40);
        assert_eq!(gen["eos_token_id"], 198);
        assert_eq!(gen["pad_token_id"], 50256);
    }

    #[test]
    fn test_explicit_eos_kept() {
        let cfg = config(json!({
            "generation_settings": {"syntax_settings": {"max_length": 40, "eos_token_id": 13}}
        }));
        let settings = SessionSettings::from_config(&cfg, &CharTokenizer).unwrap();
        assert_eq!(settings.generation_settings["eos_token_id"], 13);
    }

    #[test]
    fn test_bad_words_tokenized() {
        let cfg = config(json!({
            "generation_settings": {"syntax_settings": {"max_length": 40, "bad_words_ids": ["ab", "c"]}}
        }));
        let settings = SessionSettings::from_config(&cfg, &CharTokenizer).unwrap();
        assert_eq!(
            settings.generation_settings["bad_words_ids"],
            json!([[97, 98], [99]])
        );
    }

    #[test]
    fn test_logit_bias_object_tokenized() {
        let cfg = config(json!({
            "experimental_settings": {
                "experimental_warpers": {"tfs": 0.9},
                "experimental_processors": {"logit_bias": {"!": 2.5}}
            }
        }));
        let settings = SessionSettings::from_config(&cfg, &CharTokenizer).unwrap();
        let exp = settings.experimental_settings.unwrap();
        assert_eq!(exp["experimental_processors"]["logit_bias"], json!([[33, 2.5]]));
        assert_eq!(exp["experimental_warpers"]["tfs"], 0.9);
    }

    #[test]
    fn test_logit_bias_pairs_tokenized() {
        let cfg = config(json!({
            "experimental_settings": {
                "experimental_processors": {"logit_bias": [["?", -1.0], [33, 1.0]]}
            }
        }));
        let settings = SessionSettings::from_config(&cfg, &CharTokenizer).unwrap();
        let exp = settings.experimental_settings.unwrap();
        assert_eq!(
            exp["experimental_processors"]["logit_bias"],
            json!([[63, -1.0], [33, 1.0]])
        );
    }

    #[test]
    fn test_logit_bias_multi_token_rejected() {
        let cfg = config(json!({
            "experimental_settings": {"experimental_processors": {"logit_bias": {"hello": 1.0}}}
        }));
        let err = SessionSettings::from_config(&cfg, &CharTokenizer).unwrap_err();
        assert!(err.to_string().contains("one token at a time"));
    }

    #[test]
    fn test_missing_max_length() {
        let mut cfg = config(json!({}));
        cfg.generation_settings.syntax_settings.max_length = None;
        assert!(matches!(
            SessionSettings::from_config(&cfg, &CharTokenizer),
            Err(NetherError::Config(_))
        ));
    }

    #[test]
    fn test_new_defaults() {
        let settings = SessionSettings::new("P", &CharTokenizer, Budget::new(10, 2), EvictionPolicy::ByToken)
            .with_names("Anna", "Bob");
        assert_eq!(settings.preamble_tokens, 1);
        assert_eq!(settings.generation_settings["max_length"], 10);
        assert_eq!(settings.bot_name, "Bob");
    }
}
