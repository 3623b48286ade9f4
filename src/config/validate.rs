//! Configuration validation with unknown field detection.

use serde_json::Value;
use std::collections::HashSet;

use crate::config::{Config, ProviderType};
use crate::tokenizer::Tokenizer;

/// Known top-level config field names.
const KNOWN_TOP_LEVEL: &[&str] = &[
    "backend_settings",
    "model_settings",
    "tokenizer_settings",
    "generation_settings",
    "input_settings",
    "provider_settings",
    "netherworld_settings",
    "experimental_settings",
    "logging",
];

/// Known fields for each section with a fixed shape.
const KNOWN_SECTIONS: &[(&str, &[&str])] = &[
    ("backend_settings", &["url", "timeout_secs"]),
    ("tokenizer_settings", &["encoding", "special_token_ids"]),
    ("generation_settings", &["sampler_settings", "syntax_settings"]),
    ("input_settings", &["prompt", "example_conversation"]),
    (
        "provider_settings",
        &[
            "provider_type",
            "user_name",
            "bot_name",
            "token",
            "bot_nicknames",
            "conditional_response",
            "allow_from",
            "status_type",
            "status_body",
        ],
    ),
    (
        "netherworld_settings",
        &["memory_cycler", "extra_budget", "device"],
    ),
    ("logging", &["level", "format", "file"]),
];

/// A validation diagnostic.
#[derive(Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub path: String,
    pub message: String,
}

#[derive(Debug, PartialEq)]
pub enum DiagnosticLevel {
    Ok,
    Warn,
    Error,
}

impl Diagnostic {
    pub fn new(level: DiagnosticLevel, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            path: path.into(),
            message: message.into(),
        }
    }

    fn missing(path: &str) -> Self {
        Self::new(
            DiagnosticLevel::Error,
            path,
            "Missing required setting. This setting is necessary.",
        )
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            DiagnosticLevel::Ok => "[OK]",
            DiagnosticLevel::Warn => "[WARN]",
            DiagnosticLevel::Error => "[ERROR]",
        };
        if self.path.is_empty() {
            write!(f, "{} {}", prefix, self.message)
        } else {
            write!(f, "{} {}: {}", prefix, self.path, self.message)
        }
    }
}

/// Returns `true` if any diagnostic is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics
        .iter()
        .any(|d| d.level == DiagnosticLevel::Error)
}

/// Simple Levenshtein distance for "did you mean?" suggestions.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut matrix = vec![vec![0usize; b.len() + 1]; a.len() + 1];

    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for (j, val) in matrix[0].iter_mut().enumerate() {
        *val = j;
    }

    for (i, ca) in a.iter().enumerate() {
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            matrix[i + 1][j + 1] = std::cmp::min(
                std::cmp::min(matrix[i][j + 1] + 1, matrix[i + 1][j] + 1),
                matrix[i][j] + cost,
            );
        }
    }
    matrix[a.len()][b.len()]
}

/// Suggest the closest known field name (if distance <= 3).
pub fn suggest_field(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| format!("did you mean '{}'?", k))
}

fn unknown_field(path: String, key: &str, known: &[&str]) -> Diagnostic {
    let message = match suggest_field(key, known) {
        Some(suggestion) => format!("Unknown field '{}', {}", key, suggestion),
        None => format!("Unknown field '{}'", key),
    };
    Diagnostic::new(DiagnosticLevel::Error, path, message)
}

/// Validate a raw JSON config value against known field names.
pub fn validate_config(raw: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match raw.as_object() {
        Some(o) => o,
        None => {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Error,
                "",
                "Config must be a JSON object",
            ));
            return diagnostics;
        }
    };

    diagnostics.push(Diagnostic::new(DiagnosticLevel::Ok, "", "Valid JSON"));

    let known_set: HashSet<&str> = KNOWN_TOP_LEVEL.iter().copied().collect();
    let mut has_unknown = false;
    for key in obj.keys() {
        if !known_set.contains(key.as_str()) {
            has_unknown = true;
            diagnostics.push(unknown_field(key.clone(), key, KNOWN_TOP_LEVEL));
        }
    }

    for (section, known) in KNOWN_SECTIONS {
        let Some(fields) = obj.get(*section).and_then(|v| v.as_object()) else {
            continue;
        };
        let known_set: HashSet<&str> = known.iter().copied().collect();
        for key in fields.keys() {
            if !known_set.contains(key.as_str()) {
                has_unknown = true;
                diagnostics.push(unknown_field(format!("{}.{}", section, key), key, known));
            }
        }
    }

    if !has_unknown {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Ok,
            "",
            "All fields recognized",
        ));
    }

    diagnostics
}

/// Check that the settings every bot needs are present.
pub fn validate_required(config: &Config) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    if config.backend_settings.url.trim().is_empty() {
        diagnostics.push(Diagnostic::missing("backend_settings.url"));
    } else if !config.backend_settings.url.starts_with("http://")
        && !config.backend_settings.url.starts_with("https://")
    {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "backend_settings.url",
            "URL must start with http:// or https://",
        ));
    }
    if config.input_settings.prompt.is_empty() {
        diagnostics.push(Diagnostic::missing("input_settings.prompt"));
    }
    if config.generation_settings.syntax_settings.max_length.is_none() {
        diagnostics.push(Diagnostic::missing(
            "generation_settings.syntax_settings.max_length",
        ));
    }
    if config.provider_settings.bot_name.trim().is_empty() {
        diagnostics.push(Diagnostic::missing("provider_settings.bot_name"));
    }
    if config.provider_settings.user_name.trim().is_empty() {
        diagnostics.push(Diagnostic::missing("provider_settings.user_name"));
    }

    if config.provider_settings.provider_type == ProviderType::Discord {
        if config.provider_settings.token.trim().is_empty() {
            diagnostics.push(Diagnostic::missing("provider_settings.token"));
        }
        if config.provider_settings.allow_from.is_empty() {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Warn,
                "provider_settings.allow_from",
                "Empty, anyone can message the bot",
            ));
        }
    }

    let max_length = config.max_length();
    if max_length > 0 && config.netherworld_settings.extra_budget >= max_length {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Warn,
            "netherworld_settings.extra_budget",
            format!(
                "extra_budget ({}) leaves no room for memories within max_length ({})",
                config.netherworld_settings.extra_budget, max_length
            ),
        ));
    }

    diagnostics
}

/// Report a preamble that does not fit inside `max_length` on its own.
pub fn validate_preamble(config: &Config, tokenizer: &dyn Tokenizer) -> Option<Diagnostic> {
    let max_length = config.generation_settings.syntax_settings.max_length?;
    let preamble_tokens = tokenizer.token_count(&config.preamble());
    if preamble_tokens > max_length {
        Some(Diagnostic::new(
            DiagnosticLevel::Error,
            "input_settings.prompt",
            format!(
                "Prompt is {} tokens, larger than max_length ({}). Increase max_length or shorten your prompt!",
                preamble_tokens, max_length
            ),
        ))
    } else {
        None
    }
}
