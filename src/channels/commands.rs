//! Chat commands shared by every surface.
//!
//! A command is a message starting with `/` or `!` followed by one of the
//! names below. Anything else, including an unknown name, is ordinary chat.

use std::fmt;

/// Reply when there is nothing but the preamble in memory.
pub const NO_MEMORIES: &str = "No memories in chat history. Silence is Golden.";

/// Reply after `clear_memories`.
pub const MEMORIES_CLEARED: &str = "Successfully cleared memories.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Forget every turn
    ClearMemories,
    /// List the turns after the preamble
    DisplayMemories,
    /// Drop the bot's newest turn and generate it again
    RegenerateResponse,
    /// Predict the requester's next line without storing it
    Autocomplete,
    /// Generate from a free-standing prompt, bypassing memory
    Generate(String),
}

impl Command {
    /// Parse a message into a command.
    ///
    /// # Example
    /// ```
    /// use netherworld::channels::commands::Command;
    ///
    /// assert_eq!(Command::parse("/clear_memories"), Some(Command::ClearMemories));
    /// assert_eq!(
    ///     Command::parse("!generate Once upon a time"),
    ///     Some(Command::Generate("Once upon a time".to_string()))
    /// );
    /// assert_eq!(Command::parse("hello"), None);
    /// assert_eq!(Command::parse("/dance"), None);
    /// ```
    pub fn parse(content: &str) -> Option<Self> {
        let body = content
            .trim_start()
            .strip_prefix('/')
            .or_else(|| content.trim_start().strip_prefix('!'))?;

        let (name, rest) = match body.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (body.trim_end(), ""),
        };

        match name {
            "clear_memories" => Some(Command::ClearMemories),
            "display_memories" => Some(Command::DisplayMemories),
            "regenerate_response" => Some(Command::RegenerateResponse),
            "autocomplete" => Some(Command::Autocomplete),
            "generate" => Some(Command::Generate(rest.to_string())),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::ClearMemories => "clear_memories",
            Command::DisplayMemories => "display_memories",
            Command::RegenerateResponse => "regenerate_response",
            Command::Autocomplete => "autocomplete",
            Command::Generate(_) => "generate",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.name())
    }
}

/// Render memories as a numbered list, or [`NO_MEMORIES`] when empty.
pub fn format_memories(memories: &[String]) -> String {
    if memories.is_empty() {
        return NO_MEMORIES.to_string();
    }
    memories
        .iter()
        .enumerate()
        .map(|(i, entry)| format!("memory {}: {}", i + 1, entry.trim_end()))
        .collect::<Vec<_>>()
        .join("\n")
}
