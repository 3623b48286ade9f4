//! Preamble-headed chat transcript.

use crate::error::{NetherError, Result};

/// Ordered chat transcript whose first entry is always the preamble.
///
/// The preamble is the personality/context text the bot must never forget.
/// Entries after it are turns in chronological order, oldest first. The
/// store itself never looks at token counts; callers run an
/// [`EvictionPolicy`](super::EvictionPolicy) after appending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    preamble: String,
    entries: Vec<String>,
}

impl Transcript {
    /// Create a transcript holding only `preamble`.
    ///
    /// # Example
    /// ```
    /// use netherworld::memory::Transcript;
    ///
    /// let transcript = Transcript::new("You are Bob.\n");
    /// assert_eq!(transcript.len(), 1);
    /// assert_eq!(transcript.snapshot(), vec!["You are Bob.\n".to_string()]);
    /// ```
    pub fn new(preamble: &str) -> Self {
        Self {
            preamble: preamble.to_string(),
            entries: vec![preamble.to_string()],
        }
    }

    /// The immutable preamble.
    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    /// Push `message` to the end. No budget check is made here.
    pub fn append(&mut self, message: impl Into<String>) {
        self.entries.push(message.into());
    }

    /// Remove and return the newest entry.
    ///
    /// # Errors
    ///
    /// Returns [`NetherError::EmptyTranscript`] when only the preamble is left.
    pub fn pop_last(&mut self) -> Result<String> {
        if self.entries.len() <= 1 {
            return Err(NetherError::EmptyTranscript);
        }
        self.entries.pop().ok_or(NetherError::EmptyTranscript)
    }

    /// Forget every turn; only the preamble remains.
    pub fn clear(&mut self) {
        self.entries.truncate(1);
        if self.entries.is_empty() {
            self.entries.push(self.preamble.clone());
        }
    }

    /// Owned copy of all entries, preamble first.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.clone()
    }

    /// All entries, preamble first.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// The turns after the preamble.
    pub fn turns(&self) -> &[String] {
        &self.entries[1..]
    }

    /// The newest entry (the preamble when there are no turns).
    pub fn last(&self) -> &str {
        self.entries.last().map(String::as_str).unwrap_or(&self.preamble)
    }

    /// Number of entries including the preamble.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`; a transcript holds at least its preamble.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Number of turns after the preamble.
    pub fn turn_count(&self) -> usize {
        self.entries.len() - 1
    }

    /// All entries concatenated in order, the text the backend sees.
    pub fn joined(&self) -> String {
        self.entries.concat()
    }

    /// Swap in the result of an eviction pass.
    ///
    /// `entries` must already carry the preamble at position 0; if it does
    /// not, the preamble is re-inserted so the invariant survives a
    /// misbehaving caller.
    pub(crate) fn replace_entries(&mut self, mut entries: Vec<String>) {
        if entries.first().map(String::as_str) != Some(self.preamble.as_str()) {
            entries.insert(0, self.preamble.clone());
        }
        self.entries = entries;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_holds_only_preamble() {
        let t = Transcript::new("You are Bob.");
        assert_eq!(t.len(), 1);
        assert_eq!(t.turn_count(), 0);
        assert_eq!(t.preamble(), "You are Bob.");
        assert!(t.turns().is_empty());
        assert!(!t.is_empty());
    }

    #[test]
    fn test_append_keeps_order() {
        let mut t = Transcript::new("P");
        t.append("Anna: hi\n");
        t.append("Bob: hello\n");
        assert_eq!(t.snapshot(), vec!["P", "Anna: hi\n", "Bob: hello\n"]);
        assert_eq!(t.last(), "Bob: hello\n");
        assert_eq!(t.joined(), "PAnna: hi\nBob: hello\n");
    }

    #[test]
    fn test_pop_last_returns_newest() {
        let mut t = Transcript::new("P");
        t.append("a");
        t.append("b");
        assert_eq!(t.pop_last().unwrap(), "b");
        assert_eq!(t.snapshot(), vec!["P", "a"]);
    }

    #[test]
    fn test_pop_last_refuses_preamble() {
        let mut t = Transcript::new("P");
        assert!(matches!(t.pop_last(), Err(NetherError::EmptyTranscript)));
        assert_eq!(t.snapshot(), vec!["P"]);
    }

    #[test]
    fn test_clear_resets_to_preamble() {
        let mut t = Transcript::new("P");
        for i in 0..5 {
            t.append(format!("turn {}\n", i));
        }
        t.clear();
        assert_eq!(t.snapshot(), vec!["P"]);
        assert!(!t.is_empty());
        t.clear();
        assert_eq!(t.snapshot(), vec!["P"]);
        assert!(!t.is_empty());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut t = Transcript::new("P");
        t.append("a");
        let mut snap = t.snapshot();
        snap.push("b".to_string());
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_replace_entries_restores_missing_preamble() {
        let mut t = Transcript::new("P");
        t.replace_entries(vec!["x".to_string()]);
        assert_eq!(t.snapshot(), vec!["P", "x"]);
        t.replace_entries(vec!["P".to_string(), "y".to_string()]);
        assert_eq!(t.snapshot(), vec!["P", "y"]);
    }

    #[test]
    fn test_last_without_turns_is_preamble() {
        let t = Transcript::new("P");
        assert_eq!(t.last(), "P");
    }
}
