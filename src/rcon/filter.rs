//! Suppression of pushed frames that are not real broadcasts.

use regex::Regex;

/// Decides which frames on the broadcast connection are real broadcasts.
///
/// Servers echo some things over the broadcast socket that nobody wants to see
/// (the reply to the heartbeat command, for one). Any body matching one of the
/// configured patterns is suppressed.
#[derive(Debug, Clone, Default)]
pub struct BroadcastFilter {
    patterns: Vec<Regex>,
}

impl BroadcastFilter {
    /// Build a filter from already compiled patterns.
    #[must_use]
    pub fn new(patterns: Vec<Regex>) -> Self {
        Self { patterns }
    }

    /// Compile `patterns` and build a filter from them.
    ///
    /// # Errors
    /// Returns the first pattern that fails to compile.
    pub fn compile<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<_, _>>()?;

        Ok(Self { patterns })
    }

    /// Add one more pattern.
    pub fn push(&mut self, pattern: Regex) {
        self.patterns.push(pattern);
    }

    /// `true` if any pattern matches `body`.
    #[must_use]
    pub fn is_suppressed(&self, body: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(body))
    }

    /// The patterns in the order they were added.
    #[must_use]
    pub fn patterns(&self) -> &[Regex] {
        &self.patterns
    }
}
