//! Pattern matching for actions and resources
//!
//! A pattern matches a candidate when the two are equal, or when the pattern
//! ends in `*` and the candidate starts with everything before it. A `*` in
//! any other position is a literal character.

/// Pattern matcher for action and resource strings
pub struct PatternMatcher;

impl PatternMatcher {
    /// Check if any of `patterns` matches `candidate`
    ///
    /// An empty candidate never matches, so a request with a missing action
    /// or resource cannot be granted by a `*` statement.
    ///
    /// # Examples
    /// ```
    /// use pbac::access::PatternMatcher;
    ///
    /// assert!(PatternMatcher::matches(&["/api/service/*"], "/api/service/foo"));
    /// assert!(PatternMatcher::matches(&["read", "write"], "write"));
    /// assert!(!PatternMatcher::matches(&["*"], ""));
    /// ```
    pub fn matches<S: AsRef<str>>(patterns: &[S], candidate: &str) -> bool {
        if candidate.is_empty() {
            return false;
        }

        patterns
            .iter()
            .any(|pattern| Self::matches_pattern(pattern.as_ref(), candidate))
    }

    /// Match a single pattern against a non-empty candidate
    pub fn matches_pattern(pattern: &str, candidate: &str) -> bool {
        if pattern == candidate {
            return true;
        }

        match pattern.strip_suffix('*') {
            Some(prefix) => candidate.starts_with(prefix),
            None => false,
        }
    }
}
