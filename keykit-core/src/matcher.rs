//! Glob matchers over key paths.
//!
//! `*` matches within one segment and `**` across segments, so `active/**`
//! matches `active/a` and `active/a/b` but not `active` itself.

use std::fmt;

use glob::{MatchOptions, Pattern};

use crate::error::{KeystoreError, KeystoreResult};
use crate::path::{self, KeyPath};

const OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A compiled key path glob.
#[derive(Clone)]
pub struct PathMatcher {
    source: String,
    pattern: Pattern,
}

impl PathMatcher {
    /// Compiles `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoreError::InvalidPattern`] if the glob does not compile.
    pub fn new(pattern: &str) -> KeystoreResult<Self> {
        let compiled = Pattern::new(pattern).map_err(|err| KeystoreError::pattern(pattern, err))?;
        Ok(Self {
            source: pattern.to_string(),
            pattern: compiled,
        })
    }

    /// Matcher for every path.
    #[must_use]
    pub fn any() -> Self {
        Self {
            source: "**".to_string(),
            pattern: Pattern::new("**").unwrap_or_default(),
        }
    }

    /// Compiles every pattern in `patterns`.
    ///
    /// # Errors
    ///
    /// Returns the first compile failure.
    pub fn all<S: AsRef<str>>(patterns: &[S]) -> KeystoreResult<Vec<Self>> {
        patterns.iter().map(|pattern| Self::new(pattern.as_ref())).collect()
    }

    /// The glob source.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Tests a canonical path.
    #[must_use]
    pub fn matches(&self, path: &KeyPath) -> bool {
        self.matches_str(path.as_str())
    }

    /// Tests a raw string.
    #[must_use]
    pub fn matches_str(&self, value: &str) -> bool {
        self.pattern.matches_with(value, OPTIONS)
    }
}

impl fmt::Debug for PathMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathMatcher").field(&self.source).finish()
    }
}

/// Selects key records: one exact path, or every path matching a glob.
///
/// Only an exact path can trigger on-demand derivation of a missing key.
#[derive(Debug, Clone)]
pub enum KeySelector {
    /// A single canonical path.
    Exact(KeyPath),
    /// A glob over paths.
    Glob(PathMatcher),
}

impl KeySelector {
    /// Parses a path or a glob. Strings that are valid paths are exact; the
    /// `owner/active` alias is canonicalized first.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is neither a valid path nor a valid glob.
    pub fn parse(value: &str) -> KeystoreResult<Self> {
        if path::is_path(value) {
            return Ok(Self::Exact(KeyPath::parse(value)?));
        }
        Ok(Self::Glob(PathMatcher::new(value)?))
    }

    /// Selector for every path.
    #[must_use]
    pub fn any() -> Self {
        Self::Glob(PathMatcher::any())
    }

    /// Tests a canonical path.
    #[must_use]
    pub fn matches(&self, path: &KeyPath) -> bool {
        match self {
            Self::Exact(exact) => exact == path,
            Self::Glob(glob) => glob.matches(path),
        }
    }

    /// The exact path, if this selector names one.
    #[must_use]
    pub const fn exact(&self) -> Option<&KeyPath> {
        match self {
            Self::Exact(path) => Some(path),
            Self::Glob(_) => None,
        }
    }
}

impl Default for KeySelector {
    fn default() -> Self {
        Self::any()
    }
}

impl From<KeyPath> for KeySelector {
    fn from(path: KeyPath) -> Self {
        Self::Exact(path)
    }
}

impl From<PathMatcher> for KeySelector {
    fn from(matcher: PathMatcher) -> Self {
        Self::Glob(matcher)
    }
}

impl TryFrom<&str> for KeySelector {
    type Error = KeystoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn path(value: &str) -> KeyPath {
        KeyPath::parse(value).expect("path")
    }

    #[test_case("active/**", "active", false ; "double star excludes parent")]
    #[test_case("active/**", "active/a", true ; "double star child")]
    #[test_case("active/**", "active/a/b", true ; "double star grandchild")]
    #[test_case("active/*", "active/a/b", false ; "single star one segment")]
    #[test_case("owner", "owner", true ; "literal")]
    #[test_case("owner", "owner/x", false ; "literal excludes child")]
    #[test_case("**", "active/a/b", true ; "match all")]
    fn test_glob(pattern: &str, value: &str, expected: bool) {
        let matcher = PathMatcher::new(pattern).expect("pattern");
        assert_eq!(matcher.matches(&path(value)), expected);
    }

    #[test]
    fn test_selector_parse() {
        let selector = KeySelector::parse("owner/active/x").expect("selector");
        assert_eq!(selector.exact(), Some(&path("active/x")));

        let selector = KeySelector::parse("active/*").expect("selector");
        assert!(selector.exact().is_none());
        assert!(selector.matches(&path("active/x")));
        assert!(!selector.matches(&path("owner")));

        assert!(KeySelector::any().matches(&path("owner")));
        assert!(PathMatcher::new("[").is_err());
    }
}
