//! Location based access rules for key paths.
//!
//! Rules map a key path glob to one or more location patterns. A path is
//! allowed at a location when one of the location patterns of the rules that
//! govern it matches. Paths governed by no rule are denied.
//!
//! A rule governs a path when:
//! - the rule is keyed `owner` and the path is `active` or below it (active
//!   keys are derived from owner), or
//! - the rule glob matches the path or any of its ancestors (children are
//!   derived from their parents).
//!
//! Rules accumulate: every governing rule contributes its location patterns.
//!
//! Location patterns are case-insensitive regular expressions anchored at the
//! start of the location. Unless a pattern ends with `$` it also accepts a
//! trailing `/`, query or fragment: `/contracts` matches `/contracts?x=1` but
//! not `/contracts2`.

use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{KeystoreError, KeystoreResult};
use crate::matcher::PathMatcher;
use crate::path::{KeyPath, OWNER};

const TRAILING_SUFFIX: &str = r"/?([#?].*)?$";

/// One location pattern or a list of them, as found in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocationPatterns {
    /// A single pattern.
    One(String),
    /// Several patterns; any may match.
    Many(Vec<String>),
}

impl LocationPatterns {
    /// The patterns as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::One(pattern) => std::slice::from_ref(pattern),
            Self::Many(patterns) => patterns,
        }
    }
}

impl From<&str> for LocationPatterns {
    fn from(pattern: &str) -> Self {
        Self::One(pattern.to_string())
    }
}

impl From<Vec<&str>> for LocationPatterns {
    fn from(patterns: Vec<&str>) -> Self {
        Self::Many(patterns.into_iter().map(str::to_string).collect())
    }
}

/// Paths split by a rule check, each list in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleCheck {
    /// Paths allowed at the location.
    pub allow: Vec<KeyPath>,
    /// Paths denied at the location.
    pub deny: Vec<KeyPath>,
}

#[derive(Debug, Clone)]
struct Rule {
    key: PathMatcher,
    locations: Vec<Regex>,
}

impl Rule {
    fn governs(&self, path: &KeyPath) -> bool {
        if self.key.as_str() == OWNER && path.is_active_rooted() {
            return true;
        }
        path.prefixes().any(|prefix| self.key.matches_str(prefix))
    }
}

/// Compiled access rules.
#[derive(Debug, Clone)]
pub struct UriRules {
    rules: Vec<Rule>,
}

impl UriRules {
    /// Compiles a map of path glob to location patterns.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoreError::InvalidPattern`] if a path glob or a location
    /// pattern does not compile.
    pub fn new(rules: &BTreeMap<String, LocationPatterns>) -> KeystoreResult<Self> {
        let rules = rules
            .iter()
            .map(|(key, patterns)| {
                let locations = patterns
                    .as_slice()
                    .iter()
                    .map(|pattern| compile_location(pattern))
                    .collect::<KeystoreResult<Vec<_>>>()?;
                Ok(Rule {
                    key: PathMatcher::new(key)?,
                    locations,
                })
            })
            .collect::<KeystoreResult<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Splits `paths` into those allowed and those denied at `location`.
    /// Every input path lands in exactly one list.
    #[must_use]
    pub fn check<'a, I>(&self, location: &str, paths: I) -> RuleCheck
    where
        I: IntoIterator<Item = &'a KeyPath>,
    {
        let mut check = RuleCheck::default();
        for path in paths {
            if self.is_allowed(location, path) {
                check.allow.push(path.clone());
            } else {
                check.deny.push(path.clone());
            }
        }
        check
    }

    /// Paths allowed at `location`.
    #[must_use]
    pub fn allow<'a, I>(&self, location: &str, paths: I) -> Vec<KeyPath>
    where
        I: IntoIterator<Item = &'a KeyPath>,
    {
        self.check(location, paths).allow
    }

    /// Paths denied at `location`.
    #[must_use]
    pub fn deny<'a, I>(&self, location: &str, paths: I) -> Vec<KeyPath>
    where
        I: IntoIterator<Item = &'a KeyPath>,
    {
        self.check(location, paths).deny
    }

    /// Returns `true` if `path` is allowed at `location`.
    #[must_use]
    pub fn is_allowed(&self, location: &str, path: &KeyPath) -> bool {
        self.rules
            .iter()
            .filter(|rule| rule.governs(path))
            .flat_map(|rule| &rule.locations)
            .any(|pattern| pattern.is_match(location))
    }
}

fn compile_location(pattern: &str) -> KeystoreResult<Regex> {
    let trimmed = pattern.trim();
    let prefix = if trimmed.starts_with('^') { "" } else { "^" };
    let suffix = if trimmed.ends_with('$') { "" } else { TRAILING_SUFFIX };

    RegexBuilder::new(&format!("{prefix}{trimmed}{suffix}"))
        .case_insensitive(true)
        .build()
        .map_err(|err| KeystoreError::pattern(pattern, err))
}
