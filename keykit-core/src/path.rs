//! Key path algebra.
//!
//! A key path names a node of the account's permission tree, segments joined
//! by `/` from the root down: `owner`, `active`, `active/mypermission`.
//!
//! `active` is always derived from `owner`, so the owner root is implied:
//! `owner/active` and `owner/active/x` are accepted and canonicalized to
//! `active` and `active/x`. Every stored record and every rule lookup uses the
//! canonical form.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Root permission of every account.
pub const OWNER: &str = "owner";

/// Permission derived from `owner`; the day-to-day signing key.
pub const ACTIVE: &str = "active";

const SEPARATOR: char = '/';
const MATCHER_CHARS: &[char] = &['*', '?', '[', ']', '{', '}', '!'];

/// Reasons a key path is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The path is the empty string.
    #[error("path should not be empty")]
    Empty,
    /// The path contains whitespace.
    #[error("'{0}': remove spaces")]
    Whitespace(String),
    /// The path contains a backslash.
    #[error("'{0}': use forward slash")]
    Backslash(String),
    /// The path starts with `/`.
    #[error("'{0}': remove leading slash")]
    LeadingSlash(String),
    /// The path ends with `/`.
    #[error("'{0}': remove ending slash")]
    TrailingSlash(String),
    /// The path contains `//`.
    #[error("'{0}': empty path segment")]
    EmptySegment(String),
    /// The path contains uppercase letters.
    #[error("'{0}': path should not have uppercase letters")]
    Uppercase(String),
    /// The path contains glob characters; it is a matcher, not a path.
    #[error("'{0}': path should not contain matcher characters")]
    Matcher(String),
    /// A segment name appears twice.
    #[error("'{path}': duplicate segment '{segment}'")]
    DuplicateSegment {
        /// The rejected path.
        path: String,
        /// The repeated segment.
        segment: String,
    },
    /// `owner` appears somewhere other than the first segment.
    #[error("'{0}': owner is always the root")]
    OwnerNotRoot(String),
    /// `active` appears deeper than the second segment.
    #[error("'{0}': active is implied or a child of owner")]
    ActiveNotRoot(String),
}

/// A validated, canonical key path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyPath(String);

impl KeyPath {
    /// Validates `path` and returns its canonical form.
    ///
    /// # Errors
    ///
    /// Returns a [`PathError`] describing the first violated rule.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        validate(path)?;

        let canonical = if path == "owner/active" {
            ACTIVE.to_string()
        } else if let Some(rest) = path.strip_prefix("owner/active/") {
            format!("{ACTIVE}{SEPARATOR}{rest}")
        } else {
            path.to_string()
        };
        Ok(Self(canonical))
    }

    /// The `owner` root path.
    #[must_use]
    pub fn owner() -> Self {
        Self(OWNER.to_string())
    }

    /// The `active` path.
    #[must_use]
    pub fn active() -> Self {
        Self(ACTIVE.to_string())
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates the path segments from the root down.
    pub fn segments(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.split(SEPARATOR)
    }

    /// Number of segments.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Iterates every leading sub-path, shortest first, ending with the path
    /// itself: `a`, `a/b`, `a/b/c`.
    pub fn prefixes(&self) -> impl Iterator<Item = &str> + '_ {
        self.0
            .match_indices(SEPARATOR)
            .map(|(index, _)| &self.0[..index])
            .chain(std::iter::once(self.0.as_str()))
    }

    /// Returns `true` when `self` is a strict ancestor of `other`, comparing
    /// whole segments (`active` is not an ancestor of `active2`).
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0[self.0.len()..].starts_with(SEPARATOR)
    }

    /// Returns `true` when `self` equals `other` or is one of its ancestors.
    #[must_use]
    pub fn is_self_or_ancestor_of(&self, other: &Self) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    /// `owner` or any path below it.
    #[must_use]
    pub fn is_owner_rooted(&self) -> bool {
        self.segments().next() == Some(OWNER)
    }

    /// `active` or any path below it.
    #[must_use]
    pub fn is_active_rooted(&self) -> bool {
        self.segments().next() == Some(ACTIVE)
    }

    /// Appends one segment.
    ///
    /// # Errors
    ///
    /// Returns a [`PathError`] if the result is not a valid path.
    pub fn child(&self, segment: &str) -> Result<Self, PathError> {
        Self::parse(&format!("{}{SEPARATOR}{segment}", self.0))
    }

    /// The path one level up, or `None` for a root path.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rfind(SEPARATOR)
            .map(|index| Self(self.0[..index].to_string()))
    }

    /// Segments of `self` below `ancestor`, or `None` if `ancestor` is not a
    /// strict ancestor.
    #[must_use]
    pub fn segments_below<'a>(&'a self, ancestor: &Self) -> Option<Vec<&'a str>> {
        if !ancestor.is_ancestor_of(self) {
            return None;
        }
        Some(self.0[ancestor.0.len() + 1..].split(SEPARATOR).collect())
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KeyPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for KeyPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for KeyPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for KeyPath {
    type Error = PathError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<KeyPath> for String {
    fn from(path: KeyPath) -> Self {
        path.0
    }
}

/// Static validation of a path. Protects against common mistakes.
///
/// # Errors
///
/// Returns a [`PathError`] describing the first violated rule.
pub fn validate(path: &str) -> Result<(), PathError> {
    let owned = || path.to_string();

    if path.is_empty() {
        return Err(PathError::Empty);
    }
    if path.chars().any(char::is_whitespace) {
        return Err(PathError::Whitespace(owned()));
    }
    if path.contains('\\') {
        return Err(PathError::Backslash(owned()));
    }
    if path.starts_with(SEPARATOR) {
        return Err(PathError::LeadingSlash(owned()));
    }
    if path.ends_with(SEPARATOR) {
        return Err(PathError::TrailingSlash(owned()));
    }
    if path.chars().any(char::is_uppercase) {
        return Err(PathError::Uppercase(owned()));
    }
    if path.contains(MATCHER_CHARS) {
        return Err(PathError::Matcher(owned()));
    }

    let segments: Vec<&str> = path.split(SEPARATOR).collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(PathError::EmptySegment(owned()));
    }
    for (index, segment) in segments.iter().enumerate() {
        if segments[..index].contains(segment) {
            return Err(PathError::DuplicateSegment {
                path: owned(),
                segment: (*segment).to_string(),
            });
        }
    }
    if segments.iter().skip(1).any(|segment| *segment == OWNER) {
        return Err(PathError::OwnerNotRoot(owned()));
    }
    if segments.iter().skip(2).any(|segment| *segment == ACTIVE) {
        return Err(PathError::ActiveNotRoot(owned()));
    }
    Ok(())
}

/// Returns `true` if `value` is a valid path rather than a matcher.
#[must_use]
pub fn is_path(value: &str) -> bool {
    validate(value).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        for path in ["owner", "active", "active/mypermission", "owner/cold", "myaccount/mypermission"] {
            assert!(validate(path).is_ok(), "{path}");
        }
    }

    #[test]
    fn test_invalid_paths() {
        assert_eq!(validate(""), Err(PathError::Empty));
        assert!(matches!(validate("active/my key"), Err(PathError::Whitespace(_))));
        assert!(matches!(validate("active\\x"), Err(PathError::Backslash(_))));
        assert!(matches!(validate("/active"), Err(PathError::LeadingSlash(_))));
        assert!(matches!(validate("active/"), Err(PathError::TrailingSlash(_))));
        assert!(matches!(validate("active//x"), Err(PathError::EmptySegment(_))));
        assert!(matches!(validate("Active"), Err(PathError::Uppercase(_))));
        assert!(matches!(validate("active/**"), Err(PathError::Matcher(_))));
        assert!(matches!(
            validate("active/x/x"),
            Err(PathError::DuplicateSegment { .. })
        ));
        assert!(matches!(validate("myaccount/owner"), Err(PathError::OwnerNotRoot(_))));
        assert!(matches!(validate("owner/x/active"), Err(PathError::ActiveNotRoot(_))));
    }

    #[test]
    fn test_owner_active_canonicalizes() {
        assert_eq!(KeyPath::parse("owner/active").unwrap(), KeyPath::active());
        assert_eq!(
            KeyPath::parse("owner/active/mypermission").unwrap().as_str(),
            "active/mypermission"
        );
        assert_eq!(KeyPath::parse("owner/cold").unwrap().as_str(), "owner/cold");
    }

    #[test]
    fn test_ancestry_compares_segments() {
        let active = KeyPath::active();
        let child = KeyPath::parse("active/mypermission").unwrap();
        let sibling = KeyPath::parse("active2").unwrap();

        assert!(active.is_ancestor_of(&child));
        assert!(!active.is_ancestor_of(&active));
        assert!(active.is_self_or_ancestor_of(&active));
        assert!(!active.is_ancestor_of(&sibling));
        assert!(!child.is_ancestor_of(&active));
        assert_eq!(child.segments_below(&active), Some(vec!["mypermission"]));
        assert_eq!(sibling.segments_below(&active), None);
    }

    #[test]
    fn test_prefixes_and_parent() {
        let path = KeyPath::parse("active/a/b").unwrap();
        let prefixes: Vec<&str> = path.prefixes().collect();
        assert_eq!(prefixes, vec!["active", "active/a", "active/a/b"]);
        assert_eq!(path.parent().unwrap().as_str(), "active/a");
        assert_eq!(KeyPath::owner().parent(), None);
        assert_eq!(path.depth(), 3);
    }

    #[test]
    fn test_roots() {
        assert!(KeyPath::parse("owner/cold").unwrap().is_owner_rooted());
        assert!(!KeyPath::parse("ownership").unwrap().is_owner_rooted());
        assert!(KeyPath::parse("owner/active/x").unwrap().is_active_rooted());
    }

    #[test]
    fn test_serde_round_trip_canonicalizes() {
        let path: KeyPath = serde_json::from_str("\"owner/active\"").unwrap();
        assert_eq!(path, KeyPath::active());
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"active\"");
        assert!(serde_json::from_str::<KeyPath>("\"Owner\"").is_err());
    }
}
