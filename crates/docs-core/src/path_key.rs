//! PathKey: tree-position identifiers for indexed documents.
//!
//! A node's key is its parent's key plus one segment, joined by [`SEP`].
//! Folder segments are the folder name; file segments are the content id
//! the remote store assigned at upload time.

use std::borrow::Borrow;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Reserved segment separator.
pub const SEP: char = '\\';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("Name is empty")]
    Empty,

    #[error("Name '{name}' is invalid: {reason}")]
    Invalid { name: String, reason: &'static str },
}

/// Identifier of a node in the document index.
///
/// # Examples
/// ```
/// use docs_core::PathKey;
///
/// let root = PathKey::new("R");
/// let docs = root.child("Docs");
/// assert_eq!(docs.as_str(), "R\\Docs");
/// assert!(docs.child("abc").is_descendant_of(&root));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey(String);

impl PathKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of a direct child with the given segment.
    pub fn child(&self, segment: &str) -> PathKey {
        let mut raw = String::with_capacity(self.0.len() + 1 + segment.len());
        raw.push_str(&self.0);
        raw.push(SEP);
        raw.push_str(segment);
        PathKey(raw)
    }

    /// Segment-bounded prefix test: true iff `self` starts with `ancestor + SEP`.
    ///
    /// `R\Doc` is not a descendant of `R\Do`, and neither is `X\R\Docs` of `R`.
    pub fn is_descendant_of(&self, ancestor: &PathKey) -> bool {
        self.0.len() > ancestor.0.len()
            && self.0.starts_with(ancestor.as_str())
            && self.0[ancestor.0.len()..].starts_with(SEP)
    }

    pub fn is_self_or_descendant_of(&self, ancestor: &PathKey) -> bool {
        self == ancestor || self.is_descendant_of(ancestor)
    }

    /// Swap the `old` prefix for `new`, if `self` is `old` or lies beneath it.
    pub fn rebase(&self, old: &PathKey, new: &PathKey) -> Option<PathKey> {
        if !self.is_self_or_descendant_of(old) {
            return None;
        }
        let mut raw = String::with_capacity(new.0.len() + self.0.len() - old.0.len());
        raw.push_str(new.as_str());
        raw.push_str(&self.0[old.0.len()..]);
        Some(PathKey(raw))
    }

    /// Final segment (the whole key for a root without separators).
    pub fn last_segment(&self) -> &str {
        match self.0.rfind(SEP) {
            Some(pos) => &self.0[pos + SEP.len_utf8()..],
            None => &self.0,
        }
    }

    /// Key with the last segment stripped; `None` for a single-segment key.
    pub fn parent(&self) -> Option<PathKey> {
        self.0.rfind(SEP).map(|pos| PathKey(self.0[..pos].to_string()))
    }

    /// Number of segments between `ancestor` and `self`, if `self` is beneath it.
    pub fn depth_below(&self, ancestor: &PathKey) -> Option<usize> {
        if !self.is_descendant_of(ancestor) {
            return None;
        }
        Some(self.0[ancestor.0.len()..].matches(SEP).count())
    }
}

impl Display for PathKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PathKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for PathKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl Borrow<str> for PathKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PathKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Plain string on the wire
impl serde::Serialize for PathKey {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for PathKey {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        String::deserialize(d).map(PathKey)
    }
}

/// Validate a folder name, which becomes a key segment.
pub fn validate_folder_name(name: &str) -> Result<(), NameError> {
    validate_display_name(name)?;
    if name.contains(SEP) {
        return Err(NameError::Invalid {
            name: name.to_string(),
            reason: "contains the path separator",
        });
    }
    if name == "." || name == ".." {
        return Err(NameError::Invalid {
            name: name.to_string(),
            reason: "reserved name",
        });
    }
    Ok(())
}

/// Validate a file display name. File names never enter a key, so the
/// separator is allowed here.
pub fn validate_display_name(name: &str) -> Result<(), NameError> {
    if name.trim().is_empty() {
        return Err(NameError::Empty);
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(NameError::Invalid {
            name: name.to_string(),
            reason: "contains a control character",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_joins_with_separator() {
        let key = PathKey::new("R").child("Docs").child("abc");
        assert_eq!(key.as_str(), "R\\Docs\\abc");
        assert_eq!(key.last_segment(), "abc");
    }

    #[test]
    fn test_descendant_is_segment_bounded() {
        let docs = PathKey::new("R\\Docs");
        assert!(PathKey::new("R\\Docs\\abc").is_descendant_of(&docs));
        assert!(!PathKey::new("R\\Docs").is_descendant_of(&docs));
        assert!(!PathKey::new("R\\Docs2\\abc").is_descendant_of(&docs));
        assert!(!PathKey::new("R\\Documents").is_descendant_of(&docs));
        // Textually contains "R\Docs" but sits elsewhere in the tree
        assert!(!PathKey::new("R\\Other\\R\\Docs\\x").is_descendant_of(&docs));
    }

    #[test]
    fn test_rebase_rewrites_prefix_only() {
        let old = PathKey::new("R\\Docs");
        let new = PathKey::new("R\\Archive");
        assert_eq!(
            PathKey::new("R\\Docs\\Sub\\abc").rebase(&old, &new),
            Some(PathKey::new("R\\Archive\\Sub\\abc"))
        );
        assert_eq!(old.rebase(&old, &new), Some(new.clone()));
        assert_eq!(PathKey::new("R\\Docsx").rebase(&old, &new), None);
    }

    #[test]
    fn test_depth_below() {
        let root = PathKey::new("R");
        assert_eq!(PathKey::new("R\\a").depth_below(&root), Some(1));
        assert_eq!(PathKey::new("R\\a\\b\\c").depth_below(&root), Some(3));
        assert_eq!(root.depth_below(&root), None);
    }

    #[test]
    fn test_parent_strips_last_segment() {
        assert_eq!(PathKey::new("R\\Docs\\abc").parent(), Some(PathKey::new("R\\Docs")));
        assert_eq!(PathKey::new("R").parent(), None);
    }

    #[test]
    fn test_folder_name_validation() {
        assert!(validate_folder_name("Manuals").is_ok());
        assert_eq!(validate_folder_name("   "), Err(NameError::Empty));
        assert!(matches!(
            validate_folder_name("a\\b"),
            Err(NameError::Invalid { .. })
        ));
        assert!(validate_folder_name("..").is_err());
        assert!(validate_folder_name("tab\there").is_err());
        // File display names may carry the separator
        assert!(validate_display_name("a\\b.pdf").is_ok());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let key = PathKey::new("R\\Docs");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"R\\\\Docs\"");
        let back: PathKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
