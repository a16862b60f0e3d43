//! Hierarchical storage keys.
//!
//! A [`Key`] is an ordered sequence of non-empty path segments.  Its
//! canonical form joins the segments with `/`; ordering, equality and
//! hashing all follow that canonical string.

use std::fmt;

/// Segment delimiter in the canonical key string.
pub const DELIMITER: char = '/';

/// Immutable hierarchical key identifying a storage entry.
///
/// Empty segments are dropped on construction, so `"a//b/"` and `"a/b"`
/// are the same key.  The root key has no segments and an empty canonical
/// string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Key {
    path: String,
}

impl Key {
    /// Parse a `/`-delimited path into a key.
    pub fn new(path: &str) -> Self {
        Self::from_segments(path.split(DELIMITER))
    }

    /// The root key: zero segments, ancestor of every other key.
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a key from individual segments.  A segment that itself
    /// contains `/` contributes several segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut path = String::new();
        for segment in segments {
            for part in segment.as_ref().split(DELIMITER).filter(|p| !p.is_empty()) {
                if !path.is_empty() {
                    path.push(DELIMITER);
                }
                path.push_str(part);
            }
        }
        Self { path }
    }

    /// Canonical string form.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// Iterate over the key's segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split(DELIMITER).filter(|s| !s.is_empty())
    }

    /// Append one (or, if it contains `/`, several) segments.
    pub fn child(&self, segment: &str) -> Self {
        Self::from_segments([self.path.as_str(), segment])
    }

    /// Append every segment of `other` to this key.
    pub fn join(&self, other: &Key) -> Self {
        self.child(other.as_str())
    }

    /// Key with the last segment removed, or `None` for the root.
    pub fn parent(&self) -> Option<Key> {
        if self.is_root() {
            return None;
        }
        match self.path.rfind(DELIMITER) {
            Some(idx) => Some(Self {
                path: self.path[..idx].to_string(),
            }),
            None => Some(Self::root()),
        }
    }

    /// Last segment, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        Some(match self.path.rfind(DELIMITER) {
            Some(idx) => &self.path[idx + 1..],
            None => &self.path,
        })
    }

    /// Whether `self` is a strict ancestor of `other`.
    ///
    /// Matching is segment-aligned: `a/b` is an ancestor of `a/b/c` but not
    /// of `a/bc`.
    pub fn is_ancestor_of(&self, other: &Key) -> bool {
        if self.is_root() {
            return !other.is_root();
        }
        other.path.len() > self.path.len()
            && other.path.starts_with(&self.path)
            && other.path[self.path.len()..].starts_with(DELIMITER)
    }

    /// Whether `other` equals `self` or descends from it.
    pub fn contains(&self, other: &Key) -> bool {
        self == other || self.is_ancestor_of(other)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl From<&str> for Key {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for Key {
    fn from(path: String) -> Self {
        Self::new(&path)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.path
    }
}
