//! Dotted-path addressing into state and action trees.
//!
//! Paths are parsed from strings like `users.0.name`: segments separated by
//! dots, all-digit segments addressing array indices, everything else
//! addressing map keys. The empty string is the root path.

use std::fmt;

/// One step into a tree: a map key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "{}", key),
            Self::Index(index) => write!(f, "{}", index),
        }
    }
}

/// A parsed path like `users.0.name`.
///
/// Note that all-digit segments always address array indices, so map keys
/// that consist only of digits cannot be addressed through dotted paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeyPath {
    segments: Vec<Segment>,
}

impl KeyPath {
    /// The empty path, addressing the tree root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dotted path. The empty string yields the root path.
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::root();
        }
        let segments = raw
            .split('.')
            .map(|part| match part.parse::<usize>() {
                Ok(index) if !part.is_empty() => Segment::Index(index),
                _ => Segment::Key(part.to_string()),
            })
            .collect();
        Self { segments }
    }

    /// A single-key path.
    pub fn from_key(key: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::Key(key.into())],
        }
    }

    pub fn from_segments(segments: &[Segment]) -> Self {
        Self {
            segments: segments.to_vec(),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Extend with one more segment.
    pub fn child(&self, segment: Segment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// True when `prefix` is an ancestor of (or equal to) this path.
    pub fn starts_with(&self, prefix: &KeyPath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// True when either path is a prefix of the other. A mutation at `a.b`
    /// touches both the subtree below it and every ancestor container.
    pub fn overlaps(&self, other: &KeyPath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl From<&str> for KeyPath {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<String> for KeyPath {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_segments() {
        let path = KeyPath::parse("users.0.name");
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("users".to_string()),
                Segment::Index(0),
                Segment::Key("name".to_string()),
            ]
        );
        assert_eq!(path.to_string(), "users.0.name");
    }

    #[test]
    fn test_root_path() {
        let root = KeyPath::parse("");
        assert!(root.is_root());
        assert_eq!(root, KeyPath::root());
        assert_eq!(root.to_string(), "");
    }

    #[test]
    fn test_starts_with() {
        let path = KeyPath::parse("a.b.c");
        assert!(path.starts_with(&KeyPath::parse("a.b")));
        assert!(path.starts_with(&KeyPath::parse("a.b.c")));
        assert!(path.starts_with(&KeyPath::root()));
        assert!(!path.starts_with(&KeyPath::parse("a.c")));
        assert!(!KeyPath::parse("a.b").starts_with(&path));
    }

    #[test]
    fn test_overlaps() {
        let mutated = KeyPath::parse("users.0");
        assert!(mutated.overlaps(&KeyPath::parse("users")));
        assert!(mutated.overlaps(&KeyPath::parse("users.0.name")));
        assert!(!mutated.overlaps(&KeyPath::parse("settings")));
        assert!(!mutated.overlaps(&KeyPath::parse("users.1")));
    }

    #[test]
    fn test_child() {
        let path = KeyPath::from_key("users").child(Segment::Index(3));
        assert_eq!(path.to_string(), "users.3");
    }
}
