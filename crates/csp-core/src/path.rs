//! Configuration path parsing and matching.
//!
//! Configuration paths are dot-separated strings like `USART1.baud_rate`.
//! This module provides the parsed [`ConfigPath`], a per-store cache of split
//! segments, and [`PathPattern`] for host-side change filtering.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A parsed configuration path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigPath {
    segments: Vec<String>,
}

impl ConfigPath {
    /// Split a dot-separated path.
    pub fn new(path: &str) -> Self {
        Self {
            segments: split(path),
        }
    }

    /// Build a path from already split segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Segments in order, root first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Check if this path starts with a given prefix, segment by segment.
    ///
    /// `USART1.mode` starts with `USART1` but not with `USART`.
    pub fn starts_with(&self, prefix: &ConfigPath) -> bool {
        starts_with(&self.segments, &prefix.segments)
    }

    /// True when one path is a segment-wise prefix of the other.
    ///
    /// A change at either end of such a pair can alter what the other reads.
    pub fn is_related(&self, other: &ConfigPath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// Return a new path with `root` prepended.
    pub fn prefixed(&self, root: &str) -> ConfigPath {
        let mut segments = split(root);
        segments.extend(self.segments.iter().cloned());
        ConfigPath { segments }
    }

    /// Return a new path with one more segment.
    pub fn child(&self, segment: &str) -> ConfigPath {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        ConfigPath { segments }
    }
}

impl std::fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl From<&str> for ConfigPath {
    fn from(s: &str) -> Self {
        ConfigPath::new(s)
    }
}

impl From<String> for ConfigPath {
    fn from(s: String) -> Self {
        ConfigPath::new(&s)
    }
}

/// Segment-wise prefix test on raw segment slices.
pub fn starts_with<S: AsRef<str>, P: AsRef<str>>(path: &[S], prefix: &[P]) -> bool {
    prefix.len() <= path.len()
        && path
            .iter()
            .zip(prefix.iter())
            .all(|(a, b)| a.as_ref() == b.as_ref())
}

fn split(path: &str) -> Vec<String> {
    if path.is_empty() {
        Vec::new()
    } else {
        path.split('.').map(String::from).collect()
    }
}

/// Cache of split path segments, keyed by the exact path string.
///
/// Stores are asked for the same handful of parameter paths over and over,
/// so each distinct string is split once.
#[derive(Debug, Default)]
pub struct PathCache {
    entries: RefCell<HashMap<String, Rc<[String]>>>,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or split and remember) the segments of `path`.
    pub fn segments(&self, path: &str) -> Rc<[String]> {
        if let Some(segments) = self.entries.borrow().get(path) {
            return Rc::clone(segments);
        }
        let segments: Rc<[String]> = split(path).into();
        self.entries
            .borrow_mut()
            .insert(path.to_string(), Rc::clone(&segments));
        segments
    }

    /// Number of distinct path strings seen so far.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PatternSegment {
    Literal(String),
    /// `*` matches one segment mid-path, or any suffix at the end.
    Wildcard,
}

/// A change-filter pattern that may contain wildcards.
///
/// Supported patterns:
/// - Exact: `configs.USART1.baud_rate`
/// - Suffix wildcard: `configs.USART1.*`
/// - Mid-path wildcard: `configs.pins.*.function`
/// - Full wildcard: `*`
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<PatternSegment>,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::EmptyPattern);
        }

        let segments = pattern
            .split('.')
            .map(|s| match s {
                "*" => Ok(PatternSegment::Wildcard),
                "" => Err(PatternError::EmptySegment(pattern.to_string())),
                _ => Ok(PatternSegment::Literal(s.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// True when `path` matches every segment of this pattern.
    pub fn matches(&self, path: &ConfigPath) -> bool {
        let parts = path.segments();
        let trailing = self.segments.last() == Some(&PatternSegment::Wildcard);

        if trailing {
            if parts.len() < self.segments.len() - 1 {
                return false;
            }
        } else if parts.len() != self.segments.len() {
            return false;
        }

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PatternSegment::Wildcard if trailing && i == self.segments.len() - 1 => {
                    return true;
                }
                PatternSegment::Wildcard => {
                    if i >= parts.len() {
                        return false;
                    }
                }
                PatternSegment::Literal(lit) => {
                    if parts.get(i) != Some(lit) {
                        return false;
                    }
                }
            }
        }

        true
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Errors that can occur when creating a path pattern.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PatternError {
    #[error("Empty pattern")]
    EmptyPattern,
    #[error("Empty segment in pattern '{0}'")]
    EmptySegment(String),
}
