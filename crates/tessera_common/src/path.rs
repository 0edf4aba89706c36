//! Colon-separated paths identifying builds, projects and tasks.
//!
//! A path is either absolute (`:app:compile`) or relative (`compile`). The
//! root path is a single `:`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between path segments.
const SEPARATOR: char = ':';

/// Errors produced when parsing a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// The path contains an empty segment, e.g. `:a::b`.
    #[error("path '{0}' contains an empty segment")]
    EmptySegment(String),
}

/// A build, project or task path such as `:lib:compileJava`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    absolute: bool,
    segments: Vec<String>,
}

impl Path {
    /// Returns the root path `:`.
    pub fn root() -> Self {
        Self {
            absolute: true,
            segments: Vec::new(),
        }
    }

    /// Parses a path from its string form.
    pub fn parse(text: &str) -> Result<Self, PathError> {
        if text == ":" {
            return Ok(Self::root());
        }
        let absolute = text.starts_with(SEPARATOR);
        let body = if absolute { &text[1..] } else { text };
        if body.is_empty() {
            return Ok(Self {
                absolute,
                segments: Vec::new(),
            });
        }
        let mut segments = Vec::new();
        for segment in body.split(SEPARATOR) {
            if segment.is_empty() {
                return Err(PathError::EmptySegment(text.to_string()));
            }
            segments.push(segment.to_string());
        }
        Ok(Self { absolute, segments })
    }

    /// Returns `true` for the root path.
    pub fn is_root(&self) -> bool {
        self.absolute && self.segments.is_empty()
    }

    /// Returns `true` if this path starts with `:`.
    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// Returns the last segment, or `None` for the root path.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Returns the parent path, or `None` for the root or a single relative segment.
    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() || (!self.absolute && self.segments.len() == 1) {
            return None;
        }
        Some(Self {
            absolute: self.absolute,
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Returns a new path with `name` appended as the last segment.
    pub fn child(&self, name: &str) -> Path {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self {
            absolute: self.absolute,
            segments,
        }
    }

    /// Appends all segments of `other` to this path.
    pub fn append(&self, other: &Path) -> Path {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self {
            absolute: self.absolute,
            segments,
        }
    }

    /// Returns the number of segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str(":");
        }
        if self.absolute {
            f.write_str(":")?;
        }
        f.write_str(&self.segments.join(":"))
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({self})")
    }
}

impl TryFrom<String> for Path {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Path::parse(&value)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.to_string()
    }
}
