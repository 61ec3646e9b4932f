//! Typed storage paths
//!
//! A blob directory is a list of segments relative to the store root. The trailing
//! segment of every stored blob is a version segment (`v0` for the original), which is
//! what version derivation replaces.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Dir(String),
    Version(u32),
}

impl Segment {
    fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() || raw == "." || raw == ".." || raw.contains('\\') {
            return Err(Error::invalid(format!("illegal path segment {raw:?}")));
        }
        if let Some(digits) = raw.strip_prefix('v') {
            // only canonical numbers, so that parse and display agree
            let canonical = !digits.is_empty()
                && digits.bytes().all(|b| b.is_ascii_digit())
                && (digits == "0" || !digits.starts_with('0'));
            if canonical {
                if let Ok(n) = digits.parse() {
                    return Ok(Segment::Version(n));
                }
            }
        }
        Ok(Segment::Dir(raw.to_string()))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Dir(name) => f.write_str(name),
            Segment::Version(n) => write!(f, "v{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoragePath {
    segments: Vec<Segment>,
}

impl StoragePath {
    pub fn new(segments: Vec<Segment>) -> Result<Self> {
        if segments.is_empty() {
            return Err(Error::invalid("storage path has no segments"));
        }
        Ok(Self { segments })
    }

    /// Parses `a/b/v3/`; leading and trailing separators are ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        let segments = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(Segment::parse)
            .collect::<Result<Vec<_>>>()?;
        Self::new(segments)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Version of the trailing segment, if it is a version segment.
    pub fn version(&self) -> Option<u32> {
        match self.segments.last() {
            Some(Segment::Version(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn join(&self, segment: Segment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// The sibling directory holding version `next`: the trailing segment is replaced,
    /// never nested under.
    pub fn next_version(&self, next: u32) -> Result<Self> {
        if next == 0 {
            return Err(Error::invalid("next version must be at least 1"));
        }
        let mut segments = self.segments.clone();
        segments.pop();
        segments.push(Segment::Version(next));
        Ok(Self { segments })
    }

    pub fn to_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in &self.segments {
            path.push(segment.to_string());
        }
        path
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "{segment}/")?;
        }
        Ok(())
    }
}

impl FromStr for StoragePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StoragePath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<StoragePath> for String {
    fn from(path: StoragePath) -> Self {
        path.to_string()
    }
}
