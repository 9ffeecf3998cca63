//! Structural addresses of nodes inside a scene.
//!
//! A path is the list of sibling ordinals leading from a scene's template to
//! one of its elements, written dot-joined (`"0"`, `"0.1"`, `"1.2.0"`). The
//! empty path addresses the scene's own element.
//!
//! Ordering is numeric per segment, shorter prefix first, which is exactly a
//! depth-first pre-order walk: `0 < 0.1 < 0.2 < 1 < 1.0 < 2 < 10`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RuntimeError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ScenePath(Vec<u32>);

impl ScenePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_segments(segments: Vec<u32>) -> Self {
        Self(segments)
    }

    pub fn parse(raw: &str) -> Result<Self, RuntimeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        trimmed
            .split('.')
            .map(|segment| segment.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
            .map_err(|_| RuntimeError::InvalidPath {
                raw: raw.to_string(),
            })
    }

    pub fn segments(&self) -> &[u32] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn last(&self) -> Option<u32> {
        self.0.last().copied()
    }

    pub fn child(&self, ordinal: u32) -> Self {
        let mut segments = self.0.clone();
        segments.push(ordinal);
        Self(segments)
    }

    /// Appends `other` below this path.
    pub fn join(&self, other: &ScenePath) -> Self {
        let mut segments = self.0.clone();
        segments.extend_from_slice(&other.0);
        Self(segments)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn starts_with(&self, prefix: &ScenePath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for ScenePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for ScenePath {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<ScenePath> for String {
    fn from(path: ScenePath) -> Self {
        path.to_string()
    }
}

impl TryFrom<String> for ScenePath {
    type Error = RuntimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}
