use serde::{Deserialize, Serialize};
use std::{convert::TryFrom, fmt};

use crate::error::SchemaError;

pub const ROOT: &str = "root";
pub const SEPARATOR: char = '.';
pub const WILDCARD: &str = "*";

/// A validated, dot separated path such as `root.sg1.d1.s1`.
///
/// Every path starts at `root`, and every node is a non-empty run of
/// alphanumeric characters or underscores. Pattern paths may also contain
/// `*` nodes, which match exactly one node. Only [`Path::parse_pattern`]
/// builds those; deserialized paths are always concrete.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    full: String,
}

impl Path {
    pub fn parse(path: &str) -> Result<Self, SchemaError> {
        Self::parse_inner(path, false)
    }

    pub fn parse_pattern(pattern: &str) -> Result<Self, SchemaError> {
        Self::parse_inner(pattern, true)
    }

    fn parse_inner(path: &str, allow_wildcard: bool) -> Result<Self, SchemaError> {
        let malformed = |reason: &str| SchemaError::MalformedPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let mut nodes = path.split(SEPARATOR);
        if nodes.next() != Some(ROOT) {
            return Err(malformed("path must start with `root`"));
        }
        for node in nodes {
            if node.is_empty() {
                return Err(malformed("empty node"));
            }
            if node == WILDCARD {
                if allow_wildcard {
                    continue;
                }
                return Err(malformed("wildcards are only allowed in patterns"));
            }
            if !node.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(malformed("nodes may only contain letters, digits and `_`"));
            }
        }
        Ok(Self {
            full: path.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.full.split(SEPARATOR)
    }

    pub fn depth(&self) -> usize {
        self.nodes().count()
    }

    /// Last node of the path, the measurement name for a timeseries.
    pub fn leaf(&self) -> &str {
        match self.full.rfind(SEPARATOR) {
            Some(i) => &self.full[i + 1..],
            None => &self.full,
        }
    }

    /// Everything above the leaf, the device for a timeseries.
    pub fn parent(&self) -> Option<Path> {
        self.full.rfind(SEPARATOR).map(|i| Path {
            full: self.full[..i].to_string(),
        })
    }

    /// Appends a single measurement node.
    pub fn child(&self, node: &str) -> Result<Path, SchemaError> {
        if node.contains(SEPARATOR) {
            return Err(SchemaError::MalformedPath {
                path: node.to_string(),
                reason: "measurement must be a single node".to_string(),
            });
        }
        Path::parse(&format!("{}{}{}", self.full, SEPARATOR, node))
    }

    /// Whether `self` is `other` or one of its ancestors, node by node.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        let mut theirs = other.nodes();
        self.nodes().all(|node| theirs.next() == Some(node))
    }

    pub fn has_wildcard(&self) -> bool {
        self.nodes().any(|node| node == WILDCARD)
    }

    /// Whether this pattern selects `path`: `*` nodes match any single node
    /// and a pattern also selects everything below the paths it names.
    pub fn matches(&self, path: &Path) -> bool {
        let mut theirs = path.nodes();
        self.nodes().all(|node| match theirs.next() {
            Some(other) => node == WILDCARD || node == other,
            None => false,
        })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl AsRef<str> for Path {
    fn as_ref(&self) -> &str {
        &self.full
    }
}

impl TryFrom<String> for Path {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Path::parse(&value)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.full
    }
}
