// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed tag values with a cross-type total order

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use super::TagError;

/// The kind of a tag value
///
/// Declaration order is the cross-type rank used by [`TagValue::less`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagKind {
    String,
    Int,
    Uint,
    Float,
    Bool,
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::String => "string",
            TagKind::Int => "int",
            TagKind::Uint => "uint",
            TagKind::Float => "float",
            TagKind::Bool => "bool",
        }
    }
}

impl std::fmt::Display for TagKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TagKind {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" | "str" => Ok(TagKind::String),
            "int" | "i64" => Ok(TagKind::Int),
            "uint" | "u64" => Ok(TagKind::Uint),
            "float" | "f64" => Ok(TagKind::Float),
            "bool" => Ok(TagKind::Bool),
            other => Err(TagError::UnknownKind(other.to_string())),
        }
    }
}

/// A typed scalar stored under a tag key
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TagValue {
    String(String),
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
}

impl TagValue {
    pub fn kind(&self) -> TagKind {
        match self {
            TagValue::String(_) => TagKind::String,
            TagValue::Int(_) => TagKind::Int,
            TagValue::Uint(_) => TagKind::Uint,
            TagValue::Float(_) => TagKind::Float,
            TagValue::Bool(_) => TagKind::Bool,
        }
    }

    /// Parse a textual value as the given kind
    pub fn parse(kind: TagKind, raw: &str) -> Result<Self, TagError> {
        let invalid = || TagError::InvalidValue {
            kind,
            raw: raw.to_string(),
        };
        match kind {
            TagKind::String => Ok(TagValue::String(raw.to_string())),
            TagKind::Int => raw.parse().map(TagValue::Int).map_err(|_| invalid()),
            TagKind::Uint => raw.parse().map(TagValue::Uint).map_err(|_| invalid()),
            TagKind::Float => raw.parse().map(TagValue::Float).map_err(|_| invalid()),
            TagKind::Bool => raw.parse().map(TagValue::Bool).map_err(|_| invalid()),
        }
    }

    /// Cross-type total order: kind rank first, then value within a kind
    pub fn less(&self, other: &TagValue) -> bool {
        self.cmp(other) == Ordering::Less
    }

    /// Order restricted to values of the same kind; always false across kinds
    pub fn less_type(&self, other: &TagValue) -> bool {
        self.kind() == other.kind() && self.less(other)
    }

    fn cmp_same_kind(&self, other: &TagValue) -> Option<Ordering> {
        match (self, other) {
            (TagValue::String(a), TagValue::String(b)) => Some(a.cmp(b)),
            (TagValue::Int(a), TagValue::Int(b)) => Some(a.cmp(b)),
            (TagValue::Uint(a), TagValue::Uint(b)) => Some(a.cmp(b)),
            (TagValue::Float(a), TagValue::Float(b)) => Some(a.total_cmp(b)),
            (TagValue::Bool(a), TagValue::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl Ord for TagValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_same_kind(other)
            .unwrap_or_else(|| self.kind().cmp(&other.kind()))
    }
}

impl PartialOrd for TagValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Equality follows the total order so floats compare by bit pattern and NaN is
// equal to itself, keeping TagSet usable as a hash key.
impl PartialEq for TagValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TagValue {}

impl Hash for TagValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        match self {
            TagValue::String(s) => s.hash(state),
            TagValue::Int(i) => i.hash(state),
            TagValue::Uint(u) => u.hash(state),
            TagValue::Float(f) => f.to_bits().hash(state),
            TagValue::Bool(b) => b.hash(state),
        }
    }
}

impl std::fmt::Display for TagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagValue::String(s) => write!(f, "{}", s),
            TagValue::Int(i) => write!(f, "{}", i),
            TagValue::Uint(u) => write!(f, "{}", u),
            TagValue::Float(v) => write!(f, "{}", v),
            TagValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::String(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::String(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Int(value)
    }
}

impl From<u64> for TagValue {
    fn from(value: u64) -> Self {
        TagValue::Uint(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::Float(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

#[cfg(test)]
#[path = "value_tests.rs"]
mod tests;
