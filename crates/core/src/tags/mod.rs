// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tag values and tag sets
//!
//! A [`TagSet`] is the identity of every lockable or matchable resource: an
//! unordered set of keys, each mapped to a typed [`TagValue`].

mod set;
mod value;

pub use set::{TagSet, RESERVED_ID_KEY};
pub use value::{TagKind, TagValue};

use thiserror::Error;

/// Rejections for malformed tag input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("tag set must contain at least one key")]
    Empty,
    #[error("tag keys must not be empty")]
    EmptyKey,
    #[error("tag key '{0}' is reserved")]
    ReservedKey(String),
    #[error("unknown tag kind '{0}'")]
    UnknownKind(String),
    #[error("'{raw}' is not a valid {kind} value")]
    InvalidValue { kind: TagKind, raw: String },
    #[error("malformed tag '{0}': expected key=value or key:kind=value")]
    Malformed(String),
}

/// Parse one `key=value` or `key:kind=value` tag
pub fn parse_tag(raw: &str) -> Result<(String, TagValue), TagError> {
    let (lhs, value) = raw
        .split_once('=')
        .ok_or_else(|| TagError::Malformed(raw.to_string()))?;
    let (key, kind) = match lhs.split_once(':') {
        Some((key, kind)) => (key, kind.parse()?),
        None => (lhs, TagKind::String),
    };
    if key.is_empty() {
        return Err(TagError::EmptyKey);
    }
    Ok((key.to_string(), TagValue::parse(kind, value)?))
}
