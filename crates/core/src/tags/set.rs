// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonically ordered tag sets

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{TagError, TagValue};

/// Key the store adds to every stored tag set to carry the entry's identifier
pub const RESERVED_ID_KEY: &str = "_associated_id";

/// An unordered collection of key/value tags identifying a resource
///
/// Backed by a `BTreeMap`, so equality, hashing and iteration all follow
/// sorted key order regardless of insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, TagValue>);

impl TagSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&TagValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TagValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of keys excluding the reserved identifier key
    pub fn user_len(&self) -> usize {
        self.0.len() - usize::from(self.0.contains_key(RESERVED_ID_KEY))
    }

    /// Identifier stored under the reserved key, if present
    pub fn associated_id(&self) -> Option<&str> {
        match self.0.get(RESERVED_ID_KEY) {
            Some(TagValue::String(id)) => Some(id),
            _ => None,
        }
    }

    /// Copy of this set with the reserved identifier key set to `id`
    pub fn with_associated_id(&self, id: &str) -> TagSet {
        let mut tags = self.clone();
        tags.0
            .insert(RESERVED_ID_KEY.to_string(), TagValue::String(id.to_string()));
        tags
    }

    /// Copy of this set without the reserved identifier key
    pub fn without_reserved(&self) -> TagSet {
        let mut tags = self.clone();
        tags.0.remove(RESERVED_ID_KEY);
        tags
    }

    /// Check a caller-supplied set before it reaches the store
    pub fn validate(&self) -> Result<(), TagError> {
        if self.0.is_empty() {
            return Err(TagError::Empty);
        }
        for key in self.0.keys() {
            if key.is_empty() {
                return Err(TagError::EmptyKey);
            }
            if key == RESERVED_ID_KEY {
                return Err(TagError::ReservedKey(key.clone()));
            }
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<TagValue>> FromIterator<(K, V)> for TagSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl std::fmt::Display for TagSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            match value {
                TagValue::String(s) => write!(f, "{}={}", key, s)?,
                other => write!(f, "{}:{}={}", key, other.kind(), other)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "set_tests.rs"]
mod tests;
