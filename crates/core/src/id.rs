// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Associated identifiers and their generators

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier minted by the store when an entry is created
///
/// Stable for the entry's lifetime; a re-created entry for the same tags gets a
/// new one. Lock session ids come from the same generator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssociatedId(pub String);

impl AssociatedId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AssociatedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssociatedId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AssociatedId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Mints identifiers for new store entries
pub trait IdGen: Clone + Send + Sync + 'static {
    fn next(&self) -> AssociatedId;
}

/// UUID-based generator for production use
#[derive(Clone, Debug, Default)]
pub struct UuidIdGen;

impl IdGen for UuidIdGen {
    fn next(&self) -> AssociatedId {
        AssociatedId(uuid::Uuid::new_v4().to_string())
    }
}

/// Sequential generator for tests (`prefix-1`, `prefix-2`, ...)
#[derive(Clone, Debug)]
pub struct SequentialIdGen {
    prefix: String,
    counter: Arc<AtomicU64>,
}

impl SequentialIdGen {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Default for SequentialIdGen {
    fn default() -> Self {
        Self::new("id")
    }
}

impl IdGen for SequentialIdGen {
    fn next(&self) -> AssociatedId {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        AssociatedId(format!("{}-{}", self.prefix, n))
    }
}
