// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Selections: boolean matchers over tag sets
//!
//! A [`Selection`] is shaped like a tag set: each declared key carries one or
//! more [`KeyCheck`]s. Nested `and`/`or` branches compose further selections,
//! and an optional [`KeyLimit`] bounds the candidate's key count.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::SelectionError;
use crate::tags::{TagKind, TagSet, TagValue};

/// Comparison operator for a [`KeyCheck::Compare`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

/// A single constraint on one key
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyCheck {
    /// Key presence, optionally restricted to one value kind
    Exists {
        exists: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<TagKind>,
    },
    /// Value comparison
    ///
    /// Ordered operators only hold between values of the same kind.
    /// `match_type` also makes `ne` fail across kinds.
    Compare {
        op: CompareOp,
        value: TagValue,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        match_type: bool,
    },
}

/// Bound on how many (non-reserved) keys a candidate may carry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyLimit {
    AtMost(usize),
    Exactly(usize),
}

impl KeyLimit {
    fn admits(&self, count: usize) -> bool {
        match self {
            KeyLimit::AtMost(n) => count <= *n,
            KeyLimit::Exactly(n) => count == *n,
        }
    }

    fn bound(&self) -> usize {
        match self {
            KeyLimit::AtMost(n) | KeyLimit::Exactly(n) => *n,
        }
    }
}

/// A query over tag sets
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, Vec<KeyCheck>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub and: Vec<Selection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub or: Vec<Selection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<KeyLimit>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// The empty selection, which matches every tag set
    pub fn all() -> Self {
        Self::default()
    }

    pub fn check(mut self, key: impl Into<String>, check: KeyCheck) -> Self {
        self.keys.entry(key.into()).or_default().push(check);
        self
    }

    /// Require `key` to be present with any value
    pub fn exists(self, key: impl Into<String>) -> Self {
        self.check(
            key,
            KeyCheck::Exists {
                exists: true,
                kind: None,
            },
        )
    }

    /// Require `key` to be present with a value of `kind`
    pub fn exists_as(self, key: impl Into<String>, kind: TagKind) -> Self {
        self.check(
            key,
            KeyCheck::Exists {
                exists: true,
                kind: Some(kind),
            },
        )
    }

    /// Require `key` to be absent
    pub fn missing(self, key: impl Into<String>) -> Self {
        self.check(
            key,
            KeyCheck::Exists {
                exists: false,
                kind: None,
            },
        )
    }

    pub fn compare(self, key: impl Into<String>, op: CompareOp, value: impl Into<TagValue>) -> Self {
        self.check(
            key,
            KeyCheck::Compare {
                op,
                value: value.into(),
                match_type: false,
            },
        )
    }

    pub fn compare_typed(
        self,
        key: impl Into<String>,
        op: CompareOp,
        value: impl Into<TagValue>,
    ) -> Self {
        self.check(
            key,
            KeyCheck::Compare {
                op,
                value: value.into(),
                match_type: true,
            },
        )
    }

    pub fn and(mut self, branch: Selection) -> Self {
        self.and.push(branch);
        self
    }

    pub fn or(mut self, branch: Selection) -> Self {
        self.or.push(branch);
        self
    }

    pub fn at_most(mut self, keys: usize) -> Self {
        self.limit = Some(KeyLimit::AtMost(keys));
        self
    }

    pub fn exactly(mut self, keys: usize) -> Self {
        self.limit = Some(KeyLimit::Exactly(keys));
        self
    }

    /// Check that the selection is satisfiable and well formed
    pub fn validate(&self) -> Result<(), SelectionError> {
        let mut required = 0;
        for (key, checks) in &self.keys {
            if key.is_empty() {
                return Err(SelectionError::EmptyKey);
            }
            if checks.is_empty() {
                return Err(SelectionError::NoChecks(key.clone()));
            }
            let forbids = checks.iter().any(|c| {
                matches!(
                    c,
                    KeyCheck::Exists {
                        exists: false,
                        kind: None
                    }
                )
            });
            let demands = checks.iter().any(|c| {
                matches!(
                    c,
                    KeyCheck::Exists { exists: true, .. } | KeyCheck::Compare { .. }
                )
            });
            if forbids && demands {
                return Err(SelectionError::Contradiction(key.clone()));
            }
            if demands {
                required += 1;
            }
        }

        if let Some(limit) = self.limit {
            if limit.bound() < required {
                return Err(SelectionError::LimitTooSmall {
                    limit: limit.bound(),
                    required,
                });
            }
        }

        for branch in self.and.iter().chain(self.or.iter()) {
            branch.validate()?;
        }
        Ok(())
    }

    /// Evaluate this selection against a tag set
    ///
    /// Matches when every declared key check passes, every `and` branch
    /// matches, and, if any `or` branches exist, at least one of them matches.
    /// Keys on the candidate that the selection does not mention are ignored.
    pub fn matches(&self, tags: &TagSet) -> bool {
        if let Some(limit) = &self.limit {
            if !limit.admits(tags.user_len()) {
                return false;
            }
        }

        for (key, checks) in &self.keys {
            let value = tags.get(key);
            if !checks.iter().all(|check| check.passes(value)) {
                return false;
            }
        }

        if !self.and.iter().all(|branch| branch.matches(tags)) {
            return false;
        }

        self.or.is_empty() || self.or.iter().any(|branch| branch.matches(tags))
    }
}

impl KeyCheck {
    /// Apply this check to the candidate's value for the key (None = absent)
    pub fn passes(&self, candidate: Option<&TagValue>) -> bool {
        match self {
            KeyCheck::Exists { exists: true, kind } => match (candidate, kind) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(value), Some(kind)) => value.kind() == *kind,
            },
            KeyCheck::Exists { exists: false, kind } => match (candidate, kind) {
                (None, _) => true,
                (Some(_), None) => false,
                // Only a value of the restricted kind counts as "present"
                (Some(value), Some(kind)) => value.kind() != *kind,
            },
            KeyCheck::Compare {
                op,
                value: operand,
                match_type,
            } => {
                let Some(candidate) = candidate else {
                    return false;
                };
                if candidate.kind() != operand.kind() {
                    // Different kinds are unequal and unordered
                    return !*match_type && matches!(op, CompareOp::Ne);
                }
                let below = candidate.less(operand);
                let above = operand.less(candidate);
                match op {
                    CompareOp::Eq => !below && !above,
                    CompareOp::Ne => below || above,
                    CompareOp::Lt => below,
                    CompareOp::Le => !above,
                    CompareOp::Gt => above,
                    CompareOp::Ge => !below,
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "selection_tests.rs"]
mod tests;
