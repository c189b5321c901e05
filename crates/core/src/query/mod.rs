// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Selection language for matching tag sets

mod selection;

pub use selection::{CompareOp, KeyCheck, KeyLimit, Selection};

use thiserror::Error;

/// Rejections for malformed or unsatisfiable selections
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("selection keys must not be empty")]
    EmptyKey,
    #[error("selection key '{0}' has no checks")]
    NoChecks(String),
    #[error("selection key '{0}' is required and forbidden at once")]
    Contradiction(String),
    #[error("key limit {limit} is smaller than the {required} keys the selection requires")]
    LimitTooSmall { limit: usize, required: usize },
}
