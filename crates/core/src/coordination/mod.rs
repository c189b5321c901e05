// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tag-set mutual exclusion
//!
//! This module provides:
//! - **LockCoordinator** - obtain, heartbeat, release and list locks
//! - **LockEntry** - per-tag-set reference count and baton hand-off
//! - **CancelToken** - cooperative cancellation for parked waiters
//!
//! Each lock entry is watched by a background task that releases the lock
//! when its holder stops heartbeating.

pub mod cancel;
pub mod coordinator;
pub mod lock;
mod watcher;

pub use cancel::CancelToken;
pub use coordinator::LockCoordinator;
pub use lock::{
    InvalidLockConfig, LockClaim, LockConfig, LockEntry, LockStats, LockSummary, SessionId,
};

use thiserror::Error;

use crate::query::SelectionError;
use crate::tags::TagError;

/// Errors returned by lock operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("invalid tags: {0}")]
    InvalidTags(#[from] TagError),

    #[error("invalid selection: {0}")]
    InvalidSelection(#[from] SelectionError),

    #[error("no lock held under session {0}")]
    NotFound(SessionId),
}

impl LockError {
    /// True for errors caused by malformed caller input
    pub fn is_validation(&self) -> bool {
        matches!(self, LockError::InvalidTags(_) | LockError::InvalidSelection(_))
    }
}

/// One session a batched heartbeat could not reach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatFailure {
    pub session_id: SessionId,
    pub error: LockError,
}
