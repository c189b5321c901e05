// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock entries: per-tag-set reference counts and baton hand-off
//!
//! One [`LockEntry`] lives in the store for each tag set that has a holder.
//! Its reference count covers the active holder plus every parked waiter,
//! and the entry is removed in the same transaction that drops the count to
//! zero. All methods here run inside the store's exclusive section.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::id::AssociatedId;
use crate::invariant::invariant_violation;
use crate::tags::TagSet;

/// Identifies one grant of a lock
///
/// Minted by the store's generator when a caller obtains the lock, whether by
/// creating the entry or by winning a hand-off. Never shared with the entry's
/// own id, so a holder that lost the lock cannot act on its successor's grant.
pub type SessionId = AssociatedId;

/// Timeout policy for lock holders
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Used when a caller does not ask for a timeout
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    /// Requested timeouts are raised to at least this
    #[serde(with = "humantime_serde")]
    pub min_timeout: Duration,
    /// Requested timeouts are capped at this
    #[serde(with = "humantime_serde")]
    pub max_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            min_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(3600),
        }
    }
}

/// Rejected lock configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid lock config: {0}")]
pub struct InvalidLockConfig(pub String);

impl LockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_min_timeout(mut self, timeout: Duration) -> Self {
        self.min_timeout = timeout;
        self
    }

    pub fn with_max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), InvalidLockConfig> {
        if self.min_timeout.is_zero() {
            return Err(InvalidLockConfig("min_timeout must be positive".into()));
        }
        if self.min_timeout > self.max_timeout {
            return Err(InvalidLockConfig(format!(
                "min_timeout ({}) exceeds max_timeout ({})",
                humantime::format_duration(self.min_timeout),
                humantime::format_duration(self.max_timeout)
            )));
        }
        if self.default_timeout < self.min_timeout || self.default_timeout > self.max_timeout {
            return Err(InvalidLockConfig(format!(
                "default_timeout ({}) is outside [{}, {}]",
                humantime::format_duration(self.default_timeout),
                humantime::format_duration(self.min_timeout),
                humantime::format_duration(self.max_timeout)
            )));
        }
        Ok(())
    }

    /// Resolve a requested timeout against this policy
    pub fn clamp(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.default_timeout)
            .max(self.min_timeout)
            .min(self.max_timeout)
    }
}

/// A granted lock
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockClaim {
    pub session_id: SessionId,
    /// Heartbeats must arrive more often than this or the lock is released
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// One row of a lock listing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSummary {
    pub tags: TagSet,
    /// Holder plus parked waiters
    pub count: u64,
}

/// Aggregate counts across all locks
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStats {
    pub locks: usize,
    /// Locks with an active holder, excluding those mid hand-off
    pub holders: usize,
    pub waiters: u64,
}

/// Result of the departure methods on [`LockEntry`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Departed {
    /// Count reached zero; the store must remove the entry
    Removed,
    /// The baton was passed to the next waiter
    HandedOff,
    /// A waiter left; the holder is unaffected
    Remaining,
    /// Expiry while a hand-off is in flight; try again later
    Deferred,
}

/// Store payload for one locked tag set
#[derive(Debug)]
pub struct LockEntry {
    /// Session of the active holder, `None` from baton pass until the winner collects it
    holder: Option<SessionId>,
    refs: u64,
    /// Single-permit hand-off signal, parked waiters race to acquire it
    baton: Arc<Semaphore>,
    /// Liveness signal to the watcher, capacity one
    heartbeats: mpsc::Sender<()>,
    timeout: Duration,
    watcher: Option<JoinHandle<()>>,
}

impl LockEntry {
    pub(crate) fn new(holder: SessionId, timeout: Duration, heartbeats: mpsc::Sender<()>) -> Self {
        Self {
            holder: Some(holder),
            refs: 1,
            baton: Arc::new(Semaphore::new(0)),
            heartbeats,
            timeout,
            watcher: None,
        }
    }

    pub(crate) fn attach_watcher(&mut self, handle: JoinHandle<()>) {
        self.watcher = Some(handle);
    }

    pub fn holder(&self) -> Option<&SessionId> {
        self.holder.as_ref()
    }

    pub fn is_held_by(&self, session_id: &SessionId) -> bool {
        self.holder.as_ref() == Some(session_id)
    }

    /// Holder plus parked waiters
    pub fn refs(&self) -> u64 {
        self.refs
    }

    pub fn waiters(&self) -> u64 {
        self.refs.saturating_sub(1)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn handoff_pending(&self) -> bool {
        self.holder.is_none()
    }

    /// Register a new waiter; returns the baton to wait on and the lock's timeout
    pub(crate) fn join(&mut self) -> (Arc<Semaphore>, Duration) {
        self.refs += 1;
        (Arc::clone(&self.baton), self.timeout)
    }

    /// Signal the watcher; a full channel already has a reset pending
    pub(crate) fn beat(&self) {
        let _ = self.heartbeats.try_send(());
    }

    /// The holder named by `session_id` gives up the lock
    ///
    /// `None` when that session is not the active holder.
    pub(crate) fn release(&mut self, session_id: &SessionId) -> Option<Departed> {
        if !self.is_held_by(session_id) {
            return None;
        }
        Some(self.evict_holder())
    }

    /// The watcher saw no heartbeat within the timeout
    pub(crate) fn expire(&mut self) -> Departed {
        if self.holder.is_none() {
            return Departed::Deferred;
        }
        self.evict_holder()
    }

    /// A parked waiter leaves without ever becoming active
    pub(crate) fn leave(&mut self) -> Departed {
        if self.drop_ref() == 0 {
            Departed::Removed
        } else {
            Departed::Remaining
        }
    }

    /// The winning waiter took the baton: it becomes the holder and the watcher re-arms
    pub(crate) fn collect_baton(&mut self, session_id: SessionId) {
        if self.holder.is_some() {
            invariant_violation("baton collected while the lock is held", self);
        }
        self.holder = Some(session_id);
        self.beat();
    }

    fn evict_holder(&mut self) -> Departed {
        self.holder = None;
        if self.drop_ref() == 0 {
            return Departed::Removed;
        }
        self.pass_baton();
        Departed::HandedOff
    }

    fn drop_ref(&mut self) -> u64 {
        let Some(refs) = self.refs.checked_sub(1) else {
            invariant_violation("lock reference count underflow", self);
        };
        self.refs = refs;
        refs
    }

    fn pass_baton(&mut self) {
        if self.baton.available_permits() == 0 {
            self.baton.add_permits(1);
        }
    }
}

impl Drop for LockEntry {
    fn drop(&mut self) {
        self.baton.close();
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
