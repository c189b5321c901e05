// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lock coordinator: obtain, heartbeat, release and list tag-set locks
//!
//! Each distinct tag set is one mutex. The first caller for a tag set creates
//! its entry and holds the lock immediately; later callers park on the entry's
//! baton until the holder releases or expires. Waiting never happens inside
//! the store's exclusive section.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::cancel::CancelToken;
use super::lock::{
    Departed, LockClaim, LockConfig, LockEntry, LockStats, LockSummary, SessionId,
};
use super::watcher;
use super::{HeartbeatFailure, LockError};
use crate::id::{AssociatedId, IdGen, UuidIdGen};
use crate::query::Selection;
use crate::store::{AssociatedStore, Lookup};
use crate::tags::TagSet;

fn lock<X>(mutex: &Mutex<X>) -> MutexGuard<'_, X> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Lock entries plus the route from each active holder's session to its entry
///
/// Routes change only inside the owning entry's exclusive section, taking the
/// route lock after the entry's.
pub(crate) struct LockTable<I: IdGen> {
    store: Arc<AssociatedStore<LockEntry, I>>,
    holders: Mutex<HashMap<SessionId, AssociatedId>>,
}

impl<I: IdGen> LockTable<I> {
    fn new(store: Arc<AssociatedStore<LockEntry, I>>) -> Self {
        Self {
            store,
            holders: Mutex::new(HashMap::new()),
        }
    }

    fn entry_of(&self, session_id: &SessionId) -> Option<AssociatedId> {
        lock(&self.holders).get(session_id).cloned()
    }

    fn route(&self, session_id: &SessionId, entry_id: &AssociatedId) {
        lock(&self.holders).insert(session_id.clone(), entry_id.clone());
    }

    fn unroute(&self, session_id: &SessionId) {
        lock(&self.holders).remove(session_id);
    }

    /// Run `f` on the entry `session_id` currently holds
    ///
    /// `None` when that session holds nothing. `f` returns whether to
    /// delete the entry.
    fn with_holder<R>(
        &self,
        session_id: &SessionId,
        f: impl FnOnce(&mut LockEntry) -> (R, bool),
    ) -> Option<R> {
        let entry_id = self.entry_of(session_id)?;
        let mut outcome = None;
        self.store.delete_by_associated_id(&entry_id, |_, entry| {
            if !entry.is_held_by(session_id) {
                return false;
            }
            let (result, remove) = f(entry);
            outcome = Some(result);
            remove
        })?;
        outcome
    }

    /// Expire whoever holds entry `entry_id`
    ///
    /// `None` when the entry is gone.
    pub(crate) fn expire(&self, entry_id: &AssociatedId) -> Option<(Departed, Option<SessionId>)> {
        let mut outcome = None;
        self.store.delete_by_associated_id(entry_id, |_, entry| {
            let evicted = entry.holder().cloned();
            let departed = entry.expire();
            if departed != Departed::Deferred {
                if let Some(evicted) = &evicted {
                    self.unroute(evicted);
                }
            }
            outcome = Some((departed, evicted));
            departed == Departed::Removed
        })?;
        outcome
    }

    fn leave(&self, entry_id: &AssociatedId) {
        self.store
            .delete_by_associated_id(entry_id, |_, entry| entry.leave() == Departed::Removed);
    }

    /// Make `session_id` the holder of entry `entry_id` after winning its baton
    fn collect(&self, entry_id: &AssociatedId, session_id: &SessionId) {
        self.store.find_by_associated_id(entry_id, |_, entry| {
            entry.collect_baton(session_id.clone());
            self.route(session_id, entry_id);
        });
    }
}

/// Gives back a parked waiter's reference unless it went on to win the lock
struct WaiterGuard<'a, I: IdGen> {
    table: &'a LockTable<I>,
    entry_id: &'a AssociatedId,
    armed: bool,
}

impl<I: IdGen> WaiterGuard<'_, I> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<I: IdGen> Drop for WaiterGuard<'_, I> {
    fn drop(&mut self) {
        if self.armed {
            self.table.leave(self.entry_id);
        }
    }
}

/// Tag-set mutex service over an [`AssociatedStore`]
pub struct LockCoordinator<I: IdGen = UuidIdGen> {
    table: Arc<LockTable<I>>,
    config: LockConfig,
    shutdown: CancelToken,
}

impl LockCoordinator<UuidIdGen> {
    pub fn new(config: LockConfig) -> Self {
        Self::with_store(Arc::new(AssociatedStore::new()), config)
    }
}

impl<I: IdGen> LockCoordinator<I> {
    pub fn with_store(store: Arc<AssociatedStore<LockEntry, I>>, config: LockConfig) -> Self {
        Self {
            table: Arc::new(LockTable::new(store)),
            config,
            shutdown: CancelToken::new(),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<AssociatedStore<LockEntry, I>> {
        &self.table.store
    }

    /// Acquire the lock for `tags`, waiting behind the current holder
    ///
    /// Returns `Ok(None)` when `cancel` fires or the coordinator shuts down
    /// before the lock is won; an already-cancelled caller creates nothing.
    /// The returned timeout is the lock's own: a waiter inherits the timeout
    /// chosen by whoever created the entry. Every grant gets its own session
    /// id, so a waiter that wins a hand-off never shares one with the holder
    /// it replaced.
    pub async fn obtain_lock(
        &self,
        tags: TagSet,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<Option<LockClaim>, LockError> {
        tags.validate()?;
        if self.shutdown.is_cancelled() || cancel.is_cancelled() {
            return Ok(None);
        }

        let requested = self.config.clamp(timeout);
        let session_id = self.table.store.id_gen().next();
        let (entry_id, lookup) = self.table.store.create_or_find(
            &tags,
            |entry_id| self.new_entry(entry_id, &session_id, requested),
            |entry| entry.join(),
        );

        let (baton, timeout) = match lookup {
            Lookup::Created => {
                debug!(session_id = %session_id, lock = %entry_id, tags = %tags, "lock obtained");
                return Ok(Some(LockClaim {
                    session_id,
                    timeout: requested,
                }));
            }
            Lookup::Found(joined) => joined,
        };

        debug!(session_id = %session_id, lock = %entry_id, tags = %tags, "waiting for lock");
        let guard = WaiterGuard {
            table: &self.table,
            entry_id: &entry_id,
            armed: true,
        };

        let won = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = cancel.cancelled() => false,
            permit = baton.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    true
                }
                Err(_) => false,
            },
        };
        if !won {
            debug!(session_id = %session_id, "stopped waiting for lock");
            return Ok(None);
        }

        guard.disarm();
        self.table.collect(&entry_id, &session_id);
        debug!(session_id = %session_id, tags = %tags, "lock obtained after wait");
        Ok(Some(LockClaim {
            session_id,
            timeout,
        }))
    }

    /// Reset the watcher for one session
    ///
    /// Fails unless the session is the lock's active holder.
    pub fn heartbeat_one(&self, session_id: &SessionId) -> Result<(), LockError> {
        self.table
            .with_holder(session_id, |entry| {
                entry.beat();
                ((), false)
            })
            .ok_or_else(|| LockError::NotFound(session_id.clone()))
    }

    /// Heartbeat a batch of sessions, reporting the ones that failed
    pub fn heartbeat(&self, session_ids: &[SessionId]) -> Vec<HeartbeatFailure> {
        session_ids
            .iter()
            .filter_map(|id| {
                self.heartbeat_one(id).err().map(|error| HeartbeatFailure {
                    session_id: id.clone(),
                    error,
                })
            })
            .collect()
    }

    /// Give up the lock held under `session_id`
    ///
    /// The next waiter, if any, becomes the holder.
    pub fn release_lock(&self, session_id: &SessionId) -> Result<(), LockError> {
        let departed = self
            .table
            .with_holder(session_id, |entry| {
                let departed = entry.release(session_id);
                self.table.unroute(session_id);
                (departed, departed == Some(Departed::Removed))
            })
            .flatten()
            .ok_or_else(|| LockError::NotFound(session_id.clone()))?;
        if departed == Departed::HandedOff {
            debug!(session_id = %session_id, "lock released to next waiter");
        } else {
            debug!(session_id = %session_id, "lock released");
        }
        Ok(())
    }

    /// Every lock with its holder-plus-waiter count
    pub fn list_locks(&self) -> Vec<LockSummary> {
        self.collect(&Selection::all())
    }

    /// Locks whose tags match `selection`
    pub fn query_locks(&self, selection: &Selection) -> Result<Vec<LockSummary>, LockError> {
        selection.validate()?;
        Ok(self.collect(selection))
    }

    pub fn stats(&self) -> LockStats {
        let mut stats = LockStats::default();
        self.table.store.query(&Selection::all(), |_, _, entry| {
            stats.locks += 1;
            if !entry.handoff_pending() {
                stats.holders += 1;
            }
            stats.waiters += entry.waiters();
            true
        });
        stats
    }

    /// Stop handing out locks
    ///
    /// Parked waiters return `Ok(None)`, new obtains return `Ok(None)` and
    /// watchers stop expiring holders. Holders may still heartbeat and release.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("lock coordinator shutting down");
        }
        self.shutdown.cancel();
    }

    pub fn is_draining(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn collect(&self, selection: &Selection) -> Vec<LockSummary> {
        let mut locks = Vec::new();
        self.table.store.query(selection, |_, tags, entry| {
            locks.push(LockSummary {
                tags: tags.clone(),
                count: entry.refs(),
            });
            true
        });
        locks.sort_by_cached_key(|lock| lock.tags.to_string());
        locks
    }

    /// Runs inside the new entry's exclusive section
    fn new_entry(&self, entry_id: &AssociatedId, holder: &SessionId, timeout: Duration) -> LockEntry {
        let (heartbeats, rx) = mpsc::channel(1);
        let mut entry = LockEntry::new(holder.clone(), timeout, heartbeats);
        entry.attach_watcher(watcher::spawn(
            Arc::downgrade(&self.table),
            entry_id.clone(),
            timeout,
            rx,
            self.shutdown.clone(),
        ));
        self.table.route(holder, entry_id);
        entry
    }
}

impl<I: IdGen> std::fmt::Debug for LockCoordinator<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockCoordinator")
            .field("config", &self.config)
            .field("store", &self.table.store)
            .field("draining", &self.is_draining())
            .finish()
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
