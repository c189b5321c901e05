// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Associative store keyed by tag sets
//!
//! Maps each distinct [`TagSet`] to a generated [`AssociatedId`] and a mutable
//! payload. Every mutation happens inside a callback that holds the entry's
//! exclusive section:
//!
//! - operations on distinct tag sets only share a brief index lookup
//! - operations on the same tag set serialize for the callback's duration
//! - both indexes (by tags, by id) change in the same transaction
//!
//! Callbacks must be short and must never wait on anything that another
//! store operation could be needed to release.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use crate::id::{AssociatedId, IdGen, UuidIdGen};
use crate::invariant::invariant_violation;
use crate::query::Selection;
use crate::tags::TagSet;

/// Which path [`AssociatedStore::create_or_find`] took
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<R> {
    /// A new entry was created from `on_create`
    Created,
    /// An existing entry was handed to `on_found`, which returned this value
    Found(R),
}

impl<R> Lookup<R> {
    pub fn is_created(&self) -> bool {
        matches!(self, Lookup::Created)
    }
}

struct Slot<T> {
    id: AssociatedId,
    /// Caller's tags, the by-tags index key
    key: TagSet,
    /// Caller's tags plus the reserved id key, what selections see
    tags: TagSet,
    /// `None` once the entry has been deleted
    payload: Mutex<Option<T>>,
}

struct Index<T> {
    by_tags: HashMap<TagSet, Arc<Slot<T>>>,
    by_id: HashMap<AssociatedId, Arc<Slot<T>>>,
}

impl<T> Index<T> {
    fn unlink(&mut self, slot: &Arc<Slot<T>>) {
        if self
            .by_tags
            .get(&slot.key)
            .is_some_and(|s| Arc::ptr_eq(s, slot))
        {
            self.by_tags.remove(&slot.key);
        }
        if self
            .by_id
            .get(&slot.id)
            .is_some_and(|s| Arc::ptr_eq(s, slot))
        {
            self.by_id.remove(&slot.id);
        }
    }

    fn describe(&self) -> Vec<String> {
        let mut entries: Vec<_> = self
            .by_id
            .values()
            .map(|slot| format!("{} => {}", slot.id, slot.key))
            .collect();
        entries.sort();
        entries
    }
}

fn lock<X>(mutex: &Mutex<X>) -> MutexGuard<'_, X> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Concurrent map from tag sets to identified payloads
pub struct AssociatedStore<T, I: IdGen = UuidIdGen> {
    ids: I,
    index: Mutex<Index<T>>,
}

impl<T> AssociatedStore<T, UuidIdGen> {
    pub fn new() -> Self {
        Self::with_id_gen(UuidIdGen)
    }
}

impl<T> Default for AssociatedStore<T, UuidIdGen> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, I: IdGen> AssociatedStore<T, I> {
    pub fn with_id_gen(ids: I) -> Self {
        Self {
            ids,
            index: Mutex::new(Index {
                by_tags: HashMap::new(),
                by_id: HashMap::new(),
            }),
        }
    }

    /// Find the entry for `tags`, or create one
    ///
    /// Exactly one callback runs. `on_create` receives the freshly minted id
    /// and produces the payload; `on_found` gets exclusive access to the
    /// existing payload. Returns the entry's id either way.
    pub fn create_or_find<R>(
        &self,
        tags: &TagSet,
        on_create: impl FnOnce(&AssociatedId) -> T,
        on_found: impl FnOnce(&mut T) -> R,
    ) -> (AssociatedId, Lookup<R>) {
        loop {
            let mut index = lock(&self.index);

            let existing = index.by_tags.get(tags).cloned();
            if let Some(slot) = existing {
                drop(index);
                let mut payload = lock(&slot.payload);
                if let Some(value) = payload.as_mut() {
                    let result = on_found(value);
                    return (slot.id.clone(), Lookup::Found(result));
                }
                // Only reachable if an on_create panicked; clear it and retry
                drop(payload);
                lock(&self.index).unlink(&slot);
                continue;
            }

            let id = self.ids.next();
            if index.by_id.contains_key(&id) {
                invariant_violation("duplicate associated id minted", &index.describe());
            }

            let slot = Arc::new(Slot {
                id: id.clone(),
                key: tags.clone(),
                tags: tags.with_associated_id(id.as_str()),
                payload: Mutex::new(None),
            });
            // Publish the slot already locked so concurrent finders wait for on_create
            let mut payload = lock(&slot.payload);
            index.by_tags.insert(tags.clone(), Arc::clone(&slot));
            index.by_id.insert(id.clone(), Arc::clone(&slot));
            drop(index);

            *payload = Some(on_create(&id));
            trace!(id = %id, tags = %tags, "store entry created");
            return (id, Lookup::Created);
        }
    }

    /// Run `on_found` against the entry with this id, if it exists
    pub fn find_by_associated_id<R>(
        &self,
        id: &AssociatedId,
        on_found: impl FnOnce(&TagSet, &mut T) -> R,
    ) -> Option<R> {
        let slot = lock(&self.index).by_id.get(id).cloned()?;
        let mut payload = lock(&slot.payload);
        let value = payload.as_mut()?;
        Some(on_found(&slot.key, value))
    }

    /// Remove the entry for `tags` if `can_delete` approves
    ///
    /// Returns whether an entry was removed. A missing entry is not an error.
    pub fn delete(
        &self,
        tags: &TagSet,
        can_delete: impl FnOnce(&AssociatedId, &mut T) -> bool,
    ) -> bool {
        let Some(slot) = lock(&self.index).by_tags.get(tags).cloned() else {
            return false;
        };
        self.delete_slot(&slot, |value| can_delete(&slot.id, value))
            .unwrap_or(false)
    }

    /// Remove the entry with this id if `can_delete` approves
    ///
    /// `None` when no entry has the id, otherwise whether it was removed.
    pub fn delete_by_associated_id(
        &self,
        id: &AssociatedId,
        can_delete: impl FnOnce(&TagSet, &mut T) -> bool,
    ) -> Option<bool> {
        let slot = lock(&self.index).by_id.get(id).cloned()?;
        self.delete_slot(&slot, |value| can_delete(&slot.key, value))
    }

    fn delete_slot(
        &self,
        slot: &Arc<Slot<T>>,
        can_delete: impl FnOnce(&mut T) -> bool,
    ) -> Option<bool> {
        let removed = {
            let mut payload = lock(&slot.payload);
            let value = payload.as_mut()?;
            if !can_delete(value) {
                return Some(false);
            }
            let removed = payload.take();
            lock(&self.index).unlink(slot);
            removed
        };
        // Payload destructors run outside the exclusive section
        drop(removed);
        trace!(id = %slot.id, tags = %slot.key, "store entry removed");
        Some(true)
    }

    /// Visit every entry whose stored tags match `selection`
    ///
    /// Stored tags include the reserved id key, so selections may filter on it.
    /// Stops early when `visit` returns false. Entries are visited in no
    /// particular order; entries created or removed during the walk may or may
    /// not be seen.
    pub fn query(
        &self,
        selection: &Selection,
        mut visit: impl FnMut(&AssociatedId, &TagSet, &T) -> bool,
    ) {
        let slots: Vec<_> = lock(&self.index).by_id.values().cloned().collect();
        for slot in slots {
            if !selection.matches(&slot.tags) {
                continue;
            }
            let payload = lock(&slot.payload);
            let Some(value) = payload.as_ref() else {
                continue;
            };
            if !visit(&slot.id, &slot.key, value) {
                break;
            }
        }
    }

    /// The generator that mints this store's ids
    pub fn id_gen(&self) -> &I {
        &self.ids
    }

    pub fn len(&self) -> usize {
        lock(&self.index).by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T, I: IdGen> std::fmt::Debug for AssociatedStore<T, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssociatedStore")
            .field("entries", &lock(&self.index).describe())
            .finish()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
