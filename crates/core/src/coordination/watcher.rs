// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-lock liveness watcher
//!
//! Each lock entry owns one background task. A heartbeat resets its timer; a
//! full timeout with no heartbeat evicts whoever holds the lock at that moment.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::cancel::CancelToken;
use super::coordinator::LockTable;
use super::lock::Departed;
use crate::id::{AssociatedId, IdGen};

pub(crate) fn spawn<I: IdGen>(
    table: Weak<LockTable<I>>,
    entry_id: AssociatedId,
    timeout: Duration,
    mut heartbeats: mpsc::Receiver<()>,
    shutdown: CancelToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    trace!(lock = %entry_id, "watcher stopped for shutdown");
                    return;
                }
                beat = heartbeats.recv() => {
                    if beat.is_none() {
                        return;
                    }
                    trace!(lock = %entry_id, "heartbeat");
                }
                _ = tokio::time::sleep(timeout) => {
                    let Some(table) = table.upgrade() else {
                        return;
                    };
                    match table.expire(&entry_id) {
                        Some((Departed::Removed, evicted)) => {
                            warn!(lock = %entry_id, session_id = ?evicted, "lock expired without heartbeat, released");
                            return;
                        }
                        Some((Departed::HandedOff, evicted)) => {
                            warn!(lock = %entry_id, session_id = ?evicted, "lock expired without heartbeat, handed to next waiter");
                        }
                        Some((Departed::Deferred, _)) => {
                            debug!(lock = %entry_id, "expiry deferred, hand-off in flight");
                        }
                        Some((Departed::Remaining, _)) => {}
                        None => return,
                    }
                }
            }
        }
    })
}
