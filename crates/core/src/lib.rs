// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! taglock-core: mutual exclusion over arbitrary tag sets
//!
//! This crate provides:
//! - Typed tag values and tag sets
//! - Selections for querying stored tag sets
//! - An associative store keyed by tag set
//! - A lock coordinator with heartbeat-based expiry

pub mod coordination;
pub mod id;
pub mod query;
pub mod store;
pub mod tags;

mod invariant;

pub use coordination::{
    CancelToken, HeartbeatFailure, InvalidLockConfig, LockClaim, LockConfig, LockCoordinator,
    LockError, LockStats, LockSummary, SessionId,
};
pub use id::{AssociatedId, IdGen, SequentialIdGen, UuidIdGen};
pub use query::{CompareOp, KeyCheck, KeyLimit, Selection, SelectionError};
pub use store::{AssociatedStore, Lookup};
pub use tags::{parse_tag, TagError, TagKind, TagSet, TagValue, RESERVED_ID_KEY};
