// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! taglockd: network surface for the tag-set lock coordinator
//!
//! Shared by the `taglockd` binary and the `taglock` CLI, which speaks the
//! same wire protocol.

pub mod lifecycle;
pub mod protocol;
pub mod server;

pub use lifecycle::{Config, ConfigError, DaemonState, LifecycleError};
pub use protocol::{ErrorKind, FailedHeartbeat, ProtocolError, Request, Response};
pub use server::{ServerContext, ServerError};
