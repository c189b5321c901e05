// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fatal invariant violations

use std::fmt::Debug;

/// Log the offending state and panic
///
/// Reserved for programming defects (negative reference counts, duplicate
/// identifiers) where continuing would corrupt lock accounting. Release
/// builds abort on panic, so this never unwinds in production.
#[track_caller]
#[allow(clippy::panic)]
pub(crate) fn invariant_violation(what: &str, state: &dyn Debug) -> ! {
    tracing::error!(violation = what, state = ?state, "invariant violated");
    panic!("invariant violated: {}; state: {:?}", what, state);
}
