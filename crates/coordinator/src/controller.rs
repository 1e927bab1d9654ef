// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Controller claim/release/takeover. Pure functions over
//! `Option<Controller>` so the locking discipline lives entirely in
//! `coordinator.rs`; a single mutator per session, extended to support
//! takeover (replacing the current controller without an intervening
//! release).

use harness_core::model::Controller;
use harness_core::{ErrorCode, HarnessError};

/// What happened to a `session.claim` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimAction {
    Claimed,
    TakenOver,
}

/// Claim an unowned session, or take over an owned one when `takeover` is
/// set. Returns `Conflict` naming the current holder's label when the
/// session is already claimed and `takeover` is false.
pub fn claim(current: &mut Option<Controller>, controller: Controller, takeover: bool) -> Result<ClaimAction, HarnessError> {
    match current {
        None => {
            *current = Some(controller);
            Ok(ClaimAction::Claimed)
        }
        Some(existing) => {
            if takeover {
                *current = Some(controller);
                Ok(ClaimAction::TakenOver)
            } else {
                let holder = existing
                    .controller_label
                    .clone()
                    .unwrap_or_else(|| existing.controller_id.to_string());
                Err(HarnessError::new(
                    ErrorCode::Conflict,
                    format!("session is already claimed by {holder}"),
                ))
            }
        }
    }
}

/// Clear the controller. Idempotent: returns `false` (no event to emit)
/// when the session was already unowned.
pub fn release(current: &mut Option<Controller>) -> bool {
    current.take().is_some()
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
