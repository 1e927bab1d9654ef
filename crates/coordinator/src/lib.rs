// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session Coordinator: owns every live PTY-backed
//! session, reconciles the broker/telemetry/notify signal sources into the
//! runtime status state machine, and publishes observed events onto the
//! shared [`harness_core::EventBus`].

pub mod controller;
pub mod coordinator;
pub mod state_machine;
pub mod status_model;

pub use controller::ClaimAction;
pub use coordinator::{Coordinator, StartSessionArgs};
