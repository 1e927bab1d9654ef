// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared data model, wire envelope, and error codes for the terminal
//! harness. Every other crate in the workspace depends on this one; it
//! depends on nothing else in the workspace.

pub mod bus;
pub mod cursor;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod json;
pub mod model;
pub mod scope;
pub mod telemetry_model;

pub use bus::{EventBus, PublishedEvent};
pub use cursor::CursorAllocator;
pub use error::{ErrorCode, HarnessError};
pub use scope::Scope;
