// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::Utc;
use harness_core::ids::ControllerId;
use harness_core::model::ControllerType;

fn controller(id: &str, label: Option<&str>) -> Controller {
    Controller {
        controller_id: ControllerId::from(id),
        controller_type: ControllerType::Human,
        controller_label: label.map(str::to_string),
        claimed_at: Utc::now(),
    }
}

#[test]
fn claims_an_unowned_session() {
    let mut current = None;
    let action = claim(&mut current, controller("a", Some("alice")), false).unwrap();
    assert_eq!(action, ClaimAction::Claimed);
    assert_eq!(current.unwrap().controller_id, ControllerId::from("a"));
}

#[test]
fn conflict_without_takeover_names_current_holder() {
    let mut current = Some(controller("a", Some("alice")));
    let err = claim(&mut current, controller("b", Some("bob")), false).unwrap_err();
    assert!(err.message.contains("alice"));
    assert_eq!(current.unwrap().controller_id, ControllerId::from("a"));
}

#[test]
fn takeover_replaces_the_controller() {
    let mut current = Some(controller("a", Some("alice")));
    let action = claim(&mut current, controller("b", Some("bob")), true).unwrap();
    assert_eq!(action, ClaimAction::TakenOver);
    assert_eq!(current.unwrap().controller_id, ControllerId::from("b"));
}

#[test]
fn release_is_idempotent() {
    let mut current: Option<Controller> = None;
    assert!(!release(&mut current));
    current = Some(controller("a", None));
    assert!(release(&mut current));
    assert!(current.is_none());
    assert!(!release(&mut current));
}
