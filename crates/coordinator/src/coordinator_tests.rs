#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::*;
use std::collections::BTreeMap;
use std::time::Duration;

use harness_core::envelope::ObservedEvent;
use harness_core::ids::ControllerId;
use harness_core::model::{AgentType, ControllerType};
use harness_core::EventBus;

async fn start(coordinator: &Arc<Coordinator>, shell_cmd: &str) -> SessionId {
    let session_id = SessionId::new();
    coordinator
        .start_session(StartSessionArgs {
            session_id,
            agent_type: AgentType::Terminal,
            command: "sh",
            args: &["-c".to_string(), shell_cmd.to_string()],
            env: &BTreeMap::new(),
            cwd: None,
            cols: 80,
            rows: 24,
            notify_path: None,
            otlp_path: None,
            history_path: None,
        })
        .await
        .expect("start session")
}

async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<harness_core::PublishedEvent>) -> ObservedEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for bus event")
        .expect("bus closed")
        .event
}

async fn wait_for_exit(rx: &mut tokio::sync::broadcast::Receiver<harness_core::PublishedEvent>, session_id: SessionId) {
    loop {
        if let ObservedEvent::SessionEvent { session_id: sid, kind, .. } = next_event(rx).await {
            if sid == session_id && kind == "session-exit" {
                return;
            }
        }
    }
}

#[tokio::test]
async fn start_session_runs_a_real_child_and_publishes_output_then_exit() {
    let bus = Arc::new(EventBus::new());
    let coordinator = Arc::new(Coordinator::new(Arc::clone(&bus)));
    let mut rx = bus.subscribe();

    let session_id = start(&coordinator, "printf 'hi\\n'").await;

    let mut saw_output = false;
    loop {
        match next_event(&mut rx).await {
            ObservedEvent::SessionOutput { session_id: sid, .. } if sid == session_id => saw_output = true,
            ObservedEvent::SessionEvent { session_id: sid, kind, .. } if sid == session_id && kind == "session-exit" => {
                break;
            }
            _ => {}
        }
    }
    assert!(saw_output);

    let status = coordinator.session_status(session_id).await.expect("status");
    assert_eq!(status.runtime_status, harness_core::model::RuntimeStatus::Exited);
    assert!(!status.live);
}

#[tokio::test]
async fn claim_respond_and_release_round_trip() {
    let bus = Arc::new(EventBus::new());
    let coordinator = Arc::new(Coordinator::new(Arc::clone(&bus)));
    let mut rx = bus.subscribe();

    let session_id = start(&coordinator, "cat").await;

    let action = coordinator
        .claim(session_id, ControllerId::from("alice"), ControllerType::Human, Some("Alice".to_string()), false)
        .await
        .expect("claim");
    assert_eq!(action, ClaimAction::Claimed);
    assert!(matches!(next_event(&mut rx).await, ObservedEvent::SessionControl { action, .. } if action == "claimed"));

    // A second claim without takeover conflicts and names the holder.
    let err = coordinator
        .claim(session_id, ControllerId::from("bob"), ControllerType::Human, None, false)
        .await
        .unwrap_err();
    assert!(err.message.contains("Alice"));

    coordinator.release(session_id, None).await.expect("release");
    assert!(matches!(next_event(&mut rx).await, ObservedEvent::SessionControl { action, .. } if action == "released"));

    coordinator.signal(session_id, harness_core::model::Signal::Terminate).await.expect("signal");
    wait_for_exit(&mut rx, session_id).await;
}

#[tokio::test]
async fn respond_rejects_a_caller_that_is_not_the_controller() {
    let bus = Arc::new(EventBus::new());
    let coordinator = Arc::new(Coordinator::new(Arc::clone(&bus)));
    let mut rx = bus.subscribe();

    let session_id = start(&coordinator, "cat").await;
    coordinator
        .claim(session_id, ControllerId::from("alice"), ControllerType::Human, None, false)
        .await
        .expect("claim");
    let _ = next_event(&mut rx).await;

    // The session starts `running`, so `respond` fails for not awaiting
    // input regardless of caller identity here; exercise the controller
    // check directly via a session already claimed by someone else.
    let err = coordinator.respond(session_id, Some(&ControllerId::from("mallory")), "hello\n").await.unwrap_err();
    assert_eq!(err.code, harness_core::ErrorCode::Conflict);

    coordinator.signal(session_id, harness_core::model::Signal::Terminate).await.expect("signal");
    wait_for_exit(&mut rx, session_id).await;
}

#[tokio::test]
async fn remove_session_closes_the_broker_and_forgets_the_record() {
    let bus = Arc::new(EventBus::new());
    let coordinator = Arc::new(Coordinator::new(Arc::clone(&bus)));

    let session_id = start(&coordinator, "sleep 30").await;
    coordinator.remove_session(session_id).await.expect("remove");

    let err = coordinator.session_status(session_id).await.unwrap_err();
    assert_eq!(err.code, harness_core::ErrorCode::NotFound);

    let err = coordinator.remove_session(session_id).await.unwrap_err();
    assert_eq!(err.code, harness_core::ErrorCode::NotFound);
}

#[tokio::test]
async fn list_and_attention_list_reflect_live_sessions() {
    let bus = Arc::new(EventBus::new());
    let coordinator = Arc::new(Coordinator::new(Arc::clone(&bus)));
    let mut rx = bus.subscribe();

    let session_id = start(&coordinator, "cat").await;
    let sessions = coordinator.list_sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, session_id);
    assert!(coordinator.attention_list().await.is_empty());

    coordinator.signal(session_id, harness_core::model::Signal::Terminate).await.expect("signal");
    wait_for_exit(&mut rx, session_id).await;
}
