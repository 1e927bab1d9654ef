use super::*;

#[test]
fn auth_envelope_round_trips() {
    let envelope = ClientEnvelope::Auth { token: "secret".to_string() };
    let text = serde_json::to_string(&envelope).expect("serializable");
    assert!(text.contains("\"type\":\"auth\""));
    let back: ClientEnvelope = serde_json::from_str(&text).expect("parseable");
    match back {
        ClientEnvelope::Auth { token } => assert_eq!(token, "secret"),
        other => panic!("unexpected variant: {other:?}"),
    }
}

#[test]
fn command_envelope_dispatches_by_type_string() {
    let text = r#"{"type":"command","commandId":"c1","command":{"type":"directory.upsert","path":"/tmp/project"}}"#;
    let envelope: ClientEnvelope = serde_json::from_str(text).expect("parseable");
    match envelope {
        ClientEnvelope::Command { command_id, command } => {
            assert_eq!(command_id, "c1");
            match command {
                Command::DirectoryUpsert { path } => assert_eq!(path, "/tmp/project"),
                other => panic!("unexpected command: {other:?}"),
            }
        }
        other => panic!("unexpected variant: {other:?}"),
    }
}

#[test]
fn pty_input_uses_data_base64_field_name() {
    let envelope = ClientEnvelope::PtyInput {
        session_id: SessionId::new(),
        data_base64: "aGVsbG8=".to_string(),
    };
    let text = serde_json::to_string(&envelope).expect("serializable");
    assert!(text.contains("\"dataBase64\":\"aGVsbG8=\""));
}

#[test]
fn malformed_command_type_fails_to_parse() {
    let text = r#"{"type":"command","commandId":"c1","command":{"type":"not.a.real.command"}}"#;
    let result: Result<ClientEnvelope, _> = serde_json::from_str(text);
    assert!(result.is_err());
}

#[test]
fn session_claim_carries_takeover_default_false() {
    let text = r#"{"type":"command","commandId":"c2","command":{"type":"session.claim","sessionId":"00000000-0000-0000-0000-000000000000","controllerId":"a","controllerType":"human","label":"alice"}}"#;
    let envelope: ClientEnvelope = serde_json::from_str(text).expect("parseable");
    match envelope {
        ClientEnvelope::Command {
            command: Command::SessionClaim { takeover, controller_id, .. },
            ..
        } => {
            assert!(!takeover);
            assert_eq!(controller_id.0, "a");
        }
        other => panic!("unexpected variant: {other:?}"),
    }
}

#[test]
fn stream_event_carries_cursor_at_envelope_level() {
    let envelope = ServerEnvelope::StreamEvent {
        subscription_id: SubscriptionId::new(),
        cursor: 42,
        event: ObservedEvent::ConversationDeleted { conversation_id: ConversationId::new() },
    };
    let text = serde_json::to_string(&envelope).expect("serializable");
    assert!(text.contains("\"cursor\":42"));
}
