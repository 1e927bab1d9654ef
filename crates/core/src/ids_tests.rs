use super::*;

#[test]
fn fresh_ids_are_distinct() {
    let a = DirectoryId::new();
    let b = DirectoryId::new();
    assert_ne!(a, b);
}

#[test]
fn round_trips_through_string() {
    let id = TaskId::new();
    let text = id.to_string();
    let parsed: TaskId = text.parse().expect("valid uuid");
    assert_eq!(id, parsed);
}

#[test]
fn session_id_is_conversation_id() {
    let conversation_id = ConversationId::new();
    let session_id: SessionId = conversation_id;
    assert_eq!(conversation_id, session_id);
}

#[test]
fn controller_id_is_opaque_string() {
    let id = ControllerId::from("operator-a");
    assert_eq!(id.to_string(), "operator-a");
}

#[test]
fn serializes_as_plain_string() {
    let id = RepositoryId::new();
    let json = serde_json::to_string(&id).expect("serializable");
    assert_eq!(json, format!("\"{}\"", id.0));
}
