use super::*;
use crate::json::CanonicalJson;
use chrono::Utc;
use serde_json::json;

#[test]
fn task_valid_transitions() {
    let task = Task {
        task_id: TaskId::new(),
        scope: Scope::new("t", "u", "w").expect("valid scope"),
        repository_id: None,
        title: "write docs".to_string(),
        description: String::new(),
        status: TaskStatus::Draft,
        order_index: 0,
        completed_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    assert!(task.can_transition_to(TaskStatus::Ready));
    assert!(task.can_transition_to(TaskStatus::InProgress));
    assert!(!task.can_transition_to(TaskStatus::Completed));
}

#[test]
fn completed_is_terminal() {
    let task = Task {
        task_id: TaskId::new(),
        scope: Scope::new("t", "u", "w").expect("valid scope"),
        repository_id: None,
        title: String::new(),
        description: String::new(),
        status: TaskStatus::Completed,
        order_index: 0,
        completed_at: Some(Utc::now()),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    assert!(!task.can_transition_to(TaskStatus::Draft));
    assert!(!task.can_transition_to(TaskStatus::Ready));
}

#[test]
fn runtime_status_exited_is_terminal() {
    assert!(RuntimeStatus::Exited.is_terminal());
    assert!(!RuntimeStatus::Running.is_terminal());
    assert!(!RuntimeStatus::NeedsInput.is_terminal());
    assert!(!RuntimeStatus::Completed.is_terminal());
}

#[test]
fn conversation_session_id_matches_conversation_id() {
    let conversation = Conversation {
        conversation_id: ConversationId::new(),
        directory_id: DirectoryId::new(),
        scope: Scope::new("t", "u", "w").expect("valid scope"),
        title: "session".to_string(),
        agent_type: AgentType::Codex,
        adapter_state: CanonicalJson::empty_object(),
        archived_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    assert_eq!(conversation.session_id(), conversation.conversation_id);
}

#[test]
fn repository_home_priority_absent_by_default() {
    let repository = Repository {
        repository_id: RepositoryId::new(),
        scope: Scope::new("t", "u", "w").expect("valid scope"),
        name: "repo".to_string(),
        normalized_remote_url: "git@example.com:org/repo.git".to_string(),
        default_branch: "main".to_string(),
        metadata: CanonicalJson::empty_object(),
        created_at: Utc::now(),
        archived_at: None,
    };
    assert_eq!(repository.home_priority(), None);
}

#[test]
fn repository_home_priority_reads_metadata() {
    let mut repository = Repository {
        repository_id: RepositoryId::new(),
        scope: Scope::new("t", "u", "w").expect("valid scope"),
        name: "repo".to_string(),
        normalized_remote_url: "git@example.com:org/repo.git".to_string(),
        default_branch: "main".to_string(),
        metadata: CanonicalJson::empty_object(),
        created_at: Utc::now(),
        archived_at: None,
    };
    repository.metadata = CanonicalJson(json!({ "homePriority": 3 }));
    assert_eq!(repository.home_priority(), Some(3));
}

#[test]
fn live_session_starts_running_and_live() {
    let now = Utc::now();
    let session = LiveSession::new(SessionId::new(), Some(1234), now);
    assert_eq!(session.runtime_status, RuntimeStatus::Running);
    assert!(session.live);
    assert!(session.controller.is_none());
    assert!(session.exit_record.is_none());
}
