use std::fs;
use std::time::Duration;

use orbiton::sections::{EntryRef, ExpandThreshold, SectionKind};
use orbiton::session::Session;
use orbiton::ErrorKind;
use serde_json::Map;
use session_store::{MessageId, PersistenceStore, Role};

fn session_with_tool_output(threshold: ExpandThreshold, output: &str) -> Session {
    let session = Session::new("react", "mock-model", threshold);
    let user = session.append_message(Role::User, "run it", Map::new());
    let execution = session
        .append_tool_execution("shell", "call-1", Map::new(), Some(user))
        .expect("append execution");
    session
        .complete_tool_execution(execution, output, Duration::from_millis(12), true)
        .expect("complete execution");
    session
        .register_if_exceeds(
            SectionKind::ToolOutput,
            EntryRef::ToolExecution(execution),
            output,
        )
        .expect("register");
    session.append_message_with_tool_calls(
        Role::Agent,
        "done",
        Map::new(),
        vec!["call-1".to_string()],
    );
    session
}

#[test]
fn user_and_agent_messages_are_counted() {
    let session = Session::new("react", "mock-model", ExpandThreshold::default());
    session.append_message(Role::User, "Hello", Map::new());
    session.append_message(Role::Agent, "Hi", Map::new());

    let stats = session.statistics();
    assert_eq!(stats.messages(), 2);
    assert_eq!(stats.user_messages, 1);
    assert_eq!(stats.agent_messages, 1);
    assert_eq!(stats.tool_executions, 0);
}

#[test]
fn five_hundred_char_result_is_collapsed_with_bounded_preview() {
    let threshold = ExpandThreshold {
        max_lines: 5,
        max_chars: 200,
    };
    let output = "y".repeat(500);
    let session = session_with_tool_output(threshold, &output);

    let section = session.last_section().expect("section");
    let collapsed = session.section(section).expect("view");
    assert!(!collapsed.expanded);
    assert!(collapsed.text.starts_with(&"y".repeat(200)));
    assert!(!collapsed.text.contains(&"y".repeat(201)));

    assert!(session.toggle_section(section).expect("toggle"));
    assert_eq!(session.section(section).expect("view").text, output);
    assert!(!session.toggle_section(section).expect("toggle"));
    assert_eq!(session.section(section).expect("view"), collapsed);
}

#[test]
fn sections_need_an_owner_in_the_ledger() {
    let session = Session::new("react", "mock-model", ExpandThreshold::default());
    let error = session
        .register_section(
            SectionKind::AgentText,
            EntryRef::Message(MessageId(42)),
            "text",
        )
        .expect_err("unknown owner");
    assert_eq!(error.kind(), ErrorKind::NotFound);
}

#[test]
fn clear_never_touches_a_written_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = PersistenceStore::new(dir.path());
    let session = session_with_tool_output(ExpandThreshold::default(), "ok");
    let before = session.snapshot();

    let path = store.save(&before, None).expect("save");
    let written = fs::read(&path).expect("read snapshot");

    session.clear();
    session.append_message(Role::User, "after clear", Map::new());

    assert_eq!(fs::read(&path).expect("read snapshot"), written);
    assert_eq!(store.load(&path).expect("load"), before);
    assert_eq!(session.session_id(), before.session_id);
    assert_eq!(session.message_count(), 1);
    assert_eq!(session.section_count(), 0);
}

#[test]
fn reset_starts_a_new_session_on_the_same_agent() {
    let session = Session::new("plan", "mock-model", ExpandThreshold::default());
    session.append_message(Role::User, "hi", Map::new());
    let old_id = session.session_id();

    session.reset();

    assert_ne!(session.session_id(), old_id);
    assert!(session.is_empty());
    assert_eq!(session.agent_id(), "plan");
}

#[test]
fn saved_session_loads_back_equal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = PersistenceStore::new(dir.path());
    let session = session_with_tool_output(ExpandThreshold::default(), "line\n".repeat(3).as_str());
    session.set_model("other-model");

    let state = session.snapshot();
    let path = store.save(&state, None).expect("save");

    assert_eq!(store.load(&path).expect("load"), state);
}

#[test]
fn restore_rebuilds_sections_in_ledger_order() {
    let threshold = ExpandThreshold {
        max_lines: 2,
        max_chars: 40,
    };
    let source = session_with_tool_output(threshold, &"z".repeat(100));
    source.append_message(Role::Agent, "a\nb\nc\nd", Map::new());
    source.append_message(Role::User, "short", Map::new());
    let state = source.snapshot();

    let restored = Session::new("react", "mock-model", threshold);
    restored.restore(state.clone());

    assert_eq!(restored.snapshot(), state);
    assert_eq!(restored.section_count(), 2);

    let first = restored.next_section_after(None).expect("first section");
    let first = restored.section(first).expect("view");
    assert_eq!(first.kind, SectionKind::ToolOutput);
    assert_eq!(
        first.owner,
        EntryRef::ToolExecution(state.tool_executions[0].id)
    );

    let second = restored.last_section().expect("second section");
    let second = restored.section(second).expect("view");
    assert_eq!(second.kind, SectionKind::AgentText);
    assert_eq!(
        second.owner,
        EntryRef::Message(state.messages[2].id)
    );
}
