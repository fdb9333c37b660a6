// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for multi-client board synchronization.
//!
//! Every test starts an in-process server on `127.0.0.1:0` and connects real
//! sessions to it over WebSockets.
//!
//! These tests validate:
//! - A mutation from one session shows up in every other session's view
//! - Concurrent mutations from several sessions converge on the server's state
//! - Deleting the same task twice removes it once

use std::sync::Arc;
use std::time::Duration;

use taskboard::net::{self, ReconnectPolicy, SessionConfig, SessionEvent, SessionHandle};
use taskboard::session::{MutationError, SessionError, SessionState};
use taskboard::transport::ws::WsConnector;
use taskboard_proto::sync::BoardEvent;
use taskboard_proto::task::{
    Category, NewTask, Priority, TaskChanges, TaskId, TaskRecord, TaskStatus,
};
use taskboard_server::server::{ServerState, start_server_with_state};
use taskboard_server::store::MemoryStore;
use tokio::sync::mpsc;

// =============================================================================
// Helpers
// =============================================================================

async fn start_server() -> (String, Arc<ServerState<MemoryStore>>) {
    let state = Arc::new(ServerState::new(MemoryStore::new()));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start server");
    (format!("ws://{addr}/ws"), state)
}

fn session_config() -> SessionConfig {
    SessionConfig {
        sync_timeout: Duration::from_secs(5),
        channel_capacity: 256,
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            multiplier: 2,
            max_attempts: 0,
        },
    }
}

/// Connects a session and waits until it is live.
async fn connect(url: &str) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
    let (handle, events) = net::spawn_session(WsConnector::new(url), session_config());
    tokio::time::timeout(Duration::from_secs(5), handle.wait_for(SessionState::Live))
        .await
        .expect("timed out waiting for session to go live")
        .unwrap();
    (handle, events)
}

/// Polls the session's view until `check` holds.
async fn wait_for_view(
    handle: &SessionHandle,
    check: impl Fn(&[TaskRecord]) -> bool,
) -> Vec<TaskRecord> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let tasks = handle.snapshot().await.unwrap().tasks;
        if check(&tasks) {
            return tasks;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "view never reached the expected state: {tasks:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Id, title and status of every task, sorted by id. A `moved` broadcast
/// carries no timestamp, so views are compared on these fields.
fn summary(tasks: &[TaskRecord]) -> Vec<(TaskId, String, TaskStatus)> {
    let mut rows: Vec<_> = tasks
        .iter()
        .map(|t| (t.id, t.title.clone(), t.status))
        .collect();
    rows.sort_by_key(|row| row.0);
    rows
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn create_appears_in_every_session() {
    let (url, _state) = start_server().await;
    let (alice, _alice_events) = connect(&url).await;
    let (bob, _bob_events) = connect(&url).await;

    let record = alice
        .create(NewTask {
            priority: Priority::High,
            category: Category::Bug,
            ..NewTask::new("Fix login redirect")
        })
        .await
        .unwrap();
    assert_eq!(record.status, TaskStatus::Todo);
    assert_eq!(record.created_at, record.updated_at);

    let bob_view = wait_for_view(&bob, |tasks| tasks.iter().any(|t| t.id == record.id)).await;
    assert_eq!(bob_view, vec![record.clone()]);
    assert_eq!(alice.snapshot().await.unwrap().tasks, vec![record]);
}

#[tokio::test]
async fn broadcast_event_reaches_other_session() {
    let (url, _state) = start_server().await;
    let (alice, _alice_events) = connect(&url).await;
    let (_bob, mut bob_events) = connect(&url).await;

    let record = alice.create(NewTask::new("Announce me")).await.unwrap();

    let (event, changed) = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(SessionEvent::Broadcast { event, changed }) = bob_events.recv().await {
                return (event, changed);
            }
        }
    })
    .await
    .expect("bob never saw the broadcast");
    assert_eq!(event, BoardEvent::Created(record));
    assert!(changed);
}

#[tokio::test]
async fn update_and_move_propagate() {
    let (url, _state) = start_server().await;
    let (alice, _a) = connect(&url).await;
    let (bob, _b) = connect(&url).await;

    let record = alice.create(NewTask::new("Draft release notes")).await.unwrap();
    wait_for_view(&bob, |tasks| tasks.len() == 1).await;

    let updated = bob
        .update(
            record.id,
            TaskChanges {
                title: Some("Publish release notes".to_string()),
                category: Some(Category::Enhancement),
                ..TaskChanges::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.title, "Publish release notes");
    assert!(updated.updated_at > record.updated_at);

    let status = alice.move_task(record.id, TaskStatus::Done).await.unwrap();
    assert_eq!(status, TaskStatus::Done);

    for handle in [&alice, &bob] {
        let tasks = wait_for_view(handle, |tasks| {
            tasks.first().is_some_and(|t| {
                t.status == TaskStatus::Done && t.title == "Publish release notes"
            })
        })
        .await;
        assert_eq!(tasks[0].category, Category::Enhancement);
    }
}

#[tokio::test]
async fn concurrent_sessions_converge() {
    let (url, state) = start_server().await;
    let mut sessions = Vec::new();
    for _ in 0..3 {
        sessions.push(connect(&url).await);
    }

    let mut workers = Vec::new();
    for (n, (handle, _)) in sessions.iter().enumerate() {
        let handle = handle.clone();
        workers.push(tokio::spawn(async move {
            for i in 0..5 {
                let record = handle
                    .create(NewTask::new(format!("session {n} task {i}")))
                    .await
                    .unwrap();
                if i % 2 == 0 {
                    handle
                        .move_task(record.id, TaskStatus::InProgress)
                        .await
                        .unwrap();
                }
            }
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }

    let expected = summary(&state.authority().list_all().await.unwrap());
    assert_eq!(expected.len(), 15);
    for (handle, _) in &sessions {
        let view = wait_for_view(handle, |tasks| summary(tasks) == expected).await;
        assert_eq!(
            view.iter()
                .filter(|t| t.status == TaskStatus::InProgress)
                .count(),
            9
        );
    }
}

#[tokio::test]
async fn late_joiner_receives_snapshot() {
    let (url, _state) = start_server().await;
    let (alice, _a) = connect(&url).await;
    let first = alice.create(NewTask::new("first")).await.unwrap();
    let second = alice.create(NewTask::new("second")).await.unwrap();

    let (carol, _c) = connect(&url).await;
    let view = carol.snapshot().await.unwrap();
    assert_eq!(view.state, SessionState::Live);
    // The snapshot is in creation order.
    assert_eq!(view.tasks, vec![first, second]);
}

#[tokio::test]
async fn deleting_twice_removes_once() {
    let (url, state) = start_server().await;
    let (alice, _a) = connect(&url).await;
    let (bob, _b) = connect(&url).await;

    let record = alice.create(NewTask::new("Remove me")).await.unwrap();
    wait_for_view(&bob, |tasks| tasks.len() == 1).await;

    let (a, b) = tokio::join!(alice.delete(record.id), bob.delete(record.id));
    let outcomes = [a, b];

    let removed: Vec<_> = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(Some(_))))
        .collect();
    assert_eq!(removed.len(), 1, "outcomes: {outcomes:?}");
    for outcome in &outcomes {
        match outcome {
            Ok(Some(r)) => assert_eq!(r, &record),
            // Lost the race at the server, or the broadcast got there first.
            Ok(None) | Err(MutationError::Refused(SessionError::NotFound(_))) => {}
            other => panic!("unexpected delete outcome: {other:?}"),
        }
    }

    assert!(state.authority().list_all().await.unwrap().is_empty());
    for handle in [&alice, &bob] {
        wait_for_view(handle, <[TaskRecord]>::is_empty).await;
    }
}
