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

//! Integration tests for reconnecting and resynchronizing a session.
//!
//! These tests validate:
//! - A session that loses its connection reconnects and replaces its view
//!   with a fresh snapshot
//! - Changes committed while a session was offline appear after resync
//! - Mutations are refused while offline
//! - A mutation in flight when the connection drops resolves as
//!   disconnected, and the resynced view decides whether it happened
//! - Optimistic effects of mutations that never commit are gone after resync
//!
//! ## Disconnect simulation
//!
//! `SessionHub::close_all` sends a Close frame to every session, which ends
//! each client's WebSocket stream the same way a server restart would.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use taskboard::net::{self, ReconnectPolicy, SessionConfig, SessionEvent, SessionHandle};
use taskboard::session::{MutationError, SessionError, SessionState};
use taskboard::transport::ws::WsConnector;
use taskboard_proto::task::{NewTask, TaskChanges, TaskId, TaskPatch, TaskRecord, TaskStatus};
use taskboard_server::server::{ServerState, start_server_with_state};
use taskboard_server::store::{MemoryStore, RecordStore, StoreError};
use tokio::sync::Notify;

// =============================================================================
// Helpers
// =============================================================================

/// A memory store that can hold writes until released.
#[derive(Default)]
struct GatedStore {
    inner: MemoryStore,
    gated: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedStore {
    async fn pass_gate(&self) {
        if self.gated.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

impl RecordStore for GatedStore {
    async fn insert(&self, record: TaskRecord) -> Result<(), StoreError> {
        self.pass_gate().await;
        self.inner.insert(record).await
    }

    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.inner.get(id).await
    }

    async fn put(&self, record: TaskRecord) -> Result<(), StoreError> {
        self.pass_gate().await;
        self.inner.put(record).await
    }

    async fn remove(&self, id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.inner.remove(id).await
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.inner.list().await
    }
}

async fn start_server() -> (String, Arc<ServerState<GatedStore>>) {
    let state = Arc::new(ServerState::new(GatedStore::default()));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start server");
    (format!("ws://{addr}/ws"), state)
}

/// Session config with a reconnect delay long enough to observe the
/// disconnected state.
fn session_config() -> SessionConfig {
    SessionConfig {
        sync_timeout: Duration::from_secs(5),
        channel_capacity: 256,
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(1),
            multiplier: 2,
            max_attempts: 0,
        },
    }
}

/// Connects a session and records every event it emits.
async fn connect(url: &str) -> (SessionHandle, Arc<Mutex<Vec<SessionEvent>>>) {
    let (handle, mut events) = net::spawn_session(WsConnector::new(url), session_config());
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            sink.lock().push(event);
        }
    });
    wait_state(&handle, SessionState::Live).await;
    (handle, log)
}

async fn wait_state(handle: &SessionHandle, state: SessionState) {
    tokio::time::timeout(Duration::from_secs(5), handle.wait_for(state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
        .unwrap();
}

/// Polls until the session's view matches the server's records, ignoring order.
async fn wait_converged(handle: &SessionHandle, state: &ServerState<GatedStore>) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let mut view = handle.snapshot().await.unwrap().tasks;
        let mut server = state.authority().list_all().await.unwrap();
        view.sort_by_key(|t| t.id);
        server.sort_by_key(|t| t.id);
        if view == server {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "view {view:?} never matched server {server:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn resync_picks_up_changes_made_while_offline() {
    let (url, state) = start_server().await;
    let (alice, log) = connect(&url).await;

    let doomed = alice.create(NewTask::new("will be deleted")).await.unwrap();
    let kept = alice.create(NewTask::new("will be edited")).await.unwrap();

    state.hub().close_all().await;
    wait_state(&alice, SessionState::Disconnected).await;

    // Commit changes alice cannot hear about.
    let authority = state.authority();
    authority.delete(doomed.id).await.unwrap();
    authority
        .update(
            kept.id,
            TaskPatch {
                title: Some("edited while offline".to_string()),
                ..TaskPatch::default()
            },
        )
        .await
        .unwrap();
    authority.move_task(kept.id, "done").await.unwrap();
    let added = authority
        .create(NewTask::new("added while offline").to_draft())
        .await
        .unwrap();

    wait_state(&alice, SessionState::Live).await;
    wait_converged(&alice, &state).await;

    let tasks = alice.snapshot().await.unwrap().tasks;
    assert_eq!(tasks.len(), 2);
    assert!(tasks.contains(&added));
    let edited = tasks.iter().find(|t| t.id == kept.id).unwrap();
    assert_eq!(edited.title, "edited while offline");
    assert_eq!(edited.status, TaskStatus::Done);

    // The recorder task may lag the session slightly.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let events = log.lock().clone();
        let resynced = events
            .iter()
            .position(|e| *e == SessionEvent::StateChanged(SessionState::Disconnected))
            .is_some_and(|i| events[i..].contains(&SessionEvent::Synchronized { count: 2 }));
        if resynced {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "events: {events:?}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn mutations_are_refused_while_offline() {
    let (url, state) = start_server().await;
    let (alice, _log) = connect(&url).await;

    state.hub().close_all().await;
    wait_state(&alice, SessionState::Disconnected).await;

    let err = alice.create(NewTask::new("too early")).await.unwrap_err();
    assert!(matches!(
        err,
        MutationError::Refused(SessionError::InvalidState { .. })
    ));

    wait_state(&alice, SessionState::Live).await;
    alice.create(NewTask::new("after resync")).await.unwrap();
    assert_eq!(state.authority().list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn in_flight_mutation_resolves_as_disconnected() {
    let (url, state) = start_server().await;
    let (alice, _log) = connect(&url).await;

    state.authority().store().gated.store(true, Ordering::SeqCst);
    let creator = alice.clone();
    let pending = tokio::spawn(async move { creator.create(NewTask::new("in flight")).await });

    tokio::time::timeout(Duration::from_secs(5), state.authority().store().entered.notified())
        .await
        .expect("create never reached the store");
    state.hub().close_all().await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, Err(MutationError::Disconnected));

    // The commit finishes on the server even though its session is gone.
    state.authority().store().gated.store(false, Ordering::SeqCst);
    state.authority().store().release.notify_one();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.authority().list_all().await.unwrap().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "create never committed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    wait_state(&alice, SessionState::Live).await;
    wait_converged(&alice, &state).await;
    let tasks = alice.snapshot().await.unwrap().tasks;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "in flight");
}

#[tokio::test]
async fn every_session_resyncs_after_server_side_close() {
    let (url, state) = start_server().await;
    let (alice, _a) = connect(&url).await;
    let (bob, _b) = connect(&url).await;
    alice.create(NewTask::new("shared")).await.unwrap();

    state.hub().close_all().await;
    for handle in [&alice, &bob] {
        wait_state(handle, SessionState::Disconnected).await;
    }
    for handle in [&alice, &bob] {
        wait_state(handle, SessionState::Live).await;
        wait_converged(handle, &state).await;
    }

    let record = bob.create(NewTask::new("after reconnect")).await.unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !alice
        .snapshot()
        .await
        .unwrap()
        .tasks
        .contains(&record)
    {
        assert!(tokio::time::Instant::now() < deadline, "alice never saw bob's task");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn uncommitted_mutations_vanish_after_resync() {
    let (url, state) = start_server().await;
    let (alice, _log) = connect(&url).await;
    let record = alice.create(NewTask::new("untouched")).await.unwrap();

    // Hold the move at the store. The server handles one request per
    // session at a time, so the update queues behind it.
    state.authority().store().gated.store(true, Ordering::SeqCst);
    let mover = alice.clone();
    let moving = tokio::spawn(async move { mover.move_task(record.id, TaskStatus::Done).await });
    tokio::time::timeout(Duration::from_secs(5), state.authority().store().entered.notified())
        .await
        .expect("move never reached the store");

    let editor = alice.clone();
    let editing = tokio::spawn(async move {
        editor
            .update(
                record.id,
                TaskChanges {
                    title: Some("renamed".to_string()),
                    ..TaskChanges::default()
                },
            )
            .await
    });

    // Both optimistic effects are visible before the connection drops.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let tasks = alice.snapshot().await.unwrap().tasks;
        if tasks[0].title == "renamed" && tasks[0].status == TaskStatus::Done {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "view: {tasks:?}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    state.hub().close_all().await;
    let moved = tokio::time::timeout(Duration::from_secs(5), moving).await.unwrap();
    assert_eq!(moved.unwrap(), Err(MutationError::Disconnected));
    let edited = tokio::time::timeout(Duration::from_secs(5), editing).await.unwrap();
    assert_eq!(edited.unwrap(), Err(MutationError::Disconnected));

    wait_state(&alice, SessionState::Live).await;
    let view = alice.snapshot().await.unwrap().tasks;
    let server = state.authority().list_all().await.unwrap();
    assert_eq!(view, server);
    assert_eq!(view, vec![record]);
}
