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

//! Integration tests for optimistic mutations that the server rejects.
//!
//! These tests validate:
//! - A rejected create disappears from the issuer's view and never reaches
//!   other sessions
//! - A rejected update restores every field it touched
//! - A delete that fails in the store puts the task back where it was, and
//!   other sessions are told something went wrong

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use taskboard::net::{self, ReconnectPolicy, SessionConfig, SessionEvent, SessionHandle};
use taskboard::session::{MutationError, SessionState};
use taskboard::transport::ws::WsConnector;
use taskboard_proto::sync::{BoardEvent, ErrorKind};
use taskboard_proto::task::{NewTask, Priority, TaskChanges, TaskId, TaskRecord};
use taskboard_server::server::{ServerState, start_server_with_state};
use taskboard_server::store::{MemoryStore, RecordStore, StoreError};
use tokio::sync::mpsc;

// =============================================================================
// Helpers
// =============================================================================

/// A memory store whose writes can be switched off.
#[derive(Default)]
struct SwitchableStore {
    inner: MemoryStore,
    read_only: AtomicBool,
}

impl SwitchableStore {
    fn check_writable(&self) -> Result<(), StoreError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Io {
                path: "switchable".into(),
                source: std::io::Error::other("store is read-only"),
            });
        }
        Ok(())
    }
}

impl RecordStore for SwitchableStore {
    async fn insert(&self, record: TaskRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        self.inner.insert(record).await
    }

    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.inner.get(id).await
    }

    async fn put(&self, record: TaskRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        self.inner.put(record).await
    }

    async fn remove(&self, id: &TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.check_writable()?;
        self.inner.remove(id).await
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.inner.list().await
    }
}

async fn start_server() -> (String, Arc<ServerState<SwitchableStore>>) {
    let state = Arc::new(ServerState::new(SwitchableStore::default()));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start server");
    (format!("ws://{addr}/ws"), state)
}

async fn connect(url: &str) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
    let config = SessionConfig {
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_millis(50),
            ..ReconnectPolicy::default()
        },
        ..SessionConfig::default()
    };
    let (handle, events) = net::spawn_session(WsConnector::new(url), config);
    tokio::time::timeout(Duration::from_secs(5), handle.wait_for(SessionState::Live))
        .await
        .expect("timed out waiting for session to go live")
        .unwrap();
    (handle, events)
}

/// Returns the next event matching `pick`, skipping others.
async fn next_matching<T>(
    events: &mut mpsc::Receiver<SessionEvent>,
    pick: impl Fn(SessionEvent) -> Option<T>,
) -> T {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("session stopped");
            if let Some(found) = pick(event) {
                return found;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn rejection_kind(result: Result<impl std::fmt::Debug, MutationError>) -> ErrorKind {
    match result {
        Err(MutationError::Rejected(error)) => error.kind,
        other => panic!("expected a rejection, got {other:?}"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn rejected_create_is_removed_and_never_broadcast() {
    let (url, state) = start_server().await;
    let (alice, mut alice_events) = connect(&url).await;
    let (bob, mut bob_events) = connect(&url).await;

    let kind = rejection_kind(alice.create(NewTask::new("")).await);
    assert_eq!(kind, ErrorKind::Validation);
    assert!(alice.snapshot().await.unwrap().tasks.is_empty());

    let failed = next_matching(&mut alice_events, |e| match e {
        SessionEvent::MutationFailed { error, .. } => Some(error),
        _ => None,
    })
    .await;
    assert_eq!(failed.kind, ErrorKind::Validation);

    // The first broadcast bob sees is the one that follows, not the rejected create.
    let sentinel = alice.create(NewTask::new("valid")).await.unwrap();
    let first = next_matching(&mut bob_events, |e| match e {
        SessionEvent::Broadcast { event, .. } => Some(event),
        _ => None,
    })
    .await;
    assert_eq!(first, BoardEvent::Created(sentinel.clone()));
    assert_eq!(bob.snapshot().await.unwrap().tasks, vec![sentinel]);
    assert_eq!(state.authority().list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn rejected_update_restores_fields() {
    let (url, _state) = start_server().await;
    let (alice, _events) = connect(&url).await;

    let original = alice.create(NewTask::new("Keep this title")).await.unwrap();
    let result = alice
        .update(
            original.id,
            TaskChanges {
                title: Some(String::new()),
                priority: Some(Priority::High),
                ..TaskChanges::default()
            },
        )
        .await;
    assert_eq!(rejection_kind(result), ErrorKind::Validation);

    assert_eq!(alice.snapshot().await.unwrap().tasks, vec![original]);
}

#[tokio::test]
async fn failed_delete_is_restored_in_place() {
    let (url, state) = start_server().await;
    let (alice, _alice_events) = connect(&url).await;
    let (_bob, mut bob_events) = connect(&url).await;

    let older = alice.create(NewTask::new("older")).await.unwrap();
    let middle = alice.create(NewTask::new("middle")).await.unwrap();
    let newer = alice.create(NewTask::new("newer")).await.unwrap();
    let before = alice.snapshot().await.unwrap().tasks;
    assert_eq!(before, vec![newer, middle.clone(), older]);

    state.authority().store().read_only.store(true, Ordering::SeqCst);
    let kind = rejection_kind(alice.delete(middle.id).await);
    assert_eq!(kind, ErrorKind::Store);
    assert_eq!(alice.snapshot().await.unwrap().tasks, before);

    let advisory = next_matching(&mut bob_events, |e| match e {
        SessionEvent::Advisory(message) => Some(message),
        _ => None,
    })
    .await;
    assert!(!advisory.is_empty());
}

#[tokio::test]
async fn update_of_unknown_task_is_refused_locally() {
    let (url, _state) = start_server().await;
    let (alice, _events) = connect(&url).await;

    let err = alice
        .update(TaskId::new(), TaskChanges::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MutationError::Refused(_)));
}
