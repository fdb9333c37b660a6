//! Session runtime: drives a [`SessionAgent`] over a reconnecting transport.
//!
//! [`spawn_session`] starts a supervisor task that owns the agent. Callers
//! talk to it through a cloneable [`SessionHandle`] and observe it through a
//! [`SessionEvent`] stream.
//!
//! # Architecture
//!
//! ```text
//! SessionHandle ── SessionCommand ──▶ supervisor ◀── ServerMessage ── Transport
//!               ◀── oneshot outcome ─┘     │
//! event receiver ◀──── SessionEvent ───────┘
//! ```
//!
//! After a connection drops, the supervisor waits out a backoff delay and
//! runs `Connecting → Synchronizing → Live` again. The fresh snapshot
//! replaces whatever the view held.

use std::time::Duration;

use taskboard_proto::sync::{BoardEvent, Reply, RequestError, RequestId};
use taskboard_proto::task::{NewTask, TaskChanges, TaskId, TaskRecord, TaskStatus};
use tokio::sync::{mpsc, oneshot, watch};

use crate::session::agent::{AgentEvent, Dispatched, Mutation, SessionAgent};
use crate::session::pending::Completion;
use crate::session::{MutationError, SessionError, SessionState};
use crate::transport::{Connector, Transport};

/// Exponential backoff between connection attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Factor applied per consecutive failure.
    pub multiplier: u32,
    /// Consecutive failed attempts before giving up; `0` retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay to wait after `failures` consecutive failed attempts. A dropped
    /// connection that had succeeded counts as zero failures.
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(failures.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether `failures` consecutive failures exhaust the policy.
    #[must_use]
    pub const fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts != 0 && failures >= self.max_attempts
    }
}

/// Settings for [`spawn_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long to wait for the snapshot after connecting.
    pub sync_timeout: Duration,
    /// Capacity of the command and event channels.
    pub channel_capacity: usize,
    /// Backoff between connection attempts.
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_secs(5),
            channel_capacity: 256,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Notifications from the session runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The lifecycle state changed.
    StateChanged(SessionState),
    /// A snapshot replaced the view.
    Synchronized {
        /// Number of tasks in the snapshot.
        count: usize,
    },
    /// A broadcast was applied.
    Broadcast {
        /// The event.
        event: BoardEvent,
        /// Whether the view changed.
        changed: bool,
    },
    /// The server reported a failure that is not tied to this session.
    Advisory(String),
    /// A mutation from this session was rejected and reverted.
    MutationFailed {
        /// Request that failed.
        request_id: RequestId,
        /// The server's reason.
        error: RequestError,
    },
    /// A connection attempt failed.
    ConnectFailed {
        /// Consecutive failures so far.
        attempt: u32,
        /// Why the attempt failed.
        error: String,
    },
    /// The reconnect policy is exhausted; the session has stopped.
    GaveUp {
        /// Consecutive failures.
        attempts: u32,
    },
}

/// The session's state and view at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSnapshot {
    /// Lifecycle state.
    pub state: SessionState,
    /// Tasks in display order.
    pub tasks: Vec<TaskRecord>,
}

enum SessionCommand {
    Dispatch {
        mutation: Mutation,
        reply: oneshot::Sender<Result<Completion, SessionError>>,
    },
    Snapshot {
        reply: oneshot::Sender<ViewSnapshot>,
    },
    Shutdown,
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Waits until the session reaches `target`.
    ///
    /// # Errors
    ///
    /// [`SessionError::Closed`] if the session stops first.
    pub async fn wait_for(&self, target: SessionState) -> Result<(), SessionError> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| SessionError::Closed)
    }

    /// Creates a task. Resolves with the authority's record.
    ///
    /// # Errors
    ///
    /// See [`MutationError`].
    pub async fn create(&self, task: NewTask) -> Result<TaskRecord, MutationError> {
        match self.dispatch(Mutation::Create(task)).await? {
            Reply::Task(record) => Ok(record),
            _ => Err(MutationError::UnexpectedReply),
        }
    }

    /// Overwrites fields of a task. Resolves with the merged record.
    ///
    /// # Errors
    ///
    /// See [`MutationError`].
    pub async fn update(
        &self,
        id: TaskId,
        changes: TaskChanges,
    ) -> Result<TaskRecord, MutationError> {
        match self.dispatch(Mutation::Update { id, changes }).await? {
            Reply::Task(record) => Ok(record),
            _ => Err(MutationError::UnexpectedReply),
        }
    }

    /// Moves a task to another column.
    ///
    /// # Errors
    ///
    /// See [`MutationError`].
    pub async fn move_task(
        &self,
        id: TaskId,
        status: TaskStatus,
    ) -> Result<TaskStatus, MutationError> {
        match self.dispatch(Mutation::Move { id, status }).await? {
            Reply::Moved { status, .. } => Ok(status),
            _ => Err(MutationError::UnexpectedReply),
        }
    }

    /// Deletes a task. Resolves with the removed record, or `None` if another
    /// session deleted it first.
    ///
    /// # Errors
    ///
    /// See [`MutationError`].
    pub async fn delete(&self, id: TaskId) -> Result<Option<TaskRecord>, MutationError> {
        match self.dispatch(Mutation::Delete { id }).await? {
            Reply::Deleted(record) => Ok(record),
            _ => Err(MutationError::UnexpectedReply),
        }
    }

    /// Returns the current state and view.
    ///
    /// # Errors
    ///
    /// [`SessionError::Closed`] if the session has stopped.
    pub async fn snapshot(&self) -> Result<ViewSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Snapshot { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Asks the session to close its connection and stop.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown).await;
    }

    async fn dispatch(&self, mutation: Mutation) -> Result<Reply, MutationError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Dispatch { mutation, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        let completion = rx.await.map_err(|_| SessionError::Closed)??;
        completion.await.map_err(|_| MutationError::Disconnected)?
    }
}

/// Spawns the session supervisor.
///
/// The returned receiver yields [`SessionEvent`]s. Events are dropped with a
/// warning when the receiver falls `channel_capacity` events behind.
pub fn spawn_session<C>(
    connector: C,
    config: SessionConfig,
) -> (SessionHandle, mpsc::Receiver<SessionEvent>)
where
    C: Connector + 'static,
{
    let capacity = config.channel_capacity.max(1);
    let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
    let (evt_tx, evt_rx) = mpsc::channel(capacity);
    let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);

    let supervisor = Supervisor {
        agent: SessionAgent::new(),
        commands: cmd_rx,
        events: evt_tx,
        state: state_tx,
        config,
    };
    tokio::spawn(supervisor.run(connector));

    (
        SessionHandle {
            commands: cmd_tx,
            state: state_rx,
        },
        evt_rx,
    )
}

/// How a connection ended.
enum ConnectionEnd {
    /// The caller asked to stop.
    Shutdown,
    /// The connection failed; reconnect.
    Lost(String),
}

struct Supervisor {
    agent: SessionAgent,
    commands: mpsc::Receiver<SessionCommand>,
    events: mpsc::Sender<SessionEvent>,
    state: watch::Sender<SessionState>,
    config: SessionConfig,
}

impl Supervisor {
    async fn run<C: Connector>(mut self, connector: C) {
        let mut failures: u32 = 0;

        loop {
            if self.agent.begin_connect().is_err() {
                self.agent.disconnected();
                continue;
            }
            self.publish_state();

            let connected = tokio::select! {
                result = connector.connect() => result,
                () = serve_offline(&mut self.agent, &mut self.commands) => break,
            };

            match connected {
                Ok(transport) => {
                    failures = 0;
                    match self.drive(&transport).await {
                        ConnectionEnd::Shutdown => break,
                        ConnectionEnd::Lost(reason) => {
                            tracing::warn!(reason = %reason, "connection lost");
                        }
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    tracing::warn!(attempt = failures, error = %e, "connection attempt failed");
                    self.emit(SessionEvent::ConnectFailed {
                        attempt: failures,
                        error: e.to_string(),
                    });
                }
            }

            self.agent.disconnected();
            self.publish_state();

            if self.config.reconnect.exhausted(failures) {
                tracing::error!(attempts = failures, "giving up on reconnecting");
                self.emit(SessionEvent::GaveUp { attempts: failures });
                return;
            }

            let delay = self.config.reconnect.delay(failures);
            tracing::debug!(delay_ms = delay.as_millis(), "waiting before reconnect");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = serve_offline(&mut self.agent, &mut self.commands) => break,
            }
        }

        self.agent.disconnected();
        self.publish_state();
        tracing::info!("session stopped");
    }

    /// Runs one connection from snapshot request until it ends.
    async fn drive<T: Transport>(&mut self, transport: &T) -> ConnectionEnd {
        let frame = match self.agent.connected() {
            Ok(frame) => frame,
            Err(e) => return ConnectionEnd::Lost(e.to_string()),
        };
        self.publish_state();
        if let Err(e) = transport.send(&frame).await {
            return ConnectionEnd::Lost(e.to_string());
        }

        let sync_deadline = tokio::time::sleep(self.config.sync_timeout);
        tokio::pin!(sync_deadline);

        loop {
            let synchronizing = self.agent.state() == SessionState::Synchronizing;
            tokio::select! {
                message = transport.recv() => match message {
                    Ok(message) => {
                        let event = self.agent.handle_message(message);
                        if let Some(end) = self.on_agent_event(event) {
                            return end;
                        }
                    }
                    Err(e) => return ConnectionEnd::Lost(e.to_string()),
                },
                command = self.commands.recv() => match command {
                    None | Some(SessionCommand::Shutdown) => return ConnectionEnd::Shutdown,
                    Some(SessionCommand::Dispatch { mutation, reply }) => {
                        match self.agent.dispatch(mutation) {
                            Ok(Dispatched { frame, completion }) => {
                                let _ = reply.send(Ok(completion));
                                if let Err(e) = transport.send(&frame).await {
                                    return ConnectionEnd::Lost(e.to_string());
                                }
                            }
                            Err(e) => {
                                let _ = reply.send(Err(e));
                            }
                        }
                    }
                    Some(SessionCommand::Snapshot { reply }) => {
                        let _ = reply.send(snapshot(&self.agent));
                    }
                },
                () = &mut sync_deadline, if synchronizing => {
                    return ConnectionEnd::Lost("timed out waiting for snapshot".to_string());
                }
            }
        }
    }

    fn on_agent_event(&mut self, event: AgentEvent) -> Option<ConnectionEnd> {
        match event {
            AgentEvent::Ignored | AgentEvent::Confirmed { .. } => {}
            AgentEvent::SyncFailed(reason) => return Some(ConnectionEnd::Lost(reason)),
            AgentEvent::Synchronized { count } => {
                self.publish_state();
                self.emit(SessionEvent::Synchronized { count });
            }
            AgentEvent::Broadcast { event, changed } => {
                self.emit(SessionEvent::Broadcast { event, changed });
            }
            AgentEvent::Advisory(message) => self.emit(SessionEvent::Advisory(message)),
            AgentEvent::Reverted {
                request_id, error, ..
            } => self.emit(SessionEvent::MutationFailed { request_id, error }),
        }
        None
    }

    fn publish_state(&self) {
        let state = self.agent.state();
        if *self.state.borrow() != state {
            self.state.send_replace(state);
            tracing::debug!(%state, "session state changed");
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(?event, "event receiver lagging, dropping event");
            }
        }
    }
}

fn snapshot(agent: &SessionAgent) -> ViewSnapshot {
    ViewSnapshot {
        state: agent.state(),
        tasks: agent.view().records().to_vec(),
    }
}

/// Answers commands while no connection is live. Returns when asked to stop.
async fn serve_offline(agent: &mut SessionAgent, commands: &mut mpsc::Receiver<SessionCommand>) {
    loop {
        match commands.recv().await {
            None | Some(SessionCommand::Shutdown) => return,
            Some(SessionCommand::Dispatch { mutation, reply }) => {
                // Refused outside Live; nothing is applied.
                let _ = reply.send(agent.dispatch(mutation).map(|d| d.completion));
            }
            Some(SessionCommand::Snapshot { reply }) => {
                let _ = reply.send(snapshot(agent));
            }
        }
    }
}
