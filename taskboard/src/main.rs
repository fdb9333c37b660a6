//! `taskboard`: command-line client for the shared task board.
//!
//! Each command connects to the server, waits for the board snapshot,
//! performs its action, and prints the result. Configuration via CLI flags,
//! environment variables, or config file (`~/.config/taskboard/config.toml`).
//!
//! ```bash
//! # Show the board
//! cargo run --bin taskboard -- list
//!
//! # Create a task and move it along
//! cargo run --bin taskboard -- create --title "Write docs" --priority high
//! cargo run --bin taskboard -- move <id> in-progress
//!
//! # Follow changes made by everyone else
//! TASKBOARD_URL=ws://10.0.0.5:9100/ws cargo run --bin taskboard -- watch
//! ```

use std::fmt::Write as _;
use std::path::Path;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use taskboard::config::{CliArgs, ClientConfig, Command};
use taskboard::net::{self, SessionEvent, SessionHandle};
use taskboard::session::board;
use taskboard::session::view::BoardView;
use taskboard::session::{MutationError, SessionError, SessionState};
use taskboard_proto::sync::BoardEvent;
use taskboard_proto::task::{NewTask, TaskChanges, TaskRecord};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("could not reach {url} after {attempts} attempt(s)")]
    Unreachable { url: String, attempts: u32 },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    let mut config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let command = cli.command.clone().unwrap_or(Command::List);
    // One-shot commands should fail rather than retry forever.
    if command != Command::Watch && config.reconnect.max_attempts == 0 {
        config.reconnect.max_attempts = 1;
    }

    let output = Output {
        json: cli.json,
        timestamp_format: config.timestamp_format.clone(),
    };

    if let Err(e) = run(command, &config, &output).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// Initialize logging to stderr, or to `file_path` when given.
///
/// Returns a [`WorkerGuard`] for file logging that must be held until
/// shutdown so buffered entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some(log_path) = file_path else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    };

    let log_dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_path.file_name()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(command: Command, config: &ClientConfig, output: &Output) -> Result<(), CliError> {
    let (handle, mut events) = net::spawn_session(config.connector(), config.to_session_config());
    let result = execute(command, &handle, &mut events, config, output).await;
    handle.shutdown().await;
    result
}

async fn execute(
    command: Command,
    handle: &SessionHandle,
    events: &mut mpsc::Receiver<SessionEvent>,
    config: &ClientConfig,
    output: &Output,
) -> Result<(), CliError> {
    wait_live(handle, events, &config.server_url).await?;

    match command {
        Command::List => {
            let snapshot = handle.snapshot().await?;
            let mut view = BoardView::new();
            view.replace_all(snapshot.tasks);
            output.board(&view)?;
        }
        Command::Watch => watch(handle, events, output).await?,
        Command::Create {
            title,
            priority,
            category,
            status,
            attachment,
        } => {
            let defaults = NewTask::new(title);
            let task = NewTask {
                priority: priority.unwrap_or(defaults.priority),
                category: category.unwrap_or(defaults.category),
                status: status.unwrap_or(defaults.status),
                attachment,
                ..defaults
            };
            let record = handle.create(task).await?;
            output.task("created", &record)?;
        }
        Command::Update {
            id,
            title,
            priority,
            category,
            status,
            attachment,
        } => {
            let changes = TaskChanges {
                title,
                priority,
                category,
                status,
                attachment: attachment.map(|a| (!a.is_empty()).then_some(a)),
            };
            let record = handle.update(id, changes).await?;
            output.task("updated", &record)?;
        }
        Command::Move { id, status } => {
            let status = handle.move_task(id, status).await?;
            if output.json {
                println!("{}", serde_json::json!({ "id": id, "status": status }));
            } else {
                println!("moved {id} to {status}");
            }
        }
        Command::Delete { id } => match handle.delete(id).await? {
            Some(record) => output.task("deleted", &record)?,
            None if output.json => println!("{}", serde_json::json!({ "id": id, "deleted": null })),
            None => println!("{id} was already deleted"),
        },
    }
    Ok(())
}

/// Waits for the first snapshot, logging failed attempts along the way.
async fn wait_live(
    handle: &SessionHandle,
    events: &mut mpsc::Receiver<SessionEvent>,
    url: &str,
) -> Result<(), CliError> {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(SessionEvent::GaveUp { attempts }) => {
                    return Err(CliError::Unreachable { url: url.to_string(), attempts });
                }
                Some(SessionEvent::ConnectFailed { attempt, error }) => {
                    tracing::warn!(attempt, error = %error, "connect failed");
                }
                Some(_) => {}
                None => return Err(SessionError::Closed.into()),
            },
            result = handle.wait_for(SessionState::Live) => return Ok(result?),
        }
    }
}

/// Prints session events until Ctrl-C.
async fn watch(
    handle: &SessionHandle,
    events: &mut mpsc::Receiver<SessionEvent>,
    output: &Output,
) -> Result<(), CliError> {
    let snapshot = handle.snapshot().await?;
    let mut view = BoardView::new();
    view.replace_all(snapshot.tasks);
    output.board(&view)?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => output.session_event(&event)?,
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

struct Output {
    json: bool,
    timestamp_format: String,
}

impl Output {
    fn board(&self, view: &BoardView) -> Result<(), CliError> {
        let columns = board::columns(view);
        let counts = board::counts(view);
        if self.json {
            let value = serde_json::json!({ "columns": columns, "counts": counts });
            println!("{}", serde_json::to_string_pretty(&value)?);
            return Ok(());
        }

        for column in &columns {
            println!("{} ({})", column.status, column.tasks.len());
            for task in &column.tasks {
                println!("  {}", self.task_line(task));
            }
        }
        println!(
            "{} task(s): {} todo, {} in progress, {} done",
            counts.total(),
            counts.todo,
            counts.in_progress,
            counts.done
        );
        Ok(())
    }

    fn task(&self, verb: &str, record: &TaskRecord) -> Result<(), CliError> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(record)?);
        } else {
            println!("{verb} {}", self.task_line(record));
        }
        Ok(())
    }

    fn session_event(&self, event: &SessionEvent) -> Result<(), CliError> {
        match event {
            SessionEvent::Broadcast { event, .. } if self.json => {
                println!("{}", serde_json::to_string(event)?);
            }
            SessionEvent::Broadcast { event, .. } => match event {
                BoardEvent::Created(record) => println!("+ {}", self.task_line(record)),
                BoardEvent::Updated(record) => println!("~ {}", self.task_line(record)),
                BoardEvent::Moved { id, status } => println!("> {id} moved to {status}"),
                BoardEvent::Deleted { id } => println!("- {id} deleted"),
                BoardEvent::Error { message } => println!("! server: {message}"),
            },
            SessionEvent::StateChanged(state) => eprintln!("[{state}]"),
            SessionEvent::Synchronized { count } => eprintln!("[synchronized {count} task(s)]"),
            SessionEvent::Advisory(message) => eprintln!("! server: {message}"),
            SessionEvent::MutationFailed { request_id, error } => {
                eprintln!("! request {request_id} failed: {error}");
            }
            SessionEvent::ConnectFailed { attempt, error } => {
                eprintln!("[connect attempt {attempt} failed: {error}]");
            }
            SessionEvent::GaveUp { attempts } => eprintln!("[gave up after {attempts} attempt(s)]"),
        }
        Ok(())
    }

    fn task_line(&self, record: &TaskRecord) -> String {
        let mut line = format!(
            "{}  {:<11} [{}/{}] {}  (created {}, updated {})",
            record.id,
            record.status,
            record.priority,
            record.category,
            record.title,
            format_timestamp_ms(record.created_at, &self.timestamp_format),
            format_timestamp_ms(record.updated_at, &self.timestamp_format)
        );
        if let Some(attachment) = &record.attachment {
            let _ = write!(line, "  attachment: {attachment}");
        }
        line
    }
}

/// Format an epoch-millisecond timestamp with a chrono format string.
fn format_timestamp_ms(ms: u64, format: &str) -> String {
    use chrono::{Local, TimeZone};
    let secs = i64::try_from(ms / 1000).unwrap_or(i64::MAX);
    let nsecs = u32::try_from((ms % 1000) * 1_000_000).unwrap_or(0);
    match Local.timestamp_opt(secs, nsecs) {
        chrono::LocalResult::Single(dt) => {
            let mut out = String::new();
            // An invalid format string makes Display fail rather than panic here.
            match write!(out, "{}", dt.format(format)) {
                Ok(()) => out,
                Err(_) => ms.to_string(),
            }
        }
        _ => ms.to_string(),
    }
}
