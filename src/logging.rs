//! Log sinks: console, optional file and the `api_logs` table.
//!
//! The subscriber is assembled once at startup. The database sink is a
//! `tracing_subscriber::Layer` that turns events into [`LogEntry`] values and
//! hands them to a background writer over a channel, so logging never waits
//! on SQLite and a failed insert never fails a request.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt as fmt_layer};

use crate::db::{Database, LogEntry};

/// Console output format.
#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Where and how much to log.
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub format: LogFormat,
    /// `EnvFilter` directive, e.g. `info` or `cadastro=debug,sqlx=warn`
    pub level: String,
    pub file: Option<PathBuf>,
    pub database: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: "info".into(),
            file: None,
            database: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error("Invalid log file path: {0}")]
    FilePath(PathBuf),
    #[error("Failed to install subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Keeps the sinks alive. Drop it only at shutdown: dropping flushes and
/// stops the file writer.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
    db_receiver: Option<Receiver<LogEntry>>,
}

impl LoggingGuard {
    /// Start persisting buffered and future entries into the database.
    /// Does nothing if the database sink is disabled or already attached.
    pub fn attach_database(&mut self, db: &Database) -> Option<tokio::task::JoinHandle<()>> {
        let receiver = self.db_receiver.take()?;
        Some(tokio::spawn(write_log_entries(db.clone(), receiver)))
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Entries waiting for the database writer. Further entries are dropped
/// while the queue is full.
pub const LOG_QUEUE_CAPACITY: usize = 1024;

/// Install the global subscriber.
pub fn init_logging(settings: &LogSettings) -> Result<LoggingGuard, LoggingError> {
    let filter = EnvFilter::try_new(&settings.level)?;
    let mut layers: Vec<BoxedLayer> = Vec::new();

    layers.push(match settings.format {
        LogFormat::Pretty => fmt_layer::layer().boxed(),
        LogFormat::Json => fmt_layer::layer().json().boxed(),
        LogFormat::Compact => fmt_layer::layer().compact().boxed(),
    });

    let mut file_guard = None;
    if let Some(path) = &settings.file {
        let (dir, name) = split_log_path(path)?;
        let appender = tracing_appender::rolling::never(dir, name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt_layer::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
        file_guard = Some(guard);
    }

    let mut db_receiver = None;
    if settings.database {
        let (sender, receiver) = channel(LOG_QUEUE_CAPACITY);
        layers.push(DatabaseLayer::new(sender).boxed());
        db_receiver = Some(receiver);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
        db_receiver,
    })
}

fn split_log_path(path: &Path) -> Result<(PathBuf, PathBuf), LoggingError> {
    let name = path
        .file_name()
        .ok_or_else(|| LoggingError::FilePath(path.to_path_buf()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, PathBuf::from(name)))
}

/// Drain entries into `api_logs` until every sender is gone.
pub async fn write_log_entries(db: Database, mut receiver: Receiver<LogEntry>) {
    let store = db.api_logs();
    while let Some(entry) = receiver.recv().await {
        if let Err(e) = store.insert(&entry).await {
            // Reporting through tracing would feed the failure back into this sink.
            eprintln!("Failed to persist log entry: {}", e);
        }
    }
}

/// Layer that forwards events to the database writer.
pub struct DatabaseLayer {
    sender: Sender<LogEntry>,
}

impl DatabaseLayer {
    pub fn new(sender: Sender<LogEntry>) -> Self {
        Self { sender }
    }
}

/// Events from the database driver are not persisted (the writer's own queries).
const IGNORED_TARGET: &str = "sqlx";

impl<S: Subscriber> Layer<S> for DatabaseLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target().starts_with(IGNORED_TARGET) {
            return;
        }

        let mut fields = EntryFields::default();
        event.record(&mut fields);

        let entry = LogEntry {
            timestamp: Utc::now(),
            level: metadata.level().to_string(),
            category: metadata.target().to_string(),
            message: fields.message,
            exception: fields.error,
            path: fields.path,
            method: fields.method,
            status_code: fields.status,
        };

        // Full queue (writer behind) or closed channel (shutdown): drop the entry.
        let _ = self.sender.try_send(entry);
    }
}

#[derive(Default)]
struct EntryFields {
    message: Option<String>,
    error: Option<String>,
    path: Option<String>,
    method: Option<String>,
    status: Option<i64>,
}

impl EntryFields {
    fn set(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            "error" => self.error = Some(value),
            "path" => self.path = Some(value),
            "method" => self.method = Some(value),
            "status" => self.status = value.parse().ok(),
            _ => {}
        }
    }
}

impl Visit for EntryFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.set(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.set(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.set(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.set(field, format!("{:?}", value));
    }
}
