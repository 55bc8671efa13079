//! # Line Log
//!
//! Bounded, timestamped record of everything that happens on a serial session:
//! connection events, received text, sent text, warnings and errors.

use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// Number of entries kept by default.
pub const LOG_CAPACITY: usize = 300;

/// Largest accepted log capacity.
pub const MAX_LOG_CAPACITY: usize = 100_000;

/// Entries buffered per live subscriber before it lags.
const SUBSCRIBER_BUFFER: usize = 1024;

/// Target used when entries are mirrored to the `log` facade.
const LOG_TARGET: &str = "serial_session::line";

/// Kind of a log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogKind {
    /// session event
    Info,
    /// text received from the device
    Inbound,
    /// text sent to the device
    Outbound,
    /// recoverable problem
    Warning,
    /// failed operation
    Error,
}

impl LogKind {
    /// Short tag used in rendered lines.
    pub fn tag(&self) -> &'static str {
        match self {
            LogKind::Info => "info",
            LogKind::Inbound => "in",
            LogKind::Outbound => "out",
            LogKind::Warning => "warn",
            LogKind::Error => "error",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One immutable log line.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub kind: LogKind,
    pub message: String,
}

impl LogEntry {
    /// Creates an entry stamped with the current local time.
    pub fn now(kind: LogKind, message: impl Into<String>) -> Self {
        LogEntry {
            timestamp: Local::now(),
            kind,
            message: message.into(),
        }
    }

    /// Time of day, as shown in the console.
    pub fn time(&self) -> String {
        self.timestamp.format("%H:%M:%S%.3f").to_string()
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{}] {}", self.time(), self.kind, self.message)
    }
}

/// Bounded FIFO of [`LogEntry`] values.
///
/// Appending past capacity evicts the oldest entries first. Every appended
/// entry is also broadcast to subscribers and mirrored to the `log` facade.
pub struct LineLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    tx: broadcast::Sender<LogEntry>,
}

impl LineLog {
    /// Creates a log holding [`LOG_CAPACITY`] entries.
    pub fn new() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }

    /// Creates a log holding at most `capacity` entries, clamped to
    /// `1..=MAX_LOG_CAPACITY`.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_LOG_CAPACITY);
        let (tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        LineLog {
            entries: VecDeque::new(),
            capacity,
            tx,
        }
    }

    /// Appends an entry stamped with the current time.
    pub fn append(&mut self, kind: LogKind, message: impl Into<String>) {
        let entry = LogEntry::now(kind, message);
        mirror(&entry);
        // no subscribers is fine
        let _ = self.tx.send(entry.clone());
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Iterates retained entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Copies the retained entries.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    /// Number of retained entries of one kind.
    pub fn count(&self, kind: LogKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    /// Drops all retained entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Receives every entry appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }

    /// Writes the retained entries, one `[time-kind] message` line each.
    pub fn export<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for entry in &self.entries {
            writeln!(writer, "{entry}")?;
        }
        writer.flush()
    }
}

impl Default for LineLog {
    fn default() -> Self {
        Self::new()
    }
}

fn mirror(entry: &LogEntry) {
    match entry.kind {
        LogKind::Info => log::debug!(target: LOG_TARGET, "{}", entry.message),
        LogKind::Inbound | LogKind::Outbound => {
            log::trace!(target: LOG_TARGET, "[{}] {:?}", entry.kind, entry.message)
        }
        LogKind::Warning => log::warn!(target: LOG_TARGET, "{}", entry.message),
        LogKind::Error => log::error!(target: LOG_TARGET, "{}", entry.message),
    }
}

/// Shared handle to a [`LineLog`], cloned into the session and its read loop.
#[derive(Clone, Default)]
pub struct LogHandle {
    inner: Arc<Mutex<LineLog>>,
}

impl LogHandle {
    pub fn new(capacity: usize) -> Self {
        LogHandle {
            inner: Arc::new(Mutex::new(LineLog::with_capacity(capacity))),
        }
    }

    /// Locks the log. A poisoned lock still yields the log; entries are
    /// always left consistent.
    pub fn lock(&self) -> MutexGuard<'_, LineLog> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, kind: LogKind, message: impl Into<String>) {
        self.lock().append(kind, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.append(LogKind::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.append(LogKind::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.append(LogKind::Error, message);
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock().snapshot()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn count(&self, kind: LogKind) -> usize {
        self.lock().count(kind)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.lock().subscribe()
    }
}
