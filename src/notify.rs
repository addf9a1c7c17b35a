// src/notify.rs

//! Run notifications
//!
//! The merge engine, cleaner and autogen bot report what they did through
//! a [`Notifier`]. The shipped [`LogNotifier`] writes events to the log;
//! chat or mail integrations implement the same trait.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use tracing::info;

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EventKind {
    /// A package was bumped to a new version
    Bump { catpkg: String, version: String },
    /// Old versions of a package were removed
    Purge { catpkg: String, removed: Vec<String> },
    /// A pull request was opened
    PullRequestCreated { branch: String, url: String },
    /// End of a run
    RunSummary {
        command: String,
        changes: usize,
        errors: u64,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    /// Target kit the event belongs to
    pub kit: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(kit: &str, kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kit: kit.to_string(),
            kind,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EventKind::Bump { catpkg, version } => {
                write!(f, "[{}] bumped {} to {}", self.kit, catpkg, version)
            }
            EventKind::Purge { catpkg, removed } => {
                write!(f, "[{}] purged {}: {}", self.kit, catpkg, removed.join(", "))
            }
            EventKind::PullRequestCreated { branch, url } => {
                write!(f, "[{}] opened {} for {}", self.kit, url, branch)
            }
            EventKind::RunSummary {
                command,
                changes,
                errors,
            } => write!(
                f,
                "[{}] {} finished: {} changes, {} errors",
                self.kit, command, changes, errors
            ),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: &Event);
}

/// Logs every event at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &Event) {
        info!(kit = %event.kit, at = %event.timestamp.to_rfc3339(), "{}", event);
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    events: Mutex<Vec<Event>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

/// Notifier lookup by name
pub fn new_notifier(name: &str) -> crate::Result<Box<dyn Notifier>> {
    match name {
        "log" => Ok(Box::new(LogNotifier)),
        "memory" => Ok(Box::new(MemoryNotifier::new())),
        other => Err(crate::Error::InitError(format!("Unknown notifier '{}'", other))),
    }
}
