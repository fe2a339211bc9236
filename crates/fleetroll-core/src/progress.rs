//! Step-oriented progress reporting.
//!
//! A `ProgressSink` is write-only: components report what they are doing
//! and never read anything back from it.

use std::sync::Mutex;

use tracing::{info, warn};

/// Receives progress messages for a long-running operation.
pub trait ProgressSink: Send + Sync {
    /// A new step begins.
    fn start(&self, title: &str);
    /// Interim progress within the current step.
    fn progress(&self, message: &str);
    fn success(&self, message: &str);
    fn failure(&self, message: &str);
}

/// Forwards progress to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn start(&self, title: &str) {
        info!(step = "start", "{title}");
    }

    fn progress(&self, message: &str) {
        info!(step = "progress", "{message}");
    }

    fn success(&self, message: &str) {
        info!(step = "success", "{message}");
    }

    fn failure(&self, message: &str) {
        warn!(step = "failure", "{message}");
    }
}

/// A single message captured by `RecordingSink`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Start(String),
    Progress(String),
    Success(String),
    Failure(String),
}

impl ProgressEvent {
    pub fn message(&self) -> &str {
        match self {
            Self::Start(m) | Self::Progress(m) | Self::Success(m) | Self::Failure(m) => m,
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Messages of all `Failure` events.
    pub fn failures(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Failure(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    /// Whether any event's message contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.events().iter().any(|e| e.message().contains(needle))
    }

    fn push(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ProgressSink for RecordingSink {
    fn start(&self, title: &str) {
        self.push(ProgressEvent::Start(title.to_string()));
    }

    fn progress(&self, message: &str) {
        self.push(ProgressEvent::Progress(message.to_string()));
    }

    fn success(&self, message: &str) {
        self.push(ProgressEvent::Success(message.to_string()));
    }

    fn failure(&self, message: &str) {
        self.push(ProgressEvent::Failure(message.to_string()));
    }
}
