//! Progress events emitted by an auto-apply run, and the display-side log that folds them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureKind;
use crate::jobs::JobIdentity;
use crate::pulse::PauseReason;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogPhase {
    Applying,
    Done { application_id: String },
    Skipped,
    Failed(FailureKind),
}

impl LogPhase {
    pub fn label(&self) -> &'static str {
        match self {
            LogPhase::Applying => "applying",
            LogPhase::Done { .. } => "done",
            LogPhase::Skipped => "skipped",
            LogPhase::Failed(_) => "failed",
        }
    }
}

/// One phase change for one candidate. `applying` and the closing phase of
/// the same candidate share `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub id: u64,
    pub identity: JobIdentity,
    pub phase: LogPhase,
    pub timestamp: DateTime<Utc>,
}

/// Everything a run reports on its event channel, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Log(LogEvent),
    Paused(PauseReason),
    Resumed,
}

impl EngineEvent {
    pub fn as_log(&self) -> Option<&LogEvent> {
        match self {
            EngineEvent::Log(event) => Some(event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEntry {
    pub id: u64,
    pub identity: JobIdentity,
    pub phase: LogPhase,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-run activity log: full history plus a newest-first display window.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: Vec<ActivityEntry>,
    window: usize,
}

impl ActivityLog {
    pub fn new(window: usize) -> Self {
        Self {
            entries: Vec::new(),
            window,
        }
    }

    /// Folds `event` in: a new id opens an entry, a known id updates its phase.
    pub fn record(&mut self, event: &LogEvent) {
        if let Some(entry) = self.entries.iter_mut().rev().find(|e| e.id == event.id) {
            entry.phase = event.phase.clone();
            entry.updated_at = event.timestamp;
            return;
        }
        self.entries.push(ActivityEntry {
            id: event.id,
            identity: event.identity.clone(),
            phase: event.phase.clone(),
            started_at: event.timestamp,
            updated_at: event.timestamp,
        });
    }

    /// Most recent entries first, at most `window` of them.
    pub fn recent(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter().rev().take(self.window)
    }

    pub fn history(&self) -> &[ActivityEntry] {
        &self.entries
    }

    pub fn count(&self, label: &str) -> usize {
        self.entries.iter().filter(|e| e.phase.label() == label).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
