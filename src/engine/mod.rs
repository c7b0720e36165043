use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
mod core;
pub mod snapshot;

/// Opaque timer identity, generated at creation and never reused in a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerId(Uuid);

impl TimerId {
    pub(crate) fn generate() -> Self {
        TimerId(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(TimerId)
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to an external task in the work-item directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(pub i64);

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a committed ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub i64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timer FSM status. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerStatus {
    Idle,
    Running,
    Paused,
}

impl TimerStatus {
    /// Running or Paused
    pub fn is_active(self) -> bool {
        matches!(self, TimerStatus::Running | TimerStatus::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimerStatus::Idle => "idle",
            TimerStatus::Running => "running",
            TimerStatus::Paused => "paused",
        }
    }
}

/// Draft ledger record accumulated while the timer is away from Idle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub work_item_id: WorkItemId,
    pub started_at: DateTime<Utc>,
    pub description: String,
}

/// One independent tracker of elapsed work time for a single work item.
///
/// Fields are private: a `Timer` handed out by the registry is a copy, and
/// transitions only happen through `TimerRegistry::mutate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timer {
    pub(crate) id: TimerId,
    pub(crate) work_item_id: Option<WorkItemId>,
    pub(crate) status: TimerStatus,
    pub(crate) elapsed_seconds: u64,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) description: String,
    pub(crate) pending_entry: Option<PendingEntry>,
}

impl Timer {
    pub(crate) fn new(id: TimerId) -> Self {
        Self {
            id,
            work_item_id: None,
            status: TimerStatus::Idle,
            elapsed_seconds: 0,
            started_at: None,
            description: String::new(),
            pending_entry: None,
        }
    }

    pub fn id(&self) -> &TimerId {
        &self.id
    }

    pub fn work_item_id(&self) -> Option<WorkItemId> {
        self.work_item_id
    }

    pub fn status(&self) -> TimerStatus {
        self.status
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn pending_entry(&self) -> Option<&PendingEntry> {
        self.pending_entry.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Registry-mediated transitions. Saving stops go through `TimerRegistry::stop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Select(WorkItemId),
    Describe(String),
    Start,
    Pause,
    Resume,
    /// Explicit discard, same as `stop(save = false)`
    Reset,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Select(_) => "select",
            Operation::Describe(_) => "describe",
            Operation::Start => "start",
            Operation::Pause => "pause",
            Operation::Resume => "resume",
            Operation::Reset => "reset",
        }
    }
}

/// Result of a stop. Failures are returned as `Err` and never clear the timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Ledger confirmed the entry; timer is back to Idle
    Saved { entry_id: EntryId, elapsed_seconds: u64 },
    /// Explicit discard, nothing was written
    Discarded { elapsed_seconds: u64 },
    /// The timer was removed while its write was in flight; the result was dropped
    Detached { entry_id: Option<EntryId> },
}

/// Format seconds as HH:MM:SS
pub fn format_elapsed(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}
