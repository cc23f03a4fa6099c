use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::model::ids::TaskNumber;
use crate::model::task::{MAX_ATTEMPTS, TaskState};

//
// ─── LAB STATUS ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

impl LabStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LabStatus::NotStarted => "not_started",
            LabStatus::InProgress => "in_progress",
            LabStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for LabStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError(pub String);

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown lab status: {}", self.0)
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for LabStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

//
// ─── VERDICT ───────────────────────────────────────────────────────────────────
//

/// Authoritative backend response to a submitted answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub is_correct: bool,
    /// The task has been answered correctly at least once.
    pub completed: bool,
    pub score: u32,
    pub attempts: u32,
}

impl Verdict {
    /// Task state implied by this verdict.
    #[must_use]
    pub fn resulting_state(&self) -> TaskState {
        if self.is_correct || self.completed {
            TaskState::AnsweredCorrect
        } else if self.attempts >= MAX_ATTEMPTS {
            TaskState::AnsweredIncorrectExhausted
        } else {
            TaskState::AnsweredIncorrectRetryable
        }
    }
}

//
// ─── SNAPSHOT ──────────────────────────────────────────────────────────────────
//

/// Backend record of earlier work on one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub number: TaskNumber,
    pub completed: bool,
    pub attempts: u32,
    pub score: u32,
    pub last_answer: Option<String>,
}

impl TaskSnapshot {
    /// Task state this record restores to.
    #[must_use]
    pub fn restored_state(&self) -> Option<TaskState> {
        if self.completed {
            Some(TaskState::AnsweredCorrect)
        } else if self.attempts >= MAX_ATTEMPTS {
            Some(TaskState::AnsweredIncorrectExhausted)
        } else if self.attempts > 0 {
            Some(TaskState::AnsweredIncorrectRetryable)
        } else {
            None
        }
    }
}

/// Prior progress on a lab, as held by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    pub status: LabStatus,
    pub total_time_seconds: u64,
    pub tasks: Vec<TaskSnapshot>,
}

//
// ─── COMPLETION ────────────────────────────────────────────────────────────────
//

/// Final result reported by the backend when a lab is completed.
///
/// Timestamps are the backend's local wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionReport {
    pub score: u32,
    pub max_score: u32,
    pub started_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
    pub total_time_seconds: u64,
}
