use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::ids::TaskNumber;

/// Attempts after which an incorrectly answered task is closed for good.
pub const MAX_ATTEMPTS: u32 = 10;

/// Highest score a single task can carry.
pub const MAX_TASK_SCORE: u32 = 10;

//
// ─── TASK KIND ─────────────────────────────────────────────────────────────────
//

/// How a task is answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// Pick exactly one of the listed literal answers.
    Choice { options: Vec<String> },
    /// Type an answer.
    FreeText,
}

impl TaskKind {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Choice { .. } => "choice",
            TaskKind::FreeText => "free-text",
        }
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        match self {
            TaskKind::Choice { options } => options,
            TaskKind::FreeText => &[],
        }
    }
}

//
// ─── TASK STATE ────────────────────────────────────────────────────────────────
//

/// Lifecycle of a single task inside a lab session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Locked,
    Available,
    AnsweredCorrect,
    AnsweredIncorrectRetryable,
    AnsweredIncorrectExhausted,
}

impl TaskState {
    /// Terminal states. A finalized task unlocks its successor.
    #[must_use]
    pub fn is_finalized(self) -> bool {
        matches!(
            self,
            TaskState::AnsweredCorrect | TaskState::AnsweredIncorrectExhausted
        )
    }

    #[must_use]
    pub fn is_unlocked(self) -> bool {
        !matches!(self, TaskState::Locked)
    }

    /// Whether an answer may be sent for a task in this state.
    #[must_use]
    pub fn accepts_submission(self) -> bool {
        matches!(
            self,
            TaskState::Available | TaskState::AnsweredIncorrectRetryable
        )
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            TaskState::Locked => "locked",
            TaskState::Available => "available",
            TaskState::AnsweredCorrect => "correct",
            TaskState::AnsweredIncorrectRetryable => "incorrect",
            TaskState::AnsweredIncorrectExhausted => "exhausted",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

//
// ─── TASK ──────────────────────────────────────────────────────────────────────
//

/// Validated, immutable definition of a gradable task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub number: TaskNumber,
    pub question: String,
    pub kind: TaskKind,
}

/// A task together with its client-side progress.
///
/// Scores and attempt counts are copied from backend verdicts and never
/// derived locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    definition: TaskDefinition,
    state: TaskState,
    attempts: u32,
    score: u32,
    last_submitted_answer: Option<String>,
    pending_answer: Option<String>,
    in_flight: bool,
}

impl Task {
    #[must_use]
    pub fn new(definition: TaskDefinition, state: TaskState) -> Self {
        Self {
            definition,
            state,
            attempts: 0,
            score: 0,
            last_submitted_answer: None,
            pending_answer: None,
            in_flight: false,
        }
    }

    #[must_use]
    pub fn number(&self) -> TaskNumber {
        self.definition.number
    }

    #[must_use]
    pub fn question(&self) -> &str {
        &self.definition.question
    }

    #[must_use]
    pub fn kind(&self) -> &TaskKind {
        &self.definition.kind
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        self.state
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Attempts left before the task is exhausted.
    #[must_use]
    pub fn attempts_remaining(&self) -> u32 {
        MAX_ATTEMPTS.saturating_sub(self.attempts)
    }

    #[must_use]
    pub fn score(&self) -> u32 {
        self.score
    }

    #[must_use]
    pub fn last_submitted_answer(&self) -> Option<&str> {
        self.last_submitted_answer.as_deref()
    }

    #[must_use]
    pub fn pending_answer(&self) -> Option<&str> {
        self.pending_answer.as_deref()
    }

    /// True while an answer for this task is being checked by the backend.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub(crate) fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    pub(crate) fn set_in_flight(&mut self, in_flight: bool) {
        self.in_flight = in_flight;
    }

    pub(crate) fn set_pending_answer(&mut self, answer: Option<String>) {
        self.pending_answer = answer;
    }

    pub(crate) fn record_result(
        &mut self,
        attempts: u32,
        score: u32,
        answer: Option<String>,
    ) {
        self.attempts = attempts.min(MAX_ATTEMPTS);
        self.score = score.min(MAX_TASK_SCORE);
        if answer.is_some() {
            self.last_submitted_answer = answer;
        }
    }
}
