use thiserror::Error;

use crate::model::TaskNumber;

/// Bad local input. Shown inline next to the task.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("answer cannot be empty")]
    EmptyAnswer,

    #[error("task {0} does not exist in this lab")]
    UnknownTask(TaskNumber),

    #[error("\"{value}\" is not one of the options of task {task}")]
    UnknownOption { task: TaskNumber, value: String },

    #[error("task {task} expects a {expected} answer")]
    WrongKind {
        task: TaskNumber,
        expected: &'static str,
    },

    #[error("no answer has been entered for task {0}")]
    NoPendingAnswer(TaskNumber),
}

/// Action attempted while the task or session is in the wrong state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidStateError {
    #[error("task {0} is locked")]
    Locked(TaskNumber),

    #[error("task {0} is already finalized")]
    Finalized(TaskNumber),

    #[error("an answer for task {0} is already being checked")]
    InFlight(TaskNumber),

    #[error("the lab has not been started")]
    NotStarted,

    #[error("the lab is already completed")]
    SessionCompleted,

    #[error("{remaining} task(s) are still open")]
    TasksOpen { remaining: usize },
}

/// Errors emitted by the task progress controller and lab session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProgressError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),
}
