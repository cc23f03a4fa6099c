//! Client-side task progression for one lab.
//!
//! Task 1 starts `Available`, every other task starts `Locked`. A task unlocks
//! once its predecessor is finalized, either answered correctly or out of
//! attempts. Scores and attempt counts always come from backend verdicts.
//!
//! ```
//! # use lab_core::model::{TaskDefinition, TaskKind, TaskNumber, TaskState, Verdict};
//! # use lab_core::progression::TaskProgressController;
//! let defs = (1..=2).map(|n| TaskDefinition {
//!     number: TaskNumber::new(n).unwrap(),
//!     question: format!("Q{n}"),
//!     kind: TaskKind::FreeText,
//! });
//! let mut controller = TaskProgressController::new(defs);
//! let second = TaskNumber::new(2).unwrap();
//! assert_eq!(controller.task(second).unwrap().state(), TaskState::Locked);
//!
//! let ticket = controller.begin_submission(TaskNumber::FIRST, "42").unwrap();
//! let verdict = Verdict { is_correct: true, completed: true, score: 10, attempts: 1 };
//! controller.apply_verdict(ticket, &verdict);
//! assert_eq!(controller.task(second).unwrap().state(), TaskState::Available);
//! ```

use crate::error::{InvalidStateError, ProgressError, ValidationError};
use crate::model::{
    Task, TaskDefinition, TaskKind, TaskNumber, TaskSnapshot, TaskState, Verdict,
};

//
// ─── CHANGES ───────────────────────────────────────────────────────────────────
//

/// A task whose state moved from one value to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub task: TaskNumber,
    pub from: TaskState,
    pub to: TaskState,
}

impl StateChange {
    /// A locked task became answerable.
    #[must_use]
    pub fn is_unlock(&self) -> bool {
        self.from == TaskState::Locked && self.to.is_unlocked()
    }
}

/// Result of applying a verdict to a submitted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub task: TaskNumber,
    pub verdict: Verdict,
    pub state: TaskState,
    /// Every state change caused by the verdict, the submitted task first.
    pub changes: Vec<StateChange>,
}

impl SubmissionOutcome {
    /// Tasks that went from `Locked` to `Available`.
    #[must_use]
    pub fn unlocked(&self) -> Vec<TaskNumber> {
        self.changes
            .iter()
            .filter(|c| c.from == TaskState::Locked && c.to.is_unlocked())
            .map(|c| c.task)
            .collect()
    }
}

/// Proof that a submission was accepted locally and is awaiting a verdict.
///
/// Must be handed back through `apply_verdict` or `abort_submission`; until
/// then the task rejects further submissions and edits.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct SubmissionTicket {
    task: TaskNumber,
    answer: String,
}

impl SubmissionTicket {
    #[must_use]
    pub fn task(&self) -> TaskNumber {
        self.task
    }

    #[must_use]
    pub fn answer(&self) -> &str {
        &self.answer
    }
}

/// Aggregated view of task progress, useful for UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProgress {
    pub total: usize,
    pub correct: usize,
    pub exhausted: usize,
    pub open: usize,
    pub locked: usize,
    pub score: u32,
}

//
// ─── CONTROLLER ────────────────────────────────────────────────────────────────
//

/// Owns the ordered tasks of one lab and enforces the unlock rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskProgressController {
    tasks: Vec<Task>,
}

impl TaskProgressController {
    /// Build a controller from validated definitions numbered `1..=n` in order.
    #[must_use]
    pub fn new(definitions: impl IntoIterator<Item = TaskDefinition>) -> Self {
        let tasks = definitions
            .into_iter()
            .enumerate()
            .map(|(index, definition)| {
                let state = if index == 0 {
                    TaskState::Available
                } else {
                    TaskState::Locked
                };
                Task::new(definition, state)
            })
            .collect();
        Self { tasks }
    }

    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    #[must_use]
    pub fn task(&self, number: TaskNumber) -> Option<&Task> {
        self.tasks.get(number.index())
    }

    fn task_mut(&mut self, number: TaskNumber) -> Result<&mut Task, ValidationError> {
        self.tasks
            .get_mut(number.index())
            .ok_or(ValidationError::UnknownTask(number))
    }

    /// Every task has been answered correctly.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.tasks
            .iter()
            .all(|task| task.state() == TaskState::AnsweredCorrect)
    }

    /// Every task is either correct or out of attempts.
    #[must_use]
    pub fn all_finalized(&self) -> bool {
        self.open_count() == 0
    }

    fn open_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|task| !task.state().is_finalized())
            .count()
    }

    #[must_use]
    pub fn progress(&self) -> TaskProgress {
        let mut progress = TaskProgress {
            total: self.tasks.len(),
            correct: 0,
            exhausted: 0,
            open: 0,
            locked: 0,
            score: 0,
        };
        for task in &self.tasks {
            match task.state() {
                TaskState::AnsweredCorrect => progress.correct += 1,
                TaskState::AnsweredIncorrectExhausted => progress.exhausted += 1,
                TaskState::Locked => progress.locked += 1,
                TaskState::Available | TaskState::AnsweredIncorrectRetryable => {
                    progress.open += 1;
                }
            }
            if task.state() == TaskState::AnsweredCorrect {
                progress.score = progress.score.saturating_add(task.score());
            }
        }
        progress
    }

    /// Store the chosen option as the pending answer of a choice task.
    ///
    /// # Errors
    ///
    /// `ValidationError` for unknown tasks, non-choice tasks or values that are
    /// not among the options; `InvalidStateError` when the task is locked,
    /// finalized or being checked.
    pub fn select_choice(
        &mut self,
        number: TaskNumber,
        value: &str,
    ) -> Result<Option<StateChange>, ProgressError> {
        let task = self.editable_task(number)?;
        match task.kind() {
            TaskKind::Choice { options } => {
                if !options.iter().any(|option| option == value) {
                    return Err(ValidationError::UnknownOption {
                        task: number,
                        value: value.to_string(),
                    }
                    .into());
                }
            }
            TaskKind::FreeText => {
                return Err(ValidationError::WrongKind {
                    task: number,
                    expected: TaskKind::FreeText.label(),
                }
                .into());
            }
        }
        Ok(Self::store_pending(task, value.to_string()))
    }

    /// Store typed text as the pending answer of a free-text task.
    ///
    /// Empty text is accepted here; it is rejected on submission.
    ///
    /// # Errors
    ///
    /// Same as [`Self::select_choice`], minus the option check.
    pub fn set_free_text(
        &mut self,
        number: TaskNumber,
        value: &str,
    ) -> Result<Option<StateChange>, ProgressError> {
        let task = self.editable_task(number)?;
        if let TaskKind::Choice { .. } = task.kind() {
            return Err(ValidationError::WrongKind {
                task: number,
                expected: "choice",
            }
            .into());
        }
        Ok(Self::store_pending(task, value.to_string()))
    }

    fn editable_task(&mut self, number: TaskNumber) -> Result<&mut Task, ProgressError> {
        let task = self.task_mut(number)?;
        check_open(task)?;
        Ok(task)
    }

    // An edit after an incorrect answer clears the stale marker; attempts stay.
    fn store_pending(task: &mut Task, value: String) -> Option<StateChange> {
        task.set_pending_answer(Some(value));
        if task.state() == TaskState::AnsweredIncorrectRetryable {
            task.set_state(TaskState::Available);
            return Some(StateChange {
                task: task.number(),
                from: TaskState::AnsweredIncorrectRetryable,
                to: TaskState::Available,
            });
        }
        None
    }

    /// Accept an answer for sending and mark the task in flight.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` if the task is locked, finalized or already in
    /// flight; `ValidationError` if the trimmed answer is empty. Nothing is
    /// mutated on error.
    pub fn begin_submission(
        &mut self,
        number: TaskNumber,
        answer: &str,
    ) -> Result<SubmissionTicket, ProgressError> {
        let task = self.task_mut(number)?;
        check_open(task)?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(ValidationError::EmptyAnswer.into());
        }
        task.set_in_flight(true);
        Ok(SubmissionTicket {
            task: number,
            answer: answer.to_string(),
        })
    }

    /// Like [`Self::begin_submission`], using the task's pending answer.
    ///
    /// # Errors
    ///
    /// `ValidationError::NoPendingAnswer` when nothing was entered, otherwise
    /// as [`Self::begin_submission`].
    pub fn begin_pending_submission(
        &mut self,
        number: TaskNumber,
    ) -> Result<SubmissionTicket, ProgressError> {
        let pending = self
            .task(number)
            .ok_or(ValidationError::UnknownTask(number))?
            .pending_answer()
            .map(str::to_string)
            .ok_or(ValidationError::NoPendingAnswer(number))?;
        self.begin_submission(number, &pending)
    }

    /// Apply the backend verdict for a ticket and re-derive unlock state.
    pub fn apply_verdict(
        &mut self,
        ticket: SubmissionTicket,
        verdict: &Verdict,
    ) -> SubmissionOutcome {
        let SubmissionTicket { task: number, answer } = ticket;
        let state = verdict.resulting_state();
        let mut changes = Vec::new();

        if let Some(task) = self.tasks.get_mut(number.index()) {
            let from = task.state();
            task.set_in_flight(false);
            task.record_result(verdict.attempts, verdict.score, Some(answer));
            task.set_state(state);
            if state.is_finalized() {
                task.set_pending_answer(None);
            }
            changes.push(StateChange {
                task: number,
                from,
                to: state,
            });
        }

        if verdict.completed {
            if let Some(next) = number.next().and_then(|n| self.tasks.get_mut(n.index())) {
                if next.state() == TaskState::Locked {
                    next.set_state(TaskState::Available);
                    changes.push(StateChange {
                        task: next.number(),
                        from: TaskState::Locked,
                        to: TaskState::Available,
                    });
                }
            }
        }

        changes.extend(self.recompute_unlocks());

        SubmissionOutcome {
            task: number,
            verdict: verdict.clone(),
            state,
            changes,
        }
    }

    /// Release a ticket without a verdict; the task keeps its prior state.
    pub fn abort_submission(&mut self, ticket: SubmissionTicket) {
        if let Some(task) = self.tasks.get_mut(ticket.task.index()) {
            task.set_in_flight(false);
        }
    }

    /// Rebuild task state from a backend progress snapshot.
    ///
    /// Records for unknown task numbers are ignored.
    pub fn restore(&mut self, snapshot: &[TaskSnapshot]) -> Vec<StateChange> {
        let mut changes = Vec::new();
        for record in snapshot {
            let Some(task) = self.tasks.get_mut(record.number.index()) else {
                continue;
            };
            task.record_result(record.attempts, record.score, record.last_answer.clone());
            if let Some(state) = record.restored_state() {
                let from = task.state();
                if from != state {
                    task.set_state(state);
                    changes.push(StateChange {
                        task: record.number,
                        from,
                        to: state,
                    });
                }
            }
        }
        changes.extend(self.recompute_unlocks());
        changes
    }

    /// Re-derive `Locked`/`Available` for every task from its predecessor.
    ///
    /// Idempotent. Answered tasks are never relocked.
    pub fn recompute_unlocks(&mut self) -> Vec<StateChange> {
        let mut changes = Vec::new();
        let mut predecessor_finalized = true;
        for task in &mut self.tasks {
            let from = task.state();
            let to = match from {
                TaskState::Locked if predecessor_finalized => TaskState::Available,
                TaskState::Available if !predecessor_finalized && !task.is_in_flight() => {
                    TaskState::Locked
                }
                other => other,
            };
            if to != from {
                task.set_state(to);
                changes.push(StateChange {
                    task: task.number(),
                    from,
                    to,
                });
            }
            predecessor_finalized = to.is_finalized();
        }
        changes
    }

    pub(crate) fn ensure_all_finalized(&self) -> Result<(), InvalidStateError> {
        match self.open_count() {
            0 => Ok(()),
            remaining => Err(InvalidStateError::TasksOpen { remaining }),
        }
    }
}

fn check_open(task: &Task) -> Result<(), InvalidStateError> {
    let number = task.number();
    if task.is_in_flight() {
        return Err(InvalidStateError::InFlight(number));
    }
    if task.state().accepts_submission() {
        Ok(())
    } else if task.state() == TaskState::Locked {
        Err(InvalidStateError::Locked(number))
    } else {
        Err(InvalidStateError::Finalized(number))
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
