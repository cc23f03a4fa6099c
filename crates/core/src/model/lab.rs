use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::model::ids::{LabId, TaskNumber};
use crate::model::task::{TaskDefinition, TaskKind};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Reasons a lab definition received from the backend is rejected at load time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LabDefinitionError {
    #[error("lab title cannot be empty")]
    EmptyTitle,

    #[error("task {task} has an empty question")]
    EmptyQuestion { task: TaskNumber },

    #[error("choice task {task} needs at least two options")]
    TooFewOptions { task: TaskNumber },

    #[error("choice task {task} has an empty option")]
    EmptyOption { task: TaskNumber },

    #[error("choice task {task} has an option with surrounding whitespace: \"{option}\"")]
    UntrimmedOption { task: TaskNumber, option: String },

    #[error("choice task {task} lists \"{option}\" more than once")]
    DuplicateOption { task: TaskNumber, option: String },

    #[error("task number {task} appears more than once")]
    DuplicateTaskNumber { task: TaskNumber },

    #[error("task numbers must run from 1 without gaps; missing {expected}")]
    MissingTaskNumber { expected: u32 },

    #[error("info block title cannot be empty")]
    EmptyInfoTitle,

    #[error("unknown difficulty: {0}")]
    UnknownDifficulty(String),
}

//
// ─── SUMMARY ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl FromStr for Difficulty {
    type Err = LabDefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(LabDefinitionError::UnknownDifficulty(other.to_string())),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalogue entry for a lab, as listed to students.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabSummary {
    pub id: LabId,
    pub title: String,
    pub description: Option<String>,
    /// Ordinal shown to students; 0 is the ungraded preparation stage.
    pub lab_number: u32,
    pub difficulty: Difficulty,
    pub max_score: u32,
    pub order: u32,
}

impl LabSummary {
    /// The preparation stage carries no score.
    #[must_use]
    pub fn is_preparation(&self) -> bool {
        self.lab_number == 0
    }
}

//
// ─── ITEMS ─────────────────────────────────────────────────────────────────────
//

/// Reading material shown alongside the tasks. Not gradable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoBlock {
    pub title: String,
    /// HTML as authored on the backend.
    pub body: String,
}

/// One entry of a lab's content, in authoring order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabItem {
    Task(TaskDefinition),
    Info(InfoBlock),
}

//
// ─── DEFINITION ────────────────────────────────────────────────────────────────
//

/// A lab whose content passed load-time validation.
///
/// Gradable tasks are numbered `1..=n` without gaps and are kept sorted by
/// number; info blocks keep their authoring order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabDefinition {
    summary: LabSummary,
    tasks: Vec<TaskDefinition>,
    info: Vec<InfoBlock>,
}

impl LabDefinition {
    /// Validate raw lab content.
    ///
    /// # Errors
    ///
    /// Returns `LabDefinitionError` when the title, a question, an option list
    /// or the task numbering is malformed.
    pub fn new(summary: LabSummary, items: Vec<LabItem>) -> Result<Self, LabDefinitionError> {
        if summary.title.trim().is_empty() {
            return Err(LabDefinitionError::EmptyTitle);
        }

        let mut tasks = Vec::new();
        let mut info = Vec::new();
        for item in items {
            match item {
                LabItem::Task(task) => {
                    validate_task(&task)?;
                    tasks.push(task);
                }
                LabItem::Info(block) => {
                    if block.title.trim().is_empty() {
                        return Err(LabDefinitionError::EmptyInfoTitle);
                    }
                    info.push(block);
                }
            }
        }

        tasks.sort_by_key(|task| task.number);
        for (index, task) in tasks.iter().enumerate() {
            let expected = TaskNumber::from_index(index)
                .ok_or(LabDefinitionError::DuplicateTaskNumber { task: task.number })?;
            if task.number < expected {
                return Err(LabDefinitionError::DuplicateTaskNumber { task: task.number });
            }
            if task.number > expected {
                return Err(LabDefinitionError::MissingTaskNumber {
                    expected: expected.value(),
                });
            }
        }

        Ok(Self {
            summary,
            tasks,
            info,
        })
    }

    #[must_use]
    pub fn id(&self) -> LabId {
        self.summary.id
    }

    #[must_use]
    pub fn summary(&self) -> &LabSummary {
        &self.summary
    }

    #[must_use]
    pub fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    #[must_use]
    pub fn info_blocks(&self) -> &[InfoBlock] {
        &self.info
    }

    pub(crate) fn into_parts(self) -> (LabSummary, Vec<TaskDefinition>, Vec<InfoBlock>) {
        (self.summary, self.tasks, self.info)
    }
}

fn validate_task(task: &TaskDefinition) -> Result<(), LabDefinitionError> {
    if task.question.trim().is_empty() {
        return Err(LabDefinitionError::EmptyQuestion { task: task.number });
    }

    if let TaskKind::Choice { options } = &task.kind {
        if options.len() < 2 {
            return Err(LabDefinitionError::TooFewOptions { task: task.number });
        }
        let mut seen = HashSet::with_capacity(options.len());
        for option in options {
            if option.trim().is_empty() {
                return Err(LabDefinitionError::EmptyOption { task: task.number });
            }
            if option.trim() != option {
                return Err(LabDefinitionError::UntrimmedOption {
                    task: task.number,
                    option: option.clone(),
                });
            }
            if !seen.insert(option.as_str()) {
                return Err(LabDefinitionError::DuplicateOption {
                    task: task.number,
                    option: option.clone(),
                });
            }
        }
    }

    Ok(())
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
