mod dashboard;
mod ids;
mod lab;
mod progress;
mod task;

pub use ids::{LabId, ParseIdError, TaskNumber};

pub use dashboard::{DashboardLab, DashboardStats, StudentDashboard};
pub use lab::{Difficulty, InfoBlock, LabDefinition, LabDefinitionError, LabItem, LabSummary};
pub use progress::{
    CompletionReport, LabStatus, ParseStatusError, ProgressSnapshot, TaskSnapshot, Verdict,
};
pub use task::{MAX_ATTEMPTS, MAX_TASK_SCORE, Task, TaskDefinition, TaskKind, TaskState};
