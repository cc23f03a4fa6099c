//! Access to the lab backend.
//!
//! The backend owns grading, scoring and persistence; the client only relays
//! answers and mirrors the verdicts it gets back.

mod http;
mod memory;
mod wire;

use async_trait::async_trait;
use lab_core::model::{
    CompletionReport, LabId, LabItem, LabSummary, ProgressSnapshot, StudentDashboard, TaskNumber,
    Verdict,
};

use crate::error::GatewayError;

pub use http::HttpGateway;
pub use memory::{DEMO_PASSWORD, DEMO_USERNAME, InMemoryGateway, SeedItem, SeedLab};

/// The signed-in account as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentAccount {
    pub id: u64,
    pub username: String,
    pub name: String,
    pub role: String,
    pub group: Option<String>,
}

/// Raw lab content; validated into a `LabDefinition` by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabContent {
    pub summary: LabSummary,
    pub items: Vec<LabItem>,
}

/// Names of gateway operations, used for logging and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayCall {
    Login,
    Logout,
    ListLabs,
    FetchLab,
    FetchProgress,
    StartLab,
    CheckAnswer,
    UpdateTime,
    CompleteLab,
    Dashboard,
}

impl GatewayCall {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            GatewayCall::Login => "login",
            GatewayCall::Logout => "logout",
            GatewayCall::ListLabs => "list_labs",
            GatewayCall::FetchLab => "fetch_lab",
            GatewayCall::FetchProgress => "fetch_progress",
            GatewayCall::StartLab => "start_lab",
            GatewayCall::CheckAnswer => "check_answer",
            GatewayCall::UpdateTime => "update_time",
            GatewayCall::CompleteLab => "complete_lab",
            GatewayCall::Dashboard => "dashboard",
        }
    }
}

/// Backend contract used by the lab workflow.
#[async_trait]
pub trait LabGateway: Send + Sync {
    /// # Errors
    ///
    /// Returns `GatewayError` on rejected credentials or transport failures.
    async fn login(&self, username: &str, password: &str) -> Result<StudentAccount, GatewayError>;

    /// # Errors
    ///
    /// Returns `GatewayError` on transport failures.
    async fn logout(&self) -> Result<(), GatewayError>;

    /// Active labs in display order.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` on transport or decode failures.
    async fn list_labs(&self) -> Result<Vec<LabSummary>, GatewayError>;

    /// # Errors
    ///
    /// Returns `GatewayError` if the lab is unknown or its content cannot be decoded.
    async fn fetch_lab(&self, lab: LabId) -> Result<LabContent, GatewayError>;

    /// Prior progress, or `None` when the student never worked on the lab.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` on transport or decode failures.
    async fn fetch_progress(&self, lab: LabId) -> Result<Option<ProgressSnapshot>, GatewayError>;

    /// # Errors
    ///
    /// Returns `GatewayError`, e.g. when the previous lab is not completed yet.
    async fn start_lab(&self, lab: LabId) -> Result<(), GatewayError>;

    /// Submit one answer and get the authoritative verdict.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` if the backend refuses the answer or is unreachable.
    async fn check_answer(
        &self,
        lab: LabId,
        task: TaskNumber,
        answer: &str,
    ) -> Result<Verdict, GatewayError>;

    /// # Errors
    ///
    /// Returns `GatewayError` on transport failures.
    async fn update_time(&self, lab: LabId, elapsed_seconds: u64) -> Result<(), GatewayError>;

    /// # Errors
    ///
    /// Returns `GatewayError` if the lab is not in progress or on transport failures.
    async fn complete_lab(
        &self,
        lab: LabId,
        total_time_seconds: u64,
    ) -> Result<CompletionReport, GatewayError>;

    /// # Errors
    ///
    /// Returns `GatewayError` on transport or decode failures.
    async fn dashboard(&self) -> Result<StudentDashboard, GatewayError>;
}
