//! JSON shapes exchanged with the lab backend.

use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use lab_core::model::{
    CompletionReport, DashboardLab, DashboardStats, Difficulty, InfoBlock, LabId, LabItem,
    LabStatus, LabSummary, ProgressSnapshot, StudentDashboard, TaskDefinition, TaskKind,
    TaskNumber, TaskSnapshot, Verdict,
};

use super::{LabContent, StudentAccount};
use crate::error::GatewayError;

fn malformed(err: impl std::fmt::Display) -> GatewayError {
    GatewayError::Malformed(err.to_string())
}

/// Unwrap the `{ "success": .., "error": .. }` envelope and decode the rest.
///
/// A body without `success` is accepted as successful.
pub(crate) fn decode<T: DeserializeOwned>(body: Value) -> Result<T, GatewayError> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(GatewayError::Rejected(error_message(&body)));
    }
    serde_json::from_value(body).map_err(malformed)
}

/// The backend's `error` text, or a generic fallback.
pub(crate) fn error_message(body: &Value) -> String {
    body.get("error")
        .and_then(Value::as_str)
        .unwrap_or("request failed")
        .to_string()
}

fn task_number(raw: u32) -> Result<TaskNumber, GatewayError> {
    TaskNumber::new(raw).ok_or_else(|| malformed("task_number must be positive"))
}

fn parse_timestamp(raw: Option<&str>) -> Result<Option<NaiveDateTime>, GatewayError> {
    raw.map(|value| value.parse::<NaiveDateTime>().map_err(malformed))
        .transpose()
}

//
// ─── REQUESTS ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct CheckAnswerRequest<'a> {
    pub task_number: u32,
    pub answer: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdateTimeRequest {
    pub elapsed_time: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct CompleteRequest {
    pub total_time: u64,
}

//
// ─── ACCOUNTS ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    user: WireUser,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: u64,
    username: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    group: Option<String>,
}

impl From<LoginResponse> for StudentAccount {
    fn from(response: LoginResponse) -> Self {
        let user = response.user;
        Self {
            id: user.id,
            name: user.name.unwrap_or_else(|| user.username.clone()),
            username: user.username,
            role: user.role.unwrap_or_default(),
            group: user.group,
        }
    }
}

//
// ─── LABS ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Deserialize)]
pub(crate) struct WireLabSummary {
    id: u64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    lab_number: u32,
    difficulty: String,
    #[serde(default)]
    max_score: Option<u32>,
    order: u32,
}

impl TryFrom<WireLabSummary> for LabSummary {
    type Error = GatewayError;

    fn try_from(wire: WireLabSummary) -> Result<Self, Self::Error> {
        Ok(Self {
            id: LabId::new(wire.id),
            title: wire.title,
            description: wire.description.filter(|d| !d.trim().is_empty()),
            lab_number: wire.lab_number,
            difficulty: wire.difficulty.parse::<Difficulty>().map_err(malformed)?,
            max_score: wire.max_score.unwrap_or(0),
            order: wire.order,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct LabListResponse {
    labs: Vec<WireLabSummary>,
}

impl LabListResponse {
    /// Summaries sorted by display order.
    pub(crate) fn into_summaries(self) -> Result<Vec<LabSummary>, GatewayError> {
        let mut labs = self
            .labs
            .into_iter()
            .map(LabSummary::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        labs.sort_by_key(|lab| lab.order);
        Ok(labs)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct LabResponse {
    lab: WireLab,
}

#[derive(Debug, Deserialize)]
struct WireLab {
    #[serde(flatten)]
    summary: WireLabSummary,
    #[serde(default, alias = "content")]
    tasks: Option<WireContent>,
}

/// Lab content either inline or as the JSON-encoded string stored by the backend.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireContent {
    Items(Vec<WireItem>),
    Encoded(String),
}

impl WireContent {
    fn into_items(self) -> Result<Vec<WireItem>, GatewayError> {
        match self {
            WireContent::Items(items) => Ok(items),
            WireContent::Encoded(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            WireContent::Encoded(raw) => serde_json::from_str(&raw).map_err(malformed),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireItem {
    Question {
        task_number: u32,
        question: String,
        answers: Vec<String>,
    },
    Input {
        task_number: u32,
        question: String,
    },
    Info {
        #[serde(default)]
        title: String,
        #[serde(default)]
        content: String,
    },
}

impl TryFrom<WireItem> for LabItem {
    type Error = GatewayError;

    fn try_from(item: WireItem) -> Result<Self, Self::Error> {
        Ok(match item {
            WireItem::Question {
                task_number: number,
                question,
                answers,
            } => LabItem::Task(TaskDefinition {
                number: task_number(number)?,
                question,
                kind: TaskKind::Choice { options: answers },
            }),
            WireItem::Input {
                task_number: number,
                question,
            } => LabItem::Task(TaskDefinition {
                number: task_number(number)?,
                question,
                kind: TaskKind::FreeText,
            }),
            WireItem::Info { title, content } => LabItem::Info(InfoBlock {
                title,
                body: content,
            }),
        })
    }
}

impl TryFrom<LabResponse> for LabContent {
    type Error = GatewayError;

    fn try_from(response: LabResponse) -> Result<Self, Self::Error> {
        let items = match response.lab.tasks {
            Some(content) => content.into_items()?,
            None => Vec::new(),
        };
        Ok(Self {
            summary: LabSummary::try_from(response.lab.summary)?,
            items: items
                .into_iter()
                .map(LabItem::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}

//
// ─── PROGRESS ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Deserialize)]
pub(crate) struct ProgressResponse {
    progress: WireProgress,
}

#[derive(Debug, Deserialize)]
struct WireProgress {
    status: String,
    #[serde(default)]
    total_time: Option<u64>,
    #[serde(default)]
    completed_tasks: Vec<WireTaskData>,
}

#[derive(Debug, Deserialize)]
struct WireTaskData {
    task_number: u32,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    attempts: u32,
    #[serde(default)]
    last_answer: Option<String>,
    #[serde(default)]
    score: u32,
}

impl TryFrom<WireTaskData> for TaskSnapshot {
    type Error = GatewayError;

    fn try_from(wire: WireTaskData) -> Result<Self, Self::Error> {
        Ok(Self {
            number: task_number(wire.task_number)?,
            completed: wire.completed,
            attempts: wire.attempts,
            score: wire.score,
            last_answer: wire.last_answer,
        })
    }
}

impl TryFrom<ProgressResponse> for ProgressSnapshot {
    type Error = GatewayError;

    fn try_from(response: ProgressResponse) -> Result<Self, Self::Error> {
        let progress = response.progress;
        Ok(Self {
            status: progress.status.parse::<LabStatus>().map_err(malformed)?,
            total_time_seconds: progress.total_time.unwrap_or(0),
            tasks: progress
                .completed_tasks
                .into_iter()
                .map(TaskSnapshot::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CheckAnswerResponse {
    is_correct: bool,
    task_data: WireTaskData,
}

impl From<CheckAnswerResponse> for Verdict {
    fn from(response: CheckAnswerResponse) -> Self {
        Self {
            is_correct: response.is_correct,
            completed: response.task_data.completed,
            score: response.task_data.score,
            attempts: response.task_data.attempts,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompleteResponse {
    score: u32,
    max_score: u32,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
    #[serde(default)]
    total_time: Option<u64>,
}

impl CompleteResponse {
    /// Convert, falling back to the submitted time when the backend omits it.
    pub(crate) fn into_report(self, submitted_seconds: u64) -> Result<CompletionReport, GatewayError> {
        Ok(CompletionReport {
            score: self.score,
            max_score: self.max_score,
            started_at: parse_timestamp(self.start_time.as_deref())?,
            ended_at: parse_timestamp(self.end_time.as_deref())?,
            total_time_seconds: self.total_time.unwrap_or(submitted_seconds),
        })
    }
}

//
// ─── DASHBOARD ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Deserialize)]
pub(crate) struct DashboardResponse {
    stats: WireStats,
    #[serde(default)]
    labs: Vec<WireDashboardLab>,
}

#[derive(Debug, Deserialize)]
struct WireStats {
    total_labs: u32,
    completed_labs: u32,
    success_rate: f64,
    average_score: f64,
}

#[derive(Debug, Deserialize)]
struct WireDashboardLab {
    #[serde(flatten)]
    summary: WireLabSummary,
    status: String,
    #[serde(default)]
    score: u32,
    can_start: bool,
}

impl TryFrom<DashboardResponse> for StudentDashboard {
    type Error = GatewayError;

    fn try_from(response: DashboardResponse) -> Result<Self, Self::Error> {
        let labs = response
            .labs
            .into_iter()
            .map(|lab| {
                Ok(DashboardLab {
                    summary: LabSummary::try_from(lab.summary)?,
                    status: lab.status.parse::<LabStatus>().map_err(malformed)?,
                    score: lab.score,
                    can_start: lab.can_start,
                })
            })
            .collect::<Result<_, GatewayError>>()?;
        Ok(Self {
            stats: DashboardStats {
                total_labs: response.stats.total_labs,
                completed_labs: response.stats.completed_labs,
                success_rate: response.stats.success_rate,
                average_score: response.stats.average_score,
            },
            labs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn n(value: u32) -> TaskNumber {
        TaskNumber::new(value).unwrap()
    }

    #[test]
    fn success_false_is_rejected_even_with_payload() {
        let body = json!({"success": false, "error": "Сначала выполните предыдущее задание"});
        let err = decode::<CheckAnswerResponse>(body).unwrap_err();
        match err {
            GatewayError::Rejected(message) => {
                assert_eq!(message, "Сначала выполните предыдущее задание");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_fields_are_malformed() {
        let err = decode::<CheckAnswerResponse>(json!({"success": true})).unwrap_err();
        assert!(matches!(err, GatewayError::Malformed(_)));
    }

    #[test]
    fn check_answer_maps_to_verdict() {
        let body = json!({
            "success": true,
            "is_correct": false,
            "task_data": {
                "task_number": 2,
                "completed": false,
                "attempts": 3,
                "last_answer": "vim /etc/logcheck.conf",
                "score": 8,
                "unlocked_next": false
            }
        });
        let verdict: Verdict = decode::<CheckAnswerResponse>(body).unwrap().into();
        assert_eq!(
            verdict,
            Verdict {
                is_correct: false,
                completed: false,
                score: 8,
                attempts: 3
            }
        );
    }

    #[test]
    fn lab_content_decodes_all_item_kinds() {
        let body = json!({
            "success": true,
            "lab": {
                "id": 3,
                "title": "Практическая работа №2",
                "description": "Несанкционированный доступ",
                "lab_number": 2,
                "difficulty": "medium",
                "max_score": 30,
                "order": 3,
                "content": [
                    {"type": "info", "title": "Intro", "content": "<p>Read me</p>"},
                    {"type": "question", "task_number": 1, "question": "Attempts?",
                     "answers": ["5", "7", "10", "3"], "correct_answer": "7"},
                    {"type": "input", "task_number": 2, "question": "deny=?",
                     "correct_answer": "3"}
                ]
            }
        });
        let content = LabContent::try_from(decode::<LabResponse>(body).unwrap()).unwrap();
        assert_eq!(content.summary.id, LabId::new(3));
        assert_eq!(content.summary.difficulty, Difficulty::Medium);
        assert_eq!(content.items.len(), 3);
        assert!(matches!(&content.items[0], LabItem::Info(block) if block.title == "Intro"));
        assert!(matches!(
            &content.items[1],
            LabItem::Task(TaskDefinition { kind: TaskKind::Choice { options }, .. }) if options.len() == 4
        ));
        assert!(matches!(
            &content.items[2],
            LabItem::Task(TaskDefinition { kind: TaskKind::FreeText, number, .. }) if *number == n(2)
        ));
    }

    #[test]
    fn encoded_content_string_is_accepted() {
        let encoded = json!([{"type": "input", "task_number": 1, "question": "Q"}]).to_string();
        let body = json!({
            "success": true,
            "lab": {"id": 1, "title": "Prep", "lab_number": 0, "difficulty": "easy",
                    "order": 1, "content": encoded}
        });
        let content = LabContent::try_from(decode::<LabResponse>(body).unwrap()).unwrap();
        assert_eq!(content.items.len(), 1);
        assert_eq!(content.summary.max_score, 0);
    }

    #[test]
    fn unknown_item_type_is_malformed() {
        let body = json!({
            "success": true,
            "lab": {"id": 1, "title": "X", "lab_number": 1, "difficulty": "easy", "order": 1,
                    "content": [{"type": "essay", "task_number": 1}]}
        });
        assert!(decode::<LabResponse>(body).is_err());
    }

    #[test]
    fn zero_task_number_is_malformed() {
        let body = json!({
            "success": true,
            "lab": {"id": 1, "title": "X", "lab_number": 1, "difficulty": "easy", "order": 1,
                    "content": [{"type": "input", "task_number": 0, "question": "Q"}]}
        });
        let err = LabContent::try_from(decode::<LabResponse>(body).unwrap()).unwrap_err();
        assert!(matches!(err, GatewayError::Malformed(_)));
    }

    #[test]
    fn progress_snapshot_decodes() {
        let body = json!({
            "success": true,
            "progress": {
                "id": 4, "student_id": 2, "lab_id": 2,
                "status": "in_progress", "score": 0, "attempts": 0,
                "start_time": "2024-03-01T09:00:00", "end_time": null,
                "total_time": 95,
                "completed_tasks": [
                    {"task_number": 1, "completed": true, "attempts": 2,
                     "last_answer": "190902", "score": 9, "unlocked_next": true}
                ]
            }
        });
        let snapshot = ProgressSnapshot::try_from(decode::<ProgressResponse>(body).unwrap()).unwrap();
        assert_eq!(snapshot.status, LabStatus::InProgress);
        assert_eq!(snapshot.total_time_seconds, 95);
        assert_eq!(snapshot.tasks.len(), 1);
        assert_eq!(snapshot.tasks[0].score, 9);
    }

    #[test]
    fn completion_parses_backend_timestamps() {
        let body = json!({
            "success": true, "message": "done",
            "score": 27, "max_score": 30,
            "start_time": "2024-03-01T12:00:00.123456",
            "end_time": "2024-03-01T12:20:00",
            "total_time": 1200
        });
        let report = decode::<CompleteResponse>(body).unwrap().into_report(999).unwrap();
        assert_eq!(report.score, 27);
        assert_eq!(report.total_time_seconds, 1200);
        assert_eq!(
            report.ended_at.map(|t| t.to_string()),
            Some("2024-03-01 12:20:00".to_string())
        );
    }

    #[test]
    fn dashboard_decodes_stats_and_labs() {
        let body = json!({
            "success": true,
            "user": {"id": 2, "username": "student"},
            "stats": {"total_labs": 2, "completed_labs": 1, "success_rate": 50.0, "average_score": 27},
            "labs": [
                {"id": 1, "title": "Prep", "description": null, "lab_number": 0,
                 "difficulty": "easy", "max_score": 0, "order": 1,
                 "status": "completed", "score": 0, "can_start": true},
                {"id": 2, "title": "Lab 1", "description": "d", "lab_number": 1,
                 "difficulty": "medium", "max_score": 30, "order": 2,
                 "status": "not_started", "score": 0, "can_start": true}
            ]
        });
        let dashboard = StudentDashboard::try_from(decode::<DashboardResponse>(body).unwrap()).unwrap();
        assert_eq!(dashboard.stats.completed_labs, 1);
        assert!((dashboard.stats.average_score - 27.0).abs() < f64::EPSILON);
        assert_eq!(
            dashboard.next_open_lab().map(|lab| lab.summary.id),
            Some(LabId::new(2))
        );
    }

    #[test]
    fn login_falls_back_to_username_for_name() {
        let body = json!({"success": true, "user": {"id": 7, "username": "student", "role": "student"}});
        let account: StudentAccount = decode::<LoginResponse>(body).unwrap().into();
        assert_eq!(account.name, "student");
        assert_eq!(account.role, "student");
    }
}
