use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use reqwest::StatusCode;

use lab_core::Clock;
use lab_core::model::{
    CompletionReport, DashboardLab, DashboardStats, Difficulty, InfoBlock, LabId, LabItem,
    LabStatus, LabSummary, MAX_ATTEMPTS, MAX_TASK_SCORE, ProgressSnapshot, StudentDashboard,
    TaskDefinition, TaskKind, TaskNumber, TaskSnapshot, Verdict,
};

use super::{GatewayCall, LabContent, LabGateway, StudentAccount};
use crate::error::GatewayError;

/// Offset of the backend's reporting timezone (Moscow time).
const REPORT_OFFSET_HOURS: i64 = 3;

/// Credentials of the account registered by [`InMemoryGateway::seeded`].
pub const DEMO_USERNAME: &str = "student";
pub const DEMO_PASSWORD: &str = "student123";

//
// ─── SEED DATA ─────────────────────────────────────────────────────────────────
//

/// One entry of a seeded lab, including the expected answer for tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedItem {
    /// Graded by exact comparison.
    Choice {
        number: u32,
        question: String,
        options: Vec<String>,
        correct: String,
    },
    /// Graded ignoring surrounding whitespace and case.
    FreeText {
        number: u32,
        question: String,
        correct: String,
    },
    Info {
        title: String,
        body: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedLab {
    pub summary: LabSummary,
    pub items: Vec<SeedItem>,
}

impl SeedLab {
    /// The preparation stage and the two graded practical works.
    #[must_use]
    pub fn standard_course() -> Vec<SeedLab> {
        vec![
            SeedLab {
                summary: summary(1, "Preparation", 0, Difficulty::Easy, 0, 1),
                items: vec![SeedItem::Info {
                    title: "Preparation".into(),
                    body: "<h3>Email notifications</h3>\
                           <p>Log in as <strong>kali</strong> with password 190902.</p>\
                           <p>Run <code>sudo nano /etc/logcheck/logcheck.conf</code> and set your email.</p>"
                        .into(),
                }],
            },
            SeedLab {
                summary: summary(2, "Practical work 1", 1, Difficulty::Medium, 30, 2),
                items: vec![
                    choice(
                        1,
                        "Which password is used for the kali account?",
                        &["190902", "123456", "password", "kali123"],
                        "190902",
                    ),
                    choice(
                        2,
                        "Which command edits the logcheck configuration?",
                        &[
                            "sudo nano /etc/logcheck/logcheck.conf",
                            "sudo edit /etc/logcheck.conf",
                            "vim /etc/logcheck.conf",
                            "gedit /etc/logcheck/logcheck.conf",
                        ],
                        "sudo nano /etc/logcheck/logcheck.conf",
                    ),
                    choice(
                        3,
                        "Which program overloaded the system?",
                        &["Minetest", "nsnake", "Minecraft", "Apache"],
                        "Minetest",
                    ),
                ],
            },
            SeedLab {
                summary: summary(3, "Practical work 2", 2, Difficulty::Medium, 30, 3),
                items: vec![
                    choice(
                        1,
                        "How many failed logins were recorded for user1?",
                        &["5", "7", "10", "3"],
                        "7",
                    ),
                    choice(
                        2,
                        "Which file limits authentication attempts?",
                        &[
                            "/etc/pam.d/lightdm",
                            "/etc/ssh/sshd_config",
                            "/etc/login.defs",
                            "/etc/security/limits.conf",
                        ],
                        "/etc/pam.d/lightdm",
                    ),
                    SeedItem::FreeText {
                        number: 3,
                        question: "Which deny value limits logins to 3 attempts?".into(),
                        correct: "3".into(),
                    },
                ],
            },
        ]
    }
}

fn summary(
    id: u64,
    title: &str,
    lab_number: u32,
    difficulty: Difficulty,
    max_score: u32,
    order: u32,
) -> LabSummary {
    LabSummary {
        id: LabId::new(id),
        title: title.into(),
        description: None,
        lab_number,
        difficulty,
        max_score,
        order,
    }
}

fn choice(number: u32, question: &str, options: &[&str], correct: &str) -> SeedItem {
    SeedItem::Choice {
        number,
        question: question.into(),
        options: options.iter().map(|o| (*o).to_string()).collect(),
        correct: correct.into(),
    }
}

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone)]
enum Expected {
    Exact(String),
    Normalized(String),
}

impl Expected {
    fn matches(&self, answer: &str) -> bool {
        match self {
            Expected::Exact(correct) => answer == correct,
            Expected::Normalized(correct) => {
                answer.trim().to_lowercase() == correct.trim().to_lowercase()
            }
        }
    }
}

#[derive(Debug, Clone)]
struct StoredLab {
    summary: LabSummary,
    items: Vec<LabItem>,
    answers: HashMap<u32, Expected>,
}

#[derive(Debug, Clone, Default)]
struct TaskRecord {
    completed: bool,
    attempts: u32,
    score: u32,
    last_answer: Option<String>,
}

impl TaskRecord {
    fn is_done(&self) -> bool {
        self.completed || self.attempts >= MAX_ATTEMPTS
    }

    /// Apply one graded attempt.
    fn record(&mut self, is_correct: bool, answer: &str) {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts == 1 {
            self.completed = is_correct;
            self.score = if is_correct {
                MAX_TASK_SCORE
            } else {
                MAX_TASK_SCORE - 1
            };
        } else if !self.completed {
            if is_correct {
                self.completed = true;
                let penalty = (self.attempts - 1).min(MAX_TASK_SCORE - 1);
                self.score = (MAX_TASK_SCORE - penalty).max(1);
            } else if self.attempts <= MAX_ATTEMPTS {
                self.score = (MAX_TASK_SCORE + 1).saturating_sub(self.attempts);
            } else {
                self.score = 0;
            }
        }
        self.last_answer = Some(answer.to_string());
    }
}

#[derive(Debug, Clone)]
struct LabProgress {
    status: LabStatus,
    score: u32,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    total_time: u64,
    tasks: BTreeMap<u32, TaskRecord>,
}

impl LabProgress {
    fn started(now: DateTime<Utc>) -> Self {
        Self {
            status: LabStatus::InProgress,
            score: 0,
            started_at: Some(now),
            ended_at: None,
            total_time: 0,
            tasks: BTreeMap::new(),
        }
    }

    fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            status: self.status,
            total_time_seconds: self.total_time,
            tasks: self
                .tasks
                .iter()
                .filter_map(|(number, record)| {
                    Some(TaskSnapshot {
                        number: TaskNumber::new(*number)?,
                        completed: record.completed,
                        attempts: record.attempts,
                        score: record.score,
                        last_answer: record.last_answer.clone(),
                    })
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    labs: BTreeMap<LabId, StoredLab>,
    progress: HashMap<LabId, LabProgress>,
    accounts: Vec<(StudentAccount, String)>,
    signed_in: Option<StudentAccount>,
    failures: HashMap<GatewayCall, VecDeque<String>>,
    calls: HashMap<GatewayCall, usize>,
    time_updates: Vec<(LabId, u64)>,
}

//
// ─── GATEWAY ───────────────────────────────────────────────────────────────────
//

/// In-process backend with the same grading rules as the real one.
///
/// Used by tests and the offline mode of the CLI. Clones share state. When no
/// account is registered every call is treated as coming from a signed-in
/// student.
#[derive(Clone, Debug)]
pub struct InMemoryGateway {
    clock: Clock,
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new(Clock::default_clock())
    }
}

impl InMemoryGateway {
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Gateway preloaded with the standard course and a `student` account.
    #[must_use]
    pub fn seeded(clock: Clock) -> Self {
        let gateway = Self::new(clock);
        for lab in SeedLab::standard_course() {
            gateway.add_lab(lab);
        }
        gateway.add_account(
            StudentAccount {
                id: 2,
                username: DEMO_USERNAME.into(),
                name: "Demo Student".into(),
                role: "student".into(),
                group: Some("IS-401".into()),
            },
            DEMO_PASSWORD,
        );
        gateway
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, GatewayError> {
        self.state
            .lock()
            .map_err(|e| GatewayError::Malformed(format!("in-memory backend poisoned: {e}")))
    }

    /// Register a lab. Replaces any lab with the same id.
    pub fn add_lab(&self, lab: SeedLab) {
        let mut answers = HashMap::new();
        let mut items = Vec::with_capacity(lab.items.len());
        for item in lab.items {
            match item {
                SeedItem::Choice {
                    number,
                    question,
                    options,
                    correct,
                } => {
                    answers.insert(number, Expected::Exact(correct));
                    if let Some(number) = TaskNumber::new(number) {
                        items.push(LabItem::Task(TaskDefinition {
                            number,
                            question,
                            kind: TaskKind::Choice { options },
                        }));
                    }
                }
                SeedItem::FreeText {
                    number,
                    question,
                    correct,
                } => {
                    answers.insert(number, Expected::Normalized(correct));
                    if let Some(number) = TaskNumber::new(number) {
                        items.push(LabItem::Task(TaskDefinition {
                            number,
                            question,
                            kind: TaskKind::FreeText,
                        }));
                    }
                }
                SeedItem::Info { title, body } => {
                    items.push(LabItem::Info(InfoBlock { title, body }));
                }
            }
        }
        if let Ok(mut state) = self.state.lock() {
            state.labs.insert(
                lab.summary.id,
                StoredLab {
                    summary: lab.summary,
                    items,
                    answers,
                },
            );
        }
    }

    pub fn add_account(&self, account: StudentAccount, password: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.accounts.push((account, password.to_string()));
        }
    }

    /// Make the next `call` fail with HTTP 503 and the given message.
    /// Repeated calls queue further failures.
    pub fn fail_next(&self, call: GatewayCall, message: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state
                .failures
                .entry(call)
                .or_default()
                .push_back(message.into());
        }
    }

    /// How many times `call` reached the backend, failed or not.
    #[must_use]
    pub fn call_count(&self, call: GatewayCall) -> usize {
        self.state
            .lock()
            .map(|state| state.calls.get(&call).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Every update-time request received, in order.
    #[must_use]
    pub fn time_updates(&self) -> Vec<(LabId, u64)> {
        self.state
            .lock()
            .map(|state| state.time_updates.clone())
            .unwrap_or_default()
    }

    /// Mark a lab as completed without going through its tasks.
    pub fn complete_directly(&self, lab: LabId) {
        let now = self.clock.now();
        if let Ok(mut state) = self.state.lock() {
            let progress = state
                .progress
                .entry(lab)
                .or_insert_with(|| LabProgress::started(now));
            progress.status = LabStatus::Completed;
            progress.ended_at = Some(now);
        }
    }

    /// Count the call, apply an injected failure and check the caller is signed in.
    fn enter(&self, call: GatewayCall, student_only: bool) -> Result<MutexGuard<'_, State>, GatewayError> {
        let mut state = self.lock()?;
        *state.calls.entry(call).or_insert(0) += 1;
        if let Some(message) = state.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            return Err(GatewayError::HttpStatus {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message,
            });
        }
        if student_only && !state.accounts.is_empty() && state.signed_in.is_none() {
            return Err(status(StatusCode::FORBIDDEN, "access denied"));
        }
        Ok(state)
    }
}

fn status(status: StatusCode, message: &str) -> GatewayError {
    GatewayError::HttpStatus {
        status,
        message: message.to_string(),
    }
}

fn report_time(at: Option<DateTime<Utc>>) -> Option<NaiveDateTime> {
    at.map(|t| (t + Duration::hours(REPORT_OFFSET_HOURS)).naive_utc())
}

/// The lab ordered directly before `summary`, if any.
fn previous_lab<'a>(labs: &'a BTreeMap<LabId, StoredLab>, summary: &LabSummary) -> Option<&'a StoredLab> {
    let order = summary.order.checked_sub(1)?;
    labs.values().find(|lab| lab.summary.order == order)
}

fn is_completed(state: &State, lab: LabId) -> bool {
    state
        .progress
        .get(&lab)
        .is_some_and(|p| p.status == LabStatus::Completed)
}

fn can_start(state: &State, summary: &LabSummary) -> bool {
    previous_lab(&state.labs, summary).is_none_or(|previous| is_completed(state, previous.summary.id))
}

#[async_trait]
impl LabGateway for InMemoryGateway {
    async fn login(&self, username: &str, password: &str) -> Result<StudentAccount, GatewayError> {
        let mut state = self.enter(GatewayCall::Login, false)?;
        if username.is_empty() || password.is_empty() {
            return Err(status(StatusCode::BAD_REQUEST, "fill in all fields"));
        }
        let account = state
            .accounts
            .iter()
            .find(|(account, secret)| account.username == username && secret == password)
            .map(|(account, _)| account.clone())
            .ok_or_else(|| status(StatusCode::UNAUTHORIZED, "invalid username or password"))?;
        state.signed_in = Some(account.clone());
        Ok(account)
    }

    async fn logout(&self) -> Result<(), GatewayError> {
        let mut state = self.enter(GatewayCall::Logout, false)?;
        state.signed_in = None;
        Ok(())
    }

    async fn list_labs(&self) -> Result<Vec<LabSummary>, GatewayError> {
        let state = self.enter(GatewayCall::ListLabs, false)?;
        let mut labs: Vec<LabSummary> = state.labs.values().map(|lab| lab.summary.clone()).collect();
        labs.sort_by_key(|lab| lab.order);
        Ok(labs)
    }

    async fn fetch_lab(&self, lab: LabId) -> Result<LabContent, GatewayError> {
        let state = self.enter(GatewayCall::FetchLab, false)?;
        let stored = state
            .labs
            .get(&lab)
            .ok_or_else(|| status(StatusCode::NOT_FOUND, "lab not found"))?;
        Ok(LabContent {
            summary: stored.summary.clone(),
            items: stored.items.clone(),
        })
    }

    async fn fetch_progress(&self, lab: LabId) -> Result<Option<ProgressSnapshot>, GatewayError> {
        let state = self.enter(GatewayCall::FetchProgress, true)?;
        Ok(state.progress.get(&lab).map(LabProgress::snapshot))
    }

    async fn start_lab(&self, lab: LabId) -> Result<(), GatewayError> {
        let now = self.clock.now();
        let mut state = self.enter(GatewayCall::StartLab, true)?;
        let summary = state
            .labs
            .get(&lab)
            .map(|stored| stored.summary.clone())
            .ok_or_else(|| status(StatusCode::NOT_FOUND, "lab not found"))?;
        if !can_start(&state, &summary) {
            return Err(status(
                StatusCode::FORBIDDEN,
                "complete the previous practical work first",
            ));
        }
        let progress = state
            .progress
            .entry(lab)
            .or_insert_with(|| LabProgress::started(now));
        if progress.status == LabStatus::NotStarted {
            progress.status = LabStatus::InProgress;
            progress.started_at = Some(now);
        }
        Ok(())
    }

    async fn check_answer(
        &self,
        lab: LabId,
        task: TaskNumber,
        answer: &str,
    ) -> Result<Verdict, GatewayError> {
        let mut state = self.enter(GatewayCall::CheckAnswer, true)?;
        let expected = state
            .labs
            .get(&lab)
            .ok_or_else(|| status(StatusCode::NOT_FOUND, "lab not found"))?
            .answers
            .get(&task.value())
            .cloned();
        let progress = state
            .progress
            .get_mut(&lab)
            .filter(|p| p.status == LabStatus::InProgress)
            .ok_or_else(|| status(StatusCode::FORBIDDEN, "the practical work has not been started"))?;
        let expected = expected.ok_or_else(|| status(StatusCode::NOT_FOUND, "task not found"))?;

        if let Some(previous) = task.previous() {
            let unlocked = progress
                .tasks
                .get(&previous.value())
                .is_some_and(TaskRecord::is_done);
            if !unlocked {
                return Err(GatewayError::Rejected(
                    "complete the previous task first".into(),
                ));
            }
        }

        let is_correct = expected.matches(answer);
        let record = progress.tasks.entry(task.value()).or_default();
        record.record(is_correct, answer);
        Ok(Verdict {
            is_correct,
            completed: record.completed,
            score: record.score,
            attempts: record.attempts,
        })
    }

    async fn update_time(&self, lab: LabId, elapsed_seconds: u64) -> Result<(), GatewayError> {
        let mut state = self.enter(GatewayCall::UpdateTime, true)?;
        state.time_updates.push((lab, elapsed_seconds));
        if let Some(progress) = state.progress.get_mut(&lab) {
            progress.total_time = elapsed_seconds;
        }
        Ok(())
    }

    async fn complete_lab(
        &self,
        lab: LabId,
        total_time_seconds: u64,
    ) -> Result<CompletionReport, GatewayError> {
        let now = self.clock.now();
        let mut state = self.enter(GatewayCall::CompleteLab, true)?;
        let lab_number = state
            .labs
            .get(&lab)
            .map(|stored| stored.summary.lab_number)
            .ok_or_else(|| status(StatusCode::NOT_FOUND, "lab not found"))?;
        let progress = state
            .progress
            .get_mut(&lab)
            .filter(|p| p.status == LabStatus::InProgress)
            .ok_or_else(|| status(StatusCode::FORBIDDEN, "the practical work has not been started"))?;

        let score = if lab_number == 0 {
            0
        } else {
            progress
                .tasks
                .values()
                .filter(|record| record.completed)
                .map(|record| record.score)
                .sum()
        };
        progress.status = LabStatus::Completed;
        progress.score = score;
        progress.ended_at = Some(now);
        progress.total_time = total_time_seconds;

        Ok(CompletionReport {
            score,
            max_score: if lab_number == 0 { 0 } else { 30 },
            started_at: report_time(progress.started_at),
            ended_at: report_time(progress.ended_at),
            total_time_seconds,
        })
    }

    async fn dashboard(&self) -> Result<StudentDashboard, GatewayError> {
        let state = self.enter(GatewayCall::Dashboard, true)?;
        let mut labs: Vec<&StoredLab> = state.labs.values().collect();
        labs.sort_by_key(|lab| lab.summary.order);

        let graded: Vec<&StoredLab> = labs
            .iter()
            .copied()
            .filter(|lab| !lab.summary.is_preparation())
            .collect();
        let completed_scores: Vec<u32> = graded
            .iter()
            .filter_map(|lab| state.progress.get(&lab.summary.id))
            .filter(|p| p.status == LabStatus::Completed)
            .map(|p| p.score)
            .collect();

        let total_labs = u32::try_from(graded.len()).unwrap_or(u32::MAX);
        let completed_labs = u32::try_from(completed_scores.len()).unwrap_or(u32::MAX);
        let success_rate = if total_labs == 0 {
            0.0
        } else {
            round1(f64::from(completed_labs) / f64::from(total_labs) * 100.0)
        };
        let average_score = if completed_scores.is_empty() {
            0.0
        } else {
            let total: u32 = completed_scores.iter().sum();
            round1(f64::from(total) / f64::from(completed_labs))
        };

        let labs = labs
            .into_iter()
            .map(|lab| {
                let progress = state.progress.get(&lab.summary.id);
                DashboardLab {
                    summary: lab.summary.clone(),
                    status: progress.map_or(LabStatus::NotStarted, |p| p.status),
                    score: progress.map_or(0, |p| p.score),
                    can_start: can_start(&state, &lab.summary),
                }
            })
            .collect();

        Ok(StudentDashboard {
            stats: DashboardStats {
                total_labs,
                completed_labs,
                success_rate,
                average_score,
            },
            labs,
        })
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
