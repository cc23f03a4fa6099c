use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lab_core::model::{
    CompletionReport, LabId, LabStatus, LabSummary, ProgressSnapshot, StudentDashboard,
    TaskNumber, TaskState, Verdict,
};
use lab_core::time::fixed_clock;
use lab_core::{InvalidStateError, StateChange, ValidationError};
use services::{
    GatewayCall, GatewayError, InMemoryGateway, LabContent, LabError, LabEvent, LabGateway,
    LabLoopService, StudentAccount,
};
use storage::repository::{DraftRepository, InMemoryRepository};

const WRONG_COMMAND: &str = "vim /etc/logcheck.conf";

fn n(value: u32) -> TaskNumber {
    TaskNumber::new(value).unwrap()
}

struct Harness {
    service: LabLoopService,
    gateway: InMemoryGateway,
    drafts: InMemoryRepository,
}

/// Signed-in student who has already finished the preparation lab.
async fn harness() -> Harness {
    let gateway = InMemoryGateway::seeded(fixed_clock());
    let drafts = InMemoryRepository::new();
    let service = LabLoopService::new(
        fixed_clock(),
        Arc::new(gateway.clone()),
        Arc::new(drafts.clone()),
    );
    service.login("student", "student123").await.unwrap();
    gateway.complete_directly(LabId::new(1));
    Harness {
        service,
        gateway,
        drafts,
    }
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<LabEvent>) -> Vec<LabEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn student_works_through_a_lab() {
    let h = harness().await;
    let mut lab = h.service.open_lab(LabId::new(2)).await.unwrap();
    let mut rx = lab.subscribe();
    h.service.start_lab(&mut lab).await.unwrap();

    let first = h
        .service
        .submit_answer(&mut lab, n(1), "190902")
        .await
        .unwrap();
    assert_eq!(first.state, TaskState::AnsweredCorrect);
    assert_eq!(first.verdict.score, 10);
    assert_eq!(first.unlocked(), vec![n(2)]);

    let progress = lab.session().progress();
    assert_eq!((progress.correct, progress.open, progress.locked), (1, 1, 1));

    for attempt in 1..=10 {
        let outcome = h
            .service
            .submit_answer(&mut lab, n(2), WRONG_COMMAND)
            .await
            .unwrap();
        assert_eq!(outcome.verdict.attempts, attempt);
    }
    let task2 = lab.session().task(n(2)).unwrap();
    assert_eq!(task2.state(), TaskState::AnsweredIncorrectExhausted);
    assert_eq!(
        lab.session().task(n(3)).unwrap().state(),
        TaskState::Available
    );

    h.service
        .submit_answer(&mut lab, n(3), "Minetest")
        .await
        .unwrap();
    let report = h.service.complete_lab(&mut lab).await.unwrap();
    assert_eq!(report.score, 20);
    assert_eq!(report.max_score, 30);
    assert_eq!(lab.session().status(), LabStatus::Completed);
    assert_eq!(lab.session().report(), Some(&report));
    assert!(!lab.is_time_sync_running());

    let events = drain(&mut rx);
    assert_eq!(events.first(), Some(&LabEvent::Started));
    let unlocked: Vec<TaskNumber> = events
        .iter()
        .filter_map(|event| match event {
            LabEvent::TaskUpdated(change) if change.is_unlock() => Some(change.task),
            _ => None,
        })
        .collect();
    assert_eq!(unlocked, vec![n(2), n(3)]);
    assert!(events.contains(&LabEvent::TaskUpdated(StateChange {
        task: n(2),
        from: TaskState::Available,
        to: TaskState::AnsweredIncorrectRetryable,
    })));
    assert_eq!(events.last(), Some(&LabEvent::Completed(report)));
}

#[tokio::test]
async fn remote_failure_leaves_the_task_as_it_was() {
    let h = harness().await;
    let mut lab = h.service.open_lab(LabId::new(2)).await.unwrap();
    h.service.start_lab(&mut lab).await.unwrap();

    h.gateway.fail_next(GatewayCall::CheckAnswer, "maintenance");
    let err = h
        .service
        .submit_answer(&mut lab, n(1), "190902")
        .await
        .unwrap_err();
    assert!(err.is_remote());
    assert_eq!(err.user_message(), "maintenance");

    let task = lab.session().task(n(1)).unwrap();
    assert_eq!(task.state(), TaskState::Available);
    assert_eq!(task.attempts(), 0);
    assert!(!task.is_in_flight());

    let retry = h
        .service
        .submit_answer(&mut lab, n(1), "190902")
        .await
        .unwrap();
    assert_eq!(retry.state, TaskState::AnsweredCorrect);
}

#[tokio::test]
async fn locked_task_and_empty_answer_are_rejected_locally() {
    let h = harness().await;
    let mut lab = h.service.open_lab(LabId::new(2)).await.unwrap();
    h.service.start_lab(&mut lab).await.unwrap();

    let err = h
        .service
        .submit_answer(&mut lab, n(3), "x")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LabError::InvalidState(InvalidStateError::Locked(_))
    ));

    let err = h
        .service
        .submit_answer(&mut lab, n(1), "   ")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LabError::Validation(ValidationError::EmptyAnswer)
    ));
    assert_eq!(h.gateway.call_count(GatewayCall::CheckAnswer), 0);
}

#[tokio::test]
async fn submitting_before_start_is_rejected() {
    let h = harness().await;
    let mut lab = h.service.open_lab(LabId::new(2)).await.unwrap();
    let err = h
        .service
        .submit_answer(&mut lab, n(1), "190902")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LabError::InvalidState(InvalidStateError::NotStarted)
    ));
}

#[tokio::test]
async fn start_is_refused_until_previous_lab_is_completed() {
    let h = harness().await;
    let mut lab = h.service.open_lab(LabId::new(3)).await.unwrap();
    let err = h.service.start_lab(&mut lab).await.unwrap_err();
    match err {
        LabError::Remote(remote) => {
            assert_eq!(remote.status(), Some(reqwest::StatusCode::FORBIDDEN));
        }
        other => panic!("expected remote error, got {other:?}"),
    }
    assert_eq!(lab.session().status(), LabStatus::NotStarted);
    assert!(!lab.is_time_sync_running());
}

#[tokio::test]
async fn completion_needs_every_task_finalized() {
    let h = harness().await;
    let mut lab = h.service.open_lab(LabId::new(2)).await.unwrap();
    h.service.start_lab(&mut lab).await.unwrap();
    h.service
        .submit_answer(&mut lab, n(1), "190902")
        .await
        .unwrap();

    let err = h.service.complete_lab(&mut lab).await.unwrap_err();
    assert!(matches!(
        err,
        LabError::InvalidState(InvalidStateError::TasksOpen { remaining: 2 })
    ));
    assert_eq!(h.gateway.call_count(GatewayCall::CompleteLab), 0);
    assert!(lab.is_time_sync_running());
}

#[tokio::test]
async fn failed_completion_keeps_the_lab_running() {
    let gateway = InMemoryGateway::seeded(fixed_clock());
    let service = LabLoopService::new(
        fixed_clock(),
        Arc::new(gateway.clone()),
        Arc::new(InMemoryRepository::new()),
    );
    service.login("student", "student123").await.unwrap();
    let mut lab = service.open_lab(LabId::new(1)).await.unwrap();
    service.start_lab(&mut lab).await.unwrap();

    gateway.fail_next(GatewayCall::CompleteLab, "database is locked");
    let err = service.complete_lab(&mut lab).await.unwrap_err();
    assert!(err.is_remote());
    assert_eq!(lab.session().status(), LabStatus::InProgress);
    assert!(lab.session().report().is_none());
    assert!(lab.is_time_sync_running());

    service.complete_lab(&mut lab).await.unwrap();
    assert_eq!(lab.session().status(), LabStatus::Completed);
}

#[tokio::test]
async fn completed_session_rejects_further_changes() {
    let gateway = InMemoryGateway::seeded(fixed_clock());
    let service = LabLoopService::new(
        fixed_clock(),
        Arc::new(gateway.clone()),
        Arc::new(InMemoryRepository::new()),
    );
    service.login("student", "student123").await.unwrap();
    let mut prep = service.open_lab(LabId::new(1)).await.unwrap();
    service.start_lab(&mut prep).await.unwrap();
    service.complete_lab(&mut prep).await.unwrap();

    let err = service.complete_lab(&mut prep).await.unwrap_err();
    assert!(matches!(
        err,
        LabError::InvalidState(InvalidStateError::SessionCompleted)
    ));
    assert_eq!(gateway.call_count(GatewayCall::CompleteLab), 1);
}

#[tokio::test]
async fn drafts_and_progress_survive_reopening() {
    let h = harness().await;
    let mut lab = h.service.open_lab(LabId::new(2)).await.unwrap();
    h.service.start_lab(&mut lab).await.unwrap();
    h.service
        .submit_answer(&mut lab, n(1), "190902")
        .await
        .unwrap();
    h.service
        .select_choice(&mut lab, n(2), WRONG_COMMAND)
        .await
        .unwrap();
    drop(lab);

    let mut reopened = h.service.open_lab(LabId::new(2)).await.unwrap();
    assert_eq!(reopened.session().status(), LabStatus::InProgress);
    let task1 = reopened.session().task(n(1)).unwrap();
    assert_eq!(task1.state(), TaskState::AnsweredCorrect);
    assert_eq!(task1.score(), 10);
    let task2 = reopened.session().task(n(2)).unwrap();
    assert_eq!(task2.state(), TaskState::Available);
    assert_eq!(task2.pending_answer(), Some(WRONG_COMMAND));

    h.service.start_lab(&mut reopened).await.unwrap();
    let outcome = h.service.submit_pending(&mut reopened, n(2)).await.unwrap();
    assert_eq!(outcome.state, TaskState::AnsweredIncorrectRetryable);
    assert_eq!(h.drafts.load_drafts(LabId::new(2)).await.unwrap().len(), 1);

    h.service
        .select_choice(&mut reopened, n(2), "sudo nano /etc/logcheck/logcheck.conf")
        .await
        .unwrap();
    let outcome = h.service.submit_pending(&mut reopened, n(2)).await.unwrap();
    assert_eq!(outcome.state, TaskState::AnsweredCorrect);
    assert_eq!(outcome.verdict.score, 9);
    assert!(h.drafts.load_drafts(LabId::new(2)).await.unwrap().is_empty());
}

/// Gateway whose answer checks never resolve.
struct StalledChecks(InMemoryGateway);

#[async_trait]
impl LabGateway for StalledChecks {
    async fn login(&self, username: &str, password: &str) -> Result<StudentAccount, GatewayError> {
        self.0.login(username, password).await
    }

    async fn logout(&self) -> Result<(), GatewayError> {
        self.0.logout().await
    }

    async fn list_labs(&self) -> Result<Vec<LabSummary>, GatewayError> {
        self.0.list_labs().await
    }

    async fn fetch_lab(&self, lab: LabId) -> Result<LabContent, GatewayError> {
        self.0.fetch_lab(lab).await
    }

    async fn fetch_progress(&self, lab: LabId) -> Result<Option<ProgressSnapshot>, GatewayError> {
        self.0.fetch_progress(lab).await
    }

    async fn start_lab(&self, lab: LabId) -> Result<(), GatewayError> {
        self.0.start_lab(lab).await
    }

    async fn check_answer(
        &self,
        _lab: LabId,
        _task: TaskNumber,
        _answer: &str,
    ) -> Result<Verdict, GatewayError> {
        std::future::pending().await
    }

    async fn update_time(&self, lab: LabId, elapsed_seconds: u64) -> Result<(), GatewayError> {
        self.0.update_time(lab, elapsed_seconds).await
    }

    async fn complete_lab(
        &self,
        lab: LabId,
        total_time_seconds: u64,
    ) -> Result<CompletionReport, GatewayError> {
        self.0.complete_lab(lab, total_time_seconds).await
    }

    async fn dashboard(&self) -> Result<StudentDashboard, GatewayError> {
        self.0.dashboard().await
    }
}

#[tokio::test]
async fn abandoned_submission_frees_the_task() {
    let gateway = InMemoryGateway::seeded(fixed_clock());
    gateway.login("student", "student123").await.unwrap();
    gateway.complete_directly(LabId::new(1));
    let service = LabLoopService::new(
        fixed_clock(),
        Arc::new(StalledChecks(gateway)),
        Arc::new(InMemoryRepository::new()),
    );
    let mut lab = service.open_lab(LabId::new(2)).await.unwrap();
    service.start_lab(&mut lab).await.unwrap();

    let timed_out = tokio::time::timeout(
        Duration::from_millis(20),
        service.submit_answer(&mut lab, n(1), "190902"),
    )
    .await;
    assert!(timed_out.is_err());

    let task = lab.session().task(n(1)).unwrap();
    assert!(!task.is_in_flight());
    assert_eq!(task.state(), TaskState::Available);
    assert_eq!(task.attempts(), 0);
}

#[tokio::test]
async fn editing_after_a_wrong_answer_is_not_an_unlock() {
    let h = harness().await;
    let mut lab = h.service.open_lab(LabId::new(2)).await.unwrap();
    h.service.start_lab(&mut lab).await.unwrap();
    h.service
        .submit_answer(&mut lab, n(1), "123456")
        .await
        .unwrap();

    let mut rx = lab.subscribe();
    h.service
        .select_choice(&mut lab, n(1), "190902")
        .await
        .unwrap();

    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![LabEvent::TaskUpdated(StateChange {
            task: n(1),
            from: TaskState::AnsweredIncorrectRetryable,
            to: TaskState::Available,
        })]
    );
    assert!(events.iter().all(|event| match event {
        LabEvent::TaskUpdated(change) => !change.is_unlock(),
        _ => true,
    }));
}
