use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use lab_core::model::{
    CompletionReport, LabDefinition, LabId, LabStatus, LabSummary, StudentDashboard, TaskNumber,
    Verdict,
};
use lab_core::{Clock, InvalidStateError, LabSession, SubmissionOutcome, SubmissionTicket};
use storage::repository::{DraftRecord, DraftRepository};

use super::events::{EVENT_CHANNEL_CAPACITY, LabEvent};
use super::time_sync::TimeSyncHandle;
use crate::error::LabError;
use crate::gateway::{LabGateway, StudentAccount};

/// Default period between elapsed-time writes.
pub const DEFAULT_TIME_SYNC_INTERVAL: Duration = Duration::from_secs(10);

//
// ─── ACTIVE LAB ────────────────────────────────────────────────────────────────
//

/// An opened lab: its session, event channel and time sync timer.
///
/// Dropping it stops the timer.
#[derive(Debug)]
pub struct ActiveLab {
    session: LabSession,
    events: broadcast::Sender<LabEvent>,
    time_sync: Option<TimeSyncHandle>,
}

impl ActiveLab {
    fn new(session: LabSession) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            session,
            events,
            time_sync: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> LabId {
        self.session.id()
    }

    #[must_use]
    pub fn session(&self) -> &LabSession {
        &self.session
    }

    /// Receive every event published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LabEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn is_time_sync_running(&self) -> bool {
        self.time_sync
            .as_ref()
            .is_some_and(TimeSyncHandle::is_running)
    }

    fn publish(&self, event: LabEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn stop_time_sync(&mut self) {
        if let Some(handle) = self.time_sync.take() {
            handle.stop();
        }
    }
}

//
// ─── IN-FLIGHT GUARD ───────────────────────────────────────────────────────────
//

/// Holds a submission ticket while its verdict is awaited.
///
/// If the request fails or the future is dropped, the ticket is handed back
/// through `abort_submission` so the task accepts answers again.
struct InFlight<'a> {
    session: &'a mut LabSession,
    task: TaskNumber,
    ticket: Option<SubmissionTicket>,
}

impl<'a> InFlight<'a> {
    fn new(session: &'a mut LabSession, ticket: SubmissionTicket) -> Self {
        Self {
            session,
            task: ticket.task(),
            ticket: Some(ticket),
        }
    }

    fn answer(&self) -> &str {
        self.ticket.as_ref().map_or("", SubmissionTicket::answer)
    }

    fn resolve(mut self, verdict: &Verdict) -> Result<SubmissionOutcome, LabError> {
        let ticket = self
            .ticket
            .take()
            .ok_or(InvalidStateError::InFlight(self.task))?;
        Ok(self.session.apply_verdict(ticket, verdict))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            debug!(task = self.task.value(), "submission abandoned");
            self.session.abort_submission(ticket);
        }
    }
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Orchestrates backend calls, local drafts and time sync around a lab session.
#[derive(Clone)]
pub struct LabLoopService {
    clock: Clock,
    gateway: Arc<dyn LabGateway>,
    drafts: Arc<dyn DraftRepository>,
    time_sync_interval: Duration,
}

impl LabLoopService {
    #[must_use]
    pub fn new(
        clock: Clock,
        gateway: Arc<dyn LabGateway>,
        drafts: Arc<dyn DraftRepository>,
    ) -> Self {
        Self {
            clock,
            gateway,
            drafts,
            time_sync_interval: DEFAULT_TIME_SYNC_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_time_sync_interval(mut self, interval: Duration) -> Self {
        self.time_sync_interval = interval;
        self
    }

    #[must_use]
    pub fn time_sync_interval(&self) -> Duration {
        self.time_sync_interval
    }

    /// # Errors
    ///
    /// Returns `LabError::Remote` if the backend refuses the credentials.
    pub async fn login(&self, username: &str, password: &str) -> Result<StudentAccount, LabError> {
        let account = self.gateway.login(username, password).await?;
        info!(username = %account.username, "signed in");
        Ok(account)
    }

    /// # Errors
    ///
    /// Returns `LabError::Remote` on backend failures.
    pub async fn logout(&self) -> Result<(), LabError> {
        self.gateway.logout().await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `LabError::Remote` on backend failures.
    pub async fn list_labs(&self) -> Result<Vec<LabSummary>, LabError> {
        Ok(self.gateway.list_labs().await?)
    }

    /// # Errors
    ///
    /// Returns `LabError::Remote` on backend failures.
    pub async fn dashboard(&self) -> Result<StudentDashboard, LabError> {
        Ok(self.gateway.dashboard().await?)
    }

    /// Load a lab with the student's prior progress and any locally saved drafts.
    ///
    /// # Errors
    ///
    /// Returns `LabError::Remote` if loading fails, `LabError::Definition` if
    /// the lab content is invalid.
    pub async fn open_lab(&self, lab_id: LabId) -> Result<ActiveLab, LabError> {
        let content = self.gateway.fetch_lab(lab_id).await?;
        let definition = LabDefinition::new(content.summary, content.items)?;
        let snapshot = self
            .gateway
            .fetch_progress(lab_id)
            .await?
            .unwrap_or_default();

        let mut session = LabSession::open(definition, &snapshot);
        self.restore_drafts(&mut session).await;
        info!(
            lab = lab_id.value(),
            status = %session.status(),
            tasks = session.tasks().len(),
            "lab opened"
        );
        Ok(ActiveLab::new(session))
    }

    async fn restore_drafts(&self, session: &mut LabSession) {
        if session.status() == LabStatus::Completed {
            return;
        }
        let drafts = match self.drafts.load_drafts(session.id()).await {
            Ok(drafts) => drafts,
            Err(err) => {
                warn!(lab = session.id().value(), error = %err, "failed to load drafts");
                return;
            }
        };
        for draft in drafts {
            if let Err(err) = session.restore_draft(draft.task_number, &draft.text) {
                debug!(task = draft.task_number.value(), error = %err, "draft skipped");
            }
        }
    }

    /// Start the lab on the backend and begin persisting elapsed time.
    ///
    /// A lab that is already in progress is not started again; only its timer
    /// is (re)started.
    ///
    /// # Errors
    ///
    /// Returns `LabError::InvalidState` for a completed lab and
    /// `LabError::Remote` if the backend refuses, e.g. while the previous lab
    /// is unfinished.
    pub async fn start_lab(&self, lab: &mut ActiveLab) -> Result<(), LabError> {
        match lab.session.status() {
            LabStatus::Completed => return Err(InvalidStateError::SessionCompleted.into()),
            LabStatus::InProgress => {}
            LabStatus::NotStarted => {
                self.gateway.start_lab(lab.id()).await?;
                lab.session.mark_started()?;
                info!(lab = lab.id().value(), "lab started");
                lab.publish(LabEvent::Started);
            }
        }
        self.ensure_time_sync(lab);
        Ok(())
    }

    fn ensure_time_sync(&self, lab: &mut ActiveLab) {
        if lab.is_time_sync_running() {
            return;
        }
        lab.time_sync = Some(TimeSyncHandle::spawn(
            Arc::clone(&self.gateway),
            lab.session.id(),
            lab.session.elapsed(),
            self.time_sync_interval,
            lab.events.clone(),
        ));
    }

    /// Select an option and keep it as a local draft.
    ///
    /// # Errors
    ///
    /// Returns `LabError::Validation` or `LabError::InvalidState` as the
    /// session does. Draft storage failures are only logged.
    pub async fn select_choice(
        &self,
        lab: &mut ActiveLab,
        task: TaskNumber,
        value: &str,
    ) -> Result<(), LabError> {
        if let Some(change) = lab.session.select_choice(task, value)? {
            lab.publish(LabEvent::TaskUpdated(change));
        }
        self.save_draft(lab.id(), task, value).await;
        Ok(())
    }

    /// Replace the typed answer and keep it as a local draft.
    ///
    /// # Errors
    ///
    /// As [`Self::select_choice`].
    pub async fn set_free_text(
        &self,
        lab: &mut ActiveLab,
        task: TaskNumber,
        value: &str,
    ) -> Result<(), LabError> {
        if let Some(change) = lab.session.set_free_text(task, value)? {
            lab.publish(LabEvent::TaskUpdated(change));
        }
        if value.trim().is_empty() {
            self.forget_draft(lab.id(), task).await;
        } else {
            self.save_draft(lab.id(), task, value).await;
        }
        Ok(())
    }

    async fn save_draft(&self, lab_id: LabId, task: TaskNumber, text: &str) {
        let draft = DraftRecord::new(lab_id, task, text, self.clock.now());
        if let Err(err) = self.drafts.save_draft(&draft).await {
            warn!(lab = lab_id.value(), task = task.value(), error = %err, "failed to save draft");
        }
    }

    async fn forget_draft(&self, lab_id: LabId, task: TaskNumber) {
        if let Err(err) = self.drafts.delete_draft(lab_id, task).await {
            warn!(lab = lab_id.value(), task = task.value(), error = %err, "failed to delete draft");
        }
    }

    /// Send `answer` for `task` and apply the backend's verdict.
    ///
    /// Only one request per task may be outstanding. If the request fails,
    /// or this future is dropped before it resolves, the task is left as it
    /// was before the call.
    ///
    /// # Errors
    ///
    /// Returns `LabError::Validation` for an empty answer,
    /// `LabError::InvalidState` when the task cannot take an answer, and
    /// `LabError::Remote` when the backend call fails.
    pub async fn submit_answer(
        &self,
        lab: &mut ActiveLab,
        task: TaskNumber,
        answer: &str,
    ) -> Result<SubmissionOutcome, LabError> {
        let ticket = lab.session.begin_submission(task, answer)?;
        self.resolve_submission(lab, ticket).await
    }

    /// Send the answer currently selected or typed for `task`.
    ///
    /// # Errors
    ///
    /// As [`Self::submit_answer`], plus `ValidationError::NoPendingAnswer`.
    pub async fn submit_pending(
        &self,
        lab: &mut ActiveLab,
        task: TaskNumber,
    ) -> Result<SubmissionOutcome, LabError> {
        let ticket = lab.session.begin_pending_submission(task)?;
        self.resolve_submission(lab, ticket).await
    }

    async fn resolve_submission(
        &self,
        lab: &mut ActiveLab,
        ticket: SubmissionTicket,
    ) -> Result<SubmissionOutcome, LabError> {
        let lab_id = lab.session.id();
        let task = ticket.task();
        let pending = InFlight::new(&mut lab.session, ticket);

        let verdict = match self
            .gateway
            .check_answer(lab_id, task, pending.answer())
            .await
        {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(lab = lab_id.value(), task = task.value(), error = %err, "answer check failed");
                return Err(err.into());
            }
        };
        let outcome = pending.resolve(&verdict)?;

        info!(
            lab = lab_id.value(),
            task = task.value(),
            correct = verdict.is_correct,
            attempts = verdict.attempts,
            state = %outcome.state,
            "answer checked"
        );
        for change in &outcome.changes {
            lab.publish(LabEvent::TaskUpdated(*change));
        }
        if outcome.state.is_finalized() {
            self.forget_draft(lab_id, task).await;
        }
        Ok(outcome)
    }

    /// Finish the lab once every task is finalized.
    ///
    /// Stops time sync and reports the total time. On failure the timer is
    /// restarted and the session stays in progress.
    ///
    /// # Errors
    ///
    /// Returns `LabError::InvalidState` when the lab is not in progress or
    /// tasks are still open, `LabError::Remote` when the backend call fails.
    pub async fn complete_lab(&self, lab: &mut ActiveLab) -> Result<CompletionReport, LabError> {
        let total_time = lab.session.ensure_completable()?;
        let lab_id = lab.id();
        lab.stop_time_sync();

        let report = match self.gateway.complete_lab(lab_id, total_time).await {
            Ok(report) => report,
            Err(err) => {
                warn!(lab = lab_id.value(), error = %err, "completing lab failed");
                self.ensure_time_sync(lab);
                return Err(err.into());
            }
        };

        lab.session.mark_completed(report.clone());
        match self.drafts.clear_drafts(lab_id).await {
            Ok(removed) => debug!(lab = lab_id.value(), removed, "drafts cleared"),
            Err(err) => warn!(lab = lab_id.value(), error = %err, "failed to clear drafts"),
        }
        info!(
            lab = lab_id.value(),
            score = report.score,
            max_score = report.max_score,
            total_time,
            "lab completed"
        );
        lab.publish(LabEvent::Completed(report.clone()));
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayCall, InMemoryGateway};
    use lab_core::model::TaskState;
    use lab_core::time::fixed_clock;
    use storage::repository::InMemoryRepository;

    fn n(value: u32) -> TaskNumber {
        TaskNumber::new(value).unwrap()
    }

    async fn signed_in() -> (LabLoopService, InMemoryGateway, Arc<InMemoryRepository>) {
        let gateway = InMemoryGateway::seeded(fixed_clock());
        let drafts = Arc::new(InMemoryRepository::new());
        let service = LabLoopService::new(fixed_clock(), Arc::new(gateway.clone()), drafts.clone());
        service.login("student", "student123").await.unwrap();
        (service, gateway, drafts)
    }

    #[tokio::test]
    async fn start_is_not_repeated_for_a_lab_in_progress() {
        let (service, gateway, _) = signed_in().await;
        let mut lab = service.open_lab(LabId::new(1)).await.unwrap();
        service.start_lab(&mut lab).await.unwrap();
        service.start_lab(&mut lab).await.unwrap();
        assert_eq!(gateway.call_count(GatewayCall::StartLab), 1);
        assert_eq!(lab.session().status(), LabStatus::InProgress);
        assert!(lab.is_time_sync_running());
    }

    #[tokio::test]
    async fn dropped_guard_hands_the_ticket_back() {
        let (service, gateway, _) = signed_in().await;
        gateway.complete_directly(LabId::new(1));
        let mut lab = service.open_lab(LabId::new(2)).await.unwrap();
        service.start_lab(&mut lab).await.unwrap();

        let ticket = lab.session.begin_submission(n(1), "190902").unwrap();
        {
            let guard = InFlight::new(&mut lab.session, ticket);
            assert_eq!(guard.answer(), "190902");
        }
        let task = lab.session().task(n(1)).unwrap();
        assert!(!task.is_in_flight());
        assert_eq!(task.state(), TaskState::Available);
    }

    #[tokio::test]
    async fn choices_are_kept_as_drafts() {
        let (service, gateway, drafts) = signed_in().await;
        gateway.complete_directly(LabId::new(1));
        let mut lab = service.open_lab(LabId::new(2)).await.unwrap();
        service.select_choice(&mut lab, n(1), "123456").await.unwrap();

        let saved = drafts.load_drafts(LabId::new(2)).await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].text, "123456");
    }

    #[tokio::test]
    async fn completed_lab_cannot_be_started_again() {
        let (service, _, _) = signed_in().await;
        let mut lab = service.open_lab(LabId::new(1)).await.unwrap();
        service.start_lab(&mut lab).await.unwrap();
        service.complete_lab(&mut lab).await.unwrap();
        assert!(!lab.is_time_sync_running());

        let err = service.start_lab(&mut lab).await.unwrap_err();
        assert!(matches!(
            err,
            LabError::InvalidState(InvalidStateError::SessionCompleted)
        ));
    }
}
