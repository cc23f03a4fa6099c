use crate::error::{InvalidStateError, ProgressError};
use crate::model::{
    CompletionReport, InfoBlock, LabDefinition, LabId, LabStatus, LabSummary, ProgressSnapshot,
    Task, TaskKind, TaskNumber, Verdict,
};
use crate::progression::{
    StateChange, SubmissionOutcome, SubmissionTicket, TaskProgress, TaskProgressController,
};
use crate::time::ElapsedTime;

/// One student's working session on one lab.
///
/// Owned by the caller; every mutation goes through `&mut self`. Once the lab
/// is completed the session is frozen and all mutations fail with
/// `InvalidStateError::SessionCompleted`.
#[derive(Debug, Clone)]
pub struct LabSession {
    summary: LabSummary,
    info: Vec<InfoBlock>,
    status: LabStatus,
    controller: TaskProgressController,
    elapsed: ElapsedTime,
    report: Option<CompletionReport>,
}

impl LabSession {
    /// Build a session from a validated definition and the backend's record of
    /// earlier work. Elapsed time resumes from the snapshot's total.
    #[must_use]
    pub fn open(definition: LabDefinition, snapshot: &ProgressSnapshot) -> Self {
        let (summary, tasks, info) = definition.into_parts();
        let mut controller = TaskProgressController::new(tasks);
        controller.restore(&snapshot.tasks);

        Self {
            summary,
            info,
            status: snapshot.status,
            controller,
            elapsed: ElapsedTime::starting_now(snapshot.total_time_seconds),
            report: None,
        }
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
    pub fn info_blocks(&self) -> &[InfoBlock] {
        &self.info
    }

    #[must_use]
    pub fn status(&self) -> LabStatus {
        self.status
    }

    #[must_use]
    pub fn controller(&self) -> &TaskProgressController {
        &self.controller
    }

    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        self.controller.tasks()
    }

    #[must_use]
    pub fn task(&self, number: TaskNumber) -> Option<&Task> {
        self.controller.task(number)
    }

    #[must_use]
    pub fn progress(&self) -> TaskProgress {
        self.controller.progress()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.controller.is_complete()
    }

    /// Report returned by the backend when this session completed the lab.
    #[must_use]
    pub fn report(&self) -> Option<&CompletionReport> {
        self.report.as_ref()
    }

    /// Elapsed-time seed for background persistence.
    #[must_use]
    pub fn elapsed(&self) -> ElapsedTime {
        self.elapsed
    }

    /// Elapsed working seconds. Only an in-progress session counts up.
    #[must_use]
    pub fn elapsed_seconds(&self) -> u64 {
        match self.status {
            LabStatus::InProgress => self.elapsed.seconds(),
            LabStatus::NotStarted | LabStatus::Completed => self.elapsed.base_seconds(),
        }
    }

    /// Move a fresh session to `in_progress`.
    ///
    /// Returns `false` when the session was already in progress.
    ///
    /// # Errors
    ///
    /// `InvalidStateError::SessionCompleted` if the lab is already completed.
    pub fn mark_started(&mut self) -> Result<bool, InvalidStateError> {
        match self.status {
            LabStatus::Completed => Err(InvalidStateError::SessionCompleted),
            LabStatus::InProgress => Ok(false),
            LabStatus::NotStarted => {
                self.elapsed = ElapsedTime::starting_now(self.elapsed.base_seconds());
                self.status = LabStatus::InProgress;
                Ok(true)
            }
        }
    }

    /// # Errors
    ///
    /// See [`TaskProgressController::select_choice`]; also fails once completed.
    pub fn select_choice(
        &mut self,
        number: TaskNumber,
        value: &str,
    ) -> Result<Option<StateChange>, ProgressError> {
        self.ensure_not_completed()?;
        self.controller.select_choice(number, value)
    }

    /// # Errors
    ///
    /// See [`TaskProgressController::set_free_text`]; also fails once completed.
    pub fn set_free_text(
        &mut self,
        number: TaskNumber,
        value: &str,
    ) -> Result<Option<StateChange>, ProgressError> {
        self.ensure_not_completed()?;
        self.controller.set_free_text(number, value)
    }

    /// Put a locally saved draft back as the pending answer of a task,
    /// dispatching on the task kind.
    ///
    /// # Errors
    ///
    /// Fails like the edit it dispatches to, e.g. when the draft is no longer
    /// one of the options.
    pub fn restore_draft(&mut self, number: TaskNumber, text: &str) -> Result<(), ProgressError> {
        let is_choice = matches!(
            self.task(number).map(Task::kind),
            Some(TaskKind::Choice { .. })
        );
        if is_choice {
            self.select_choice(number, text)?;
        } else {
            self.set_free_text(number, text)?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidStateError::NotStarted` / `SessionCompleted` when the lab is not
    /// in progress, otherwise see [`TaskProgressController::begin_submission`].
    pub fn begin_submission(
        &mut self,
        number: TaskNumber,
        answer: &str,
    ) -> Result<SubmissionTicket, ProgressError> {
        self.ensure_in_progress()?;
        self.controller.begin_submission(number, answer)
    }

    /// # Errors
    ///
    /// As [`Self::begin_submission`], plus `NoPendingAnswer`.
    pub fn begin_pending_submission(
        &mut self,
        number: TaskNumber,
    ) -> Result<SubmissionTicket, ProgressError> {
        self.ensure_in_progress()?;
        self.controller.begin_pending_submission(number)
    }

    pub fn apply_verdict(&mut self, ticket: SubmissionTicket, verdict: &Verdict) -> SubmissionOutcome {
        self.controller.apply_verdict(ticket, verdict)
    }

    pub fn abort_submission(&mut self, ticket: SubmissionTicket) {
        self.controller.abort_submission(ticket);
    }

    /// Check the lab may be completed and return the elapsed seconds to report.
    ///
    /// # Errors
    ///
    /// `NotStarted` / `SessionCompleted` for the wrong status, `TasksOpen`
    /// while any task can still be answered.
    pub fn ensure_completable(&self) -> Result<u64, InvalidStateError> {
        self.ensure_in_progress()?;
        self.controller.ensure_all_finalized()?;
        Ok(self.elapsed_seconds())
    }

    /// Freeze the session with the backend's final report.
    pub fn mark_completed(&mut self, report: CompletionReport) {
        self.elapsed = ElapsedTime::starting_now(report.total_time_seconds);
        self.status = LabStatus::Completed;
        self.report = Some(report);
    }

    fn ensure_not_completed(&self) -> Result<(), InvalidStateError> {
        if self.status == LabStatus::Completed {
            return Err(InvalidStateError::SessionCompleted);
        }
        Ok(())
    }

    fn ensure_in_progress(&self) -> Result<(), InvalidStateError> {
        match self.status {
            LabStatus::InProgress => Ok(()),
            LabStatus::NotStarted => Err(InvalidStateError::NotStarted),
            LabStatus::Completed => Err(InvalidStateError::SessionCompleted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::model::{Difficulty, LabItem, TaskDefinition, TaskSnapshot, TaskState};
    use std::time::Duration;

    fn n(value: u32) -> TaskNumber {
        TaskNumber::new(value).unwrap()
    }

    fn definition() -> LabDefinition {
        let summary = LabSummary {
            id: LabId::new(3),
            title: "Practical work 2".into(),
            description: None,
            lab_number: 2,
            difficulty: Difficulty::Hard,
            max_score: 30,
            order: 3,
        };
        let items = vec![
            LabItem::Task(TaskDefinition {
                number: n(1),
                question: "How many failed logins are allowed?".into(),
                kind: TaskKind::Choice {
                    options: vec!["3".into(), "5".into(), "7".into()],
                },
            }),
            LabItem::Task(TaskDefinition {
                number: n(2),
                question: "Which PAM file did you edit?".into(),
                kind: TaskKind::FreeText,
            }),
        ];
        LabDefinition::new(summary, items).unwrap()
    }

    fn started() -> LabSession {
        let mut session = LabSession::open(definition(), &ProgressSnapshot::default());
        assert!(session.mark_started().unwrap());
        session
    }

    fn finish_all(session: &mut LabSession) {
        for (number, answer) in [(1, "7"), (2, "/etc/pam.d/lightdm")] {
            let ticket = session.begin_submission(n(number), answer).unwrap();
            let _ = session.apply_verdict(
                ticket,
                &Verdict {
                    is_correct: true,
                    completed: true,
                    score: 10,
                    attempts: 1,
                },
            );
        }
    }

    fn report() -> CompletionReport {
        CompletionReport {
            score: 20,
            max_score: 30,
            started_at: None,
            ended_at: None,
            total_time_seconds: 75,
        }
    }

    #[test]
    fn submission_requires_started_lab() {
        let mut session = LabSession::open(definition(), &ProgressSnapshot::default());
        let err = session.begin_submission(n(1), "7").unwrap_err();
        assert_eq!(err, InvalidStateError::NotStarted.into());
        // Drafting before the start is fine.
        session.select_choice(n(1), "7").unwrap();
    }

    #[test]
    fn starting_twice_is_a_no_op() {
        let mut session = started();
        assert!(!session.mark_started().unwrap());
        assert_eq!(session.status(), LabStatus::InProgress);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_counts_only_while_in_progress() {
        let snapshot = ProgressSnapshot {
            status: LabStatus::NotStarted,
            total_time_seconds: 40,
            tasks: Vec::new(),
        };
        let mut session = LabSession::open(definition(), &snapshot);
        tokio::time::advance(Duration::from_secs(25)).await;
        assert_eq!(session.elapsed_seconds(), 40);

        session.mark_started().unwrap();
        tokio::time::advance(Duration::from_secs(25)).await;
        assert_eq!(session.elapsed_seconds(), 65);
    }

    #[test]
    fn open_restores_snapshot() {
        let snapshot = ProgressSnapshot {
            status: LabStatus::InProgress,
            total_time_seconds: 300,
            tasks: vec![TaskSnapshot {
                number: n(1),
                completed: true,
                attempts: 3,
                score: 8,
                last_answer: Some("7".into()),
            }],
        };
        let session = LabSession::open(definition(), &snapshot);
        assert_eq!(session.status(), LabStatus::InProgress);
        assert_eq!(session.task(n(1)).unwrap().state(), TaskState::AnsweredCorrect);
        assert_eq!(session.task(n(2)).unwrap().state(), TaskState::Available);
        assert_eq!(session.elapsed_seconds(), 300);
    }

    #[test]
    fn completion_requires_finalized_tasks() {
        let session = started();
        assert_eq!(
            session.ensure_completable().unwrap_err(),
            InvalidStateError::TasksOpen { remaining: 2 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn completed_session_is_frozen() {
        let mut session = started();
        finish_all(&mut session);
        assert!(session.ensure_completable().is_ok());

        session.mark_completed(report());
        assert_eq!(session.status(), LabStatus::Completed);
        assert_eq!(session.report().map(|r| r.score), Some(20));
        tokio::time::advance(Duration::from_secs(3_600)).await;
        assert_eq!(session.elapsed_seconds(), 75);

        assert_eq!(
            session.mark_started().unwrap_err(),
            InvalidStateError::SessionCompleted
        );
        assert_eq!(
            session.set_free_text(n(2), "x").unwrap_err(),
            InvalidStateError::SessionCompleted.into()
        );
        assert_eq!(
            session.begin_submission(n(2), "x").unwrap_err(),
            InvalidStateError::SessionCompleted.into()
        );
        assert_eq!(
            session.ensure_completable().unwrap_err(),
            InvalidStateError::SessionCompleted
        );
    }

    #[test]
    fn drafts_restore_by_kind() {
        let mut session = started();
        session.restore_draft(n(1), "5").unwrap();
        assert_eq!(session.task(n(1)).unwrap().pending_answer(), Some("5"));

        let err = session.restore_draft(n(1), "42").unwrap_err();
        assert!(matches!(
            err,
            ProgressError::Validation(ValidationError::UnknownOption { .. })
        ));
        // Task 2 is still locked.
        assert!(session.restore_draft(n(2), "/etc/pam.d/lightdm").is_err());
    }
}
