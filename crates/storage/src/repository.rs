use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lab_core::model::{LabId, TaskNumber};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// An answer typed or selected locally but not yet sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftRecord {
    pub lab_id: LabId,
    pub task_number: TaskNumber,
    pub text: String,
    pub saved_at: DateTime<Utc>,
}

impl DraftRecord {
    #[must_use]
    pub fn new(
        lab_id: LabId,
        task_number: TaskNumber,
        text: impl Into<String>,
        saved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            lab_id,
            task_number,
            text: text.into(),
            saved_at,
        }
    }
}

/// Repository contract for local answer drafts, keyed by `(lab, task)`.
#[async_trait]
pub trait DraftRepository: Send + Sync {
    /// Insert or replace the draft for the record's lab and task.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the draft cannot be stored.
    async fn save_draft(&self, draft: &DraftRecord) -> Result<(), StorageError>;

    /// All drafts of a lab, ordered by task number.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on read or decode failures.
    async fn load_drafts(&self, lab_id: LabId) -> Result<Vec<DraftRecord>, StorageError>;

    /// Remove the draft of one task. Missing drafts are not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the delete fails.
    async fn delete_draft(&self, lab_id: LabId, task: TaskNumber) -> Result<(), StorageError>;

    /// Remove every draft of a lab, returning how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the delete fails.
    async fn clear_drafts(&self, lab_id: LabId) -> Result<u64, StorageError>;
}

/// Simple in-memory repository implementation for testing and offline use.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    drafts: Arc<Mutex<BTreeMap<(LabId, TaskNumber), DraftRecord>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DraftRepository for InMemoryRepository {
    async fn save_draft(&self, draft: &DraftRecord) -> Result<(), StorageError> {
        let mut guard = self
            .drafts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert((draft.lab_id, draft.task_number), draft.clone());
        Ok(())
    }

    async fn load_drafts(&self, lab_id: LabId) -> Result<Vec<DraftRecord>, StorageError> {
        let guard = self
            .drafts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .values()
            .filter(|draft| draft.lab_id == lab_id)
            .cloned()
            .collect())
    }

    async fn delete_draft(&self, lab_id: LabId, task: TaskNumber) -> Result<(), StorageError> {
        let mut guard = self
            .drafts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(&(lab_id, task));
        Ok(())
    }

    async fn clear_drafts(&self, lab_id: LabId) -> Result<u64, StorageError> {
        let mut guard = self
            .drafts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let before = guard.len();
        guard.retain(|(lab, _), _| *lab != lab_id);
        Ok(u64::try_from(before - guard.len()).unwrap_or(u64::MAX))
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub drafts: Arc<dyn DraftRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let drafts: Arc<dyn DraftRepository> = Arc::new(InMemoryRepository::new());
        Self { drafts }
    }
}
