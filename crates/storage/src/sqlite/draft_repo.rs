use async_trait::async_trait;
use lab_core::model::{LabId, TaskNumber};

use crate::repository::{DraftRecord, DraftRepository, StorageError};

use super::SqliteRepository;
use super::mapping::{lab_id_to_i64, map_draft_row};

#[async_trait]
impl DraftRepository for SqliteRepository {
    async fn save_draft(&self, draft: &DraftRecord) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO drafts (lab_id, task_number, text, saved_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(lab_id, task_number) DO UPDATE SET
                text = excluded.text,
                saved_at = excluded.saved_at
            ",
        )
        .bind(lab_id_to_i64(draft.lab_id)?)
        .bind(i64::from(draft.task_number.value()))
        .bind(draft.text.as_str())
        .bind(draft.saved_at)
        .execute(&self.pool)
        .await
        .map_err(|err| StorageError::Connection(err.to_string()))?;

        Ok(())
    }

    async fn load_drafts(&self, lab_id: LabId) -> Result<Vec<DraftRecord>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT lab_id, task_number, text, saved_at
            FROM drafts
            WHERE lab_id = ?1
            ORDER BY task_number ASC
            ",
        )
        .bind(lab_id_to_i64(lab_id)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| StorageError::Connection(err.to_string()))?;

        rows.iter().map(map_draft_row).collect()
    }

    async fn delete_draft(&self, lab_id: LabId, task: TaskNumber) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM drafts WHERE lab_id = ?1 AND task_number = ?2")
            .bind(lab_id_to_i64(lab_id)?)
            .bind(i64::from(task.value()))
            .execute(&self.pool)
            .await
            .map_err(|err| StorageError::Connection(err.to_string()))?;
        Ok(())
    }

    async fn clear_drafts(&self, lab_id: LabId) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM drafts WHERE lab_id = ?1")
            .bind(lab_id_to_i64(lab_id)?)
            .execute(&self.pool)
            .await
            .map_err(|err| StorageError::Connection(err.to_string()))?;
        Ok(result.rows_affected())
    }
}
