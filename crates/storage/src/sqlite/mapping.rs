use lab_core::model::{LabId, TaskNumber};
use sqlx::Row;

use crate::repository::{DraftRecord, StorageError};

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn lab_id_to_i64(id: LabId) -> Result<i64, StorageError> {
    i64::try_from(id.value()).map_err(|_| StorageError::Serialization("lab_id overflow".into()))
}

pub(crate) fn lab_id_from_i64(v: i64) -> Result<LabId, StorageError> {
    u64::try_from(v)
        .map(LabId::new)
        .map_err(|_| StorageError::Serialization("lab_id sign overflow".into()))
}

pub(crate) fn task_number_from_i64(v: i64) -> Result<TaskNumber, StorageError> {
    u32::try_from(v)
        .ok()
        .and_then(TaskNumber::new)
        .ok_or_else(|| StorageError::Serialization(format!("invalid task_number: {v}")))
}

pub(crate) fn map_draft_row(row: &sqlx::sqlite::SqliteRow) -> Result<DraftRecord, StorageError> {
    Ok(DraftRecord {
        lab_id: lab_id_from_i64(row.try_get("lab_id").map_err(ser)?)?,
        task_number: task_number_from_i64(row.try_get("task_number").map_err(ser)?)?,
        text: row.try_get("text").map_err(ser)?,
        saved_at: row.try_get("saved_at").map_err(ser)?,
    })
}
