use chrono::{DateTime, Utc};
use quiz_core::model::{CompletionJob, JobStatus, SessionId};

use super::SqliteRepository;
use super::mapping::{conn, map_job_row, ts_to_i64};
use crate::repository::{CompletionQueue, StorageError};

const JOB_COLUMNS: &str = "session_id, user_id, certification_id, questions_answered, \
     correct_answers, started_at, completed_at, status, attempts, next_attempt_at, last_error, \
     enqueued_at";

fn require_row(rows_affected: u64) -> Result<(), StorageError> {
    if rows_affected == 0 {
        return Err(StorageError::NotFound);
    }
    Ok(())
}

#[async_trait::async_trait]
impl CompletionQueue for SqliteRepository {
    async fn due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<CompletionJob>, StorageError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {JOB_COLUMNS} FROM completion_jobs
            WHERE status = ?1 AND next_attempt_at <= ?2
            ORDER BY next_attempt_at ASC, enqueued_at ASC, session_id ASC
            LIMIT ?3
            "
        ))
        .bind(JobStatus::Pending.as_str())
        .bind(ts_to_i64(now))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_job_row).collect()
    }

    async fn get_job(&self, session_id: SessionId) -> Result<Option<CompletionJob>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM completion_jobs WHERE session_id = ?1"
        ))
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_job_row).transpose()
    }

    async fn mark_done(&self, session_id: SessionId, attempts: u32) -> Result<(), StorageError> {
        let res = sqlx::query(
            "UPDATE completion_jobs SET status = ?1, attempts = ?2, last_error = NULL WHERE session_id = ?3",
        )
        .bind(JobStatus::Done.as_str())
        .bind(i64::from(attempts))
        .bind(session_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        require_row(res.rows_affected())
    }

    async fn mark_retry(
        &self,
        session_id: SessionId,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            UPDATE completion_jobs
            SET status = ?1, attempts = ?2, next_attempt_at = ?3, last_error = ?4
            WHERE session_id = ?5
            ",
        )
        .bind(JobStatus::Pending.as_str())
        .bind(i64::from(attempts))
        .bind(ts_to_i64(next_attempt_at))
        .bind(error)
        .bind(session_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        require_row(res.rows_affected())
    }

    async fn mark_failed(
        &self,
        session_id: SessionId,
        attempts: u32,
        error: &str,
    ) -> Result<(), StorageError> {
        let res = sqlx::query(
            "UPDATE completion_jobs SET status = ?1, attempts = ?2, last_error = ?3 WHERE session_id = ?4",
        )
        .bind(JobStatus::Failed.as_str())
        .bind(i64::from(attempts))
        .bind(error)
        .bind(session_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        require_row(res.rows_affected())
    }

    async fn requeue_failed(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let res = sqlx::query(
            "UPDATE completion_jobs SET status = ?1, next_attempt_at = ?2 WHERE status = ?3",
        )
        .bind(JobStatus::Pending.as_str())
        .bind(ts_to_i64(now))
        .bind(JobStatus::Failed.as_str())
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(res.rows_affected())
    }
}
