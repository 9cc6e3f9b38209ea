use chrono::{DateTime, Utc};
use quiz_core::model::{QuestionId, QuizSession, SessionAnswer, SessionId, UserId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::SqliteRepository;
use super::mapping::{
    conn, id_i64, map_answer_row, map_session_row, question_id_from_i64, ser, ts_to_i64,
};
use crate::repository::{AnswerCommit, SessionRepository, StorageError};

const SESSION_COLUMNS: &str = "id, user_id, certification_id, subtopic_id, current_index, \
     correct_answers, incorrect_answers, started_at, completed_at, version";

async fn load_question_ids(
    db: &mut SqliteConnection,
    session_id: &str,
) -> Result<Vec<QuestionId>, StorageError> {
    let rows = sqlx::query(
        "SELECT question_id FROM session_questions WHERE session_id = ?1 ORDER BY position ASC",
    )
    .bind(session_id)
    .fetch_all(&mut *db)
    .await
    .map_err(conn)?;

    rows.iter()
        .map(|r| question_id_from_i64(r.try_get::<i64, _>("question_id").map_err(ser)?))
        .collect()
}

impl SqliteRepository {
    async fn hydrate_session(&self, row: &SqliteRow) -> Result<QuizSession, StorageError> {
        let id: String = row.try_get("id").map_err(ser)?;
        let mut db = self.pool.acquire().await.map_err(conn)?;
        let question_ids = load_question_ids(&mut db, &id).await?;
        map_session_row(row, question_ids)
    }
}

#[async_trait::async_trait]
impl SessionRepository for SqliteRepository {
    async fn insert_session(&self, session: &QuizSession) -> Result<(), StorageError> {
        let id = session.id().to_string();
        let subtopic = session
            .subtopic_id()
            .map(|s| id_i64("subtopic_id", s.value()))
            .transpose()?;

        let mut tx = self.pool.begin().await.map_err(conn)?;

        let res = sqlx::query(
            r"
            INSERT INTO quiz_sessions (
                id, user_id, certification_id, subtopic_id, current_index,
                correct_answers, incorrect_answers, started_at, completed_at, version
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO NOTHING
            ",
        )
        .bind(&id)
        .bind(id_i64("user_id", session.user_id().value())?)
        .bind(id_i64("certification_id", session.certification_id().value())?)
        .bind(subtopic)
        .bind(i64::from(session.current_index()))
        .bind(i64::from(session.correct_answers()))
        .bind(i64::from(session.incorrect_answers()))
        .bind(ts_to_i64(session.started_at()))
        .bind(session.completed_at().map(ts_to_i64))
        .bind(i64::from(session.version()))
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::Conflict("session id already exists".into()));
        }

        for (position, question_id) in session.question_ids().iter().enumerate() {
            sqlx::query(
                "INSERT INTO session_questions (session_id, position, question_id) VALUES (?1, ?2, ?3)",
            )
            .bind(&id)
            .bind(i64::try_from(position).map_err(ser)?)
            .bind(id_i64("question_id", question_id.value())?)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        tracing::debug!(session_id = %id, "session inserted");
        Ok(())
    }

    async fn get_session(
        &self,
        user_id: UserId,
        session_id: SessionId,
    ) -> Result<Option<QuizSession>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM quiz_sessions WHERE id = ?1 AND user_id = ?2"
        ))
        .bind(session_id.to_string())
        .bind(id_i64("user_id", user_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        match row {
            Some(row) => self.hydrate_session(&row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn commit_answer(&self, commit: &AnswerCommit) -> Result<(), StorageError> {
        let session = &commit.session;
        let answer = &commit.answer;
        let id = session.id().to_string();

        let mut tx = self.pool.begin().await.map_err(conn)?;

        let inserted = sqlx::query(
            r"
            INSERT INTO session_answers (
                session_id, question_id, selected_choice_id, is_correct, position, answered_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(session_id, question_id) DO NOTHING
            ",
        )
        .bind(&id)
        .bind(id_i64("question_id", answer.question_id.value())?)
        .bind(id_i64("choice_id", answer.selected_choice_id.value())?)
        .bind(i64::from(answer.is_correct))
        .bind(i64::from(answer.position))
        .bind(ts_to_i64(answer.answered_at))
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        // Dropping `tx` without commit rolls back.
        if inserted.rows_affected() == 0 {
            return Err(StorageError::Conflict("question already answered".into()));
        }

        let updated = sqlx::query(
            r"
            UPDATE quiz_sessions SET
                current_index = ?1,
                correct_answers = ?2,
                incorrect_answers = ?3,
                completed_at = ?4,
                version = ?5
            WHERE id = ?6 AND user_id = ?7 AND version = ?8
            ",
        )
        .bind(i64::from(session.current_index()))
        .bind(i64::from(session.correct_answers()))
        .bind(i64::from(session.incorrect_answers()))
        .bind(session.completed_at().map(ts_to_i64))
        .bind(i64::from(session.version()))
        .bind(&id)
        .bind(id_i64("user_id", session.user_id().value())?)
        .bind(i64::from(commit.expected_version))
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        if updated.rows_affected() == 0 {
            return Err(StorageError::Conflict(
                "session was modified concurrently".into(),
            ));
        }

        if let Some(job) = &commit.completion {
            sqlx::query(
                r"
                INSERT INTO completion_jobs (
                    session_id, user_id, certification_id, questions_answered, correct_answers,
                    started_at, completed_at, status, attempts, next_attempt_at, last_error,
                    enqueued_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                ON CONFLICT(session_id) DO NOTHING
                ",
            )
            .bind(&id)
            .bind(id_i64("user_id", job.user_id.value())?)
            .bind(id_i64("certification_id", job.certification_id.value())?)
            .bind(i64::from(job.questions_answered))
            .bind(i64::from(job.correct_answers))
            .bind(ts_to_i64(job.started_at))
            .bind(ts_to_i64(job.completed_at))
            .bind(job.status.as_str())
            .bind(i64::from(job.attempts))
            .bind(ts_to_i64(job.next_attempt_at))
            .bind(&job.last_error)
            .bind(ts_to_i64(job.enqueued_at))
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn list_answers(&self, session_id: SessionId) -> Result<Vec<SessionAnswer>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT session_id, question_id, selected_choice_id, is_correct, position, answered_at
            FROM session_answers
            WHERE session_id = ?1
            ORDER BY position ASC
            ",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_answer_row).collect()
    }

    async fn list_sessions(
        &self,
        user_id: UserId,
        started_from: Option<DateTime<Utc>>,
        started_until: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<QuizSession>, StorageError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {SESSION_COLUMNS} FROM quiz_sessions
            WHERE user_id = ?1
              AND (?2 IS NULL OR started_at >= ?2)
              AND (?3 IS NULL OR started_at <= ?3)
            ORDER BY started_at DESC, id DESC
            LIMIT ?4
            "
        ))
        .bind(id_i64("user_id", user_id.value())?)
        .bind(started_from.map(ts_to_i64))
        .bind(started_until.map(ts_to_i64))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in &rows {
            sessions.push(self.hydrate_session(row).await?);
        }
        Ok(sessions)
    }
}
