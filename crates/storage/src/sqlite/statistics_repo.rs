use chrono::Utc;
use quiz_core::model::{
    CertificationId, CertificationPerformance, SessionOutcome, Sink, UserId, UserStatistics,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use super::SqliteRepository;
use super::mapping::{
    certification_id_from_i64, conn, id_i64, map_totals_row, ser, ts_to_i64, user_id_from_i64,
};
use crate::repository::{StatisticsRepository, StorageError};

const TOTALS_COLUMNS: &str =
    "sessions, questions_answered, correct_answers, score_sum, best_score, study_seconds, last_session_at";

/// Record `(session_id, sink)` in the ledger. Returns `false` if it was already there.
pub(crate) async fn claim_ledger(
    db: &mut SqliteConnection,
    session_id: &str,
    sink: Sink,
    applied_at: i64,
) -> Result<bool, StorageError> {
    let res = sqlx::query(
        r"
        INSERT INTO aggregation_ledger (session_id, sink, applied_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(session_id, sink) DO NOTHING
        ",
    )
    .bind(session_id)
    .bind(sink.as_str())
    .bind(applied_at)
    .execute(&mut *db)
    .await
    .map_err(conn)?;
    Ok(res.rows_affected() == 1)
}

fn map_performance_row(row: &SqliteRow) -> Result<CertificationPerformance, StorageError> {
    Ok(CertificationPerformance {
        user_id: user_id_from_i64(row.try_get::<i64, _>("user_id").map_err(ser)?)?,
        certification_id: certification_id_from_i64(
            row.try_get::<i64, _>("certification_id").map_err(ser)?,
        )?,
        certification_name: row.try_get("certification_name").map_err(ser)?,
        totals: map_totals_row(row)?,
    })
}

#[async_trait::async_trait]
impl StatisticsRepository for SqliteRepository {
    async fn apply_outcome(&self, outcome: &SessionOutcome) -> Result<bool, StorageError> {
        let user_id = id_i64("user_id", outcome.user_id.value())?;
        let certification_id = id_i64("certification_id", outcome.certification_id.value())?;
        let answered = i64::from(outcome.questions_answered);
        let correct = i64::from(outcome.correct_answers);
        let score = i64::from(outcome.score_percentage);
        let study = i64::try_from(outcome.study_seconds).map_err(ser)?;
        let completed_at = ts_to_i64(outcome.completed_at);

        let mut tx = self.pool.begin().await.map_err(conn)?;

        let session_id = outcome.session_id.to_string();
        if !claim_ledger(&mut tx, &session_id, Sink::Statistics, ts_to_i64(Utc::now())).await? {
            return Ok(false);
        }

        sqlx::query(
            r"
            INSERT INTO user_statistics (
                user_id, sessions, questions_answered, correct_answers, score_sum,
                best_score, study_seconds, last_session_at
            )
            VALUES (?1, 1, ?2, ?3, ?4, ?4, ?5, ?6)
            ON CONFLICT(user_id) DO UPDATE SET
                sessions = sessions + 1,
                questions_answered = questions_answered + excluded.questions_answered,
                correct_answers = correct_answers + excluded.correct_answers,
                score_sum = score_sum + excluded.score_sum,
                best_score = MAX(best_score, excluded.best_score),
                study_seconds = study_seconds + excluded.study_seconds,
                last_session_at = MAX(COALESCE(last_session_at, excluded.last_session_at), excluded.last_session_at)
            ",
        )
        .bind(user_id)
        .bind(answered)
        .bind(correct)
        .bind(score)
        .bind(study)
        .bind(completed_at)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO certification_performance (
                user_id, certification_id, certification_name, sessions, questions_answered,
                correct_answers, score_sum, best_score, study_seconds, last_session_at
            )
            VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?6, ?7, ?8)
            ON CONFLICT(user_id, certification_id) DO UPDATE SET
                certification_name = excluded.certification_name,
                sessions = sessions + 1,
                questions_answered = questions_answered + excluded.questions_answered,
                correct_answers = correct_answers + excluded.correct_answers,
                score_sum = score_sum + excluded.score_sum,
                best_score = MAX(best_score, excluded.best_score),
                study_seconds = study_seconds + excluded.study_seconds,
                last_session_at = MAX(COALESCE(last_session_at, excluded.last_session_at), excluded.last_session_at)
            ",
        )
        .bind(user_id)
        .bind(certification_id)
        .bind(&outcome.certification_name)
        .bind(answered)
        .bind(correct)
        .bind(score)
        .bind(study)
        .bind(completed_at)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;
        Ok(true)
    }

    async fn user_statistics(
        &self,
        user_id: UserId,
    ) -> Result<Option<UserStatistics>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {TOTALS_COLUMNS} FROM user_statistics WHERE user_id = ?1"
        ))
        .bind(id_i64("user_id", user_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.map(|r| {
            Ok(UserStatistics {
                user_id,
                totals: map_totals_row(&r)?,
            })
        })
        .transpose()
    }

    async fn certification_performance(
        &self,
        user_id: UserId,
        certification_id: CertificationId,
    ) -> Result<Option<CertificationPerformance>, StorageError> {
        let row = sqlx::query(&format!(
            r"
            SELECT user_id, certification_id, certification_name, {TOTALS_COLUMNS}
            FROM certification_performance
            WHERE user_id = ?1 AND certification_id = ?2
            "
        ))
        .bind(id_i64("user_id", user_id.value())?)
        .bind(id_i64("certification_id", certification_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_performance_row).transpose()
    }

    async fn list_certification_performance(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CertificationPerformance>, StorageError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT user_id, certification_id, certification_name, {TOTALS_COLUMNS}
            FROM certification_performance
            WHERE user_id = ?1
            ORDER BY certification_id ASC
            "
        ))
        .bind(id_i64("user_id", user_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_performance_row).collect()
    }
}
