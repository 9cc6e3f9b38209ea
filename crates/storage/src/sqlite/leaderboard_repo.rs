use chrono::{DateTime, Utc};
use quiz_core::model::{
    CertificationId, LeaderboardAttempt, LeaderboardEntry, Sink, StandingKey, TimePeriod, UserId,
};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, id_i64, map_entry_row, ser, ts_to_i64};
use super::statistics_repo::claim_ledger;
use crate::repository::{LeaderboardRepository, StorageError};

const ENTRY_COLUMNS: &str = "certification_id, period, user_id, username, best_score, \
     quizzes_taken, score_sum, last_attempt_at";

#[async_trait::async_trait]
impl LeaderboardRepository for SqliteRepository {
    async fn record_attempt(
        &self,
        attempt: &LeaderboardAttempt,
        periods: &[TimePeriod],
    ) -> Result<bool, StorageError> {
        let certification_id = id_i64("certification_id", attempt.certification_id.value())?;
        let user_id = id_i64("user_id", attempt.user_id.value())?;
        let score = i64::from(attempt.score);
        let attempt_at = ts_to_i64(attempt.attempt_at);

        let mut tx = self.pool.begin().await.map_err(conn)?;

        let session_id = attempt.session_id.to_string();
        if !claim_ledger(&mut tx, &session_id, Sink::Leaderboard, ts_to_i64(Utc::now())).await? {
            return Ok(false);
        }

        for period in periods {
            sqlx::query(
                r"
                INSERT INTO leaderboard_entries (
                    certification_id, period, user_id, username, best_score,
                    quizzes_taken, score_sum, last_attempt_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, 1, ?5, ?6)
                ON CONFLICT(certification_id, period, user_id) DO UPDATE SET
                    username = excluded.username,
                    best_score = MAX(best_score, excluded.best_score),
                    quizzes_taken = quizzes_taken + 1,
                    score_sum = score_sum + excluded.score_sum,
                    last_attempt_at = MAX(last_attempt_at, excluded.last_attempt_at)
                ",
            )
            .bind(certification_id)
            .bind(period.as_str())
            .bind(user_id)
            .bind(&attempt.username)
            .bind(score)
            .bind(attempt_at)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(true)
    }

    async fn page(
        &self,
        certification_id: CertificationId,
        period: TimePeriod,
        visible_since: Option<DateTime<Utc>>,
        skip: u32,
        take: u32,
    ) -> Result<(Vec<LeaderboardEntry>, u64), StorageError> {
        let cert = id_i64("certification_id", certification_id.value())?;
        let since = visible_since.map(ts_to_i64);

        // page and total read from the same snapshot
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let rows = sqlx::query(&format!(
            r"
            SELECT {ENTRY_COLUMNS} FROM leaderboard_entries
            WHERE certification_id = ?1 AND period = ?2
              AND (?3 IS NULL OR last_attempt_at >= ?3)
            ORDER BY best_score DESC, last_attempt_at ASC, user_id ASC
            LIMIT ?4 OFFSET ?5
            "
        ))
        .bind(cert)
        .bind(period.as_str())
        .bind(since)
        .bind(i64::from(take))
        .bind(i64::from(skip))
        .fetch_all(&mut *tx)
        .await
        .map_err(conn)?;

        let entries = rows
            .iter()
            .map(map_entry_row)
            .collect::<Result<Vec<_>, _>>()?;

        let total: i64 = sqlx::query(
            r"
            SELECT COUNT(*) AS total FROM leaderboard_entries
            WHERE certification_id = ?1 AND period = ?2
              AND (?3 IS NULL OR last_attempt_at >= ?3)
            ",
        )
        .bind(cert)
        .bind(period.as_str())
        .bind(since)
        .fetch_one(&mut *tx)
        .await
        .map_err(conn)?
        .try_get("total")
        .map_err(ser)?;

        tx.commit().await.map_err(conn)?;
        Ok((entries, u64::try_from(total).map_err(ser)?))
    }

    async fn entry(
        &self,
        certification_id: CertificationId,
        period: TimePeriod,
        user_id: UserId,
    ) -> Result<Option<LeaderboardEntry>, StorageError> {
        let row = sqlx::query(&format!(
            r"
            SELECT {ENTRY_COLUMNS} FROM leaderboard_entries
            WHERE certification_id = ?1 AND period = ?2 AND user_id = ?3
            "
        ))
        .bind(id_i64("certification_id", certification_id.value())?)
        .bind(period.as_str())
        .bind(id_i64("user_id", user_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_entry_row).transpose()
    }

    async fn count_ahead(
        &self,
        certification_id: CertificationId,
        period: TimePeriod,
        visible_since: Option<DateTime<Utc>>,
        key: &StandingKey,
    ) -> Result<u64, StorageError> {
        let best = i64::from(key.best_score.0);
        let last = ts_to_i64(key.last_attempt_at);

        let ahead: i64 = sqlx::query(
            r"
            SELECT COUNT(*) AS ahead FROM leaderboard_entries
            WHERE certification_id = ?1 AND period = ?2
              AND (?3 IS NULL OR last_attempt_at >= ?3)
              AND (
                  best_score > ?4
                  OR (best_score = ?4 AND last_attempt_at < ?5)
                  OR (best_score = ?4 AND last_attempt_at = ?5 AND user_id < ?6)
              )
            ",
        )
        .bind(id_i64("certification_id", certification_id.value())?)
        .bind(period.as_str())
        .bind(visible_since.map(ts_to_i64))
        .bind(best)
        .bind(last)
        .bind(id_i64("user_id", key.user_id.value())?)
        .fetch_one(&self.pool)
        .await
        .map_err(conn)?
        .try_get("ahead")
        .map_err(ser)?;

        u64::try_from(ahead).map_err(ser)
    }
}
