use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs the versioned schema migrations.
///
/// Timestamps are stored as integer microseconds since the epoch so range
/// filters and ordering compare numerically.
#[allow(clippy::too_many_lines)]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: question bank, identities and sessions.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS certifications (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS subtopics (
                    id INTEGER PRIMARY KEY,
                    certification_id INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    FOREIGN KEY (certification_id) REFERENCES certifications(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS questions (
                    id INTEGER PRIMARY KEY,
                    certification_id INTEGER NOT NULL,
                    subtopic_id INTEGER,
                    text TEXT NOT NULL,
                    explanation TEXT,
                    FOREIGN KEY (certification_id) REFERENCES certifications(id) ON DELETE CASCADE,
                    FOREIGN KEY (subtopic_id) REFERENCES subtopics(id) ON DELETE SET NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_questions_pool
                ON questions (certification_id, subtopic_id, id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS choices (
                    id INTEGER PRIMARY KEY,
                    question_id INTEGER NOT NULL,
                    position INTEGER NOT NULL,
                    text TEXT NOT NULL,
                    is_correct INTEGER NOT NULL CHECK (is_correct IN (0, 1)),
                    FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_choices_question
                ON choices (question_id, position);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY,
                    username TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS quiz_sessions (
                    id TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL,
                    certification_id INTEGER NOT NULL,
                    subtopic_id INTEGER,
                    current_index INTEGER NOT NULL CHECK (current_index >= 0),
                    correct_answers INTEGER NOT NULL CHECK (correct_answers >= 0),
                    incorrect_answers INTEGER NOT NULL CHECK (incorrect_answers >= 0),
                    started_at INTEGER NOT NULL,
                    completed_at INTEGER,
                    version INTEGER NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_quiz_sessions_user_started
                ON quiz_sessions (user_id, started_at DESC);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS session_questions (
                    session_id TEXT NOT NULL,
                    position INTEGER NOT NULL,
                    question_id INTEGER NOT NULL,
                    PRIMARY KEY (session_id, position),
                    FOREIGN KEY (session_id) REFERENCES quiz_sessions(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS session_answers (
                    session_id TEXT NOT NULL,
                    question_id INTEGER NOT NULL,
                    selected_choice_id INTEGER NOT NULL,
                    is_correct INTEGER NOT NULL CHECK (is_correct IN (0, 1)),
                    position INTEGER NOT NULL,
                    answered_at INTEGER NOT NULL,
                    PRIMARY KEY (session_id, question_id),
                    FOREIGN KEY (session_id) REFERENCES quiz_sessions(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)")
            .bind(1_i64)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
    }

    // Version 2: completion outbox and aggregates.
    if !is_applied(pool, 2).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS completion_jobs (
                    session_id TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL,
                    certification_id INTEGER NOT NULL,
                    questions_answered INTEGER NOT NULL,
                    correct_answers INTEGER NOT NULL,
                    started_at INTEGER NOT NULL,
                    completed_at INTEGER NOT NULL,
                    status TEXT NOT NULL CHECK (status IN ('pending', 'done', 'failed')),
                    attempts INTEGER NOT NULL DEFAULT 0,
                    next_attempt_at INTEGER NOT NULL,
                    last_error TEXT,
                    enqueued_at INTEGER NOT NULL,
                    FOREIGN KEY (session_id) REFERENCES quiz_sessions(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_completion_jobs_due
                ON completion_jobs (status, next_attempt_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS aggregation_ledger (
                    session_id TEXT NOT NULL,
                    sink TEXT NOT NULL CHECK (sink IN ('statistics', 'leaderboard')),
                    applied_at INTEGER NOT NULL,
                    PRIMARY KEY (session_id, sink)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS user_statistics (
                    user_id INTEGER PRIMARY KEY,
                    sessions INTEGER NOT NULL,
                    questions_answered INTEGER NOT NULL,
                    correct_answers INTEGER NOT NULL,
                    score_sum INTEGER NOT NULL,
                    best_score INTEGER NOT NULL,
                    study_seconds INTEGER NOT NULL,
                    last_session_at INTEGER
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS certification_performance (
                    user_id INTEGER NOT NULL,
                    certification_id INTEGER NOT NULL,
                    certification_name TEXT NOT NULL,
                    sessions INTEGER NOT NULL,
                    questions_answered INTEGER NOT NULL,
                    correct_answers INTEGER NOT NULL,
                    score_sum INTEGER NOT NULL,
                    best_score INTEGER NOT NULL,
                    study_seconds INTEGER NOT NULL,
                    last_session_at INTEGER,
                    PRIMARY KEY (user_id, certification_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS leaderboard_entries (
                    certification_id INTEGER NOT NULL,
                    period TEXT NOT NULL CHECK (period IN ('all_time', 'monthly', 'weekly')),
                    user_id INTEGER NOT NULL,
                    username TEXT NOT NULL,
                    best_score INTEGER NOT NULL CHECK (best_score BETWEEN 0 AND 100),
                    quizzes_taken INTEGER NOT NULL,
                    score_sum INTEGER NOT NULL,
                    last_attempt_at INTEGER NOT NULL,
                    PRIMARY KEY (certification_id, period, user_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_leaderboard_rank
                ON leaderboard_entries (
                    certification_id, period, best_score DESC, last_attempt_at ASC, user_id
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)")
            .bind(2_i64)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
    }

    Ok(())
}
