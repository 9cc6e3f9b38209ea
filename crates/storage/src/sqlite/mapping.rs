use chrono::{DateTime, Utc};
use quiz_core::model::{
    CertificationId, ChoiceId, CompletionJob, JobStatus, LeaderboardEntry, PerformanceTotals,
    QuestionId, QuizSession, SessionAnswer, SessionId, SubtopicId, TimePeriod, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn user_id_from_i64(v: i64) -> Result<UserId, StorageError> {
    Ok(UserId::new(i64_to_u64("user_id", v)?))
}

pub(crate) fn certification_id_from_i64(v: i64) -> Result<CertificationId, StorageError> {
    Ok(CertificationId::new(i64_to_u64("certification_id", v)?))
}

pub(crate) fn subtopic_id_from_i64(v: i64) -> Result<SubtopicId, StorageError> {
    Ok(SubtopicId::new(i64_to_u64("subtopic_id", v)?))
}

pub(crate) fn question_id_from_i64(v: i64) -> Result<QuestionId, StorageError> {
    Ok(QuestionId::new(i64_to_u64("question_id", v)?))
}

pub(crate) fn choice_id_from_i64(v: i64) -> Result<ChoiceId, StorageError> {
    Ok(ChoiceId::new(i64_to_u64("choice_id", v)?))
}

pub(crate) fn session_id_from_text(s: &str) -> Result<SessionId, StorageError> {
    s.parse::<SessionId>().map_err(ser)
}

/// Timestamps are stored as microseconds since the Unix epoch.
pub(crate) fn ts_to_i64(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

pub(crate) fn ts_from_i64(field: &'static str, v: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_micros(v)
        .ok_or_else(|| StorageError::Serialization(format!("invalid {field}: {v}")))
}

fn get_ts(row: &SqliteRow, field: &'static str) -> Result<DateTime<Utc>, StorageError> {
    ts_from_i64(field, row.try_get::<i64, _>(field).map_err(ser)?)
}

fn get_opt_ts(row: &SqliteRow, field: &'static str) -> Result<Option<DateTime<Utc>>, StorageError> {
    row.try_get::<Option<i64>, _>(field)
        .map_err(ser)?
        .map(|v| ts_from_i64(field, v))
        .transpose()
}

fn get_u32(row: &SqliteRow, field: &'static str) -> Result<u32, StorageError> {
    u32_from_i64(field, row.try_get::<i64, _>(field).map_err(ser)?)
}

fn get_u64(row: &SqliteRow, field: &'static str) -> Result<u64, StorageError> {
    i64_to_u64(field, row.try_get::<i64, _>(field).map_err(ser)?)
}

pub(crate) fn parse_time_period(s: &str) -> Result<TimePeriod, StorageError> {
    s.parse::<TimePeriod>().map_err(ser)
}

pub(crate) fn parse_job_status(s: &str) -> Result<JobStatus, StorageError> {
    s.parse::<JobStatus>().map_err(StorageError::Serialization)
}

/// Map a `quiz_sessions` row; the ordered question list lives in its own table.
pub(crate) fn map_session_row(
    row: &SqliteRow,
    question_ids: Vec<QuestionId>,
) -> Result<QuizSession, StorageError> {
    let id: String = row.try_get("id").map_err(ser)?;
    QuizSession::from_persisted(
        session_id_from_text(&id)?,
        user_id_from_i64(row.try_get::<i64, _>("user_id").map_err(ser)?)?,
        certification_id_from_i64(row.try_get::<i64, _>("certification_id").map_err(ser)?)?,
        row.try_get::<Option<i64>, _>("subtopic_id")
            .map_err(ser)?
            .map(subtopic_id_from_i64)
            .transpose()?,
        question_ids,
        get_u32(row, "current_index")?,
        get_u32(row, "correct_answers")?,
        get_u32(row, "incorrect_answers")?,
        get_ts(row, "started_at")?,
        get_opt_ts(row, "completed_at")?,
        get_u32(row, "version")?,
    )
    .map_err(ser)
}

pub(crate) fn map_answer_row(row: &SqliteRow) -> Result<SessionAnswer, StorageError> {
    let session_id: String = row.try_get("session_id").map_err(ser)?;
    Ok(SessionAnswer {
        session_id: session_id_from_text(&session_id)?,
        question_id: question_id_from_i64(row.try_get::<i64, _>("question_id").map_err(ser)?)?,
        selected_choice_id: choice_id_from_i64(
            row.try_get::<i64, _>("selected_choice_id").map_err(ser)?,
        )?,
        is_correct: row.try_get::<i64, _>("is_correct").map_err(ser)? != 0,
        position: get_u32(row, "position")?,
        answered_at: get_ts(row, "answered_at")?,
    })
}

pub(crate) fn map_job_row(row: &SqliteRow) -> Result<CompletionJob, StorageError> {
    let session_id: String = row.try_get("session_id").map_err(ser)?;
    let status: String = row.try_get("status").map_err(ser)?;
    Ok(CompletionJob {
        session_id: session_id_from_text(&session_id)?,
        user_id: user_id_from_i64(row.try_get::<i64, _>("user_id").map_err(ser)?)?,
        certification_id: certification_id_from_i64(
            row.try_get::<i64, _>("certification_id").map_err(ser)?,
        )?,
        questions_answered: get_u32(row, "questions_answered")?,
        correct_answers: get_u32(row, "correct_answers")?,
        started_at: get_ts(row, "started_at")?,
        completed_at: get_ts(row, "completed_at")?,
        status: parse_job_status(&status)?,
        attempts: get_u32(row, "attempts")?,
        next_attempt_at: get_ts(row, "next_attempt_at")?,
        last_error: row.try_get("last_error").map_err(ser)?,
        enqueued_at: get_ts(row, "enqueued_at")?,
    })
}

pub(crate) fn map_totals_row(row: &SqliteRow) -> Result<PerformanceTotals, StorageError> {
    Ok(PerformanceTotals {
        sessions: get_u32(row, "sessions")?,
        questions_answered: get_u64(row, "questions_answered")?,
        correct_answers: get_u64(row, "correct_answers")?,
        score_sum: get_u64(row, "score_sum")?,
        best_score: get_u32(row, "best_score")?,
        study_seconds: get_u64(row, "study_seconds")?,
        last_session_at: get_opt_ts(row, "last_session_at")?,
    })
}

pub(crate) fn map_entry_row(row: &SqliteRow) -> Result<LeaderboardEntry, StorageError> {
    let period: String = row.try_get("period").map_err(ser)?;
    Ok(LeaderboardEntry {
        certification_id: certification_id_from_i64(
            row.try_get::<i64, _>("certification_id").map_err(ser)?,
        )?,
        period: parse_time_period(&period)?,
        user_id: user_id_from_i64(row.try_get::<i64, _>("user_id").map_err(ser)?)?,
        username: row.try_get("username").map_err(ser)?,
        best_score: get_u32(row, "best_score")?,
        quizzes_taken: get_u32(row, "quizzes_taken")?,
        score_sum: get_u64(row, "score_sum")?,
        last_attempt_at: get_ts(row, "last_attempt_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::time::fixed_now;

    #[test]
    fn timestamps_keep_microsecond_precision() {
        let at = fixed_now() + chrono::Duration::microseconds(123_456);
        assert_eq!(ts_from_i64("at", ts_to_i64(at)).unwrap(), at);
    }

    #[test]
    fn negative_ids_are_rejected() {
        assert!(matches!(
            user_id_from_i64(-1),
            Err(StorageError::Serialization(_))
        ));
        assert!(id_i64("user_id", u64::MAX).is_err());
    }
}
