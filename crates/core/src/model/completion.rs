use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::str::FromStr;

use crate::model::ids::{CertificationId, SessionId, UserId};
use crate::model::session::QuizSession;
use crate::score;
use crate::time::elapsed_seconds;

/// Delivery state of a completion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Done,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("invalid job status: {other}")),
        }
    }
}

/// Aggregation target fed by a completion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Sink {
    Statistics,
    Leaderboard,
}

impl Sink {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Sink::Statistics => "statistics",
            Sink::Leaderboard => "leaderboard",
        }
    }
}

/// Outbox record written in the same commit that completes a session.
///
/// Jobs are delivered at least once; sinks use `session_id` to drop repeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionJob {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub certification_id: CertificationId,
    pub questions_answered: u32,
    pub correct_answers: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: JobStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl CompletionJob {
    /// Job for a session that has just completed; `None` while it is in progress.
    #[must_use]
    pub fn for_completed(session: &QuizSession, enqueued_at: DateTime<Utc>) -> Option<Self> {
        let completed_at = session.completed_at()?;
        Some(Self {
            session_id: session.id(),
            user_id: session.user_id(),
            certification_id: session.certification_id(),
            questions_answered: session.answered(),
            correct_answers: session.correct_answers(),
            started_at: session.started_at(),
            completed_at,
            status: JobStatus::Pending,
            attempts: 0,
            next_attempt_at: enqueued_at,
            last_error: None,
            enqueued_at,
        })
    }

    /// Whole-number session score, 0 when nothing was answered.
    #[must_use]
    pub fn score_percentage(&self) -> u32 {
        score::score_percentage(self.correct_answers, self.questions_answered)
    }

    #[must_use]
    pub fn study_seconds(&self) -> u64 {
        elapsed_seconds(self.started_at, self.completed_at)
    }
}

/// Exponential backoff for failed deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::seconds(5),
            max_delay: Duration::minutes(30),
            max_attempts: 12,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next try after `attempts` failed tries.
    #[must_use]
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        let factor = 1_i32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Whether a job that has failed `attempts` times should be given up on.
    #[must_use]
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ids::QuestionId;
    use crate::time::fixed_now;

    #[test]
    fn job_exists_only_for_completed_sessions() {
        let mut session = QuizSession::start(
            SessionId::random(),
            UserId::new(5),
            CertificationId::new(2),
            None,
            vec![QuestionId::new(1), QuestionId::new(2)],
            fixed_now(),
        )
        .unwrap();
        session.record_answer(true, fixed_now()).unwrap();
        assert!(CompletionJob::for_completed(&session, fixed_now()).is_none());

        session
            .record_answer(false, fixed_now() + Duration::seconds(40))
            .unwrap();
        let job = CompletionJob::for_completed(&session, fixed_now()).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.score_percentage(), 50);
        assert_eq!(job.study_seconds(), 40);
        assert_eq!(job.attempts, 0);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::seconds(5),
            max_delay: Duration::seconds(60),
            max_attempts: 4,
        };
        assert_eq!(policy.delay_after(1), Duration::seconds(5));
        assert_eq!(policy.delay_after(2), Duration::seconds(10));
        assert_eq!(policy.delay_after(4), Duration::seconds(40));
        assert_eq!(policy.delay_after(5), Duration::seconds(60));
        assert_eq!(policy.delay_after(200), Duration::seconds(60));
        assert!(!policy.exhausted(3));
        assert!(policy.exhausted(4));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [JobStatus::Pending, JobStatus::Done, JobStatus::Failed] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("weird".parse::<JobStatus>().is_err());
    }
}
