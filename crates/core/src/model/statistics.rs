use chrono::{DateTime, Utc};

use crate::model::ids::{CertificationId, SessionId, UserId};
use crate::score;

/// Everything the aggregators need to know about one completed session.
///
/// Built once by the completion coordinator and applied to each sink; the
/// `session_id` is the idempotency key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub certification_id: CertificationId,
    pub certification_name: String,
    pub questions_answered: u32,
    pub correct_answers: u32,
    pub score_percentage: u32,
    pub study_seconds: u64,
    pub completed_at: DateTime<Utc>,
}

/// Commutative running totals.
///
/// Only sums, counts and maxima are stored, so two outcomes can be folded in
/// either order with the same result. Accuracy and average score are derived
/// on read; `average_score` equals the incremental mean
/// `(avg * (n - 1) + new) / n` over every applied session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerformanceTotals {
    pub sessions: u32,
    pub questions_answered: u64,
    pub correct_answers: u64,
    pub score_sum: u64,
    pub best_score: u32,
    pub study_seconds: u64,
    pub last_session_at: Option<DateTime<Utc>>,
}

impl PerformanceTotals {
    /// Fold one session into the totals.
    pub fn apply(&mut self, outcome: &SessionOutcome) {
        self.sessions = self.sessions.saturating_add(1);
        self.questions_answered += u64::from(outcome.questions_answered);
        self.correct_answers += u64::from(outcome.correct_answers);
        self.score_sum += u64::from(outcome.score_percentage);
        self.best_score = self.best_score.max(outcome.score_percentage);
        self.study_seconds += outcome.study_seconds;
        self.last_session_at = Some(
            self.last_session_at
                .map_or(outcome.completed_at, |last| last.max(outcome.completed_at)),
        );
    }

    /// Correct answers over questions answered, as a percentage.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        score::percentage(self.correct_answers, self.questions_answered)
    }

    /// Mean per-session score, as a percentage.
    #[must_use]
    pub fn average_score(&self) -> f64 {
        score::mean(self.score_sum, u64::from(self.sessions))
    }
}

/// Overall statistics for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStatistics {
    pub user_id: UserId,
    pub totals: PerformanceTotals,
}

impl UserStatistics {
    #[must_use]
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            totals: PerformanceTotals::default(),
        }
    }
}

/// Statistics for one user within one certification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificationPerformance {
    pub user_id: UserId,
    pub certification_id: CertificationId,
    pub certification_name: String,
    pub totals: PerformanceTotals,
}
