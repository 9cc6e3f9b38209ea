use std::sync::Arc;

use quiz_core::model::{
    CertificationId, CertificationPerformance, SessionOutcome, UserId, UserStatistics,
};
use storage::repository::StatisticsRepository;
use tracing::debug;

use crate::error::QuizError;

/// Maintains per-user overall and per-certification running statistics.
#[derive(Clone)]
pub struct StatisticsAggregator {
    statistics: Arc<dyn StatisticsRepository>,
}

impl StatisticsAggregator {
    #[must_use]
    pub fn new(statistics: Arc<dyn StatisticsRepository>) -> Self {
        Self { statistics }
    }

    /// Fold one completed session into both aggregates.
    ///
    /// Returns `false` if this session was already applied.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::Unavailable` on storage failures; neither
    /// aggregate changes then.
    pub async fn update(&self, outcome: &SessionOutcome) -> Result<bool, QuizError> {
        let applied = self.statistics.apply_outcome(outcome).await?;
        debug!(
            session_id = %outcome.session_id,
            user_id = %outcome.user_id,
            certification_id = %outcome.certification_id,
            score = outcome.score_percentage,
            applied,
            "statistics updated"
        );
        Ok(applied)
    }

    /// Overall statistics; all zero for a user with no completed sessions.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::Unavailable` on storage failures.
    pub async fn user_statistics(&self, user_id: UserId) -> Result<UserStatistics, QuizError> {
        Ok(self
            .statistics
            .user_statistics(user_id)
            .await?
            .unwrap_or_else(|| UserStatistics::empty(user_id)))
    }

    /// # Errors
    ///
    /// Returns `QuizError::NotFound` if the user has no completed session in
    /// this certification.
    pub async fn certification_performance(
        &self,
        user_id: UserId,
        certification_id: CertificationId,
    ) -> Result<CertificationPerformance, QuizError> {
        self.statistics
            .certification_performance(user_id, certification_id)
            .await?
            .ok_or_else(|| {
                QuizError::not_found(format!(
                    "performance for user {user_id} in certification {certification_id}"
                ))
            })
    }

    /// # Errors
    ///
    /// Returns `QuizError::Unavailable` on storage failures.
    pub async fn list_certification_performance(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CertificationPerformance>, QuizError> {
        Ok(self
            .statistics
            .list_certification_performance(user_id)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::SessionId;
    use quiz_core::time::fixed_now;
    use storage::repository::InMemoryRepository;

    fn outcome(certification: u64, score: u32, answered: u32, correct: u32) -> SessionOutcome {
        SessionOutcome {
            session_id: SessionId::random(),
            user_id: UserId::new(1),
            certification_id: CertificationId::new(certification),
            certification_name: format!("Cert {certification}"),
            questions_answered: answered,
            correct_answers: correct,
            score_percentage: score,
            study_seconds: 60,
            completed_at: fixed_now(),
        }
    }

    #[tokio::test]
    async fn running_mean_matches_incremental_formula() {
        let aggregator = StatisticsAggregator::new(Arc::new(InMemoryRepository::new()));

        aggregator.update(&outcome(1, 80, 5, 4)).await.unwrap();
        let stats = aggregator.user_statistics(UserId::new(1)).await.unwrap();
        assert_eq!(stats.totals.average_score(), 80.0);

        aggregator.update(&outcome(1, 60, 5, 3)).await.unwrap();
        let stats = aggregator.user_statistics(UserId::new(1)).await.unwrap();
        assert_eq!(stats.totals.average_score(), 70.0);
        assert_eq!(stats.totals.best_score, 80);
        assert_eq!(stats.totals.sessions, 2);
    }

    #[tokio::test]
    async fn per_certification_totals_stay_separate() {
        let aggregator = StatisticsAggregator::new(Arc::new(InMemoryRepository::new()));
        aggregator.update(&outcome(1, 100, 2, 2)).await.unwrap();
        aggregator.update(&outcome(2, 50, 4, 2)).await.unwrap();

        let all = aggregator
            .list_certification_performance(UserId::new(1))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].totals.best_score, 100);
        assert_eq!(all[1].certification_name, "Cert 2");

        let overall = aggregator.user_statistics(UserId::new(1)).await.unwrap();
        assert_eq!(overall.totals.accuracy(), 66.67);

        let missing = aggregator
            .certification_performance(UserId::new(1), CertificationId::new(9))
            .await;
        assert!(matches!(missing, Err(QuizError::NotFound(_))));
    }

    #[tokio::test]
    async fn unknown_user_reads_as_empty() {
        let aggregator = StatisticsAggregator::new(Arc::new(InMemoryRepository::new()));
        let stats = aggregator.user_statistics(UserId::new(5)).await.unwrap();
        assert_eq!(stats, UserStatistics::empty(UserId::new(5)));
    }
}
