use std::sync::Arc;

use storage::repository::Storage;

use crate::Clock;
use crate::completion::{CompletionCoordinator, CompletionSignal};
use crate::config::ServiceConfig;
use crate::error::BootstrapError;
use crate::leaderboard::LeaderboardRanker;
use crate::quiz_api::QuizApi;
use crate::sessions::{AnswerSubmissionHandler, QuestionSampler, QuizSessionMachine};
use crate::statistics::StatisticsAggregator;

/// Wires every quiz service to one storage backend.
#[derive(Clone)]
pub struct QuizServices {
    sessions: Arc<QuizSessionMachine>,
    answers: Arc<AnswerSubmissionHandler>,
    completion: Arc<CompletionCoordinator>,
    statistics: Arc<StatisticsAggregator>,
    leaderboard: Arc<LeaderboardRanker>,
    api: Arc<QuizApi>,
}

impl QuizServices {
    #[must_use]
    pub fn new(storage: &Storage, clock: Clock, config: &ServiceConfig) -> Self {
        let signal = CompletionSignal::new();
        let sampler = Arc::new(QuestionSampler::from_seed_option(config.sampling_seed));

        let sessions = QuizSessionMachine::new(
            clock,
            Arc::clone(&storage.questions),
            Arc::clone(&storage.sessions),
            sampler,
        );
        let answers = AnswerSubmissionHandler::new(
            clock,
            Arc::clone(&storage.questions),
            Arc::clone(&storage.sessions),
            signal.clone(),
        );
        let statistics = StatisticsAggregator::new(Arc::clone(&storage.statistics));
        let leaderboard = LeaderboardRanker::new(clock, Arc::clone(&storage.leaderboard));
        let completion = CompletionCoordinator::new(
            clock,
            config,
            Arc::clone(&storage.questions),
            Arc::clone(&storage.identities),
            Arc::clone(&storage.completions),
            statistics.clone(),
            leaderboard.clone(),
            signal,
        );
        let api = QuizApi::new(
            sessions.clone(),
            answers.clone(),
            statistics.clone(),
            leaderboard.clone(),
        );

        Self {
            sessions: Arc::new(sessions),
            answers: Arc::new(answers),
            completion: Arc::new(completion),
            statistics: Arc::new(statistics),
            leaderboard: Arc::new(leaderboard),
            api: Arc::new(api),
        }
    }

    /// Build services backed by `SQLite` storage, running migrations first.
    ///
    /// # Errors
    ///
    /// Returns `BootstrapError` if the database cannot be opened or migrated.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        config: &ServiceConfig,
    ) -> Result<Self, BootstrapError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::new(&storage, clock, config))
    }

    #[must_use]
    pub fn sessions(&self) -> Arc<QuizSessionMachine> {
        Arc::clone(&self.sessions)
    }

    #[must_use]
    pub fn answers(&self) -> Arc<AnswerSubmissionHandler> {
        Arc::clone(&self.answers)
    }

    #[must_use]
    pub fn completion(&self) -> Arc<CompletionCoordinator> {
        Arc::clone(&self.completion)
    }

    #[must_use]
    pub fn statistics(&self) -> Arc<StatisticsAggregator> {
        Arc::clone(&self.statistics)
    }

    #[must_use]
    pub fn leaderboard(&self) -> Arc<LeaderboardRanker> {
        Arc::clone(&self.leaderboard)
    }

    #[must_use]
    pub fn api(&self) -> Arc<QuizApi> {
        Arc::clone(&self.api)
    }
}
