use std::sync::Arc;

use chrono::{DateTime, Utc};
use quiz_core::model::{
    CertificationId, MAX_SESSION_QUESTIONS, QuizSession, SessionAnswer, SessionId, SessionResults,
    SubtopicId, UserId,
};
use storage::repository::{QuestionBank, SessionRepository};
use tracing::{debug, info};

use super::sampler::QuestionSampler;
use crate::Clock;
use crate::error::QuizError;

/// Largest page `list_sessions` serves.
pub const MAX_SESSION_PAGE: u32 = 100;

/// Optional `started_at` bounds for listing sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionRange {
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Owns session creation and read access to the session lifecycle.
///
/// Sessions move Created → `InProgress` → Completed; only
/// [`AnswerSubmissionHandler`](super::AnswerSubmissionHandler) advances them.
#[derive(Clone)]
pub struct QuizSessionMachine {
    clock: Clock,
    questions: Arc<dyn QuestionBank>,
    sessions: Arc<dyn SessionRepository>,
    sampler: Arc<QuestionSampler>,
}

impl QuizSessionMachine {
    #[must_use]
    pub fn new(
        clock: Clock,
        questions: Arc<dyn QuestionBank>,
        sessions: Arc<dyn SessionRepository>,
        sampler: Arc<QuestionSampler>,
    ) -> Self {
        Self {
            clock,
            questions,
            sessions,
            sampler,
        }
    }

    /// Start a session over a random sample of the certification's questions.
    ///
    /// # Errors
    ///
    /// - `QuizError::Validation` if `question_count` is outside `1..=50`.
    /// - `QuizError::NotFound` if the certification or subtopic does not exist,
    ///   or the subtopic belongs to another certification.
    /// - `QuizError::InvalidState` if the pool has no questions.
    /// - `QuizError::Unavailable` on storage failures.
    pub async fn create_session(
        &self,
        user_id: UserId,
        certification_id: CertificationId,
        subtopic_id: Option<SubtopicId>,
        question_count: u32,
    ) -> Result<QuizSession, QuizError> {
        if !(1..=MAX_SESSION_QUESTIONS).contains(&question_count) {
            return Err(QuizError::validation(format!(
                "question count must be between 1 and {MAX_SESSION_QUESTIONS}, got {question_count}"
            )));
        }

        if self
            .questions
            .certification(certification_id)
            .await?
            .is_none()
        {
            return Err(QuizError::not_found(format!(
                "certification {certification_id}"
            )));
        }
        if let Some(subtopic_id) = subtopic_id {
            self.questions
                .subtopic(certification_id, subtopic_id)
                .await?
                .ok_or_else(|| QuizError::not_found(format!("subtopic {subtopic_id}")))?;
        }

        let pool = self
            .questions
            .question_pool(certification_id, subtopic_id)
            .await?;
        if pool.is_empty() {
            return Err(QuizError::InvalidState("no questions available".into()));
        }
        let picked = self.sampler.sample(&pool, question_count as usize);

        let session = QuizSession::start(
            SessionId::random(),
            user_id,
            certification_id,
            subtopic_id,
            picked,
            self.clock.now(),
        )?;
        self.sessions.insert_session(&session).await?;

        info!(
            session_id = %session.id(),
            user_id = %user_id,
            certification_id = %certification_id,
            questions = session.total_questions(),
            pool = pool.len(),
            "quiz session created"
        );
        Ok(session)
    }

    /// Fetch a session owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::NotFound` if the session is absent or owned by
    /// another user.
    pub async fn get_session(
        &self,
        user_id: UserId,
        session_id: SessionId,
    ) -> Result<QuizSession, QuizError> {
        self.sessions
            .get_session(user_id, session_id)
            .await?
            .ok_or_else(|| QuizError::not_found(format!("session {session_id}")))
    }

    /// Final results of a completed session.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::NotFound` for unknown sessions and
    /// `QuizError::InvalidState` while questions remain.
    pub async fn get_results(
        &self,
        user_id: UserId,
        session_id: SessionId,
    ) -> Result<SessionResults, QuizError> {
        let session = self.get_session(user_id, session_id).await?;
        let results = session.results()?;
        debug!(session_id = %session_id, score = results.score_percentage, "results read");
        Ok(results)
    }

    /// A user's sessions, newest first.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::Validation` if `limit` is outside `1..=100` or
    /// the range is inverted.
    pub async fn list_sessions(
        &self,
        user_id: UserId,
        range: SessionRange,
        limit: u32,
    ) -> Result<Vec<QuizSession>, QuizError> {
        if !(1..=MAX_SESSION_PAGE).contains(&limit) {
            return Err(QuizError::validation(format!(
                "limit must be between 1 and {MAX_SESSION_PAGE}, got {limit}"
            )));
        }
        if matches!((range.from, range.until), (Some(from), Some(until)) if from > until) {
            return Err(QuizError::validation("range start is after range end"));
        }
        Ok(self
            .sessions
            .list_sessions(user_id, range.from, range.until, limit)
            .await?)
    }

    /// Answers recorded so far, in the order they were given.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::NotFound` if the session is absent or owned by
    /// another user.
    pub async fn list_answers(
        &self,
        user_id: UserId,
        session_id: SessionId,
    ) -> Result<Vec<SessionAnswer>, QuizError> {
        let session = self.get_session(user_id, session_id).await?;
        Ok(self.sessions.list_answers(session.id()).await?)
    }
}
