use std::sync::Arc;

use quiz_core::model::{
    Choice, ChoiceId, CompletionJob, Question, QuestionId, QuizSession, SessionAnswer, SessionId,
    UserId,
};
use storage::repository::{AnswerCommit, QuestionBank, SessionRepository};
use tracing::{debug, info};

use crate::Clock;
use crate::completion::CompletionSignal;
use crate::error::QuizError;

/// A checked answer, not yet recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerValidation {
    pub question: Question,
    pub selected: Choice,
    pub correct: Choice,
}

impl AnswerValidation {
    #[must_use]
    pub fn is_correct(&self) -> bool {
        self.selected.id == self.correct.id
    }

    #[must_use]
    pub fn explanation(&self) -> Option<&str> {
        self.question.explanation.as_deref()
    }
}

/// What the caller learns after submitting one answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub is_correct: bool,
    pub correct_choice_id: ChoiceId,
    pub explanation: Option<String>,
    /// The session after this answer was recorded.
    pub session: QuizSession,
}

impl AnswerOutcome {
    #[must_use]
    pub fn is_session_complete(&self) -> bool {
        self.session.is_completed()
    }
}

/// Validates and records answers, advancing the session one question at a time.
#[derive(Clone)]
pub struct AnswerSubmissionHandler {
    clock: Clock,
    questions: Arc<dyn QuestionBank>,
    sessions: Arc<dyn SessionRepository>,
    signal: CompletionSignal,
}

impl AnswerSubmissionHandler {
    #[must_use]
    pub fn new(
        clock: Clock,
        questions: Arc<dyn QuestionBank>,
        sessions: Arc<dyn SessionRepository>,
        signal: CompletionSignal,
    ) -> Self {
        Self {
            clock,
            questions,
            sessions,
            signal,
        }
    }

    /// Check an answer against the session and the question bank.
    ///
    /// # Errors
    ///
    /// - `QuizError::NotFound` if the session, question or selected choice
    ///   does not exist, or the question has no correct choice.
    /// - `QuizError::Conflict` if the session is already completed.
    /// - `QuizError::Validation` if the question exists but is not part of
    ///   the session.
    pub async fn validate(
        &self,
        user_id: UserId,
        session_id: SessionId,
        question_id: QuestionId,
        selected_choice_id: ChoiceId,
    ) -> Result<(QuizSession, AnswerValidation), QuizError> {
        let session = self
            .sessions
            .get_session(user_id, session_id)
            .await?
            .ok_or_else(|| QuizError::not_found(format!("session {session_id}")))?;

        if session.is_completed() {
            return Err(QuizError::Conflict("session already completed".into()));
        }

        let question = self
            .questions
            .question(question_id)
            .await?
            .ok_or_else(|| QuizError::not_found(format!("question {question_id}")))?;
        if !session.contains_question(question_id) {
            return Err(QuizError::validation(format!(
                "question {question_id} is not part of session {session_id}"
            )));
        }

        let selected = question
            .choice(selected_choice_id)
            .cloned()
            .ok_or_else(|| QuizError::not_found(format!("choice {selected_choice_id}")))?;
        let correct = question.correct_choice().cloned().ok_or_else(|| {
            QuizError::not_found(format!("correct choice for question {question_id}"))
        })?;

        Ok((
            session,
            AnswerValidation {
                question,
                selected,
                correct,
            },
        ))
    }

    /// Record an answer and advance `session`, all in one atomic commit.
    ///
    /// The final answer also enqueues the session's completion job in that
    /// same commit. Returns the correctness flag and the updated session.
    ///
    /// # Errors
    ///
    /// - `QuizError::Conflict` if the question was already answered, the
    ///   session changed since it was read, or it is already completed.
    /// - `QuizError::Unavailable` on storage failures; nothing is written then.
    pub async fn record_answer(
        &self,
        session: &QuizSession,
        question_id: QuestionId,
        selected_choice_id: ChoiceId,
        is_correct: bool,
    ) -> Result<(bool, QuizSession), QuizError> {
        let now = self.clock.now();
        let mut updated = session.clone();
        let position = updated.current_index();
        let completed = updated.record_answer(is_correct, now)?;

        let commit = AnswerCommit {
            answer: SessionAnswer {
                session_id: session.id(),
                question_id,
                selected_choice_id,
                is_correct,
                position,
                answered_at: now,
            },
            completion: if completed {
                CompletionJob::for_completed(&updated, now)
            } else {
                None
            },
            expected_version: session.version(),
            session: updated,
        };
        self.sessions.commit_answer(&commit).await?;

        debug!(
            session_id = %session.id(),
            question_id = %question_id,
            is_correct,
            index = commit.session.current_index(),
            "answer recorded"
        );
        Ok((is_correct, commit.session))
    }

    /// Validate then record an answer. Wakes the completion worker when this
    /// answer finishes the session.
    ///
    /// # Errors
    ///
    /// Any error from [`Self::validate`] or [`Self::record_answer`].
    pub async fn submit_answer(
        &self,
        user_id: UserId,
        session_id: SessionId,
        question_id: QuestionId,
        selected_choice_id: ChoiceId,
    ) -> Result<AnswerOutcome, QuizError> {
        let (session, validation) = self
            .validate(user_id, session_id, question_id, selected_choice_id)
            .await?;
        let (is_correct, session) = self
            .record_answer(
                &session,
                question_id,
                selected_choice_id,
                validation.is_correct(),
            )
            .await?;

        if session.is_completed() {
            info!(
                session_id = %session_id,
                user_id = %user_id,
                correct = session.correct_answers(),
                total = session.total_questions(),
                "quiz session completed"
            );
            self.signal.notify();
        }

        Ok(AnswerOutcome {
            is_correct,
            correct_choice_id: validation.correct.id,
            explanation: validation.explanation().map(str::to_owned),
            session,
        })
    }
}
