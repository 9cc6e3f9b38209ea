use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::ids::{CertificationId, ChoiceId, QuestionId, SessionId, SubtopicId, UserId};
use crate::score;
use crate::time::elapsed_seconds;

/// Upper bound on questions in one session.
pub const MAX_SESSION_QUESTIONS: u32 = 50;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionStateError {
    #[error("a session needs at least one question")]
    NoQuestions,

    #[error("session has {len} questions, more than the {max} allowed")]
    TooManyQuestions { len: usize, max: u32 },

    #[error("session already completed")]
    AlreadyCompleted,

    #[error("session is not completed yet")]
    NotCompleted,

    #[error("correct ({correct}) + incorrect ({incorrect}) does not match index {index}")]
    CounterMismatch {
        correct: u32,
        incorrect: u32,
        index: u32,
    },

    #[error("question index {index} is past the end of {len} questions")]
    IndexOutOfRange { index: u32, len: usize },

    #[error("completed_at does not agree with the question index")]
    CompletionMismatch,

    #[error("completed_at is before started_at")]
    InvalidTimeRange,
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// One user's attempt at a fixed, ordered list of sampled questions.
///
/// The lifecycle is `InProgress` (index < N) then `Completed` (index == N).
/// `version` is the optimistic concurrency token; it moves forward on every
/// recorded answer so storage can reject writes based on a stale copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizSession {
    id: SessionId,
    user_id: UserId,
    certification_id: CertificationId,
    subtopic_id: Option<SubtopicId>,
    question_ids: Vec<QuestionId>,
    current_index: u32,
    correct_answers: u32,
    incorrect_answers: u32,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    version: u32,
}

impl QuizSession {
    /// Start a new session over an already-sampled question list.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::NoQuestions` for an empty list and
    /// `SessionStateError::TooManyQuestions` above [`MAX_SESSION_QUESTIONS`].
    pub fn start(
        id: SessionId,
        user_id: UserId,
        certification_id: CertificationId,
        subtopic_id: Option<SubtopicId>,
        question_ids: Vec<QuestionId>,
        started_at: DateTime<Utc>,
    ) -> Result<Self, SessionStateError> {
        check_question_count(question_ids.len())?;
        Ok(Self {
            id,
            user_id,
            certification_id,
            subtopic_id,
            question_ids,
            current_index: 0,
            correct_answers: 0,
            incorrect_answers: 0,
            started_at,
            completed_at: None,
            version: 0,
        })
    }

    /// Rehydrate a session from persisted storage, re-checking every invariant.
    ///
    /// # Errors
    ///
    /// Returns a `SessionStateError` describing the first broken invariant.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: SessionId,
        user_id: UserId,
        certification_id: CertificationId,
        subtopic_id: Option<SubtopicId>,
        question_ids: Vec<QuestionId>,
        current_index: u32,
        correct_answers: u32,
        incorrect_answers: u32,
        started_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        version: u32,
    ) -> Result<Self, SessionStateError> {
        check_question_count(question_ids.len())?;
        if current_index as usize > question_ids.len() {
            return Err(SessionStateError::IndexOutOfRange {
                index: current_index,
                len: question_ids.len(),
            });
        }
        if correct_answers.checked_add(incorrect_answers) != Some(current_index) {
            return Err(SessionStateError::CounterMismatch {
                correct: correct_answers,
                incorrect: incorrect_answers,
                index: current_index,
            });
        }
        let at_end = current_index as usize == question_ids.len();
        if at_end != completed_at.is_some() {
            return Err(SessionStateError::CompletionMismatch);
        }
        if completed_at.is_some_and(|done| done < started_at) {
            return Err(SessionStateError::InvalidTimeRange);
        }

        Ok(Self {
            id,
            user_id,
            certification_id,
            subtopic_id,
            question_ids,
            current_index,
            correct_answers,
            incorrect_answers,
            started_at,
            completed_at,
            version,
        })
    }

    /// Count one answer and advance to the next question.
    ///
    /// Returns `true` when this answer completed the session. `completed_at`
    /// is set here and nowhere else.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::AlreadyCompleted` once every question has
    /// been answered.
    pub fn record_answer(
        &mut self,
        is_correct: bool,
        answered_at: DateTime<Utc>,
    ) -> Result<bool, SessionStateError> {
        if self.is_completed() {
            return Err(SessionStateError::AlreadyCompleted);
        }

        if is_correct {
            self.correct_answers += 1;
        } else {
            self.incorrect_answers += 1;
        }
        self.current_index += 1;
        self.version = self.version.wrapping_add(1);

        if self.current_index as usize == self.question_ids.len() {
            // never earlier than the start, even with a skewed clock
            self.completed_at = Some(answered_at.max(self.started_at));
            return Ok(true);
        }
        Ok(false)
    }

    /// Final results of a completed session.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::NotCompleted` while questions remain.
    pub fn results(&self) -> Result<SessionResults, SessionStateError> {
        let completed_at = self.completed_at.ok_or(SessionStateError::NotCompleted)?;
        let total = self.total_questions();
        Ok(SessionResults {
            session_id: self.id,
            correct_answers: self.correct_answers,
            incorrect_answers: self.incorrect_answers,
            total_questions: total,
            score_percentage: score::percentage(
                u64::from(self.correct_answers),
                u64::from(total),
            ),
            duration_seconds: elapsed_seconds(self.started_at, completed_at),
            started_at: self.started_at,
            completed_at,
        })
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn certification_id(&self) -> CertificationId {
        self.certification_id
    }

    #[must_use]
    pub fn subtopic_id(&self) -> Option<SubtopicId> {
        self.subtopic_id
    }

    #[must_use]
    pub fn question_ids(&self) -> &[QuestionId] {
        &self.question_ids
    }

    #[must_use]
    pub fn contains_question(&self, question_id: QuestionId) -> bool {
        self.question_ids.contains(&question_id)
    }

    /// Question the user is expected to answer next, if any remain.
    #[must_use]
    pub fn current_question(&self) -> Option<QuestionId> {
        self.question_ids.get(self.current_index as usize).copied()
    }

    #[must_use]
    pub fn current_index(&self) -> u32 {
        self.current_index
    }

    #[must_use]
    pub fn total_questions(&self) -> u32 {
        // bounded by MAX_SESSION_QUESTIONS at construction
        u32::try_from(self.question_ids.len()).unwrap_or(MAX_SESSION_QUESTIONS)
    }

    #[must_use]
    pub fn correct_answers(&self) -> u32 {
        self.correct_answers
    }

    #[must_use]
    pub fn incorrect_answers(&self) -> u32 {
        self.incorrect_answers
    }

    /// Answers recorded so far.
    #[must_use]
    pub fn answered(&self) -> u32 {
        self.correct_answers + self.incorrect_answers
    }

    /// Whole-number score over answered questions.
    #[must_use]
    pub fn score_percentage(&self) -> u32 {
        score::score_percentage(self.correct_answers, self.answered())
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }
}

fn check_question_count(len: usize) -> Result<(), SessionStateError> {
    if len == 0 {
        return Err(SessionStateError::NoQuestions);
    }
    if len > MAX_SESSION_QUESTIONS as usize {
        return Err(SessionStateError::TooManyQuestions {
            len,
            max: MAX_SESSION_QUESTIONS,
        });
    }
    Ok(())
}

//
// ─── ANSWERS & RESULTS ─────────────────────────────────────────────────────────
//

/// A recorded answer. At most one exists per (session, question).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAnswer {
    pub session_id: SessionId,
    pub question_id: QuestionId,
    pub selected_choice_id: ChoiceId,
    pub is_correct: bool,
    /// Index of the session when this answer was recorded.
    pub position: u32,
    pub answered_at: DateTime<Utc>,
}

/// Outcome of a completed session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionResults {
    pub session_id: SessionId,
    pub correct_answers: u32,
    pub incorrect_answers: u32,
    pub total_questions: u32,
    /// Correct over total, two decimals.
    pub score_percentage: f64,
    pub duration_seconds: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
