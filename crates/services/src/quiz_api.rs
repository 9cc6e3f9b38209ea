//! Transport-agnostic request/response facade over the quiz services.
//!
//! Every DTO serializes with camelCase field names so an HTTP or RPC layer can
//! pass them through unchanged.

use chrono::{DateTime, Utc};
use quiz_core::model::{
    CertificationId, CertificationPerformance, ChoiceId, LeaderboardPage, LeaderboardStanding,
    PerformanceTotals, QuestionId, QuizSession, SessionId, SessionResults, SubtopicId, UserId,
};
use serde::{Deserialize, Serialize};

use crate::error::QuizError;
use crate::leaderboard::{LeaderboardRanker, parse_period};
use crate::sessions::{AnswerOutcome, AnswerSubmissionHandler, QuizSessionMachine};
use crate::statistics::StatisticsAggregator;

//
// ─── REQUESTS ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub user_id: UserId,
    pub certification_id: CertificationId,
    #[serde(default)]
    pub subtopic_id: Option<SubtopicId>,
    pub question_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerRequest {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub question_id: QuestionId,
    pub selected_choice_id: ChoiceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRequest {
    pub certification_id: CertificationId,
    /// `AllTime`, `Monthly` or `Weekly`, case-insensitive.
    pub time_period: String,
    #[serde(default)]
    pub skip: u32,
    pub take: u32,
    #[serde(default)]
    pub current_user_id: Option<UserId>,
}

//
// ─── RESPONSES ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: SessionId,
    pub certification_id: CertificationId,
    pub question_ids: Vec<QuestionId>,
    pub current_question_index: u32,
    pub is_completed: bool,
    pub started_at: DateTime<Utc>,
}

impl From<&QuizSession> for SessionResponse {
    fn from(session: &QuizSession) -> Self {
        Self {
            id: session.id(),
            certification_id: session.certification_id(),
            question_ids: session.question_ids().to_vec(),
            current_question_index: session.current_index(),
            is_completed: session.is_completed(),
            started_at: session.started_at(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerResponse {
    pub is_correct: bool,
    pub correct_choice_id: ChoiceId,
    pub explanation: Option<String>,
    pub correct_answers: u32,
    pub incorrect_answers: u32,
    pub current_question_index: u32,
    pub is_session_complete: bool,
}

impl From<AnswerOutcome> for SubmitAnswerResponse {
    fn from(outcome: AnswerOutcome) -> Self {
        Self {
            is_correct: outcome.is_correct,
            correct_choice_id: outcome.correct_choice_id,
            correct_answers: outcome.session.correct_answers(),
            incorrect_answers: outcome.session.incorrect_answers(),
            current_question_index: outcome.session.current_index(),
            is_session_complete: outcome.session.is_completed(),
            explanation: outcome.explanation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsResponse {
    pub correct_answers: u32,
    pub incorrect_answers: u32,
    pub total_questions: u32,
    pub score_percentage: f64,
    pub duration_seconds: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl From<SessionResults> for ResultsResponse {
    fn from(results: SessionResults) -> Self {
        Self {
            correct_answers: results.correct_answers,
            incorrect_answers: results.incorrect_answers,
            total_questions: results.total_questions,
            score_percentage: results.score_percentage,
            duration_seconds: results.duration_seconds,
            started_at: results.started_at,
            completed_at: results.completed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntryDto {
    pub rank: u32,
    pub user_id: UserId,
    pub username: String,
    pub best_score: u32,
    pub quizzes_taken: u32,
    pub average_score: f64,
    pub last_attempt_date: DateTime<Utc>,
    pub is_current_user: bool,
}

impl From<LeaderboardStanding> for LeaderboardEntryDto {
    fn from(standing: LeaderboardStanding) -> Self {
        Self {
            rank: standing.rank,
            average_score: standing.entry.average_score(),
            user_id: standing.entry.user_id,
            username: standing.entry.username,
            best_score: standing.entry.best_score,
            quizzes_taken: standing.entry.quizzes_taken,
            last_attempt_date: standing.entry.last_attempt_at,
            is_current_user: standing.is_current_user,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardResponse {
    pub certification_id: CertificationId,
    pub time_period: String,
    pub entries: Vec<LeaderboardEntryDto>,
    pub total_entries: u64,
    pub current_user: Option<LeaderboardEntryDto>,
}

impl From<LeaderboardPage> for LeaderboardResponse {
    fn from(page: LeaderboardPage) -> Self {
        Self {
            certification_id: page.certification_id,
            time_period: page.period.as_str().to_owned(),
            entries: page.entries.into_iter().map(Into::into).collect(),
            total_entries: page.total_entries,
            current_user: page.current_user.map(Into::into),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsDto {
    pub sessions: u32,
    pub questions_answered: u64,
    pub correct_answers: u64,
    pub accuracy: f64,
    pub average_score: f64,
    pub best_score: u32,
    pub study_seconds: u64,
    pub last_session_at: Option<DateTime<Utc>>,
}

impl From<&PerformanceTotals> for StatisticsDto {
    fn from(t: &PerformanceTotals) -> Self {
        Self {
            sessions: t.sessions,
            questions_answered: t.questions_answered,
            correct_answers: t.correct_answers,
            accuracy: t.accuracy(),
            average_score: t.average_score(),
            best_score: t.best_score,
            study_seconds: t.study_seconds,
            last_session_at: t.last_session_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificationStatisticsDto {
    pub certification_id: CertificationId,
    pub certification_name: String,
    #[serde(flatten)]
    pub statistics: StatisticsDto,
}

impl From<CertificationPerformance> for CertificationStatisticsDto {
    fn from(p: CertificationPerformance) -> Self {
        Self {
            certification_id: p.certification_id,
            statistics: StatisticsDto::from(&p.totals),
            certification_name: p.certification_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsResponse {
    pub user_id: UserId,
    pub overall: StatisticsDto,
    pub certifications: Vec<CertificationStatisticsDto>,
}

//
// ─── FACADE ────────────────────────────────────────────────────────────────────
//

/// Request/response entry points for a transport layer.
#[derive(Clone)]
pub struct QuizApi {
    sessions: QuizSessionMachine,
    answers: AnswerSubmissionHandler,
    statistics: StatisticsAggregator,
    leaderboard: LeaderboardRanker,
}

impl QuizApi {
    #[must_use]
    pub fn new(
        sessions: QuizSessionMachine,
        answers: AnswerSubmissionHandler,
        statistics: StatisticsAggregator,
        leaderboard: LeaderboardRanker,
    ) -> Self {
        Self {
            sessions,
            answers,
            statistics,
            leaderboard,
        }
    }

    /// # Errors
    ///
    /// See [`QuizSessionMachine::create_session`].
    pub async fn create_session(
        &self,
        req: CreateSessionRequest,
    ) -> Result<SessionResponse, QuizError> {
        let session = self
            .sessions
            .create_session(
                req.user_id,
                req.certification_id,
                req.subtopic_id,
                req.question_count,
            )
            .await?;
        Ok(SessionResponse::from(&session))
    }

    /// # Errors
    ///
    /// See [`AnswerSubmissionHandler::submit_answer`].
    pub async fn submit_answer(
        &self,
        req: SubmitAnswerRequest,
    ) -> Result<SubmitAnswerResponse, QuizError> {
        let outcome = self
            .answers
            .submit_answer(
                req.user_id,
                req.session_id,
                req.question_id,
                req.selected_choice_id,
            )
            .await?;
        Ok(outcome.into())
    }

    /// # Errors
    ///
    /// See [`QuizSessionMachine::get_results`].
    pub async fn get_results(
        &self,
        user_id: UserId,
        session_id: SessionId,
    ) -> Result<ResultsResponse, QuizError> {
        Ok(self.sessions.get_results(user_id, session_id).await?.into())
    }

    /// # Errors
    ///
    /// Returns `QuizError::Validation` for an unknown period or a bad page
    /// size; see [`LeaderboardRanker::query`].
    pub async fn get_leaderboard(
        &self,
        req: LeaderboardRequest,
    ) -> Result<LeaderboardResponse, QuizError> {
        let period = parse_period(&req.time_period)?;
        let page = self
            .leaderboard
            .query(
                req.certification_id,
                period,
                req.skip,
                req.take,
                req.current_user_id,
            )
            .await?;
        Ok(page.into())
    }

    /// # Errors
    ///
    /// Returns `QuizError::Unavailable` on storage failures.
    pub async fn get_statistics(&self, user_id: UserId) -> Result<StatisticsResponse, QuizError> {
        let overall = self.statistics.user_statistics(user_id).await?;
        let certifications = self
            .statistics
            .list_certification_performance(user_id)
            .await?;
        Ok(StatisticsResponse {
            user_id,
            overall: StatisticsDto::from(&overall.totals),
            certifications: certifications.into_iter().map(Into::into).collect(),
        })
    }
}
