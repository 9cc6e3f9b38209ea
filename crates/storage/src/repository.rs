use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quiz_core::model::{
    Certification, CertificationId, CertificationPerformance, CompletionJob, JobStatus,
    LeaderboardAttempt, LeaderboardEntry, PerformanceTotals, Question, QuestionId, QuizSession,
    SessionAnswer, SessionId, SessionOutcome, Sink, StandingKey, Subtopic, SubtopicId, TimePeriod,
    UserId, UserStatistics,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── COLLABORATORS ─────────────────────────────────────────────────────────────
//

/// Read access to certifications, subtopics and questions.
#[async_trait]
pub trait QuestionBank: Send + Sync {
    /// Fetch a certification by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the bank cannot be read.
    async fn certification(
        &self,
        id: CertificationId,
    ) -> Result<Option<Certification>, StorageError>;

    /// Fetch a subtopic, only if it belongs to `certification_id`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the bank cannot be read.
    async fn subtopic(
        &self,
        certification_id: CertificationId,
        id: SubtopicId,
    ) -> Result<Option<Subtopic>, StorageError>;

    /// IDs of every question in the pool, in ascending ID order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the bank cannot be read.
    async fn question_pool(
        &self,
        certification_id: CertificationId,
        subtopic_id: Option<SubtopicId>,
    ) -> Result<Vec<QuestionId>, StorageError>;

    /// Fetch a question with its choices.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the bank cannot be read.
    async fn question(&self, id: QuestionId) -> Result<Option<Question>, StorageError>;
}

/// Resolves display names for leaderboard attribution.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the directory cannot be read.
    async fn username(&self, user_id: UserId) -> Result<Option<String>, StorageError>;
}

//
// ─── SESSIONS ──────────────────────────────────────────────────────────────────
//

/// Everything written when one answer is recorded.
///
/// Adapters apply the whole commit atomically: the answer, the session update
/// guarded by `expected_version`, and the completion job when present.
#[derive(Debug, Clone)]
pub struct AnswerCommit {
    pub answer: SessionAnswer,
    pub session: QuizSession,
    pub expected_version: u32,
    pub completion: Option<CompletionJob>,
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Persist a freshly created session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the ID is already taken.
    async fn insert_session(&self, session: &QuizSession) -> Result<(), StorageError>;

    /// Fetch a session owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on read or decode failures.
    async fn get_session(
        &self,
        user_id: UserId,
        session_id: SessionId,
    ) -> Result<Option<QuizSession>, StorageError>;

    /// Apply an [`AnswerCommit`] atomically.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` when the question was already answered
    /// or the stored version differs from `expected_version`. Nothing is
    /// written in either case.
    async fn commit_answer(&self, commit: &AnswerCommit) -> Result<(), StorageError>;

    /// Answers recorded for a session, in answer order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on read or decode failures.
    async fn list_answers(&self, session_id: SessionId) -> Result<Vec<SessionAnswer>, StorageError>;

    /// A user's sessions, newest first, filtered by `started_at` range.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on read or decode failures.
    async fn list_sessions(
        &self,
        user_id: UserId,
        started_from: Option<DateTime<Utc>>,
        started_until: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<QuizSession>, StorageError>;
}

//
// ─── COMPLETION OUTBOX ─────────────────────────────────────────────────────────
//

/// Durable queue of completion jobs written by [`SessionRepository::commit_answer`].
#[async_trait]
pub trait CompletionQueue: Send + Sync {
    /// Pending jobs whose `next_attempt_at` has passed, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on read or decode failures.
    async fn due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<CompletionJob>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on read or decode failures.
    async fn get_job(&self, session_id: SessionId) -> Result<Option<CompletionJob>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the job does not exist.
    async fn mark_done(&self, session_id: SessionId, attempts: u32) -> Result<(), StorageError>;

    /// Keep the job pending and push its next try out.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the job does not exist.
    async fn mark_retry(
        &self,
        session_id: SessionId,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StorageError>;

    /// Give up on the job until it is requeued.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the job does not exist.
    async fn mark_failed(
        &self,
        session_id: SessionId,
        attempts: u32,
        error: &str,
    ) -> Result<(), StorageError>;

    /// Move every failed job back to pending, due at `now`. Returns the count.
    ///
    /// Attempt counts are kept, so a requeued job that fails again goes
    /// straight back to failed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on write failures.
    async fn requeue_failed(&self, now: DateTime<Utc>) -> Result<u64, StorageError>;
}

//
// ─── AGGREGATES ────────────────────────────────────────────────────────────────
//

#[async_trait]
pub trait StatisticsRepository: Send + Sync {
    /// Add one session to the user's overall and per-certification totals.
    ///
    /// Increments are applied in place, never as read-modify-write, and the
    /// session is recorded in the aggregation ledger in the same step.
    /// Returns `false` when this session had already been applied.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on write failures; nothing is applied then.
    async fn apply_outcome(&self, outcome: &SessionOutcome) -> Result<bool, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on read or decode failures.
    async fn user_statistics(&self, user_id: UserId)
    -> Result<Option<UserStatistics>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on read or decode failures.
    async fn certification_performance(
        &self,
        user_id: UserId,
        certification_id: CertificationId,
    ) -> Result<Option<CertificationPerformance>, StorageError>;

    /// Every certification the user has completed a session in, by certification ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on read or decode failures.
    async fn list_certification_performance(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CertificationPerformance>, StorageError>;
}

#[async_trait]
pub trait LeaderboardRepository: Send + Sync {
    /// Upsert the user's entry in each listed period's partition.
    ///
    /// Returns `false` when this session had already been applied.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on write failures; nothing is applied then.
    async fn record_attempt(
        &self,
        attempt: &LeaderboardAttempt,
        periods: &[TimePeriod],
    ) -> Result<bool, StorageError>;

    /// One sorted page of a partition plus the partition's total size.
    ///
    /// Entries whose `last_attempt_at` is before `visible_since` are skipped.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on read or decode failures.
    async fn page(
        &self,
        certification_id: CertificationId,
        period: TimePeriod,
        visible_since: Option<DateTime<Utc>>,
        skip: u32,
        take: u32,
    ) -> Result<(Vec<LeaderboardEntry>, u64), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on read or decode failures.
    async fn entry(
        &self,
        certification_id: CertificationId,
        period: TimePeriod,
        user_id: UserId,
    ) -> Result<Option<LeaderboardEntry>, StorageError>;

    /// Number of visible entries that sort strictly before `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on read failures.
    async fn count_ahead(
        &self,
        certification_id: CertificationId,
        period: TimePeriod,
        visible_since: Option<DateTime<Utc>>,
        key: &StandingKey,
    ) -> Result<u64, StorageError>;
}

//
// ─── IN-MEMORY ADAPTER ─────────────────────────────────────────────────────────
//

#[derive(Default)]
struct BankTables {
    certifications: HashMap<CertificationId, Certification>,
    subtopics: HashMap<SubtopicId, Subtopic>,
    questions: BTreeMap<QuestionId, Question>,
    users: HashMap<UserId, String>,
}

#[derive(Default)]
struct SessionTables {
    sessions: HashMap<SessionId, QuizSession>,
    answers: HashMap<(SessionId, QuestionId), SessionAnswer>,
    jobs: HashMap<SessionId, CompletionJob>,
}

/// Entries of every partition plus a sorted key set per partition, so pages
/// and ranks are read straight off the order instead of re-sorting.
#[derive(Default)]
struct LeaderboardIndex {
    entries: HashMap<(CertificationId, TimePeriod, UserId), LeaderboardEntry>,
    sorted: HashMap<(CertificationId, TimePeriod), BTreeSet<StandingKey>>,
}

impl LeaderboardIndex {
    fn upsert(&mut self, period: TimePeriod, attempt: &LeaderboardAttempt) {
        let partition = (attempt.certification_id, period);
        let keys = self.sorted.entry(partition).or_default();
        match self
            .entries
            .get_mut(&(attempt.certification_id, period, attempt.user_id))
        {
            Some(entry) => {
                keys.remove(&entry.standing_key());
                entry.apply(attempt);
                keys.insert(entry.standing_key());
            }
            None => {
                let entry = LeaderboardEntry::from_attempt(period, attempt);
                keys.insert(entry.standing_key());
                self.entries
                    .insert((attempt.certification_id, period, attempt.user_id), entry);
            }
        }
    }

    fn visible(
        &self,
        certification_id: CertificationId,
        period: TimePeriod,
        visible_since: Option<DateTime<Utc>>,
    ) -> impl Iterator<Item = &StandingKey> {
        self.sorted
            .get(&(certification_id, period))
            .into_iter()
            .flatten()
            .filter(move |k| visible_since.is_none_or(|since| k.last_attempt_at >= since))
    }
}

#[derive(Default)]
struct AggregateTables {
    ledger: HashSet<(SessionId, Sink)>,
    users: HashMap<UserId, PerformanceTotals>,
    certifications: HashMap<(UserId, CertificationId), CertificationPerformance>,
    leaderboard: LeaderboardIndex,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StorageError> {
    mutex
        .lock()
        .map_err(|e| StorageError::Connection(e.to_string()))
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// Each trait's writes happen under one lock, which gives the same atomicity
/// the `SQLite` adapter gets from transactions.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    bank: Arc<Mutex<BankTables>>,
    sessions: Arc<Mutex<SessionTables>>,
    aggregates: Arc<Mutex<AggregateTables>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn insert_certification(&self, certification: Certification) -> Result<(), StorageError> {
        lock(&self.bank)?
            .certifications
            .insert(certification.id, certification);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn insert_subtopic(&self, subtopic: Subtopic) -> Result<(), StorageError> {
        lock(&self.bank)?.subtopics.insert(subtopic.id, subtopic);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn insert_question(&self, question: Question) -> Result<(), StorageError> {
        lock(&self.bank)?.questions.insert(question.id, question);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn insert_user(&self, user_id: UserId, username: &str) -> Result<(), StorageError> {
        lock(&self.bank)?.users.insert(user_id, username.to_owned());
        Ok(())
    }
}

#[async_trait]
impl QuestionBank for InMemoryRepository {
    async fn certification(
        &self,
        id: CertificationId,
    ) -> Result<Option<Certification>, StorageError> {
        Ok(lock(&self.bank)?.certifications.get(&id).cloned())
    }

    async fn subtopic(
        &self,
        certification_id: CertificationId,
        id: SubtopicId,
    ) -> Result<Option<Subtopic>, StorageError> {
        Ok(lock(&self.bank)?
            .subtopics
            .get(&id)
            .filter(|s| s.certification_id == certification_id)
            .cloned())
    }

    async fn question_pool(
        &self,
        certification_id: CertificationId,
        subtopic_id: Option<SubtopicId>,
    ) -> Result<Vec<QuestionId>, StorageError> {
        let guard = lock(&self.bank)?;
        Ok(guard
            .questions
            .values()
            .filter(|q| q.certification_id == certification_id)
            .filter(|q| subtopic_id.is_none() || q.subtopic_id == subtopic_id)
            .map(|q| q.id)
            .collect())
    }

    async fn question(&self, id: QuestionId) -> Result<Option<Question>, StorageError> {
        Ok(lock(&self.bank)?.questions.get(&id).cloned())
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryRepository {
    async fn username(&self, user_id: UserId) -> Result<Option<String>, StorageError> {
        Ok(lock(&self.bank)?.users.get(&user_id).cloned())
    }
}

#[async_trait]
impl SessionRepository for InMemoryRepository {
    async fn insert_session(&self, session: &QuizSession) -> Result<(), StorageError> {
        let mut guard = lock(&self.sessions)?;
        if guard.sessions.contains_key(&session.id()) {
            return Err(StorageError::Conflict("session id already exists".into()));
        }
        guard.sessions.insert(session.id(), session.clone());
        Ok(())
    }

    async fn get_session(
        &self,
        user_id: UserId,
        session_id: SessionId,
    ) -> Result<Option<QuizSession>, StorageError> {
        Ok(lock(&self.sessions)?
            .sessions
            .get(&session_id)
            .filter(|s| s.user_id() == user_id)
            .cloned())
    }

    async fn commit_answer(&self, commit: &AnswerCommit) -> Result<(), StorageError> {
        let mut guard = lock(&self.sessions)?;
        let session_id = commit.session.id();
        let answer_key = (session_id, commit.answer.question_id);

        if guard.answers.contains_key(&answer_key) {
            return Err(StorageError::Conflict("question already answered".into()));
        }
        let stored_version = guard
            .sessions
            .get(&session_id)
            .filter(|s| s.user_id() == commit.session.user_id())
            .map(QuizSession::version)
            .ok_or(StorageError::NotFound)?;
        if stored_version != commit.expected_version {
            return Err(StorageError::Conflict(
                "session was modified concurrently".into(),
            ));
        }

        guard.answers.insert(answer_key, commit.answer.clone());
        guard.sessions.insert(session_id, commit.session.clone());
        if let Some(job) = &commit.completion {
            guard.jobs.entry(session_id).or_insert_with(|| job.clone());
        }
        Ok(())
    }

    async fn list_answers(&self, session_id: SessionId) -> Result<Vec<SessionAnswer>, StorageError> {
        let guard = lock(&self.sessions)?;
        let mut answers: Vec<_> = guard
            .answers
            .values()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect();
        answers.sort_by_key(|a| a.position);
        Ok(answers)
    }

    async fn list_sessions(
        &self,
        user_id: UserId,
        started_from: Option<DateTime<Utc>>,
        started_until: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<QuizSession>, StorageError> {
        let guard = lock(&self.sessions)?;
        let mut sessions: Vec<_> = guard
            .sessions
            .values()
            .filter(|s| s.user_id() == user_id)
            .filter(|s| started_from.is_none_or(|from| s.started_at() >= from))
            .filter(|s| started_until.is_none_or(|until| s.started_at() <= until))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| {
            b.started_at()
                .cmp(&a.started_at())
                .then_with(|| b.id().cmp(&a.id()))
        });
        sessions.truncate(limit as usize);
        Ok(sessions)
    }
}

#[async_trait]
impl CompletionQueue for InMemoryRepository {
    async fn due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<CompletionJob>, StorageError> {
        let guard = lock(&self.sessions)?;
        let mut due: Vec<_> = guard
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|j| (j.next_attempt_at, j.enqueued_at, j.session_id));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn get_job(&self, session_id: SessionId) -> Result<Option<CompletionJob>, StorageError> {
        Ok(lock(&self.sessions)?.jobs.get(&session_id).cloned())
    }

    async fn mark_done(&self, session_id: SessionId, attempts: u32) -> Result<(), StorageError> {
        let mut guard = lock(&self.sessions)?;
        let job = guard
            .jobs
            .get_mut(&session_id)
            .ok_or(StorageError::NotFound)?;
        job.status = JobStatus::Done;
        job.attempts = attempts;
        job.last_error = None;
        Ok(())
    }

    async fn mark_retry(
        &self,
        session_id: SessionId,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StorageError> {
        let mut guard = lock(&self.sessions)?;
        let job = guard
            .jobs
            .get_mut(&session_id)
            .ok_or(StorageError::NotFound)?;
        job.status = JobStatus::Pending;
        job.attempts = attempts;
        job.next_attempt_at = next_attempt_at;
        job.last_error = Some(error.to_owned());
        Ok(())
    }

    async fn mark_failed(
        &self,
        session_id: SessionId,
        attempts: u32,
        error: &str,
    ) -> Result<(), StorageError> {
        let mut guard = lock(&self.sessions)?;
        let job = guard
            .jobs
            .get_mut(&session_id)
            .ok_or(StorageError::NotFound)?;
        job.status = JobStatus::Failed;
        job.attempts = attempts;
        job.last_error = Some(error.to_owned());
        Ok(())
    }

    async fn requeue_failed(&self, now: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut guard = lock(&self.sessions)?;
        let mut count = 0;
        for job in guard
            .jobs
            .values_mut()
            .filter(|j| j.status == JobStatus::Failed)
        {
            job.status = JobStatus::Pending;
            job.next_attempt_at = now;
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait]
impl StatisticsRepository for InMemoryRepository {
    async fn apply_outcome(&self, outcome: &SessionOutcome) -> Result<bool, StorageError> {
        let mut guard = lock(&self.aggregates)?;
        if !guard.ledger.insert((outcome.session_id, Sink::Statistics)) {
            return Ok(false);
        }
        guard
            .users
            .entry(outcome.user_id)
            .or_default()
            .apply(outcome);
        let performance = guard
            .certifications
            .entry((outcome.user_id, outcome.certification_id))
            .or_insert_with(|| CertificationPerformance {
                user_id: outcome.user_id,
                certification_id: outcome.certification_id,
                certification_name: outcome.certification_name.clone(),
                totals: PerformanceTotals::default(),
            });
        performance
            .certification_name
            .clone_from(&outcome.certification_name);
        performance.totals.apply(outcome);
        Ok(true)
    }

    async fn user_statistics(
        &self,
        user_id: UserId,
    ) -> Result<Option<UserStatistics>, StorageError> {
        Ok(lock(&self.aggregates)?
            .users
            .get(&user_id)
            .map(|totals| UserStatistics {
                user_id,
                totals: totals.clone(),
            }))
    }

    async fn certification_performance(
        &self,
        user_id: UserId,
        certification_id: CertificationId,
    ) -> Result<Option<CertificationPerformance>, StorageError> {
        Ok(lock(&self.aggregates)?
            .certifications
            .get(&(user_id, certification_id))
            .cloned())
    }

    async fn list_certification_performance(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CertificationPerformance>, StorageError> {
        let guard = lock(&self.aggregates)?;
        let mut out: Vec<_> = guard
            .certifications
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|p| p.certification_id);
        Ok(out)
    }
}

#[async_trait]
impl LeaderboardRepository for InMemoryRepository {
    async fn record_attempt(
        &self,
        attempt: &LeaderboardAttempt,
        periods: &[TimePeriod],
    ) -> Result<bool, StorageError> {
        let mut guard = lock(&self.aggregates)?;
        if !guard.ledger.insert((attempt.session_id, Sink::Leaderboard)) {
            return Ok(false);
        }
        for period in periods {
            guard.leaderboard.upsert(*period, attempt);
        }
        Ok(true)
    }

    async fn page(
        &self,
        certification_id: CertificationId,
        period: TimePeriod,
        visible_since: Option<DateTime<Utc>>,
        skip: u32,
        take: u32,
    ) -> Result<(Vec<LeaderboardEntry>, u64), StorageError> {
        let guard = lock(&self.aggregates)?;
        let index = &guard.leaderboard;
        let total = index.visible(certification_id, period, visible_since).count() as u64;
        let entries = index
            .visible(certification_id, period, visible_since)
            .skip(skip as usize)
            .take(take as usize)
            .filter_map(|k| {
                index
                    .entries
                    .get(&(certification_id, period, k.user_id))
                    .cloned()
            })
            .collect();
        Ok((entries, total))
    }

    async fn entry(
        &self,
        certification_id: CertificationId,
        period: TimePeriod,
        user_id: UserId,
    ) -> Result<Option<LeaderboardEntry>, StorageError> {
        Ok(lock(&self.aggregates)?
            .leaderboard
            .entries
            .get(&(certification_id, period, user_id))
            .cloned())
    }

    async fn count_ahead(
        &self,
        certification_id: CertificationId,
        period: TimePeriod,
        visible_since: Option<DateTime<Utc>>,
        key: &StandingKey,
    ) -> Result<u64, StorageError> {
        let guard = lock(&self.aggregates)?;
        Ok(guard
            .leaderboard
            .visible(certification_id, period, visible_since)
            .take_while(|k| *k < key)
            .count() as u64)
    }
}

/// Aggregates every repository behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub questions: Arc<dyn QuestionBank>,
    pub identities: Arc<dyn IdentityDirectory>,
    pub sessions: Arc<dyn SessionRepository>,
    pub completions: Arc<dyn CompletionQueue>,
    pub statistics: Arc<dyn StatisticsRepository>,
    pub leaderboard: Arc<dyn LeaderboardRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_in_memory(&InMemoryRepository::new())
    }

    /// Wrap an existing in-memory repository, e.g. one a test has seeded.
    #[must_use]
    pub fn from_in_memory(repo: &InMemoryRepository) -> Self {
        Self {
            questions: Arc::new(repo.clone()),
            identities: Arc::new(repo.clone()),
            sessions: Arc::new(repo.clone()),
            completions: Arc::new(repo.clone()),
            statistics: Arc::new(repo.clone()),
            leaderboard: Arc::new(repo.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use quiz_core::model::ChoiceId;
    use quiz_core::time::fixed_now;

    fn session(n: u64) -> QuizSession {
        QuizSession::start(
            SessionId::random(),
            UserId::new(1),
            CertificationId::new(1),
            None,
            (1..=n).map(QuestionId::new).collect(),
            fixed_now(),
        )
        .unwrap()
    }

    fn commit_for(session: &QuizSession, question: u64, is_correct: bool) -> AnswerCommit {
        let expected_version = session.version();
        let mut updated = session.clone();
        let position = updated.current_index();
        updated.record_answer(is_correct, fixed_now()).unwrap();
        AnswerCommit {
            answer: SessionAnswer {
                session_id: session.id(),
                question_id: QuestionId::new(question),
                selected_choice_id: ChoiceId::new(1),
                is_correct,
                position,
                answered_at: fixed_now(),
            },
            completion: CompletionJob::for_completed(&updated, fixed_now()),
            session: updated,
            expected_version,
        }
    }

    fn attempt(user: u64, score: u32, at: DateTime<Utc>) -> LeaderboardAttempt {
        LeaderboardAttempt {
            session_id: SessionId::random(),
            user_id: UserId::new(user),
            username: format!("user{user}"),
            certification_id: CertificationId::new(1),
            score,
            attempt_at: at,
        }
    }

    #[tokio::test]
    async fn commit_rejects_duplicates_and_stale_versions() {
        let repo = InMemoryRepository::new();
        let s = session(2);
        repo.insert_session(&s).await.unwrap();

        let first = commit_for(&s, 1, true);
        repo.commit_answer(&first).await.unwrap();

        // stale copy of the session answering a different question
        let stale = commit_for(&s, 2, true);
        let err = repo.commit_answer(&stale).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        // fresh copy re-answering question 1
        let dup = commit_for(&first.session, 1, false);
        let err = repo.commit_answer(&dup).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        let stored = repo.get_session(UserId::new(1), s.id()).await.unwrap().unwrap();
        assert_eq!(stored.current_index(), 1);
        assert_eq!(repo.list_answers(s.id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn completing_commit_enqueues_job() {
        let repo = InMemoryRepository::new();
        let s = session(1);
        repo.insert_session(&s).await.unwrap();
        repo.commit_answer(&commit_for(&s, 1, true)).await.unwrap();

        let due = repo.due_jobs(fixed_now(), 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].session_id, s.id());

        repo.mark_retry(s.id(), 1, fixed_now() + Duration::minutes(1), "boom")
            .await
            .unwrap();
        assert!(repo.due_jobs(fixed_now(), 10).await.unwrap().is_empty());

        repo.mark_failed(s.id(), 2, "boom").await.unwrap();
        assert_eq!(repo.requeue_failed(fixed_now()).await.unwrap(), 1);
        let job = repo.get_job(s.id()).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test]
    async fn sessions_are_scoped_to_their_owner() {
        let repo = InMemoryRepository::new();
        let s = session(1);
        repo.insert_session(&s).await.unwrap();
        assert!(repo.get_session(UserId::new(2), s.id()).await.unwrap().is_none());
        assert!(repo.insert_session(&s).await.is_err());
    }

    #[tokio::test]
    async fn leaderboard_index_pages_in_rank_order() {
        let repo = InMemoryRepository::new();
        let now = fixed_now();
        for (user, score, hours_ago) in [(1, 70, 1), (2, 90, 1), (3, 90, 5), (4, 40, 200)] {
            repo.record_attempt(
                &attempt(user, score, now - Duration::hours(hours_ago)),
                &[TimePeriod::AllTime, TimePeriod::Weekly],
            )
            .await
            .unwrap();
        }

        let (page, total) = repo
            .page(CertificationId::new(1), TimePeriod::AllTime, None, 0, 10)
            .await
            .unwrap();
        assert_eq!(total, 4);
        let users: Vec<u64> = page.iter().map(|e| e.user_id.value()).collect();
        assert_eq!(users, vec![3, 2, 1, 4]);

        let since = TimePeriod::Weekly.window_start(now);
        let (page, total) = repo
            .page(CertificationId::new(1), TimePeriod::Weekly, since, 1, 10)
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].user_id, UserId::new(2));

        let entry = repo
            .entry(CertificationId::new(1), TimePeriod::AllTime, UserId::new(1))
            .await
            .unwrap()
            .unwrap();
        let ahead = repo
            .count_ahead(
                CertificationId::new(1),
                TimePeriod::AllTime,
                None,
                &entry.standing_key(),
            )
            .await
            .unwrap();
        assert_eq!(ahead, 2);
    }

    #[tokio::test]
    async fn aggregates_ignore_repeated_sessions() {
        let repo = InMemoryRepository::new();
        let a = attempt(1, 50, fixed_now());
        assert!(repo.record_attempt(&a, &[TimePeriod::AllTime]).await.unwrap());
        assert!(!repo.record_attempt(&a, &[TimePeriod::AllTime]).await.unwrap());
        let entry = repo
            .entry(CertificationId::new(1), TimePeriod::AllTime, UserId::new(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.quizzes_taken, 1);
    }
}
