use std::future::Future;
use std::sync::Arc;

use quiz_core::model::{
    CompletionJob, LeaderboardAttempt, RetryPolicy, SessionId, SessionOutcome,
};
use serde::Serialize;
use storage::repository::{CompletionQueue, IdentityDirectory, QuestionBank};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::Clock;
use crate::config::ServiceConfig;
use crate::error::QuizError;
use crate::leaderboard::LeaderboardRanker;
use crate::statistics::StatisticsAggregator;

/// Wakes the completion worker as soon as a session completes.
#[derive(Clone, Default)]
pub struct CompletionSignal(Arc<Notify>);

impl CompletionSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.0.notify_one();
    }

    pub async fn notified(&self) {
        self.0.notified().await;
    }
}

//
// ─── REPORTS ───────────────────────────────────────────────────────────────────
//

/// What happened to one sink while processing a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status", content = "error")]
pub enum SinkResult {
    Applied,
    /// The ledger already held this session; nothing changed.
    AlreadyApplied,
    Failed(String),
}

impl SinkResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        !matches!(self, SinkResult::Failed(_))
    }

    fn from_update(result: Result<bool, QuizError>) -> Self {
        match result {
            Ok(true) => SinkResult::Applied,
            Ok(false) => SinkResult::AlreadyApplied,
            Err(e) => SinkResult::Failed(e.to_string()),
        }
    }
}

/// Outcome of fanning one completed session out to the aggregators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReport {
    pub session_id: SessionId,
    pub score_percentage: u32,
    pub statistics: SinkResult,
    pub leaderboard: SinkResult,
}

impl CompletionReport {
    /// Both sinks hold this session.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.statistics.is_ok() && self.leaderboard.is_ok()
    }

    fn failure_summary(&self) -> String {
        [("statistics", &self.statistics), ("leaderboard", &self.leaderboard)]
            .into_iter()
            .filter_map(|(name, result)| match result {
                SinkResult::Failed(e) => Some(format!("{name}: {e}")),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Totals for one pass over the due jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub processed: u32,
    pub completed: u32,
    pub retried: u32,
    pub failed: u32,
}

//
// ─── COORDINATOR ───────────────────────────────────────────────────────────────
//

/// Delivers completion jobs from the outbox to the statistics and
/// leaderboard aggregators.
///
/// Delivery is at least once. Each sink is idempotent per session, so a job
/// whose first attempt half-succeeded is simply retried in full.
#[derive(Clone)]
pub struct CompletionCoordinator {
    clock: Clock,
    batch_size: u32,
    poll_interval: std::time::Duration,
    retry: RetryPolicy,
    questions: Arc<dyn QuestionBank>,
    identities: Arc<dyn IdentityDirectory>,
    queue: Arc<dyn CompletionQueue>,
    statistics: StatisticsAggregator,
    leaderboard: LeaderboardRanker,
    signal: CompletionSignal,
}

impl CompletionCoordinator {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        clock: Clock,
        config: &ServiceConfig,
        questions: Arc<dyn QuestionBank>,
        identities: Arc<dyn IdentityDirectory>,
        queue: Arc<dyn CompletionQueue>,
        statistics: StatisticsAggregator,
        leaderboard: LeaderboardRanker,
        signal: CompletionSignal,
    ) -> Self {
        Self {
            clock,
            batch_size: config.worker_batch_size.max(1),
            poll_interval: config.poll_interval,
            retry: config.retry,
            questions,
            identities,
            queue,
            statistics,
            leaderboard,
            signal,
        }
    }

    /// Apply one completed session to both aggregators.
    ///
    /// The sinks run independently: a failure in one is logged and captured
    /// in the report but never stops the other, and never reaches the
    /// session that completed.
    pub async fn process_completion(&self, job: &CompletionJob) -> CompletionReport {
        let score = job.score_percentage();
        let (statistics, leaderboard) =
            tokio::join!(self.apply_statistics(job, score), self.apply_leaderboard(job, score));

        let report = CompletionReport {
            session_id: job.session_id,
            score_percentage: score,
            statistics: SinkResult::from_update(statistics),
            leaderboard: SinkResult::from_update(leaderboard),
        };
        for (sink, result) in [
            ("statistics", &report.statistics),
            ("leaderboard", &report.leaderboard),
        ] {
            if let SinkResult::Failed(reason) = result {
                warn!(
                    session_id = %job.session_id,
                    user_id = %job.user_id,
                    sink,
                    error = %reason,
                    "completion sink failed"
                );
            }
        }
        report
    }

    async fn apply_statistics(&self, job: &CompletionJob, score: u32) -> Result<bool, QuizError> {
        let certification_name = self
            .questions
            .certification(job.certification_id)
            .await?
            .map_or_else(
                || format!("Certification {}", job.certification_id),
                |c| c.name,
            );
        let outcome = SessionOutcome {
            session_id: job.session_id,
            user_id: job.user_id,
            certification_id: job.certification_id,
            certification_name,
            questions_answered: job.questions_answered,
            correct_answers: job.correct_answers,
            score_percentage: score,
            study_seconds: job.study_seconds(),
            completed_at: job.completed_at,
        };
        self.statistics.update(&outcome).await
    }

    async fn apply_leaderboard(&self, job: &CompletionJob, score: u32) -> Result<bool, QuizError> {
        let username = self
            .identities
            .username(job.user_id)
            .await?
            .unwrap_or_else(|| format!("user-{}", job.user_id));
        let attempt = LeaderboardAttempt {
            session_id: job.session_id,
            user_id: job.user_id,
            username,
            certification_id: job.certification_id,
            score,
            attempt_at: job.completed_at,
        };
        self.leaderboard.update(&attempt).await
    }

    /// Process every due job once, then mark, reschedule or fail each one.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::Unavailable` if the outbox itself cannot be read
    /// or updated. Sink failures are not errors here; they reschedule the job.
    pub async fn drain_due(&self) -> Result<DrainReport, QuizError> {
        let now = self.clock.now();
        let jobs = self.queue.due_jobs(now, self.batch_size).await?;
        let mut report = DrainReport::default();

        for job in &jobs {
            let result = self.process_completion(job).await;
            let attempts = job.attempts.saturating_add(1);
            report.processed += 1;

            if result.is_complete() {
                self.queue.mark_done(job.session_id, attempts).await?;
                report.completed += 1;
                info!(
                    session_id = %job.session_id,
                    user_id = %job.user_id,
                    certification_id = %job.certification_id,
                    score = result.score_percentage,
                    attempts,
                    "completion applied"
                );
                continue;
            }

            let reason = result.failure_summary();
            if self.retry.exhausted(attempts) {
                self.queue
                    .mark_failed(job.session_id, attempts, &reason)
                    .await?;
                report.failed += 1;
                error!(
                    session_id = %job.session_id,
                    user_id = %job.user_id,
                    attempts,
                    error = %reason,
                    "completion job gave up after max attempts"
                );
            } else {
                let next_attempt_at = now + self.retry.delay_after(attempts);
                self.queue
                    .mark_retry(job.session_id, attempts, next_attempt_at, &reason)
                    .await?;
                report.retried += 1;
                warn!(
                    session_id = %job.session_id,
                    attempts,
                    %next_attempt_at,
                    "completion job rescheduled"
                );
            }
        }

        if report.processed > 0 {
            debug!(?report, "completion drain finished");
        }
        Ok(report)
    }

    /// Move dead-lettered jobs back into the queue, due immediately.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::Unavailable` on storage failures.
    pub async fn requeue_failed(&self) -> Result<u64, QuizError> {
        let count = self.queue.requeue_failed(self.clock.now()).await?;
        info!(count, "failed completion jobs requeued");
        Ok(count)
    }

    /// Drain on every poll tick and whenever a completion is signalled,
    /// until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            batch_size = self.batch_size,
            poll_interval_ms = u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "completion worker started"
        );
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                () = self.signal.notified() => {}
                _ = ticker.tick() => {}
            }
            // keep draining while full batches come back
            loop {
                match self.drain_due().await {
                    Ok(report) if report.processed >= self.batch_size => {}
                    Ok(_) => break,
                    Err(e) => {
                        warn!(error = %e, "completion drain failed");
                        break;
                    }
                }
            }
        }
        info!("completion worker stopped");
    }
}
