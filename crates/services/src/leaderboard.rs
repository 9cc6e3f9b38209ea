use std::sync::Arc;

use quiz_core::model::{
    CertificationId, LeaderboardAttempt, LeaderboardEntry, LeaderboardPage, LeaderboardStanding,
    TimePeriod, UserId, rank_page,
};
use storage::repository::LeaderboardRepository;
use tracing::debug;

use crate::Clock;
use crate::error::QuizError;

/// Largest page `query` serves.
pub const MAX_LEADERBOARD_PAGE: u32 = 100;

/// Parse a user-supplied period name.
///
/// # Errors
///
/// Returns `QuizError::Validation` for anything but all-time, monthly or weekly.
pub fn parse_period(raw: &str) -> Result<TimePeriod, QuizError> {
    Ok(raw.parse::<TimePeriod>()?)
}

/// Maintains per-certification, per-period leaderboards and serves ranked pages.
///
/// Ranks are never stored: a rank is one plus the number of visible entries
/// that sort ahead, so it is always consistent with the current order.
#[derive(Clone)]
pub struct LeaderboardRanker {
    clock: Clock,
    leaderboard: Arc<dyn LeaderboardRepository>,
}

impl LeaderboardRanker {
    #[must_use]
    pub fn new(clock: Clock, leaderboard: Arc<dyn LeaderboardRepository>) -> Self {
        Self { clock, leaderboard }
    }

    /// Fold one attempt into every period whose window contains it.
    ///
    /// Returns `false` if this session was already applied.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::Unavailable` on storage failures; no partition
    /// changes then.
    pub async fn update(&self, attempt: &LeaderboardAttempt) -> Result<bool, QuizError> {
        let periods = TimePeriod::including(attempt.attempt_at, self.clock.now());
        let applied = self.leaderboard.record_attempt(attempt, &periods).await?;
        debug!(
            session_id = %attempt.session_id,
            user_id = %attempt.user_id,
            certification_id = %attempt.certification_id,
            score = attempt.score,
            ?periods,
            applied,
            "leaderboard updated"
        );
        Ok(applied)
    }

    /// One ranked page of a partition.
    ///
    /// Entries that have aged out of a rolling window are hidden. When
    /// `current_user` is given, their entry is flagged on the page and their
    /// standing is returned even if it falls on another page.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::Validation` if `take` is outside `1..=100`.
    pub async fn query(
        &self,
        certification_id: CertificationId,
        period: TimePeriod,
        skip: u32,
        take: u32,
        current_user: Option<UserId>,
    ) -> Result<LeaderboardPage, QuizError> {
        if !(1..=MAX_LEADERBOARD_PAGE).contains(&take) {
            return Err(QuizError::validation(format!(
                "take must be between 1 and {MAX_LEADERBOARD_PAGE}, got {take}"
            )));
        }

        let visible_since = period.window_start(self.clock.now());
        let (entries, total_entries) = self
            .leaderboard
            .page(certification_id, period, visible_since, skip, take)
            .await?;
        let entries = rank_page(entries, skip, current_user);

        let current = match current_user {
            Some(user_id) => match entries.iter().find(|s| s.is_current_user) {
                Some(on_page) => Some(on_page.clone()),
                None => self.standing(certification_id, period, user_id).await?,
            },
            None => None,
        };

        Ok(LeaderboardPage {
            certification_id,
            period,
            entries,
            total_entries,
            current_user: current,
        })
    }

    /// A single user's rank, or `None` if they have no visible entry.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::Unavailable` on storage failures.
    pub async fn standing(
        &self,
        certification_id: CertificationId,
        period: TimePeriod,
        user_id: UserId,
    ) -> Result<Option<LeaderboardStanding>, QuizError> {
        let now = self.clock.now();
        let Some(entry) = self
            .leaderboard
            .entry(certification_id, period, user_id)
            .await?
            .filter(|e| period.includes(e.last_attempt_at, now))
        else {
            return Ok(None);
        };

        let ahead = self
            .leaderboard
            .count_ahead(
                certification_id,
                period,
                period.window_start(now),
                &entry.standing_key(),
            )
            .await?;
        Ok(Some(standing_at(entry, ahead)))
    }
}

fn standing_at(entry: LeaderboardEntry, ahead: u64) -> LeaderboardStanding {
    LeaderboardStanding {
        rank: u32::try_from(ahead.saturating_add(1)).unwrap_or(u32::MAX),
        entry,
        is_current_user: true,
    }
}
