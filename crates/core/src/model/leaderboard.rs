use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::{CertificationId, SessionId, UserId};
use crate::score;

//
// ─── TIME PERIOD ──────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unrecognized time period: {raw}")]
pub struct ParseTimePeriodError {
    pub raw: String,
}

/// Leaderboard scope.
///
/// `Monthly` and `Weekly` are rolling windows measured back from "now", not
/// calendar buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimePeriod {
    AllTime,
    Monthly,
    Weekly,
}

impl TimePeriod {
    pub const ALL: [TimePeriod; 3] = [TimePeriod::AllTime, TimePeriod::Monthly, TimePeriod::Weekly];

    /// Storage and wire representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TimePeriod::AllTime => "all_time",
            TimePeriod::Monthly => "monthly",
            TimePeriod::Weekly => "weekly",
        }
    }

    /// Length of the rolling window, `None` for all-time.
    #[must_use]
    pub fn window(self) -> Option<Duration> {
        match self {
            TimePeriod::AllTime => None,
            TimePeriod::Monthly => Some(Duration::days(30)),
            TimePeriod::Weekly => Some(Duration::days(7)),
        }
    }

    /// Earliest attempt still inside the window at `now`.
    #[must_use]
    pub fn window_start(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.window().map(|length| now - length)
    }

    /// Whether an attempt made at `attempt_at` counts for this period at `now`.
    #[must_use]
    pub fn includes(self, attempt_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.window_start(now).is_none_or(|start| attempt_at >= start)
    }

    /// Periods an attempt is written to.
    #[must_use]
    pub fn including(attempt_at: DateTime<Utc>, now: DateTime<Utc>) -> Vec<TimePeriod> {
        Self::ALL
            .into_iter()
            .filter(|p| p.includes(attempt_at, now))
            .collect()
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimePeriod {
    type Err = ParseTimePeriodError;

    /// Accepts `AllTime`, `all_time`, `all-time`, `Monthly`, `Weekly` in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "alltime" => Ok(TimePeriod::AllTime),
            "monthly" => Ok(TimePeriod::Monthly),
            "weekly" => Ok(TimePeriod::Weekly),
            _ => Err(ParseTimePeriodError { raw: s.to_owned() }),
        }
    }
}

//
// ─── ENTRIES ──────────────────────────────────────────────────────────────────
//

/// One completed session as seen by the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardAttempt {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub username: String,
    pub certification_id: CertificationId,
    pub score: u32,
    pub attempt_at: DateTime<Utc>,
}

/// A user's standing inside one (certification, period) partition.
///
/// Rank is not stored; it is the entry's position under [`compare_entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub certification_id: CertificationId,
    pub period: TimePeriod,
    pub user_id: UserId,
    pub username: String,
    pub best_score: u32,
    pub quizzes_taken: u32,
    pub score_sum: u64,
    pub last_attempt_at: DateTime<Utc>,
}

impl LeaderboardEntry {
    #[must_use]
    pub fn from_attempt(period: TimePeriod, attempt: &LeaderboardAttempt) -> Self {
        Self {
            certification_id: attempt.certification_id,
            period,
            user_id: attempt.user_id,
            username: attempt.username.clone(),
            best_score: attempt.score,
            quizzes_taken: 1,
            score_sum: u64::from(attempt.score),
            last_attempt_at: attempt.attempt_at,
        }
    }

    /// Fold another attempt by the same user into this entry.
    ///
    /// `last_attempt_at` only moves forward so attempts applied out of order
    /// converge on the same entry.
    pub fn apply(&mut self, attempt: &LeaderboardAttempt) {
        self.best_score = self.best_score.max(attempt.score);
        self.quizzes_taken = self.quizzes_taken.saturating_add(1);
        self.score_sum += u64::from(attempt.score);
        self.last_attempt_at = self.last_attempt_at.max(attempt.attempt_at);
        self.username.clone_from(&attempt.username);
    }

    #[must_use]
    pub fn average_score(&self) -> f64 {
        score::mean(self.score_sum, u64::from(self.quizzes_taken))
    }

    #[must_use]
    pub fn standing_key(&self) -> StandingKey {
        StandingKey {
            best_score: Reverse(self.best_score),
            last_attempt_at: self.last_attempt_at,
            user_id: self.user_id,
        }
    }
}

/// Sort key for a partition: best score descending, earlier last attempt
/// first, then user id so the order is total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StandingKey {
    pub best_score: Reverse<u32>,
    pub last_attempt_at: DateTime<Utc>,
    pub user_id: UserId,
}

/// Leaderboard ordering.
#[must_use]
pub fn compare_entries(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    a.standing_key().cmp(&b.standing_key())
}

/// An entry with its derived rank.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardStanding {
    pub rank: u32,
    pub entry: LeaderboardEntry,
    pub is_current_user: bool,
}

/// Assign ranks to an already-sorted page that starts at offset `skip`.
#[must_use]
pub fn rank_page(
    entries: Vec<LeaderboardEntry>,
    skip: u32,
    current_user: Option<UserId>,
) -> Vec<LeaderboardStanding> {
    entries
        .into_iter()
        .zip(skip.saturating_add(1)..)
        .map(|(entry, rank)| LeaderboardStanding {
            rank,
            is_current_user: current_user == Some(entry.user_id),
            entry,
        })
        .collect()
}

/// One page of a partition.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardPage {
    pub certification_id: CertificationId,
    pub period: TimePeriod,
    pub entries: Vec<LeaderboardStanding>,
    pub total_entries: u64,
    /// The requesting user's standing, whether or not it is on this page.
    pub current_user: Option<LeaderboardStanding>,
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

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

    #[test]
    fn parses_time_periods_leniently() {
        assert_eq!("AllTime".parse::<TimePeriod>().unwrap(), TimePeriod::AllTime);
        assert_eq!("all_time".parse::<TimePeriod>().unwrap(), TimePeriod::AllTime);
        assert_eq!("WEEKLY".parse::<TimePeriod>().unwrap(), TimePeriod::Weekly);
        assert_eq!(" monthly ".parse::<TimePeriod>().unwrap(), TimePeriod::Monthly);
        let err = "yearly".parse::<TimePeriod>().unwrap_err();
        assert_eq!(err.raw, "yearly");
    }

    #[test]
    fn rolling_windows_are_measured_from_now() {
        let now = fixed_now();
        let six_days = now - Duration::days(6);
        let ten_days = now - Duration::days(10);
        let forty_days = now - Duration::days(40);

        assert_eq!(TimePeriod::including(six_days, now), TimePeriod::ALL.to_vec());
        assert_eq!(
            TimePeriod::including(ten_days, now),
            vec![TimePeriod::AllTime, TimePeriod::Monthly]
        );
        assert_eq!(TimePeriod::including(forty_days, now), vec![TimePeriod::AllTime]);
        assert!(TimePeriod::Weekly.includes(now - Duration::days(7), now));
    }

    #[test]
    fn entry_tracks_best_and_running_mean() {
        let now = fixed_now();
        let mut entry = LeaderboardEntry::from_attempt(TimePeriod::AllTime, &attempt(1, 80, now));
        assert_eq!(entry.average_score(), 80.0);

        let mut second = attempt(1, 60, now + Duration::hours(1));
        second.username = "renamed".into();
        entry.apply(&second);
        assert_eq!(entry.best_score, 80);
        assert_eq!(entry.quizzes_taken, 2);
        assert_eq!(entry.average_score(), 70.0);
        assert_eq!(entry.last_attempt_at, now + Duration::hours(1));
        assert_eq!(entry.username, "renamed");

        entry.apply(&attempt(1, 10, now - Duration::days(1)));
        assert_eq!(entry.last_attempt_at, now + Duration::hours(1));
    }

    #[test]
    fn ordering_breaks_ties_by_earlier_attempt() {
        let now = fixed_now();
        let mut entries = vec![
            LeaderboardEntry::from_attempt(TimePeriod::AllTime, &attempt(3, 70, now)),
            LeaderboardEntry::from_attempt(TimePeriod::AllTime, &attempt(1, 90, now)),
            LeaderboardEntry::from_attempt(
                TimePeriod::AllTime,
                &attempt(2, 90, now - Duration::hours(2)),
            ),
        ];
        entries.sort_by(compare_entries);
        let users: Vec<u64> = entries.iter().map(|e| e.user_id.value()).collect();
        assert_eq!(users, vec![2, 1, 3]);

        for pair in entries.windows(2) {
            assert!(pair[0].best_score >= pair[1].best_score);
        }

        let ranked = rank_page(entries, 0, Some(UserId::new(1)));
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].rank, 2);
        assert!(ranked[1].is_current_user);
        assert!(!ranked[2].is_current_user);
    }

    #[test]
    fn rank_page_offsets_by_skip() {
        let now = fixed_now();
        let entries = vec![LeaderboardEntry::from_attempt(
            TimePeriod::Weekly,
            &attempt(9, 50, now),
        )];
        let ranked = rank_page(entries, 10, None);
        assert_eq!(ranked[0].rank, 11);
    }
}
