mod completion;
mod ids;
mod leaderboard;
mod question;
mod session;
mod statistics;

pub use ids::{
    CertificationId, ChoiceId, ParseIdError, QuestionId, SessionId, SubtopicId, UserId,
};

pub use completion::{CompletionJob, JobStatus, RetryPolicy, Sink};
pub use leaderboard::{
    LeaderboardAttempt, LeaderboardEntry, LeaderboardPage, LeaderboardStanding,
    ParseTimePeriodError, StandingKey, TimePeriod, compare_entries, rank_page,
};
pub use question::{Certification, Choice, Question, Subtopic};
pub use session::{
    MAX_SESSION_QUESTIONS, QuizSession, SessionAnswer, SessionResults, SessionStateError,
};
pub use statistics::{CertificationPerformance, PerformanceTotals, SessionOutcome, UserStatistics};
