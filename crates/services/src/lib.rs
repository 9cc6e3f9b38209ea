#![forbid(unsafe_code)]

pub mod completion;
pub mod config;
pub mod error;
pub mod leaderboard;
pub mod quiz_api;
pub mod quiz_services;
pub mod sessions;
pub mod statistics;

pub use quiz_core::Clock;

pub use completion::{
    CompletionCoordinator, CompletionReport, CompletionSignal, DrainReport, SinkResult,
};
pub use config::ServiceConfig;
pub use error::{BootstrapError, QuizError};
pub use leaderboard::{LeaderboardRanker, MAX_LEADERBOARD_PAGE, parse_period};
pub use quiz_api::QuizApi;
pub use quiz_services::QuizServices;
pub use sessions::{
    AnswerOutcome, AnswerSubmissionHandler, AnswerValidation, QuestionSampler,
    QuizSessionMachine, SessionRange,
};
pub use statistics::StatisticsAggregator;
