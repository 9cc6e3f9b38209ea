//! Shared error types for the services crate.

use thiserror::Error;

use quiz_core::model::{ParseIdError, ParseTimePeriodError, SessionStateError};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors surfaced by every quiz operation.
///
/// `Validation`, `NotFound` and `Conflict` describe the request and are never
/// retried. `Unavailable` wraps storage trouble and may succeed later.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuizError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl QuizError {
    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }
}

impl From<StorageError> for QuizError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => QuizError::NotFound("record".into()),
            StorageError::Conflict(reason) => QuizError::Conflict(reason),
            StorageError::Connection(e) | StorageError::Serialization(e) => {
                QuizError::Unavailable(e)
            }
            other => QuizError::Unavailable(other.to_string()),
        }
    }
}

impl From<SessionStateError> for QuizError {
    fn from(err: SessionStateError) -> Self {
        match err {
            SessionStateError::AlreadyCompleted => QuizError::Conflict(err.to_string()),
            SessionStateError::TooManyQuestions { .. } => QuizError::Validation(err.to_string()),
            SessionStateError::NoQuestions => {
                QuizError::InvalidState("no questions available".into())
            }
            other => QuizError::InvalidState(other.to_string()),
        }
    }
}

impl From<ParseTimePeriodError> for QuizError {
    fn from(err: ParseTimePeriodError) -> Self {
        QuizError::Validation(err.to_string())
    }
}

impl From<ParseIdError> for QuizError {
    fn from(err: ParseIdError) -> Self {
        QuizError::Validation(err.to_string())
    }
}

impl From<quiz_core::Error> for QuizError {
    fn from(err: quiz_core::Error) -> Self {
        match err {
            quiz_core::Error::Session(e) => e.into(),
            quiz_core::Error::TimePeriod(e) => e.into(),
            quiz_core::Error::Id(e) => e.into(),
        }
    }
}

/// Errors emitted while bootstrapping quiz services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BootstrapError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_onto_the_taxonomy() {
        assert_eq!(
            QuizError::from(StorageError::Conflict("dup".into())),
            QuizError::Conflict("dup".into())
        );
        assert!(matches!(
            QuizError::from(StorageError::Connection("down".into())),
            QuizError::Unavailable(_)
        ));
        assert!(matches!(
            QuizError::from(StorageError::NotFound),
            QuizError::NotFound(_)
        ));
    }

    #[test]
    fn session_errors_map_onto_the_taxonomy() {
        assert!(matches!(
            QuizError::from(SessionStateError::AlreadyCompleted),
            QuizError::Conflict(_)
        ));
        assert!(matches!(
            QuizError::from(SessionStateError::NotCompleted),
            QuizError::InvalidState(_)
        ));
        let period = "yearly".parse::<quiz_core::model::TimePeriod>().unwrap_err();
        assert!(matches!(
            QuizError::from(quiz_core::Error::from(period)),
            QuizError::Validation(_)
        ));
    }
}
