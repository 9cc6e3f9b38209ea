use thiserror::Error;

use crate::model::{ParseIdError, ParseTimePeriodError, SessionStateError};

/// Any domain-level failure raised by this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Session(#[from] SessionStateError),
    #[error(transparent)]
    TimePeriod(#[from] ParseTimePeriodError),
    #[error(transparent)]
    Id(#[from] ParseIdError),
}
