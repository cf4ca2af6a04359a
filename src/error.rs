use thiserror::Error;

use crate::Flt;

/// Errors raised by rating validation, sampling caps and factor updates.
///
/// Running out of `max_trials` while searching for a violating negative is not
/// an error; it shows up as a [`crate::Violation`] without an item.
#[derive(Debug, Error, PartialEq)]
pub enum WarpError {
    #[error("invalid rating matrix: {0}")]
    InvalidRatings(String),
    #[error("user {user} is out of bounds for {num_users} users")]
    UserOutOfBounds { user: usize, num_users: usize },
    #[error("got {rows} rows but {deltas} delta vectors")]
    LengthMismatch { rows: usize, deltas: usize },
    #[error("expected {expected} factor components, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("row {row} is out of bounds for a factor matrix with {num_rows} rows")]
    RowOutOfBounds { row: usize, num_rows: usize },
    #[error("rating matrix has no users or no items")]
    EmptyRatings,
    #[error("no rating reaches the positive threshold {threshold}")]
    NoPositiveExamples { threshold: Flt },
    #[error("no positive example found after {draws} draws")]
    PositiveSamplingExhausted { draws: usize },
    #[error("no WARP sample found after {attempts} attempts ({total_trials} negative trials)")]
    WarpSamplingExhausted { attempts: usize, total_trials: usize },
    #[error("configuration error: {0}")]
    Configuration(String),
}
