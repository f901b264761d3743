use thiserror::Error;
use ulid::Ulid;

use crate::booking::BookingError;
use crate::household::HouseholdError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Booking(#[from] BookingError),
    #[error(transparent)]
    Household(#[from] HouseholdError),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("reservation {0} belongs to another household")]
    NotOwner(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}
