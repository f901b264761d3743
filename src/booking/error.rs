use thiserror::Error;
use ulid::Ulid;

/// Domain rejections. All of them are recoverable; the caller picks the wording.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error("start time is not in the future")]
    InThePast,
    #[error("slot overlaps reservation {0}")]
    SlotUnavailable(Ulid),
    #[error("bookings open at most {0} days ahead")]
    BeyondHorizon(u32),
    #[error("date is outside the viewable schedule")]
    OutsideViewWindow,
    #[error("wash can only be started from 15 minutes before until 5 minutes after its start")]
    NotStartable,
    #[error("wash is not running")]
    NotRunning,
    #[error("booking can only be cancelled more than an hour before it starts")]
    NotCancellable,
}
