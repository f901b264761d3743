//! Pure booking rules: slot availability and the reservation lifecycle.
//!
//! Every function takes the current time as an argument and performs no I/O,
//! so the store can re-run them on retry and tests can pin the clock.

mod availability;
mod error;
mod grid;
mod lifecycle;
#[cfg(test)]
mod properties;

pub use availability::{
    daily_timeline, first_conflict, is_slot_available, occupant_of_slot, slot_availability,
    validate_new_booking, NewReservation,
};
pub use error::BookingError;
pub use grid::{generate_daily_grid, TimeSlot, SLOTS_PER_DAY, SLOT_MINUTES};
pub use lifecycle::{
    available_actions, can_cancel, can_complete, can_start, cancel, derive_status,
    transition_to_completed, transition_to_running, Actions, DisplayStatus,
};
