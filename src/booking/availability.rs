use chrono::NaiveDate;
use ulid::Ulid;

use crate::calendar::Calendar;
use crate::model::*;

use super::grid::{generate_daily_grid, TimeSlot};
use super::BookingError;

// ── Availability ──────────────────────────────────────────────────

/// A validated booking, ready for the store to assign an id and persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub user_id: Ulid,
    pub span: Span,
    pub duration: WashDuration,
    pub created_at: Ms,
}

impl NewReservation {
    pub fn into_reservation(self, id: Ulid) -> Reservation {
        Reservation {
            id,
            user_id: self.user_id,
            span: self.span,
            duration: self.duration,
            status: ReservationStatus::Booked,
            created_at: self.created_at,
            actual_start_time: None,
            completed_at: None,
            cancelled_at: None,
        }
    }
}

fn candidate_span(start: Ms, duration: WashDuration) -> Span {
    Span::new(start, start + duration.as_ms())
}

/// First booked or running reservation that overlaps `candidate`.
/// Completed and cancelled reservations never block.
pub fn first_conflict<'a>(candidate: &Span, existing: &'a [Reservation]) -> Option<&'a Reservation> {
    existing
        .iter()
        .find(|r| r.blocks() && r.span.overlaps(candidate))
}

/// Half-open overlap test of the candidate against every active reservation.
pub fn is_slot_available(candidate_start: Ms, duration: WashDuration, existing: &[Reservation]) -> bool {
    first_conflict(&candidate_span(candidate_start, duration), existing).is_none()
}

/// Past starts are rejected before availability is looked at.
pub fn validate_new_booking(
    user_id: Ulid,
    candidate_start: Ms,
    duration: WashDuration,
    existing: &[Reservation],
    now: Ms,
) -> Result<NewReservation, BookingError> {
    if candidate_start <= now {
        return Err(BookingError::InThePast);
    }
    let span = candidate_span(candidate_start, duration);
    if let Some(conflict) = first_conflict(&span, existing) {
        return Err(BookingError::SlotUnavailable(conflict.id));
    }
    Ok(NewReservation {
        user_id,
        span,
        duration,
        created_at: now,
    })
}

/// The reservation covering `instant`, if any. Cancelled reservations are
/// skipped; with overlapping input the first match in input order wins.
pub fn occupant_of_slot(instant: Ms, reservations: &[Reservation]) -> Option<&Reservation> {
    reservations
        .iter()
        .find(|r| r.status != ReservationStatus::Cancelled && r.span.contains_instant(instant))
}

/// The day's grid, each slot marked with whether a wash of `duration`
/// starting there would fit.
pub fn slot_availability(
    date: NaiveDate,
    duration: WashDuration,
    existing: &[Reservation],
    calendar: &Calendar,
) -> Vec<SlotInfo> {
    generate_daily_grid(date)
        .into_iter()
        .map(|slot| SlotInfo {
            slot,
            available: is_slot_available(slot.instant(calendar), duration, existing),
        })
        .collect()
}

/// The day's grid paired with whoever occupies each slot.
pub fn daily_timeline<'a>(
    date: NaiveDate,
    reservations: &'a [Reservation],
    calendar: &Calendar,
) -> Vec<(TimeSlot, Option<&'a Reservation>)> {
    generate_daily_grid(date)
        .into_iter()
        .map(|slot| (slot, occupant_of_slot(slot.instant(calendar), reservations)))
        .collect()
}
