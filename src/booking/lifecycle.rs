use crate::model::*;

use super::BookingError;

/// Cancelling closes this long before the wash starts.
pub const CANCEL_CUTOFF_MS: Ms = HOUR_MS;
/// A wash may be started this early...
pub const START_EARLY_MS: Ms = 15 * MINUTE_MS;
/// ...and this late.
pub const START_LATE_MS: Ms = 5 * MINUTE_MS;

/// What a viewer is shown. Derived from the persisted status and the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayStatus {
    Planned,
    Active,
    Running,
    Missed,
    Completed,
    Cancelled,
}

impl DisplayStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DisplayStatus::Planned => "planned",
            DisplayStatus::Active => "active",
            DisplayStatus::Running => "running",
            DisplayStatus::Missed => "missed",
            DisplayStatus::Completed => "completed",
            DisplayStatus::Cancelled => "cancelled",
        }
    }
}

/// Which user actions are open right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Actions {
    pub can_start: bool,
    pub can_complete: bool,
    pub can_cancel: bool,
}

/// Priority-ordered: persisted terminal/running states first, then the clock.
pub fn derive_status(reservation: &Reservation, now: Ms) -> DisplayStatus {
    match reservation.status {
        ReservationStatus::Cancelled => DisplayStatus::Cancelled,
        ReservationStatus::Completed => DisplayStatus::Completed,
        ReservationStatus::Running => DisplayStatus::Running,
        ReservationStatus::Booked if reservation.end() < now => DisplayStatus::Missed,
        ReservationStatus::Booked if reservation.span.contains_instant(now) => DisplayStatus::Active,
        ReservationStatus::Booked => DisplayStatus::Planned,
    }
}

pub fn can_cancel(reservation: &Reservation, now: Ms) -> bool {
    reservation.status == ReservationStatus::Booked && reservation.start() - now > CANCEL_CUTOFF_MS
}

pub fn can_start(reservation: &Reservation, now: Ms) -> bool {
    let until_start = reservation.start() - now;
    reservation.status == ReservationStatus::Booked
        && (-START_LATE_MS..=START_EARLY_MS).contains(&until_start)
}

pub fn can_complete(reservation: &Reservation) -> bool {
    reservation.status == ReservationStatus::Running
}

pub fn available_actions(reservation: &Reservation, now: Ms) -> Actions {
    Actions {
        can_start: can_start(reservation, now),
        can_complete: can_complete(reservation),
        can_cancel: can_cancel(reservation, now),
    }
}

pub fn transition_to_running(reservation: &Reservation, now: Ms) -> Result<Reservation, BookingError> {
    if !can_start(reservation, now) {
        return Err(BookingError::NotStartable);
    }
    Ok(Reservation {
        status: ReservationStatus::Running,
        actual_start_time: Some(now),
        ..reservation.clone()
    })
}

pub fn transition_to_completed(reservation: &Reservation, now: Ms) -> Result<Reservation, BookingError> {
    if !can_complete(reservation) {
        return Err(BookingError::NotRunning);
    }
    Ok(Reservation {
        status: ReservationStatus::Completed,
        completed_at: Some(now),
        ..reservation.clone()
    })
}

pub fn cancel(reservation: &Reservation, now: Ms) -> Result<Reservation, BookingError> {
    if !can_cancel(reservation, now) {
        return Err(BookingError::NotCancellable);
    }
    Ok(Reservation {
        status: ReservationStatus::Cancelled,
        cancelled_at: Some(now),
        ..reservation.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const H: Ms = HOUR_MS;
    const M: Ms = MINUTE_MS;

    fn reservation(start: Ms, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            user_id: Ulid::new(),
            span: Span::new(start, start + H),
            duration: WashDuration::OneHour,
            status,
            created_at: 0,
            actual_start_time: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    // ── derive_status ───────────────────────────────────────

    #[test]
    fn booked_status_follows_clock() {
        let r = reservation(10 * H, ReservationStatus::Booked);
        assert_eq!(derive_status(&r, 9 * H), DisplayStatus::Planned);
        assert_eq!(derive_status(&r, 10 * H), DisplayStatus::Active);
        assert_eq!(derive_status(&r, 11 * H - 1), DisplayStatus::Active);
        // end == now is neither active (half-open) nor missed (strict)
        assert_eq!(derive_status(&r, 11 * H), DisplayStatus::Planned);
        assert_eq!(derive_status(&r, 11 * H + 1), DisplayStatus::Missed);
    }

    #[test]
    fn persisted_state_wins_over_clock() {
        let long_ago = 100 * H;
        let completed = reservation(10 * H, ReservationStatus::Completed);
        let cancelled = reservation(10 * H, ReservationStatus::Cancelled);
        let running = reservation(10 * H, ReservationStatus::Running);
        assert_eq!(derive_status(&completed, long_ago), DisplayStatus::Completed);
        assert_eq!(derive_status(&cancelled, long_ago), DisplayStatus::Cancelled);
        assert_eq!(derive_status(&running, long_ago), DisplayStatus::Running);
        assert_eq!(derive_status(&running, 0), DisplayStatus::Running);
    }

    // ── guards ──────────────────────────────────────────────

    #[test]
    fn cancel_cutoff_is_strict() {
        let now = 10 * H;
        assert!(can_cancel(&reservation(now + 61 * M, ReservationStatus::Booked), now));
        assert!(!can_cancel(&reservation(now + 60 * M, ReservationStatus::Booked), now));
        assert!(!can_cancel(&reservation(now + 5 * H, ReservationStatus::Running), now));
    }

    #[test]
    fn start_window_boundaries() {
        let now = 10 * H;
        for offset in [15 * M, 14 * M, 0, -5 * M] {
            assert!(
                can_start(&reservation(now + offset, ReservationStatus::Booked), now),
                "offset {offset} should be startable"
            );
        }
        for offset in [16 * M, -6 * M] {
            assert!(
                !can_start(&reservation(now + offset, ReservationStatus::Booked), now),
                "offset {offset} should not be startable"
            );
        }
        assert!(!can_start(&reservation(now, ReservationStatus::Cancelled), now));
    }

    #[test]
    fn actions_bundle_guards() {
        let now = 10 * H;
        let soon = reservation(now + 10 * M, ReservationStatus::Booked);
        assert_eq!(
            available_actions(&soon, now),
            Actions { can_start: true, can_complete: false, can_cancel: false }
        );
        let later = reservation(now + 3 * H, ReservationStatus::Booked);
        assert_eq!(
            available_actions(&later, now),
            Actions { can_start: false, can_complete: false, can_cancel: true }
        );
        let running = reservation(now, ReservationStatus::Running);
        assert!(available_actions(&running, now).can_complete);
    }

    // ── transitions ─────────────────────────────────────────

    #[test]
    fn full_lifecycle_then_repeats_rejected() {
        let booked = reservation(10 * H, ReservationStatus::Booked);
        let running = transition_to_running(&booked, 10 * H).unwrap();
        assert_eq!(running.status, ReservationStatus::Running);
        assert_eq!(running.actual_start_time, Some(10 * H));
        assert_eq!(
            transition_to_running(&running, 10 * H),
            Err(BookingError::NotStartable)
        );

        let completed = transition_to_completed(&running, 10 * H + 50 * M).unwrap();
        assert_eq!(completed.status, ReservationStatus::Completed);
        assert_eq!(completed.completed_at, Some(10 * H + 50 * M));
        assert_eq!(
            transition_to_completed(&completed, 11 * H),
            Err(BookingError::NotRunning)
        );
    }

    #[test]
    fn complete_requires_running() {
        let booked = reservation(10 * H, ReservationStatus::Booked);
        assert_eq!(transition_to_completed(&booked, 10 * H), Err(BookingError::NotRunning));
    }

    #[test]
    fn cancel_marks_cancelled() {
        let booked = reservation(10 * H, ReservationStatus::Booked);
        let cancelled = cancel(&booked, 8 * H).unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert_eq!(cancelled.cancelled_at, Some(8 * H));
        assert_eq!(cancel(&cancelled, 8 * H), Err(BookingError::NotCancellable));
        assert_eq!(cancel(&booked, 9 * H + 30 * M), Err(BookingError::NotCancellable));
    }

    #[test]
    fn transitions_are_pure() {
        let booked = reservation(10 * H, ReservationStatus::Booked);
        let a = transition_to_running(&booked, 10 * H).unwrap();
        let b = transition_to_running(&booked, 10 * H).unwrap();
        assert_eq!(a, b);
        assert_eq!(booked.status, ReservationStatus::Booked);
    }
}
