use chrono::NaiveDate;
use proptest::prelude::*;
use ulid::Ulid;

use crate::model::*;

use super::*;

fn any_duration() -> impl Strategy<Value = WashDuration> {
    prop::sample::select(WashDuration::ALL.to_vec())
}

fn any_status() -> impl Strategy<Value = ReservationStatus> {
    prop::sample::select(vec![
        ReservationStatus::Booked,
        ReservationStatus::Running,
        ReservationStatus::Completed,
        ReservationStatus::Cancelled,
    ])
}

fn reservation(start: Ms, duration: WashDuration, status: ReservationStatus) -> Reservation {
    Reservation {
        id: Ulid::new(),
        user_id: Ulid::new(),
        span: Span::new(start, start + duration.as_ms()),
        duration,
        status,
        created_at: 0,
        actual_start_time: None,
        completed_at: None,
        cancelled_at: None,
    }
}

proptest! {
    #[test]
    fn overlap_verdict_is_symmetric(
        a_start in 0i64..(2 * DAY_MS),
        b_start in 0i64..(2 * DAY_MS),
        a_dur in any_duration(),
        b_dur in any_duration(),
    ) {
        let a = reservation(a_start, a_dur, ReservationStatus::Booked);
        let b = reservation(b_start, b_dur, ReservationStatus::Booked);
        prop_assert_eq!(
            is_slot_available(a_start, a_dur, std::slice::from_ref(&b)),
            is_slot_available(b_start, b_dur, std::slice::from_ref(&a)),
        );
    }

    #[test]
    fn accepted_bookings_never_overlap(
        requests in prop::collection::vec((0i64..(48 * 2), any_duration()), 1..40),
    ) {
        // Half-hour aligned starts inside two days, validated one after another.
        let now = 0;
        let mut accepted: Vec<Reservation> = Vec::new();
        for (slot, duration) in requests {
            let start = 1 + slot * 30 * MINUTE_MS;
            if let Ok(payload) = validate_new_booking(Ulid::new(), start, duration, &accepted, now) {
                accepted.push(payload.into_reservation(Ulid::new()));
            }
        }
        for (i, a) in accepted.iter().enumerate() {
            for b in &accepted[i + 1..] {
                prop_assert!(!a.span.overlaps(&b.span));
            }
        }
    }

    #[test]
    fn grid_always_has_34_slots(days in 0i64..200_000) {
        let date = NaiveDate::from_num_days_from_ce_opt(days as i32 + 1).unwrap();
        let grid = generate_daily_grid(date);
        prop_assert_eq!(grid.len(), SLOTS_PER_DAY);
        prop_assert_eq!(grid[0].to_string(), "06:00");
        prop_assert!(grid.iter().all(|s| s.date == date));
    }

    #[test]
    fn derived_status_respects_priority(
        start in 0i64..DAY_MS,
        duration in any_duration(),
        status in any_status(),
        now in 0i64..(2 * DAY_MS),
    ) {
        let r = reservation(start, duration, status);
        let shown = derive_status(&r, now);
        let expected = match status {
            ReservationStatus::Cancelled => DisplayStatus::Cancelled,
            ReservationStatus::Completed => DisplayStatus::Completed,
            ReservationStatus::Running => DisplayStatus::Running,
            ReservationStatus::Booked if r.end() < now => DisplayStatus::Missed,
            ReservationStatus::Booked if r.start() <= now && now < r.end() => DisplayStatus::Active,
            ReservationStatus::Booked => DisplayStatus::Planned,
        };
        prop_assert_eq!(shown, expected);
    }

    #[test]
    fn start_and_cancel_windows_never_meet(
        offset in (-2 * HOUR_MS)..(3 * HOUR_MS),
        duration in any_duration(),
    ) {
        let now = DAY_MS;
        let r = reservation(now + offset, duration, ReservationStatus::Booked);
        prop_assert!(!(can_start(&r, now) && can_cancel(&r, now)));
    }
}
