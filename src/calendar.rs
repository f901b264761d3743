use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta, Utc};
use ulid::Ulid;

use crate::booking::{validate_new_booking, BookingError, NewReservation};
use crate::model::*;

/// Days ahead a wash can be booked.
pub const BOOKING_HORIZON_DAYS: u32 = 14;
/// Days back the schedule can be browsed.
pub const VIEW_LOOKBACK_DAYS: u32 = 7;

/// Maps calendar days in the deployment's time zone to instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset: FixedOffset,
}

impl Calendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }

    /// `None` when the offset is a day or more.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(Self::new)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Local wall-clock `time` on `date`, as an instant.
    pub fn at(&self, date: NaiveDate, time: NaiveTime) -> Ms {
        let local = date.and_time(time);
        let utc = local - TimeDelta::seconds(i64::from(self.offset.local_minus_utc()));
        utc.and_utc().timestamp_millis()
    }

    /// Wall-clock date and time of an instant.
    pub fn local(&self, instant: Ms) -> NaiveDateTime {
        DateTime::from_timestamp_millis(instant)
            .unwrap_or_default()
            .with_timezone(&self.offset)
            .naive_local()
    }

    /// The local date an instant falls on.
    pub fn date_of(&self, instant: Ms) -> NaiveDate {
        self.local(instant).date()
    }

    pub fn today(&self, now: Ms) -> NaiveDate {
        self.date_of(now)
    }

    /// Local midnight to the next local midnight.
    pub fn day_span(&self, date: NaiveDate) -> Span {
        let start = self.at(date, NaiveTime::MIN);
        Span::new(start, start + DAY_MS)
    }
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}

/// Date windows layered on top of the pure slot checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingPolicy {
    pub calendar: Calendar,
    pub horizon_days: u32,
    pub lookback_days: u32,
}

impl BookingPolicy {
    pub fn new(calendar: Calendar) -> Self {
        Self {
            calendar,
            horizon_days: BOOKING_HORIZON_DAYS,
            lookback_days: VIEW_LOOKBACK_DAYS,
        }
    }

    pub fn last_bookable_date(&self, now: Ms) -> NaiveDate {
        self.calendar
            .today(now)
            .checked_add_days(Days::new(u64::from(self.horizon_days)))
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn first_viewable_date(&self, now: Ms) -> NaiveDate {
        self.calendar
            .today(now)
            .checked_sub_days(Days::new(u64::from(self.lookback_days)))
            .unwrap_or(NaiveDate::MIN)
    }

    /// Past check, then the horizon, then slot availability.
    pub fn validate(
        &self,
        user_id: Ulid,
        start: Ms,
        duration: WashDuration,
        existing: &[Reservation],
        now: Ms,
    ) -> Result<NewReservation, BookingError> {
        if start <= now {
            return Err(BookingError::InThePast);
        }
        if self.calendar.date_of(start) > self.last_bookable_date(now) {
            return Err(BookingError::BeyondHorizon(self.horizon_days));
        }
        validate_new_booking(user_id, start, duration, existing, now)
    }

    pub fn check_viewable(&self, date: NaiveDate, now: Ms) -> Result<(), BookingError> {
        if date < self.first_viewable_date(now) || date > self.last_bookable_date(now) {
            return Err(BookingError::OutsideViewWindow);
        }
        Ok(())
    }
}
