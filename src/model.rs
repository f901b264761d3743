use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::booking::{Actions, DisplayStatus, TimeSlot};
use crate::household::HouseholdColor;

/// Unix milliseconds. Every instant in the crate uses this.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// The wash programs a household can book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WashDuration {
    HalfHour,
    #[default]
    OneHour,
    NinetyMinutes,
    TwoHours,
}

impl WashDuration {
    pub const ALL: [WashDuration; 4] = [
        WashDuration::HalfHour,
        WashDuration::OneHour,
        WashDuration::NinetyMinutes,
        WashDuration::TwoHours,
    ];

    pub fn minutes(self) -> u32 {
        match self {
            WashDuration::HalfHour => 30,
            WashDuration::OneHour => 60,
            WashDuration::NinetyMinutes => 90,
            WashDuration::TwoHours => 120,
        }
    }

    pub fn as_ms(self) -> Ms {
        Ms::from(self.minutes()) * MINUTE_MS
    }

    pub fn from_minutes(minutes: i64) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|d| i64::from(d.minutes()) == minutes)
    }
}

/// Persisted reservation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Booked,
    Running,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Booked => "booked",
            ReservationStatus::Running => "running",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    /// Booked and running reservations occupy the machine.
    pub fn is_blocking(self) -> bool {
        matches!(self, ReservationStatus::Booked | ReservationStatus::Running)
    }
}

/// One household's claim on the washing machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
    pub duration: WashDuration,
    pub status: ReservationStatus,
    pub created_at: Ms,
    pub actual_start_time: Option<Ms>,
    pub completed_at: Option<Ms>,
    pub cancelled_at: Option<Ms>,
}

impl Reservation {
    pub fn start(&self) -> Ms {
        self.span.start
    }

    pub fn end(&self) -> Ms {
        self.span.end
    }

    pub fn blocks(&self) -> bool {
        self.status.is_blocking()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Household {
    pub id: Ulid,
    pub name: String,
    pub color: HouseholdColor,
    pub created_at: Ms,
}

/// Everything one laundry room knows: its households and the reservations
/// on its single machine.
#[derive(Debug, Clone, Default)]
pub struct LaundryState {
    pub households: Vec<Household>,
    /// Sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl LaundryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn reservation_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Drop reservations that ended before `before`, except running washes
    /// nobody has completed yet. Returns how many went.
    pub fn purge_finished_before(&mut self, before: Ms) -> usize {
        let len = self.reservations.len();
        self.reservations
            .retain(|r| r.span.end >= before || r.status == ReservationStatus::Running);
        len - self.reservations.len()
    }

    /// Reservations starting inside the window, in start order.
    pub fn starting_within(&self, window: &Span) -> impl Iterator<Item = &Reservation> {
        let left = self
            .reservations
            .partition_point(|r| r.span.start < window.start);
        let right = self
            .reservations
            .partition_point(|r| r.span.start < window.end);
        self.reservations[left..right].iter()
    }

    pub fn household(&self, id: &Ulid) -> Option<&Household> {
        self.households.iter().find(|h| h.id == *id)
    }

    pub fn household_mut(&mut self, id: &Ulid) -> Option<&mut Household> {
        self.households.iter_mut().find(|h| h.id == *id)
    }
}

/// WAL record format, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    HouseholdRegistered {
        id: Ulid,
        name: String,
        color: HouseholdColor,
        at: Ms,
    },
    ProfileUpdated {
        id: Ulid,
        name: String,
        color: HouseholdColor,
    },
    ReservationCreated {
        id: Ulid,
        user_id: Ulid,
        span: Span,
        duration: WashDuration,
        at: Ms,
    },
    WashStarted {
        id: Ulid,
        user_id: Ulid,
        at: Ms,
    },
    WashCompleted {
        id: Ulid,
        user_id: Ulid,
        at: Ms,
    },
    ReservationCancelled {
        id: Ulid,
        user_id: Ulid,
        at: Ms,
    },
    ReservationsPurged {
        before: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

/// A reservation as a viewer sees it at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub household_id: Ulid,
    pub household_name: Option<String>,
    pub color: Option<HouseholdColor>,
    pub start: Ms,
    pub end: Ms,
    pub duration: WashDuration,
    pub status: ReservationStatus,
    pub display: DisplayStatus,
    pub actions: Actions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub slot: TimeSlot,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub slot: TimeSlot,
    pub occupant: Option<BookingInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dashboard {
    /// The wash currently running, whoever owns it.
    pub running: Option<BookingInfo>,
    /// The first booked wash whose start is still ahead.
    pub next: Option<BookingInfo>,
    /// The session household's bookings that start later (at most three).
    pub mine: Vec<BookingInfo>,
}
