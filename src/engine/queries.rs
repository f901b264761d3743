use chrono::NaiveDate;
use ulid::Ulid;

use crate::booking::{available_actions, daily_timeline, derive_status, slot_availability};
use crate::household::{self, HouseholdColor};
use crate::model::*;
use crate::session::Session;

use super::{Engine, EngineError};

/// How many of its own upcoming bookings the dashboard shows a household.
const DASHBOARD_OWN_BOOKINGS: usize = 3;

fn booking_info(state: &LaundryState, r: &Reservation, now: Ms) -> BookingInfo {
    let household = state.household(&r.user_id);
    BookingInfo {
        id: r.id,
        household_id: r.user_id,
        household_name: household.map(|h| h.name.clone()),
        color: household.map(|h| h.color),
        start: r.start(),
        end: r.end(),
        duration: r.duration,
        status: r.status,
        display: derive_status(r, now),
        actions: available_actions(r, now),
    }
}

impl Engine {
    pub async fn households(&self) -> Vec<Household> {
        self.state.read().await.households.clone()
    }

    pub async fn household(&self, id: &Ulid) -> Option<Household> {
        self.state.read().await.household(id).cloned()
    }

    /// Resolve a login to the household acting on the connection.
    pub async fn session_for(&self, id: Ulid) -> Result<Session, EngineError> {
        self.household(&id)
            .await
            .map(Session::new)
            .ok_or(EngineError::NotFound(id))
    }

    pub async fn available_colors(&self) -> Vec<HouseholdColor> {
        let state = self.state.read().await;
        household::available_colors(state.households.iter().map(|h| &h.color))
    }

    pub async fn reservation(&self, id: &Ulid) -> Option<Reservation> {
        self.state.read().await.reservation(id).cloned()
    }

    /// Non-cancelled reservations starting on `date`, in start order.
    pub async fn bookings_on(&self, date: NaiveDate, now: Ms) -> Result<Vec<BookingInfo>, EngineError> {
        self.policy.check_viewable(date, now)?;
        let day = self.calendar().day_span(date);
        let state = self.state.read().await;
        Ok(state
            .starting_within(&day)
            .filter(|r| r.status != ReservationStatus::Cancelled)
            .map(|r| booking_info(&state, r, now))
            .collect())
    }

    /// Every reservation the household ever made, newest start first.
    pub async fn household_bookings(&self, household_id: &Ulid, now: Ms) -> Vec<BookingInfo> {
        let state = self.state.read().await;
        state
            .reservations
            .iter()
            .rev()
            .filter(|r| r.user_id == *household_id)
            .map(|r| booking_info(&state, r, now))
            .collect()
    }

    /// The day's grid for a wash of `duration`. Slots already behind `now`
    /// are never offered.
    pub async fn availability_on(
        &self,
        date: NaiveDate,
        duration: WashDuration,
        now: Ms,
    ) -> Result<Vec<SlotInfo>, EngineError> {
        self.policy.check_viewable(date, now)?;
        let calendar = *self.calendar();
        let state = self.state.read().await;
        let mut slots = slot_availability(date, duration, &state.reservations, &calendar);
        for info in &mut slots {
            info.available &= info.slot.instant(&calendar) > now;
        }
        Ok(slots)
    }

    pub async fn timeline_on(&self, date: NaiveDate, now: Ms) -> Result<Vec<TimelineEntry>, EngineError> {
        self.policy.check_viewable(date, now)?;
        let calendar = *self.calendar();
        let state = self.state.read().await;
        Ok(daily_timeline(date, &state.reservations, &calendar)
            .into_iter()
            .map(|(slot, occupant)| TimelineEntry {
                slot,
                occupant: occupant.map(|r| booking_info(&state, r, now)),
            })
            .collect())
    }

    pub async fn dashboard(&self, session: &Session, now: Ms) -> Dashboard {
        let state = self.state.read().await;
        let running = state
            .reservations
            .iter()
            .find(|r| r.status == ReservationStatus::Running)
            .map(|r| booking_info(&state, r, now));

        let upcoming = state
            .reservations
            .iter()
            .filter(|r| r.status == ReservationStatus::Booked && r.start() > now);
        let next = upcoming.clone().next().map(|r| booking_info(&state, r, now));
        let mine = upcoming
            .filter(|r| session.owns(r))
            .take(DASHBOARD_OWN_BOOKINGS)
            .map(|r| booking_info(&state, r, now))
            .collect();

        Dashboard { running, next, mine }
    }
}
