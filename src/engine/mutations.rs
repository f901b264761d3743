use tokio::sync::oneshot;
use ulid::Ulid;

use crate::booking::{cancel, transition_to_completed, transition_to_running};
use crate::household::{HouseholdColor, validate_profile_update, validate_registration};
use crate::limits::*;
use crate::model::*;
use crate::session::Session;

use super::{Engine, EngineError, WalCommand};

/// The reservation `id`, provided the session's household owns it.
fn owned<'a>(
    state: &'a LaundryState,
    session: &Session,
    id: Ulid,
) -> Result<&'a Reservation, EngineError> {
    let reservation = state.reservation(&id).ok_or(EngineError::NotFound(id))?;
    if !session.owns(reservation) {
        return Err(EngineError::NotOwner(id));
    }
    Ok(reservation)
}

fn check_name_len(name: &str) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("household name too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn register_household(
        &self,
        id: Ulid,
        name: &str,
        color: HouseholdColor,
        now: Ms,
    ) -> Result<Household, EngineError> {
        check_name_len(name)?;
        let mut state = self.state.write().await;
        if state.household(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        let name = validate_registration(&state.households, name, color)?;

        let event = Event::HouseholdRegistered {
            id,
            name: name.clone(),
            color,
            at: now,
        };
        self.persist_and_apply(&mut state, &event).await?;
        tracing::info!("household {id} registered as {name:?} ({})", color.name());
        Ok(Household {
            id,
            name,
            color,
            created_at: now,
        })
    }

    pub async fn update_profile(
        &self,
        session: &Session,
        name: &str,
        color: HouseholdColor,
    ) -> Result<Household, EngineError> {
        check_name_len(name)?;
        let id = session.household_id();
        let mut state = self.state.write().await;
        if state.household(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let name = validate_profile_update(&state.households, id, name, color)?;

        let event = Event::ProfileUpdated { id, name, color };
        self.persist_and_apply(&mut state, &event).await?;
        state
            .household(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Check and insert under one write lock, so two households racing for
    /// the same slot cannot both win.
    pub async fn book(
        &self,
        session: &Session,
        id: Ulid,
        start: Ms,
        duration: WashDuration,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        let user_id = session.household_id();
        let mut state = self.state.write().await;
        if state.household(&user_id).is_none() {
            return Err(EngineError::NotFound(user_id));
        }
        if state.reservation(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        if state.reservations.len() >= MAX_RESERVATIONS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many reservations"));
        }
        let accepted = self
            .policy
            .validate(user_id, start, duration, &state.reservations, now)?;

        let event = Event::ReservationCreated {
            id,
            user_id,
            span: accepted.span,
            duration,
            at: now,
        };
        self.persist_and_apply(&mut state, &event).await?;
        Ok(accepted.into_reservation(id))
    }

    pub async fn start_wash(&self, session: &Session, id: Ulid, now: Ms) -> Result<Reservation, EngineError> {
        let mut state = self.state.write().await;
        let started = transition_to_running(owned(&state, session, id)?, now)?;
        let event = Event::WashStarted {
            id,
            user_id: started.user_id,
            at: now,
        };
        self.persist_and_apply(&mut state, &event).await?;
        Ok(started)
    }

    pub async fn complete_wash(&self, session: &Session, id: Ulid, now: Ms) -> Result<Reservation, EngineError> {
        let mut state = self.state.write().await;
        let completed = transition_to_completed(owned(&state, session, id)?, now)?;
        let event = Event::WashCompleted {
            id,
            user_id: completed.user_id,
            at: now,
        };
        self.persist_and_apply(&mut state, &event).await?;
        Ok(completed)
    }

    pub async fn cancel_booking(&self, session: &Session, id: Ulid, now: Ms) -> Result<Reservation, EngineError> {
        let mut state = self.state.write().await;
        let cancelled = cancel(owned(&state, session, id)?, now)?;
        let event = Event::ReservationCancelled {
            id,
            user_id: cancelled.user_id,
            at: now,
        };
        self.persist_and_apply(&mut state, &event).await?;
        Ok(cancelled)
    }

    /// Forget reservations that ended before `before`. Running washes stay
    /// until someone completes them.
    pub async fn purge_finished_before(&self, before: Ms) -> Result<usize, EngineError> {
        let mut state = self.state.write().await;
        let doomed = state
            .reservations
            .iter()
            .filter(|r| r.end() < before && r.status != ReservationStatus::Running)
            .count();
        if doomed == 0 {
            return Ok(0);
        }
        let event = Event::ReservationsPurged { before };
        self.persist_and_apply(&mut state, &event).await?;
        Ok(doomed)
    }

    /// Rewrite the WAL as the minimal event history of the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let state = self.state.read().await;
        let mut events = Vec::with_capacity(state.households.len() + state.reservations.len());

        for h in &state.households {
            events.push(Event::HouseholdRegistered {
                id: h.id,
                name: h.name.clone(),
                color: h.color,
                at: h.created_at,
            });
        }
        for r in &state.reservations {
            events.push(Event::ReservationCreated {
                id: r.id,
                user_id: r.user_id,
                span: r.span,
                duration: r.duration,
                at: r.created_at,
            });
            if let Some(at) = r.actual_start_time {
                events.push(Event::WashStarted { id: r.id, user_id: r.user_id, at });
            }
            if let Some(at) = r.completed_at {
                events.push(Event::WashCompleted { id: r.id, user_id: r.user_id, at });
            }
            if let Some(at) = r.cancelled_at {
                events.push(Event::ReservationCancelled { id: r.id, user_id: r.user_id, at });
            }
        }

        // Hold the read lock until the rewrite lands so no append slips in
        // between the snapshot and the swap.
        let (tx, rx) = oneshot::channel();
        self.wal_request(WalCommand::Compact { events, response: tx }, rx)
            .await?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        drop(state);
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        self.wal_request(WalCommand::AppendsSinceCompact { response: tx }, rx)
            .await
            .unwrap_or(0)
    }
}
