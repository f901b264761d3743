mod error;
mod mutations;
mod queries;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;

use tokio::sync::{RwLock, mpsc, oneshot};

use crate::calendar::{BookingPolicy, Calendar};
use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
    tracing::debug!("WAL writer for {} stopped", wal.path().display());
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {}: {e}", wal.path().display());
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so half-buffered bytes don't leak
    // into the next batch.
    let flush_result = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
    }
}

fn respond_batch(batch: &mut Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.rewrite(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// Apply an event to the laundry state (no locking, caller holds the lock).
/// Events were validated before they were logged, so application never fails.
fn apply_event(state: &mut LaundryState, event: &Event) {
    match event {
        Event::HouseholdRegistered { id, name, color, at } => {
            state.households.push(Household {
                id: *id,
                name: name.clone(),
                color: *color,
                created_at: *at,
            });
        }
        Event::ProfileUpdated { id, name, color } => {
            if let Some(h) = state.household_mut(id) {
                h.name = name.clone();
                h.color = *color;
            }
        }
        Event::ReservationCreated {
            id,
            user_id,
            span,
            duration,
            at,
        } => {
            state.insert_reservation(Reservation {
                id: *id,
                user_id: *user_id,
                span: *span,
                duration: *duration,
                status: ReservationStatus::Booked,
                created_at: *at,
                actual_start_time: None,
                completed_at: None,
                cancelled_at: None,
            });
        }
        Event::WashStarted { id, at, .. } => {
            if let Some(r) = state.reservation_mut(id) {
                r.status = ReservationStatus::Running;
                r.actual_start_time = Some(*at);
            }
        }
        Event::WashCompleted { id, at, .. } => {
            if let Some(r) = state.reservation_mut(id) {
                r.status = ReservationStatus::Completed;
                r.completed_at = Some(*at);
            }
        }
        Event::ReservationCancelled { id, at, .. } => {
            if let Some(r) = state.reservation_mut(id) {
                r.status = ReservationStatus::Cancelled;
                r.cancelled_at = Some(*at);
            }
        }
        Event::ReservationsPurged { before } => {
            state.purge_finished_before(*before);
        }
    }
}

/// One laundry room: its households, its reservations and their log.
pub struct Engine {
    pub(super) state: RwLock<LaundryState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) policy: BookingPolicy,
}

impl Engine {
    pub fn new(wal_path: PathBuf, policy: BookingPolicy) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let mut state = LaundryState::new();
        for event in &events {
            apply_event(&mut state, event);
        }
        tracing::debug!(
            "replayed {} events from {}: {} households, {} reservations",
            events.len(),
            wal_path.display(),
            state.households.len(),
            state.reservations.len()
        );

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            state: RwLock::new(state),
            wal_tx,
            policy,
        })
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    pub fn calendar(&self) -> &Calendar {
        &self.policy.calendar
    }

    async fn wal_request<T>(
        &self,
        cmd: WalCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, EngineError> {
        self.wal_tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        let cmd = WalCommand::Append {
            event: event.clone(),
            response: tx,
        };
        self.wal_request(cmd, rx)
            .await?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, then apply. The caller holds the write lock.
    pub(super) async fn persist_and_apply(
        &self,
        state: &mut LaundryState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_event(state, event);
        Ok(())
    }
}
