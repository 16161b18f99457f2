mod availability;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{clamp_to_work_hours, free_segments, snap_down, snap_up, subtract};
pub use error::SchedulerError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedAvailabilityState = Arc<RwLock<AvailabilityState>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
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
            other => handle_non_append(&mut wal, other),
        }
    }
    tracing::debug!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so half-written bytes do not leak into
    // the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
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
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
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

/// The durable scheduling store: one lockable state per availability, every
/// change written to the WAL before it becomes visible.
pub struct Engine {
    pub(super) state: DashMap<Ulid, SharedAvailabilityState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking id → availability id
    pub(super) booking_index: DashMap<Ulid, Ulid>,
    /// Owner → availability ids, in creation order.
    pub(super) by_owner: DashMap<PersonId, Vec<Ulid>>,
    /// Ids of availabilities and bookings whose create is in flight.
    pub(super) reserved_ids: DashSet<Ulid>,
    /// Mutations hold this shared from WAL append through apply; compaction
    /// holds it exclusively from state capture until the file swap.
    pub(super) compaction_gate: RwLock<()>,
}

/// Apply a booking event to an availability's state (caller holds the lock).
fn apply_to_availability(
    st: &mut AvailabilityState,
    event: &Event,
    booking_index: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::BookingCreated { booking } => {
            booking_index.insert(booking.id, booking.availability_id);
            st.insert_booking(booking.clone());
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(b) = st.booking_mut(*id) {
                b.status = *status;
            }
        }
        // handled at the map level
        Event::AvailabilityCreated { .. } => {}
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the writer task.
    /// Must be called from within a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            booking_index: DashMap::new(),
            by_owner: DashMap::new(),
            reserved_ids: DashSet::new(),
            compaction_gate: RwLock::new(()),
        };

        // Nobody else holds these Arcs yet, so try_write never contends. Never
        // block here: this may run inside an async context.
        let mut skipped = 0usize;
        for event in &events {
            match event {
                Event::AvailabilityCreated { id, .. } if engine.state.contains_key(id) => {
                    skipped += 1;
                }
                Event::AvailabilityCreated { id, owner_id, window } => {
                    engine.insert_availability(Availability {
                        id: *id,
                        owner_id: *owner_id,
                        window: *window,
                    });
                }
                other => {
                    let applied = engine
                        .state
                        .get(&other.availability_id())
                        .map(|entry| entry.value().clone())
                        .and_then(|st| {
                            st.try_write().ok().map(|mut guard| {
                                apply_to_availability(&mut guard, other, &engine.booking_index)
                            })
                        });
                    if applied.is_none() {
                        skipped += 1;
                    }
                }
            }
        }
        if skipped > 0 {
            tracing::warn!("WAL replay skipped {skipped} duplicate or orphaned events");
        }
        tracing::info!(
            "replayed {} events: {} availabilities, {} bookings",
            events.len(),
            engine.state.len(),
            engine.booking_index.len()
        );

        Ok(engine)
    }

    fn insert_availability(&self, availability: Availability) {
        self.by_owner
            .entry(availability.owner_id)
            .or_default()
            .push(availability.id);
        self.state.insert(
            availability.id,
            Arc::new(RwLock::new(AvailabilityState::new(availability))),
        );
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| SchedulerError::StorageError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| SchedulerError::StorageError("WAL writer dropped response".into()))?
            .map_err(|e| SchedulerError::StorageError(e.to_string()))
    }

    pub(super) fn get_state(&self, availability_id: &Ulid) -> Option<SharedAvailabilityState> {
        self.state.get(availability_id).map(|e| e.value().clone())
    }

    /// WAL-append then apply, under the caller's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        st: &mut AvailabilityState,
        event: &Event,
    ) -> Result<(), SchedulerError> {
        self.wal_append(event).await?;
        apply_to_availability(st, event, &self.booking_index);
        Ok(())
    }

    /// Lookup booking → availability, acquire that availability's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<AvailabilityState>, SchedulerError> {
        let availability_id = self
            .booking_index
            .get(booking_id)
            .map(|e| *e.value())
            .ok_or(SchedulerError::NotFound(*booking_id))?;
        let st = self
            .get_state(&availability_id)
            .ok_or(SchedulerError::NotFound(availability_id))?;
        Ok(st.write_owned().await)
    }
}
