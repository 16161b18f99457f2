use dashmap::DashSet;
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, SchedulerError, WalCommand};

/// Shape checks every stored window passes. Overlap is not one of them.
pub(crate) fn validate_window(window: &TimeWindow) -> Result<(), SchedulerError> {
    if window.start >= window.end {
        return Err(SchedulerError::InvalidWindow {
            start: window.start,
            end: window.end,
        });
    }
    if window.start < MIN_VALID_TIMESTAMP_MS || window.end > MAX_VALID_TIMESTAMP_MS {
        return Err(SchedulerError::LimitExceeded("timestamp out of range"));
    }
    if window.duration_ms() > MAX_WINDOW_DURATION_MS {
        return Err(SchedulerError::LimitExceeded("window too wide"));
    }
    Ok(())
}

/// Claim on an id while its create is in flight; released on drop.
struct Reservation<'a> {
    ids: &'a DashSet<Ulid>,
    id: Ulid,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.ids.remove(&self.id);
    }
}

impl Engine {
    fn reserve(&self, id: Ulid) -> Result<Reservation<'_>, SchedulerError> {
        if !self.reserved_ids.insert(id) {
            return Err(SchedulerError::AlreadyExists(id));
        }
        Ok(Reservation {
            ids: &self.reserved_ids,
            id,
        })
    }

    pub async fn add_availability(
        &self,
        id: Ulid,
        owner_id: PersonId,
        window: TimeWindow,
    ) -> Result<Availability, SchedulerError> {
        validate_window(&window)?;
        let _gate = self.compaction_gate.read().await;
        let _reservation = self.reserve(id)?;
        if self.state.contains_key(&id) {
            return Err(SchedulerError::AlreadyExists(id));
        }
        if self.state.len() >= MAX_AVAILABILITIES {
            return Err(SchedulerError::LimitExceeded("too many availabilities"));
        }

        let event = Event::AvailabilityCreated { id, owner_id, window };
        self.wal_append(&event).await?;
        let availability = Availability { id, owner_id, window };
        self.insert_availability(availability.clone());
        tracing::debug!(availability_id = %id, owner_id = %owner_id, "availability created");
        Ok(availability)
    }

    /// Store a booking as `pending`. The parent must exist and the window must be
    /// well formed; whether it collides with other bookings is not checked here.
    pub async fn add_booking(&self, record: NewBooking) -> Result<Booking, SchedulerError> {
        validate_window(&record.window)?;
        if let Some(ref n) = record.note
            && n.len() > MAX_NOTE_LEN {
                return Err(SchedulerError::LimitExceeded("note too long"));
            }
        let _gate = self.compaction_gate.read().await;
        let _reservation = self.reserve(record.id)?;
        if self.booking_index.contains_key(&record.id) {
            return Err(SchedulerError::AlreadyExists(record.id));
        }
        let st = self
            .get_state(&record.availability_id)
            .ok_or(SchedulerError::NotFound(record.availability_id))?;
        let mut guard = st.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_AVAILABILITY {
            return Err(SchedulerError::LimitExceeded("too many bookings on availability"));
        }

        let mut booking = record.into_pending();
        booking.owner_id = guard.availability.owner_id;

        let event = Event::BookingCreated { booking: booking.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(booking)
    }

    pub async fn change_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, SchedulerError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.resolve_booking_write(&id).await?;
        let current = guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .map(|b| b.status)
            .ok_or(SchedulerError::NotFound(id))?;
        if !current.can_transition_to(status) {
            return Err(SchedulerError::InvalidTransition { from: current, to: status });
        }

        let availability_id = guard.availability.id;
        let event = Event::BookingStatusChanged { id, availability_id, status };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .bookings
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(SchedulerError::NotFound(id))
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    /// Bookings are re-emitted with their current status, so status-change
    /// events disappear.
    ///
    /// The compaction gate is held exclusively from capture until the swap, so
    /// no mutation can append to the old file after its state was captured.
    pub async fn compact_wal(&self) -> Result<(), SchedulerError> {
        let _gate = self.compaction_gate.write().await;

        let states: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut availabilities = Vec::with_capacity(states.len());
        for st in states {
            let guard = st.read().await;
            availabilities.push((guard.availability.clone(), guard.bookings.clone()));
        }
        availabilities.sort_by_key(|(a, _)| a.id);

        let mut events = Vec::new();
        for (a, bookings) in availabilities {
            events.push(Event::AvailabilityCreated {
                id: a.id,
                owner_id: a.owner_id,
                window: a.window,
            });
            events.extend(bookings.into_iter().map(|booking| Event::BookingCreated { booking }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| SchedulerError::StorageError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| SchedulerError::StorageError("WAL writer dropped response".into()))?
            .map_err(|e| SchedulerError::StorageError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
