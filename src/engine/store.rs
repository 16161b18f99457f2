use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;
use crate::ports::SchedulingStore;

use super::{Engine, SchedulerError};

#[async_trait]
impl SchedulingStore for Engine {
    async fn create_availability(
        &self,
        id: Ulid,
        owner_id: PersonId,
        window: TimeWindow,
    ) -> Result<Availability, SchedulerError> {
        self.add_availability(id, owner_id, window).await
    }

    async fn get_availability(&self, id: Ulid) -> Result<Option<Availability>, SchedulerError> {
        Ok(self.availability(id).await)
    }

    async fn list_availabilities(&self) -> Result<Vec<Availability>, SchedulerError> {
        Ok(self.availabilities().await)
    }

    async fn list_availabilities_by_owner(
        &self,
        owner_id: PersonId,
    ) -> Result<Vec<Availability>, SchedulerError> {
        Ok(self.availabilities_by_owner(owner_id).await)
    }

    async fn create_booking(&self, record: NewBooking) -> Result<Booking, SchedulerError> {
        self.add_booking(record).await
    }

    async fn get_booking(&self, id: Ulid) -> Result<Option<Booking>, SchedulerError> {
        Ok(self.booking(id).await)
    }

    async fn list_bookings(&self) -> Result<Vec<Booking>, SchedulerError> {
        Ok(self.bookings().await)
    }

    async fn list_bookings_by_availability(
        &self,
        availability_id: Ulid,
    ) -> Result<Vec<Booking>, SchedulerError> {
        if !self.state.contains_key(&availability_id) {
            return Err(SchedulerError::NotFound(availability_id));
        }
        Ok(self.bookings_for(availability_id).await)
    }

    async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, SchedulerError> {
        self.change_booking_status(id, status).await
    }

    /// Reads every availability under its own lock, so the snapshot is
    /// consistent per availability, which is all free-segment math needs.
    async fn snapshot(&self, now: Ms) -> Result<Snapshot, SchedulerError> {
        let states: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut availabilities = Vec::with_capacity(states.len());
        let mut bookings = Vec::new();
        for st in states {
            let guard = st.read().await;
            availabilities.push(guard.availability.clone());
            bookings.extend(guard.bookings.iter().cloned());
        }
        availabilities.sort_by_key(|a| (a.window.start, a.id));
        bookings.sort_by_key(|b| (b.window.start, b.id));
        Ok(Snapshot {
            availabilities,
            bookings,
            fetched_at: now,
        })
    }
}
