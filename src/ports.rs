//! Seams to the collaborators the scheduler does not own: persistence, the
//! person directory, outward notifications and time.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use ulid::Ulid;

use crate::engine::SchedulerError;
use crate::model::*;

/// Availability and booking persistence.
///
/// Implementations only guarantee that each single call is applied atomically.
/// Nothing here spans a read and a later write, and `create_booking` does not
/// look at other bookings; overlap is judged by the caller against a snapshot.
#[async_trait]
pub trait SchedulingStore: Send + Sync {
    async fn create_availability(
        &self,
        id: Ulid,
        owner_id: PersonId,
        window: TimeWindow,
    ) -> Result<Availability, SchedulerError>;

    async fn get_availability(&self, id: Ulid) -> Result<Option<Availability>, SchedulerError>;

    async fn list_availabilities(&self) -> Result<Vec<Availability>, SchedulerError>;

    async fn list_availabilities_by_owner(
        &self,
        owner_id: PersonId,
    ) -> Result<Vec<Availability>, SchedulerError>;

    async fn create_booking(&self, record: NewBooking) -> Result<Booking, SchedulerError>;

    async fn get_booking(&self, id: Ulid) -> Result<Option<Booking>, SchedulerError>;

    async fn list_bookings(&self) -> Result<Vec<Booking>, SchedulerError>;

    async fn list_bookings_by_availability(
        &self,
        availability_id: Ulid,
    ) -> Result<Vec<Booking>, SchedulerError>;

    async fn set_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, SchedulerError>;

    /// Everything, read in one pass.
    async fn snapshot(&self, now: Ms) -> Result<Snapshot, SchedulerError> {
        Ok(Snapshot {
            availabilities: self.list_availabilities().await?,
            bookings: self.list_bookings().await?,
            fetched_at: now,
        })
    }

    /// Booking records an actor may see in full: an admin gets the live
    /// bookings on their own availabilities, a coach gets their own bookings
    /// in every state. Other coaches' bookings are never returned as records.
    async fn list_bookings_visible_to(&self, actor: Actor) -> Result<Vec<Booking>, SchedulerError> {
        let all = self.list_bookings().await?;
        Ok(match actor.role {
            Role::Admin => all
                .into_iter()
                .filter(|b| b.owner_id == actor.id && b.consumes_time())
                .collect(),
            Role::Coach => all
                .into_iter()
                .filter(|b| b.requester_id == actor.id)
                .collect(),
            Role::Student => Vec::new(),
        })
    }
}

/// Read-only view of who is who.
#[async_trait]
pub trait PersonDirectory: Send + Sync {
    async fn list_people_by_role(&self, role: Role) -> Result<Vec<Person>, SchedulerError>;

    async fn find_person(&self, id: PersonId) -> Result<Option<Person>, SchedulerError> {
        for role in [Role::Admin, Role::Coach, Role::Student] {
            if let Some(p) = self
                .list_people_by_role(role)
                .await?
                .into_iter()
                .find(|p| p.id == id)
            {
                return Ok(Some(p));
            }
        }
        Ok(None)
    }
}

pub type NotifyError = Box<dyn std::error::Error + Send + Sync>;

/// Outward hook fired after a booking is created or changes state.
/// Fire-and-forget: the scheduler logs a failure and carries on.
pub trait BookingNotifier: Send + Sync {
    fn on_booking_created(&self, booking: &Booking) -> Result<(), NotifyError>;
    fn on_booking_status_changed(&self, booking: &Booking) -> Result<(), NotifyError>;
}

/// Writes booking changes to the log and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl BookingNotifier for LogNotifier {
    fn on_booking_created(&self, booking: &Booking) -> Result<(), NotifyError> {
        tracing::info!(
            booking_id = %booking.id,
            availability_id = %booking.availability_id,
            requester_id = %booking.requester_id,
            "booking requested"
        );
        Ok(())
    }

    fn on_booking_status_changed(&self, booking: &Booking) -> Result<(), NotifyError> {
        tracing::info!(
            booking_id = %booking.id,
            status = booking.status.as_str(),
            "booking status changed"
        );
        Ok(())
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Ms;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Ms {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as Ms)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn new(now: Ms) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: Ms) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Ms {
        self.now.load(Ordering::SeqCst)
    }
}
