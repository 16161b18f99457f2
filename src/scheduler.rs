//! Booking validation and the role-checked operations built on top of the
//! store.
//!
//! Validation reads the store, decides against what it read and then writes.
//! Nothing holds the availability between the read and the write, so two
//! requests validated against the same snapshot can both land as `pending`.
//! The owning admin settles such overlaps when accepting or declining.

use std::sync::Arc;

use ulid::Ulid;

use crate::engine::{SchedulerError, free_segments, snap_down, snap_up};
use crate::limits::MAX_NOTE_LEN;
use crate::model::*;
use crate::observability::{
    BOOKING_REQUESTS_TOTAL, BOOKING_STATUS_CHANGES_TOTAL, NOTIFY_FAILURES_TOTAL, error_label,
};
use crate::policy::SchedulingPolicy;
use crate::ports::{BookingNotifier, Clock, PersonDirectory, SchedulingStore};
use crate::projection::{AnnotatedEvent, project_for_actor};

/// A coach's raw booking request. `start`/`end` are as typed by the user and
/// are not required to be well formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub availability_id: Ulid,
    pub start: Ms,
    pub end: Ms,
    pub requester_id: PersonId,
    pub meeting_type: MeetingType,
    pub student_id: Option<PersonId>,
    pub note: Option<String>,
}

/// What a valid request turns into: the snapped window and the cleaned-up
/// references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPlan {
    pub window: TimeWindow,
    pub student_id: Option<PersonId>,
    pub note: Option<String>,
}

/// Decide whether `request` fits the given view of the store.
///
/// `availability` is the request's availability as read (None if absent) and
/// `bookings` are its bookings; bookings of other availabilities are ignored.
/// Checks run in a fixed order: the student reference, then the raw window,
/// then the calendar.
pub fn plan_booking(
    request: &BookingRequest,
    availability: Option<&Availability>,
    bookings: &[Booking],
    policy: &SchedulingPolicy,
    now: Ms,
) -> Result<BookingPlan, SchedulerError> {
    let student_id = match request.meeting_type {
        MeetingType::Followup => Some(request.student_id.ok_or(SchedulerError::MissingStudent)?),
        MeetingType::Intro => None,
    };

    let raw = TimeWindow::try_new(request.start, request.end).ok_or(
        SchedulerError::InvalidWindow {
            start: request.start,
            end: request.end,
        },
    )?;

    let availability = availability.ok_or(SchedulerError::NotFound(request.availability_id))?;
    let unavailable = SchedulerError::SlotUnavailable { requested: raw };

    let segment = free_segments(availability, bookings, policy.coach_hours)
        .into_iter()
        .find(|seg| seg.contains(&raw))
        .ok_or(unavailable)?;

    if raw.start < now {
        return Err(SchedulerError::SlotUnavailable { requested: raw });
    }
    // Snapping never reaches back past the segment start or into the past.
    let snapped_start = snap_down(raw.start, policy.snap_ms)
        .max(segment.start)
        .max(now);
    let snapped_end = snap_up(raw.end, policy.snap_ms).min(segment.end);
    let window = TimeWindow::try_new(snapped_start, snapped_end)
        .ok_or(SchedulerError::SlotUnavailable { requested: raw })?;

    let note = request
        .note
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_owned);
    if note.as_ref().is_some_and(|n| n.len() > MAX_NOTE_LEN) {
        return Err(SchedulerError::LimitExceeded("note too long"));
    }

    Ok(BookingPlan {
        window,
        student_id,
        note,
    })
}

/// Entry point for every scheduling operation that needs more than one store
/// call or a role check.
pub struct Scheduler {
    store: Arc<dyn SchedulingStore>,
    directory: Arc<dyn PersonDirectory>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn BookingNotifier>,
    policy: SchedulingPolicy,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        directory: Arc<dyn PersonDirectory>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn BookingNotifier>,
        policy: SchedulingPolicy,
    ) -> Self {
        Self {
            store,
            directory,
            clock,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> &SchedulingPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn SchedulingStore> {
        &self.store
    }

    pub fn directory(&self) -> &Arc<dyn PersonDirectory> {
        &self.directory
    }

    /// Publish an open window. Only admins own availabilities.
    pub async fn create_availability(
        &self,
        actor: Actor,
        id: Option<Ulid>,
        window: TimeWindow,
    ) -> Result<Availability, SchedulerError> {
        if actor.role != Role::Admin {
            return Err(SchedulerError::NotPermitted("only admins publish availability"));
        }
        self.store
            .create_availability(id.unwrap_or_else(Ulid::new), actor.id, window)
            .await
    }

    /// Validate a request against the current store contents and persist it
    /// as `pending`.
    pub async fn request_booking(&self, request: BookingRequest) -> Result<Booking, SchedulerError> {
        let result = self.try_request_booking(request).await;
        let outcome = match &result {
            Ok(_) => "created",
            Err(e) => error_label(e),
        };
        metrics::counter!(BOOKING_REQUESTS_TOTAL, "outcome" => outcome).increment(1);

        let booking = result?;
        if let Err(e) = self.notifier.on_booking_created(&booking) {
            metrics::counter!(NOTIFY_FAILURES_TOTAL, "hook" => "booking_created").increment(1);
            tracing::warn!(booking_id = %booking.id, "booking-created hook failed: {e}");
        }
        Ok(booking)
    }

    async fn try_request_booking(&self, request: BookingRequest) -> Result<Booking, SchedulerError> {
        let availability = self.store.get_availability(request.availability_id).await?;
        let bookings = match &availability {
            Some(a) => self.store.list_bookings_by_availability(a.id).await?,
            None => Vec::new(),
        };

        let now = self.clock.now();
        let plan = plan_booking(&request, availability.as_ref(), &bookings, &self.policy, now)?;
        let Some(availability) = availability else {
            return Err(SchedulerError::NotFound(request.availability_id));
        };

        let booking = self
            .store
            .create_booking(NewBooking {
                id: Ulid::new(),
                availability_id: availability.id,
                requester_id: request.requester_id,
                owner_id: availability.owner_id,
                window: plan.window,
                meeting_type: request.meeting_type,
                student_id: plan.student_id,
                note: plan.note,
                created_at: now,
            })
            .await?;
        tracing::debug!(
            booking_id = %booking.id,
            availability_id = %booking.availability_id,
            start = booking.window.start,
            end = booking.window.end,
            "booking stored as pending"
        );
        Ok(booking)
    }

    /// Accept or decline a booking. Only the admin owning its availability
    /// may decide.
    pub async fn set_booking_status(
        &self,
        actor: Actor,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, SchedulerError> {
        let current = self
            .store
            .get_booking(id)
            .await?
            .ok_or(SchedulerError::NotFound(id))?;
        if actor.role != Role::Admin || current.owner_id != actor.id {
            return Err(SchedulerError::NotPermitted(
                "only the owning admin decides on a booking",
            ));
        }

        let booking = self.store.set_booking_status(id, status).await?;
        metrics::counter!(BOOKING_STATUS_CHANGES_TOTAL, "status" => status.as_str()).increment(1);
        if let Err(e) = self.notifier.on_booking_status_changed(&booking) {
            metrics::counter!(NOTIFY_FAILURES_TOTAL, "hook" => "booking_status_changed")
                .increment(1);
            tracing::warn!(booking_id = %booking.id, "status-change hook failed: {e}");
        }
        Ok(booking)
    }

    /// Free segments of one availability under the hours that apply to `actor`.
    pub async fn free_segments_for(
        &self,
        actor: Actor,
        availability_id: Ulid,
    ) -> Result<Vec<TimeWindow>, SchedulerError> {
        let availability = self
            .store
            .get_availability(availability_id)
            .await?
            .ok_or(SchedulerError::NotFound(availability_id))?;
        let bookings = self.store.list_bookings_by_availability(availability_id).await?;
        Ok(free_segments(
            &availability,
            &bookings,
            self.policy.hours_for(actor.role),
        ))
    }

    /// The actor's calendar as of now.
    pub async fn calendar(&self, actor: Actor) -> Result<Vec<AnnotatedEvent>, SchedulerError> {
        calendar_for(
            self.store.as_ref(),
            self.directory.as_ref(),
            actor,
            &self.policy,
            self.clock.now(),
        )
        .await
    }
}

/// Pull a snapshot plus the admin list and project it for `actor`.
pub async fn calendar_for(
    store: &dyn SchedulingStore,
    directory: &dyn PersonDirectory,
    actor: Actor,
    policy: &SchedulingPolicy,
    now: Ms,
) -> Result<Vec<AnnotatedEvent>, SchedulerError> {
    if actor.role == Role::Student {
        return Ok(Vec::new());
    }
    let snapshot = store.snapshot(now).await?;
    let admins = directory.list_people_by_role(Role::Admin).await?;
    Ok(project_for_actor(
        &actor,
        &snapshot.availabilities,
        &snapshot.bookings,
        &admins,
        policy,
    ))
}
