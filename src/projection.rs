//! Role-specific calendar views.
//!
//! What an actor may learn about other people's bookings is decided by the
//! shape of [`EventKind`]: the variants produced for bookings that are not the
//! actor's own carry the availability they sit on and nothing else.

use std::collections::HashMap;

use ulid::Ulid;

use crate::engine::free_segments;
use crate::model::*;
use crate::policy::SchedulingPolicy;

/// Colors handed out to admins in id order, wrapping around.
pub const ADMIN_PALETTE: [&str; 8] = [
    "#4e79a7", "#59a14f", "#9c755f", "#b07aa1", "#76b7b2", "#edc948", "#ff9da7", "#bab0ac",
];

/// Blocks whose details the actor may not see.
pub const OPAQUE_COLOR: &str = "#9e9e9e";

pub fn status_color(status: BookingStatus) -> &'static str {
    match status {
        BookingStatus::Pending => "#f28e2b",
        BookingStatus::Accepted => "#2ca02c",
        BookingStatus::Declined => "#e15759",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A free segment of an availability.
    Available {
        availability_id: Ulid,
        owner_id: PersonId,
        owner_name: String,
    },
    /// Time taken on the admin's own availability.
    Booked { availability_id: Ulid },
    /// The viewing coach's own booking, in full.
    OwnBooking {
        booking_id: Ulid,
        availability_id: Ulid,
        owner_id: PersonId,
        status: BookingStatus,
        meeting_type: MeetingType,
        student_id: Option<PersonId>,
        note: Option<String>,
    },
    /// Somebody else's live booking.
    OtherBooking { availability_id: Ulid },
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Available { .. } => "available",
            EventKind::Booked { .. } => "booked",
            EventKind::OwnBooking { .. } => "own-booking",
            EventKind::OtherBooking { .. } => "other-booking",
        }
    }

    pub fn availability_id(&self) -> Ulid {
        match self {
            EventKind::Available { availability_id, .. }
            | EventKind::Booked { availability_id }
            | EventKind::OwnBooking { availability_id, .. }
            | EventKind::OtherBooking { availability_id } => *availability_id,
        }
    }
}

/// One block on an actor's calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedEvent {
    pub window: TimeWindow,
    pub color: &'static str,
    pub kind: EventKind,
}

impl AnnotatedEvent {
    pub fn label(&self) -> &'static str {
        self.kind.label()
    }
}

/// Palette color per admin, assigned by ascending id so every client
/// computes the same mapping from the same directory.
fn admin_colors(people: &[Person]) -> HashMap<PersonId, &'static str> {
    let mut admins: Vec<PersonId> = people
        .iter()
        .filter(|p| p.role == Role::Admin)
        .map(|p| p.id)
        .collect();
    admins.sort();
    admins.dedup();
    admins
        .into_iter()
        .enumerate()
        .map(|(i, id)| (id, ADMIN_PALETTE[i % ADMIN_PALETTE.len()]))
        .collect()
}

fn display_name(people: &[Person], id: PersonId) -> String {
    people
        .iter()
        .find(|p| p.id == id)
        .map(|p| p.display_name.clone())
        .unwrap_or_else(|| id.to_string())
}

/// Build the calendar `actor` is allowed to see from raw store contents.
///
/// `people` is used for admin names and colors; it may hold the whole
/// directory or just the admins.
pub fn project_for_actor(
    actor: &Actor,
    availabilities: &[Availability],
    bookings: &[Booking],
    people: &[Person],
    policy: &SchedulingPolicy,
) -> Vec<AnnotatedEvent> {
    let mut events = match actor.role {
        Role::Admin => project_for_admin(actor.id, availabilities, bookings, people, policy),
        Role::Coach => project_for_coach(actor.id, availabilities, bookings, people, policy),
        Role::Student => Vec::new(),
    };
    events.sort_by_key(|e| e.window.start);
    events
}

fn project_for_admin(
    admin_id: PersonId,
    availabilities: &[Availability],
    bookings: &[Booking],
    people: &[Person],
    policy: &SchedulingPolicy,
) -> Vec<AnnotatedEvent> {
    let colors = admin_colors(people);
    let color = colors.get(&admin_id).copied().unwrap_or(ADMIN_PALETTE[0]);
    let name = display_name(people, admin_id);
    let mut out = Vec::new();

    for availability in availabilities.iter().filter(|a| a.owner_id == admin_id) {
        for window in free_segments(availability, bookings, policy.admin_hours) {
            out.push(AnnotatedEvent {
                window,
                color,
                kind: EventKind::Available {
                    availability_id: availability.id,
                    owner_id: admin_id,
                    owner_name: name.clone(),
                },
            });
        }
    }

    for booking in bookings
        .iter()
        .filter(|b| b.owner_id == admin_id && b.consumes_time())
    {
        out.push(AnnotatedEvent {
            window: booking.window,
            color: OPAQUE_COLOR,
            kind: EventKind::Booked {
                availability_id: booking.availability_id,
            },
        });
    }
    out
}

fn project_for_coach(
    coach_id: PersonId,
    availabilities: &[Availability],
    bookings: &[Booking],
    people: &[Person],
    policy: &SchedulingPolicy,
) -> Vec<AnnotatedEvent> {
    let colors = admin_colors(people);
    let mut out = Vec::new();

    for availability in availabilities {
        let color = colors
            .get(&availability.owner_id)
            .copied()
            .unwrap_or(OPAQUE_COLOR);
        let owner_name = display_name(people, availability.owner_id);
        for window in free_segments(availability, bookings, policy.coach_hours) {
            out.push(AnnotatedEvent {
                window,
                color,
                kind: EventKind::Available {
                    availability_id: availability.id,
                    owner_id: availability.owner_id,
                    owner_name: owner_name.clone(),
                },
            });
        }
    }

    for booking in bookings {
        if booking.requester_id == coach_id {
            out.push(AnnotatedEvent {
                window: booking.window,
                color: status_color(booking.status),
                kind: EventKind::OwnBooking {
                    booking_id: booking.id,
                    availability_id: booking.availability_id,
                    owner_id: booking.owner_id,
                    status: booking.status,
                    meeting_type: booking.meeting_type,
                    student_id: booking.student_id,
                    note: booking.note.clone(),
                },
            });
        } else if booking.consumes_time() {
            out.push(AnnotatedEvent {
                window: booking.window,
                color: OPAQUE_COLOR,
                kind: EventKind::OtherBooking {
                    availability_id: booking.availability_id,
                },
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = HOUR_MS;
    const M: Ms = MINUTE_MS;
    /// Monday 2026-01-05 00:00 UTC.
    const MONDAY: Ms = 1_767_571_200_000;

    fn at(hour: Ms, minute: Ms) -> Ms {
        MONDAY + hour * H + minute * M
    }

    fn person(name: &str, role: Role) -> Person {
        Person {
            id: Ulid::new(),
            display_name: name.into(),
            role,
        }
    }

    fn booking(
        availability: &Availability,
        requester: PersonId,
        start: Ms,
        end: Ms,
        status: BookingStatus,
    ) -> Booking {
        Booking {
            id: Ulid::new(),
            availability_id: availability.id,
            requester_id: requester,
            owner_id: availability.owner_id,
            window: TimeWindow::new(start, end),
            status,
            meeting_type: MeetingType::Followup,
            student_id: Some(Ulid::new()),
            note: Some("private remark".into()),
            created_at: at(7, 0),
        }
    }

    struct Fixture {
        admin: Person,
        other_admin: Person,
        coach: Person,
        other_coach: Person,
        mine: Availability,
        theirs: Availability,
    }

    fn fixture() -> Fixture {
        let admin = person("Ada", Role::Admin);
        let other_admin = person("Grace", Role::Admin);
        let mine = Availability {
            id: Ulid::new(),
            owner_id: admin.id,
            window: TimeWindow::new(at(8, 0), at(10, 0)),
        };
        let theirs = Availability {
            id: Ulid::new(),
            owner_id: other_admin.id,
            window: TimeWindow::new(at(13, 0), at(16, 0)),
        };
        Fixture {
            admin,
            other_admin,
            coach: person("Carl", Role::Coach),
            other_coach: person("Dana", Role::Coach),
            mine,
            theirs,
        }
    }

    fn people(f: &Fixture) -> Vec<Person> {
        vec![
            f.admin.clone(),
            f.other_admin.clone(),
            f.coach.clone(),
            f.other_coach.clone(),
        ]
    }

    #[test]
    fn coach_never_sees_other_coach_details() {
        let f = fixture();
        let theirs = booking(&f.mine, f.other_coach.id, at(8, 30), at(9, 0), BookingStatus::Pending);
        let events = project_for_actor(
            &Actor::from(&f.coach),
            &[f.mine.clone()],
            &[theirs.clone()],
            &people(&f),
            &SchedulingPolicy::default(),
        );

        let other: Vec<_> = events.iter().filter(|e| e.label() == "other-booking").collect();
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].color, OPAQUE_COLOR);
        assert_eq!(other[0].kind, EventKind::OtherBooking { availability_id: f.mine.id });
        let rendered = format!("{events:?}");
        assert!(!rendered.contains("private remark"));
        assert!(!rendered.contains(&theirs.id.to_string()));
        assert!(!rendered.contains(&f.other_coach.id.to_string()));
    }

    #[test]
    fn coach_sees_own_bookings_in_every_state() {
        let f = fixture();
        let pending = booking(&f.mine, f.coach.id, at(8, 0), at(8, 30), BookingStatus::Pending);
        let declined = booking(&f.mine, f.coach.id, at(9, 0), at(9, 30), BookingStatus::Declined);
        let events = project_for_actor(
            &Actor::from(&f.coach),
            &[f.mine.clone()],
            &[pending.clone(), declined.clone()],
            &people(&f),
            &SchedulingPolicy::default(),
        );

        let own: Vec<_> = events.iter().filter(|e| e.label() == "own-booking").collect();
        assert_eq!(own.len(), 2);
        assert_eq!(own[0].color, status_color(BookingStatus::Pending));
        assert_eq!(own[1].color, status_color(BookingStatus::Declined));
        match &own[0].kind {
            EventKind::OwnBooking { booking_id, note, student_id, .. } => {
                assert_eq!(*booking_id, pending.id);
                assert_eq!(note.as_deref(), Some("private remark"));
                assert_eq!(*student_id, pending.student_id);
            }
            other => panic!("expected own booking, got {other:?}"),
        }
    }

    #[test]
    fn other_coach_declined_bookings_hidden() {
        let f = fixture();
        let declined = booking(&f.mine, f.other_coach.id, at(8, 30), at(9, 0), BookingStatus::Declined);
        let events = project_for_actor(
            &Actor::from(&f.coach),
            &[f.mine.clone()],
            &[declined],
            &people(&f),
            &SchedulingPolicy::default(),
        );
        assert!(events.iter().all(|e| e.label() == "available"));
        // declined time is free again
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].window, f.mine.window);
    }

    #[test]
    fn coach_sees_every_admin_with_names_and_colors() {
        let f = fixture();
        let events = project_for_actor(
            &Actor::from(&f.coach),
            &[f.theirs.clone(), f.mine.clone()],
            &[],
            &people(&f),
            &SchedulingPolicy::default(),
        );

        // 13:00-16:00 is cut to nothing by the 15:00 coach cutoff
        assert_eq!(events.len(), 1);
        let EventKind::Available { owner_name, owner_id, .. } = &events[0].kind else {
            panic!("expected available");
        };
        assert_eq!(owner_name, "Ada");
        assert_eq!(*owner_id, f.admin.id);

        let wide_hours = SchedulingPolicy {
            coach_hours: crate::policy::WorkHours::from_hours(8, 17).unwrap(),
            ..SchedulingPolicy::default()
        };
        let events = project_for_actor(
            &Actor::from(&f.coach),
            &[f.theirs.clone(), f.mine.clone()],
            &[],
            &people(&f),
            &wide_hours,
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind.availability_id(), f.mine.id);
        assert_ne!(events[0].color, events[1].color);
        assert_eq!(events[0].color, admin_colors(&people(&f))[&f.admin.id]);
    }

    #[test]
    fn admin_sees_only_own_calendar() {
        let f = fixture();
        let on_mine = booking(&f.mine, f.coach.id, at(8, 30), at(9, 0), BookingStatus::Accepted);
        let declined_on_mine =
            booking(&f.mine, f.coach.id, at(9, 0), at(9, 30), BookingStatus::Declined);
        let on_theirs = booking(&f.theirs, f.coach.id, at(13, 0), at(13, 30), BookingStatus::Pending);
        let events = project_for_actor(
            &Actor::from(&f.admin),
            &[f.mine.clone(), f.theirs.clone()],
            &[on_mine, declined_on_mine, on_theirs],
            &people(&f),
            &SchedulingPolicy::default(),
        );

        let labels: Vec<_> = events.iter().map(|e| (e.label(), e.window)).collect();
        assert_eq!(
            labels,
            vec![
                ("available", TimeWindow::new(at(8, 0), at(8, 30))),
                ("booked", TimeWindow::new(at(8, 30), at(9, 0))),
                ("available", TimeWindow::new(at(9, 0), at(10, 0))),
            ]
        );
        assert!(events.iter().all(|e| e.kind.availability_id() == f.mine.id));
    }

    #[test]
    fn admin_hours_allow_later_segments() {
        let f = fixture();
        let events = project_for_actor(
            &Actor::from(&f.other_admin),
            &[f.mine.clone(), f.theirs.clone()],
            &[],
            &people(&f),
            &SchedulingPolicy::default(),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].window, f.theirs.window);
    }

    #[test]
    fn students_see_nothing() {
        let f = fixture();
        let student = person("Sam", Role::Student);
        let b = booking(&f.mine, f.coach.id, at(8, 30), at(9, 0), BookingStatus::Pending);
        let events = project_for_actor(
            &Actor::from(&student),
            &[f.mine.clone()],
            &[b],
            &people(&f),
            &SchedulingPolicy::default(),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn output_sorted_by_start() {
        let f = fixture();
        let late = booking(&f.mine, f.other_coach.id, at(9, 30), at(10, 0), BookingStatus::Pending);
        let early = booking(&f.mine, f.coach.id, at(8, 0), at(8, 30), BookingStatus::Pending);
        let events = project_for_actor(
            &Actor::from(&f.coach),
            &[f.mine.clone()],
            &[late, early],
            &people(&f),
            &SchedulingPolicy::default(),
        );
        let starts: Vec<Ms> = events.iter().map(|e| e.window.start).collect();
        assert!(starts.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(events.len(), 3);
    }
}
