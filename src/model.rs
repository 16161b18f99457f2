use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC). The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// People are identified by the directory's ids.
pub type PersonId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: Ms,
    pub end: Ms,
}

impl TimeWindow {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "TimeWindow start must be before end");
        Self { start, end }
    }

    /// Checked constructor for untrusted input.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains(&self, other: &TimeWindow) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Start of the UTC day this window starts on.
    pub fn day_start(&self) -> Ms {
        self.start - self.start.rem_euclid(DAY_MS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Coach,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Coach => "coach",
            Role::Student => "student",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "coach" => Some(Role::Coach),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

/// An entry of the external person directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub display_name: String,
    pub role: Role,
}

/// The identity a read or write is performed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: PersonId,
    pub role: Role,
}

impl Actor {
    pub fn admin(id: PersonId) -> Self {
        Self { id, role: Role::Admin }
    }

    pub fn coach(id: PersonId) -> Self {
        Self { id, role: Role::Coach }
    }
}

impl From<&Person> for Actor {
    fn from(p: &Person) -> Self {
        Self { id: p.id, role: p.role }
    }
}

/// A block of time an admin has declared bookable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub id: Ulid,
    pub owner_id: PersonId,
    pub window: TimeWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Accepted,
    Declined,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Accepted => "accepted",
            BookingStatus::Declined => "declined",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(BookingStatus::Pending),
            "accepted" => Some(BookingStatus::Accepted),
            "declined" => Some(BookingStatus::Declined),
            _ => None,
        }
    }

    /// Only `pending` has outgoing edges, and only to the two terminal states.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Accepted)
                | (BookingStatus::Pending, BookingStatus::Declined)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeetingType {
    /// New prospective participant, no student reference.
    Intro,
    /// Existing participant, requires a student reference.
    Followup,
}

impl MeetingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingType::Intro => "intro",
            MeetingType::Followup => "followup",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "intro" => Some(MeetingType::Intro),
            "followup" | "follow-up" => Some(MeetingType::Followup),
            _ => None,
        }
    }
}

/// One reservation of a sub-interval of exactly one availability.
/// Only `status` ever changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub availability_id: Ulid,
    pub requester_id: PersonId,
    /// Owner of the parent availability, duplicated for filtering.
    pub owner_id: PersonId,
    pub window: TimeWindow,
    pub status: BookingStatus,
    pub meeting_type: MeetingType,
    pub student_id: Option<PersonId>,
    pub note: Option<String>,
    pub created_at: Ms,
}

impl Booking {
    /// Declined bookings give their time back.
    pub fn consumes_time(&self) -> bool {
        self.status != BookingStatus::Declined
    }
}

/// A booking record as handed to the store; the store stamps it `pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub id: Ulid,
    pub availability_id: Ulid,
    pub requester_id: PersonId,
    pub owner_id: PersonId,
    pub window: TimeWindow,
    pub meeting_type: MeetingType,
    pub student_id: Option<PersonId>,
    pub note: Option<String>,
    pub created_at: Ms,
}

impl NewBooking {
    pub fn into_pending(self) -> Booking {
        Booking {
            id: self.id,
            availability_id: self.availability_id,
            requester_id: self.requester_id,
            owner_id: self.owner_id,
            window: self.window,
            status: BookingStatus::Pending,
            meeting_type: self.meeting_type,
            student_id: self.student_id,
            note: self.note,
            created_at: self.created_at,
        }
    }
}

/// Engine state for one availability: the window plus every booking made on it,
/// sorted by `window.start`.
#[derive(Debug, Clone)]
pub struct AvailabilityState {
    pub availability: Availability,
    pub bookings: Vec<Booking>,
}

impl AvailabilityState {
    pub fn new(availability: Availability) -> Self {
        Self {
            availability,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by window.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.window.start <= booking.window.start);
        self.bookings.insert(pos, booking);
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }
}

/// The WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AvailabilityCreated {
        id: Ulid,
        owner_id: PersonId,
        window: TimeWindow,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        availability_id: Ulid,
        status: BookingStatus,
    },
}

impl Event {
    /// The availability an event belongs to.
    pub fn availability_id(&self) -> Ulid {
        match self {
            Event::AvailabilityCreated { id, .. } => *id,
            Event::BookingCreated { booking } => booking.availability_id,
            Event::BookingStatusChanged { availability_id, .. } => *availability_id,
        }
    }
}

/// All availabilities and bookings as read at one instant.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub availabilities: Vec<Availability>,
    pub bookings: Vec<Booking>,
    pub fetched_at: Ms,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_basics() {
        let w = TimeWindow::new(100, 200);
        assert_eq!(w.duration_ms(), 100);
        assert!(TimeWindow::try_new(200, 200).is_none());
        assert!(TimeWindow::try_new(300, 200).is_none());
    }

    #[test]
    fn window_overlap() {
        let a = TimeWindow::new(100, 200);
        let b = TimeWindow::new(150, 250);
        let c = TimeWindow::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn window_contains() {
        let outer = TimeWindow::new(100, 400);
        let inner = TimeWindow::new(150, 300);
        let partial = TimeWindow::new(50, 200);
        assert!(outer.contains(&inner));
        assert!(outer.contains(&outer));
        assert!(!outer.contains(&partial));
    }

    #[test]
    fn day_start_is_utc_midnight() {
        let monday = 3 * DAY_MS;
        let w = TimeWindow::new(monday + 9 * HOUR_MS, monday + 10 * HOUR_MS);
        assert_eq!(w.day_start(), monday);
        let before_epoch = TimeWindow::new(-HOUR_MS, -HOUR_MS + MINUTE_MS);
        assert_eq!(before_epoch.day_start(), -DAY_MS);
    }

    #[test]
    fn status_transitions() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Accepted));
        assert!(Pending.can_transition_to(Declined));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Accepted.can_transition_to(Declined));
        assert!(!Declined.can_transition_to(Pending));
        assert!(!Declined.can_transition_to(Accepted));
    }

    #[test]
    fn enum_parsing() {
        assert_eq!(BookingStatus::parse("Accepted"), Some(BookingStatus::Accepted));
        assert_eq!(MeetingType::parse("follow-up"), Some(MeetingType::Followup));
        assert_eq!(Role::parse("COACH"), Some(Role::Coach));
        assert_eq!(Role::parse("janitor"), None);
    }

    fn booking_at(start: Ms, end: Ms) -> Booking {
        NewBooking {
            id: Ulid::new(),
            availability_id: Ulid::new(),
            requester_id: Ulid::new(),
            owner_id: Ulid::new(),
            window: TimeWindow::new(start, end),
            meeting_type: MeetingType::Intro,
            student_id: None,
            note: None,
            created_at: 0,
        }
        .into_pending()
    }

    #[test]
    fn bookings_kept_sorted() {
        let avail = Availability {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            window: TimeWindow::new(0, 1000),
        };
        let mut st = AvailabilityState::new(avail);
        st.insert_booking(booking_at(300, 400));
        st.insert_booking(booking_at(100, 200));
        st.insert_booking(booking_at(200, 300));
        let starts: Vec<Ms> = st.bookings.iter().map(|b| b.window.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn equal_starts_keep_insertion_order() {
        let avail = Availability {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            window: TimeWindow::new(0, 1000),
        };
        let mut st = AvailabilityState::new(avail);
        let first = booking_at(100, 200);
        let second = booking_at(100, 300);
        st.insert_booking(first.clone());
        st.insert_booking(second.clone());
        assert_eq!(st.bookings[0].id, first.id);
        assert_eq!(st.bookings[1].id, second.id);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            booking: booking_at(100, 200),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
