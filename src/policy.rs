use std::time::Duration;

use crate::model::{DAY_MS, HOUR_MS, MINUTE_MS, Ms, Role};

/// Daily bookable hours as offsets from UTC midnight, half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkHours {
    pub start: Ms,
    pub end: Ms,
}

impl WorkHours {
    pub fn new(start: Ms, end: Ms) -> Option<Self> {
        (0 <= start && start < end && end <= DAY_MS).then_some(Self { start, end })
    }

    pub fn from_hours(start_hour: i64, end_hour: i64) -> Option<Self> {
        Self::new(start_hour * HOUR_MS, end_hour * HOUR_MS)
    }

    /// Parse `"HH:MM-HH:MM"`. `24:00` is accepted as an end bound.
    pub fn parse(s: &str) -> Option<Self> {
        let (a, b) = s.trim().split_once('-')?;
        Self::new(parse_clock(a)?, parse_clock(b)?)
    }
}

impl std::fmt::Display for WorkHours {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start / HOUR_MS,
            (self.start % HOUR_MS) / MINUTE_MS,
            self.end / HOUR_MS,
            (self.end % HOUR_MS) / MINUTE_MS
        )
    }
}

fn parse_clock(s: &str) -> Option<Ms> {
    let (h, m) = s.trim().split_once(':')?;
    let h: i64 = h.parse().ok()?;
    let m: i64 = m.parse().ok()?;
    if !(0..60).contains(&m) || !(0..=24).contains(&h) || (h == 24 && m != 0) {
        return None;
    }
    Some(h * HOUR_MS + m * MINUTE_MS)
}

/// Scheduling knobs. None of them are protocol; they only shape what is
/// offered and accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingPolicy {
    /// Hours used when admins look at their own calendar.
    pub admin_hours: WorkHours,
    /// Hours coaches may book in.
    pub coach_hours: WorkHours,
    /// Booking requests are widened to this grid.
    pub snap_ms: Ms,
    /// How often a client re-pulls the snapshot.
    pub poll_interval: Duration,
}

pub const DEFAULT_SNAP_MS: Ms = 30 * MINUTE_MS;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            admin_hours: WorkHours { start: 8 * HOUR_MS, end: 17 * HOUR_MS },
            coach_hours: WorkHours { start: 8 * HOUR_MS, end: 15 * HOUR_MS },
            snap_ms: DEFAULT_SNAP_MS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl SchedulingPolicy {
    /// Work hours that apply to a role's view. Students never see a calendar,
    /// so they fall back to the booking hours.
    pub fn hours_for(&self, role: Role) -> WorkHours {
        match role {
            Role::Admin => self.admin_hours,
            Role::Coach | Role::Student => self.coach_hours,
        }
    }
}
