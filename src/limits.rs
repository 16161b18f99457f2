use crate::model::{DAY_MS, Ms};

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// An availability may not span more than a week.
pub const MAX_WINDOW_DURATION_MS: Ms = 7 * DAY_MS;

pub const MAX_AVAILABILITIES: usize = 100_000;
pub const MAX_BOOKINGS_PER_AVAILABILITY: usize = 1_000;
pub const MAX_NOTE_LEN: usize = 2_000;
pub const MAX_PEOPLE: usize = 50_000;
pub const MAX_DISPLAY_NAME_LEN: usize = 256;
