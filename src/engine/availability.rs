use crate::model::*;
use crate::policy::WorkHours;

// ── Free-segment algorithm ────────────────────────────────────────

/// Sub-intervals of `availability` not consumed by any of its non-declined
/// bookings, restricted to segments that sit fully inside `hours`.
///
/// Pure and deterministic: it runs on every client refresh and again at
/// booking time, and both runs must agree for the same inputs. Bookings that
/// belong to other availabilities are ignored, so callers may pass a whole
/// snapshot.
pub fn free_segments(
    availability: &Availability,
    bookings: &[Booking],
    hours: WorkHours,
) -> Vec<TimeWindow> {
    let mut cuts: Vec<TimeWindow> = bookings
        .iter()
        .filter(|b| b.availability_id == availability.id && b.consumes_time())
        .map(|b| b.window)
        .collect();
    cuts.sort_by_key(|w| w.start);

    subtract_sorted(&availability.window, &cuts)
        .into_iter()
        .filter_map(|w| clamp_to_work_hours(&w, hours))
        .collect()
}

/// Parts of `outer` not covered by any cut. Cuts may be unsorted and may
/// overlap each other; the result is ordered and pairwise disjoint.
pub fn subtract(outer: &TimeWindow, cuts: &[TimeWindow]) -> Vec<TimeWindow> {
    let mut sorted = cuts.to_vec();
    sorted.sort_by_key(|w| w.start);
    subtract_sorted(outer, &sorted)
}

/// Cursor sweep over cuts sorted by start.
fn subtract_sorted(outer: &TimeWindow, cuts: &[TimeWindow]) -> Vec<TimeWindow> {
    let mut result = Vec::new();
    let mut cursor = outer.start;

    for cut in cuts {
        if cut.end <= cursor {
            continue;
        }
        if cut.start >= outer.end {
            break;
        }
        if cut.start > cursor {
            result.push(TimeWindow::new(cursor, cut.start));
        }
        cursor = cursor.max(cut.end);
    }

    if cursor < outer.end {
        result.push(TimeWindow::new(cursor, outer.end));
    }
    result
}

/// Keep `window` only if it lies entirely within the work hours of the UTC day
/// it starts on. Windows crossing a boundary are dropped, not truncated.
pub fn clamp_to_work_hours(window: &TimeWindow, hours: WorkHours) -> Option<TimeWindow> {
    let day = window.day_start();
    let bounds = TimeWindow::new(day + hours.start, day + hours.end);
    bounds.contains(window).then_some(*window)
}

/// Align `t` to the grid at or before it.
pub fn snap_down(t: Ms, grid: Ms) -> Ms {
    if grid <= 1 {
        return t;
    }
    t - t.rem_euclid(grid)
}

/// Align `t` to the grid at or after it.
pub fn snap_up(t: Ms, grid: Ms) -> Ms {
    if grid <= 1 {
        return t;
    }
    let rem = t.rem_euclid(grid);
    if rem == 0 { t } else { t + (grid - rem) }
}
