use chrono::NaiveDate;

use crate::model::*;

/// Candidate start times for one staff member on one date.
///
/// Emits `[t, t + duration)` for `t = work_start, work_start + step, ...` while
/// the slot still ends within working hours. The duration is not rounded to the
/// step. A date the staff member does not work yields an empty sequence.
/// Output is ascending by start time.
pub fn generate_candidates(
    schedule: &StaffSchedule,
    date: NaiveDate,
    duration: Minutes,
    step: Minutes,
) -> Vec<CandidateSlot> {
    if duration == 0 || step == 0 || !schedule.works_on(date) {
        return Vec::new();
    }

    let mut slots = Vec::new();
    let mut t = schedule.work_start;
    while t + duration <= schedule.work_end {
        slots.push(CandidateSlot::new(t, t + duration));
        t += step;
    }
    slots
}
