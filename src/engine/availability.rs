use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use futures::{stream, StreamExt};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{at_daily_cap, filter_conflicts, occupying_spans};
use super::slots::generate_candidates;
use super::{Engine, EngineError};

/// Merge per-staff results into start-time buckets.
///
/// A bucket lists every staff member whose slots include that exact start,
/// ordered by their position in `roster`. Buckets come out in chronological
/// order. The result does not depend on the order of `results`.
pub fn merge_by_start(roster: &[StaffMember], results: &[StaffAvailability]) -> Vec<AggregatedSlot> {
    let rank: HashMap<Ulid, usize> = roster.iter().enumerate().map(|(i, m)| (m.id, i)).collect();

    let mut buckets: BTreeMap<Minutes, (Minutes, Vec<usize>)> = BTreeMap::new();
    for result in results {
        let Some(&idx) = rank.get(&result.staff_id) else {
            continue;
        };
        for slot in &result.slots {
            let bucket = buckets.entry(slot.start).or_insert((slot.end, Vec::new()));
            bucket.1.push(idx);
        }
    }

    buckets
        .into_iter()
        .map(|(start, (end, mut staff))| {
            staff.sort_unstable();
            staff.dedup();
            AggregatedSlot {
                start,
                end,
                available: !staff.is_empty(),
                available_staff: staff.into_iter().map(|i| roster[i].clone()).collect(),
            }
        })
        .collect()
}

impl Engine {
    /// Bookable slots for one staff member on one date.
    pub async fn resolve(
        &self,
        staff_id: Ulid,
        date: NaiveDate,
        service_id: Ulid,
    ) -> Result<StaffAvailability, EngineError> {
        let duration = self.service_duration(service_id).await?;
        self.resolve_staff(staff_id, date, duration).await
    }

    pub(super) async fn resolve_staff(
        &self,
        staff_id: Ulid,
        date: NaiveDate,
        duration: Minutes,
    ) -> Result<StaffAvailability, EngineError> {
        let schedule = self.schedule_for(staff_id, date).await?;
        if !schedule.works_on(date) {
            debug!("staff {staff_id} not working on {date}");
            return Ok(StaffAvailability::new(staff_id, date, Vec::new()));
        }

        let bookings = self.store.list_occupying(staff_id, date).await?;
        if at_daily_cap(&schedule, &bookings) {
            debug!("staff {staff_id} at daily cap on {date}");
            return Ok(StaffAvailability::new(staff_id, date, Vec::new()));
        }

        let candidates = generate_candidates(&schedule, date, duration, SLOT_STEP_MIN);
        let slots = filter_conflicts(
            candidates,
            schedule.break_window.as_ref(),
            &occupying_spans(&bookings),
        );
        Ok(StaffAvailability::new(staff_id, date, slots))
    }

    /// Bookable start times across every active staff member.
    ///
    /// Per-staff resolutions run concurrently. An active staff member with no
    /// schedule on record is skipped; any other failure fails the query.
    pub async fn resolve_any(
        &self,
        date: NaiveDate,
        service_id: Ulid,
    ) -> Result<AnyStaffAvailability, EngineError> {
        let duration = self.service_duration(service_id).await?;
        let roster = self.directory.active_staff().await?;
        let width = roster.len().clamp(1, MAX_PARALLEL_RESOLVES);

        let ids: Vec<Ulid> = roster.iter().map(|m| m.id).collect();
        let outcomes: Vec<Result<StaffAvailability, EngineError>> = stream::iter(ids)
            .map(|id| self.resolve_staff(id, date, duration))
            .buffer_unordered(width)
            .collect()
            .await;

        let mut results = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Ok(availability) => results.push(availability),
                Err(EngineError::NotFound(id)) => warn!("active staff {id} has no schedule, skipping"),
                Err(e) => return Err(e),
            }
        }

        let slots = merge_by_start(&roster, &results);
        Ok(AnyStaffAvailability {
            date,
            available: slots.iter().any(|s| s.available),
            slots,
        })
    }

    /// Dispatch on the staff selector once, at the boundary.
    pub async fn query(
        &self,
        date: NaiveDate,
        staff: StaffSelector,
        service_id: Ulid,
    ) -> Result<Availability, EngineError> {
        match staff {
            StaffSelector::Single(staff_id) => self
                .resolve(staff_id, date, service_id)
                .await
                .map(Availability::Single),
            StaffSelector::Any => self.resolve_any(date, service_id).await.map(Availability::Any),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Minutes = 60;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn member(name: &str) -> StaffMember {
        StaffMember {
            id: Ulid::new(),
            name: Some(name.into()),
        }
    }

    fn result(staff: &StaffMember, starts: &[Minutes]) -> StaffAvailability {
        StaffAvailability::new(
            staff.id,
            monday(),
            starts.iter().map(|&s| CandidateSlot::new(s, s + 30)).collect(),
        )
    }

    #[test]
    fn merge_groups_by_exact_start() {
        let a = member("A");
        let b = member("B");
        let roster = vec![a.clone(), b.clone()];
        let results = vec![
            result(&a, &[9 * H, 14 * H]),
            result(&b, &[9 * H, 10 * H]),
        ];

        let merged = merge_by_start(&roster, &results);
        let starts: Vec<_> = merged.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![9 * H, 10 * H, 14 * H]);
        assert_eq!(merged[0].available_staff_ids(), vec![a.id, b.id]);
        assert_eq!(merged[1].available_staff_ids(), vec![b.id]);
        assert_eq!(merged[2].available_staff_ids(), vec![a.id]);
        assert!(merged.iter().all(|s| s.available));
        assert_eq!(merged[2].end, 14 * H + 30);
    }

    #[test]
    fn merge_is_independent_of_completion_order() {
        let roster: Vec<_> = ["A", "B", "C", "D"].into_iter().map(member).collect();
        let results = vec![
            result(&roster[0], &[9 * H, 9 * H + 15, 11 * H]),
            result(&roster[1], &[9 * H + 15, 13 * H]),
            result(&roster[2], &[]),
            result(&roster[3], &[9 * H, 13 * H, 16 * H]),
        ];
        let expected = merge_by_start(&roster, &results);

        // Every rotation and its reverse.
        for shift in 0..results.len() {
            let mut rotated = results.clone();
            rotated.rotate_left(shift);
            assert_eq!(merge_by_start(&roster, &rotated), expected);
            rotated.reverse();
            assert_eq!(merge_by_start(&roster, &rotated), expected);
        }
    }

    #[test]
    fn merge_ignores_staff_outside_roster() {
        let a = member("A");
        let stranger = member("X");
        let merged = merge_by_start(
            std::slice::from_ref(&a),
            &[result(&stranger, &[9 * H]), result(&a, &[10 * H])],
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].start, 10 * H);
    }

    #[test]
    fn merge_of_nothing_is_empty() {
        assert!(merge_by_start(&[member("A")], &[]).is_empty());
    }
}
