use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Spans of the bookings that block time, sorted by start.
pub fn occupying_spans(bookings: &[ExistingBooking]) -> Vec<Span> {
    let mut spans: Vec<Span> = bookings
        .iter()
        .filter(|b| b.status.occupies())
        .map(ExistingBooking::span)
        .collect();
    spans.sort_by_key(|s| s.start);
    spans
}

/// Drop candidates that intersect the break or any occupying span.
///
/// `occupied` must be sorted by start. Order of the surviving candidates is
/// preserved. Touching endpoints are not conflicts.
pub fn filter_conflicts(
    candidates: Vec<CandidateSlot>,
    break_window: Option<&Span>,
    occupied: &[Span],
) -> Vec<CandidateSlot> {
    candidates
        .into_iter()
        .filter(|c| {
            let span = c.span();
            if break_window.is_some_and(|b| b.overlaps(&span)) {
                return false;
            }
            // Everything at index >= right_bound starts at or after span.end.
            let right_bound = occupied.partition_point(|o| o.start < span.end);
            !occupied[..right_bound].iter().any(|o| o.end > span.start)
        })
        .collect()
}

/// True when the daily appointment cap leaves no room for another booking.
pub(crate) fn at_daily_cap(schedule: &StaffSchedule, bookings: &[ExistingBooking]) -> bool {
    schedule.max_per_day.is_some_and(|cap| {
        bookings.iter().filter(|b| b.status.occupies()).count() >= cap as usize
    })
}

/// The requested interval must sit on a working day, inside working hours,
/// and clear of the break.
pub(crate) fn check_schedule(
    schedule: &StaffSchedule,
    date: NaiveDate,
    span: &Span,
) -> Result<(), EngineError> {
    let bookable = schedule.works_on(date)
        && schedule.working_window().contains_span(span)
        && !schedule.break_window.is_some_and(|b| b.overlaps(span));
    if bookable {
        Ok(())
    } else {
        Err(EngineError::SlotUnavailable {
            staff_id: schedule.staff_id,
            span: *span,
            conflict: None,
        })
    }
}

pub(crate) fn check_capacity(
    schedule: &StaffSchedule,
    bookings: &[ExistingBooking],
) -> Result<(), EngineError> {
    match schedule.max_per_day {
        Some(cap) if at_daily_cap(schedule, bookings) => Err(EngineError::CapacityExceeded(cap)),
        _ => Ok(()),
    }
}

pub(crate) fn check_no_conflict(
    staff_id: Ulid,
    span: &Span,
    bookings: &[ExistingBooking],
) -> Result<(), EngineError> {
    let hit = bookings
        .iter()
        .filter(|b| b.status.occupies())
        .find(|b| b.span().overlaps(span));
    match hit {
        Some(b) => Err(EngineError::SlotUnavailable {
            staff_id,
            span: *span,
            conflict: Some(b.id),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Weekday;

    use super::super::slots::generate_candidates;
    use super::*;

    const H: Minutes = 60;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn schedule() -> StaffSchedule {
        StaffSchedule {
            staff_id: Ulid::new(),
            working_days: vec![Weekday::Mon],
            work_start: 9 * H,
            work_end: 17 * H,
            break_window: Some(Span::new(12 * H, 13 * H)),
            time_off: vec![],
            max_per_day: None,
        }
    }

    fn booking(start: Minutes, duration: Option<Minutes>, status: BookingStatus) -> ExistingBooking {
        ExistingBooking {
            id: Ulid::new(),
            staff_id: Ulid::new(),
            date: monday(),
            start,
            duration_minutes: duration,
            status,
            service_id: None,
            label: None,
        }
    }

    fn starts(slots: &[CandidateSlot]) -> Vec<String> {
        slots.iter().map(|s| hhmm::format(s.start)).collect()
    }

    #[test]
    fn salon_day_with_break_and_booking() {
        let s = schedule();
        let bookings = vec![booking(10 * H, Some(30), BookingStatus::Confirmed)];
        let candidates = generate_candidates(&s, monday(), 45, SLOT_STEP_MIN);
        let kept = filter_conflicts(
            candidates,
            s.break_window.as_ref(),
            &occupying_spans(&bookings),
        );
        let kept = starts(&kept);

        for rejected in ["09:45", "10:00", "11:45", "12:00", "12:15", "12:30", "12:45"] {
            assert!(!kept.contains(&rejected.to_string()), "{rejected} should be rejected");
        }
        for retained in ["09:00", "09:15", "10:30", "11:00", "13:00", "16:15"] {
            assert!(kept.contains(&retained.to_string()), "{retained} should be kept");
        }
        // 09:30 ends at 10:15, overlapping the booking
        assert!(!kept.contains(&"09:30".to_string()));
        // 10:15 starts inside the booking
        assert!(!kept.contains(&"10:15".to_string()));
        // 11:15 ends at 12:00, exactly at break start
        assert!(kept.contains(&"11:15".to_string()));
    }

    #[test]
    fn back_to_back_with_booking_is_kept() {
        let occupied = vec![Span::new(10 * H, 10 * H + 30)];
        let candidates = vec![
            CandidateSlot::new(9 * H, 10 * H),
            CandidateSlot::new(10 * H + 30, 11 * H),
        ];
        let kept = filter_conflicts(candidates.clone(), None, &occupied);
        assert_eq!(kept, candidates);
    }

    #[test]
    fn candidate_containing_booking_is_rejected() {
        let occupied = vec![Span::new(10 * H, 10 * H + 15)];
        let kept = filter_conflicts(vec![CandidateSlot::new(9 * H, 11 * H)], None, &occupied);
        assert!(kept.is_empty());
    }

    #[test]
    fn candidate_inside_break_is_rejected() {
        let brk = Span::new(12 * H, 13 * H);
        let kept = filter_conflicts(
            vec![CandidateSlot::new(12 * H + 15, 12 * H + 30)],
            Some(&brk),
            &[],
        );
        assert!(kept.is_empty());
    }

    #[test]
    fn long_booking_earlier_in_list_still_blocks() {
        // Sorted by start, but the first span reaches past the second.
        let occupied = vec![Span::new(9 * H, 15 * H), Span::new(10 * H, 10 * H + 15)];
        let kept = filter_conflicts(vec![CandidateSlot::new(14 * H, 14 * H + 30)], None, &occupied);
        assert!(kept.is_empty());
    }

    #[test]
    fn cancelled_booking_does_not_block() {
        let s = schedule();
        let bookings = vec![booking(10 * H, Some(30), BookingStatus::Cancelled)];
        let candidates = generate_candidates(&s, monday(), 30, SLOT_STEP_MIN);
        let kept = filter_conflicts(candidates, s.break_window.as_ref(), &occupying_spans(&bookings));
        assert!(starts(&kept).contains(&"10:00".to_string()));
    }

    #[test]
    fn only_occupying_statuses_become_spans() {
        let bookings = vec![
            booking(9 * H, Some(30), BookingStatus::Pending),
            booking(10 * H, Some(30), BookingStatus::NoShow),
            booking(11 * H, Some(30), BookingStatus::InProgress),
            booking(14 * H, None, BookingStatus::Confirmed),
            booking(15 * H, Some(30), BookingStatus::Completed),
        ];
        assert_eq!(
            occupying_spans(&bookings),
            vec![Span::new(11 * H, 11 * H + 30), Span::new(14 * H, 14 * H + 30)]
        );
    }

    #[test]
    fn check_no_conflict_reports_colliding_booking() {
        let b = booking(10 * H, Some(30), BookingStatus::Confirmed);
        let id = b.id;
        let staff = Ulid::new();
        let err = check_no_conflict(staff, &Span::new(10 * H + 15, 11 * H), &[b]).unwrap_err();
        match err {
            EngineError::SlotUnavailable { conflict, staff_id, .. } => {
                assert_eq!(conflict, Some(id));
                assert_eq!(staff_id, staff);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn check_schedule_rejects_out_of_hours_and_break() {
        let s = schedule();
        assert!(check_schedule(&s, monday(), &Span::new(9 * H, 10 * H)).is_ok());
        assert!(check_schedule(&s, monday(), &Span::new(16 * H + 30, 17 * H + 15)).is_err());
        assert!(check_schedule(&s, monday(), &Span::new(11 * H + 30, 12 * H + 15)).is_err());
        let tuesday = monday().succ_opt().unwrap();
        assert!(check_schedule(&s, tuesday, &Span::new(9 * H, 10 * H)).is_err());
    }

    #[test]
    fn daily_cap_counts_only_occupying() {
        let mut s = schedule();
        s.max_per_day = Some(2);
        let mut bookings = vec![
            booking(9 * H, Some(30), BookingStatus::Confirmed),
            booking(10 * H, Some(30), BookingStatus::Cancelled),
        ];
        assert!(check_capacity(&s, &bookings).is_ok());
        bookings.push(booking(11 * H, Some(30), BookingStatus::InProgress));
        assert!(matches!(
            check_capacity(&s, &bookings),
            Err(EngineError::CapacityExceeded(2))
        ));
    }
}
