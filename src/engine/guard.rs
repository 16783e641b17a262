use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::store::BookingStore;

use super::conflict::{check_capacity, check_no_conflict, check_schedule};
use super::{Engine, EngineError};

/// Lifecycle of one booking-creation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingPhase {
    Requested,
    Validating,
    Committed,
    Rejected,
}

impl BookingPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingPhase::Requested => "requested",
            BookingPhase::Validating => "validating",
            BookingPhase::Committed => "committed",
            BookingPhase::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub staff_id: Ulid,
    pub date: NaiveDate,
    pub start: Minutes,
    pub service_id: Ulid,
    pub label: Option<String>,
    /// `Confirmed` (default) or `Pending`. Pending requests do not reserve time.
    pub status: BookingStatus,
}

impl BookingRequest {
    pub fn new(staff_id: Ulid, date: NaiveDate, start: Minutes, service_id: Ulid) -> Self {
        Self {
            staff_id,
            date,
            start,
            service_id,
            label: None,
            status: BookingStatus::Confirmed,
        }
    }
}

/// Check-then-insert. Caller holds the day lock for `(booking.staff_id, booking.date)`.
async fn validate_and_insert(
    store: &dyn BookingStore,
    schedule: &StaffSchedule,
    booking: NewBooking,
) -> Result<Ulid, EngineError> {
    let span = booking.span();
    check_schedule(schedule, booking.date, &span)?;
    if booking.status.occupies() {
        let existing = store.list_occupying(booking.staff_id, booking.date).await?;
        if existing.len() >= MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::CapacityExceeded(MAX_BOOKINGS_PER_DAY as u32));
        }
        check_capacity(schedule, &existing)?;
        check_no_conflict(booking.staff_id, &span, &existing)?;
    }
    store.insert(booking).await
}

/// Re-check and apply a status change. Caller holds the booking's day lock.
async fn validate_and_transition(
    store: &dyn BookingStore,
    schedule: Option<&StaffSchedule>,
    id: Ulid,
    next: BookingStatus,
) -> Result<ExistingBooking, EngineError> {
    // Re-read under the lock: a concurrent transition may have won.
    let mut booking = store.get(id).await?.ok_or(EngineError::NotFound(id))?;
    if booking.status == next {
        return Ok(booking);
    }
    if !booking.status.can_transition_to(next) {
        return Err(EngineError::InvalidInput(format!(
            "booking {id} cannot move from {} to {next}",
            booking.status
        )));
    }
    if next.occupies() && !booking.status.occupies() {
        let existing = store.list_occupying(booking.staff_id, booking.date).await?;
        if let Some(schedule) = schedule {
            check_capacity(schedule, &existing)?;
        }
        check_no_conflict(booking.staff_id, &booking.span(), &existing)?;
    }
    store.set_status(id, next).await?;
    booking.status = next;
    Ok(booking)
}

impl Engine {
    /// Book a slot. The availability check and the insert run as one unit with
    /// respect to every other booking for the same staff member and date.
    pub async fn create_booking(&self, req: BookingRequest) -> Result<Ulid, EngineError> {
        let mut phase = BookingPhase::Requested;
        debug!(
            "booking {}: staff {} on {} at {}",
            phase.as_str(),
            req.staff_id,
            req.date,
            hhmm::format(req.start)
        );

        if !matches!(req.status, BookingStatus::Confirmed | BookingStatus::Pending) {
            return Err(EngineError::InvalidInput(format!(
                "new bookings must be CONFIRMED or PENDING, got {}",
                req.status
            )));
        }
        if req.label.as_ref().is_some_and(|l| l.len() > MAX_LABEL_LEN) {
            return Err(EngineError::InvalidInput("label too long".into()));
        }
        if req.start >= MINUTES_PER_DAY {
            return Err(EngineError::InvalidInput("start time out of range".into()));
        }

        let duration = self.service_duration(req.service_id).await?;
        let schedule = self.schedule_for(req.staff_id, req.date).await?;
        let booking = NewBooking {
            staff_id: req.staff_id,
            date: req.date,
            start: req.start,
            duration_minutes: duration,
            status: req.status,
            service_id: Some(req.service_id),
            label: req.label,
        };
        let span = booking.span();

        let lock = self.day_lock((req.staff_id, req.date));
        let held = tokio::time::timeout(self.booking_timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                warn!("booking lock timeout: staff {} on {}", req.staff_id, req.date);
                metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => "timeout")
                    .increment(1);
                EngineError::Timeout
            })?;

        // From here on the check and write must not be torn apart by caller
        // cancellation, so they run to completion on their own task.
        phase = BookingPhase::Validating;
        debug!("booking {}: {span}", phase.as_str());
        let store = Arc::clone(&self.store);
        let outcome = tokio::spawn(async move {
            let _held = held;
            validate_and_insert(store.as_ref(), &schedule, booking).await
        })
        .await
        .map_err(|e| EngineError::Persistence(format!("booking task failed: {e}")))?;

        match &outcome {
            Ok(id) => {
                phase = BookingPhase::Committed;
                info!(
                    "booking {} {}: staff {} on {} {span}",
                    id,
                    phase.as_str(),
                    req.staff_id,
                    req.date
                );
                metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => "committed")
                    .increment(1);
            }
            Err(e) => {
                phase = BookingPhase::Rejected;
                info!(
                    "booking {}: staff {} on {} {span}: {e}",
                    phase.as_str(),
                    req.staff_id,
                    req.date
                );
                metrics::counter!(crate::observability::BOOKINGS_TOTAL, "outcome" => e.kind())
                    .increment(1);
            }
        }
        outcome
    }

    /// Move a booking through its lifecycle. Entering an occupying status from
    /// a non-occupying one goes through the same conflict check as a new booking.
    pub async fn set_status(
        &self,
        id: Ulid,
        next: BookingStatus,
    ) -> Result<ExistingBooking, EngineError> {
        let current = self.store.get(id).await?.ok_or(EngineError::NotFound(id))?;
        let schedule = if next.occupies() && !current.status.occupies() {
            Some(self.schedule_for(current.staff_id, current.date).await?)
        } else {
            None
        };

        let lock = self.day_lock(current.day_key());
        let held = tokio::time::timeout(self.booking_timeout, lock.lock_owned())
            .await
            .map_err(|_| EngineError::Timeout)?;

        let store = Arc::clone(&self.store);
        let updated = tokio::spawn(async move {
            let _held = held;
            validate_and_transition(store.as_ref(), schedule.as_ref(), id, next).await
        })
        .await
        .map_err(|e| EngineError::Persistence(format!("status task failed: {e}")))??;

        info!("booking {id} now {}", updated.status);
        Ok(updated)
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<ExistingBooking, EngineError> {
        self.set_status(id, BookingStatus::Cancelled).await
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<ExistingBooking, EngineError> {
        self.store.get(id).await?.ok_or(EngineError::NotFound(id))
    }
}
