mod availability;
mod conflict;
mod error;
mod guard;
mod slots;

pub use availability::merge_by_start;
pub use conflict::{filter_conflicts, occupying_spans};
pub use error::EngineError;
pub use guard::{BookingPhase, BookingRequest};
pub use slots::generate_candidates;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::directory::StaffDirectory;
use crate::limits::*;
use crate::model::*;
use crate::store::BookingStore;

pub type DayLock = Arc<Mutex<()>>;

pub struct Engine {
    directory: Arc<dyn StaffDirectory>,
    store: Arc<dyn BookingStore>,
    /// One mutex per `(staff, date)`; the booking guard's serialization point.
    day_locks: DashMap<DayKey, DayLock>,
    booking_timeout: Duration,
}

impl Engine {
    pub fn new(
        directory: Arc<dyn StaffDirectory>,
        store: Arc<dyn BookingStore>,
        booking_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            store,
            day_locks: DashMap::new(),
            booking_timeout,
        }
    }

    pub(super) fn day_lock(&self, key: DayKey) -> DayLock {
        self.day_locks.entry(key).or_default().value().clone()
    }

    /// Drop day locks nobody is holding or waiting on.
    pub fn release_idle_locks(&self) -> usize {
        let before = self.day_locks.len();
        self.day_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.day_locks.len()
    }

    pub fn day_lock_count(&self) -> usize {
        self.day_locks.len()
    }

    /// Service duration, validated. Missing service → `NotFound`.
    pub(super) async fn service_duration(&self, service_id: Ulid) -> Result<Minutes, EngineError> {
        let duration = self
            .directory
            .service_duration(service_id)
            .await?
            .ok_or(EngineError::NotFound(service_id))?;
        if duration == 0 || duration > MAX_SERVICE_DURATION_MIN {
            return Err(EngineError::InvalidInput(format!(
                "service {service_id} has unusable duration {duration}"
            )));
        }
        Ok(duration)
    }

    /// Staff schedule for the date. Missing staff member → `NotFound`.
    pub(super) async fn schedule_for(
        &self,
        staff_id: Ulid,
        date: NaiveDate,
    ) -> Result<StaffSchedule, EngineError> {
        self.directory
            .staff_schedule(staff_id, date)
            .await?
            .ok_or(EngineError::NotFound(staff_id))
    }
}
