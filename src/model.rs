use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since local midnight in the salon's fixed local time. No timezone
/// conversion ever happens inside the engine.
pub type Minutes = u32;

pub const MINUTES_PER_DAY: Minutes = 24 * 60;

/// Candidate slots start every 15 minutes.
pub const SLOT_STEP_MIN: Minutes = 15;

/// Duration assumed for an existing booking that carries none.
// TODO: confirm whether this should come from the booking's service instead.
pub const DEFAULT_BOOKING_DURATION_MIN: Minutes = 30;

/// Ledger key: one staff member on one calendar date.
pub type DayKey = (Ulid, NaiveDate);

/// Half-open interval `[start, end)` of local time-of-day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    #[serde(with = "hhmm")]
    pub start: Minutes,
    #[serde(with = "hhmm")]
    pub end: Minutes,
}

impl Span {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minutes {
        self.end - self.start
    }

    /// Any non-zero intersection. Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", hhmm::format(self.start), hhmm::format(self.end))
    }
}

/// `"HH:MM"` encoding of [`Minutes`]. `24:00` is accepted as an end bound.
pub mod hhmm {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::{Minutes, MINUTES_PER_DAY};

    pub fn format(m: Minutes) -> String {
        format!("{:02}:{:02}", m / 60, m % 60)
    }

    pub fn parse(s: &str) -> Option<Minutes> {
        let (h, m) = s.trim().split_once(':')?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return None;
        }
        if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }
        let hours: Minutes = h.parse().ok()?;
        let minutes: Minutes = m.parse().ok()?;
        if minutes >= 60 {
            return None;
        }
        let total = hours * 60 + minutes;
        (total <= MINUTES_PER_DAY).then_some(total)
    }

    pub fn serialize<S: Serializer>(m: &Minutes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(*m))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Minutes, D::Error> {
        let s = String::deserialize(d)?;
        parse(&s).ok_or_else(|| de::Error::custom(format!("invalid time of day {s:?}, expected HH:MM")))
    }
}

// ── Schedule model ───────────────────────────────────────────────

/// Inclusive range of dates on which a staff member takes no bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOff {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeOff {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// A staff member's bookable-hours contract. Read-only snapshot per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffSchedule {
    pub staff_id: Ulid,
    pub working_days: Vec<Weekday>,
    #[serde(with = "hhmm")]
    pub work_start: Minutes,
    #[serde(with = "hhmm")]
    pub work_end: Minutes,
    #[serde(default, rename = "break")]
    pub break_window: Option<Span>,
    #[serde(default)]
    pub time_off: Vec<TimeOff>,
    /// Cap on occupying bookings per day.
    #[serde(default)]
    pub max_per_day: Option<u32>,
}

impl StaffSchedule {
    pub fn working_window(&self) -> Span {
        Span::new(self.work_start, self.work_end)
    }

    /// Weekday is a working day and no time-off range covers the date.
    pub fn works_on(&self, date: NaiveDate) -> bool {
        self.working_days.contains(&date.weekday())
            && !self.time_off.iter().any(|off| off.covers(date))
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.work_start >= self.work_end || self.work_end > MINUTES_PER_DAY {
            return Err("work_start must be before work_end");
        }
        if let Some(b) = &self.break_window
            && (b.start >= b.end || !self.working_window().contains_span(b))
        {
            return Err("break must lie inside working hours");
        }
        if self.time_off.iter().any(|off| off.start > off.end) {
            return Err("time off must not end before it starts");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub service_id: Ulid,
    #[serde(default)]
    pub name: Option<String>,
    pub duration_minutes: Minutes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: Ulid,
    pub name: Option<String>,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    /// Only confirmed and in-progress bookings block time. Pending holds do not.
    pub fn occupies(self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::InProgress)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::NoShow
        )
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed | Cancelled)
                | (Confirmed, InProgress | Completed | Cancelled | NoShow)
                | (InProgress, Completed | Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::InProgress => "IN_PROGRESS",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::NoShow => "NO_SHOW",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed appointment for one staff member on one date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingBooking {
    pub id: Ulid,
    pub staff_id: Ulid,
    pub date: NaiveDate,
    pub start: Minutes,
    pub duration_minutes: Option<Minutes>,
    pub status: BookingStatus,
    pub service_id: Option<Ulid>,
    pub label: Option<String>,
}

impl ExistingBooking {
    pub fn span(&self) -> Span {
        let duration = self
            .duration_minutes
            .filter(|d| *d > 0)
            .unwrap_or(DEFAULT_BOOKING_DURATION_MIN);
        Span::new(self.start, self.start + duration)
    }

    pub fn day_key(&self) -> DayKey {
        (self.staff_id, self.date)
    }
}

/// Row handed to the booking store by the conflict guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub staff_id: Ulid,
    pub date: NaiveDate,
    pub start: Minutes,
    pub duration_minutes: Minutes,
    pub status: BookingStatus,
    pub service_id: Option<Ulid>,
    pub label: Option<String>,
}

impl NewBooking {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.start + self.duration_minutes)
    }
}

// ── Availability results ─────────────────────────────────────────

/// Computed, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSlot {
    pub start: Minutes,
    pub end: Minutes,
    pub available: bool,
}

impl CandidateSlot {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        Self {
            start,
            end,
            available: true,
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffAvailability {
    pub staff_id: Ulid,
    pub date: NaiveDate,
    pub available: bool,
    pub slots: Vec<CandidateSlot>,
}

impl StaffAvailability {
    pub fn new(staff_id: Ulid, date: NaiveDate, slots: Vec<CandidateSlot>) -> Self {
        Self {
            staff_id,
            date,
            available: !slots.is_empty(),
            slots,
        }
    }
}

/// One start-time bucket of an any-staff query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedSlot {
    pub start: Minutes,
    pub end: Minutes,
    pub available: bool,
    pub available_staff: Vec<StaffMember>,
}

impl AggregatedSlot {
    pub fn available_staff_ids(&self) -> Vec<Ulid> {
        self.available_staff.iter().map(|m| m.id).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnyStaffAvailability {
    pub date: NaiveDate,
    pub available: bool,
    pub slots: Vec<AggregatedSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Single(StaffAvailability),
    Any(AnyStaffAvailability),
}

/// Who a query or booking targets: one staff member or whoever is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StaffSelector {
    Single(Ulid),
    Any,
}

impl FromStr for StaffSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("any") {
            return Ok(StaffSelector::Any);
        }
        Ulid::from_string(s)
            .map(StaffSelector::Single)
            .map_err(|e| format!("invalid staff id {s:?}: {e}"))
    }
}

impl TryFrom<String> for StaffSelector {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<StaffSelector> for String {
    fn from(sel: StaffSelector) -> Self {
        match sel {
            StaffSelector::Single(id) => id.to_string(),
            StaffSelector::Any => "any".to_string(),
        }
    }
}

/// Ledger record types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated { booking: ExistingBooking },
    StatusChanged { id: Ulid, status: BookingStatus },
}
