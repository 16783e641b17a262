//! JSON-lines request and response shapes.
//!
//! Each request is one JSON object on one line, tagged by `"op"`. Each
//! response is one JSON object on one line with an `"ok"` flag.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Availability {
        date: NaiveDate,
        staff_id: StaffSelector,
        service_id: Ulid,
    },
    Book {
        staff_id: Ulid,
        date: NaiveDate,
        #[serde(with = "hhmm")]
        start_time: Minutes,
        service_id: Ulid,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        status: Option<BookingStatus>,
    },
    SetStatus {
        booking_id: Ulid,
        status: BookingStatus,
    },
    Cancel {
        booking_id: Ulid,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffView {
    pub id: Ulid,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotView {
    /// `HH:MM`
    pub time: String,
    /// `YYYY-MM-DDTHH:MM:SS`, salon local time.
    pub datetime: String,
    pub available: bool,
    #[serde(
        rename = "availableStaff",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub available_staff: Option<Vec<StaffView>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorView {
    pub kind: String,
    pub status: u16,
    pub retryable: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Availability {
        ok: bool,
        available: bool,
        slots: Vec<SlotView>,
    },
    Booking {
        ok: bool,
        booking_id: Ulid,
        status: BookingStatus,
    },
    Error {
        ok: bool,
        error: ErrorView,
    },
}

fn datetime(date: NaiveDate, minutes: Minutes) -> String {
    format!("{}T{}:00", date.format("%Y-%m-%d"), hhmm::format(minutes))
}

impl Response {
    pub fn availability(result: &Availability) -> Self {
        match result {
            Availability::Single(a) => Response::Availability {
                ok: true,
                available: a.available,
                slots: a
                    .slots
                    .iter()
                    .map(|s| SlotView {
                        time: hhmm::format(s.start),
                        datetime: datetime(a.date, s.start),
                        available: s.available,
                        available_staff: None,
                    })
                    .collect(),
            },
            Availability::Any(a) => Response::Availability {
                ok: true,
                available: a.available,
                slots: a
                    .slots
                    .iter()
                    .map(|s| SlotView {
                        time: hhmm::format(s.start),
                        datetime: datetime(a.date, s.start),
                        available: s.available,
                        available_staff: Some(
                            s.available_staff
                                .iter()
                                .map(|m| StaffView {
                                    id: m.id,
                                    name: m.name.clone(),
                                })
                                .collect(),
                        ),
                    })
                    .collect(),
            },
        }
    }

    pub fn booking(booking_id: Ulid, status: BookingStatus) -> Self {
        Response::Booking {
            ok: true,
            booking_id,
            status,
        }
    }

    pub fn error(err: &EngineError) -> Self {
        Response::Error {
            ok: false,
            error: ErrorView {
                kind: err.kind().into(),
                status: err.status_code(),
                retryable: err.is_retryable(),
                message: err.to_string(),
            },
        }
    }

    /// Request line that could not be decoded.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Response::Error {
            ok: false,
            error: ErrorView {
                kind: "bad_request".into(),
                status: 400,
                retryable: false,
                message: message.into(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        match self {
            Response::Availability { ok, .. }
            | Response::Booking { ok, .. }
            | Response::Error { ok, .. } => *ok,
        }
    }

    pub fn status_label(&self) -> &'static str {
        if self.is_ok() { "ok" } else { "error" }
    }
}
