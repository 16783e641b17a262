use crate::model::Minutes;

/// Longest service the engine will schedule (one full working day).
pub const MAX_SERVICE_DURATION_MIN: Minutes = 12 * 60;

pub const MAX_LABEL_LEN: usize = 256;
pub const MAX_NAME_LEN: usize = 256;

/// Occupying bookings a single staff member may hold on one date.
pub const MAX_BOOKINGS_PER_DAY: usize = 512;

/// Upper bound on concurrent per-staff resolutions inside one any-staff query.
pub const MAX_PARALLEL_RESOLVES: usize = 64;

/// Longest accepted request line on the wire, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;
