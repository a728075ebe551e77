//! Domain model for pickup points, receptions and items.
//!
//! # Responsibility
//! - Define the canonical records shared by the repository and its callers.
//! - Own input validation that every write path re-runs before persistence.
//!
//! # Invariants
//! - Every entity is identified by a stable UUID that is never reused.
//! - Timestamps are Unix epoch milliseconds and strictly positive.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod item;
pub mod pickup_point;
pub mod reception;

/// Rejected input. Raised before any row is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// City is not in the allow-list.
    CityNotAllowed(String),
    /// Item category text does not name a known category.
    UnknownCategory(String),
    /// Timestamp must be a positive epoch-millisecond value.
    InvalidTimestamp { field: &'static str, value: i64 },
    /// New receptions must start in `OPEN` status.
    ReceptionNotOpen,
    /// Page numbers start at 1.
    InvalidPage(u32),
    /// Date filter start is after its end.
    InvalidDateRange { start: i64, end: i64 },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CityNotAllowed(city) => write!(f, "city not allowed: `{city}`"),
            Self::UnknownCategory(category) => write!(f, "unknown item category: `{category}`"),
            Self::InvalidTimestamp { field, value } => {
                write!(f, "invalid timestamp {value} in `{field}`")
            }
            Self::ReceptionNotOpen => write!(f, "new reception must have status OPEN"),
            Self::InvalidPage(page) => write!(f, "page must be >= 1, got {page}"),
            Self::InvalidDateRange { start, end } => {
                write!(f, "date range start {start} is after end {end}")
            }
        }
    }
}

impl Error for ValidationError {}

/// Current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}

pub(crate) fn ensure_timestamp(field: &'static str, value: i64) -> Result<(), ValidationError> {
    if value <= 0 {
        return Err(ValidationError::InvalidTimestamp { field, value });
    }
    Ok(())
}
