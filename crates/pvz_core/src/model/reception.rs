//! Reception model: one intake session at a pickup point.
//!
//! # Invariants
//! - A reception moves `OPEN -> CLOSED` exactly once and is never reopened.
//! - `pvz_id` never changes after creation.

use super::item::Item;
use super::pickup_point::PickupPointId;
use super::{ensure_timestamp, now_epoch_ms, ValidationError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ReceptionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceptionStatus {
    /// Accepting items.
    Open,
    /// Terminal.
    Closed,
}

impl ReceptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "OPEN" => Some(Self::Open),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reception {
    pub id: ReceptionId,
    pub pvz_id: PickupPointId,
    /// Epoch milliseconds.
    pub opened_at: i64,
    pub status: ReceptionStatus,
}

impl Reception {
    /// Starts a new open reception for `pvz_id` with a generated id.
    pub fn open(pvz_id: PickupPointId) -> Self {
        Self::with_id(Uuid::new_v4(), pvz_id, now_epoch_ms())
    }

    /// Open reception with caller-provided identity and timestamp.
    pub fn with_id(id: ReceptionId, pvz_id: PickupPointId, opened_at: i64) -> Self {
        Self {
            id,
            pvz_id,
            opened_at,
            status: ReceptionStatus::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == ReceptionStatus::Open
    }

    /// Validates a reception that is about to be inserted.
    pub fn validate_new(&self) -> Result<(), ValidationError> {
        if !self.is_open() {
            return Err(ValidationError::ReceptionNotOpen);
        }
        ensure_timestamp("opened_at", self.opened_at)
    }
}

/// Listing read model: one reception with its items, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceptionWithItems {
    pub reception: Reception,
    pub items: Vec<Item>,
}
