//! Pickup point (PVZ) model.
//!
//! # Invariants
//! - `city` holds a canonical allow-listed name once persisted.
//! - A pickup point is immutable after creation.

use super::reception::ReceptionWithItems;
use super::{ensure_timestamp, now_epoch_ms, ValidationError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PickupPointId = Uuid;

/// Canonical names of the cities a pickup point may be registered in.
pub const ALLOWED_CITIES: [&str; 3] = ["Moscow", "Saint Petersburg", "Kazan"];

/// Resolves a city name or one of its Russian spellings to the canonical name.
pub fn canonical_city(name: &str) -> Option<&'static str> {
    match name.trim() {
        "Moscow" | "Москва" => Some("Moscow"),
        "Saint Petersburg" | "Санкт-Петербург" => Some("Saint Petersburg"),
        "Kazan" | "Казань" => Some("Kazan"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupPoint {
    pub id: PickupPointId,
    pub city: String,
    /// Epoch milliseconds.
    pub registered_at: i64,
}

impl PickupPoint {
    /// Creates a pickup point with a generated id, registered now.
    pub fn new(city: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), city, now_epoch_ms())
    }

    /// Creates a pickup point with caller-provided identity and timestamp.
    ///
    /// Does not validate; call `validate` or `normalized` before persisting.
    pub fn with_id(id: PickupPointId, city: impl Into<String>, registered_at: i64) -> Self {
        Self {
            id,
            city: city.into(),
            registered_at,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.normalized().map(|_| ())
    }

    /// Returns a copy with the canonical city name, or the first validation
    /// failure.
    pub fn normalized(&self) -> Result<Self, ValidationError> {
        let city = canonical_city(&self.city)
            .ok_or_else(|| ValidationError::CityNotAllowed(self.city.clone()))?;
        ensure_timestamp("registered_at", self.registered_at)?;
        Ok(Self {
            id: self.id,
            city: city.to_string(),
            registered_at: self.registered_at,
        })
    }
}

/// Listing read model: one pickup point with its (filtered) receptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupPointWithReceptions {
    #[serde(rename = "pvz")]
    pub pickup_point: PickupPoint,
    /// Newest first.
    pub receptions: Vec<ReceptionWithItems>,
}

#[cfg(test)]
mod tests {
    use super::{canonical_city, PickupPoint, ALLOWED_CITIES};
    use crate::model::ValidationError;

    #[test]
    fn every_allowed_city_is_its_own_canonical_name() {
        for city in ALLOWED_CITIES {
            assert_eq!(canonical_city(city), Some(city));
        }
    }

    #[test]
    fn russian_alias_is_normalized() {
        let point = PickupPoint::new(" Казань ");
        assert_eq!(point.normalized().unwrap().city, "Kazan");
    }

    #[test]
    fn unknown_city_and_bad_timestamp_are_rejected() {
        let err = PickupPoint::new("Berlin").validate().unwrap_err();
        assert_eq!(err, ValidationError::CityNotAllowed("Berlin".to_string()));

        let point = PickupPoint::with_id(uuid::Uuid::new_v4(), "Moscow", 0);
        assert!(matches!(
            point.validate(),
            Err(ValidationError::InvalidTimestamp { field: "registered_at", .. })
        ));
    }
}
