//! Item model: one product unit registered during an open reception.
//!
//! # Invariants
//! - `reception_id` is assigned by the repository and never changes.
//! - Within a reception, items are ordered by `created_at` and then by
//!   insertion order.

use super::reception::ReceptionId;
use super::{ensure_timestamp, now_epoch_ms, ValidationError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ItemId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Electronics,
    Clothes,
    Shoes,
}

impl Category {
    pub const ALL: [Category; 3] = [Self::Electronics, Self::Clothes, Self::Shoes];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Electronics => "electronics",
            Self::Clothes => "clothes",
            Self::Shoes => "shoes",
        }
    }

    /// Parses a category name, case-insensitively, also accepting the Russian
    /// names used by the intake terminals.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "electronics" | "электроника" => Some(Self::Electronics),
            "clothes" | "одежда" => Some(Self::Clothes),
            "shoes" | "обувь" => Some(Self::Shoes),
            _ => None,
        }
    }
}

/// Item as submitted by a caller, before it is attached to a reception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    pub id: ItemId,
    pub category: Category,
    /// Epoch milliseconds.
    pub created_at: i64,
}

impl NewItem {
    pub fn new(category: Category) -> Self {
        Self::with_id(Uuid::new_v4(), category, now_epoch_ms())
    }

    pub fn with_id(id: ItemId, category: Category, created_at: i64) -> Self {
        Self {
            id,
            category,
            created_at,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ensure_timestamp("created_at", self.created_at)
    }

    /// Binds this item to the reception it is stored under.
    pub fn into_item(self, reception_id: ReceptionId) -> Item {
        Item {
            id: self.id,
            reception_id,
            category: self.category,
            created_at: self.created_at,
        }
    }
}

/// Persisted item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub reception_id: ReceptionId,
    pub category: Category,
    /// Epoch milliseconds.
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::Category;

    #[test]
    fn parse_accepts_canonical_and_localized_names() {
        for category in Category::ALL {
            assert_eq!(Category::parse(category.as_str()), Some(category));
        }
        assert_eq!(Category::parse("Электроника"), Some(Category::Electronics));
        assert_eq!(Category::parse(" SHOES "), Some(Category::Shoes));
        assert_eq!(Category::parse("furniture"), None);
    }
}
