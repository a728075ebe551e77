//! PVZ repository contract shared by every storage implementation.
//!
//! # Responsibility
//! - Define the operations transport handlers call.
//! - Normalize listing pagination identically for all implementations.
//!
//! # Invariants
//! - At most one `OPEN` reception exists per pickup point.
//! - Items are added to and removed from the open reception only.
//! - Item removal is LIFO by `(created_at, insertion order)`.

use super::error::RepoResult;
use crate::context::RequestContext;
use crate::model::item::{Item, NewItem};
use crate::model::pickup_point::{PickupPoint, PickupPointId, PickupPointWithReceptions};
use crate::model::reception::Reception;
use crate::model::ValidationError;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 30;

/// Listing options. The date range filters receptions, not pickup points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickupPointListQuery {
    /// Inclusive lower bound on `opened_at`, epoch ms.
    pub start: Option<i64>,
    /// Inclusive upper bound on `opened_at`, epoch ms.
    pub end: Option<i64>,
    /// 1-based page number.
    pub page: u32,
    /// Clamped to `1..=MAX_PAGE_SIZE`.
    pub page_size: u32,
}

impl Default for PickupPointListQuery {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// `LIMIT`/`OFFSET` pair derived from a validated query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub limit: u32,
    pub offset: u64,
}

impl PickupPointListQuery {
    pub fn page_window(&self) -> Result<PageWindow, ValidationError> {
        if self.page == 0 {
            return Err(ValidationError::InvalidPage(self.page));
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(ValidationError::InvalidDateRange { start, end });
            }
        }
        let limit = self.page_size.clamp(1, MAX_PAGE_SIZE);
        Ok(PageWindow {
            limit,
            offset: u64::from(self.page - 1) * u64::from(limit),
        })
    }

    /// Whether a reception opened at `opened_at` passes the date filter.
    pub fn includes(&self, opened_at: i64) -> bool {
        self.start.map_or(true, |start| opened_at >= start)
            && self.end.map_or(true, |end| opened_at <= end)
    }
}

/// Repository interface for pickup-point operations.
///
/// Every call honors the deadline and cancellation of `ctx`.
pub trait PvzRepository {
    /// Registers a pickup point. Re-validates the city allow-list.
    fn create_pickup_point(
        &self,
        ctx: &RequestContext,
        point: &PickupPoint,
    ) -> RepoResult<PickupPoint>;
    /// Lists one page of pickup points, newest first, with nested receptions
    /// and items.
    fn list_pickup_points(
        &self,
        ctx: &RequestContext,
        query: &PickupPointListQuery,
    ) -> RepoResult<Vec<PickupPointWithReceptions>>;
    /// Opens a reception; fails when one is already open.
    fn create_reception(&self, ctx: &RequestContext, reception: &Reception)
        -> RepoResult<Reception>;
    /// Adds an item to the open reception of `pvz_id`.
    fn add_item(
        &self,
        ctx: &RequestContext,
        pvz_id: PickupPointId,
        item: &NewItem,
    ) -> RepoResult<Item>;
    /// Removes and returns the most recently added item of the open reception.
    fn remove_last_item(&self, ctx: &RequestContext, pvz_id: PickupPointId) -> RepoResult<Item>;
    /// Closes the open reception of `pvz_id`.
    fn close_reception(&self, ctx: &RequestContext, pvz_id: PickupPointId)
        -> RepoResult<Reception>;
    /// Returns the open reception of `pvz_id`, if any.
    fn open_reception(
        &self,
        ctx: &RequestContext,
        pvz_id: PickupPointId,
    ) -> RepoResult<Option<Reception>>;
}
