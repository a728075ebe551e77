//! Pickup-point use-case service.
//!
//! # Responsibility
//! - Turn raw caller input (city names, category text, optional paging) into
//!   validated domain values with fresh ids and timestamps.
//! - Delegate every state change to a `PvzRepository`.
//!
//! # Invariants
//! - Service APIs never bypass repository invariants.
//! - Service layer remains storage-agnostic.
//! - With a call timeout set, each repository call runs under a child of the
//!   caller's context, so caller cancellation still reaches it.

use crate::context::RequestContext;
use crate::model::item::{Category, Item, NewItem};
use crate::model::pickup_point::{
    canonical_city, PickupPoint, PickupPointId, PickupPointWithReceptions,
};
use crate::model::reception::Reception;
use crate::repo::error::{ErrorKind, RepoError};
use crate::repo::pvz_repo::{PickupPointListQuery, PvzRepository, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(Debug)]
pub enum ServiceError {
    /// City is blank or outside the allow-list.
    InvalidCity(String),
    /// Category text names no known category.
    InvalidCategory(String),
    Repo(RepoError),
}

impl ServiceError {
    /// Classification shared with repository errors; input errors count as
    /// validation failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCity(_) | Self::InvalidCategory(_) => ErrorKind::Validation,
            Self::Repo(err) => err.kind(),
        }
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCity(city) if city.trim().is_empty() => write!(f, "city is required"),
            Self::InvalidCity(city) => write!(f, "city not allowed: `{city}`"),
            Self::InvalidCategory(category) => write!(f, "unknown item category: `{category}`"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Raw listing request as it arrives from a transport handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// Pickup-point service facade.
pub struct PvzService<R: PvzRepository> {
    repo: R,
    default_page_size: u32,
    call_timeout: Option<Duration>,
}

impl<R: PvzRepository> PvzService<R> {
    pub fn new(repo: R) -> Self {
        Self::with_default_page_size(repo, DEFAULT_PAGE_SIZE)
    }

    pub fn with_default_page_size(repo: R, default_page_size: u32) -> Self {
        Self {
            repo,
            default_page_size: default_page_size.clamp(1, MAX_PAGE_SIZE),
            call_timeout: None,
        }
    }

    /// Bounds every repository call to `timeout`, or less when the caller's
    /// deadline is sooner.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    fn call_context(&self, ctx: &RequestContext) -> RequestContext {
        match self.call_timeout {
            Some(timeout) => ctx.child_with_timeout(timeout),
            None => ctx.clone(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Registers a pickup point in `city`, generating its id and timestamp.
    pub fn register_pickup_point(
        &self,
        ctx: &RequestContext,
        city: &str,
    ) -> ServiceResult<PickupPoint> {
        let city = canonical_city(city).ok_or_else(|| ServiceError::InvalidCity(city.to_string()))?;
        Ok(self.repo.create_pickup_point(&self.call_context(ctx), &PickupPoint::new(city))?)
    }

    /// Lists pickup points.
    ///
    /// Missing or zero paging values fall back to page 1 and the default page
    /// size; oversized pages are capped.
    pub fn list_pickup_points(
        &self,
        ctx: &RequestContext,
        request: &ListRequest,
    ) -> ServiceResult<Vec<PickupPointWithReceptions>> {
        let query = PickupPointListQuery {
            start: request.start,
            end: request.end,
            page: request.page.filter(|page| *page > 0).unwrap_or(1),
            page_size: request
                .page_size
                .filter(|size| *size > 0)
                .unwrap_or(self.default_page_size),
        };
        Ok(self.repo.list_pickup_points(&self.call_context(ctx), &query)?)
    }

    /// Opens a new reception at `pvz_id`.
    pub fn start_reception(
        &self,
        ctx: &RequestContext,
        pvz_id: PickupPointId,
    ) -> ServiceResult<Reception> {
        Ok(self.repo.create_reception(&self.call_context(ctx), &Reception::open(pvz_id))?)
    }

    /// Adds an item of `category` to the open reception at `pvz_id`.
    pub fn add_item(
        &self,
        ctx: &RequestContext,
        pvz_id: PickupPointId,
        category: &str,
    ) -> ServiceResult<Item> {
        let category = Category::parse(category)
            .ok_or_else(|| ServiceError::InvalidCategory(category.to_string()))?;
        Ok(self.repo.add_item(&self.call_context(ctx), pvz_id, &NewItem::new(category))?)
    }

    pub fn remove_last_item(
        &self,
        ctx: &RequestContext,
        pvz_id: PickupPointId,
    ) -> ServiceResult<Item> {
        Ok(self.repo.remove_last_item(&self.call_context(ctx), pvz_id)?)
    }

    pub fn close_reception(
        &self,
        ctx: &RequestContext,
        pvz_id: PickupPointId,
    ) -> ServiceResult<Reception> {
        Ok(self.repo.close_reception(&self.call_context(ctx), pvz_id)?)
    }

    pub fn open_reception(
        &self,
        ctx: &RequestContext,
        pvz_id: PickupPointId,
    ) -> ServiceResult<Option<Reception>> {
        Ok(self.repo.open_reception(&self.call_context(ctx), pvz_id)?)
    }
}
