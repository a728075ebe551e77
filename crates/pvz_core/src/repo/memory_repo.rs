//! In-memory `PvzRepository` used as a test double for callers.
//!
//! # Invariants
//! - Same classification as the SQLite implementation for every operation.
//! - One mutex guards all state, so each operation is atomic.

use super::error::{ConflictKind, Entity, NotFoundKind, RepoError, RepoResult};
use super::pvz_repo::{PickupPointListQuery, PvzRepository};
use crate::context::RequestContext;
use crate::db::DbError;
use crate::model::item::{Item, NewItem};
use crate::model::pickup_point::{PickupPoint, PickupPointId, PickupPointWithReceptions};
use crate::model::reception::{Reception, ReceptionStatus, ReceptionWithItems};
use std::cmp::Reverse;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct MemoryState {
    points: Vec<PickupPoint>,
    receptions: Vec<Reception>,
    /// `(insertion sequence, item)`.
    items: Vec<(u64, Item)>,
    next_seq: u64,
}

impl MemoryState {
    fn open_reception_index(&self, pvz_id: PickupPointId) -> Option<usize> {
        self.receptions
            .iter()
            .position(|reception| reception.pvz_id == pvz_id && reception.is_open())
    }
}

#[derive(Default)]
pub struct InMemoryPvzRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryPvzRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, ctx: &RequestContext) -> RepoResult<MutexGuard<'_, MemoryState>> {
        if let Some(reason) = ctx.done_reason() {
            return Err(DbError::from(reason).into());
        }
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl PvzRepository for InMemoryPvzRepository {
    fn create_pickup_point(
        &self,
        ctx: &RequestContext,
        point: &PickupPoint,
    ) -> RepoResult<PickupPoint> {
        let point = point.normalized()?;
        let mut state = self.lock(ctx)?;
        if state.points.iter().any(|existing| existing.id == point.id) {
            return Err(RepoError::Conflict(ConflictKind::DuplicateId {
                entity: Entity::PickupPoint,
                id: point.id,
            }));
        }
        state.points.push(point.clone());
        Ok(point)
    }

    fn list_pickup_points(
        &self,
        ctx: &RequestContext,
        query: &PickupPointListQuery,
    ) -> RepoResult<Vec<PickupPointWithReceptions>> {
        let window = query.page_window()?;
        let state = self.lock(ctx)?;

        let mut points = state.points.clone();
        points.sort_by_key(|point| (Reverse(point.registered_at), point.id));
        let offset = usize::try_from(window.offset).unwrap_or(usize::MAX);

        Ok(points
            .into_iter()
            .skip(offset)
            .take(window.limit as usize)
            .map(|pickup_point| {
                let mut receptions: Vec<&Reception> = state
                    .receptions
                    .iter()
                    .filter(|reception| {
                        reception.pvz_id == pickup_point.id && query.includes(reception.opened_at)
                    })
                    .collect();
                receptions.sort_by_key(|reception| (Reverse(reception.opened_at), reception.id));

                let receptions = receptions
                    .into_iter()
                    .map(|reception| {
                        let mut items: Vec<&(u64, Item)> = state
                            .items
                            .iter()
                            .filter(|(_, item)| item.reception_id == reception.id)
                            .collect();
                        items.sort_by_key(|(seq, item)| Reverse((item.created_at, *seq)));
                        ReceptionWithItems {
                            reception: reception.clone(),
                            items: items.into_iter().map(|(_, item)| item.clone()).collect(),
                        }
                    })
                    .collect();

                PickupPointWithReceptions {
                    pickup_point,
                    receptions,
                }
            })
            .collect())
    }

    fn create_reception(
        &self,
        ctx: &RequestContext,
        reception: &Reception,
    ) -> RepoResult<Reception> {
        reception.validate_new()?;
        let mut state = self.lock(ctx)?;
        if !state.points.iter().any(|point| point.id == reception.pvz_id) {
            return Err(RepoError::NotFound(NotFoundKind::PickupPoint(
                reception.pvz_id,
            )));
        }
        if state.open_reception_index(reception.pvz_id).is_some() {
            return Err(RepoError::Conflict(ConflictKind::ReceptionAlreadyOpen(
                reception.pvz_id,
            )));
        }
        if state.receptions.iter().any(|existing| existing.id == reception.id) {
            return Err(RepoError::Conflict(ConflictKind::DuplicateId {
                entity: Entity::Reception,
                id: reception.id,
            }));
        }
        state.receptions.push(reception.clone());
        Ok(reception.clone())
    }

    fn add_item(
        &self,
        ctx: &RequestContext,
        pvz_id: PickupPointId,
        item: &NewItem,
    ) -> RepoResult<Item> {
        item.validate()?;
        let mut state = self.lock(ctx)?;
        let index = state
            .open_reception_index(pvz_id)
            .ok_or_else(|| RepoError::no_open_reception(pvz_id))?;
        if state.items.iter().any(|(_, existing)| existing.id == item.id) {
            return Err(RepoError::Conflict(ConflictKind::DuplicateId {
                entity: Entity::Item,
                id: item.id,
            }));
        }

        let stored = item.clone().into_item(state.receptions[index].id);
        state.next_seq += 1;
        let seq = state.next_seq;
        state.items.push((seq, stored.clone()));
        Ok(stored)
    }

    fn remove_last_item(&self, ctx: &RequestContext, pvz_id: PickupPointId) -> RepoResult<Item> {
        let mut state = self.lock(ctx)?;
        let index = state
            .open_reception_index(pvz_id)
            .ok_or_else(|| RepoError::no_open_reception(pvz_id))?;
        let reception_id = state.receptions[index].id;

        let last = state
            .items
            .iter()
            .enumerate()
            .filter(|(_, (_, item))| item.reception_id == reception_id)
            .max_by_key(|(_, (seq, item))| (item.created_at, *seq))
            .map(|(position, _)| position)
            .ok_or(RepoError::NotFound(NotFoundKind::NoItemsToRemove(
                reception_id,
            )))?;
        Ok(state.items.remove(last).1)
    }

    fn close_reception(
        &self,
        ctx: &RequestContext,
        pvz_id: PickupPointId,
    ) -> RepoResult<Reception> {
        let mut state = self.lock(ctx)?;
        let index = state
            .open_reception_index(pvz_id)
            .ok_or_else(|| RepoError::no_open_reception(pvz_id))?;
        let reception = &mut state.receptions[index];
        reception.status = ReceptionStatus::Closed;
        Ok(reception.clone())
    }

    fn open_reception(
        &self,
        ctx: &RequestContext,
        pvz_id: PickupPointId,
    ) -> RepoResult<Option<Reception>> {
        let state = self.lock(ctx)?;
        Ok(state
            .open_reception_index(pvz_id)
            .map(|index| state.receptions[index].clone()))
    }
}
