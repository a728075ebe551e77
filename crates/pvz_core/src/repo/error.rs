//! Repository error taxonomy.
//!
//! # Invariants
//! - Every failure is classified into exactly one `ErrorKind`.
//! - Business-rule rejections never surface as `Storage`.
//! - Missing prior state is `Precondition`/`NotFound`, never an empty success.

use crate::db::DbError;
use crate::model::pickup_point::PickupPointId;
use crate::model::reception::ReceptionId;
use crate::model::ValidationError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type RepoResult<T> = Result<T, RepoError>;

/// Flat classification callers map to transport responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Precondition,
    NotFound,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    PickupPoint,
    Reception,
    Item,
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PickupPoint => "pickup point",
            Self::Reception => "reception",
            Self::Item => "item",
        };
        f.write_str(name)
    }
}

/// Insert blocked by an invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    DuplicateId { entity: Entity, id: Uuid },
    ReceptionAlreadyOpen(PickupPointId),
}

/// Required prior state is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconditionKind {
    NoOpenReception(PickupPointId),
}

/// Referenced row is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundKind {
    PickupPoint(PickupPointId),
    NoItemsToRemove(ReceptionId),
}

#[derive(Debug)]
pub enum RepoError {
    Validation(ValidationError),
    Conflict(ConflictKind),
    Precondition(PreconditionKind),
    NotFound(NotFoundKind),
    Storage(DbError),
}

impl RepoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Precondition(_) => ErrorKind::Precondition,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Stable machine-readable code used in log events.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::Conflict(ConflictKind::DuplicateId { .. }) => "duplicate_id",
            Self::Conflict(ConflictKind::ReceptionAlreadyOpen(_)) => "reception_already_open",
            Self::Precondition(PreconditionKind::NoOpenReception(_)) => "no_open_reception",
            Self::NotFound(NotFoundKind::PickupPoint(_)) => "pickup_point_not_found",
            Self::NotFound(NotFoundKind::NoItemsToRemove(_)) => "no_items_to_remove",
            Self::Storage(DbError::DeadlineExceeded) => "deadline_exceeded",
            Self::Storage(DbError::Cancelled) => "cancelled",
            Self::Storage(_) => "storage_failed",
        }
    }

    pub(crate) fn no_open_reception(pvz_id: PickupPointId) -> Self {
        Self::Precondition(PreconditionKind::NoOpenReception(pvz_id))
    }

    pub(crate) fn invalid_data(message: impl Into<String>) -> Self {
        Self::Storage(DbError::InvalidData(message.into()))
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Conflict(ConflictKind::DuplicateId { entity, id }) => {
                write!(f, "{entity} already exists: {id}")
            }
            Self::Conflict(ConflictKind::ReceptionAlreadyOpen(pvz_id)) => {
                write!(f, "there is already an open reception for pickup point {pvz_id}")
            }
            Self::Precondition(PreconditionKind::NoOpenReception(pvz_id)) => {
                write!(f, "no active reception for pickup point {pvz_id}")
            }
            Self::NotFound(NotFoundKind::PickupPoint(pvz_id)) => {
                write!(f, "pickup point not found: {pvz_id}")
            }
            Self::NotFound(NotFoundKind::NoItemsToRemove(reception_id)) => {
                write!(f, "no items to remove in reception {reception_id}")
            }
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Storage(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(DbError::Sqlite(value))
    }
}
