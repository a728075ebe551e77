use pvz_core::db::ConnectionPool;
use pvz_core::{
    ConflictKind, NotFoundKind, PickupPoint, PickupPointListQuery, PreconditionKind,
    PvzRepository, Reception, ReceptionStatus, RepoError, RequestContext, SqlitePvzRepository,
    Telemetry,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const BASE_MS: i64 = 1_700_000_000_000;

fn setup() -> SqlitePvzRepository {
    let pool = ConnectionPool::in_memory(Duration::from_secs(1)).unwrap();
    SqlitePvzRepository::try_new(pool, Arc::new(Telemetry::new())).unwrap()
}

fn ctx() -> RequestContext {
    RequestContext::background()
}

fn register(repo: &SqlitePvzRepository) -> PickupPoint {
    let point = PickupPoint::with_id(Uuid::new_v4(), "Moscow", BASE_MS);
    repo.create_pickup_point(&ctx(), &point).unwrap()
}

#[test]
fn create_reception_opens_and_is_visible_as_open() {
    let repo = setup();
    let point = register(&repo);

    let reception = Reception::with_id(Uuid::new_v4(), point.id, BASE_MS + 1);
    let created = repo.create_reception(&ctx(), &reception).unwrap();
    assert_eq!(created.status, ReceptionStatus::Open);
    assert_eq!(created.pvz_id, point.id);

    let open = repo.open_reception(&ctx(), point.id).unwrap();
    assert_eq!(open, Some(created));
}

#[test]
fn second_open_reception_is_a_conflict() {
    let repo = setup();
    let point = register(&repo);
    repo.create_reception(&ctx(), &Reception::open(point.id))
        .unwrap();

    let err = repo
        .create_reception(&ctx(), &Reception::open(point.id))
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Conflict(ConflictKind::ReceptionAlreadyOpen(id)) if id == point.id
    ));
    assert_eq!(
        err.to_string(),
        format!("there is already an open reception for pickup point {}", point.id)
    );
}

#[test]
fn reception_for_unknown_pickup_point_is_not_found() {
    let repo = setup();
    let ghost = Uuid::new_v4();

    let err = repo
        .create_reception(&ctx(), &Reception::open(ghost))
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::NotFound(NotFoundKind::PickupPoint(id)) if id == ghost
    ));
}

#[test]
fn close_reception_is_terminal_and_allows_a_new_one() {
    let repo = setup();
    let point = register(&repo);
    let first = repo
        .create_reception(&ctx(), &Reception::with_id(Uuid::new_v4(), point.id, BASE_MS + 1))
        .unwrap();

    let closed = repo.close_reception(&ctx(), point.id).unwrap();
    assert_eq!(closed.id, first.id);
    assert_eq!(closed.status, ReceptionStatus::Closed);
    assert_eq!(repo.open_reception(&ctx(), point.id).unwrap(), None);

    let err = repo.close_reception(&ctx(), point.id).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Precondition(PreconditionKind::NoOpenReception(id)) if id == point.id
    ));

    let second = repo
        .create_reception(&ctx(), &Reception::with_id(Uuid::new_v4(), point.id, BASE_MS + 2))
        .unwrap();
    assert_eq!(
        repo.open_reception(&ctx(), point.id).unwrap().map(|r| r.id),
        Some(second.id)
    );

    let listed = repo
        .list_pickup_points(&ctx(), &PickupPointListQuery::default())
        .unwrap();
    let statuses: Vec<ReceptionStatus> = listed[0]
        .receptions
        .iter()
        .map(|entry| entry.reception.status)
        .collect();
    assert_eq!(statuses, vec![ReceptionStatus::Open, ReceptionStatus::Closed]);
}

#[test]
fn close_without_any_reception_is_a_precondition_failure() {
    let repo = setup();
    let point = register(&repo);

    let err = repo.close_reception(&ctx(), point.id).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Precondition(PreconditionKind::NoOpenReception(_))
    ));
}

#[test]
fn open_reception_is_none_for_unknown_pickup_point() {
    let repo = setup();
    assert_eq!(repo.open_reception(&ctx(), Uuid::new_v4()).unwrap(), None);
}

#[test]
fn duplicate_reception_id_is_a_conflict() {
    let repo = setup();
    let first_point = register(&repo);
    let second_point = register(&repo);
    let reception = Reception::open(first_point.id);
    repo.create_reception(&ctx(), &reception).unwrap();

    let reused = Reception::with_id(reception.id, second_point.id, BASE_MS + 5);
    let err = repo.create_reception(&ctx(), &reused).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Conflict(ConflictKind::DuplicateId { id, .. }) if id == reception.id
    ));
}
