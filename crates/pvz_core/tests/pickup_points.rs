use pvz_core::db::ConnectionPool;
use pvz_core::{
    ConflictKind, Entity, InMemoryPvzRepository, PickupPoint, PickupPointListQuery, PvzRepository, Reception, RepoError,
    RequestContext, SqlitePvzRepository, Telemetry, ValidationError,
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

#[test]
fn create_pickup_point_round_trips_through_listing() {
    let repo = setup();
    let point = PickupPoint::with_id(Uuid::new_v4(), "Moscow", BASE_MS);

    let created = repo.create_pickup_point(&ctx(), &point).unwrap();
    assert_eq!(created, point);

    let page = repo
        .list_pickup_points(&ctx(), &PickupPointListQuery::default())
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].pickup_point, point);
    assert!(page[0].receptions.is_empty());
}

#[test]
fn russian_city_name_is_stored_canonically() {
    let repo = setup();
    let point = PickupPoint::with_id(Uuid::new_v4(), "Казань", BASE_MS);

    let created = repo.create_pickup_point(&ctx(), &point).unwrap();
    assert_eq!(created.city, "Kazan");
}

#[test]
fn city_outside_allow_list_is_rejected_without_writing() {
    let repo = setup();
    let point = PickupPoint::with_id(Uuid::new_v4(), "Novosibirsk", BASE_MS);

    let err = repo.create_pickup_point(&ctx(), &point).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::CityNotAllowed(ref city)) if city == "Novosibirsk"
    ));

    let page = repo
        .list_pickup_points(&ctx(), &PickupPointListQuery::default())
        .unwrap();
    assert!(page.is_empty());
}

#[test]
fn duplicate_pickup_point_id_is_a_conflict() {
    let repo = setup();
    let point = PickupPoint::with_id(Uuid::new_v4(), "Moscow", BASE_MS);
    repo.create_pickup_point(&ctx(), &point).unwrap();

    let again = PickupPoint::with_id(point.id, "Kazan", BASE_MS + 1);
    let err = repo.create_pickup_point(&ctx(), &again).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Conflict(ConflictKind::DuplicateId {
            entity: Entity::PickupPoint,
            id
        }) if id == point.id
    ));
}

#[test]
fn listing_is_newest_first_and_paginated() {
    let repo = setup();
    let mut ids = Vec::new();
    for offset in 0..5 {
        let point = PickupPoint::with_id(Uuid::new_v4(), "Saint Petersburg", BASE_MS + offset);
        repo.create_pickup_point(&ctx(), &point).unwrap();
        ids.push(point.id);
    }
    ids.reverse();

    let first = repo
        .list_pickup_points(
            &ctx(),
            &PickupPointListQuery {
                page: 1,
                page_size: 2,
                ..PickupPointListQuery::default()
            },
        )
        .unwrap();
    let third = repo
        .list_pickup_points(
            &ctx(),
            &PickupPointListQuery {
                page: 3,
                page_size: 2,
                ..PickupPointListQuery::default()
            },
        )
        .unwrap();
    let beyond = repo
        .list_pickup_points(
            &ctx(),
            &PickupPointListQuery {
                page: 4,
                page_size: 2,
                ..PickupPointListQuery::default()
            },
        )
        .unwrap();

    let first_ids: Vec<Uuid> = first.iter().map(|entry| entry.pickup_point.id).collect();
    assert_eq!(first_ids, ids[0..2].to_vec());
    assert_eq!(third.len(), 1);
    assert_eq!(third[0].pickup_point.id, ids[4]);
    assert!(beyond.is_empty());
}

#[test]
fn page_zero_is_rejected() {
    let repo = setup();
    let err = repo
        .list_pickup_points(
            &ctx(),
            &PickupPointListQuery {
                page: 0,
                ..PickupPointListQuery::default()
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::InvalidPage(0))
    ));
}

#[test]
fn date_range_filters_receptions_but_keeps_pickup_points() {
    let repo = setup();
    let busy = PickupPoint::with_id(Uuid::new_v4(), "Moscow", BASE_MS);
    let idle = PickupPoint::with_id(Uuid::new_v4(), "Kazan", BASE_MS + 1);
    repo.create_pickup_point(&ctx(), &busy).unwrap();
    repo.create_pickup_point(&ctx(), &idle).unwrap();

    let old = Reception::with_id(Uuid::new_v4(), busy.id, BASE_MS + 100);
    repo.create_reception(&ctx(), &old).unwrap();
    repo.close_reception(&ctx(), busy.id).unwrap();
    let recent = Reception::with_id(Uuid::new_v4(), busy.id, BASE_MS + 500);
    repo.create_reception(&ctx(), &recent).unwrap();

    let all = repo
        .list_pickup_points(&ctx(), &PickupPointListQuery::default())
        .unwrap();
    let busy_entry = all
        .iter()
        .find(|entry| entry.pickup_point.id == busy.id)
        .unwrap();
    let reception_ids: Vec<Uuid> = busy_entry
        .receptions
        .iter()
        .map(|entry| entry.reception.id)
        .collect();
    assert_eq!(reception_ids, vec![recent.id, old.id]);

    let filtered = repo
        .list_pickup_points(
            &ctx(),
            &PickupPointListQuery {
                start: Some(BASE_MS + 200),
                end: Some(BASE_MS + 500),
                ..PickupPointListQuery::default()
            },
        )
        .unwrap();
    assert_eq!(filtered.len(), 2);
    let busy_entry = filtered
        .iter()
        .find(|entry| entry.pickup_point.id == busy.id)
        .unwrap();
    assert_eq!(busy_entry.receptions.len(), 1);
    assert_eq!(busy_entry.receptions[0].reception.id, recent.id);
    let idle_entry = filtered
        .iter()
        .find(|entry| entry.pickup_point.id == idle.id)
        .unwrap();
    assert!(idle_entry.receptions.is_empty());
}

fn reception_ids_in_range(repo: &dyn PvzRepository, start: i64, end: Option<i64>) -> Vec<Uuid> {
    let query = PickupPointListQuery {
        start: Some(start),
        end,
        ..PickupPointListQuery::default()
    };
    repo.list_pickup_points(&ctx(), &query)
        .unwrap()
        .into_iter()
        .flat_map(|entry| entry.receptions)
        .map(|entry| entry.reception.id)
        .collect()
}

#[test]
fn range_bounds_include_receptions_opened_exactly_on_them() {
    let sqlite = setup();
    let memory = InMemoryPvzRepository::new();
    let repos: [&dyn PvzRepository; 2] = [&sqlite, &memory];

    for repo in repos {
        let point = PickupPoint::with_id(Uuid::new_v4(), "Moscow", BASE_MS);
        repo.create_pickup_point(&ctx(), &point).unwrap();
        let first = Reception::with_id(Uuid::new_v4(), point.id, BASE_MS + 100);
        repo.create_reception(&ctx(), &first).unwrap();
        repo.close_reception(&ctx(), point.id).unwrap();
        let second = Reception::with_id(Uuid::new_v4(), point.id, BASE_MS + 500);
        repo.create_reception(&ctx(), &second).unwrap();

        assert_eq!(
            reception_ids_in_range(repo, BASE_MS + 100, None),
            vec![second.id, first.id]
        );
        assert_eq!(
            reception_ids_in_range(repo, BASE_MS + 100, Some(BASE_MS + 100)),
            vec![first.id]
        );
        assert_eq!(
            reception_ids_in_range(repo, BASE_MS + 101, Some(BASE_MS + 499)),
            Vec::<Uuid>::new()
        );
    }
}

#[test]
fn inverted_date_range_is_rejected() {
    let repo = setup();
    let err = repo
        .list_pickup_points(
            &ctx(),
            &PickupPointListQuery {
                start: Some(BASE_MS + 10),
                end: Some(BASE_MS),
                ..PickupPointListQuery::default()
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::InvalidDateRange { .. })
    ));
}

#[test]
fn metrics_count_created_points_and_conflicts() {
    let telemetry = Arc::new(Telemetry::new());
    let pool = ConnectionPool::in_memory(Duration::from_secs(1)).unwrap();
    let repo = SqlitePvzRepository::try_new(pool, Arc::clone(&telemetry)).unwrap();

    let point = PickupPoint::with_id(Uuid::new_v4(), "Moscow", BASE_MS);
    repo.create_pickup_point(&ctx(), &point).unwrap();
    let _ = repo.create_pickup_point(&ctx(), &point);

    let snapshot = telemetry.metrics().snapshot();
    assert_eq!(snapshot.pickup_points_created, 1);
    assert_eq!(snapshot.conflicts, 1);
    assert_eq!(snapshot.storage_errors, 0);
}
