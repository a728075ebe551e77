use pvz_core::{
    Category, ErrorKind, InMemoryPvzRepository, ListRequest, PvzRepository, PvzService,
    ReceptionStatus, RepoError, RequestContext, ServiceError,
};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

fn setup() -> PvzService<InMemoryPvzRepository> {
    PvzService::new(InMemoryPvzRepository::new())
}

fn ctx() -> RequestContext {
    RequestContext::background()
}

#[test]
fn full_reception_flow() {
    let service = setup();
    let point = service.register_pickup_point(&ctx(), " Москва ").unwrap();
    assert_eq!(point.city, "Moscow");

    let reception = service.start_reception(&ctx(), point.id).unwrap();
    let first = service.add_item(&ctx(), point.id, "electronics").unwrap();
    let second = service.add_item(&ctx(), point.id, "Обувь").unwrap();
    assert_eq!(second.category, Category::Shoes);
    assert_eq!(first.reception_id, reception.id);

    let removed = service.remove_last_item(&ctx(), point.id).unwrap();
    assert_eq!(removed.id, second.id);

    let closed = service.close_reception(&ctx(), point.id).unwrap();
    assert_eq!(closed.status, ReceptionStatus::Closed);
    assert_eq!(service.open_reception(&ctx(), point.id).unwrap(), None);

    let listed = service
        .list_pickup_points(&ctx(), &ListRequest::default())
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].receptions[0].items, vec![first]);
}

#[test]
fn invalid_city_and_category_are_validation_errors() {
    let service = setup();

    let err = service.register_pickup_point(&ctx(), "Paris").unwrap_err();
    assert!(matches!(err, ServiceError::InvalidCity(ref city) if city == "Paris"));
    assert_eq!(err.kind(), ErrorKind::Validation);

    let blank = service.register_pickup_point(&ctx(), "   ").unwrap_err();
    assert_eq!(blank.to_string(), "city is required");

    let point = service.register_pickup_point(&ctx(), "Kazan").unwrap();
    service.start_reception(&ctx(), point.id).unwrap();
    let err = service.add_item(&ctx(), point.id, "furniture").unwrap_err();
    assert!(matches!(err, ServiceError::InvalidCategory(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn repository_errors_keep_their_kind() {
    let service = setup();
    let point = service.register_pickup_point(&ctx(), "Moscow").unwrap();

    let err = service.add_item(&ctx(), point.id, "clothes").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);

    service.start_reception(&ctx(), point.id).unwrap();
    let err = service.start_reception(&ctx(), point.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = service.remove_last_item(&ctx(), point.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = service.start_reception(&ctx(), Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, ServiceError::Repo(RepoError::NotFound(_))));
}

#[test]
fn missing_paging_values_fall_back_to_defaults() {
    let service = PvzService::with_default_page_size(InMemoryPvzRepository::new(), 2);
    for _ in 0..3 {
        service.register_pickup_point(&ctx(), "Kazan").unwrap();
    }

    let first = service
        .list_pickup_points(&ctx(), &ListRequest::default())
        .unwrap();
    assert_eq!(first.len(), 2);

    let zeroed = service
        .list_pickup_points(
            &ctx(),
            &ListRequest {
                page: Some(0),
                page_size: Some(0),
                ..ListRequest::default()
            },
        )
        .unwrap();
    assert_eq!(zeroed, first);

    let second = service
        .list_pickup_points(
            &ctx(),
            &ListRequest {
                page: Some(2),
                ..ListRequest::default()
            },
        )
        .unwrap();
    assert_eq!(second.len(), 1);
}

#[test]
fn cancelled_context_stops_in_memory_calls() {
    let service = setup();
    let cancelled = RequestContext::background();
    cancelled.cancel();

    let err = service
        .register_pickup_point(&cancelled, "Moscow")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(service
        .repository()
        .list_pickup_points(&ctx(), &Default::default())
        .unwrap()
        .is_empty());
}

#[test]
fn call_timeout_bounds_each_repository_call() {
    let service = setup().with_call_timeout(Duration::ZERO);
    assert_eq!(service.call_timeout(), Some(Duration::ZERO));

    let err = service.register_pickup_point(&ctx(), "Moscow").unwrap_err();
    assert!(matches!(err, ServiceError::Repo(ref repo) if repo.error_code() == "deadline_exceeded"));

    let relaxed = setup().with_call_timeout(Duration::from_secs(60));
    let point = relaxed.register_pickup_point(&ctx(), "Kazan").unwrap();

    let parent = RequestContext::background();
    parent.cancel();
    let err = relaxed.start_reception(&parent, point.id).unwrap_err();
    assert!(matches!(err, ServiceError::Repo(ref repo) if repo.error_code() == "cancelled"));
    assert_eq!(relaxed.open_reception(&ctx(), point.id).unwrap(), None);
}

#[test]
fn listing_serializes_with_camel_case_fields() {
    let service = setup();
    let point = service
        .register_pickup_point(&ctx(), "Saint Petersburg")
        .unwrap();
    let reception = service.start_reception(&ctx(), point.id).unwrap();
    let item = service.add_item(&ctx(), point.id, "clothes").unwrap();

    let listed = service
        .list_pickup_points(&ctx(), &ListRequest::default())
        .unwrap();
    let value = serde_json::to_value(&listed).unwrap();

    assert_eq!(
        value,
        json!([{
            "pvz": {
                "id": point.id,
                "city": "Saint Petersburg",
                "registeredAt": point.registered_at,
            },
            "receptions": [{
                "reception": {
                    "id": reception.id,
                    "pvzId": point.id,
                    "openedAt": reception.opened_at,
                    "status": "OPEN",
                },
                "items": [{
                    "id": item.id,
                    "receptionId": reception.id,
                    "category": "clothes",
                    "createdAt": item.created_at,
                }],
            }],
        }])
    );
}
