mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};

use common::{
    insert_reservation, reservation_count, reservations_for, seed_product, setup_db, ProductSeed,
};
use marketplace_checkout::entities::stock_reservation::ReservationStatus;
use marketplace_checkout::errors::{CheckoutError, StockViolation};
use marketplace_checkout::models::CartLine;
use marketplace_checkout::services::stock_reservation::StockReservationService;

fn service(db: std::sync::Arc<sea_orm::DatabaseConnection>) -> StockReservationService {
    StockReservationService::new(db, Duration::minutes(15))
}

#[tokio::test]
async fn insufficient_stock_writes_nothing() {
    let db = setup_db().await;
    seed_product(&db, ProductSeed::new("P1", "S1", Some(1)).titled("Honey")).await;
    let svc = service(db.clone());

    let result = svc
        .check_and_reserve(&[CartLine::new("P1", 2, 500, "S1")], "cs_1")
        .await;

    assert_matches!(
        result,
        Err(CheckoutError::InsufficientStock(violations)) if violations == vec![StockViolation {
            product_id: "P1".into(),
            requested: 2,
            available: 1,
            title: "Honey".into(),
        }]
    );
    assert_eq!(reservation_count(&db).await, 0);
}

#[tokio::test]
async fn reports_every_violating_line() {
    let db = setup_db().await;
    seed_product(&db, ProductSeed::new("P1", "S1", Some(1))).await;
    seed_product(&db, ProductSeed::new("P2", "S1", Some(10))).await;
    seed_product(&db, ProductSeed::new("P3", "S2", Some(0))).await;
    let svc = service(db.clone());

    let result = svc
        .check_and_reserve(
            &[
                CartLine::new("P1", 3, 100, "S1"),
                CartLine::new("P2", 1, 100, "S1"),
                CartLine::new("P3", 1, 100, "S2"),
            ],
            "cs_1",
        )
        .await;

    let violations = match result {
        Err(CheckoutError::InsufficientStock(violations)) => violations,
        other => panic!("expected insufficient stock, got {other:?}"),
    };
    let ids: Vec<&str> = violations.iter().map(|v| v.product_id.as_str()).collect();
    assert_eq!(ids, vec!["P1", "P3"]);
    assert_eq!(violations[1].available, 0);
    assert_eq!(reservation_count(&db).await, 0);
}

#[tokio::test]
async fn unknown_products_are_reported() {
    let db = setup_db().await;
    seed_product(&db, ProductSeed::new("P1", "S1", Some(5))).await;

    let result = service(db.clone())
        .check_and_reserve(
            &[
                CartLine::new("P1", 1, 100, "S1"),
                CartLine::new("GHOST", 1, 100, "S1"),
            ],
            "cs_1",
        )
        .await;

    assert_matches!(result, Err(CheckoutError::ProductNotFound(ids)) if ids == vec!["GHOST"]);
    assert_eq!(reservation_count(&db).await, 0);
}

#[tokio::test]
async fn reserves_one_row_per_line() {
    let db = setup_db().await;
    seed_product(&db, ProductSeed::new("P1", "S1", Some(5))).await;
    seed_product(&db, ProductSeed::new("P2", "S2", None)).await;
    let svc = service(db.clone());

    let outcome = svc
        .check_and_reserve(
            &[
                CartLine::new("P1", 2, 500, "S1"),
                CartLine::new("P2", 1_000, 10, "S2"),
            ],
            "cs_1",
        )
        .await
        .unwrap();

    assert_eq!(outcome.reservations.len(), 2);
    assert!(outcome.products.contains_key("P2"));
    let rows = reservations_for(&db, "cs_1").await;
    assert_eq!(rows.len(), 2);
    assert!(rows
        .iter()
        .all(|r| r.status() == Some(ReservationStatus::Pending) && r.expires_at > Utc::now()));

    assert_eq!(svc.available_quantity("P1").await.unwrap(), Some(3));
    assert_eq!(svc.available_quantity("P2").await.unwrap(), None);
}

#[tokio::test]
async fn pending_reservations_hold_stock() {
    let db = setup_db().await;
    seed_product(&db, ProductSeed::new("P1", "S1", Some(5))).await;
    let svc = service(db.clone());

    svc.check_and_reserve(&[CartLine::new("P1", 3, 100, "S1")], "cs_a")
        .await
        .unwrap();
    let second = svc
        .check_and_reserve(&[CartLine::new("P1", 3, 100, "S1")], "cs_b")
        .await;

    assert_matches!(
        second,
        Err(CheckoutError::InsufficientStock(v)) if v[0].available == 2 && v[0].requested == 3
    );
}

#[tokio::test]
async fn quantities_of_repeated_product_are_summed() {
    let db = setup_db().await;
    seed_product(&db, ProductSeed::new("P1", "S1", Some(4))).await;

    let result = service(db.clone())
        .check_and_reserve(
            &[
                CartLine::new("P1", 3, 100, "S1"),
                CartLine::new("P1", 2, 100, "S1"),
            ],
            "cs_1",
        )
        .await;

    assert_matches!(
        result,
        Err(CheckoutError::InsufficientStock(v)) if v.len() == 1 && v[0].requested == 5
    );
}

#[tokio::test]
async fn expired_pending_rows_free_stock_without_cleanup() {
    let db = setup_db().await;
    seed_product(&db, ProductSeed::new("P1", "S1", Some(2))).await;
    insert_reservation(
        &db,
        "P1",
        "cs_old",
        2,
        ReservationStatus::Pending,
        Utc::now() - Duration::seconds(5),
    )
    .await;
    let svc = service(db.clone());

    assert_eq!(svc.available_quantity("P1").await.unwrap(), Some(2));
    svc.check_and_reserve(&[CartLine::new("P1", 2, 100, "S1")], "cs_new")
        .await
        .unwrap();

    // The stale row is untouched; only the predicate ignores it.
    let old = reservations_for(&db, "cs_old").await;
    assert_eq!(old[0].status(), Some(ReservationStatus::Pending));
}

#[tokio::test]
async fn cancelled_rows_do_not_count() {
    let db = setup_db().await;
    seed_product(&db, ProductSeed::new("P1", "S1", Some(2))).await;
    let svc = service(db.clone());

    svc.check_and_reserve(&[CartLine::new("P1", 2, 100, "S1")], "cs_1")
        .await
        .unwrap();
    assert_eq!(svc.available_quantity("P1").await.unwrap(), Some(0));

    assert_eq!(svc.cancel_for_session("cs_1").await.unwrap(), 1);
    assert_eq!(svc.available_quantity("P1").await.unwrap(), Some(2));
    assert_eq!(
        reservations_for(&db, "cs_1").await[0].status(),
        Some(ReservationStatus::Cancelled)
    );
}

#[tokio::test]
async fn confirm_skips_expired_rows() {
    let db = setup_db().await;
    seed_product(&db, ProductSeed::new("P1", "S1", Some(10))).await;
    insert_reservation(
        &db,
        "P1",
        "cs_1",
        1,
        ReservationStatus::Pending,
        Utc::now() + Duration::minutes(10),
    )
    .await;
    insert_reservation(
        &db,
        "P1",
        "cs_1",
        1,
        ReservationStatus::Pending,
        Utc::now() - Duration::minutes(1),
    )
    .await;
    let svc = service(db.clone());

    assert_eq!(svc.confirm_for_session("cs_1").await.unwrap(), 1);

    let mut statuses: Vec<_> = reservations_for(&db, "cs_1")
        .await
        .iter()
        .map(|r| r.status.clone())
        .collect();
    statuses.sort();
    assert_eq!(statuses, vec!["CONFIRMED", "PENDING"]);
}

#[tokio::test]
async fn rebind_moves_rows_to_gateway_session() {
    let db = setup_db().await;
    seed_product(&db, ProductSeed::new("P1", "S1", Some(10))).await;
    let svc = service(db.clone());

    svc.check_and_reserve(&[CartLine::new("P1", 1, 100, "S1")], "provisional-1")
        .await
        .unwrap();
    assert_eq!(
        svc.rebind_session("provisional-1", "cs_live_1").await.unwrap(),
        1
    );

    assert!(svc.list_for_session("provisional-1").await.unwrap().is_empty());
    let listed = svc.list_for_session("cs_live_1").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].is_holding);
}

#[tokio::test]
async fn reaper_only_touches_expired_pending_rows() {
    let db = setup_db().await;
    seed_product(&db, ProductSeed::new("P1", "S1", Some(10))).await;
    let past = Utc::now() - Duration::minutes(1);
    insert_reservation(&db, "P1", "stale", 1, ReservationStatus::Pending, past).await;
    insert_reservation(&db, "P1", "paid", 1, ReservationStatus::Confirmed, past).await;
    insert_reservation(
        &db,
        "P1",
        "live",
        1,
        ReservationStatus::Pending,
        Utc::now() + Duration::minutes(10),
    )
    .await;
    let svc = service(db.clone());

    assert_eq!(svc.expire_stale_reservations().await.unwrap(), 1);
    assert_eq!(
        reservations_for(&db, "stale").await[0].status(),
        Some(ReservationStatus::Expired)
    );
    assert_eq!(
        reservations_for(&db, "paid").await[0].status(),
        Some(ReservationStatus::Confirmed)
    );
    assert_eq!(
        reservations_for(&db, "live").await[0].status(),
        Some(ReservationStatus::Pending)
    );
}
