#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};
use tempfile::TempDir;
use uuid::Uuid;

use marketplace_checkout::{
    config::AppConfig,
    db,
    entities::{product, seller, stock_reservation},
};

/// Fresh in-memory SQLite database with the schema applied.
///
/// The pool is pinned to one connection: every connection to `sqlite::memory:`
/// opens its own empty database.
pub async fn setup_db() -> Arc<DatabaseConnection> {
    let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;
    cfg.db_acquire_timeout_secs = 30;

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .expect("failed to create test database");
    db::run_migrations(&pool)
        .await
        .expect("failed to run migrations in tests");

    Arc::new(pool)
}

/// File-backed SQLite database behind a pool of `max_connections`.
///
/// Keep the returned directory alive for as long as the pool is used.
pub async fn setup_file_db(max_connections: u32) -> (TempDir, Arc<DatabaseConnection>) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("checkout.db").display()
    );
    let mut cfg = AppConfig::new(url, "test".to_string());
    cfg.db_max_connections = max_connections;
    cfg.db_min_connections = 1;
    cfg.db_acquire_timeout_secs = 30;

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .expect("failed to create file database");
    db::run_migrations(&pool)
        .await
        .expect("failed to run migrations in tests");

    (dir, Arc::new(pool))
}

pub struct ProductSeed<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub seller_id: &'a str,
    pub stock: Option<i32>,
    pub location: Option<(f64, f64)>,
}

impl<'a> ProductSeed<'a> {
    pub fn new(id: &'a str, seller_id: &'a str, stock: Option<i32>) -> Self {
        Self {
            id,
            title: id,
            seller_id,
            stock,
            location: None,
        }
    }

    pub fn titled(mut self, title: &'a str) -> Self {
        self.title = title;
        self
    }

    pub fn located(mut self, latitude: f64, longitude: f64) -> Self {
        self.location = Some((latitude, longitude));
        self
    }
}

pub async fn seed_product(db: &DatabaseConnection, seed: ProductSeed<'_>) -> product::Model {
    product::ActiveModel {
        id: Set(seed.id.to_string()),
        title: Set(seed.title.to_string()),
        seller_id: Set(seed.seller_id.to_string()),
        stock: Set(seed.stock),
        max_stock: Set(seed.stock),
        seller_latitude: Set(seed.location.map(|(lat, _)| lat)),
        seller_longitude: Set(seed.location.map(|(_, lng)| lng)),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed product")
}

pub async fn seed_seller(db: &DatabaseConnection, id: &str, payable: bool) -> seller::Model {
    seller::ActiveModel {
        id: Set(id.to_string()),
        name: Set(format!("Seller {id}")),
        payout_account_id: Set(payable.then(|| format!("acct_{id}"))),
        payouts_enabled: Set(payable),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed seller")
}

/// Writes a reservation row directly, bypassing the availability check.
pub async fn insert_reservation(
    db: &DatabaseConnection,
    product_id: &str,
    payment_session_id: &str,
    quantity: i32,
    status: stock_reservation::ReservationStatus,
    expires_at: DateTime<Utc>,
) -> stock_reservation::Model {
    stock_reservation::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id.to_string()),
        payment_session_id: Set(payment_session_id.to_string()),
        quantity: Set(quantity),
        status: Set(status.as_str().to_string()),
        expires_at: Set(expires_at),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert reservation")
}

pub async fn reservation_count(db: &DatabaseConnection) -> u64 {
    stock_reservation::Entity::find()
        .count(db)
        .await
        .expect("count reservations")
}

pub async fn reservations_for(
    db: &DatabaseConnection,
    payment_session_id: &str,
) -> Vec<stock_reservation::Model> {
    stock_reservation::Entity::find()
        .filter(stock_reservation::Column::PaymentSessionId.eq(payment_session_id))
        .all(db)
        .await
        .expect("load reservations")
}

pub async fn all_reservations(db: &DatabaseConnection) -> Vec<stock_reservation::Model> {
    stock_reservation::Entity::find()
        .all(db)
        .await
        .expect("load reservations")
}
