//! Stock Reservation Service
//!
//! Check-then-reserve for a whole cart in one write-locked transaction.
//! Reservation rows hold stock until they are confirmed, cancelled or simply
//! run past `expires_at`; expiry is evaluated by the query predicate, never by
//! a sweeper.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::entities::product;
use crate::entities::stock_reservation::{self, ReservationStatus};
use crate::errors::{CheckoutError, StockViolation};
use crate::models::CartLine;
use crate::retry::{with_retry, DbRetryPolicy, RetryConfig};

/// Rows written by a successful reservation, plus the products they were checked against.
#[derive(Debug, Clone)]
pub struct ReservationOutcome {
    pub reservations: Vec<stock_reservation::Model>,
    pub products: HashMap<String, product::Model>,
}

/// Reservation as exposed over the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationSummary {
    pub id: Uuid,
    pub product_id: String,
    pub payment_session_id: String,
    pub quantity: i32,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub is_holding: bool,
}

impl From<stock_reservation::Model> for ReservationSummary {
    fn from(model: stock_reservation::Model) -> Self {
        let is_holding = model.is_holding(Utc::now());
        Self {
            id: model.id,
            product_id: model.product_id,
            payment_session_id: model.payment_session_id,
            quantity: model.quantity,
            status: model.status,
            expires_at: model.expires_at,
            is_holding,
        }
    }
}

#[derive(Clone)]
pub struct StockReservationService {
    db_pool: Arc<DatabaseConnection>,
    ttl: Duration,
    lock_retry: RetryConfig,
}

impl StockReservationService {
    pub fn new(db_pool: Arc<DatabaseConnection>, ttl: Duration) -> Self {
        Self {
            db_pool,
            ttl,
            lock_retry: RetryConfig {
                max_attempts: 3,
                initial_delay: std::time::Duration::from_millis(25),
                ..RetryConfig::default()
            },
        }
    }

    /// Verifies every line against available stock and, if the whole cart fits,
    /// writes one `PENDING` reservation per line.
    ///
    /// Nothing is written when any line fails; the error lists every violation.
    /// Lock contention on the store is retried; stock violations are not.
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn check_and_reserve(
        &self,
        lines: &[CartLine],
        payment_session_id: &str,
    ) -> Result<ReservationOutcome, CheckoutError> {
        if lines.is_empty() {
            return Err(CheckoutError::InvalidCart("cart is empty".to_string()));
        }

        // Ordered so concurrent attempts lock products in the same sequence.
        let mut requested: BTreeMap<&str, i32> = BTreeMap::new();
        for line in lines {
            let total = requested.entry(line.product_id.as_str()).or_insert(0);
            *total = total.checked_add(line.quantity).ok_or_else(|| {
                CheckoutError::InvalidCart(format!(
                    "quantity for product {} overflows",
                    line.product_id
                ))
            })?;
        }

        let outcome = with_retry(&self.lock_retry, DbRetryPolicy, || {
            self.reserve_once(lines, &requested, payment_session_id)
        })
        .await?;

        counter!("checkout.reservations.created", outcome.reservations.len() as u64);
        info!(
            payment_session_id,
            reservations = outcome.reservations.len(),
            expires_at = ?outcome.reservations.first().map(|r| r.expires_at),
            "Stock reserved"
        );

        Ok(outcome)
    }

    /// One check-then-insert transaction.
    ///
    /// Postgres and MySQL lock the product rows with `SELECT ... FOR UPDATE`.
    /// SQLite has no row locks: a no-op update of the cart's products is issued
    /// first, so the transaction holds the database write lock before it reads
    /// availability and concurrent writers queue behind it.
    async fn reserve_once(
        &self,
        lines: &[CartLine],
        requested: &BTreeMap<&str, i32>,
        payment_session_id: &str,
    ) -> Result<ReservationOutcome, CheckoutError> {
        let product_ids: Vec<String> = requested.keys().map(|id| id.to_string()).collect();

        let txn = self.db_pool.begin().await?;
        let now = Utc::now();

        let mut query = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids.clone()))
            .order_by_asc(product::Column::Id);
        if txn.get_database_backend() == DbBackend::Sqlite {
            product::Entity::update_many()
                .col_expr(
                    product::Column::UpdatedAt,
                    Expr::col(product::Column::UpdatedAt).into(),
                )
                .filter(product::Column::Id.is_in(product_ids.clone()))
                .exec(&txn)
                .await?;
        } else {
            query = query.lock_exclusive();
        }
        let products: HashMap<String, product::Model> = query
            .all(&txn)
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        let missing: Vec<String> = product_ids
            .iter()
            .filter(|id| !products.contains_key(*id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            txn.rollback().await?;
            warn!(?missing, "Checkout references unknown products");
            return Err(CheckoutError::ProductNotFound(missing));
        }

        let tracked: Vec<String> = products
            .values()
            .filter(|p| p.is_stock_tracked())
            .map(|p| p.id.clone())
            .collect();
        let reserved = reserved_quantities(&txn, &tracked, now).await?;

        let mut violations = Vec::new();
        for (product_id, quantity) in requested {
            let Some(product) = products.get(*product_id) else {
                continue;
            };
            let Some(stock) = product.stock else {
                continue;
            };
            let held = reserved.get(*product_id).copied().unwrap_or(0);
            let available = i64::from(stock) - held;
            if available <= 0 || i64::from(*quantity) > available {
                violations.push(StockViolation {
                    product_id: product_id.to_string(),
                    requested: *quantity,
                    available: available.clamp(0, i64::from(i32::MAX)) as i32,
                    title: product.title.clone(),
                });
            }
        }

        if !violations.is_empty() {
            txn.rollback().await?;
            counter!("checkout.reservations.insufficient_stock", 1);
            info!(
                payment_session_id,
                violations = violations.len(),
                "Insufficient stock, nothing reserved"
            );
            return Err(CheckoutError::InsufficientStock(violations));
        }

        let expires_at = now + self.ttl;
        let reservations: Vec<stock_reservation::Model> = lines
            .iter()
            .map(|line| stock_reservation::Model {
                id: Uuid::new_v4(),
                product_id: line.product_id.clone(),
                payment_session_id: payment_session_id.to_string(),
                quantity: line.quantity,
                status: ReservationStatus::Pending.as_str().to_string(),
                expires_at,
                created_at: now,
                updated_at: Some(now),
            })
            .collect();

        let rows = reservations
            .iter()
            .cloned()
            .map(|model| stock_reservation::ActiveModel {
                id: Set(model.id),
                product_id: Set(model.product_id),
                payment_session_id: Set(model.payment_session_id),
                quantity: Set(model.quantity),
                status: Set(model.status),
                expires_at: Set(model.expires_at),
                created_at: Set(model.created_at),
                updated_at: Set(model.updated_at),
            });
        stock_reservation::Entity::insert_many(rows)
            .exec_without_returning(&txn)
            .await?;

        txn.commit().await?;

        Ok(ReservationOutcome {
            reservations,
            products,
        })
    }

    /// Units that can still be reserved, `None` for products without stock tracking.
    #[instrument(skip(self))]
    pub async fn available_quantity(&self, product_id: &str) -> Result<Option<i32>, CheckoutError> {
        let db = &*self.db_pool;
        let product = product::Entity::find_by_id(product_id.to_string())
            .one(db)
            .await?
            .ok_or_else(|| CheckoutError::ProductNotFound(vec![product_id.to_string()]))?;

        let Some(stock) = product.stock else {
            return Ok(None);
        };

        let reserved = reserved_quantities(db, &[product.id.clone()], Utc::now()).await?;
        let held = reserved.get(&product.id).copied().unwrap_or(0);
        Ok(Some((i64::from(stock) - held).max(0) as i32))
    }

    /// Releases the pending reservations of a session. Compensating action when
    /// the gateway session cannot be created or delivery is unavailable.
    #[instrument(skip(self))]
    pub async fn cancel_for_session(&self, payment_session_id: &str) -> Result<u64, CheckoutError> {
        let cancelled = self
            .transition(
                payment_session_id,
                ReservationStatus::Cancelled,
                false,
            )
            .await?;
        info!(payment_session_id, cancelled, "Cancelled reservations");
        Ok(cancelled)
    }

    /// Marks the still-valid reservations of a paid session as `CONFIRMED`.
    ///
    /// Rows that already ran past their expiry are left alone; their stock may
    /// have been sold to someone else in the meantime.
    #[instrument(skip(self))]
    pub async fn confirm_for_session(&self, payment_session_id: &str) -> Result<u64, CheckoutError> {
        let confirmed = self
            .transition(payment_session_id, ReservationStatus::Confirmed, true)
            .await?;
        if confirmed == 0 {
            warn!(payment_session_id, "No holding reservations to confirm");
        } else {
            info!(payment_session_id, confirmed, "Confirmed reservations");
        }
        Ok(confirmed)
    }

    /// Moves the reservations made under a provisional id to the gateway session id.
    #[instrument(skip(self))]
    pub async fn rebind_session(
        &self,
        provisional_id: &str,
        payment_session_id: &str,
    ) -> Result<u64, CheckoutError> {
        let result = stock_reservation::Entity::update_many()
            .col_expr(
                stock_reservation::Column::PaymentSessionId,
                Expr::value(payment_session_id),
            )
            .col_expr(stock_reservation::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(stock_reservation::Column::PaymentSessionId.eq(provisional_id))
            .exec(&*self.db_pool)
            .await?;

        debug!(rebound = result.rows_affected, "Rebound reservations");
        Ok(result.rows_affected)
    }

    /// Housekeeping: flags pending rows past their expiry as `EXPIRED`.
    ///
    /// Availability never depends on this running.
    #[instrument(skip(self))]
    pub async fn expire_stale_reservations(&self) -> Result<u64, CheckoutError> {
        let now = Utc::now();
        let result = stock_reservation::Entity::update_many()
            .col_expr(
                stock_reservation::Column::Status,
                Expr::value(ReservationStatus::Expired.as_str()),
            )
            .col_expr(stock_reservation::Column::UpdatedAt, Expr::value(now))
            .filter(stock_reservation::Column::Status.eq(ReservationStatus::Pending.as_str()))
            .filter(stock_reservation::Column::ExpiresAt.lte(now))
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected > 0 {
            info!(expired = result.rows_affected, "Expired stale reservations");
        }
        Ok(result.rows_affected)
    }

    #[instrument(skip(self))]
    pub async fn list_for_session(
        &self,
        payment_session_id: &str,
    ) -> Result<Vec<ReservationSummary>, CheckoutError> {
        let rows = stock_reservation::Entity::find()
            .filter(stock_reservation::Column::PaymentSessionId.eq(payment_session_id))
            .order_by_asc(stock_reservation::Column::CreatedAt)
            .order_by_asc(stock_reservation::Column::ProductId)
            .all(&*self.db_pool)
            .await?;

        Ok(rows.into_iter().map(ReservationSummary::from).collect())
    }

    async fn transition(
        &self,
        payment_session_id: &str,
        to: ReservationStatus,
        only_unexpired: bool,
    ) -> Result<u64, CheckoutError> {
        let now = Utc::now();
        let mut update = stock_reservation::Entity::update_many()
            .col_expr(stock_reservation::Column::Status, Expr::value(to.as_str()))
            .col_expr(stock_reservation::Column::UpdatedAt, Expr::value(now))
            .filter(stock_reservation::Column::PaymentSessionId.eq(payment_session_id))
            .filter(stock_reservation::Column::Status.eq(ReservationStatus::Pending.as_str()));
        if only_unexpired {
            update = update.filter(stock_reservation::Column::ExpiresAt.gt(now));
        }

        Ok(update.exec(&*self.db_pool).await?.rows_affected)
    }
}

/// Quantity held per product by pending, unexpired reservations.
async fn reserved_quantities<C: ConnectionTrait>(
    conn: &C,
    product_ids: &[String],
    now: DateTime<Utc>,
) -> Result<HashMap<String, i64>, CheckoutError> {
    if product_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(String, Option<i64>)> = stock_reservation::Entity::find()
        .select_only()
        .column(stock_reservation::Column::ProductId)
        .column_as(
            Expr::col(stock_reservation::Column::Quantity).sum(),
            "reserved",
        )
        .filter(stock_reservation::Column::ProductId.is_in(product_ids.to_vec()))
        .filter(stock_reservation::Column::Status.eq(ReservationStatus::Pending.as_str()))
        .filter(stock_reservation::Column::ExpiresAt.gt(now))
        .group_by(stock_reservation::Column::ProductId)
        .into_tuple()
        .all(conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(product_id, reserved)| (product_id, reserved.unwrap_or(0)))
        .collect())
}
