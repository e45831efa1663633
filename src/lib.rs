//! Marketplace checkout engine
//!
//! Reserves stock for multi-seller carts, prices them with distance-tiered
//! delivery fees and opens hosted payment sessions.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod migrator;
pub mod models;
pub mod retry;
pub mod services;

use axum::{routing::get, Router};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::CheckoutError;
use crate::services::checkout::CheckoutEngine;
use crate::services::checkout_session::CheckoutSessionBuilder;
use crate::services::delivery_feasibility::{DeliveryFeasibilityGate, HttpDeliveryAvailability};
use crate::services::payment_gateway::HttpPaymentGateway;
use crate::services::pricing::PricingEngine;
use crate::services::seller_payouts::DbPayoutDirectory;
use crate::services::stock_reservation::StockReservationService;

/// Upper bound for a whole HTTP request, collaborator calls included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub checkout: CheckoutEngine,
}

impl AppState {
    pub fn new(db: Arc<DatabaseConnection>, config: AppConfig, checkout: CheckoutEngine) -> Self {
        Self {
            db,
            config,
            checkout,
        }
    }

    /// Wires the engine with the HTTP collaborators named in the configuration.
    pub fn from_config(db: Arc<DatabaseConnection>, config: AppConfig) -> Result<Self, CheckoutError> {
        let checkout = build_checkout_engine(db.clone(), &config)?;
        Ok(Self::new(db, config, checkout))
    }
}

pub fn build_checkout_engine(
    db: Arc<DatabaseConnection>,
    cfg: &AppConfig,
) -> Result<CheckoutEngine, CheckoutError> {
    let gateway = HttpPaymentGateway::new(
        cfg.gateway_api_base.clone(),
        cfg.gateway_secret_key.clone().unwrap_or_default(),
        cfg.external_timeout(),
    )
    .map_err(|e| CheckoutError::Internal(e.to_string()))?;

    let feasibility = match &cfg.delivery_availability_url {
        Some(url) => {
            let availability = HttpDeliveryAvailability::new(url.clone(), cfg.external_timeout())
                .map_err(|e| CheckoutError::Internal(e.to_string()))?;
            info!(url = %url, "Delivery availability checks enabled");
            DeliveryFeasibilityGate::new(Arc::new(availability))
        }
        None => {
            warn!("Delivery availability URL not configured; courier capacity is not checked");
            DeliveryFeasibilityGate::unconfigured()
        }
    };

    Ok(CheckoutEngine::new(
        StockReservationService::new(db.clone(), cfg.reservation_ttl()),
        PricingEngine::from_config(cfg),
        CheckoutSessionBuilder::new(cfg.into()),
        feasibility,
        Arc::new(DbPayoutDirectory::new(db)),
        Arc::new(gateway),
    ))
}

pub fn api_v1_routes() -> Router<AppState> {
    Router::new().nest("/checkout", handlers::checkout::checkout_routes())
}

/// Full application router.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}
