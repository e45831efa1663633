use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::errors::CheckoutError;
use crate::handlers::{ApiResponse, AppState};
use crate::services::checkout::{CheckoutOutcome, CheckoutRequest};
use crate::services::stock_reservation::ReservationSummary;

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_checkout_session))
        .route("/sessions/:id/reservations", get(list_session_reservations))
}

/// Reserves stock, prices the cart and opens a hosted payment session.
#[instrument(skip(state, request))]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutOutcome>>), CheckoutError> {
    let outcome = state.checkout.create_session(&request).await?;
    Ok((StatusCode::CREATED, ApiResponse::success(outcome)))
}

#[instrument(skip(state))]
pub async fn list_session_reservations(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<ReservationSummary>>>, CheckoutError> {
    let reservations = state
        .checkout
        .reservations()
        .list_for_session(&session_id)
        .await?;
    Ok(ApiResponse::success(reservations))
}
