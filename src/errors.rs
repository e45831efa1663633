use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard error body returned by the HTTP layer
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Conflict", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Machine-readable error code
    pub code: String,
    /// Structured detail, e.g. every line that is short on stock
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

/// One cart line that cannot be satisfied from current stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockViolation {
    pub product_id: String,
    pub requested: i32,
    pub available: i32,
    pub title: String,
}

/// Errors produced by a checkout attempt.
///
/// Validation-class variants are recoverable by the caller and carry the
/// detail needed to fix the cart. Everything else is an infrastructure failure.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("Invalid cart: {0}")]
    InvalidCart(String),

    #[error("Products not found: {}", .0.join(", "))]
    ProductNotFound(Vec<String>),

    #[error("Insufficient stock for {} product(s)", .0.len())]
    InsufficientStock(Vec<StockViolation>),

    #[error("Sellers without payout setup: {}", .0.join(", "))]
    SellersNotPayable(Vec<String>),

    #[error("Delivery coordinates are required for the selected delivery mode")]
    DeliveryCoordinatesRequired,

    #[error("No delivery capacity for the requested slot")]
    DeliveryUnavailable,

    #[error("Order does not fit into the payment gateway metadata: {0}")]
    MetadataOverflow(String),

    #[error("Payment gateway session failed: {0}")]
    GatewaySessionFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckoutError {
    /// Errors the caller can fix by changing the cart or delivery choice.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidCart(_)
                | Self::ProductNotFound(_)
                | Self::InsufficientStock(_)
                | Self::SellersNotPayable(_)
                | Self::DeliveryCoordinatesRequired
                | Self::DeliveryUnavailable
                | Self::MetadataOverflow(_)
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCart(_) => "invalid_cart",
            Self::ProductNotFound(_) => "product_not_found",
            Self::InsufficientStock(_) => "insufficient_stock",
            Self::SellersNotPayable(_) => "sellers_not_payable",
            Self::DeliveryCoordinatesRequired => "delivery_coordinates_required",
            Self::DeliveryUnavailable => "delivery_unavailable",
            Self::MetadataOverflow(_) => "metadata_overflow",
            Self::GatewaySessionFailed(_) => "gateway_session_failed",
            Self::Database(_) => "database_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCart(_) | Self::MetadataOverflow(_) => StatusCode::BAD_REQUEST,
            Self::ProductNotFound(_) => StatusCode::NOT_FOUND,
            Self::InsufficientStock(_) => StatusCode::CONFLICT,
            Self::SellersNotPayable(_) | Self::DeliveryCoordinatesRequired => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::DeliveryUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::GatewaySessionFailed(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::GatewaySessionFailed(_) => {
                "Payment session could not be created, please retry".to_string()
            }
            _ => self.to_string(),
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::InsufficientStock(violations) => serde_json::to_value(violations).ok(),
            Self::ProductNotFound(ids) | Self::SellersNotPayable(ids) => {
                serde_json::to_value(ids).ok()
            }
            _ => None,
        }
    }
}

impl IntoResponse for CheckoutError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            code: self.code().to_string(),
            details: self.details(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_lists_every_line() {
        let err = CheckoutError::InsufficientStock(vec![
            StockViolation {
                product_id: "P1".into(),
                requested: 2,
                available: 1,
                title: "Honey".into(),
            },
            StockViolation {
                product_id: "P2".into(),
                requested: 5,
                available: 0,
                title: "Eggs".into(),
            },
        ]);

        let details = err.details().unwrap();
        let lines = details.as_array().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["productId"], "P1");
        assert_eq!(lines[1]["available"], 0);
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(err.is_validation());
    }

    #[test]
    fn internal_errors_are_not_leaked() {
        let err = CheckoutError::Database(DbErr::Custom("connection reset".into()));
        assert_eq!(err.response_message(), "Internal server error");
        assert!(!err.is_validation());
    }

    #[test]
    fn sellers_not_payable_names_sellers() {
        let err = CheckoutError::SellersNotPayable(vec!["S1".into(), "S9".into()]);
        assert_eq!(err.to_string(), "Sellers without payout setup: S1, S9");
        assert_eq!(err.code(), "sellers_not_payable");
    }
}
