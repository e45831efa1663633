pub mod checkout;
pub mod health;

use axum::Json;
use chrono::Utc;
use serde::Serialize;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Envelope for successful JSON responses
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
            timestamp: Utc::now().to_rfc3339(),
        })
    }
}
