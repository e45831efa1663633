use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::services::distance::Coordinates;

/// Buyer-facing order details carried into the payment session metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetails {
    #[validate(length(min = 1, max = 255))]
    pub buyer_id: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub pickup_date: Option<String>,
    #[serde(default)]
    pub delivery_date: Option<String>,
    #[serde(default)]
    pub delivery_time: Option<String>,
    /// Delivery location of the buyer
    #[serde(default)]
    #[validate(custom = "validate_coordinates")]
    pub coordinates: Option<Coordinates>,
}

fn validate_coordinates(coordinates: &Coordinates) -> Result<(), ValidationError> {
    if coordinates.is_valid() {
        Ok(())
    } else {
        Err(ValidationError::new("coordinates_out_of_range"))
    }
}
