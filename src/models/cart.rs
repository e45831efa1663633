use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::errors::CheckoutError;

/// Separates the fields of one compact cart line (`productId|qty|price|sellerId`)
pub const COMPACT_FIELD_SEPARATOR: char = '|';
/// Separates compact cart lines inside a metadata field
pub const COMPACT_LINE_SEPARATOR: char = ';';

/// Highest accepted unit price (1,000,000.00)
pub const MAX_UNIT_PRICE_CENTS: i64 = 100_000_000;

/// One line of the cart being checked out. Owned by the checkout call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub seller_id: String,
}

impl CartLine {
    pub fn new(
        product_id: impl Into<String>,
        quantity: i32,
        unit_price_cents: i64,
        seller_id: impl Into<String>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price_cents,
            seller_id: seller_id.into(),
        }
    }

    pub fn line_total_cents(&self) -> Option<i64> {
        self.unit_price_cents.checked_mul(i64::from(self.quantity))
    }

    pub fn validate(&self) -> Result<(), CheckoutError> {
        if self.quantity <= 0 {
            return Err(CheckoutError::InvalidCart(format!(
                "quantity for product {} must be positive",
                self.product_id
            )));
        }
        if self.unit_price_cents < 0 {
            return Err(CheckoutError::InvalidCart(format!(
                "unit price for product {} must not be negative",
                self.product_id
            )));
        }
        if self.unit_price_cents > MAX_UNIT_PRICE_CENTS {
            return Err(CheckoutError::InvalidCart(format!(
                "unit price for product {} exceeds {MAX_UNIT_PRICE_CENTS} cents",
                self.product_id
            )));
        }
        validate_identifier("product id", &self.product_id)?;
        validate_identifier("seller id", &self.seller_id)?;
        Ok(())
    }
}

fn validate_identifier(kind: &str, value: &str) -> Result<(), CheckoutError> {
    if value.trim().is_empty() {
        return Err(CheckoutError::InvalidCart(format!("{kind} must not be empty")));
    }
    if value.contains(COMPACT_FIELD_SEPARATOR) || value.contains(COMPACT_LINE_SEPARATOR) {
        return Err(CheckoutError::InvalidCart(format!(
            "{kind} '{value}' contains a reserved character"
        )));
    }
    Ok(())
}

/// Validates every line of a cart; an empty cart is invalid.
pub fn validate_cart(lines: &[CartLine]) -> Result<(), CheckoutError> {
    if lines.is_empty() {
        return Err(CheckoutError::InvalidCart("cart is empty".to_string()));
    }
    lines.iter().try_for_each(CartLine::validate)
}

/// Distinct seller ids of a cart, sorted.
pub fn unique_seller_ids(lines: &[CartLine]) -> BTreeSet<&str> {
    lines.iter().map(|line| line.seller_id.as_str()).collect()
}

/// How the order reaches the buyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMode {
    /// Buyer collects at the seller; no delivery pricing
    Pickup,
    /// Platform courier network
    Delivery,
    /// Courier network staffed by teen couriers
    TeenDelivery,
    /// Seller organises the delivery
    SellerDelivery,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Pickup => "PICKUP",
            DeliveryMode::Delivery => "DELIVERY",
            DeliveryMode::TeenDelivery => "TEEN_DELIVERY",
            DeliveryMode::SellerDelivery => "SELLER_DELIVERY",
        }
    }

    pub fn is_delivery(&self) -> bool {
        !matches!(self, DeliveryMode::Pickup)
    }

    /// Courier-network modes; only these need a capacity check.
    pub fn uses_courier_network(&self) -> bool {
        matches!(self, DeliveryMode::Delivery | DeliveryMode::TeenDelivery)
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn rejects_non_positive_quantity() {
        let line = CartLine::new("P1", 0, 500, "S1");
        assert_matches!(line.validate(), Err(CheckoutError::InvalidCart(_)));
    }

    #[test]
    fn rejects_separator_in_ids() {
        assert_matches!(
            CartLine::new("P|1", 1, 500, "S1").validate(),
            Err(CheckoutError::InvalidCart(_))
        );
        assert_matches!(
            CartLine::new("P1", 1, 500, "S;1").validate(),
            Err(CheckoutError::InvalidCart(_))
        );
    }

    #[test]
    fn rejects_unit_price_above_cap() {
        assert!(CartLine::new("P1", 1, MAX_UNIT_PRICE_CENTS, "S1").validate().is_ok());
        assert_matches!(
            CartLine::new("P1", 1, MAX_UNIT_PRICE_CENTS + 1, "S1").validate(),
            Err(CheckoutError::InvalidCart(_))
        );
        assert_matches!(
            CartLine::new("P1", 1, 92_233_720_368_547_758, "S1").validate(),
            Err(CheckoutError::InvalidCart(_))
        );
    }

    #[test]
    fn empty_cart_is_invalid() {
        assert_matches!(validate_cart(&[]), Err(CheckoutError::InvalidCart(_)));
    }

    #[test]
    fn unique_sellers_are_deduplicated() {
        let lines = vec![
            CartLine::new("P1", 1, 100, "S2"),
            CartLine::new("P2", 1, 100, "S1"),
            CartLine::new("P3", 1, 100, "S2"),
        ];
        let sellers: Vec<_> = unique_seller_ids(&lines).into_iter().collect();
        assert_eq!(sellers, vec!["S1", "S2"]);
    }

    #[test]
    fn delivery_mode_classes() {
        assert!(!DeliveryMode::Pickup.is_delivery());
        assert!(DeliveryMode::SellerDelivery.is_delivery());
        assert!(!DeliveryMode::SellerDelivery.uses_courier_network());
        assert!(DeliveryMode::TeenDelivery.uses_courier_network());
        assert_eq!(
            serde_json::to_string(&DeliveryMode::TeenDelivery).unwrap(),
            "\"TEEN_DELIVERY\""
        );
    }
}
