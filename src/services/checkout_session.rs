//! Checkout Session Builder
//!
//! Assembles the gateway line items and the flat metadata map the payment
//! confirmation side later reads the order back from.
//!
//! Cart lines travel as `productId|quantity|unitPriceCents|sellerId`, joined by
//! `;` and packed greedily into `items_compact_1..N`. A line is never split
//! across two fields, so concatenating the fields in numeric order and
//! splitting on `;` then `|` restores the cart.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument, warn};

use crate::config::AppConfig;
use crate::entities::product;
use crate::errors::CheckoutError;
use crate::models::{
    unique_seller_ids, CartLine, DeliveryMode, OrderDetails, COMPACT_FIELD_SEPARATOR,
    COMPACT_LINE_SEPARATOR,
};
use crate::services::payment_gateway::{CheckoutSessionRequest, GatewayLineItem};
use crate::services::pricing::{DeliveryFeeBreakdown, PricedCart};

/// Most fields the gateway accepts in one metadata map
pub const METADATA_MAX_FIELDS: usize = 50;

/// Default per-field value length
pub const METADATA_FIELD_MAX_LEN: usize = 500;

pub const COMPACT_ITEMS_PREFIX: &str = "items_compact_";

/// Scalar fields written next to the compact item chunks
pub const SCALAR_METADATA_FIELDS: [&str; 16] = [
    "buyerId",
    "deliveryMode",
    "address",
    "notes",
    "pickupDate",
    "deliveryDate",
    "deliveryTime",
    "productsTotalCents",
    "deliveryFeeCents",
    "processorFeeCents",
    "amountPaidCents",
    "subtotalCents",
    "notificationRequested",
    "notificationFeeCents",
    "deliveryFeeBreakdown",
    "coordinates",
];

/// Gateway-facing settings of the builder.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub currency: String,
    pub field_max_len: usize,
    pub payment_method_types: Vec<String>,
    pub success_url: String,
    pub cancel_url: String,
}

impl From<&AppConfig> for SessionSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            currency: cfg.currency.clone(),
            field_max_len: cfg.metadata_field_max_len,
            payment_method_types: cfg.accepted_payment_method_types(),
            success_url: cfg.checkout_success_url.clone(),
            cancel_url: cfg.checkout_cancel_url.clone(),
        }
    }
}

pub struct BuildSessionInput<'a> {
    pub lines: &'a [CartLine],
    /// Product snapshot taken during reservation, used for display names
    pub products: &'a HashMap<String, product::Model>,
    pub priced: &'a PricedCart,
    pub delivery_mode: DeliveryMode,
    pub details: &'a OrderDetails,
    pub notification_requested: bool,
    pub client_reference_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct CheckoutSessionBuilder {
    settings: SessionSettings,
}

impl CheckoutSessionBuilder {
    pub fn new(settings: SessionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Fails with every seller in the cart that cannot receive payouts.
    pub fn ensure_sellers_payable(
        lines: &[CartLine],
        payout_status: &HashMap<String, bool>,
    ) -> Result<(), CheckoutError> {
        let missing: Vec<String> = unique_seller_ids(lines)
            .into_iter()
            .filter(|seller_id| !payout_status.get(*seller_id).copied().unwrap_or(false))
            .map(str::to_string)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(CheckoutError::SellersNotPayable(missing))
        }
    }

    /// Checks up front that the cart fits the metadata bounds.
    pub fn ensure_metadata_fits(&self, lines: &[CartLine]) -> Result<(), CheckoutError> {
        let chunks = pack_compact_items(lines, self.settings.field_max_len)?;
        check_field_count(chunks.len() + SCALAR_METADATA_FIELDS.len())
    }

    #[instrument(skip(self, input), fields(lines = input.lines.len()))]
    pub fn build(&self, input: &BuildSessionInput<'_>) -> Result<CheckoutSessionRequest, CheckoutError> {
        let line_items = self.line_items(input);
        let metadata = self.metadata(input)?;

        let request = CheckoutSessionRequest {
            line_items,
            metadata,
            payment_method_types: self.settings.payment_method_types.clone(),
            success_url: self.settings.success_url.clone(),
            cancel_url: self.settings.cancel_url.clone(),
            client_reference_id: input.client_reference_id.to_string(),
        };

        if request.total_cents() != input.priced.grand_total_cents {
            return Err(CheckoutError::Internal(format!(
                "line items total {} does not match priced total {}",
                request.total_cents(),
                input.priced.grand_total_cents
            )));
        }

        debug!(
            line_items = request.line_items.len(),
            metadata_fields = request.metadata.len(),
            "Built checkout session request"
        );
        Ok(request)
    }

    fn line_items(&self, input: &BuildSessionInput<'_>) -> Vec<GatewayLineItem> {
        let currency = &self.settings.currency;
        let priced = input.priced;

        let mut items: Vec<GatewayLineItem> = input
            .lines
            .iter()
            .map(|line| GatewayLineItem {
                name: input
                    .products
                    .get(&line.product_id)
                    .map(|p| p.title.clone())
                    .unwrap_or_else(|| line.product_id.clone()),
                description: None,
                unit_amount_cents: line.unit_price_cents,
                quantity: line.quantity,
                currency: currency.clone(),
            })
            .collect();

        if priced.delivery_fee_cents > 0 {
            items.push(GatewayLineItem {
                name: format!("Delivery ({})", delivery_label(input.delivery_mode)),
                description: priced
                    .delivery_fee_breakdown
                    .as_ref()
                    .map(describe_breakdown),
                unit_amount_cents: priced.delivery_fee_cents,
                quantity: 1,
                currency: currency.clone(),
            });
        }

        if input.notification_requested && priced.notification_fee_cents > 0 {
            items.push(GatewayLineItem {
                name: "SMS notifications".to_string(),
                description: Some(format!(
                    "Order updates for {} seller(s)",
                    unique_seller_ids(input.lines).len()
                )),
                unit_amount_cents: priced.notification_fee_cents,
                quantity: 1,
                currency: currency.clone(),
            });
        }

        if priced.processor_fee_cents > 0 {
            items.push(GatewayLineItem {
                name: "Payment processing fee".to_string(),
                description: None,
                unit_amount_cents: priced.processor_fee_cents,
                quantity: 1,
                currency: currency.clone(),
            });
        }

        items
    }

    fn metadata(&self, input: &BuildSessionInput<'_>) -> Result<BTreeMap<String, String>, CheckoutError> {
        let max_len = self.settings.field_max_len;
        let priced = input.priced;
        let details = input.details;
        let mut metadata = BTreeMap::new();

        for (i, chunk) in pack_compact_items(input.lines, max_len)?
            .into_iter()
            .enumerate()
        {
            metadata.insert(format!("{COMPACT_ITEMS_PREFIX}{}", i + 1), chunk);
        }

        let mut put = |key: &str, value: String| {
            metadata.insert(key.to_string(), value);
        };

        put("buyerId", truncate(&details.buyer_id, max_len));
        put("deliveryMode", input.delivery_mode.as_str().to_string());
        for (key, value) in [
            ("address", &details.address),
            ("notes", &details.notes),
            ("pickupDate", &details.pickup_date),
            ("deliveryDate", &details.delivery_date),
            ("deliveryTime", &details.delivery_time),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                if value.chars().count() > max_len {
                    warn!(field = key, "Truncating metadata field");
                }
                put(key, truncate(value, max_len));
            }
        }

        put("productsTotalCents", priced.products_total_cents.to_string());
        put("deliveryFeeCents", priced.delivery_fee_cents.to_string());
        put("processorFeeCents", priced.processor_fee_cents.to_string());
        put("amountPaidCents", priced.grand_total_cents.to_string());
        put("subtotalCents", priced.subtotal_cents().to_string());
        put(
            "notificationRequested",
            input.notification_requested.to_string(),
        );
        put(
            "notificationFeeCents",
            priced.notification_fee_cents.to_string(),
        );

        if let Some(breakdown) = &priced.delivery_fee_breakdown {
            let json = serde_json::to_string(breakdown)
                .map_err(|e| CheckoutError::Internal(e.to_string()))?;
            put("deliveryFeeBreakdown", json);
        }
        if let Some(coordinates) = &details.coordinates {
            let json = serde_json::to_string(coordinates)
                .map_err(|e| CheckoutError::Internal(e.to_string()))?;
            put("coordinates", json);
        }

        if let Some((key, _)) = metadata.iter().find(|(_, v)| v.chars().count() > max_len) {
            return Err(CheckoutError::MetadataOverflow(format!(
                "field {key} exceeds {max_len} characters"
            )));
        }
        check_field_count(metadata.len())?;

        Ok(metadata)
    }
}

fn check_field_count(count: usize) -> Result<(), CheckoutError> {
    if count > METADATA_MAX_FIELDS {
        return Err(CheckoutError::MetadataOverflow(format!(
            "{count} metadata fields, at most {METADATA_MAX_FIELDS} allowed"
        )));
    }
    Ok(())
}

/// Compact form of one cart line.
pub fn encode_compact_line(line: &CartLine) -> String {
    format!(
        "{}{sep}{}{sep}{}{sep}{}",
        line.product_id,
        line.quantity,
        line.unit_price_cents,
        line.seller_id,
        sep = COMPACT_FIELD_SEPARATOR
    )
}

/// Greedily packs the compact lines into chunks of at most `max_len` characters.
pub fn pack_compact_items(lines: &[CartLine], max_len: usize) -> Result<Vec<String>, CheckoutError> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in lines {
        let encoded = encode_compact_line(line);
        let len = encoded.chars().count();
        if len > max_len {
            return Err(CheckoutError::MetadataOverflow(format!(
                "cart line for product {} does not fit into one metadata field",
                line.product_id
            )));
        }

        if current.is_empty() {
            current = encoded;
        } else if current.chars().count() + 1 + len <= max_len {
            current.push(COMPACT_LINE_SEPARATOR);
            current.push_str(&encoded);
        } else {
            chunks.push(std::mem::replace(&mut current, encoded));
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    Ok(chunks)
}

/// Restores the cart lines from the `items_compact_N` fields of a metadata map.
pub fn decode_compact_items(metadata: &BTreeMap<String, String>) -> Result<Vec<CartLine>, CheckoutError> {
    let mut chunks: Vec<(u32, &str)> = metadata
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(COMPACT_ITEMS_PREFIX)
                .and_then(|n| n.parse::<u32>().ok())
                .map(|n| (n, value.as_str()))
        })
        .collect();
    chunks.sort_by_key(|(n, _)| *n);

    chunks
        .iter()
        .flat_map(|(_, chunk)| chunk.split(COMPACT_LINE_SEPARATOR))
        .filter(|encoded| !encoded.is_empty())
        .map(decode_compact_line)
        .collect()
}

fn decode_compact_line(encoded: &str) -> Result<CartLine, CheckoutError> {
    let malformed = || CheckoutError::InvalidCart(format!("malformed compact item '{encoded}'"));

    let parts: Vec<&str> = encoded.split(COMPACT_FIELD_SEPARATOR).collect();
    let [product_id, quantity, unit_price_cents, seller_id] = parts.as_slice() else {
        return Err(malformed());
    };

    Ok(CartLine {
        product_id: product_id.to_string(),
        quantity: quantity.parse().map_err(|_| malformed())?,
        unit_price_cents: unit_price_cents.parse().map_err(|_| malformed())?,
        seller_id: seller_id.to_string(),
    })
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

fn delivery_label(mode: DeliveryMode) -> &'static str {
    match mode {
        DeliveryMode::Pickup => "pickup",
        DeliveryMode::Delivery => "courier",
        DeliveryMode::TeenDelivery => "teen courier",
        DeliveryMode::SellerDelivery => "seller delivery",
    }
}

fn format_cents(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

fn describe_breakdown(breakdown: &DeliveryFeeBreakdown) -> String {
    if breakdown.distance_km > 0.0 {
        format!(
            "Base {} + distance {} ({:.1} km)",
            format_cents(breakdown.base_fee_cents),
            format_cents(breakdown.distance_fee_cents),
            breakdown.distance_km
        )
    } else {
        format!("Flat rate {}", format_cents(breakdown.total_cents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::distance::Coordinates;
    use assert_matches::assert_matches;

    fn settings() -> SessionSettings {
        SessionSettings {
            currency: "eur".into(),
            field_max_len: METADATA_FIELD_MAX_LEN,
            payment_method_types: vec!["card".into()],
            success_url: "https://shop.test/ok?session_id={CHECKOUT_SESSION_ID}".into(),
            cancel_url: "https://shop.test/cart".into(),
        }
    }

    fn priced_delivery() -> PricedCart {
        PricedCart {
            products_total_cents: 1000,
            delivery_fee_cents: 770,
            delivery_fee_breakdown: Some(DeliveryFeeBreakdown::new(350, 420, 100)),
            notification_fee_cents: 15,
            processor_fee_cents: 52,
            grand_total_cents: 1837,
        }
    }

    fn details() -> OrderDetails {
        OrderDetails {
            buyer_id: "B1".into(),
            address: Some("Main St 1".into()),
            notes: None,
            pickup_date: None,
            delivery_date: Some("2025-03-01".into()),
            delivery_time: Some("14:00".into()),
            coordinates: Some(Coordinates::new(52.52, 13.405)),
        }
    }

    #[test]
    fn packs_without_splitting_lines() {
        let lines: Vec<CartLine> = (0..40)
            .map(|i| CartLine::new(format!("product-{i:04}"), 3, 1299, "seller-a"))
            .collect();
        let chunks = pack_compact_items(&lines, 100).unwrap();

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100);
            for encoded in chunk.split(';') {
                assert_eq!(encoded.split('|').count(), 4);
            }
        }
    }

    #[test]
    fn decodes_chunks_in_numeric_order() {
        let lines: Vec<CartLine> = (0..12)
            .map(|i| CartLine::new(format!("P{i}"), i + 1, 100 * i64::from(i), "S1"))
            .collect();
        // Small bound forces double-digit chunk numbers, which sort wrongly as strings.
        let metadata: BTreeMap<String, String> = pack_compact_items(&lines, 16)
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| (format!("{COMPACT_ITEMS_PREFIX}{}", i + 1), chunk))
            .collect();
        assert!(metadata.len() >= 10);

        assert_eq!(decode_compact_items(&metadata).unwrap(), lines);
    }

    #[test]
    fn oversized_single_line_is_rejected() {
        let line = CartLine::new("x".repeat(600), 1, 100, "S1");
        assert_matches!(
            pack_compact_items(&[line], METADATA_FIELD_MAX_LEN),
            Err(CheckoutError::MetadataOverflow(_))
        );
    }

    #[test]
    fn malformed_chunk_fails_to_decode() {
        let metadata: BTreeMap<String, String> =
            [("items_compact_1".to_string(), "P1|2|500".to_string())]
                .into_iter()
                .collect();
        assert_matches!(
            decode_compact_items(&metadata),
            Err(CheckoutError::InvalidCart(_))
        );
    }

    #[test]
    fn sellers_without_payouts_are_named() {
        let lines = vec![
            CartLine::new("P1", 1, 100, "S1"),
            CartLine::new("P2", 1, 100, "S2"),
            CartLine::new("P3", 1, 100, "S3"),
        ];
        let status: HashMap<String, bool> =
            [("S1".to_string(), true), ("S2".to_string(), false)]
                .into_iter()
                .collect();

        assert_matches!(
            CheckoutSessionBuilder::ensure_sellers_payable(&lines, &status),
            Err(CheckoutError::SellersNotPayable(sellers)) if sellers == vec!["S2", "S3"]
        );
    }

    #[test]
    fn builds_items_and_metadata() {
        let lines = vec![CartLine::new("P1", 2, 500, "S1")];
        let priced = priced_delivery();
        let products = HashMap::new();
        let details = details();
        let builder = CheckoutSessionBuilder::new(settings());

        let request = builder
            .build(&BuildSessionInput {
                lines: &lines,
                products: &products,
                priced: &priced,
                delivery_mode: DeliveryMode::Delivery,
                details: &details,
                notification_requested: true,
                client_reference_id: "ref-1",
            })
            .unwrap();

        let names: Vec<&str> = request.line_items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "P1",
                "Delivery (courier)",
                "SMS notifications",
                "Payment processing fee"
            ]
        );
        assert_eq!(
            request.line_items[1].description.as_deref(),
            Some("Base 3.50 + distance 4.20 (10.0 km)")
        );

        let m = &request.metadata;
        assert_eq!(m["items_compact_1"], "P1|2|500|S1");
        assert_eq!(m["deliveryMode"], "DELIVERY");
        assert_eq!(m["amountPaidCents"], "1837");
        assert_eq!(m["subtotalCents"], "1785");
        assert_eq!(m["notificationRequested"], "true");
        assert_eq!(m["coordinates"], r#"{"lat":52.52,"lng":13.405}"#);
        assert!(m["deliveryFeeBreakdown"].contains("\"courierShareCents\":616"));
        assert!(!m.contains_key("notes"));
        assert_eq!(request.client_reference_id, "ref-1");
    }

    #[test]
    fn long_notes_are_truncated() {
        let lines = vec![CartLine::new("P1", 1, 1000, "S1")];
        let priced = PricedCart {
            products_total_cents: 1000,
            delivery_fee_cents: 0,
            delivery_fee_breakdown: None,
            notification_fee_cents: 0,
            processor_fee_cents: 0,
            grand_total_cents: 1000,
        };
        let details = OrderDetails {
            buyer_id: "B1".into(),
            notes: Some("é".repeat(800)),
            ..OrderDetails::default()
        };
        let products = HashMap::new();

        let request = CheckoutSessionBuilder::new(settings())
            .build(&BuildSessionInput {
                lines: &lines,
                products: &products,
                priced: &priced,
                delivery_mode: DeliveryMode::Pickup,
                details: &details,
                notification_requested: false,
                client_reference_id: "ref-2",
            })
            .unwrap();

        assert_eq!(request.metadata["notes"].chars().count(), METADATA_FIELD_MAX_LEN);
        assert_eq!(request.line_items.len(), 1);
        assert!(!request.metadata.contains_key("deliveryFeeBreakdown"));
    }

    #[test]
    fn too_many_chunks_overflow() {
        let builder = CheckoutSessionBuilder::new(SessionSettings {
            field_max_len: 20,
            ..settings()
        });
        let lines: Vec<CartLine> = (0..60)
            .map(|i| CartLine::new(format!("P{i:03}"), 1, 100, "S1"))
            .collect();

        assert_matches!(
            builder.ensure_metadata_fits(&lines),
            Err(CheckoutError::MetadataOverflow(_))
        );
    }
}
