//! Pricing Engine
//!
//! Turns a cart, a delivery mode and the buyer/seller locations into a
//! [`PricedCart`]. All amounts are integer cents; distances enter the fee
//! arithmetic as whole tenths of a kilometre.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::config::AppConfig;
use crate::errors::CheckoutError;
use crate::models::{CartLine, DeliveryMode};
use crate::services::distance::{to_tenths_km, Coordinates, DistanceProvider, HaversineDistance};

/// Above this distance (exclusive, in tenths of a km) the long-distance tier applies
pub const LONG_DISTANCE_THRESHOLD_TENTHS: i64 = 300;

/// Courier share of the delivery fee, in percent
pub const COURIER_SHARE_PERCENT: i64 = 80;

/// A delivery fee tier: a base fee covering the first kilometres plus a per-km rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeTier {
    pub base_fee_cents: i64,
    /// Distance covered by the base fee, in tenths of a km
    pub included_tenths_km: i64,
    pub per_km_cents: i64,
}

/// Platform courier network (delivery and teen delivery)
pub const COURIER_TIER: FeeTier = FeeTier {
    base_fee_cents: 350,
    included_tenths_km: 30,
    per_km_cents: 60,
};

/// Seller organises the delivery
pub const SELLER_DELIVERY_TIER: FeeTier = FeeTier {
    base_fee_cents: 250,
    included_tenths_km: 30,
    per_km_cents: 40,
};

/// Any delivery mode beyond 30 km
pub const LONG_DISTANCE_TIER: FeeTier = FeeTier {
    base_fee_cents: 2000,
    included_tenths_km: LONG_DISTANCE_THRESHOLD_TENTHS,
    per_km_cents: 75,
};

impl FeeTier {
    /// Per-km part of the fee for a distance, rounded half-up to the cent.
    pub fn distance_fee_cents(&self, distance_tenths_km: i64) -> i64 {
        let billable = (distance_tenths_km - self.included_tenths_km).max(0);
        (self.per_km_cents * billable + 5) / 10
    }
}

/// Picks the tier for a delivery mode and distance. Exactly 30.0 km is still standard.
pub fn tier_for(mode: DeliveryMode, distance_tenths_km: i64) -> FeeTier {
    if distance_tenths_km > LONG_DISTANCE_THRESHOLD_TENTHS {
        LONG_DISTANCE_TIER
    } else if mode == DeliveryMode::SellerDelivery {
        SELLER_DELIVERY_TIER
    } else {
        COURIER_TIER
    }
}

/// How the delivery fee was composed and how it is shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFeeBreakdown {
    pub base_fee_cents: i64,
    pub distance_fee_cents: i64,
    pub total_cents: i64,
    pub courier_share_cents: i64,
    pub platform_share_cents: i64,
    pub distance_km: f64,
}

impl DeliveryFeeBreakdown {
    pub fn new(base_fee_cents: i64, distance_fee_cents: i64, distance_tenths_km: i64) -> Self {
        let total_cents = base_fee_cents + distance_fee_cents;
        let (courier_share_cents, platform_share_cents) = split_delivery_fee(total_cents);
        Self {
            base_fee_cents,
            distance_fee_cents,
            total_cents,
            courier_share_cents,
            platform_share_cents,
            distance_km: distance_tenths_km as f64 / 10.0,
        }
    }
}

/// Splits a delivery fee; the courier share is rounded, the platform keeps the remainder.
pub fn split_delivery_fee(total_cents: i64) -> (i64, i64) {
    let courier = (total_cents * COURIER_SHARE_PERCENT + 50) / 100;
    (courier, total_cents - courier)
}

/// Fully priced cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedCart {
    pub products_total_cents: i64,
    pub delivery_fee_cents: i64,
    pub delivery_fee_breakdown: Option<DeliveryFeeBreakdown>,
    pub notification_fee_cents: i64,
    pub processor_fee_cents: i64,
    pub grand_total_cents: i64,
}

impl PricedCart {
    /// Everything except the processor surcharge; the base the surcharge is computed on.
    pub fn subtotal_cents(&self) -> i64 {
        self.products_total_cents + self.delivery_fee_cents + self.notification_fee_cents
    }
}

/// Payment-processor surcharge policy.
pub trait ProcessorFeeSchedule: Send + Sync {
    fn fee_for(&self, subtotal_cents: i64) -> i64;
}

/// Proportional fee in basis points plus a fixed amount, rounded half-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PercentagePlusFixed {
    pub basis_points: i64,
    pub fixed_cents: i64,
}

impl ProcessorFeeSchedule for PercentagePlusFixed {
    fn fee_for(&self, subtotal_cents: i64) -> i64 {
        if subtotal_cents <= 0 {
            return 0;
        }
        // i128 intermediate, saturating at i64::MAX
        let fee = (i128::from(subtotal_cents) * i128::from(self.basis_points) + 5_000) / 10_000
            + i128::from(self.fixed_cents);
        i64::try_from(fee).unwrap_or(i64::MAX)
    }
}

#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub sms_fee_cents_per_seller: i64,
    pub fallback_delivery_fee_cents: i64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            sms_fee_cents_per_seller: 15,
            fallback_delivery_fee_cents: 499,
        }
    }
}

impl From<&AppConfig> for PricingConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            sms_fee_cents_per_seller: cfg.sms_fee_cents_per_seller,
            fallback_delivery_fee_cents: cfg.fallback_delivery_fee_cents,
        }
    }
}

/// Everything pricing needs to know about one checkout attempt.
#[derive(Debug, Clone)]
pub struct PricingInput<'a> {
    pub lines: &'a [CartLine],
    pub delivery_mode: DeliveryMode,
    /// Pickup location per seller id; `None` when the seller has no location on file
    pub seller_coordinates: &'a HashMap<String, Option<Coordinates>>,
    pub buyer_coordinates: Option<Coordinates>,
    pub notification_requested: bool,
    pub unique_seller_count: usize,
}

#[derive(Clone)]
pub struct PricingEngine {
    config: PricingConfig,
    distance: Arc<dyn DistanceProvider>,
    processor_fees: Arc<dyn ProcessorFeeSchedule>,
}

impl PricingEngine {
    pub fn new(
        config: PricingConfig,
        distance: Arc<dyn DistanceProvider>,
        processor_fees: Arc<dyn ProcessorFeeSchedule>,
    ) -> Self {
        Self {
            config,
            distance,
            processor_fees,
        }
    }

    /// Engine with haversine distances and the configured percentage-plus-fixed surcharge.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.into(),
            Arc::new(HaversineDistance),
            Arc::new(PercentagePlusFixed {
                basis_points: cfg.processor_fee_basis_points,
                fixed_cents: cfg.processor_fee_fixed_cents,
            }),
        )
    }

    #[instrument(skip(self, input), fields(mode = %input.delivery_mode, lines = input.lines.len()))]
    pub fn price(&self, input: &PricingInput<'_>) -> Result<PricedCart, CheckoutError> {
        let products_total_cents = input.lines.iter().try_fold(0i64, |acc, line| {
            line.line_total_cents()
                .and_then(|total| acc.checked_add(total))
                .ok_or_else(|| CheckoutError::InvalidCart("cart total overflows".to_string()))
        })?;

        let delivery_fee_breakdown = if input.delivery_mode.is_delivery() {
            Some(self.delivery_fee(input))
        } else {
            None
        };
        let delivery_fee_cents = delivery_fee_breakdown
            .as_ref()
            .map_or(0, |breakdown| breakdown.total_cents);

        let overflow = || CheckoutError::InvalidCart("cart total overflows".to_string());

        let notification_fee_cents = if input.notification_requested {
            i64::try_from(input.unique_seller_count)
                .ok()
                .and_then(|sellers| self.config.sms_fee_cents_per_seller.checked_mul(sellers))
                .ok_or_else(overflow)?
        } else {
            0
        };

        let subtotal = products_total_cents
            .checked_add(delivery_fee_cents)
            .and_then(|total| total.checked_add(notification_fee_cents))
            .ok_or_else(overflow)?;
        let processor_fee_cents = self.processor_fees.fee_for(subtotal);
        let grand_total_cents = subtotal
            .checked_add(processor_fee_cents)
            .ok_or_else(overflow)?;

        let priced = PricedCart {
            products_total_cents,
            delivery_fee_cents,
            delivery_fee_breakdown,
            notification_fee_cents,
            processor_fee_cents,
            grand_total_cents,
        };

        debug!(grand_total_cents = priced.grand_total_cents, "Priced cart");
        Ok(priced)
    }

    fn delivery_fee(&self, input: &PricingInput<'_>) -> DeliveryFeeBreakdown {
        let Some(tenths) = self.max_distance_tenths(input) else {
            warn!(
                fallback_fee_cents = self.config.fallback_delivery_fee_cents,
                "Coordinates unavailable, using fallback delivery fee"
            );
            return DeliveryFeeBreakdown::new(self.config.fallback_delivery_fee_cents, 0, 0);
        };

        let tier = tier_for(input.delivery_mode, tenths);
        DeliveryFeeBreakdown::new(tier.base_fee_cents, tier.distance_fee_cents(tenths), tenths)
    }

    /// Farthest seller in the cart from the buyer, in tenths of a km.
    fn max_distance_tenths(&self, input: &PricingInput<'_>) -> Option<i64> {
        let buyer = input.buyer_coordinates?;

        let mut farthest: Option<f64> = None;
        for seller_id in crate::models::unique_seller_ids(input.lines) {
            match input.seller_coordinates.get(seller_id).copied().flatten() {
                Some(seller) => {
                    let km = self.distance.distance_km(&seller, &buyer);
                    farthest = Some(farthest.map_or(km, |current| current.max(km)));
                }
                None => warn!(seller_id, "Seller has no pickup coordinates"),
            }
        }

        farthest.map(to_tenths_km)
    }
}
