//! Checkout pipeline.
//!
//! One pass per attempt: validate, payout precondition, reserve, price,
//! feasibility, gateway session. Once stock is reserved every failure
//! cancels the reservations of the attempt before it is returned.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::entities::product;
use crate::errors::CheckoutError;
use crate::models::{unique_seller_ids, validate_cart, CartLine, DeliveryMode, OrderDetails};
use crate::services::checkout_session::{BuildSessionInput, CheckoutSessionBuilder};
use crate::services::delivery_feasibility::{DeliveryFeasibilityGate, FeasibilityVerdict};
use crate::services::distance::Coordinates;
use crate::services::payment_gateway::PaymentGateway;
use crate::services::pricing::{PricedCart, PricingEngine, PricingInput};
use crate::services::seller_payouts::PayoutDirectory;
use crate::services::stock_reservation::StockReservationService;

/// A buyer's request to pay for a cart.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[validate(length(min = 1, max = 500))]
    pub lines: Vec<CartLine>,
    pub delivery_mode: DeliveryMode,
    #[serde(flatten)]
    #[validate]
    pub details: OrderDetails,
    #[serde(default)]
    pub notification_requested: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutOutcome {
    pub session_id: String,
    pub checkout_url: String,
    /// Reference the reservations were created under, sent to the gateway as `client_reference_id`
    pub client_reference_id: String,
    pub priced: PricedCart,
    pub reserved_lines: usize,
    pub reservations_expire_at: DateTime<Utc>,
    /// Courier capacity check result, `None` when the mode needs no check
    pub feasibility: Option<FeasibilityVerdict>,
    pub feasibility_unknown: bool,
}

#[derive(Clone)]
pub struct CheckoutEngine {
    reservations: StockReservationService,
    pricing: PricingEngine,
    sessions: CheckoutSessionBuilder,
    feasibility: DeliveryFeasibilityGate,
    payouts: Arc<dyn PayoutDirectory>,
    gateway: Arc<dyn PaymentGateway>,
}

impl CheckoutEngine {
    pub fn new(
        reservations: StockReservationService,
        pricing: PricingEngine,
        sessions: CheckoutSessionBuilder,
        feasibility: DeliveryFeasibilityGate,
        payouts: Arc<dyn PayoutDirectory>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            reservations,
            pricing,
            sessions,
            feasibility,
            payouts,
            gateway,
        }
    }

    pub fn reservations(&self) -> &StockReservationService {
        &self.reservations
    }

    #[instrument(
        skip(self, request),
        fields(buyer_id = %request.details.buyer_id, mode = %request.delivery_mode)
    )]
    pub async fn create_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        request
            .validate()
            .map_err(|e| CheckoutError::InvalidCart(e.to_string()))?;
        validate_cart(&request.lines)?;
        self.sessions.ensure_metadata_fits(&request.lines)?;

        let seller_ids: Vec<String> = unique_seller_ids(&request.lines)
            .into_iter()
            .map(str::to_string)
            .collect();
        let payout_status = self.payouts.payout_status(&seller_ids).await?;
        CheckoutSessionBuilder::ensure_sellers_payable(&request.lines, &payout_status)?;

        let buyer_coordinates = request.details.coordinates;
        if request.delivery_mode.is_delivery() && buyer_coordinates.is_none() {
            return Err(CheckoutError::DeliveryCoordinatesRequired);
        }

        let client_reference_id = Uuid::new_v4().to_string();
        let reserved = self
            .reservations
            .check_and_reserve(&request.lines, &client_reference_id)
            .await?;
        let reservations_expire_at = reserved
            .reservations
            .iter()
            .map(|r| r.expires_at)
            .min()
            .unwrap_or_else(Utc::now);

        let seller_coordinates = seller_coordinates(&request.lines, &reserved.products);
        let priced = match self.pricing.price(&PricingInput {
            lines: &request.lines,
            delivery_mode: request.delivery_mode,
            seller_coordinates: &seller_coordinates,
            buyer_coordinates,
            notification_requested: request.notification_requested,
            unique_seller_count: seller_ids.len(),
        }) {
            Ok(priced) => priced,
            Err(e) => return Err(self.compensate(&client_reference_id, e).await),
        };

        let feasibility = match (request.delivery_mode.uses_courier_network(), buyer_coordinates) {
            (true, Some(buyer)) => Some(
                self.feasibility
                    .check_feasible(
                        buyer,
                        request.details.delivery_date.as_deref(),
                        request.details.delivery_time.as_deref(),
                    )
                    .await,
            ),
            _ => None,
        };
        if feasibility.as_ref().is_some_and(FeasibilityVerdict::is_unavailable) {
            return Err(self
                .compensate(&client_reference_id, CheckoutError::DeliveryUnavailable)
                .await);
        }
        let feasibility_unknown = feasibility
            .as_ref()
            .is_some_and(FeasibilityVerdict::is_unknown);

        let session_request = match self.sessions.build(&BuildSessionInput {
            lines: &request.lines,
            products: &reserved.products,
            priced: &priced,
            delivery_mode: request.delivery_mode,
            details: &request.details,
            notification_requested: request.notification_requested,
            client_reference_id: &client_reference_id,
        }) {
            Ok(session_request) => session_request,
            Err(e) => return Err(self.compensate(&client_reference_id, e).await),
        };

        let session = match self.gateway.create_checkout_session(&session_request).await {
            Ok(session) => session,
            Err(e) => {
                counter!("checkout.gateway.failures", 1);
                error!(
                    client_reference_id = %client_reference_id,
                    error = %e,
                    "Gateway session creation failed"
                );
                return Err(self
                    .compensate(
                        &client_reference_id,
                        CheckoutError::GatewaySessionFailed(e.to_string()),
                    )
                    .await);
            }
        };

        // Rows stay findable by client_reference_id if this fails.
        if let Err(e) = self
            .reservations
            .rebind_session(&client_reference_id, &session.id)
            .await
        {
            error!(
                client_reference_id = %client_reference_id,
                session_id = %session.id,
                error = %e,
                "Failed to bind reservations to gateway session"
            );
        }

        info!(
            session_id = %session.id,
            grand_total_cents = priced.grand_total_cents,
            feasibility_unknown,
            "Checkout session created"
        );

        Ok(CheckoutOutcome {
            session_id: session.id,
            checkout_url: session.url,
            client_reference_id,
            priced,
            reserved_lines: reserved.reservations.len(),
            reservations_expire_at,
            feasibility,
            feasibility_unknown,
        })
    }

    /// Cancels the reservations of the attempt and hands back the original error.
    async fn compensate(&self, client_reference_id: &str, cause: CheckoutError) -> CheckoutError {
        match self.reservations.cancel_for_session(client_reference_id).await {
            Ok(cancelled) => {
                warn!(client_reference_id, cancelled, error = %cause, "Checkout aborted after reservation");
            }
            Err(e) => {
                // Rows expire on their own; nothing else to do.
                error!(client_reference_id, error = %e, "Failed to cancel reservations");
            }
        }
        cause
    }
}

/// Pickup location per seller, taken from the reserved products.
fn seller_coordinates(
    lines: &[CartLine],
    products: &HashMap<String, product::Model>,
) -> HashMap<String, Option<Coordinates>> {
    let mut coordinates: HashMap<String, Option<Coordinates>> = HashMap::new();
    for line in lines {
        let found = products
            .get(&line.product_id)
            .and_then(product::Model::seller_coordinates);
        let entry = coordinates.entry(line.seller_id.clone()).or_insert(None);
        if entry.is_none() {
            *entry = found;
        }
    }
    coordinates
}
