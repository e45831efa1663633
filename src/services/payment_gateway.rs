//! Payment gateway client.
//!
//! The gateway hosts the payment page. Session creation is not idempotent and
//! is never retried here; callers compensate on failure instead.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway rejected the session with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("gateway response could not be decoded: {0}")]
    Decode(String),

    #[error("gateway is not configured: {0}")]
    NotConfigured(String),
}

/// One priced row on the hosted payment page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayLineItem {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub unit_amount_cents: i64,
    pub quantity: i32,
    pub currency: String,
}

/// Everything the gateway needs to open a hosted checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionRequest {
    pub line_items: Vec<GatewayLineItem>,
    /// Flat string map, bounded in field count and field length
    pub metadata: BTreeMap<String, String>,
    pub payment_method_types: Vec<String>,
    pub success_url: String,
    pub cancel_url: String,
    /// Correlates the session with the reservations made before it existed
    pub client_reference_id: String,
}

impl CheckoutSessionRequest {
    pub fn total_cents(&self) -> i64 {
        self.line_items
            .iter()
            .map(|item| item.unit_amount_cents * i64::from(item.quantity))
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<GatewaySession, GatewayError>;
}

/// Form-encoded client for a Stripe-compatible `checkout/sessions` endpoint.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    api_base: String,
    secret_key: String,
}

impl HttpPaymentGateway {
    pub fn new(
        api_base: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(api_base, secret_key, client))
    }

    pub fn with_client(
        api_base: impl Into<String>,
        secret_key: impl Into<String>,
        client: Client,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            secret_key: secret_key.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/checkout/sessions", self.api_base.trim_end_matches('/'))
    }
}

/// Flattens a session request into the gateway's bracketed form fields.
pub fn form_fields(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
    let mut fields = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        (
            "client_reference_id".to_string(),
            request.client_reference_id.clone(),
        ),
    ];

    for (i, method) in request.payment_method_types.iter().enumerate() {
        fields.push((format!("payment_method_types[{i}]"), method.clone()));
    }

    for (i, item) in request.line_items.iter().enumerate() {
        let prefix = format!("line_items[{i}]");
        fields.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
        fields.push((
            format!("{prefix}[price_data][currency]"),
            item.currency.clone(),
        ));
        fields.push((
            format!("{prefix}[price_data][unit_amount]"),
            item.unit_amount_cents.to_string(),
        ));
        fields.push((
            format!("{prefix}[price_data][product_data][name]"),
            item.name.clone(),
        ));
        if let Some(description) = &item.description {
            fields.push((
                format!("{prefix}[price_data][product_data][description]"),
                description.clone(),
            ));
        }
    }

    for (key, value) in &request.metadata {
        fields.push((format!("metadata[{key}]"), value.clone()));
    }

    fields
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(client_reference_id = %request.client_reference_id))]
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<GatewaySession, GatewayError> {
        if self.secret_key.is_empty() {
            return Err(GatewayError::NotConfigured(
                "missing gateway secret key".to_string(),
            ));
        }

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.secret_key)
            .form(&form_fields(request))
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let session: GatewaySession =
            serde_json::from_slice(&body).map_err(|e| GatewayError::Decode(e.to_string()))?;
        debug!(session_id = %session.id, "Gateway session created");
        Ok(session)
    }
}
