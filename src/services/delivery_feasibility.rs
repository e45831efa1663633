//! Delivery Feasibility Gate
//!
//! Asks the courier availability service whether a delivery slot can be
//! served. Infrastructure failures degrade to [`FeasibilityVerdict::Unknown`]
//! so that an unreachable service never blocks checkout.

use async_trait::async_trait;
use metrics::counter;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::retry::{with_retry, AlwaysRetry, RetryConfig};
use crate::services::distance::Coordinates;

#[derive(Debug, thiserror::Error)]
pub enum AvailabilityError {
    #[error("availability request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("availability service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("availability response could not be decoded: {0}")]
    Decode(String),
}

/// Body posted to the availability service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    pub is_available: bool,
    #[serde(default)]
    pub available_count: u32,
    /// Minutes until delivery
    #[serde(default)]
    pub estimated_delivery_time: Option<u32>,
}

#[async_trait]
pub trait DeliveryAvailability: Send + Sync {
    async fn check(&self, query: &AvailabilityQuery)
        -> Result<AvailabilityResponse, AvailabilityError>;
}

/// Result of the gate, consumed by the checkout pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeasibilityVerdict {
    Available {
        #[serde(rename = "availableCourierCount")]
        available_courier_count: u32,
        #[serde(rename = "estimatedMinutes")]
        estimated_minutes: Option<u32>,
    },
    Unavailable,
    Unknown {
        reason: String,
    },
}

impl FeasibilityVerdict {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, FeasibilityVerdict::Unavailable)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, FeasibilityVerdict::Unknown { .. })
    }
}

/// JSON client for the courier availability endpoint.
#[derive(Clone)]
pub struct HttpDeliveryAvailability {
    client: Client,
    endpoint: String,
}

impl HttpDeliveryAvailability {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, AvailabilityError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(endpoint, client))
    }

    pub fn with_client(endpoint: impl Into<String>, client: Client) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl DeliveryAvailability for HttpDeliveryAvailability {
    async fn check(
        &self,
        query: &AvailabilityQuery,
    ) -> Result<AvailabilityResponse, AvailabilityError> {
        let response = self.client.post(&self.endpoint).json(query).send().await?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(AvailabilityError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        serde_json::from_slice(&body).map_err(|e| AvailabilityError::Decode(e.to_string()))
    }
}

#[derive(Clone)]
pub struct DeliveryFeasibilityGate {
    availability: Option<Arc<dyn DeliveryAvailability>>,
    retry: RetryConfig,
}

impl DeliveryFeasibilityGate {
    pub fn new(availability: Arc<dyn DeliveryAvailability>) -> Self {
        Self {
            availability: Some(availability),
            retry: RetryConfig::single_retry(),
        }
    }

    /// Gate without a backing service; every check reports `Unknown`.
    pub fn unconfigured() -> Self {
        Self {
            availability: None,
            retry: RetryConfig::single_retry(),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[instrument(skip(self))]
    pub async fn check_feasible(
        &self,
        buyer: Coordinates,
        delivery_date: Option<&str>,
        delivery_time: Option<&str>,
    ) -> FeasibilityVerdict {
        let Some(availability) = &self.availability else {
            counter!("checkout.feasibility.unknown", 1);
            return FeasibilityVerdict::Unknown {
                reason: "availability service not configured".to_string(),
            };
        };

        let query = AvailabilityQuery {
            lat: buyer.latitude,
            lng: buyer.longitude,
            delivery_date: delivery_date.map(str::to_string),
            delivery_time: delivery_time.map(str::to_string),
        };

        match with_retry(&self.retry, AlwaysRetry, || availability.check(&query)).await {
            Ok(response) if response.is_available => {
                info!(
                    couriers = response.available_count,
                    eta_minutes = ?response.estimated_delivery_time,
                    "Delivery capacity available"
                );
                FeasibilityVerdict::Available {
                    available_courier_count: response.available_count,
                    estimated_minutes: response.estimated_delivery_time,
                }
            }
            Ok(_) => {
                info!("No delivery capacity for requested slot");
                FeasibilityVerdict::Unavailable
            }
            Err(e) => {
                counter!("checkout.feasibility.unknown", 1);
                warn!(error = %e, "Delivery availability unreachable, proceeding without check");
                FeasibilityVerdict::Unknown {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_gate(endpoint: String) -> DeliveryFeasibilityGate {
        let client = HttpDeliveryAvailability::new(endpoint, Duration::from_secs(2)).unwrap();
        DeliveryFeasibilityGate::new(Arc::new(client)).with_retry_config(RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            ..RetryConfig::default()
        })
    }

    fn buyer() -> Coordinates {
        Coordinates::new(52.52, 13.405)
    }

    #[tokio::test]
    async fn available_slot_reports_capacity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/availability"))
            .and(body_json(json!({
                "lat": 52.52,
                "lng": 13.405,
                "deliveryDate": "2025-03-01",
                "deliveryTime": "14:00"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isAvailable": true,
                "availableCount": 3,
                "estimatedDeliveryTime": 35
            })))
            .expect(1)
            .mount(&server)
            .await;

        let verdict = fast_gate(format!("{}/availability", server.uri()))
            .check_feasible(buyer(), Some("2025-03-01"), Some("14:00"))
            .await;

        assert_eq!(
            verdict,
            FeasibilityVerdict::Available {
                available_courier_count: 3,
                estimated_minutes: Some(35)
            }
        );
    }

    #[tokio::test]
    async fn explicit_rejection_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isAvailable": false,
                "availableCount": 0
            })))
            .expect(1)
            .mount(&server)
            .await;

        let verdict = fast_gate(server.uri()).check_feasible(buyer(), None, None).await;
        assert!(verdict.is_unavailable());
    }

    #[tokio::test]
    async fn server_errors_are_retried_once_then_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let verdict = fast_gate(server.uri()).check_feasible(buyer(), None, None).await;
        assert!(verdict.is_unknown());
    }

    #[tokio::test]
    async fn undecodable_body_is_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let verdict = fast_gate(server.uri()).check_feasible(buyer(), None, None).await;
        assert!(verdict.is_unknown());
    }

    #[tokio::test]
    async fn unconfigured_gate_is_unknown() {
        let verdict = DeliveryFeasibilityGate::unconfigured()
            .check_feasible(buyer(), None, None)
            .await;
        assert_matches::assert_matches!(verdict, FeasibilityVerdict::Unknown { .. });
    }
}
