//! Payment-processor port: a thin async interface over the external payment
//! gateway plus the webhook signature check. The rest of the crate only
//! talks to [`PaymentGateway`]; the concrete Stripe client lives in
//! [`stripe`].

pub mod metadata;
pub mod stripe;
pub mod webhook;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The webhook signature did not verify. Never retried.
    #[error("Webhook signature verification failed")]
    Signature,

    /// The processor accepted the connection but rejected the call.
    #[error("Gateway rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    /// Network-level failure talking to the processor. Safe to retry.
    #[error("Gateway transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Transport(e.to_string())
    }
}

/// Result of creating a payment intent.
#[derive(Debug, Clone)]
pub struct CreatedIntent {
    pub intent_id: String,
    pub client_secret: String,
}

/// Point-in-time view of a payment intent as reported by the processor.
#[derive(Debug, Clone)]
pub struct IntentSnapshot {
    pub id: String,
    /// Charged (or to-be-charged) amount in minor units, e.g. cents.
    pub amount_minor: i64,
    pub currency: String,
    /// Processor-side status string, e.g. "succeeded".
    pub status: String,
    pub metadata: BTreeMap<String, String>,
}

/// Shipping destination pushed onto an intent before the charge.
#[derive(Debug, Clone, Default)]
pub struct ShippingDetails {
    pub name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    pub phone: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<CreatedIntent, GatewayError>;

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentSnapshot, GatewayError>;

    /// Merge `metadata` into the intent's existing metadata. Keys not named
    /// here are left untouched by the processor.
    async fn update_metadata(
        &self,
        intent_id: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), GatewayError>;

    async fn update_shipping(
        &self,
        intent_id: &str,
        shipping: &ShippingDetails,
    ) -> Result<(), GatewayError>;
}
