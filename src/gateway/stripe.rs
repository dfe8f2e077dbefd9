//! Stripe implementation of [`PaymentGateway`]. Talks to the PaymentIntents
//! REST API with form-encoded bodies and bearer auth.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{CreatedIntent, GatewayError, IntentSnapshot, PaymentGateway, ShippingDetails};

const DEFAULT_BASE_URL: &str = "https://api.stripe.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct StripeGateway {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Deserialize)]
struct StripeIntent {
    id: String,
    amount: i64,
    currency: String,
    status: String,
    client_secret: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: String,
}

impl StripeGateway {
    pub fn new(api_key: String) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point the client at a different host. Used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn intents_url(&self, suffix: &str) -> String {
        format!("{}/v1/payment_intents{}", self.base_url, suffix)
    }

    async fn parse_intent(&self, resp: reqwest::Response) -> Result<StripeIntent, GatewayError> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp.json::<StripeIntent>().await?)
        } else {
            let message = resp
                .json::<StripeErrorBody>()
                .await
                .map(|b| b.error.message)
                .unwrap_or_default();
            Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

fn metadata_params(metadata: &BTreeMap<String, String>) -> Vec<(String, String)> {
    metadata
        .iter()
        .map(|(k, v)| (format!("metadata[{k}]"), v.clone()))
        .collect()
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<CreatedIntent, GatewayError> {
        let mut params = vec![
            ("amount".to_string(), amount_minor.to_string()),
            ("currency".to_string(), currency.to_string()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        params.extend(metadata_params(&metadata));

        let resp = self
            .http
            .post(self.intents_url(""))
            .bearer_auth(&self.api_key)
            .form(&params)
            .send()
            .await?;
        let intent = self.parse_intent(resp).await?;

        let client_secret = intent.client_secret.ok_or_else(|| GatewayError::Api {
            status: 200,
            message: "intent response missing client_secret".to_string(),
        })?;
        Ok(CreatedIntent {
            intent_id: intent.id,
            client_secret,
        })
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<IntentSnapshot, GatewayError> {
        let resp = self
            .http
            .get(self.intents_url(&format!("/{intent_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let intent = self.parse_intent(resp).await?;
        Ok(IntentSnapshot {
            id: intent.id,
            amount_minor: intent.amount,
            currency: intent.currency,
            status: intent.status,
            metadata: intent.metadata,
        })
    }

    async fn update_metadata(
        &self,
        intent_id: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), GatewayError> {
        let resp = self
            .http
            .post(self.intents_url(&format!("/{intent_id}")))
            .bearer_auth(&self.api_key)
            .form(&metadata_params(&metadata))
            .send()
            .await?;
        self.parse_intent(resp).await?;
        Ok(())
    }

    async fn update_shipping(
        &self,
        intent_id: &str,
        shipping: &ShippingDetails,
    ) -> Result<(), GatewayError> {
        let mut params = vec![
            ("shipping[name]".to_string(), shipping.name.clone()),
            (
                "shipping[address][line1]".to_string(),
                shipping.line1.clone(),
            ),
            ("shipping[address][city]".to_string(), shipping.city.clone()),
            (
                "shipping[address][postal_code]".to_string(),
                shipping.postal_code.clone(),
            ),
            (
                "shipping[address][country]".to_string(),
                shipping.country.clone(),
            ),
        ];
        if let Some(line2) = &shipping.line2 {
            params.push(("shipping[address][line2]".to_string(), line2.clone()));
        }
        if let Some(state) = &shipping.state {
            params.push(("shipping[address][state]".to_string(), state.clone()));
        }
        if let Some(phone) = &shipping.phone {
            params.push(("shipping[phone]".to_string(), phone.clone()));
        }

        let resp = self
            .http
            .post(self.intents_url(&format!("/{intent_id}")))
            .bearer_auth(&self.api_key)
            .form(&params)
            .send()
            .await?;
        self.parse_intent(resp).await?;
        Ok(())
    }
}
