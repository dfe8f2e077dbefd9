//! Webhook signature verification and event parsing.
//!
//! The processor signs each delivery with `Stripe-Signature:
//! t=<unix>,v1=<hex hmac>` where the HMAC-SHA256 is computed over
//! `"{t}.{raw body}"` with the shared webhook secret. Deliveries older than
//! the replay tolerance are rejected even when the signature matches.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::{GatewayError, IntentSnapshot};

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age of a delivery, in seconds.
pub const REPLAY_TOLERANCE_SECS: i64 = 300;

pub const EVENT_PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const EVENT_PAYMENT_FAILED: &str = "payment_intent.payment_failed";

#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub event_type: String,
    pub intent: IntentSnapshot,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: RawIntent,
}

#[derive(Deserialize)]
struct RawIntent {
    id: String,
    amount: i64,
    currency: String,
    status: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

/// Verify the signature header against `payload` and parse the event.
/// Every failure mode collapses to [`GatewayError::Signature`]; callers
/// must not leak which check failed.
pub fn verify_event(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
) -> Result<WebhookEvent, GatewayError> {
    verify_event_at(payload, signature_header, secret, chrono::Utc::now().timestamp())
}

fn verify_event_at(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    now_unix: i64,
) -> Result<WebhookEvent, GatewayError> {
    let (timestamp, signature) = parse_header(signature_header)?;

    if now_unix - timestamp > REPLAY_TOLERANCE_SECS {
        return Err(GatewayError::Signature);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| GatewayError::Signature)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let expected = hex::decode(signature).map_err(|_| GatewayError::Signature)?;
    mac.verify_slice(&expected).map_err(|_| GatewayError::Signature)?;

    let raw: RawEvent =
        serde_json::from_slice(payload).map_err(|_| GatewayError::Signature)?;
    Ok(WebhookEvent {
        event_type: raw.event_type,
        intent: IntentSnapshot {
            id: raw.data.object.id,
            amount_minor: raw.data.object.amount,
            currency: raw.data.object.currency,
            status: raw.data.object.status,
            metadata: raw.data.object.metadata,
        },
    })
}

fn parse_header(header: &str) -> Result<(i64, &str), GatewayError> {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
            Some(("v1", v)) => signature = Some(v),
            _ => {}
        }
    }
    match (timestamp, signature) {
        (Some(t), Some(s)) => Ok((t, s)),
        _ => Err(GatewayError::Signature),
    }
}
