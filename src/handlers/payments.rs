use actix_web::cookie::time::Duration as CookieDuration;
use actix_web::cookie::{Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::DbPool;
use crate::errors::AppError;
use crate::gateway::metadata::{IntentMetadata, MetaCartLine};
use crate::gateway::webhook::{
    verify_event, EVENT_PAYMENT_FAILED, EVENT_PAYMENT_SUCCEEDED,
};
use crate::gateway::{IntentSnapshot, PaymentGateway, ShippingDetails};
use crate::handlers::identity::{check_ownership, RequestIdentity, GUEST_COOKIE};
use crate::services::cart::clear_user_cart;
use crate::services::pricing::{order_total, price_cart, to_minor_units, CartLine};
use crate::services::reconciliation::{reconcile, OrderSummary, ReconcileOutcome};
use crate::AppConfig;

const GUEST_COOKIE_MAX_AGE_DAYS: i64 = 30;

// ── Request / response DTOs ──────────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartLineRequest {
    pub product_item_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateIntentRequest {
    pub cart: Vec<CartLineRequest>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IntentItemSummary {
    pub product_item_id: Uuid,
    pub quantity: i32,
    pub unit_price_minor: i64,
    pub subtotal_minor: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentResponse {
    pub client_secret: String,
    pub intent_id: String,
    pub currency: String,
    pub total_minor_units: i64,
    pub items: Vec<IntentItemSummary>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShippingFields {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateShippingRequest {
    pub name: Option<String>,
    pub shipping: ShippingFields,
    pub address_id: Option<Uuid>,
    pub shipping_vendor_id: Option<i32>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST /payments/intent
///
/// Prices the cart server-side (no mutation) and creates a payment intent
/// for the total. Anonymous callers get an httpOnly guest cookie; their
/// cart rides along in intent metadata so reconciliation can rebuild it
/// without a session. Client-supplied prices are never consulted.
#[utoipa::path(
    post,
    path = "/payments/intent",
    request_body = CreateIntentRequest,
    responses(
        (status = 200, description = "Intent created", body = CreateIntentResponse),
        (status = 400, description = "Empty or invalid cart"),
        (status = 502, description = "Payment gateway unavailable"),
    ),
    tag = "payments"
)]
pub async fn create_intent(
    pool: web::Data<DbPool>,
    gateway: web::Data<dyn PaymentGateway>,
    cfg: web::Data<AppConfig>,
    body: web::Json<CreateIntentRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let identity = RequestIdentity::from_request(&req);
    let lines: Vec<CartLine> = body
        .into_inner()
        .cart
        .into_iter()
        .map(|l| CartLine {
            product_item_id: l.product_item_id,
            quantity: l.quantity,
        })
        .collect();

    let priced = {
        let pool = pool.clone();
        let lines = lines.clone();
        web::block(move || {
            let mut conn = pool.get()?;
            price_cart(&mut conn, &lines)
        })
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??
    };

    let total_minor = to_minor_units(&order_total(&priced));
    if total_minor <= 0 {
        return Err(AppError::Validation("Cart is empty or invalid".to_string()));
    }

    // Guests keep one cookie value across intents: reuse the one they sent,
    // mint a value only when they arrive without it. The cookie is re-issued
    // on every response so the 30-day expiry keeps sliding.
    let guest_id = (!identity.is_authenticated()).then(|| {
        identity
            .guest_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    });

    let meta = IntentMetadata {
        user_id: identity.user_id,
        guest_id: guest_id.clone(),
        // Authenticated carts are re-read from the database at
        // reconciliation time; only guests need theirs carried.
        cart: (!identity.is_authenticated()).then(|| {
            lines
                .iter()
                .map(|l| MetaCartLine {
                    product_item_id: l.product_item_id,
                    qty: l.quantity,
                })
                .collect()
        }),
        ..Default::default()
    };

    let created = gateway
        .create_intent(total_minor, &cfg.currency, meta.to_map()?)
        .await?;

    let items: Vec<IntentItemSummary> = priced
        .iter()
        .map(|l| IntentItemSummary {
            product_item_id: l.product_item_id,
            quantity: l.quantity,
            unit_price_minor: to_minor_units(&l.unit_price),
            subtotal_minor: to_minor_units(&l.subtotal),
        })
        .collect();

    let mut resp = HttpResponse::Ok().json(CreateIntentResponse {
        client_secret: created.client_secret,
        intent_id: created.intent_id,
        currency: cfg.currency.clone(),
        total_minor_units: total_minor,
        items,
    });
    if let Some(gid) = guest_id {
        let cookie = Cookie::build(GUEST_COOKIE, gid)
            .max_age(CookieDuration::days(GUEST_COOKIE_MAX_AGE_DAYS))
            .http_only(true)
            .same_site(SameSite::Lax)
            .path("/")
            .finish();
        resp.add_cookie(&cookie)
            .map_err(|e| AppError::Internal(e.to_string()))?;
    }
    Ok(resp)
}

/// PUT /payments/intent/{id}/shipping
///
/// Enriches the intent with the shipping destination and, for guests, their
/// contact details. Requires ownership of the intent.
#[utoipa::path(
    put,
    path = "/payments/intent/{intent_id}/shipping",
    request_body = UpdateShippingRequest,
    params(("intent_id" = String, Path, description = "Payment intent id")),
    responses(
        (status = 204, description = "Shipping recorded"),
        (status = 403, description = "Caller does not own the intent"),
        (status = 502, description = "Payment gateway unavailable"),
    ),
    tag = "payments"
)]
pub async fn update_shipping(
    gateway: web::Data<dyn PaymentGateway>,
    path: web::Path<String>,
    body: web::Json<UpdateShippingRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let intent_id = path.into_inner();
    let identity = RequestIdentity::from_request(&req);

    let snapshot = gateway.retrieve_intent(&intent_id).await?;
    let meta = IntentMetadata::from_map(&snapshot.metadata)?;
    check_ownership(&meta, &identity)?;

    let body = body.into_inner();
    let shipping = ShippingDetails {
        name: body.name.unwrap_or_default(),
        line1: body.shipping.line1.clone(),
        line2: body.shipping.line2.clone(),
        city: body.shipping.city.clone(),
        state: body.shipping.state.clone(),
        postal_code: body.shipping.postal_code.clone(),
        country: body.shipping.country.clone(),
        phone: body.shipping.phone.clone(),
    };
    gateway.update_shipping(&intent_id, &shipping).await?;

    // Metadata merge: only the keys set here change, the cart and owner
    // recorded at creation time stay as they are.
    let delta = IntentMetadata {
        guest_email: body.email,
        guest_first_name: body.first_name,
        guest_last_name: body.last_name,
        shipping_line1: Some(body.shipping.line1),
        shipping_line2: body.shipping.line2,
        shipping_city: Some(body.shipping.city),
        shipping_state: body.shipping.state,
        shipping_postal_code: Some(body.shipping.postal_code),
        shipping_country: Some(body.shipping.country),
        shipping_phone: body.shipping.phone,
        address_id: body.address_id,
        shipping_vendor_id: body.shipping_vendor_id,
        ..Default::default()
    };
    gateway.update_metadata(&intent_id, delta.to_map()?).await?;

    Ok(HttpResponse::NoContent().finish())
}

/// POST /payments/webhook
///
/// Receives signed events from the payment processor. An invalid signature
/// is rejected with 400; once the signature verifies, the response is
/// always 200 regardless of processing outcome, because a deterministic
/// internal failure must not put the gateway into an infinite redelivery
/// loop. Failures are logged for operator follow-up.
#[utoipa::path(
    post,
    path = "/payments/webhook",
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Event accepted"),
        (status = 400, description = "Signature verification failed"),
    ),
    tag = "payments"
)]
pub async fn webhook(
    pool: web::Data<DbPool>,
    gateway: web::Data<dyn PaymentGateway>,
    cfg: web::Data<AppConfig>,
    body: web::Bytes,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let signature = req
        .headers()
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let event = verify_event(&body, signature, &cfg.webhook_secret)?;

    match event.event_type.as_str() {
        EVENT_PAYMENT_SUCCEEDED => {
            let intent_id = event.intent.id.clone();
            match process_succeeded_intent(&pool, gateway.as_ref(), event.intent).await {
                Ok(_) => {}
                Err(e) => {
                    // Acknowledged anyway; the manual retry path can pick
                    // this intent up once the cause is fixed.
                    log::error!("Failed to reconcile intent {intent_id}: {e}");
                }
            }
        }
        EVENT_PAYMENT_FAILED => {
            log::warn!("Payment failed for intent {}", event.intent.id);
        }
        other => {
            log::debug!("Ignoring webhook event type {other}");
        }
    }
    Ok(HttpResponse::Ok().finish())
}

/// POST /payments/intent/{id}/create-order
///
/// Manual retry for a client that paid but never saw its order appear
/// (missed or still-failing webhook). Requires ownership; runs the same
/// idempotent reconciliation as the webhook, but surfaces failures
/// synchronously since a client is waiting.
#[utoipa::path(
    post,
    path = "/payments/intent/{intent_id}/create-order",
    params(("intent_id" = String, Path, description = "Payment intent id")),
    responses(
        (status = 201, description = "Order created", body = CreateOrderResponse),
        (status = 200, description = "Order already existed", body = CreateOrderResponse),
        (status = 400, description = "Payment not succeeded or invalid intent data"),
        (status = 403, description = "Caller does not own the intent"),
        (status = 409, description = "Insufficient stock"),
        (status = 500, description = "Internal error"),
    ),
    tag = "payments"
)]
pub async fn create_order(
    pool: web::Data<DbPool>,
    gateway: web::Data<dyn PaymentGateway>,
    path: web::Path<String>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let intent_id = path.into_inner();
    let identity = RequestIdentity::from_request(&req);

    let snapshot = gateway.retrieve_intent(&intent_id).await?;
    let meta = IntentMetadata::from_map(&snapshot.metadata)?;
    check_ownership(&meta, &identity)?;

    if snapshot.status != "succeeded" {
        return Err(AppError::Validation(format!(
            "Payment intent is '{}', not succeeded",
            snapshot.status
        )));
    }

    let outcome = process_succeeded_intent(&pool, gateway.as_ref(), snapshot).await?;
    match outcome {
        ReconcileOutcome::Created(summary) => Ok(HttpResponse::Created().json(CreateOrderResponse {
            order_id: summary.order_id,
        })),
        ReconcileOutcome::AlreadyExists(summary) => Ok(HttpResponse::Ok().json(CreateOrderResponse {
            order_id: summary.order_id,
        })),
    }
}

/// Run reconciliation for a succeeded intent, then the post-commit steps:
/// pushing the order id back into gateway metadata and clearing an
/// authenticated purchaser's cart. Both post-commit steps are best-effort;
/// the order stands even if they fail.
async fn process_succeeded_intent(
    pool: &DbPool,
    gateway: &dyn PaymentGateway,
    snapshot: IntentSnapshot,
) -> Result<ReconcileOutcome, AppError> {
    let intent_id = snapshot.id.clone();

    let outcome = {
        let pool = pool.clone();
        web::block(move || {
            let mut conn = pool.get()?;
            reconcile(&mut conn, &snapshot)
        })
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??
    };

    if let ReconcileOutcome::Created(summary) = &outcome {
        push_order_id(gateway, &intent_id, summary).await;
        invalidate_cart(pool, summary).await;
    }
    Ok(outcome)
}

async fn push_order_id(gateway: &dyn PaymentGateway, intent_id: &str, summary: &OrderSummary) {
    let delta = IntentMetadata {
        order_id: Some(summary.order_id),
        ..Default::default()
    };
    let map = match delta.to_map() {
        Ok(map) => map,
        Err(e) => {
            log::warn!("Could not encode order id metadata for {intent_id}: {e}");
            return;
        }
    };
    if let Err(e) = gateway.update_metadata(intent_id, map).await {
        log::warn!(
            "Could not push order {} onto intent {intent_id}: {e}",
            summary.order_id
        );
    }
}

async fn invalidate_cart(pool: &DbPool, summary: &OrderSummary) {
    let Some(user_id) = summary.user_id else {
        return;
    };
    let pool = pool.clone();
    let result = web::block(move || {
        let mut conn = pool.get()?;
        clear_user_cart(&mut conn, user_id)
    })
    .await;
    match result {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => log::warn!("Could not clear cart for user {user_id}: {e}"),
        Err(e) => log::warn!("Could not clear cart for user {user_id}: {e}"),
    }
}
