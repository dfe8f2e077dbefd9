use actix_web::HttpResponse;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::gateway::GatewayError;

/// One inventory line that could not be reserved. Every shortfall in a
/// reservation attempt is collected, not just the first.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StockShortfall {
    pub product_item_id: Uuid,
    pub requested: i32,
    pub available: i32,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient stock for {} item(s)", .0.len())]
    InsufficientStock(Vec<StockShortfall>),

    #[error("Caller does not own this payment intent")]
    Forbidden,

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Unique-index race on `payment_intent_id`: another request created the
    /// order first. The reconciliation controller converts this into an
    /// idempotent success; it only reaches HTTP if that conversion is missed.
    #[error("Order already exists for this payment intent")]
    DuplicateIntent,

    #[error("Charged amount {charged_minor} does not match computed total {computed_minor}")]
    Integrity {
        charged_minor: i64,
        computed_minor: i64,
    },

    #[error("Not found")]
    NotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<crate::gateway::metadata::MetadataError> for AppError {
    fn from(e: crate::gateway::metadata::MetadataError) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(e: diesel::result::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl From<r2d2::Error> for AppError {
    fn from(e: r2d2::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl actix_web::ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        match self {
            AppError::Validation(msg) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": msg
            })),
            AppError::InsufficientStock(shortfalls) => {
                HttpResponse::Conflict().json(serde_json::json!({
                    "error": "Insufficient stock",
                    "shortfalls": shortfalls
                }))
            }
            AppError::Forbidden => HttpResponse::Forbidden().json(serde_json::json!({
                "error": "forbidden"
            })),
            AppError::Gateway(e) => match e {
                // A broken signature or a processor-side rejection is the
                // caller's problem; a transport failure is retryable.
                GatewayError::Signature | GatewayError::Api { .. } => {
                    HttpResponse::BadRequest().json(serde_json::json!({
                        "error": e.to_string()
                    }))
                }
                GatewayError::Transport(_) => {
                    HttpResponse::BadGateway().json(serde_json::json!({
                        "error": "Payment gateway unavailable"
                    }))
                }
            },
            AppError::DuplicateIntent => HttpResponse::Conflict().json(serde_json::json!({
                "error": self.to_string()
            })),
            AppError::Integrity { .. } => {
                // Never expose the amounts; operators read them from logs.
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "Order reconciliation failed"
                }))
            }
            AppError::NotFound => HttpResponse::NotFound().json(serde_json::json!({
                "error": self.to_string()
            })),
            AppError::Internal(_) => HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Internal server error"
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::ResponseError;

    fn shortfall() -> StockShortfall {
        StockShortfall {
            product_item_id: Uuid::new_v4(),
            requested: 2,
            available: 1,
        }
    }

    #[test]
    fn validation_returns_400() {
        let resp = AppError::Validation("Cart is empty".into()).error_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn insufficient_stock_returns_409() {
        let resp = AppError::InsufficientStock(vec![shortfall()]).error_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn forbidden_returns_403() {
        let resp = AppError::Forbidden.error_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn signature_failure_returns_400() {
        let resp = AppError::Gateway(GatewayError::Signature).error_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn transport_failure_returns_502() {
        let resp =
            AppError::Gateway(GatewayError::Transport("connection refused".into())).error_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn integrity_returns_500_without_amounts() {
        let err = AppError::Integrity {
            charged_minor: 5000,
            computed_minor: 3000,
        };
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn not_found_returns_404() {
        let resp = AppError::NotFound.error_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn insufficient_stock_display_counts_lines() {
        let err = AppError::InsufficientStock(vec![shortfall(), shortfall()]);
        assert_eq!(err.to_string(), "Insufficient stock for 2 item(s)");
    }
}
