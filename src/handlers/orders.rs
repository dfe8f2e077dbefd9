use actix_web::{web, HttpResponse};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::DbPool;
use crate::errors::AppError;
use crate::models::order::Order;
use crate::models::order_item::OrderItem;
use crate::schema::{order_items, orders};

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_item_id: Uuid,
    pub quantity: i32,
    /// Frozen per-unit price as a decimal string, e.g. "9.99"
    pub price: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub guest_user_id: Option<Uuid>,
    pub address_id: Uuid,
    pub total_price: String,
    pub status: String,
    pub payment_intent_id: Option<String>,
    pub created_at: String,
    pub items: Vec<OrderItemResponse>,
}

/// GET /orders/{id}
///
/// Returns the order together with its items.
#[utoipa::path(
    get,
    path = "/orders/{id}",
    params(
        ("id" = Uuid, Path, description = "Order UUID"),
    ),
    responses(
        (status = 200, description = "Order found", body = OrderResponse),
        (status = 404, description = "Order not found"),
        (status = 500, description = "Internal server error"),
    ),
    tag = "orders"
)]
pub async fn get_order(
    pool: web::Data<DbPool>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let order_id = path.into_inner();

    let result = web::block(move || {
        let mut conn = pool.get()?;

        let order = orders::table
            .filter(orders::id.eq(order_id))
            .select(Order::as_select())
            .first(&mut conn)
            .optional()?;

        let Some(order) = order else {
            return Ok::<_, AppError>(None);
        };

        let items = order_items::table
            .filter(order_items::order_id.eq(order.id))
            .select(OrderItem::as_select())
            .load(&mut conn)?;

        let item_responses: Vec<OrderItemResponse> = items
            .into_iter()
            .map(|i| OrderItemResponse {
                id: i.id,
                product_item_id: i.product_item_id,
                quantity: i.quantity,
                price: i.price.to_string(),
            })
            .collect();

        Ok(Some(OrderResponse {
            id: order.id,
            user_id: order.user_id,
            guest_user_id: order.guest_user_id,
            address_id: order.address_id,
            total_price: order.total_price.to_string(),
            status: order.status,
            payment_intent_id: order.payment_intent_id,
            created_at: order.created_at.to_rfc3339(),
            items: item_responses,
        }))
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;

    match result {
        Some(order) => Ok(HttpResponse::Ok().json(order)),
        None => Err(AppError::NotFound),
    }
}
