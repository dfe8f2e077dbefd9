//! Server-side cart pricing. Unit prices always come from `product_items`;
//! prices supplied by the client are never read.

use bigdecimal::{BigDecimal, ToPrimitive};
use diesel::prelude::*;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::product_item::ProductItem;
use crate::schema::product_items;

/// Transient cart line as supplied by the client or reconstructed from
/// intent metadata.
#[derive(Debug, Clone)]
pub struct CartLine {
    pub product_item_id: Uuid,
    pub quantity: i32,
}

/// A cart line with its server-resolved price.
#[derive(Debug, Clone)]
pub struct PricedLine {
    pub product_item_id: Uuid,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub subtotal: BigDecimal,
}

/// Convert a decimal amount to minor units (cents), rounding half-up.
pub fn to_minor_units(amount: &BigDecimal) -> i64 {
    (amount * BigDecimal::from(100))
        .with_scale_round(0, bigdecimal::RoundingMode::HalfUp)
        .to_i64()
        .unwrap_or(i64::MAX)
}

pub fn order_total(lines: &[PricedLine]) -> BigDecimal {
    lines
        .iter()
        .fold(BigDecimal::from(0), |acc, l| acc + &l.subtotal)
}

/// Resolve prices for every cart line. Rejects the whole cart if it is
/// empty, any quantity is non-positive, or any product item is unknown;
/// unknown ids are collected rather than reported one at a time.
pub fn price_cart(
    conn: &mut PgConnection,
    lines: &[CartLine],
) -> Result<Vec<PricedLine>, AppError> {
    if lines.is_empty() {
        return Err(AppError::Validation("Cart is empty".to_string()));
    }
    if lines.iter().any(|l| l.quantity <= 0) {
        return Err(AppError::Validation(
            "Cart quantities must be positive".to_string(),
        ));
    }

    let ids: Vec<Uuid> = lines.iter().map(|l| l.product_item_id).collect();
    let rows: Vec<ProductItem> = product_items::table
        .filter(product_items::id.eq_any(&ids))
        .select(ProductItem::as_select())
        .load(conn)?;
    let price_by_id: std::collections::HashMap<Uuid, BigDecimal> = rows
        .into_iter()
        .map(|p| (p.id, p.unit_price))
        .collect();

    let missing: Vec<String> = lines
        .iter()
        .filter(|l| !price_by_id.contains_key(&l.product_item_id))
        .map(|l| l.product_item_id.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(AppError::Validation(format!(
            "Unknown product items: {}",
            missing.join(", ")
        )));
    }

    Ok(lines
        .iter()
        .map(|l| {
            let unit_price = price_by_id[&l.product_item_id].clone();
            let subtotal = &unit_price * BigDecimal::from(l.quantity);
            PricedLine {
                product_item_id: l.product_item_id,
                quantity: l.quantity,
                unit_price,
                subtotal,
            }
        })
        .collect())
}
