//! Stock reservation: the atomic check-and-decrement of inventory performed
//! inside the order-creation transaction. Rows are locked in id order so
//! concurrent reservations over overlapping products cannot deadlock.

use std::collections::BTreeMap;

use diesel::prelude::*;
use uuid::Uuid;

use crate::errors::{AppError, StockShortfall};
use crate::schema::product_items;

/// Reserve `lines` against current stock. Must be called inside the same
/// transaction that persists the order, so that the decrement and the order
/// commit or roll back together.
///
/// Either every line is decremented or nothing is: all shortfalls are
/// collected first and returned as one `InsufficientStock` error.
pub fn reserve(conn: &mut PgConnection, lines: &[(Uuid, i32)]) -> Result<(), AppError> {
    if lines.is_empty() {
        return Err(AppError::Validation("Nothing to reserve".to_string()));
    }

    // Collapse duplicate product ids; BTreeMap gives the canonical id order
    // used for both locking and decrementing.
    let mut requested: BTreeMap<Uuid, i32> = BTreeMap::new();
    for (id, qty) in lines {
        *requested.entry(*id).or_insert(0) += qty;
    }
    let ids: Vec<Uuid> = requested.keys().copied().collect();

    let locked: Vec<(Uuid, i32)> = product_items::table
        .filter(product_items::id.eq_any(&ids))
        .order(product_items::id.asc())
        .select((product_items::id, product_items::stock))
        .for_update()
        .load(conn)?;
    let available: BTreeMap<Uuid, i32> = locked.into_iter().collect();

    let shortfalls: Vec<StockShortfall> = requested
        .iter()
        .filter_map(|(id, qty)| {
            let stock = available.get(id).copied().unwrap_or(0);
            (stock < *qty).then(|| StockShortfall {
                product_item_id: *id,
                requested: *qty,
                available: stock,
            })
        })
        .collect();
    if !shortfalls.is_empty() {
        return Err(AppError::InsufficientStock(shortfalls));
    }

    for (id, qty) in &requested {
        diesel::update(product_items::table.filter(product_items::id.eq(id)))
            .set(product_items::stock.eq(product_items::stock - qty))
            .execute(conn)?;
    }
    Ok(())
}
