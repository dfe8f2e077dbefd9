//! Cart invalidation: clears an authenticated purchaser's persisted cart
//! once their order is durably created. Best-effort by contract; callers
//! log failures instead of rolling anything back.

use diesel::prelude::*;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::cart_item::CartItem;
use crate::schema::cart_items;

/// Load a user's persisted cart lines.
pub fn cart_for_user(conn: &mut PgConnection, user_id: Uuid) -> Result<Vec<CartItem>, AppError> {
    Ok(cart_items::table
        .filter(cart_items::user_id.eq(user_id))
        .select(CartItem::as_select())
        .load(conn)?)
}

/// Delete every cart line belonging to `user_id`, returning the number of
/// rows removed.
pub fn clear_user_cart(conn: &mut PgConnection, user_id: Uuid) -> Result<usize, AppError> {
    let deleted = diesel::delete(cart_items::table.filter(cart_items::user_id.eq(user_id)))
        .execute(conn)?;
    if deleted > 0 {
        log::info!("Cleared {deleted} cart item(s) for user {user_id}");
    }
    Ok(deleted)
}
