use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::product_items;

/// Catalog variant consumed by the checkout pipeline. `stock` is the only
/// mutable counter in the system; `unit_price` is the server-side pricing
/// source for intents and orders.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = product_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProductItem {
    pub id: Uuid,
    pub sku: String,
    pub stock: i32,
    pub unit_price: BigDecimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = product_items)]
pub struct NewProductItem {
    pub id: Uuid,
    pub sku: String,
    pub stock: i32,
    pub unit_price: BigDecimal,
}
