use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::orders;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Order {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub guest_user_id: Option<Uuid>,
    pub address_id: Uuid,
    pub shipping_vendor_id: Option<i32>,
    pub total_price: BigDecimal,
    pub status: String,
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = orders)]
pub struct NewOrder {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub guest_user_id: Option<Uuid>,
    pub address_id: Uuid,
    pub shipping_vendor_id: Option<i32>,
    pub total_price: BigDecimal,
    pub status: String,
    pub payment_intent_id: Option<String>,
}
