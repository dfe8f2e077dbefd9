use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::addresses;

/// Append-only address snapshot. Rows are never updated or deleted so that
/// an order's shipping destination stays exactly as it was at purchase time.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = addresses)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Address {
    pub id: Uuid,
    pub address_line: String,
    pub city: String,
    pub postcode: String,
    pub state: String,
    pub country: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = addresses)]
pub struct NewAddress {
    pub id: Uuid,
    pub address_line: String,
    pub city: String,
    pub postcode: String,
    pub state: String,
    pub country: String,
}
