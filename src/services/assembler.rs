//! Order assembly: turns priced lines plus a resolved owner and address into
//! a persisted Order + OrderItem aggregate. Runs inside the caller's
//! transaction so a failure anywhere leaves nothing behind.

use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::address::NewAddress;
use crate::models::guest_user::NewGuestUser;
use crate::models::order::{NewOrder, Order};
use crate::models::order_item::NewOrderItem;
use crate::models::status::OrderStatus;
use crate::schema::{addresses, guest_users, order_items, orders};
use crate::services::pricing::{order_total, PricedLine};

/// Contact details for an anonymous purchaser. A fresh guest row is created
/// from these for every order; guest identities are never shared between
/// orders.
#[derive(Debug, Clone)]
pub struct GuestContact {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

/// Exactly one owner per order, resolved once at the controller boundary.
#[derive(Debug, Clone)]
pub enum OwnerRef {
    User(Uuid),
    Guest(GuestContact),
}

/// Shipping destination fields captured from intent metadata when the
/// purchaser did not pick a saved address.
#[derive(Debug, Clone)]
pub struct ShippingAddress {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postcode: String,
    pub country: String,
}

/// Either a saved address id or a snapshot to persist.
#[derive(Debug, Clone)]
pub enum AddressRef {
    Existing(Uuid),
    Snapshot(ShippingAddress),
}

fn resolve_address(conn: &mut PgConnection, address: &AddressRef) -> Result<Uuid, AppError> {
    match address {
        AddressRef::Existing(id) => {
            let found = addresses::table
                .find(id)
                .select(addresses::id)
                .first::<Uuid>(conn)
                .optional()?;
            found.ok_or_else(|| AppError::Validation(format!("Unknown address {id}")))
        }
        AddressRef::Snapshot(s) => {
            // Unit/apt goes in front of the street line, matching how saved
            // addresses are entered.
            let address_line = match &s.line2 {
                Some(line2) if !line2.is_empty() => format!("{line2}, {}", s.line1),
                _ => s.line1.clone(),
            };
            let id = Uuid::new_v4();
            diesel::insert_into(addresses::table)
                .values(&NewAddress {
                    id,
                    address_line,
                    city: s.city.clone(),
                    postcode: s.postcode.clone(),
                    state: s.state.clone(),
                    country: s.country.clone(),
                })
                .execute(conn)?;
            Ok(id)
        }
    }
}

fn resolve_owner(
    conn: &mut PgConnection,
    owner: &OwnerRef,
) -> Result<(Option<Uuid>, Option<Uuid>), AppError> {
    match owner {
        OwnerRef::User(user_id) => Ok((Some(*user_id), None)),
        OwnerRef::Guest(contact) => {
            if contact.email.is_empty() {
                return Err(AppError::Validation(
                    "Guest orders require an email address".to_string(),
                ));
            }
            let guest_id = Uuid::new_v4();
            diesel::insert_into(guest_users::table)
                .values(&NewGuestUser {
                    id: guest_id,
                    email: contact.email.clone(),
                    first_name: contact.first_name.clone(),
                    last_name: contact.last_name.clone(),
                    phone: contact.phone.clone(),
                })
                .execute(conn)?;
            Ok((None, Some(guest_id)))
        }
    }
}

/// Persist the order header and its items. `lines` must already be priced
/// server-side; per-unit prices are frozen onto the order items as-is.
///
/// A unique violation on `payment_intent_id` surfaces as
/// [`AppError::DuplicateIntent`] so the controller can treat the lost race
/// as idempotent success.
pub fn assemble(
    conn: &mut PgConnection,
    owner: &OwnerRef,
    address: &AddressRef,
    shipping_vendor_id: Option<i32>,
    lines: &[PricedLine],
    payment_intent_id: &str,
) -> Result<Order, AppError> {
    if lines.is_empty() {
        return Err(AppError::Validation("Order has no items".to_string()));
    }

    let address_id = resolve_address(conn, address)?;
    let (user_id, guest_user_id) = resolve_owner(conn, owner)?;
    let total_price = order_total(lines);

    let order_id = Uuid::new_v4();
    let order: Order = diesel::insert_into(orders::table)
        .values(&NewOrder {
            id: order_id,
            user_id,
            guest_user_id,
            address_id,
            shipping_vendor_id,
            total_price,
            status: OrderStatus::Processing.to_string(),
            payment_intent_id: Some(payment_intent_id.to_string()),
        })
        .returning(Order::as_returning())
        .get_result(conn)
        .map_err(|e| match e {
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                AppError::DuplicateIntent
            }
            other => other.into(),
        })?;

    let new_items: Vec<NewOrderItem> = lines
        .iter()
        .map(|l| NewOrderItem {
            id: Uuid::new_v4(),
            order_id,
            product_item_id: l.product_item_id,
            quantity: l.quantity,
            price: l.unit_price.clone(),
        })
        .collect();
    diesel::insert_into(order_items::table)
        .values(&new_items)
        .execute(conn)?;

    Ok(order)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use bigdecimal::BigDecimal;

    use super::*;
    use crate::test_support::{seed_address, seed_product, setup_db};

    fn priced(product_item_id: Uuid, quantity: i32, unit: &str) -> PricedLine {
        let unit_price = BigDecimal::from_str(unit).expect("valid decimal");
        let subtotal = &unit_price * BigDecimal::from(quantity);
        PricedLine {
            product_item_id,
            quantity,
            unit_price,
            subtotal,
        }
    }

    #[tokio::test]
    async fn second_insert_for_an_intent_is_a_duplicate() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let item = seed_product(&mut conn, 5, "10.00");
        let address = AddressRef::Existing(seed_address(&mut conn));
        let owner = OwnerRef::User(Uuid::new_v4());
        let lines = vec![priced(item, 2, "10.00")];

        let first = assemble(&mut conn, &owner, &address, None, &lines, "pi_dup")
            .expect("first insert failed");
        assert_eq!(first.payment_intent_id.as_deref(), Some("pi_dup"));

        // Same intent id again, without going through the guard select: the
        // unique index is the one that fires, and it surfaces as
        // DuplicateIntent rather than a raw database error.
        let err = assemble(&mut conn, &owner, &address, None, &lines, "pi_dup")
            .expect_err("second insert must collide");
        assert!(matches!(err, AppError::DuplicateIntent));

        let count: i64 = orders::table
            .count()
            .get_result(&mut conn)
            .expect("count failed");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn distinct_intents_do_not_collide() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let item = seed_product(&mut conn, 5, "10.00");
        let address = AddressRef::Existing(seed_address(&mut conn));
        let owner = OwnerRef::User(Uuid::new_v4());
        let lines = vec![priced(item, 1, "10.00")];

        assemble(&mut conn, &owner, &address, None, &lines, "pi_one").expect("first failed");
        assemble(&mut conn, &owner, &address, None, &lines, "pi_two").expect("second failed");

        let count: i64 = orders::table
            .count()
            .get_result(&mut conn)
            .expect("count failed");
        assert_eq!(count, 2);
    }
}
