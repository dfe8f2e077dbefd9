//! Reconciliation: turns a succeeded payment intent into exactly one order.
//!
//! Both the webhook path and the manual retry path funnel into
//! [`reconcile`], so a payment event may be delivered any number of times
//! (at-least-once webhooks, client retries, races between the two) and
//! still produce a single order. The idempotency key is the intent id,
//! backed by the unique index on `orders.payment_intent_id`.

use bigdecimal::BigDecimal;
use diesel::prelude::*;
use uuid::Uuid;

use crate::errors::AppError;
use crate::gateway::metadata::IntentMetadata;
use crate::gateway::IntentSnapshot;
use crate::models::order::Order;
use crate::schema::orders;
use crate::services::assembler::{
    assemble, AddressRef, GuestContact, OwnerRef, ShippingAddress,
};
use crate::services::cart::cart_for_user;
use crate::services::pricing::{price_cart, to_minor_units, CartLine};
use crate::services::stock::reserve;

/// What post-commit steps need to know about the order just created (or
/// found): the gateway metadata pushback wants the id, the cart invalidator
/// wants the owning user.
#[derive(Debug, Clone)]
pub struct OrderSummary {
    pub order_id: Uuid,
    pub user_id: Option<Uuid>,
    pub total_price: BigDecimal,
}

impl From<Order> for OrderSummary {
    fn from(o: Order) -> Self {
        OrderSummary {
            order_id: o.id,
            user_id: o.user_id,
            total_price: o.total_price,
        }
    }
}

#[derive(Debug)]
pub enum ReconcileOutcome {
    Created(OrderSummary),
    /// The idempotency guard (or the unique-index race backstop) found an
    /// order already recorded for this intent. Treated as success.
    AlreadyExists(OrderSummary),
}

impl ReconcileOutcome {
    pub fn summary(&self) -> &OrderSummary {
        match self {
            ReconcileOutcome::Created(s) | ReconcileOutcome::AlreadyExists(s) => s,
        }
    }
}

/// Idempotency guard: the order previously created for this intent, if any.
pub fn find_order_by_intent(
    conn: &mut PgConnection,
    intent_id: &str,
) -> Result<Option<Order>, AppError> {
    Ok(orders::table
        .filter(orders::payment_intent_id.eq(intent_id))
        .select(Order::as_select())
        .first(conn)
        .optional()?)
}

fn owner_from_metadata(meta: &IntentMetadata) -> Result<OwnerRef, AppError> {
    if let Some(user_id) = meta.user_id {
        return Ok(OwnerRef::User(user_id));
    }
    let email = meta
        .guest_email
        .clone()
        .ok_or_else(|| AppError::Validation("Guest orders require an email address".to_string()))?;
    Ok(OwnerRef::Guest(GuestContact {
        email,
        first_name: meta.guest_first_name.clone().unwrap_or_default(),
        last_name: meta.guest_last_name.clone().unwrap_or_default(),
        phone: meta.shipping_phone.clone(),
    }))
}

fn address_from_metadata(meta: &IntentMetadata) -> Result<AddressRef, AppError> {
    if let Some(address_id) = meta.address_id {
        return Ok(AddressRef::Existing(address_id));
    }
    match (&meta.shipping_line1, &meta.shipping_city) {
        (Some(line1), Some(city)) => Ok(AddressRef::Snapshot(ShippingAddress {
            line1: line1.clone(),
            line2: meta.shipping_line2.clone(),
            city: city.clone(),
            state: meta.shipping_state.clone().unwrap_or_default(),
            postcode: meta.shipping_postal_code.clone().unwrap_or_default(),
            country: meta.shipping_country.clone().unwrap_or_default(),
        })),
        _ => Err(AppError::Validation(
            "Intent has neither a saved address nor shipping details".to_string(),
        )),
    }
}

fn cart_from_sources(
    conn: &mut PgConnection,
    meta: &IntentMetadata,
    owner: &OwnerRef,
) -> Result<Vec<CartLine>, AppError> {
    let lines = match owner {
        // Authenticated carts are the persisted ones; metadata is only
        // trusted for quantities when there is no account to read from.
        OwnerRef::User(user_id) => cart_for_user(conn, *user_id)?
            .into_iter()
            .map(|c| CartLine {
                product_item_id: c.product_item_id,
                quantity: c.quantity,
            })
            .collect::<Vec<_>>(),
        OwnerRef::Guest(_) => meta
            .cart
            .as_ref()
            .map(|cart| {
                cart.iter()
                    .map(|l| CartLine {
                        product_item_id: l.product_item_id,
                        quantity: l.qty,
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default(),
    };
    if lines.is_empty() {
        return Err(AppError::Validation(
            "No cart lines found for this intent".to_string(),
        ));
    }
    Ok(lines)
}

/// Create the order for a succeeded intent, exactly once.
///
/// The whole of pricing, stock reservation, assembly and the charged-amount
/// cross-check runs in one transaction: a reader can never observe a
/// decremented stock count without the corresponding committed order. A
/// mismatch between the gateway-charged amount and the computed total
/// aborts everything, deliberately leaving a charged-but-orderless intent
/// for operator follow-up.
pub fn reconcile(
    conn: &mut PgConnection,
    snapshot: &IntentSnapshot,
) -> Result<ReconcileOutcome, AppError> {
    if let Some(existing) = find_order_by_intent(conn, &snapshot.id)? {
        log::info!(
            "Order {} already exists for intent {}, skipping",
            existing.id,
            snapshot.id
        );
        return Ok(ReconcileOutcome::AlreadyExists(existing.into()));
    }

    let meta = IntentMetadata::from_map(&snapshot.metadata)?;
    let owner = owner_from_metadata(&meta)?;
    let address = address_from_metadata(&meta)?;

    let result = conn.transaction::<Order, AppError, _>(|conn| {
        let cart = cart_from_sources(conn, &meta, &owner)?;
        let priced = price_cart(conn, &cart)?;

        let reservation: Vec<(Uuid, i32)> = priced
            .iter()
            .map(|l| (l.product_item_id, l.quantity))
            .collect();
        reserve(conn, &reservation)?;

        let order = assemble(
            conn,
            &owner,
            &address,
            meta.shipping_vendor_id,
            &priced,
            &snapshot.id,
        )?;

        let computed_minor = to_minor_units(&order.total_price);
        if (snapshot.amount_minor - computed_minor).abs() > 1 {
            return Err(AppError::Integrity {
                charged_minor: snapshot.amount_minor,
                computed_minor,
            });
        }
        Ok(order)
    });

    match result {
        Ok(order) => {
            log::info!(
                "Created order {} for intent {} (total {})",
                order.id,
                snapshot.id,
                order.total_price
            );
            Ok(ReconcileOutcome::Created(order.into()))
        }
        // Lost the insert race: another delivery committed first. Roll with
        // it and return that order.
        Err(AppError::DuplicateIntent) => match find_order_by_intent(conn, &snapshot.id)? {
            Some(existing) => Ok(ReconcileOutcome::AlreadyExists(existing.into())),
            None => Err(AppError::Internal(format!(
                "duplicate intent {} reported but no order found",
                snapshot.id
            ))),
        },
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::str::FromStr;

    use super::*;
    use crate::gateway::metadata::MetaCartLine;
    use crate::schema::{addresses, guest_users, order_items};
    use crate::test_support::{seed_address, seed_cart_line, seed_product, setup_db};

    fn snapshot(intent_id: &str, amount_minor: i64, meta: &IntentMetadata) -> IntentSnapshot {
        IntentSnapshot {
            id: intent_id.to_string(),
            amount_minor,
            currency: "aud".to_string(),
            status: "succeeded".to_string(),
            metadata: meta.to_map().expect("metadata encodes"),
        }
    }

    fn guest_meta(address_id: Uuid, cart: Vec<MetaCartLine>) -> IntentMetadata {
        IntentMetadata {
            guest_id: Some("g-1".to_string()),
            guest_email: Some("jane@example.com".to_string()),
            guest_first_name: Some("Jane".to_string()),
            guest_last_name: Some("Smith".to_string()),
            address_id: Some(address_id),
            cart: Some(cart),
            ..Default::default()
        }
    }

    fn stock_of(conn: &mut PgConnection, id: Uuid) -> i32 {
        use crate::schema::product_items;
        product_items::table
            .find(id)
            .select(product_items::stock)
            .first(conn)
            .expect("stock query failed")
    }

    fn order_count(conn: &mut PgConnection) -> i64 {
        orders::table.count().get_result(conn).expect("count failed")
    }

    #[tokio::test]
    async fn authenticated_purchase_creates_order_from_db_cart() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let item = seed_product(&mut conn, 5, "10.00");
        let address_id = seed_address(&mut conn);
        let user_id = Uuid::new_v4();
        seed_cart_line(&mut conn, user_id, item, 2);

        let meta = IntentMetadata {
            user_id: Some(user_id),
            address_id: Some(address_id),
            ..Default::default()
        };
        let outcome =
            reconcile(&mut conn, &snapshot("pi_a", 2000, &meta)).expect("reconcile failed");

        let ReconcileOutcome::Created(summary) = outcome else {
            panic!("expected Created");
        };
        assert_eq!(summary.user_id, Some(user_id));
        assert_eq!(
            summary.total_price,
            bigdecimal::BigDecimal::from_str("20.00").unwrap()
        );
        assert_eq!(stock_of(&mut conn, item), 3);

        let order = find_order_by_intent(&mut conn, "pi_a")
            .expect("guard failed")
            .expect("order exists");
        assert_eq!(order.user_id, Some(user_id));
        assert!(order.guest_user_id.is_none());
        assert_eq!(order.status, "processing");

        let items: Vec<crate::models::order_item::OrderItem> = order_items::table
            .filter(order_items::order_id.eq(order.id))
            .select(crate::models::order_item::OrderItem::as_select())
            .load(&mut conn)
            .expect("items load failed");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 2);
        assert_eq!(
            items[0].price,
            bigdecimal::BigDecimal::from_str("10.00").unwrap()
        );
    }

    #[tokio::test]
    async fn insufficient_stock_creates_nothing() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let item = seed_product(&mut conn, 1, "10.00");
        let address_id = seed_address(&mut conn);

        let meta = guest_meta(
            address_id,
            vec![MetaCartLine {
                product_item_id: item,
                qty: 2,
            }],
        );
        let err =
            reconcile(&mut conn, &snapshot("pi_b", 2000, &meta)).expect_err("should be short");

        let AppError::InsufficientStock(shortfalls) = err else {
            panic!("expected InsufficientStock, got {err:?}");
        };
        assert_eq!(shortfalls.len(), 1);
        assert_eq!(shortfalls[0].product_item_id, item);
        assert_eq!(shortfalls[0].requested, 2);
        assert_eq!(shortfalls[0].available, 1);

        assert_eq!(order_count(&mut conn), 0);
        assert_eq!(stock_of(&mut conn, item), 1);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_a_no_op_returning_the_same_order() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let item = seed_product(&mut conn, 5, "10.00");
        let address_id = seed_address(&mut conn);

        let meta = guest_meta(
            address_id,
            vec![MetaCartLine {
                product_item_id: item,
                qty: 2,
            }],
        );
        let snap = snapshot("pi_c", 2000, &meta);

        let first = reconcile(&mut conn, &snap).expect("first reconcile failed");
        let second = reconcile(&mut conn, &snap).expect("second reconcile failed");

        let ReconcileOutcome::Created(created) = first else {
            panic!("expected Created");
        };
        let ReconcileOutcome::AlreadyExists(existing) = second else {
            panic!("expected AlreadyExists");
        };
        assert_eq!(created.order_id, existing.order_id);
        assert_eq!(order_count(&mut conn), 1);
        // Stock was only decremented by the first delivery.
        assert_eq!(stock_of(&mut conn, item), 3);
    }

    #[tokio::test]
    async fn charged_amount_mismatch_aborts_without_persisting() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let item = seed_product(&mut conn, 5, "30.00");
        let address_id = seed_address(&mut conn);

        let meta = guest_meta(
            address_id,
            vec![MetaCartLine {
                product_item_id: item,
                qty: 1,
            }],
        );
        // Gateway says 5000 was charged; the priced cart computes 3000.
        let err =
            reconcile(&mut conn, &snapshot("pi_d", 5000, &meta)).expect_err("should mismatch");

        assert!(matches!(
            err,
            AppError::Integrity {
                charged_minor: 5000,
                computed_minor: 3000,
            }
        ));
        // Transaction rolled back: no order, no guest user, stock restored.
        assert_eq!(order_count(&mut conn), 0);
        assert_eq!(stock_of(&mut conn, item), 5);
        let guests: i64 = guest_users::table
            .count()
            .get_result(&mut conn)
            .expect("count failed");
        assert_eq!(guests, 0);
    }

    #[tokio::test]
    async fn one_cent_rounding_difference_is_tolerated() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let item = seed_product(&mut conn, 5, "10.00");
        let address_id = seed_address(&mut conn);

        let meta = guest_meta(
            address_id,
            vec![MetaCartLine {
                product_item_id: item,
                qty: 2,
            }],
        );
        let outcome =
            reconcile(&mut conn, &snapshot("pi_r", 2001, &meta)).expect("reconcile failed");
        assert!(matches!(outcome, ReconcileOutcome::Created(_)));
    }

    #[tokio::test]
    async fn each_guest_order_gets_a_fresh_guest_user() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let item = seed_product(&mut conn, 10, "10.00");
        let address_id = seed_address(&mut conn);

        let meta = guest_meta(
            address_id,
            vec![MetaCartLine {
                product_item_id: item,
                qty: 1,
            }],
        );
        reconcile(&mut conn, &snapshot("pi_g1", 1000, &meta)).expect("first order failed");
        reconcile(&mut conn, &snapshot("pi_g2", 1000, &meta)).expect("second order failed");

        // Same contact details, two orders, two distinct guest identities.
        let guests: i64 = guest_users::table
            .count()
            .get_result(&mut conn)
            .expect("count failed");
        assert_eq!(guests, 2);

        let one = find_order_by_intent(&mut conn, "pi_g1").unwrap().unwrap();
        let two = find_order_by_intent(&mut conn, "pi_g2").unwrap().unwrap();
        assert_ne!(one.guest_user_id, two.guest_user_id);
        assert!(one.user_id.is_none());
    }

    #[tokio::test]
    async fn shipping_metadata_creates_an_address_snapshot() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let item = seed_product(&mut conn, 5, "10.00");

        let meta = IntentMetadata {
            guest_id: Some("g-2".to_string()),
            guest_email: Some("bob@example.com".to_string()),
            shipping_line1: Some("1 High St".to_string()),
            shipping_line2: Some("Unit 2".to_string()),
            shipping_city: Some("Sydney".to_string()),
            shipping_state: Some("NSW".to_string()),
            shipping_postal_code: Some("2000".to_string()),
            shipping_country: Some("AU".to_string()),
            cart: Some(vec![MetaCartLine {
                product_item_id: item,
                qty: 1,
            }]),
            ..Default::default()
        };
        reconcile(&mut conn, &snapshot("pi_s", 1000, &meta)).expect("reconcile failed");

        let line: String = addresses::table
            .select(addresses::address_line)
            .first(&mut conn)
            .expect("address exists");
        assert_eq!(line, "Unit 2, 1 High St");
    }

    #[tokio::test]
    async fn missing_address_is_a_validation_error() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let item = seed_product(&mut conn, 5, "10.00");

        let meta = IntentMetadata {
            guest_id: Some("g-3".to_string()),
            guest_email: Some("bob@example.com".to_string()),
            cart: Some(vec![MetaCartLine {
                product_item_id: item,
                qty: 1,
            }]),
            ..Default::default()
        };
        let err = reconcile(&mut conn, &snapshot("pi_m", 1000, &meta))
            .expect_err("should fail validation");
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(order_count(&mut conn), 0);
    }

    #[tokio::test]
    async fn lost_insert_race_resolves_to_the_existing_order() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().expect("conn");
        let item = seed_product(&mut conn, 5, "10.00");
        let address_id = seed_address(&mut conn);

        let meta = guest_meta(
            address_id,
            vec![MetaCartLine {
                product_item_id: item,
                qty: 2,
            }],
        );
        let snap = snapshot("pi_race", 2000, &meta);

        // One delivery holds an uncommitted order for the intent while a
        // second runs the full pipeline: the guard select sees nothing, so
        // the second insert blocks on the unique index until the first
        // commits and then fails with a unique violation.
        let unit = BigDecimal::from_str("10.00").unwrap();
        let lines = vec![crate::services::pricing::PricedLine {
            product_item_id: item,
            quantity: 2,
            unit_price: unit.clone(),
            subtotal: &unit * BigDecimal::from(2),
        }];
        let (held, rival) = conn
            .transaction::<_, AppError, _>(|c| {
                let held = assemble(
                    c,
                    &OwnerRef::User(Uuid::new_v4()),
                    &AddressRef::Existing(address_id),
                    None,
                    &lines,
                    "pi_race",
                )?;
                let rival = {
                    let pool = pool.clone();
                    let snap = snap.clone();
                    std::thread::spawn(move || {
                        let mut conn = pool.get().expect("conn");
                        reconcile(&mut conn, &snap)
                    })
                };
                // Give the rival time to reach the blocked insert before
                // this transaction commits.
                std::thread::sleep(std::time::Duration::from_millis(500));
                Ok((held, rival))
            })
            .expect("holding transaction failed");

        let outcome = rival.join().expect("join").expect("reconcile failed");
        let ReconcileOutcome::AlreadyExists(summary) = outcome else {
            panic!("expected AlreadyExists");
        };
        assert_eq!(summary.order_id, held.id);

        // The losing transaction rolled back completely: one order, its
        // stock decrement undone, no stray guest row.
        assert_eq!(order_count(&mut conn), 1);
        assert_eq!(stock_of(&mut conn, item), 5);
        let guests: i64 = guest_users::table
            .count()
            .get_result(&mut conn)
            .expect("count failed");
        assert_eq!(guests, 0);
    }
}

