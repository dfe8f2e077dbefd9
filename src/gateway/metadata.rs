//! Versioned codec for the string-keyed metadata carried on a payment
//! intent. The metadata is the only state shared with the processor: it
//! names the owner (user id or guest cookie id), carries the guest's cart
//! and contact details, the shipping destination, and, after reconciliation,
//! the created order id.
//!
//! Processor metadata values are capped at [`VALUE_LIMIT`] characters, so
//! large guest carts fall back to a compact encoding. The active encoding is
//! always named by the `cart_format` key; the decoder dispatches on that tag
//! and never infers the format from item shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Maximum length of a single metadata value accepted by the processor.
pub const VALUE_LIMIT: usize = 500;

const FORMAT_VERBOSE: &str = "v1";
const FORMAT_COMPACT: &str = "v1c";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Cart does not fit in intent metadata even in compact form")]
    CartTooLarge,

    #[error("Malformed intent metadata: {0}")]
    Malformed(String),
}

/// A cart line as carried in metadata. Quantities only; prices are always
/// re-resolved server-side at reconciliation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaCartLine {
    pub product_item_id: Uuid,
    pub qty: i32,
}

#[derive(Serialize, Deserialize)]
struct CompactLine {
    i: Uuid,
    q: i32,
}

/// Who the intent belongs to, as recorded at creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataOwner {
    User(Uuid),
    Guest(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntentMetadata {
    pub user_id: Option<Uuid>,
    pub guest_id: Option<String>,
    pub guest_email: Option<String>,
    pub guest_first_name: Option<String>,
    pub guest_last_name: Option<String>,
    pub shipping_line1: Option<String>,
    pub shipping_line2: Option<String>,
    pub shipping_city: Option<String>,
    pub shipping_state: Option<String>,
    pub shipping_postal_code: Option<String>,
    pub shipping_country: Option<String>,
    pub shipping_phone: Option<String>,
    pub address_id: Option<Uuid>,
    pub shipping_vendor_id: Option<i32>,
    pub order_id: Option<Uuid>,
    /// Guest cart lines. Authenticated carts live in the database instead.
    pub cart: Option<Vec<MetaCartLine>>,
}

impl IntentMetadata {
    pub fn owner(&self) -> Option<MetadataOwner> {
        if let Some(uid) = self.user_id {
            Some(MetadataOwner::User(uid))
        } else {
            self.guest_id.clone().map(MetadataOwner::Guest)
        }
    }

    /// Flatten into the processor's string-keyed map. Unset fields are
    /// omitted entirely so a later merge cannot clobber them with blanks.
    pub fn to_map(&self) -> Result<BTreeMap<String, String>, MetadataError> {
        let mut map = BTreeMap::new();

        let mut put = |key: &str, value: Option<String>| {
            if let Some(v) = value {
                map.insert(key.to_string(), v);
            }
        };

        put("user_id", self.user_id.map(|u| u.to_string()));
        put("guest_id", self.guest_id.clone());
        put("guest_email", self.guest_email.clone());
        put("guest_first_name", self.guest_first_name.clone());
        put("guest_last_name", self.guest_last_name.clone());
        put("shipping_line1", self.shipping_line1.clone());
        put("shipping_line2", self.shipping_line2.clone());
        put("shipping_city", self.shipping_city.clone());
        put("shipping_state", self.shipping_state.clone());
        put("shipping_postal_code", self.shipping_postal_code.clone());
        put("shipping_country", self.shipping_country.clone());
        put("shipping_phone", self.shipping_phone.clone());
        put("address_id", self.address_id.map(|u| u.to_string()));
        put(
            "shipping_vendor_id",
            self.shipping_vendor_id.map(|v| v.to_string()),
        );
        put("order_id", self.order_id.map(|u| u.to_string()));

        if let Some(cart) = &self.cart {
            let verbose = serde_json::to_string(cart)
                .map_err(|e| MetadataError::Malformed(e.to_string()))?;
            if verbose.len() <= VALUE_LIMIT {
                map.insert("cart_format".to_string(), FORMAT_VERBOSE.to_string());
                map.insert("cart_items".to_string(), verbose);
            } else {
                let compact: Vec<CompactLine> = cart
                    .iter()
                    .map(|l| CompactLine {
                        i: l.product_item_id,
                        q: l.qty,
                    })
                    .collect();
                let encoded = serde_json::to_string(&compact)
                    .map_err(|e| MetadataError::Malformed(e.to_string()))?;
                if encoded.len() > VALUE_LIMIT {
                    return Err(MetadataError::CartTooLarge);
                }
                map.insert("cart_format".to_string(), FORMAT_COMPACT.to_string());
                map.insert("cart_items".to_string(), encoded);
            }
        }

        Ok(map)
    }

    /// Parse the processor's map back into structured metadata. Unknown keys
    /// are ignored; a missing `cart_format` tag on a present `cart_items`
    /// value means a pre-tag payload and is read as the verbose format.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, MetadataError> {
        let non_empty = |key: &str| -> Option<String> {
            map.get(key).filter(|v| !v.is_empty()).cloned()
        };
        let parse_uuid = |key: &str| -> Result<Option<Uuid>, MetadataError> {
            non_empty(key)
                .map(|v| {
                    Uuid::parse_str(&v)
                        .map_err(|e| MetadataError::Malformed(format!("{key}: {e}")))
                })
                .transpose()
        };

        let cart = match non_empty("cart_items") {
            None => None,
            Some(raw) => {
                let format = non_empty("cart_format")
                    .unwrap_or_else(|| FORMAT_VERBOSE.to_string());
                let lines = match format.as_str() {
                    FORMAT_VERBOSE => serde_json::from_str::<Vec<MetaCartLine>>(&raw)
                        .map_err(|e| MetadataError::Malformed(format!("cart_items: {e}")))?,
                    FORMAT_COMPACT => serde_json::from_str::<Vec<CompactLine>>(&raw)
                        .map_err(|e| MetadataError::Malformed(format!("cart_items: {e}")))?
                        .into_iter()
                        .map(|l| MetaCartLine {
                            product_item_id: l.i,
                            qty: l.q,
                        })
                        .collect(),
                    other => {
                        return Err(MetadataError::Malformed(format!(
                            "unknown cart_format '{other}'"
                        )))
                    }
                };
                Some(lines)
            }
        };

        Ok(IntentMetadata {
            user_id: parse_uuid("user_id")?,
            guest_id: non_empty("guest_id"),
            guest_email: non_empty("guest_email"),
            guest_first_name: non_empty("guest_first_name"),
            guest_last_name: non_empty("guest_last_name"),
            shipping_line1: non_empty("shipping_line1"),
            shipping_line2: non_empty("shipping_line2"),
            shipping_city: non_empty("shipping_city"),
            shipping_state: non_empty("shipping_state"),
            shipping_postal_code: non_empty("shipping_postal_code"),
            shipping_country: non_empty("shipping_country"),
            shipping_phone: non_empty("shipping_phone"),
            address_id: parse_uuid("address_id")?,
            shipping_vendor_id: non_empty("shipping_vendor_id")
                .map(|v| {
                    v.parse::<i32>()
                        .map_err(|e| MetadataError::Malformed(format!("shipping_vendor_id: {e}")))
                })
                .transpose()?,
            order_id: parse_uuid("order_id")?,
            cart,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(n: usize) -> Vec<MetaCartLine> {
        (0..n)
            .map(|i| MetaCartLine {
                product_item_id: Uuid::new_v4(),
                qty: (i + 1) as i32,
            })
            .collect()
    }

    #[test]
    fn small_cart_uses_verbose_format() {
        let meta = IntentMetadata {
            guest_id: Some("g-123".to_string()),
            cart: Some(lines(2)),
            ..Default::default()
        };
        let map = meta.to_map().expect("encode failed");
        assert_eq!(map.get("cart_format").map(String::as_str), Some("v1"));
        assert!(map["cart_items"].contains("product_item_id"));
    }

    #[test]
    fn large_cart_falls_back_to_compact_and_tags_it() {
        let meta = IntentMetadata {
            guest_id: Some("g-123".to_string()),
            // Verbose encoding of ~8 lines exceeds 500 chars.
            cart: Some(lines(8)),
            ..Default::default()
        };
        let map = meta.to_map().expect("encode failed");
        assert_eq!(map.get("cart_format").map(String::as_str), Some("v1c"));
        assert!(map["cart_items"].len() <= VALUE_LIMIT);
        assert!(!map["cart_items"].contains("product_item_id"));
    }

    #[test]
    fn both_formats_decode_to_the_same_cart() {
        for n in [2, 8] {
            let cart = lines(n);
            let meta = IntentMetadata {
                guest_id: Some("g".to_string()),
                cart: Some(cart.clone()),
                ..Default::default()
            };
            let decoded =
                IntentMetadata::from_map(&meta.to_map().expect("encode")).expect("decode");
            assert_eq!(decoded.cart.as_deref(), Some(cart.as_slice()));
        }
    }

    #[test]
    fn untagged_cart_items_reads_as_verbose() {
        let cart = lines(1);
        let mut map = BTreeMap::new();
        map.insert(
            "cart_items".to_string(),
            serde_json::to_string(&cart).unwrap(),
        );
        let decoded = IntentMetadata::from_map(&map).expect("decode");
        assert_eq!(decoded.cart.as_deref(), Some(cart.as_slice()));
    }

    #[test]
    fn unknown_cart_format_is_rejected_not_sniffed() {
        let mut map = BTreeMap::new();
        map.insert("cart_format".to_string(), "v2".to_string());
        map.insert("cart_items".to_string(), "[]".to_string());
        assert!(matches!(
            IntentMetadata::from_map(&map),
            Err(MetadataError::Malformed(_))
        ));
    }

    #[test]
    fn oversized_compact_cart_is_an_error() {
        let meta = IntentMetadata {
            cart: Some(lines(40)),
            ..Default::default()
        };
        assert!(matches!(meta.to_map(), Err(MetadataError::CartTooLarge)));
    }

    #[test]
    fn roundtrip_preserves_every_field() {
        let meta = IntentMetadata {
            user_id: Some(Uuid::new_v4()),
            guest_email: Some("jane@example.com".to_string()),
            guest_first_name: Some("Jane".to_string()),
            guest_last_name: Some("Smith".to_string()),
            shipping_line1: Some("1 High St".to_string()),
            shipping_line2: Some("Unit 2".to_string()),
            shipping_city: Some("Sydney".to_string()),
            shipping_state: Some("NSW".to_string()),
            shipping_postal_code: Some("2000".to_string()),
            shipping_country: Some("AU".to_string()),
            shipping_phone: Some("0400000000".to_string()),
            address_id: Some(Uuid::new_v4()),
            shipping_vendor_id: Some(3),
            order_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        let decoded = IntentMetadata::from_map(&meta.to_map().expect("encode")).expect("decode");
        assert_eq!(decoded, meta);
    }

    #[test]
    fn owner_prefers_user_over_guest() {
        let uid = Uuid::new_v4();
        let meta = IntentMetadata {
            user_id: Some(uid),
            guest_id: Some("g".to_string()),
            ..Default::default()
        };
        assert_eq!(meta.owner(), Some(MetadataOwner::User(uid)));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut map = BTreeMap::new();
        map.insert("some_future_key".to_string(), "x".to_string());
        map.insert("guest_id".to_string(), "g-9".to_string());
        let decoded = IntentMetadata::from_map(&map).expect("decode");
        assert_eq!(decoded.guest_id.as_deref(), Some("g-9"));
    }
}
