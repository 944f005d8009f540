//! The immutable post-purchase record.

mod status;

pub use status::OrderStatus;

use chrono::{DateTime, Utc};
use common::{AddressId, OrderId, PromoId, UserId, VariantId};
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// An order, created atomically by checkout.
///
/// Every field except `status` is frozen at checkout time: the shipping
/// address, promo code, shipping cost, and total are the cart's values at
/// the moment the transaction committed, regardless of later edits to any
/// of them. Orders are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub shipping_address_id: AddressId,
    pub promo_code_id: Option<PromoId>,
    pub status: OrderStatus,
    pub shipping_cost: Money,
    pub total_price: Money,
    pub created_at: DateTime<Utc>,
}

/// A line of an order.
///
/// `price_at_purchase` is the variant's current price copied at checkout;
/// later price changes never reach it. The SKU is copied for the same
/// reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub order_id: OrderId,
    pub variant_id: VariantId,
    pub sku: String,
    pub quantity: u32,
    pub price_at_purchase: Money,
}

impl OrderItem {
    /// quantity × frozen purchase price.
    pub fn subtotal(&self) -> Money {
        self.price_at_purchase.multiply(self.quantity)
    }
}

/// An order together with its lines, as returned by checkout and the order
/// endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_subtotal_uses_frozen_price() {
        let item = OrderItem {
            order_id: OrderId::new(),
            variant_id: VariantId::new(),
            sku: "SKU-A".to_string(),
            quantity: 2,
            price_at_purchase: Money::from_cents(1000),
        };
        assert_eq!(item.subtotal().cents(), 2000);
    }
}
