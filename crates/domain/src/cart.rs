//! The mutable pre-purchase basket.

use chrono::{DateTime, Utc};
use common::{AddressId, CartId, PromoId, UserId, VariantId};
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// A user's cart. Exactly one per user; the row survives checkout, only its
/// items are cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub user_id: UserId,
    pub shipping_address_id: Option<AddressId>,
    pub promo_code_id: Option<PromoId>,
    pub created_at: DateTime<Utc>,
}

/// A line in a cart. Quantity is always positive: reducing a line to zero
/// deletes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub cart_id: CartId,
    pub variant_id: VariantId,
    pub quantity: u32,
}

/// A cart item joined with the variant data needed to price and validate it.
///
/// `unit_price` and `in_stock` are read live at fetch time; nothing here is
/// frozen until checkout copies it into an order.
#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub variant_id: VariantId,
    pub sku: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub in_stock: u32,
}

impl CartLine {
    /// quantity × live unit price.
    pub fn subtotal(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A cart with its lines and derived totals.
///
/// Totals are recomputed from live variant prices on every construction and
/// never stored; prices and stock may drift between reads, which the
/// checkout transaction closes by re-validating under lock.
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub cart: Cart,
    pub lines: Vec<CartLine>,
    pub subtotal: Money,
    pub shipping_cost: Money,
    pub bag_total: Money,
}

impl CartView {
    /// Builds the view, computing subtotal and bag total once.
    ///
    /// `shipping_cost` is the cost of the selected shipping address, or zero
    /// while none is selected.
    pub fn new(cart: Cart, lines: Vec<CartLine>, shipping_cost: Money) -> Self {
        let subtotal: Money = lines.iter().map(CartLine::subtotal).sum();
        let bag_total = subtotal + shipping_cost;
        Self {
            cart,
            lines,
            subtotal,
            shipping_cost,
            bag_total,
        }
    }

    /// Returns true if the cart has no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart() -> Cart {
        Cart {
            id: CartId::new(),
            user_id: UserId::new(),
            shipping_address_id: Some(AddressId::new()),
            promo_code_id: None,
            created_at: Utc::now(),
        }
    }

    fn line(sku: &str, quantity: u32, unit_price_cents: i64) -> CartLine {
        CartLine {
            variant_id: VariantId::new(),
            sku: sku.to_string(),
            product_name: format!("product for {sku}"),
            quantity,
            unit_price: Money::from_cents(unit_price_cents),
            in_stock: 100,
        }
    }

    #[test]
    fn totals_for_worked_example() {
        // [(A, qty 2, $10.00), (B, qty 1, $5.00)], shipping $3.00
        let view = CartView::new(
            cart(),
            vec![line("SKU-A", 2, 1000), line("SKU-B", 1, 500)],
            Money::from_cents(300),
        );

        assert_eq!(view.subtotal.cents(), 2500);
        assert_eq!(view.bag_total.cents(), 2800);
    }

    #[test]
    fn empty_cart_totals_are_shipping_only() {
        let view = CartView::new(cart(), vec![], Money::from_cents(300));
        assert!(view.is_empty());
        assert_eq!(view.subtotal.cents(), 0);
        assert_eq!(view.bag_total.cents(), 300);
    }

    #[test]
    fn line_subtotal_uses_live_price() {
        let mut l = line("SKU-A", 3, 200);
        assert_eq!(l.subtotal().cents(), 600);

        l.unit_price = Money::from_cents(250);
        assert_eq!(l.subtotal().cents(), 750);
    }
}
