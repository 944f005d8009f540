//! Checkout preparation: validation and price freezing.
//!
//! This is the pure half of the checkout transactor. Both store backends
//! call [`prepare_order`] inside their transaction, with the cart's variant
//! rows already locked, so the stock re-check and the persisted order are
//! guaranteed to agree.

use common::{AddressId, PromoId, VariantId};

use crate::cart::CartView;
use crate::error::ShopError;
use crate::money::Money;

/// An order line with the purchase price already frozen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedLine {
    pub variant_id: VariantId,
    pub sku: String,
    pub quantity: u32,
    pub price_at_purchase: Money,
}

/// Everything the store needs to persist an order, computed once.
#[derive(Debug, Clone)]
pub struct PreparedOrder {
    pub shipping_address_id: AddressId,
    pub promo_code_id: Option<PromoId>,
    pub shipping_cost: Money,
    pub total_price: Money,
    pub lines: Vec<PreparedLine>,
}

/// Validates a cart for checkout and freezes its prices and totals.
///
/// Fails with [`ShopError::EmptyCart`] on a cart with no lines, with
/// [`ShopError::NoShippingAddress`] while no address is selected, and with
/// [`ShopError::InsufficientStock`] naming the first line whose quantity
/// exceeds the stock read under the caller's lock. On success, no partial
/// result exists: either every line was valid or nothing is returned.
///
/// This is the second stock check for each line (the first ran when the
/// item entered the cart) and is not redundant: other carts may have
/// consumed the same stock in between.
pub fn prepare_order(cart: &CartView) -> Result<PreparedOrder, ShopError> {
    if cart.is_empty() {
        return Err(ShopError::EmptyCart);
    }

    let shipping_address_id = cart
        .cart
        .shipping_address_id
        .ok_or(ShopError::NoShippingAddress)?;

    for line in &cart.lines {
        if line.in_stock < line.quantity {
            return Err(ShopError::InsufficientStock {
                sku: line.sku.clone(),
                requested: line.quantity,
                available: line.in_stock,
            });
        }
    }

    let lines = cart
        .lines
        .iter()
        .map(|line| PreparedLine {
            variant_id: line.variant_id,
            sku: line.sku.clone(),
            quantity: line.quantity,
            price_at_purchase: line.unit_price,
        })
        .collect();

    Ok(PreparedOrder {
        shipping_address_id,
        promo_code_id: cart.cart.promo_code_id,
        shipping_cost: cart.shipping_cost,
        total_price: cart.bag_total,
        lines,
    })
}
