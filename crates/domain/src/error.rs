//! Domain error taxonomy.
//!
//! Every operation failure is surfaced as one of these kinds; nothing in the
//! core panics on user input.

use thiserror::Error;

use crate::order::OrderStatus;

/// Errors produced by domain validation and store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShopError {
    /// A referenced record is absent or not owned by the caller.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Requested quantity exceeds the variant's available stock.
    #[error("insufficient stock for {sku}: requested {requested}, available {available}")]
    InsufficientStock {
        sku: String,
        requested: u32,
        available: u32,
    },

    /// A zero quantity was supplied where a positive one is required.
    #[error("invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// Checkout attempted on a cart with no line items.
    #[error("cart is empty")]
    EmptyCart,

    /// Checkout attempted before a shipping address was selected.
    #[error("no shipping address selected")]
    NoShippingAddress,

    /// The order status state machine rejected a move.
    #[error("invalid order status transition: {from} -> {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    /// A uniqueness constraint was violated (payment per order, favorite
    /// per product, user email).
    #[error("{entity} already exists")]
    AlreadyExists { entity: &'static str },

    /// The record is referenced by other records and cannot be deleted.
    #[error("{entity} is still referenced and cannot be deleted")]
    InUse { entity: &'static str },

    /// The promo code exists but is inactive or outside its validity window.
    #[error("promo code is not valid: {code}")]
    InvalidPromoCode { code: String },
}

impl ShopError {
    /// Shorthand for [`ShopError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        ShopError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
