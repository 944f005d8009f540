//! Shared identifier types used across the shop backend crates.

pub mod types;

pub use types::{
    AddressId, CardId, CartId, CategoryId, FavoriteId, OrderId, PaymentId, ProductId, PromoId,
    UserId, VariantId,
};
