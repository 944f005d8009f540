//! Domain layer for the shop backend.
//!
//! Pure types and rules, no I/O:
//! - catalog, cart, order, payment, and account records
//! - the order status state machine
//! - checkout preparation (validation + price freezing)
//! - the [`ShopError`] taxonomy every operation reports through

pub mod account;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod error;
pub mod money;
pub mod order;
pub mod payment;

pub use account::{Favorite, PaymentCard, PromoCode, ShippingAddress, User};
pub use cart::{Cart, CartItem, CartLine, CartView};
pub use catalog::{Product, ProductCategory, ProductDetail, ProductVariant};
pub use checkout::{PreparedLine, PreparedOrder, prepare_order};
pub use error::ShopError;
pub use money::Money;
pub use order::{Order, OrderItem, OrderStatus, OrderView};
pub use payment::{
    Payment, PaymentKind, PaymentMethod, PaymentStatus, order_status_after_completion,
    order_status_on_creation,
};
