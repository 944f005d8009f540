//! The persistence seam: one trait, one method per atomic operation.

use async_trait::async_trait;
use common::{AddressId, CardId, CategoryId, FavoriteId, OrderId, ProductId, UserId, VariantId};
use domain::{
    CartView, Favorite, Money, OrderStatus, OrderView, Payment, PaymentCard, PaymentKind,
    PaymentMethod, Product, ProductCategory, ProductDetail, ProductVariant, ShippingAddress, User,
};
use serde::Deserialize;

use crate::Result;

/// Input for user registration.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
}

/// Catalog listing filter. The category is an explicit parameter on every
/// call; listings never depend on ambient state.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductFilter {
    pub category: Option<CategoryId>,
    pub search: Option<String>,
}

/// Input for recording a payment against an order.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPayment {
    pub kind: PaymentKind,
    pub method: PaymentMethod,
    #[serde(default)]
    pub last_four: String,
    #[serde(default)]
    pub exp_date: String,
}

/// Input for creating or updating a shipping address.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAddress {
    pub recipient_name: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub phone_number: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(rename = "shipping_cost_cents")]
    pub shipping_cost: Money,
}

/// Input for storing a payment card.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCard {
    pub last_four: String,
    #[serde(default)]
    pub brand: String,
    pub exp_date: String,
    #[serde(default)]
    pub is_default: bool,
}

/// Core trait for shop store implementations.
///
/// Every mutating method is atomic: it either fully applies or leaves the
/// store unchanged, including when the request is aborted mid-operation.
/// All user-owned data is scoped by the `UserId` the auth gate supplied;
/// reads of records the caller does not own fail with `NotFound`.
///
/// Implementations must be thread-safe (`Send + Sync`); operations on the
/// same rows from concurrent requests serialize per operation.
#[async_trait]
pub trait ShopStore: Send + Sync {
    // -- users & auth --

    /// Registers a user. Fails with `AlreadyExists` on a duplicate email.
    async fn create_user(&self, new: NewUser) -> Result<User>;

    /// Issues a new opaque bearer token for the user.
    async fn issue_token(&self, user_id: UserId) -> Result<String>;

    /// Resolves a bearer token to its user, if the token is known.
    async fn user_for_token(&self, token: &str) -> Result<Option<User>>;

    /// Fetches a user by id.
    async fn get_user(&self, user_id: UserId) -> Result<User>;

    // -- catalog --

    /// Lists all categories, ordered by name.
    async fn list_categories(&self) -> Result<Vec<ProductCategory>>;

    /// Lists products matching the filter, ordered by name.
    async fn list_products(&self, filter: ProductFilter) -> Result<Vec<Product>>;

    /// Fetches a product with its variants.
    async fn get_product(&self, product_id: ProductId) -> Result<ProductDetail>;

    /// Fetches a single variant.
    async fn get_variant(&self, variant_id: VariantId) -> Result<ProductVariant>;

    // -- inventory ledger --

    /// Decrements the variant's stock by `quantity` iff enough stock is
    /// available, as a single atomic check-and-decrement. Returns the
    /// remaining stock. Fails with `InsufficientStock` (carrying the
    /// available amount) or `NotFound`.
    async fn reserve(&self, variant_id: VariantId, quantity: u32) -> Result<u32>;

    /// Increments the variant's stock by `quantity` and returns the new
    /// stock level.
    async fn release(&self, variant_id: VariantId, quantity: u32) -> Result<u32>;

    // -- cart --

    /// Returns the user's cart with lines and derived totals, creating the
    /// cart row on first access. Totals are recomputed from live prices on
    /// every call.
    async fn cart(&self, user_id: UserId) -> Result<CartView>;

    /// Adds `quantity` of a variant to the cart, reserving stock in the
    /// same transaction. An existing line is incremented. On any failure
    /// neither the reservation nor the cart change is persisted.
    async fn add_cart_item(
        &self,
        user_id: UserId,
        variant_id: VariantId,
        quantity: u32,
    ) -> Result<CartView>;

    /// Removes up to `quantity` of a variant from the cart, releasing
    /// exactly the removed amount back to stock. Reductions past the line's
    /// quantity are clamped; a line reaching zero is deleted.
    async fn reduce_cart_item(
        &self,
        user_id: UserId,
        variant_id: VariantId,
        quantity: u32,
    ) -> Result<CartView>;

    /// Selects one of the user's own addresses for the cart.
    async fn select_shipping_address(
        &self,
        user_id: UserId,
        address_id: AddressId,
    ) -> Result<CartView>;

    /// Applies a promo code to the cart. The code must exist, be active,
    /// and be inside its validity window.
    async fn apply_promo_code(&self, user_id: UserId, code: &str) -> Result<CartView>;

    // -- checkout & orders --

    /// Converts the cart into an order: re-validates stock for every line
    /// under lock, creates the order and its items with prices frozen,
    /// decrements stock, and clears the cart, all in one transaction.
    /// Any failure leaves order, items, stock, and cart unchanged.
    async fn checkout(&self, user_id: UserId) -> Result<OrderView>;

    /// Lists the user's orders, newest first.
    async fn list_orders(&self, user_id: UserId) -> Result<Vec<OrderView>>;

    /// Fetches one of the user's orders.
    async fn get_order(&self, user_id: UserId, order_id: OrderId) -> Result<OrderView>;

    /// Moves an order to `next`, validated against the status state
    /// machine. Moving to `Cancelled` returns each line's quantity to
    /// stock in the same transaction.
    async fn advance_order_status(
        &self,
        user_id: UserId,
        order_id: OrderId,
        next: OrderStatus,
    ) -> Result<OrderView>;

    /// Cancels an order (Pending or Accepted only), restocking its items.
    async fn cancel_order(&self, user_id: UserId, order_id: OrderId) -> Result<OrderView> {
        self.advance_order_status(user_id, order_id, OrderStatus::Cancelled)
            .await
    }

    // -- payments --

    /// Records a pending payment for an order (one payment per order) and
    /// re-affirms the order's Pending status.
    async fn create_payment(
        &self,
        user_id: UserId,
        order_id: OrderId,
        new: NewPayment,
    ) -> Result<Payment>;

    /// Marks the order's payment completed and advances the order
    /// Pending → Accepted if, and only if, it is currently Pending.
    /// Completing an already-completed payment is a no-op.
    async fn complete_payment(&self, user_id: UserId, order_id: OrderId) -> Result<Payment>;

    /// Fetches the payment recorded for an order.
    async fn get_payment(&self, user_id: UserId, order_id: OrderId) -> Result<Payment>;

    // -- shipping addresses --

    /// Lists the user's addresses, default first.
    async fn list_addresses(&self, user_id: UserId) -> Result<Vec<ShippingAddress>>;

    /// Creates an address for the user.
    async fn create_address(&self, user_id: UserId, new: NewAddress) -> Result<ShippingAddress>;

    /// Replaces an address the user owns.
    async fn update_address(
        &self,
        user_id: UserId,
        address_id: AddressId,
        new: NewAddress,
    ) -> Result<ShippingAddress>;

    /// Deletes an address the user owns. Fails with `InUse` while any
    /// order references it; carts referencing it fall back to no selection.
    async fn delete_address(&self, user_id: UserId, address_id: AddressId) -> Result<()>;

    // -- payment cards --

    /// Lists the user's stored cards.
    async fn list_cards(&self, user_id: UserId) -> Result<Vec<PaymentCard>>;

    /// Stores a card for the user.
    async fn create_card(&self, user_id: UserId, new: NewCard) -> Result<PaymentCard>;

    /// Deletes a card the user owns.
    async fn delete_card(&self, user_id: UserId, card_id: CardId) -> Result<()>;

    // -- favorites --

    /// Lists the user's favorites, newest first.
    async fn list_favorites(&self, user_id: UserId) -> Result<Vec<Favorite>>;

    /// Favorites a product. Unique per (user, product).
    async fn add_favorite(&self, user_id: UserId, product_id: ProductId) -> Result<Favorite>;

    /// Removes a favorite the user owns.
    async fn remove_favorite(&self, user_id: UserId, favorite_id: FavoriteId) -> Result<()>;
}
