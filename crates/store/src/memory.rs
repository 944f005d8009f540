//! In-memory store implementation for tests.
//!
//! Stores every table in one struct behind a single `tokio::sync::RwLock`.
//! Each operation holds the write guard for its whole duration, which gives
//! the same serializable-per-operation semantics the Postgres implementation
//! gets from transactions and row locks.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{
    AddressId, CardId, CartId, CategoryId, FavoriteId, OrderId, PaymentId, ProductId, PromoId,
    UserId, VariantId,
};
use domain::{
    Cart, CartLine, CartView, Favorite, Money, Order, OrderItem, OrderStatus, OrderView, Payment,
    PaymentCard, PaymentStatus, Product, ProductCategory, ProductDetail, ProductVariant, PromoCode,
    ShippingAddress, ShopError, User, order_status_after_completion, order_status_on_creation,
    prepare_order,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::Result;
use crate::store::{NewAddress, NewCard, NewPayment, NewUser, ProductFilter, ShopStore};

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, User>,
    tokens: HashMap<String, UserId>,
    categories: HashMap<CategoryId, ProductCategory>,
    products: HashMap<ProductId, Product>,
    variants: HashMap<VariantId, ProductVariant>,
    promo_codes: HashMap<PromoId, PromoCode>,
    addresses: HashMap<AddressId, ShippingAddress>,
    carts: HashMap<UserId, Cart>,
    // BTreeMap keeps line order stable across reads.
    cart_items: HashMap<CartId, BTreeMap<VariantId, u32>>,
    orders: HashMap<OrderId, Order>,
    order_items: HashMap<OrderId, Vec<OrderItem>>,
    payments: HashMap<OrderId, Payment>,
    favorites: HashMap<FavoriteId, Favorite>,
    cards: HashMap<CardId, PaymentCard>,
}

impl State {
    fn ensure_cart(&mut self, user_id: UserId) -> Cart {
        self.carts
            .entry(user_id)
            .or_insert_with(|| Cart {
                id: CartId::new(),
                user_id,
                shipping_address_id: None,
                promo_code_id: None,
                created_at: Utc::now(),
            })
            .clone()
    }

    fn cart_view(&self, cart: &Cart) -> Result<CartView> {
        let mut lines = Vec::new();
        if let Some(items) = self.cart_items.get(&cart.id) {
            for (&variant_id, &quantity) in items {
                let variant = self
                    .variants
                    .get(&variant_id)
                    .ok_or_else(|| ShopError::not_found("product variant", variant_id))?;
                let product_name = self
                    .products
                    .get(&variant.product_id)
                    .map(|p| p.name.clone())
                    .unwrap_or_default();
                lines.push(CartLine {
                    variant_id,
                    sku: variant.sku.clone(),
                    product_name,
                    quantity,
                    unit_price: variant.current_price,
                    in_stock: variant.stock_quantity,
                });
            }
        }

        let shipping_cost = cart
            .shipping_address_id
            .and_then(|id| self.addresses.get(&id))
            .map(|a| a.shipping_cost)
            .unwrap_or_else(Money::zero);

        Ok(CartView::new(cart.clone(), lines, shipping_cost))
    }

    fn reserve_stock(&mut self, variant_id: VariantId, quantity: u32) -> Result<u32> {
        if quantity == 0 {
            return Err(ShopError::InvalidQuantity { quantity }.into());
        }
        let variant = self
            .variants
            .get_mut(&variant_id)
            .ok_or_else(|| ShopError::not_found("product variant", variant_id))?;
        if variant.stock_quantity < quantity {
            return Err(ShopError::InsufficientStock {
                sku: variant.sku.clone(),
                requested: quantity,
                available: variant.stock_quantity,
            }
            .into());
        }
        variant.stock_quantity -= quantity;
        Ok(variant.stock_quantity)
    }

    fn release_stock(&mut self, variant_id: VariantId, quantity: u32) -> Result<u32> {
        if quantity == 0 {
            return Err(ShopError::InvalidQuantity { quantity }.into());
        }
        let variant = self
            .variants
            .get_mut(&variant_id)
            .ok_or_else(|| ShopError::not_found("product variant", variant_id))?;
        variant.stock_quantity += quantity;
        Ok(variant.stock_quantity)
    }

    fn owned_order(&self, user_id: UserId, order_id: OrderId) -> Result<Order> {
        self.orders
            .get(&order_id)
            .filter(|o| o.user_id == user_id)
            .cloned()
            .ok_or_else(|| ShopError::not_found("order", order_id).into())
    }

    fn order_view(&self, order: Order) -> OrderView {
        let items = self.order_items.get(&order.id).cloned().unwrap_or_default();
        OrderView { order, items }
    }
}

/// In-memory shop store for tests.
///
/// Implements the full [`ShopStore`] contract, plus seeding helpers that
/// stand in for the catalog-management surface this system does not expose.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a category.
    pub async fn seed_category(&self, name: &str) -> ProductCategory {
        let category = ProductCategory {
            id: CategoryId::new(),
            name: name.to_string(),
            description: String::new(),
        };
        self.state
            .write()
            .await
            .categories
            .insert(category.id, category.clone());
        category
    }

    /// Seeds a product under a category.
    pub async fn seed_product(
        &self,
        category_id: CategoryId,
        name: &str,
        base_price: Money,
    ) -> Product {
        let product = Product {
            id: ProductId::new(),
            category_id,
            name: name.to_string(),
            description: String::new(),
            base_price,
            is_active: true,
            created_at: Utc::now(),
        };
        self.state
            .write()
            .await
            .products
            .insert(product.id, product.clone());
        product
    }

    /// Seeds a variant with the given price and stock.
    pub async fn seed_variant(
        &self,
        product_id: ProductId,
        sku: &str,
        price: Money,
        stock: u32,
    ) -> ProductVariant {
        let variant = ProductVariant {
            id: VariantId::new(),
            product_id,
            sku: sku.to_string(),
            current_price: price,
            original_price: price,
            stock_quantity: stock,
            is_available: true,
            color: None,
            size: None,
        };
        self.state
            .write()
            .await
            .variants
            .insert(variant.id, variant.clone());
        variant
    }

    /// Seeds a promo code valid around now.
    pub async fn seed_promo(&self, code: &str, discount_percent: u8, is_active: bool) -> PromoCode {
        let now = Utc::now();
        let promo = PromoCode {
            id: PromoId::new(),
            code: code.to_string(),
            discount_percent,
            is_active,
            valid_from: now - chrono::Duration::days(1),
            valid_until: now + chrono::Duration::days(30),
        };
        self.state
            .write()
            .await
            .promo_codes
            .insert(promo.id, promo.clone());
        promo
    }

    /// Places a line directly into a user's cart without reserving stock.
    ///
    /// Test fixture for constructed cart states, e.g. two carts referencing
    /// the same variant with less stock than their combined quantity.
    pub async fn seed_cart_item(&self, user_id: UserId, variant_id: VariantId, quantity: u32) {
        let mut state = self.state.write().await;
        let cart = state.ensure_cart(user_id);
        *state
            .cart_items
            .entry(cart.id)
            .or_default()
            .entry(variant_id)
            .or_insert(0) += quantity;
    }

    /// Overwrites a variant's current price; used to verify the purchase
    /// price freeze.
    pub async fn set_variant_price(&self, variant_id: VariantId, price: Money) {
        if let Some(variant) = self.state.write().await.variants.get_mut(&variant_id) {
            variant.current_price = price;
        }
    }

    /// Returns a variant's current stock, if it exists.
    pub async fn variant_stock(&self, variant_id: VariantId) -> Option<u32> {
        self.state
            .read()
            .await
            .variants
            .get(&variant_id)
            .map(|v| v.stock_quantity)
    }

    /// Total number of orders across all users.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl ShopStore for MemoryStore {
    async fn create_user(&self, new: NewUser) -> Result<User> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.email == new.email) {
            return Err(ShopError::AlreadyExists { entity: "user" }.into());
        }
        let user = User {
            id: UserId::new(),
            email: new.email,
            first_name: new.first_name,
            last_name: new.last_name,
            phone_number: new.phone_number,
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn issue_token(&self, user_id: UserId) -> Result<String> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&user_id) {
            return Err(ShopError::not_found("user", user_id).into());
        }
        let token = Uuid::new_v4().simple().to_string();
        state.tokens.insert(token.clone(), user_id);
        Ok(token)
    }

    async fn user_for_token(&self, token: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state
            .tokens
            .get(token)
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    async fn get_user(&self, user_id: UserId) -> Result<User> {
        self.state
            .read()
            .await
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| ShopError::not_found("user", user_id).into())
    }

    async fn list_categories(&self) -> Result<Vec<ProductCategory>> {
        let state = self.state.read().await;
        let mut categories: Vec<_> = state.categories.values().cloned().collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn list_products(&self, filter: ProductFilter) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        let search = filter.search.map(|s| s.to_lowercase());
        let mut products: Vec<_> = state
            .products
            .values()
            .filter(|p| filter.category.is_none_or(|c| p.category_id == c))
            .filter(|p| {
                search
                    .as_deref()
                    .is_none_or(|s| p.name.to_lowercase().contains(s))
            })
            .cloned()
            .collect();
        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }

    async fn get_product(&self, product_id: ProductId) -> Result<ProductDetail> {
        let state = self.state.read().await;
        let product = state
            .products
            .get(&product_id)
            .cloned()
            .ok_or_else(|| ShopError::not_found("product", product_id))?;
        let mut variants: Vec<_> = state
            .variants
            .values()
            .filter(|v| v.product_id == product_id)
            .cloned()
            .collect();
        variants.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(ProductDetail { product, variants })
    }

    async fn get_variant(&self, variant_id: VariantId) -> Result<ProductVariant> {
        self.state
            .read()
            .await
            .variants
            .get(&variant_id)
            .cloned()
            .ok_or_else(|| ShopError::not_found("product variant", variant_id).into())
    }

    async fn reserve(&self, variant_id: VariantId, quantity: u32) -> Result<u32> {
        self.state.write().await.reserve_stock(variant_id, quantity)
    }

    async fn release(&self, variant_id: VariantId, quantity: u32) -> Result<u32> {
        self.state.write().await.release_stock(variant_id, quantity)
    }

    async fn cart(&self, user_id: UserId) -> Result<CartView> {
        let mut state = self.state.write().await;
        let cart = state.ensure_cart(user_id);
        state.cart_view(&cart)
    }

    async fn add_cart_item(
        &self,
        user_id: UserId,
        variant_id: VariantId,
        quantity: u32,
    ) -> Result<CartView> {
        if quantity == 0 {
            return Err(ShopError::InvalidQuantity { quantity }.into());
        }
        let mut state = self.state.write().await;
        let cart = state.ensure_cart(user_id);
        state.reserve_stock(variant_id, quantity)?;
        *state
            .cart_items
            .entry(cart.id)
            .or_default()
            .entry(variant_id)
            .or_insert(0) += quantity;
        state.cart_view(&cart)
    }

    async fn reduce_cart_item(
        &self,
        user_id: UserId,
        variant_id: VariantId,
        quantity: u32,
    ) -> Result<CartView> {
        if quantity == 0 {
            return Err(ShopError::InvalidQuantity { quantity }.into());
        }
        let mut state = self.state.write().await;
        let cart = state.ensure_cart(user_id);

        let current = state
            .cart_items
            .get(&cart.id)
            .and_then(|items| items.get(&variant_id).copied())
            .ok_or_else(|| ShopError::not_found("cart item", variant_id))?;

        // Reductions past the line quantity are clamped, not rejected.
        let removed = quantity.min(current);
        state.release_stock(variant_id, removed)?;

        let items = state.cart_items.entry(cart.id).or_default();
        if current - removed == 0 {
            items.remove(&variant_id);
        } else if let Some(q) = items.get_mut(&variant_id) {
            *q = current - removed;
        }
        state.cart_view(&cart)
    }

    async fn select_shipping_address(
        &self,
        user_id: UserId,
        address_id: AddressId,
    ) -> Result<CartView> {
        let mut state = self.state.write().await;
        let owned = state
            .addresses
            .get(&address_id)
            .is_some_and(|a| a.user_id == user_id);
        if !owned {
            return Err(ShopError::not_found("shipping address", address_id).into());
        }
        state.ensure_cart(user_id);
        let cart = {
            let cart = state
                .carts
                .get_mut(&user_id)
                .ok_or_else(|| ShopError::not_found("cart", user_id))?;
            cart.shipping_address_id = Some(address_id);
            cart.clone()
        };
        state.cart_view(&cart)
    }

    async fn apply_promo_code(&self, user_id: UserId, code: &str) -> Result<CartView> {
        let mut state = self.state.write().await;
        let promo = state
            .promo_codes
            .values()
            .find(|p| p.code == code)
            .cloned()
            .ok_or_else(|| ShopError::not_found("promo code", code))?;
        if !promo.is_valid_at(Utc::now()) {
            return Err(ShopError::InvalidPromoCode {
                code: code.to_string(),
            }
            .into());
        }
        state.ensure_cart(user_id);
        let cart = {
            let cart = state
                .carts
                .get_mut(&user_id)
                .ok_or_else(|| ShopError::not_found("cart", user_id))?;
            cart.promo_code_id = Some(promo.id);
            cart.clone()
        };
        state.cart_view(&cart)
    }

    #[tracing::instrument(skip(self))]
    async fn checkout(&self, user_id: UserId) -> Result<OrderView> {
        metrics::counter!("checkout_attempts_total").increment(1);
        let start = std::time::Instant::now();

        let mut state = self.state.write().await;
        let cart = state.ensure_cart(user_id);
        let view = state.cart_view(&cart)?;

        let prepared = prepare_order(&view).inspect_err(|_| {
            metrics::counter!("checkout_failures_total").increment(1);
        })?;

        // Validation passed under the write guard; everything below is the
        // all-or-nothing mutation.
        let order = Order {
            id: OrderId::new(),
            user_id,
            shipping_address_id: prepared.shipping_address_id,
            promo_code_id: prepared.promo_code_id,
            status: OrderStatus::Pending,
            shipping_cost: prepared.shipping_cost,
            total_price: prepared.total_price,
            created_at: Utc::now(),
        };
        let items: Vec<OrderItem> = prepared
            .lines
            .iter()
            .map(|line| OrderItem {
                order_id: order.id,
                variant_id: line.variant_id,
                sku: line.sku.clone(),
                quantity: line.quantity,
                price_at_purchase: line.price_at_purchase,
            })
            .collect();

        for line in &prepared.lines {
            if let Some(variant) = state.variants.get_mut(&line.variant_id) {
                variant.stock_quantity -= line.quantity;
            }
        }
        state.orders.insert(order.id, order.clone());
        state.order_items.insert(order.id, items.clone());
        state.cart_items.remove(&cart.id);

        metrics::counter!("orders_created_total").increment(1);
        metrics::histogram!("checkout_duration_seconds").record(start.elapsed().as_secs_f64());
        tracing::info!(order_id = %order.id, total_cents = order.total_price.cents(), "order created");

        Ok(OrderView { order, items })
    }

    async fn list_orders(&self, user_id: UserId) -> Result<Vec<OrderView>> {
        let state = self.state.read().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders
            .into_iter()
            .map(|o| state.order_view(o))
            .collect())
    }

    async fn get_order(&self, user_id: UserId, order_id: OrderId) -> Result<OrderView> {
        let state = self.state.read().await;
        let order = state.owned_order(user_id, order_id)?;
        Ok(state.order_view(order))
    }

    #[tracing::instrument(skip(self))]
    async fn advance_order_status(
        &self,
        user_id: UserId,
        order_id: OrderId,
        next: OrderStatus,
    ) -> Result<OrderView> {
        let mut state = self.state.write().await;
        let order = state.owned_order(user_id, order_id)?;

        if !order.status.can_transition_to(next) {
            return Err(ShopError::InvalidStatusTransition {
                from: order.status,
                to: next,
            }
            .into());
        }

        if next == OrderStatus::Cancelled {
            let items = state.order_items.get(&order_id).cloned().unwrap_or_default();
            for item in items {
                state.release_stock(item.variant_id, item.quantity)?;
            }
        }

        let order = {
            let order = state
                .orders
                .get_mut(&order_id)
                .ok_or_else(|| ShopError::not_found("order", order_id))?;
            order.status = next;
            order.clone()
        };
        Ok(state.order_view(order))
    }

    async fn create_payment(
        &self,
        user_id: UserId,
        order_id: OrderId,
        new: NewPayment,
    ) -> Result<Payment> {
        let mut state = self.state.write().await;
        let order = state.owned_order(user_id, order_id)?;
        if state.payments.contains_key(&order_id) {
            return Err(ShopError::AlreadyExists { entity: "payment" }.into());
        }

        let payment = Payment {
            id: PaymentId::new(),
            order_id,
            kind: new.kind,
            method: new.method,
            status: PaymentStatus::Pending,
            last_four: new.last_four,
            exp_date: new.exp_date,
            created_at: Utc::now(),
        };
        state.payments.insert(order_id, payment.clone());

        if let Some(status) = order_status_on_creation(order.status)
            && let Some(order) = state.orders.get_mut(&order_id)
        {
            order.status = status;
        }
        Ok(payment)
    }

    async fn complete_payment(&self, user_id: UserId, order_id: OrderId) -> Result<Payment> {
        let mut state = self.state.write().await;
        let order = state.owned_order(user_id, order_id)?;

        let payment = state
            .payments
            .get_mut(&order_id)
            .ok_or_else(|| ShopError::not_found("payment", order_id))?;
        if payment.status == PaymentStatus::Completed {
            return Ok(payment.clone());
        }
        payment.status = PaymentStatus::Completed;
        let payment = payment.clone();

        if let Some(next) = order_status_after_completion(order.status)
            && let Some(order) = state.orders.get_mut(&order_id)
        {
            order.status = next;
        }
        Ok(payment)
    }

    async fn get_payment(&self, user_id: UserId, order_id: OrderId) -> Result<Payment> {
        let state = self.state.read().await;
        state.owned_order(user_id, order_id)?;
        state
            .payments
            .get(&order_id)
            .cloned()
            .ok_or_else(|| ShopError::not_found("payment", order_id).into())
    }

    async fn list_addresses(&self, user_id: UserId) -> Result<Vec<ShippingAddress>> {
        let state = self.state.read().await;
        let mut addresses: Vec<_> = state
            .addresses
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        addresses.sort_by(|a, b| {
            b.is_default
                .cmp(&a.is_default)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(addresses)
    }

    async fn create_address(&self, user_id: UserId, new: NewAddress) -> Result<ShippingAddress> {
        let mut state = self.state.write().await;
        let address = ShippingAddress {
            id: AddressId::new(),
            user_id,
            recipient_name: new.recipient_name,
            street: new.street,
            city: new.city,
            state: new.state,
            postal_code: new.postal_code,
            country: new.country,
            phone_number: new.phone_number,
            is_default: new.is_default,
            shipping_cost: new.shipping_cost,
            created_at: Utc::now(),
        };
        state.addresses.insert(address.id, address.clone());
        Ok(address)
    }

    async fn update_address(
        &self,
        user_id: UserId,
        address_id: AddressId,
        new: NewAddress,
    ) -> Result<ShippingAddress> {
        let mut state = self.state.write().await;
        let address = state
            .addresses
            .get_mut(&address_id)
            .filter(|a| a.user_id == user_id)
            .ok_or_else(|| ShopError::not_found("shipping address", address_id))?;

        address.recipient_name = new.recipient_name;
        address.street = new.street;
        address.city = new.city;
        address.state = new.state;
        address.postal_code = new.postal_code;
        address.country = new.country;
        address.phone_number = new.phone_number;
        address.is_default = new.is_default;
        address.shipping_cost = new.shipping_cost;
        Ok(address.clone())
    }

    async fn delete_address(&self, user_id: UserId, address_id: AddressId) -> Result<()> {
        let mut state = self.state.write().await;
        let owned = state
            .addresses
            .get(&address_id)
            .is_some_and(|a| a.user_id == user_id);
        if !owned {
            return Err(ShopError::not_found("shipping address", address_id).into());
        }
        if state
            .orders
            .values()
            .any(|o| o.shipping_address_id == address_id)
        {
            return Err(ShopError::InUse {
                entity: "shipping address",
            }
            .into());
        }
        state.addresses.remove(&address_id);
        for cart in state.carts.values_mut() {
            if cart.shipping_address_id == Some(address_id) {
                cart.shipping_address_id = None;
            }
        }
        Ok(())
    }

    async fn list_cards(&self, user_id: UserId) -> Result<Vec<PaymentCard>> {
        let state = self.state.read().await;
        let mut cards: Vec<_> = state
            .cards
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        cards.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(cards)
    }

    async fn create_card(&self, user_id: UserId, new: NewCard) -> Result<PaymentCard> {
        let mut state = self.state.write().await;
        let card = PaymentCard {
            id: CardId::new(),
            user_id,
            last_four: new.last_four,
            brand: new.brand,
            exp_date: new.exp_date,
            is_default: new.is_default,
            created_at: Utc::now(),
        };
        state.cards.insert(card.id, card.clone());
        Ok(card)
    }

    async fn delete_card(&self, user_id: UserId, card_id: CardId) -> Result<()> {
        let mut state = self.state.write().await;
        let owned = state
            .cards
            .get(&card_id)
            .is_some_and(|c| c.user_id == user_id);
        if !owned {
            return Err(ShopError::not_found("payment card", card_id).into());
        }
        state.cards.remove(&card_id);
        Ok(())
    }

    async fn list_favorites(&self, user_id: UserId) -> Result<Vec<Favorite>> {
        let state = self.state.read().await;
        let mut favorites: Vec<_> = state
            .favorites
            .values()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect();
        favorites.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(favorites)
    }

    async fn add_favorite(&self, user_id: UserId, product_id: ProductId) -> Result<Favorite> {
        let mut state = self.state.write().await;
        if !state.products.contains_key(&product_id) {
            return Err(ShopError::not_found("product", product_id).into());
        }
        if state
            .favorites
            .values()
            .any(|f| f.user_id == user_id && f.product_id == product_id)
        {
            return Err(ShopError::AlreadyExists { entity: "favorite" }.into());
        }
        let favorite = Favorite {
            id: FavoriteId::new(),
            user_id,
            product_id,
            created_at: Utc::now(),
        };
        state.favorites.insert(favorite.id, favorite.clone());
        Ok(favorite)
    }

    async fn remove_favorite(&self, user_id: UserId, favorite_id: FavoriteId) -> Result<()> {
        let mut state = self.state.write().await;
        let owned = state
            .favorites
            .get(&favorite_id)
            .is_some_and(|f| f.user_id == user_id);
        if !owned {
            return Err(ShopError::not_found("favorite", favorite_id).into());
        }
        state.favorites.remove(&favorite_id);
        Ok(())
    }
}
