//! PostgreSQL-backed shop store.
//!
//! Every mutating operation runs in a single sqlx transaction. The stock
//! check-and-decrement is a conditional `UPDATE ... WHERE stock_quantity >=
//! $n`: the row lock the update takes serializes concurrent reservations on
//! the same variant. Checkout additionally locks all of the cart's variant
//! rows up front (`SELECT ... FOR UPDATE`, ordered by variant id) so that
//! the re-validation and the decrement see the same stock.

use async_trait::async_trait;
use chrono::Utc;
use common::{
    AddressId, CardId, CartId, CategoryId, FavoriteId, OrderId, PaymentId, ProductId, PromoId,
    UserId, VariantId,
};
use domain::{
    Cart, CartLine, CartView, Favorite, Money, Order, OrderItem, OrderStatus, OrderView, Payment,
    PaymentCard, PaymentKind, PaymentMethod, PaymentStatus, Product, ProductCategory,
    ProductDetail, ProductVariant, PromoCode, ShippingAddress, ShopError, User,
    order_status_after_completion, order_status_on_creation, prepare_order,
};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::store::{NewAddress, NewCard, NewPayment, NewUser, ProductFilter, ShopStore};
use crate::{Result, StoreError};

/// PostgreSQL shop store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

// -- error mapping helpers --

/// Serialization failures and deadlocks surface as `ConflictingUpdate`;
/// everything else stays a database error.
fn map_db_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db) = e
        && let Some(code) = db.code()
        && (code == "40001" || code == "40P01")
    {
        return StoreError::ConflictingUpdate;
    }
    StoreError::Database(e)
}

/// Maps a unique-constraint violation to `AlreadyExists` for `entity`.
fn map_unique(e: sqlx::Error, entity: &'static str) -> StoreError {
    if let sqlx::Error::Database(ref db) = e
        && db.is_unique_violation()
    {
        return ShopError::AlreadyExists { entity }.into();
    }
    map_db_err(e)
}

fn decode_enum<T>(raw: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse::<T>()
        .map_err(|e| StoreError::Database(sqlx::Error::Decode(std::io::Error::other(e).into())))
}

// -- row decoding --

fn row_to_user(row: &PgRow) -> Result<User> {
    Ok(User {
        id: UserId::from_uuid(row.try_get::<Uuid, _>("id")?),
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        phone_number: row.try_get("phone_number")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_category(row: &PgRow) -> Result<ProductCategory> {
    Ok(ProductCategory {
        id: CategoryId::from_uuid(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
    })
}

fn row_to_product(row: &PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
        category_id: CategoryId::from_uuid(row.try_get::<Uuid, _>("category_id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        base_price: Money::from_cents(row.try_get("base_price_cents")?),
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_variant(row: &PgRow) -> Result<ProductVariant> {
    Ok(ProductVariant {
        id: VariantId::from_uuid(row.try_get::<Uuid, _>("id")?),
        product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
        sku: row.try_get("sku")?,
        current_price: Money::from_cents(row.try_get("current_price_cents")?),
        original_price: Money::from_cents(row.try_get("original_price_cents")?),
        stock_quantity: row.try_get::<i64, _>("stock_quantity")? as u32,
        is_available: row.try_get("is_available")?,
        color: row.try_get("color")?,
        size: row.try_get("size")?,
    })
}

fn row_to_cart(row: &PgRow) -> Result<Cart> {
    Ok(Cart {
        id: CartId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        shipping_address_id: row
            .try_get::<Option<Uuid>, _>("shipping_address_id")?
            .map(AddressId::from_uuid),
        promo_code_id: row
            .try_get::<Option<Uuid>, _>("promo_code_id")?
            .map(PromoId::from_uuid),
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_order(row: &PgRow) -> Result<Order> {
    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        shipping_address_id: AddressId::from_uuid(row.try_get::<Uuid, _>("shipping_address_id")?),
        promo_code_id: row
            .try_get::<Option<Uuid>, _>("promo_code_id")?
            .map(PromoId::from_uuid),
        status: decode_enum::<OrderStatus>(row.try_get::<&str, _>("status")?)?,
        shipping_cost: Money::from_cents(row.try_get("shipping_cost_cents")?),
        total_price: Money::from_cents(row.try_get("total_price_cents")?),
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_order_item(row: &PgRow) -> Result<OrderItem> {
    Ok(OrderItem {
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        variant_id: VariantId::from_uuid(row.try_get::<Uuid, _>("variant_id")?),
        sku: row.try_get("sku")?,
        quantity: row.try_get::<i64, _>("quantity")? as u32,
        price_at_purchase: Money::from_cents(row.try_get("price_at_purchase_cents")?),
    })
}

fn row_to_payment(row: &PgRow) -> Result<Payment> {
    Ok(Payment {
        id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        kind: decode_enum::<PaymentKind>(row.try_get::<&str, _>("kind")?)?,
        method: decode_enum::<PaymentMethod>(row.try_get::<&str, _>("method")?)?,
        status: decode_enum::<PaymentStatus>(row.try_get::<&str, _>("status")?)?,
        last_four: row.try_get("last_four")?,
        exp_date: row.try_get("exp_date")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_address(row: &PgRow) -> Result<ShippingAddress> {
    Ok(ShippingAddress {
        id: AddressId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        recipient_name: row.try_get("recipient_name")?,
        street: row.try_get("street")?,
        city: row.try_get("city")?,
        state: row.try_get("state")?,
        postal_code: row.try_get("postal_code")?,
        country: row.try_get("country")?,
        phone_number: row.try_get("phone_number")?,
        is_default: row.try_get("is_default")?,
        shipping_cost: Money::from_cents(row.try_get("shipping_cost_cents")?),
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_promo(row: &PgRow) -> Result<PromoCode> {
    Ok(PromoCode {
        id: PromoId::from_uuid(row.try_get::<Uuid, _>("id")?),
        code: row.try_get("code")?,
        discount_percent: row.try_get::<i16, _>("discount_percent")? as u8,
        is_active: row.try_get("is_active")?,
        valid_from: row.try_get("valid_from")?,
        valid_until: row.try_get("valid_until")?,
    })
}

fn row_to_card(row: &PgRow) -> Result<PaymentCard> {
    Ok(PaymentCard {
        id: CardId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        last_four: row.try_get("last_four")?,
        brand: row.try_get("brand")?,
        exp_date: row.try_get("exp_date")?,
        is_default: row.try_get("is_default")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_favorite(row: &PgRow) -> Result<Favorite> {
    Ok(Favorite {
        id: FavoriteId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
        created_at: row.try_get("created_at")?,
    })
}

const CART_COLUMNS: &str = "id, user_id, shipping_address_id, promo_code_id, created_at";
const ORDER_COLUMNS: &str =
    "id, user_id, shipping_address_id, promo_code_id, status, shipping_cost_cents, \
     total_price_cents, created_at";
const ORDER_ITEM_COLUMNS: &str = "order_id, variant_id, sku, quantity, price_at_purchase_cents";

// -- shared query helpers --

impl PostgresStore {
    /// Fetches the user's cart row inside `conn`, creating it on first
    /// access. `lock` takes `FOR UPDATE` on the row, serializing cart
    /// mutations and checkouts for the same user.
    async fn ensure_cart(&self, conn: &mut PgConnection, user_id: UserId, lock: bool) -> Result<Cart> {
        sqlx::query("INSERT INTO carts (id, user_id) VALUES ($1, $2) ON CONFLICT (user_id) DO NOTHING")
            .bind(CartId::new().as_uuid())
            .bind(user_id.as_uuid())
            .execute(&mut *conn)
            .await
            .map_err(map_db_err)?;

        let sql = if lock {
            format!("SELECT {CART_COLUMNS} FROM carts WHERE user_id = $1 FOR UPDATE")
        } else {
            format!("SELECT {CART_COLUMNS} FROM carts WHERE user_id = $1")
        };
        let row = sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .fetch_one(&mut *conn)
            .await
            .map_err(map_db_err)?;
        row_to_cart(&row)
    }

    /// Reads the cart's lines. `lock` takes `FOR UPDATE` on the variant
    /// rows, in variant-id order so that concurrent checkouts cannot
    /// deadlock.
    async fn cart_lines(
        &self,
        conn: &mut PgConnection,
        cart_id: CartId,
        lock: bool,
    ) -> Result<Vec<CartLine>> {
        let mut sql = String::from(
            "SELECT ci.variant_id, ci.quantity, v.sku, v.current_price_cents, v.stock_quantity, \
             p.name AS product_name \
             FROM cart_items ci \
             JOIN product_variants v ON v.id = ci.variant_id \
             JOIN products p ON p.id = v.product_id \
             WHERE ci.cart_id = $1 \
             ORDER BY ci.variant_id",
        );
        if lock {
            sql.push_str(" FOR UPDATE OF v");
        }

        let rows = sqlx::query(&sql)
            .bind(cart_id.as_uuid())
            .fetch_all(&mut *conn)
            .await
            .map_err(map_db_err)?;

        rows.iter()
            .map(|row| {
                Ok(CartLine {
                    variant_id: VariantId::from_uuid(row.try_get::<Uuid, _>("variant_id")?),
                    sku: row.try_get("sku")?,
                    product_name: row.try_get("product_name")?,
                    quantity: row.try_get::<i64, _>("quantity")? as u32,
                    unit_price: Money::from_cents(row.try_get("current_price_cents")?),
                    in_stock: row.try_get::<i64, _>("stock_quantity")? as u32,
                })
            })
            .collect()
    }

    async fn shipping_cost_of(
        &self,
        conn: &mut PgConnection,
        address_id: Option<AddressId>,
    ) -> Result<Money> {
        let Some(address_id) = address_id else {
            return Ok(Money::zero());
        };
        let cents: Option<i64> =
            sqlx::query_scalar("SELECT shipping_cost_cents FROM shipping_addresses WHERE id = $1")
                .bind(address_id.as_uuid())
                .fetch_optional(&mut *conn)
                .await
                .map_err(map_db_err)?;
        Ok(cents.map(Money::from_cents).unwrap_or_else(Money::zero))
    }

    /// Builds the cart view without locks (read path).
    async fn cart_view(&self, user_id: UserId) -> Result<CartView> {
        let mut conn = self.pool.acquire().await.map_err(map_db_err)?;
        let cart = self.ensure_cart(&mut conn, user_id, false).await?;
        let lines = self.cart_lines(&mut conn, cart.id, false).await?;
        let shipping_cost = self
            .shipping_cost_of(&mut conn, cart.shipping_address_id)
            .await?;
        Ok(CartView::new(cart, lines, shipping_cost))
    }

    /// Atomic check-and-decrement inside `conn`. Returns the remaining
    /// stock, or diagnoses the failure as `NotFound` / `InsufficientStock`.
    async fn reserve_in(
        &self,
        conn: &mut PgConnection,
        variant_id: VariantId,
        quantity: u32,
    ) -> Result<u32> {
        if quantity == 0 {
            return Err(ShopError::InvalidQuantity { quantity }.into());
        }

        let remaining: Option<i64> = sqlx::query_scalar(
            "UPDATE product_variants SET stock_quantity = stock_quantity - $2 \
             WHERE id = $1 AND stock_quantity >= $2 \
             RETURNING stock_quantity",
        )
        .bind(variant_id.as_uuid())
        .bind(i64::from(quantity))
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_err)?;

        match remaining {
            Some(stock) => Ok(stock as u32),
            None => {
                // The conditional update matched nothing: either the variant
                // is missing or the stock is short. Read it to say which.
                let row =
                    sqlx::query("SELECT sku, stock_quantity FROM product_variants WHERE id = $1")
                        .bind(variant_id.as_uuid())
                        .fetch_optional(&mut *conn)
                        .await
                        .map_err(map_db_err)?;
                match row {
                    Some(row) => Err(ShopError::InsufficientStock {
                        sku: row.try_get("sku")?,
                        requested: quantity,
                        available: row.try_get::<i64, _>("stock_quantity")? as u32,
                    }
                    .into()),
                    None => Err(ShopError::not_found("product variant", variant_id).into()),
                }
            }
        }
    }

    async fn order_items_for(
        &self,
        conn: &mut PgConnection,
        order_id: OrderId,
    ) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_ITEM_COLUMNS} FROM order_items WHERE order_id = $1 ORDER BY sku"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&mut *conn)
        .await
        .map_err(map_db_err)?;
        rows.iter().map(row_to_order_item).collect()
    }

    async fn owned_order_locked(
        &self,
        conn: &mut PgConnection,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<Order> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND user_id = $2 FOR UPDATE"
        ))
        .bind(order_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_err)?
        .ok_or_else(|| ShopError::not_found("order", order_id))?;
        row_to_order(&row)
    }
}

#[async_trait]
impl ShopStore for PostgresStore {
    async fn create_user(&self, new: NewUser) -> Result<User> {
        let row = sqlx::query(
            "INSERT INTO users (id, email, first_name, last_name, phone_number, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, email, first_name, last_name, phone_number, created_at",
        )
        .bind(UserId::new().as_uuid())
        .bind(&new.email)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.phone_number)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique(e, "user"))?;
        row_to_user(&row)
    }

    async fn issue_token(&self, user_id: UserId) -> Result<String> {
        let token = Uuid::new_v4().simple().to_string();
        let result = sqlx::query(
            "INSERT INTO auth_tokens (token, user_id) \
             SELECT $1, id FROM users WHERE id = $2",
        )
        .bind(&token)
        .bind(user_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        if result.rows_affected() == 0 {
            return Err(ShopError::not_found("user", user_id).into());
        }
        Ok(token)
    }

    async fn user_for_token(&self, token: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT u.id, u.email, u.first_name, u.last_name, u.phone_number, u.created_at \
             FROM auth_tokens t JOIN users u ON u.id = t.user_id \
             WHERE t.token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn get_user(&self, user_id: UserId) -> Result<User> {
        let row = sqlx::query(
            "SELECT id, email, first_name, last_name, phone_number, created_at \
             FROM users WHERE id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?
        .ok_or_else(|| ShopError::not_found("user", user_id))?;
        row_to_user(&row)
    }

    async fn list_categories(&self) -> Result<Vec<ProductCategory>> {
        let rows =
            sqlx::query("SELECT id, name, description FROM product_categories ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .map_err(map_db_err)?;
        rows.iter().map(row_to_category).collect()
    }

    async fn list_products(&self, filter: ProductFilter) -> Result<Vec<Product>> {
        let rows = sqlx::query(
            "SELECT id, category_id, name, description, base_price_cents, is_active, created_at \
             FROM products \
             WHERE ($1::uuid IS NULL OR category_id = $1) \
               AND ($2::text IS NULL OR name ILIKE '%' || $2 || '%') \
             ORDER BY name",
        )
        .bind(filter.category.map(|c| c.as_uuid()))
        .bind(&filter.search)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        rows.iter().map(row_to_product).collect()
    }

    async fn get_product(&self, product_id: ProductId) -> Result<ProductDetail> {
        let row = sqlx::query(
            "SELECT id, category_id, name, description, base_price_cents, is_active, created_at \
             FROM products WHERE id = $1",
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?
        .ok_or_else(|| ShopError::not_found("product", product_id))?;
        let product = row_to_product(&row)?;

        let rows = sqlx::query(
            "SELECT id, product_id, sku, current_price_cents, original_price_cents, \
             stock_quantity, is_available, color, size \
             FROM product_variants WHERE product_id = $1 ORDER BY sku",
        )
        .bind(product_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        let variants = rows.iter().map(row_to_variant).collect::<Result<_>>()?;

        Ok(ProductDetail { product, variants })
    }

    async fn get_variant(&self, variant_id: VariantId) -> Result<ProductVariant> {
        let row = sqlx::query(
            "SELECT id, product_id, sku, current_price_cents, original_price_cents, \
             stock_quantity, is_available, color, size \
             FROM product_variants WHERE id = $1",
        )
        .bind(variant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?
        .ok_or_else(|| ShopError::not_found("product variant", variant_id))?;
        row_to_variant(&row)
    }

    #[tracing::instrument(skip(self))]
    async fn reserve(&self, variant_id: VariantId, quantity: u32) -> Result<u32> {
        let mut conn = self.pool.acquire().await.map_err(map_db_err)?;
        self.reserve_in(&mut conn, variant_id, quantity).await
    }

    #[tracing::instrument(skip(self))]
    async fn release(&self, variant_id: VariantId, quantity: u32) -> Result<u32> {
        if quantity == 0 {
            return Err(ShopError::InvalidQuantity { quantity }.into());
        }
        let remaining: Option<i64> = sqlx::query_scalar(
            "UPDATE product_variants SET stock_quantity = stock_quantity + $2 \
             WHERE id = $1 RETURNING stock_quantity",
        )
        .bind(variant_id.as_uuid())
        .bind(i64::from(quantity))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        remaining
            .map(|stock| stock as u32)
            .ok_or_else(|| ShopError::not_found("product variant", variant_id).into())
    }

    async fn cart(&self, user_id: UserId) -> Result<CartView> {
        self.cart_view(user_id).await
    }

    #[tracing::instrument(skip(self))]
    async fn add_cart_item(
        &self,
        user_id: UserId,
        variant_id: VariantId,
        quantity: u32,
    ) -> Result<CartView> {
        if quantity == 0 {
            return Err(ShopError::InvalidQuantity { quantity }.into());
        }

        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        let cart = self.ensure_cart(&mut tx, user_id, true).await?;

        // Reservation and cart mutation commit or roll back together.
        self.reserve_in(&mut tx, variant_id, quantity).await?;

        sqlx::query(
            "INSERT INTO cart_items (id, cart_id, variant_id, quantity) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (cart_id, variant_id) \
             DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity",
        )
        .bind(Uuid::new_v4())
        .bind(cart.id.as_uuid())
        .bind(variant_id.as_uuid())
        .bind(i64::from(quantity))
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)?;
        self.cart_view(user_id).await
    }

    #[tracing::instrument(skip(self))]
    async fn reduce_cart_item(
        &self,
        user_id: UserId,
        variant_id: VariantId,
        quantity: u32,
    ) -> Result<CartView> {
        if quantity == 0 {
            return Err(ShopError::InvalidQuantity { quantity }.into());
        }

        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        let cart = self.ensure_cart(&mut tx, user_id, true).await?;

        let current: Option<i64> = sqlx::query_scalar(
            "SELECT quantity FROM cart_items WHERE cart_id = $1 AND variant_id = $2 FOR UPDATE",
        )
        .bind(cart.id.as_uuid())
        .bind(variant_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_err)?;
        let current =
            current.ok_or_else(|| ShopError::not_found("cart item", variant_id))? as u32;

        // Clamp to the line quantity; release exactly what was removed.
        let removed = quantity.min(current);
        if removed == current {
            sqlx::query("DELETE FROM cart_items WHERE cart_id = $1 AND variant_id = $2")
                .bind(cart.id.as_uuid())
                .bind(variant_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
        } else {
            sqlx::query(
                "UPDATE cart_items SET quantity = quantity - $3 \
                 WHERE cart_id = $1 AND variant_id = $2",
            )
            .bind(cart.id.as_uuid())
            .bind(variant_id.as_uuid())
            .bind(i64::from(removed))
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        }

        sqlx::query(
            "UPDATE product_variants SET stock_quantity = stock_quantity + $2 WHERE id = $1",
        )
        .bind(variant_id.as_uuid())
        .bind(i64::from(removed))
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)?;
        self.cart_view(user_id).await
    }

    async fn select_shipping_address(
        &self,
        user_id: UserId,
        address_id: AddressId,
    ) -> Result<CartView> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let owned: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM shipping_addresses WHERE id = $1 AND user_id = $2",
        )
        .bind(address_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_err)?;
        if owned.is_none() {
            return Err(ShopError::not_found("shipping address", address_id).into());
        }

        let cart = self.ensure_cart(&mut tx, user_id, true).await?;
        sqlx::query("UPDATE carts SET shipping_address_id = $2 WHERE id = $1")
            .bind(cart.id.as_uuid())
            .bind(address_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)?;
        self.cart_view(user_id).await
    }

    async fn apply_promo_code(&self, user_id: UserId, code: &str) -> Result<CartView> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let row = sqlx::query(
            "SELECT id, code, discount_percent, is_active, valid_from, valid_until \
             FROM promo_codes WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_err)?
        .ok_or_else(|| ShopError::not_found("promo code", code))?;
        let promo = row_to_promo(&row)?;

        if !promo.is_valid_at(Utc::now()) {
            return Err(ShopError::InvalidPromoCode {
                code: code.to_string(),
            }
            .into());
        }

        let cart = self.ensure_cart(&mut tx, user_id, true).await?;
        sqlx::query("UPDATE carts SET promo_code_id = $2 WHERE id = $1")
            .bind(cart.id.as_uuid())
            .bind(promo.id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)?;
        self.cart_view(user_id).await
    }

    #[tracing::instrument(skip(self))]
    async fn checkout(&self, user_id: UserId) -> Result<OrderView> {
        metrics::counter!("checkout_attempts_total").increment(1);
        let start = std::time::Instant::now();

        let result = self.checkout_tx(user_id).await;
        match &result {
            Ok(view) => {
                metrics::counter!("orders_created_total").increment(1);
                metrics::histogram!("checkout_duration_seconds")
                    .record(start.elapsed().as_secs_f64());
                tracing::info!(
                    order_id = %view.order.id,
                    total_cents = view.order.total_price.cents(),
                    "order created"
                );
            }
            Err(e) => {
                metrics::counter!("checkout_failures_total").increment(1);
                tracing::warn!(error = %e, "checkout failed");
            }
        }
        result
    }

    async fn list_orders(&self, user_id: UserId) -> Result<Vec<OrderView>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        let orders: Vec<Order> = rows.iter().map(row_to_order).collect::<Result<_>>()?;

        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id.as_uuid()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_ITEM_COLUMNS} FROM order_items WHERE order_id = ANY($1) ORDER BY sku"
        ))
        .bind(&order_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        let items: Vec<OrderItem> = rows.iter().map(row_to_order_item).collect::<Result<_>>()?;

        Ok(orders
            .into_iter()
            .map(|order| {
                let items = items
                    .iter()
                    .filter(|i| i.order_id == order.id)
                    .cloned()
                    .collect();
                OrderView { order, items }
            })
            .collect())
    }

    async fn get_order(&self, user_id: UserId, order_id: OrderId) -> Result<OrderView> {
        let mut conn = self.pool.acquire().await.map_err(map_db_err)?;
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND user_id = $2"
        ))
        .bind(order_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_db_err)?
        .ok_or_else(|| ShopError::not_found("order", order_id))?;
        let order = row_to_order(&row)?;
        let items = self.order_items_for(&mut conn, order_id).await?;
        Ok(OrderView { order, items })
    }

    #[tracing::instrument(skip(self))]
    async fn advance_order_status(
        &self,
        user_id: UserId,
        order_id: OrderId,
        next: OrderStatus,
    ) -> Result<OrderView> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        let order = self.owned_order_locked(&mut tx, user_id, order_id).await?;

        if !order.status.can_transition_to(next) {
            return Err(ShopError::InvalidStatusTransition {
                from: order.status,
                to: next,
            }
            .into());
        }

        sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
            .bind(order_id.as_uuid())
            .bind(next.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

        if next == OrderStatus::Cancelled {
            // Return every line's quantity to stock in the same transaction.
            sqlx::query(
                "UPDATE product_variants v \
                 SET stock_quantity = v.stock_quantity + oi.quantity \
                 FROM order_items oi \
                 WHERE oi.order_id = $1 AND oi.variant_id = v.id",
            )
            .bind(order_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        }

        let items = self.order_items_for(&mut tx, order_id).await?;
        tx.commit().await.map_err(map_db_err)?;

        Ok(OrderView {
            order: Order {
                status: next,
                ..order
            },
            items,
        })
    }

    async fn create_payment(
        &self,
        user_id: UserId,
        order_id: OrderId,
        new: NewPayment,
    ) -> Result<Payment> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        let order = self.owned_order_locked(&mut tx, user_id, order_id).await?;

        let row = sqlx::query(
            "INSERT INTO payments (id, order_id, kind, method, status, last_four, exp_date, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id, order_id, kind, method, status, last_four, exp_date, created_at",
        )
        .bind(PaymentId::new().as_uuid())
        .bind(order_id.as_uuid())
        .bind(new.kind.as_str())
        .bind(new.method.as_str())
        .bind(PaymentStatus::Pending.as_str())
        .bind(&new.last_four)
        .bind(&new.exp_date)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique(e, "payment"))?;
        let payment = row_to_payment(&row)?;

        // Payment creation re-affirms Pending; any other status is left
        // untouched.
        if let Some(status) = order_status_on_creation(order.status) {
            sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
                .bind(order_id.as_uuid())
                .bind(status.as_str())
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
        }

        tx.commit().await.map_err(map_db_err)?;
        Ok(payment)
    }

    async fn complete_payment(&self, user_id: UserId, order_id: OrderId) -> Result<Payment> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        let order = self.owned_order_locked(&mut tx, user_id, order_id).await?;

        let row = sqlx::query(
            "SELECT id, order_id, kind, method, status, last_four, exp_date, created_at \
             FROM payments WHERE order_id = $1 FOR UPDATE",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_err)?
        .ok_or_else(|| ShopError::not_found("payment", order_id))?;
        let mut payment = row_to_payment(&row)?;

        // Duplicate completion is a no-op; it must not re-advance the order.
        if payment.status == PaymentStatus::Completed {
            return Ok(payment);
        }

        sqlx::query("UPDATE payments SET status = $2 WHERE id = $1")
            .bind(payment.id.as_uuid())
            .bind(PaymentStatus::Completed.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        payment.status = PaymentStatus::Completed;

        if let Some(next) = order_status_after_completion(order.status) {
            sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
                .bind(order_id.as_uuid())
                .bind(next.as_str())
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
        }

        tx.commit().await.map_err(map_db_err)?;
        Ok(payment)
    }

    async fn get_payment(&self, user_id: UserId, order_id: OrderId) -> Result<Payment> {
        let row = sqlx::query(
            "SELECT p.id, p.order_id, p.kind, p.method, p.status, p.last_four, p.exp_date, \
             p.created_at \
             FROM payments p JOIN orders o ON o.id = p.order_id \
             WHERE p.order_id = $1 AND o.user_id = $2",
        )
        .bind(order_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?
        .ok_or_else(|| ShopError::not_found("payment", order_id))?;
        row_to_payment(&row)
    }

    async fn list_addresses(&self, user_id: UserId) -> Result<Vec<ShippingAddress>> {
        let rows = sqlx::query(
            "SELECT id, user_id, recipient_name, street, city, state, postal_code, country, \
             phone_number, is_default, shipping_cost_cents, created_at \
             FROM shipping_addresses WHERE user_id = $1 \
             ORDER BY is_default DESC, created_at",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        rows.iter().map(row_to_address).collect()
    }

    async fn create_address(&self, user_id: UserId, new: NewAddress) -> Result<ShippingAddress> {
        let row = sqlx::query(
            "INSERT INTO shipping_addresses \
             (id, user_id, recipient_name, street, city, state, postal_code, country, \
              phone_number, is_default, shipping_cost_cents, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING id, user_id, recipient_name, street, city, state, postal_code, country, \
             phone_number, is_default, shipping_cost_cents, created_at",
        )
        .bind(AddressId::new().as_uuid())
        .bind(user_id.as_uuid())
        .bind(&new.recipient_name)
        .bind(&new.street)
        .bind(&new.city)
        .bind(&new.state)
        .bind(&new.postal_code)
        .bind(&new.country)
        .bind(&new.phone_number)
        .bind(new.is_default)
        .bind(new.shipping_cost.cents())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)?;
        row_to_address(&row)
    }

    async fn update_address(
        &self,
        user_id: UserId,
        address_id: AddressId,
        new: NewAddress,
    ) -> Result<ShippingAddress> {
        let row = sqlx::query(
            "UPDATE shipping_addresses \
             SET recipient_name = $3, street = $4, city = $5, state = $6, postal_code = $7, \
                 country = $8, phone_number = $9, is_default = $10, shipping_cost_cents = $11 \
             WHERE id = $1 AND user_id = $2 \
             RETURNING id, user_id, recipient_name, street, city, state, postal_code, country, \
             phone_number, is_default, shipping_cost_cents, created_at",
        )
        .bind(address_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(&new.recipient_name)
        .bind(&new.street)
        .bind(&new.city)
        .bind(&new.state)
        .bind(&new.postal_code)
        .bind(&new.country)
        .bind(&new.phone_number)
        .bind(new.is_default)
        .bind(new.shipping_cost.cents())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?
        .ok_or_else(|| ShopError::not_found("shipping address", address_id))?;
        row_to_address(&row)
    }

    async fn delete_address(&self, user_id: UserId, address_id: AddressId) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let owned: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM shipping_addresses WHERE id = $1 AND user_id = $2",
        )
        .bind(address_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_err)?;
        if owned.is_none() {
            return Err(ShopError::not_found("shipping address", address_id).into());
        }

        let referenced: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM orders WHERE shipping_address_id = $1 LIMIT 1")
                .bind(address_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_db_err)?;
        if referenced.is_some() {
            return Err(ShopError::InUse {
                entity: "shipping address",
            }
            .into());
        }

        sqlx::query("DELETE FROM shipping_addresses WHERE id = $1")
            .bind(address_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(())
    }

    async fn list_cards(&self, user_id: UserId) -> Result<Vec<PaymentCard>> {
        let rows = sqlx::query(
            "SELECT id, user_id, last_four, brand, exp_date, is_default, created_at \
             FROM payment_cards WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        rows.iter().map(row_to_card).collect()
    }

    async fn create_card(&self, user_id: UserId, new: NewCard) -> Result<PaymentCard> {
        let row = sqlx::query(
            "INSERT INTO payment_cards (id, user_id, last_four, brand, exp_date, is_default, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING id, user_id, last_four, brand, exp_date, is_default, created_at",
        )
        .bind(CardId::new().as_uuid())
        .bind(user_id.as_uuid())
        .bind(&new.last_four)
        .bind(&new.brand)
        .bind(&new.exp_date)
        .bind(new.is_default)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_err)?;
        row_to_card(&row)
    }

    async fn delete_card(&self, user_id: UserId, card_id: CardId) -> Result<()> {
        let result = sqlx::query("DELETE FROM payment_cards WHERE id = $1 AND user_id = $2")
            .bind(card_id.as_uuid())
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(ShopError::not_found("payment card", card_id).into());
        }
        Ok(())
    }

    async fn list_favorites(&self, user_id: UserId) -> Result<Vec<Favorite>> {
        let rows = sqlx::query(
            "SELECT id, user_id, product_id, created_at \
             FROM favorites WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;
        rows.iter().map(row_to_favorite).collect()
    }

    async fn add_favorite(&self, user_id: UserId, product_id: ProductId) -> Result<Favorite> {
        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM products WHERE id = $1")
            .bind(product_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        if exists.is_none() {
            return Err(ShopError::not_found("product", product_id).into());
        }

        let row = sqlx::query(
            "INSERT INTO favorites (id, user_id, product_id, created_at) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, user_id, product_id, created_at",
        )
        .bind(FavoriteId::new().as_uuid())
        .bind(user_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique(e, "favorite"))?;
        row_to_favorite(&row)
    }

    async fn remove_favorite(&self, user_id: UserId, favorite_id: FavoriteId) -> Result<()> {
        let result = sqlx::query("DELETE FROM favorites WHERE id = $1 AND user_id = $2")
            .bind(favorite_id.as_uuid())
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(ShopError::not_found("favorite", favorite_id).into());
        }
        Ok(())
    }
}

impl PostgresStore {
    /// The checkout transaction proper. Domain failures pass through;
    /// unexpected database failures surface as `CheckoutFailed` after the
    /// dropped transaction rolls everything back.
    async fn checkout_tx(&self, user_id: UserId) -> Result<OrderView> {
        let result = self.checkout_inner(user_id).await;
        match result {
            Err(StoreError::Database(e)) => Err(StoreError::CheckoutFailed(e.to_string())),
            other => other,
        }
    }

    async fn checkout_inner(&self, user_id: UserId) -> Result<OrderView> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        // A missing cart row is just a cart that was never touched.
        let cart_row = sqlx::query(&format!(
            "SELECT {CART_COLUMNS} FROM carts WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_err)?;
        let cart = match cart_row {
            Some(row) => row_to_cart(&row)?,
            None => return Err(ShopError::EmptyCart.into()),
        };

        // Lock the variants and re-read stock; this is the second check,
        // covering everything that happened since the items were added.
        let lines = self.cart_lines(&mut tx, cart.id, true).await?;
        let shipping_cost = self
            .shipping_cost_of(&mut tx, cart.shipping_address_id)
            .await?;
        let view = CartView::new(cart.clone(), lines, shipping_cost);
        let prepared = prepare_order(&view)?;

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

        sqlx::query(
            "INSERT INTO orders \
             (id, user_id, shipping_address_id, promo_code_id, status, shipping_cost_cents, \
              total_price_cents, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(order.id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(order.shipping_address_id.as_uuid())
        .bind(order.promo_code_id.map(|p| p.as_uuid()))
        .bind(order.status.as_str())
        .bind(order.shipping_cost.cents())
        .bind(order.total_price.cents())
        .bind(order.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        let mut items = Vec::with_capacity(prepared.lines.len());
        for line in &prepared.lines {
            sqlx::query(
                "INSERT INTO order_items \
                 (id, order_id, variant_id, sku, quantity, price_at_purchase_cents) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(Uuid::new_v4())
            .bind(order.id.as_uuid())
            .bind(line.variant_id.as_uuid())
            .bind(&line.sku)
            .bind(i64::from(line.quantity))
            .bind(line.price_at_purchase.cents())
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

            // Validated above under the same locks; a miss here means the
            // invariant broke and the whole transaction must die.
            let updated = sqlx::query(
                "UPDATE product_variants SET stock_quantity = stock_quantity - $2 \
                 WHERE id = $1 AND stock_quantity >= $2",
            )
            .bind(line.variant_id.as_uuid())
            .bind(i64::from(line.quantity))
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
            if updated.rows_affected() == 0 {
                return Err(StoreError::CheckoutFailed(format!(
                    "stock for {} changed inside the checkout transaction",
                    line.sku
                )));
            }

            items.push(OrderItem {
                order_id: order.id,
                variant_id: line.variant_id,
                sku: line.sku.clone(),
                quantity: line.quantity,
                price_at_purchase: line.price_at_purchase,
            });
        }

        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart.id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)?;
        Ok(OrderView { order, items })
    }
}
