//! Catalog records: categories, products, and purchasable variants.

use chrono::{DateTime, Utc};
use common::{CategoryId, ProductId, VariantId};
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// A product category.
///
/// Listings filter by category through an explicit parameter; there is no
/// ambient "current category" anywhere in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductCategory {
    pub id: CategoryId,
    pub name: String,
    pub description: String,
}

/// A catalog entry. Stock and prices live on its variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub category_id: CategoryId,
    pub name: String,
    pub description: String,
    pub base_price: Money,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A purchasable unit of a product: one SKU with its own price and stock.
///
/// `stock_quantity` is mutated only through the inventory ledger operations
/// (reserve/release) and never goes negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: VariantId,
    pub product_id: ProductId,
    pub sku: String,
    pub current_price: Money,
    pub original_price: Money,
    pub stock_quantity: u32,
    pub is_available: bool,
    pub color: Option<String>,
    pub size: Option<String>,
}

/// A product together with its variants, as served by the detail endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProductDetail {
    pub product: Product,
    pub variants: Vec<ProductVariant>,
}
