//! Catalog read endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::{CategoryId, ProductId, VariantId};
use domain::{Product, ProductCategory, ProductDetail, ProductVariant};
use serde::Serialize;
use store::{ProductFilter, ShopStore};

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct CategoryResponse {
    pub id: CategoryId,
    pub name: String,
    pub description: String,
}

impl From<ProductCategory> for CategoryResponse {
    fn from(category: ProductCategory) -> Self {
        Self {
            id: category.id,
            name: category.name,
            description: category.description,
        }
    }
}

#[derive(Serialize)]
pub struct ProductResponse {
    pub id: ProductId,
    pub category_id: CategoryId,
    pub name: String,
    pub description: String,
    pub base_price_cents: i64,
    pub is_active: bool,
}

impl From<Product> for ProductResponse {
    fn from(product: Product) -> Self {
        Self {
            id: product.id,
            category_id: product.category_id,
            name: product.name,
            description: product.description,
            base_price_cents: product.base_price.cents(),
            is_active: product.is_active,
        }
    }
}

#[derive(Serialize)]
pub struct VariantResponse {
    pub id: VariantId,
    pub sku: String,
    pub current_price_cents: i64,
    pub original_price_cents: i64,
    pub stock_quantity: u32,
    pub is_available: bool,
    pub color: Option<String>,
    pub size: Option<String>,
}

impl From<ProductVariant> for VariantResponse {
    fn from(variant: ProductVariant) -> Self {
        Self {
            id: variant.id,
            sku: variant.sku,
            current_price_cents: variant.current_price.cents(),
            original_price_cents: variant.original_price.cents(),
            stock_quantity: variant.stock_quantity,
            is_available: variant.is_available,
            color: variant.color,
            size: variant.size,
        }
    }
}

#[derive(Serialize)]
pub struct ProductDetailResponse {
    #[serde(flatten)]
    pub product: ProductResponse,
    pub variants: Vec<VariantResponse>,
}

impl From<ProductDetail> for ProductDetailResponse {
    fn from(detail: ProductDetail) -> Self {
        Self {
            product: detail.product.into(),
            variants: detail.variants.into_iter().map(Into::into).collect(),
        }
    }
}

/// GET /categories — all product categories.
pub async fn categories<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<CategoryResponse>>, ApiError> {
    let categories = state.store.list_categories().await?;
    Ok(Json(categories.into_iter().map(Into::into).collect()))
}

/// GET /products — list products, filterable by explicit `category` and
/// `search` query parameters.
#[tracing::instrument(skip(state))]
pub async fn list<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(filter): Query<ProductFilter>,
) -> Result<Json<Vec<ProductResponse>>, ApiError> {
    let products = state.store.list_products(filter).await?;
    Ok(Json(products.into_iter().map(Into::into).collect()))
}

/// GET /products/{id} — a product with its variants.
#[tracing::instrument(skip(state))]
pub async fn get<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<ProductId>,
) -> Result<Json<ProductDetailResponse>, ApiError> {
    let detail = state.store.get_product(id).await?;
    Ok(Json(detail.into()))
}
