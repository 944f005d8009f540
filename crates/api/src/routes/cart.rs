//! Cart endpoints: reads, add/remove-item, shipping and promo selection,
//! and checkout.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use common::{AddressId, CartId, PromoId, VariantId};
use domain::CartView;
use serde::{Deserialize, Serialize};
use store::ShopStore;

use super::orders::OrderResponse;
use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ItemRequest {
    pub variant_id: VariantId,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct SelectAddressRequest {
    pub address_id: AddressId,
}

#[derive(Debug, Deserialize)]
pub struct PromoCodeRequest {
    pub code: String,
}

#[derive(Serialize)]
pub struct CartLineResponse {
    pub variant_id: VariantId,
    pub sku: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
}

#[derive(Serialize)]
pub struct CartResponse {
    pub id: CartId,
    pub shipping_address_id: Option<AddressId>,
    pub promo_code_id: Option<PromoId>,
    pub items: Vec<CartLineResponse>,
    pub subtotal_cents: i64,
    pub shipping_cost_cents: i64,
    pub bag_total_cents: i64,
}

impl From<CartView> for CartResponse {
    fn from(view: CartView) -> Self {
        let items = view
            .lines
            .iter()
            .map(|line| CartLineResponse {
                variant_id: line.variant_id,
                sku: line.sku.clone(),
                product_name: line.product_name.clone(),
                quantity: line.quantity,
                unit_price_cents: line.unit_price.cents(),
                subtotal_cents: line.subtotal().cents(),
            })
            .collect();
        Self {
            id: view.cart.id,
            shipping_address_id: view.cart.shipping_address_id,
            promo_code_id: view.cart.promo_code_id,
            items,
            subtotal_cents: view.subtotal.cents(),
            shipping_cost_cents: view.shipping_cost.cents(),
            bag_total_cents: view.bag_total.cents(),
        }
    }
}

/// GET /cart — the cart with lines and derived totals.
#[tracing::instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn get<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<CartResponse>, ApiError> {
    let view = state.store.cart(user.id).await?;
    Ok(Json(view.into()))
}

/// POST /cart/add-item — add quantity of a variant, reserving stock.
#[tracing::instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn add_item<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<ItemRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let view = state
        .store
        .add_cart_item(user.id, req.variant_id, req.quantity)
        .await?;
    Ok(Json(view.into()))
}

/// POST /cart/remove-item — reduce a line, releasing the removed stock.
#[tracing::instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn remove_item<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<ItemRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let view = state
        .store
        .reduce_cart_item(user.id, req.variant_id, req.quantity)
        .await?;
    Ok(Json(view.into()))
}

/// PUT /cart/shipping-address — select one of the user's addresses.
#[tracing::instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn shipping_address<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<SelectAddressRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let view = state
        .store
        .select_shipping_address(user.id, req.address_id)
        .await?;
    Ok(Json(view.into()))
}

/// PUT /cart/promo-code — apply a promo code to the cart.
#[tracing::instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn promo_code<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<PromoCodeRequest>,
) -> Result<Json<CartResponse>, ApiError> {
    let view = state.store.apply_promo_code(user.id, &req.code).await?;
    Ok(Json(view.into()))
}

/// POST /cart/checkout — convert the cart into an order atomically.
#[tracing::instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn checkout<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let view = state.store.checkout(user.id).await?;
    Ok((StatusCode::CREATED, Json(view.into())))
}
