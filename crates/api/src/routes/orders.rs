//! Order read and status endpoints. Orders are read-only to the client
//! except for the status moves the state machine allows.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::{AddressId, OrderId, PromoId, VariantId};
use domain::{OrderStatus, OrderView};
use serde::{Deserialize, Serialize};
use store::ShopStore;

use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub variant_id: VariantId,
    pub sku: String,
    pub quantity: u32,
    pub price_at_purchase_cents: i64,
    pub subtotal_cents: i64,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: OrderId,
    pub status: OrderStatus,
    pub shipping_address_id: AddressId,
    pub promo_code_id: Option<PromoId>,
    pub shipping_cost_cents: i64,
    pub total_price_cents: i64,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemResponse>,
}

impl From<OrderView> for OrderResponse {
    fn from(view: OrderView) -> Self {
        let items = view
            .items
            .into_iter()
            .map(|item| OrderItemResponse {
                variant_id: item.variant_id,
                sku: item.sku.clone(),
                quantity: item.quantity,
                price_at_purchase_cents: item.price_at_purchase.cents(),
                subtotal_cents: item.subtotal().cents(),
            })
            .collect();
        Self {
            id: view.order.id,
            status: view.order.status,
            shipping_address_id: view.order.shipping_address_id,
            promo_code_id: view.order.promo_code_id,
            shipping_cost_cents: view.order.shipping_cost.cents(),
            total_price_cents: view.order.total_price.cents(),
            created_at: view.order.created_at,
            items,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: OrderStatus,
}

/// GET /orders — the user's orders, newest first.
#[tracing::instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn list<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.store.list_orders(user.id).await?;
    Ok(Json(orders.into_iter().map(Into::into).collect()))
}

/// GET /orders/{id} — one of the user's orders.
#[tracing::instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn get<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderResponse>, ApiError> {
    let view = state.store.get_order(user.id, id).await?;
    Ok(Json(view.into()))
}

/// POST /orders/{id}/cancel — cancel a Pending or Accepted order,
/// restocking its items.
#[tracing::instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn cancel<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderResponse>, ApiError> {
    let view = state.store.cancel_order(user.id, id).await?;
    Ok(Json(view.into()))
}

/// POST /orders/{id}/status — advance the order along the state machine
/// (Accepted → Shipped → Delivered).
#[tracing::instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn set_status<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<OrderId>,
    Json(req): Json<SetStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let view = state
        .store
        .advance_order_status(user.id, id, req.status)
        .await?;
    Ok(Json(view.into()))
}
