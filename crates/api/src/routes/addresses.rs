//! Shipping address book endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::AddressId;
use domain::ShippingAddress;
use serde::Serialize;
use store::{NewAddress, ShopStore};

use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct AddressResponse {
    pub id: AddressId,
    pub recipient_name: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub phone_number: String,
    pub is_default: bool,
    pub shipping_cost_cents: i64,
}

impl From<ShippingAddress> for AddressResponse {
    fn from(address: ShippingAddress) -> Self {
        Self {
            id: address.id,
            recipient_name: address.recipient_name,
            street: address.street,
            city: address.city,
            state: address.state,
            postal_code: address.postal_code,
            country: address.country,
            phone_number: address.phone_number,
            is_default: address.is_default,
            shipping_cost_cents: address.shipping_cost.cents(),
        }
    }
}

/// GET /addresses — the user's address book, default first.
pub async fn list<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<AddressResponse>>, ApiError> {
    let addresses = state.store.list_addresses(user.id).await?;
    Ok(Json(addresses.into_iter().map(Into::into).collect()))
}

/// POST /addresses — create an address.
#[tracing::instrument(skip(state, user, req), fields(user_id = %user.id))]
pub async fn create<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<NewAddress>,
) -> Result<(StatusCode, Json<AddressResponse>), ApiError> {
    let address = state.store.create_address(user.id, req).await?;
    Ok((StatusCode::CREATED, Json(address.into())))
}

/// PUT /addresses/{id} — replace an address.
#[tracing::instrument(skip(state, user, req), fields(user_id = %user.id))]
pub async fn update<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<AddressId>,
    Json(req): Json<NewAddress>,
) -> Result<Json<AddressResponse>, ApiError> {
    let address = state.store.update_address(user.id, id, req).await?;
    Ok(Json(address.into()))
}

/// DELETE /addresses/{id} — delete an address not referenced by any order.
#[tracing::instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn remove<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<AddressId>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_address(user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
