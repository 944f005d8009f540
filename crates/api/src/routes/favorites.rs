//! Favorites endpoints. A favorite is unique per (user, product).

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{FavoriteId, ProductId};
use domain::Favorite;
use serde::{Deserialize, Serialize};
use store::ShopStore;

use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct FavoriteRequest {
    pub product_id: ProductId,
}

#[derive(Serialize)]
pub struct FavoriteResponse {
    pub id: FavoriteId,
    pub product_id: ProductId,
    pub created_at: DateTime<Utc>,
}

impl From<Favorite> for FavoriteResponse {
    fn from(favorite: Favorite) -> Self {
        Self {
            id: favorite.id,
            product_id: favorite.product_id,
            created_at: favorite.created_at,
        }
    }
}

/// GET /favorites — the user's favorites, newest first.
pub async fn list<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<FavoriteResponse>>, ApiError> {
    let favorites = state.store.list_favorites(user.id).await?;
    Ok(Json(favorites.into_iter().map(Into::into).collect()))
}

/// POST /favorites — favorite a product.
#[tracing::instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn create<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<FavoriteRequest>,
) -> Result<(StatusCode, Json<FavoriteResponse>), ApiError> {
    let favorite = state.store.add_favorite(user.id, req.product_id).await?;
    Ok((StatusCode::CREATED, Json(favorite.into())))
}

/// DELETE /favorites/{id} — remove a favorite.
#[tracing::instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn remove<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<FavoriteId>,
) -> Result<StatusCode, ApiError> {
    state.store.remove_favorite(user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
