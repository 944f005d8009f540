//! Stored payment card endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::CardId;
use domain::PaymentCard;
use serde::Serialize;
use store::{NewCard, ShopStore};

use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct CardResponse {
    pub id: CardId,
    pub last_four: String,
    pub brand: String,
    pub exp_date: String,
    pub is_default: bool,
}

impl From<PaymentCard> for CardResponse {
    fn from(card: PaymentCard) -> Self {
        Self {
            id: card.id,
            last_four: card.last_four,
            brand: card.brand,
            exp_date: card.exp_date,
            is_default: card.is_default,
        }
    }
}

/// GET /cards — the user's stored cards.
pub async fn list<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<CardResponse>>, ApiError> {
    let cards = state.store.list_cards(user.id).await?;
    Ok(Json(cards.into_iter().map(Into::into).collect()))
}

/// POST /cards — store a card (last four digits only).
#[tracing::instrument(skip(state, user, req), fields(user_id = %user.id))]
pub async fn create<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<NewCard>,
) -> Result<(StatusCode, Json<CardResponse>), ApiError> {
    let card = state.store.create_card(user.id, req).await?;
    Ok((StatusCode::CREATED, Json(card.into())))
}

/// DELETE /cards/{id} — remove a stored card.
#[tracing::instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn remove<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<CardId>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_card(user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
