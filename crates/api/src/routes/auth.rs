//! Registration and identity endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use common::UserId;
use domain::User;
use serde::Serialize;
use store::{NewUser, ShopStore};

use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct UserResponse {
    pub id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            phone_number: user.phone_number,
        }
    }
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub user: UserResponse,
    pub token: String,
}

/// POST /auth/register — create a user and issue a bearer token.
#[tracing::instrument(skip(state, req), fields(email = %req.email))]
pub async fn register<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<NewUser>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let user = state.store.create_user(req).await?;
    let token = state.store.issue_token(user.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: user.into(),
            token,
        }),
    ))
}

/// GET /me — the authenticated user's details.
pub async fn me<S: ShopStore + 'static>(
    State(_state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
) -> Json<UserResponse> {
    Json(user.into())
}
