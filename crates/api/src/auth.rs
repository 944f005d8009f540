//! Bearer-token authentication.
//!
//! The auth gate supplies an authenticated user identity for every owned
//! resource; handlers receive it as a [`CurrentUser`] extractor and pass the
//! user id down for ownership scoping. Tokens are opaque values issued at
//! registration and resolved through the store.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use domain::User;
use store::ShopStore;

use crate::AppState;
use crate::error::ApiError;

/// The authenticated user for this request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl<S> FromRequestParts<Arc<AppState<S>>> for CurrentUser
where
    S: ShopStore + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        let user = state
            .store
            .user_for_token(token)
            .await?
            .ok_or(ApiError::Unauthorized)?;

        Ok(CurrentUser(user))
    }
}
