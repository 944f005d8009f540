//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::ShopError;
use store::StoreError;

/// API-level error type that maps to HTTP responses.
///
/// Every failure body is machine-readable:
/// `{"error": {"kind": "...", "message": "..."}}`.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or invalid bearer token.
    Unauthorized,
    /// Malformed request from the client.
    BadRequest(String),
    /// Store or domain failure.
    Store(StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "a valid bearer token is required".to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Store(err) => store_error_to_response(err),
        };

        let body = serde_json::json!({
            "error": { "kind": kind, "message": message }
        });
        (status, axum::Json(body)).into_response()
    }
}

fn store_error_to_response(err: StoreError) -> (StatusCode, &'static str, String) {
    match err {
        StoreError::Shop(shop) => {
            let (status, kind) = match &shop {
                ShopError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
                ShopError::InsufficientStock { .. } => {
                    (StatusCode::BAD_REQUEST, "insufficient_stock")
                }
                ShopError::InvalidQuantity { .. } => (StatusCode::BAD_REQUEST, "invalid_quantity"),
                ShopError::EmptyCart => (StatusCode::BAD_REQUEST, "empty_cart"),
                ShopError::NoShippingAddress => (StatusCode::BAD_REQUEST, "no_shipping_address"),
                ShopError::InvalidPromoCode { .. } => {
                    (StatusCode::BAD_REQUEST, "invalid_promo_code")
                }
                ShopError::InvalidStatusTransition { .. } => {
                    (StatusCode::CONFLICT, "invalid_status_transition")
                }
                ShopError::AlreadyExists { .. } => (StatusCode::CONFLICT, "already_exists"),
                ShopError::InUse { .. } => (StatusCode::CONFLICT, "in_use"),
            };
            (status, kind, shop.to_string())
        }
        StoreError::ConflictingUpdate => (
            StatusCode::CONFLICT,
            "conflicting_update",
            "conflicting concurrent update, please retry".to_string(),
        ),
        StoreError::CheckoutFailed(detail) => {
            tracing::error!(error = %detail, "checkout transaction failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "checkout_failed",
                "checkout could not be completed; nothing was charged or reserved".to_string(),
            )
        }
        StoreError::Database(e) => {
            tracing::error!(error = %e, "database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "internal storage error".to_string(),
            )
        }
        StoreError::Migration(e) => {
            tracing::error!(error = %e, "migration error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "internal storage error".to_string(),
            )
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl From<ShopError> for ApiError {
    fn from(err: ShopError) -> Self {
        ApiError::Store(StoreError::Shop(err))
    }
}
