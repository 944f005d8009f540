//! Payment endpoints. A payment is a local status record, 1:1 with its
//! order; completing it drives the order's Pending → Accepted move.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId};
use domain::{Payment, PaymentKind, PaymentMethod, PaymentStatus};
use serde::Serialize;
use store::{NewPayment, ShopStore};

use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct PaymentResponse {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub kind: PaymentKind,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub last_four: String,
    pub exp_date: String,
    pub created_at: DateTime<Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id,
            order_id: payment.order_id,
            kind: payment.kind,
            method: payment.method,
            status: payment.status,
            last_four: payment.last_four,
            exp_date: payment.exp_date,
            created_at: payment.created_at,
        }
    }
}

/// POST /orders/{id}/payment — record a pending payment for the order.
#[tracing::instrument(skip(state, user, req), fields(user_id = %user.id))]
pub async fn create<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<OrderId>,
    Json(req): Json<NewPayment>,
) -> Result<(StatusCode, Json<PaymentResponse>), ApiError> {
    let payment = state.store.create_payment(user.id, id, req).await?;
    Ok((StatusCode::CREATED, Json(payment.into())))
}

/// POST /orders/{id}/payment/complete — mark the payment completed,
/// advancing the order Pending → Accepted exactly once.
#[tracing::instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn complete<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<OrderId>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment = state.store.complete_payment(user.id, id).await?;
    Ok(Json(payment.into()))
}

/// GET /orders/{id}/payment — the payment recorded for the order.
#[tracing::instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn get<S: ShopStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<OrderId>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment = state.store.get_payment(user.id, id).await?;
    Ok(Json(payment.into()))
}
