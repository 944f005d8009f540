//! HTTP API server with observability for the shop backend.
//!
//! A thin surface over the store: routers, DTOs, bearer-token auth, and
//! error mapping, with structured logging (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use store::ShopStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: ShopStore> {
    pub store: S,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: ShopStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/auth/register", post(routes::auth::register::<S>))
        .route("/me", get(routes::auth::me::<S>))
        .route("/categories", get(routes::products::categories::<S>))
        .route("/products", get(routes::products::list::<S>))
        .route("/products/{id}", get(routes::products::get::<S>))
        .route("/cart", get(routes::cart::get::<S>))
        .route("/cart/add-item", post(routes::cart::add_item::<S>))
        .route("/cart/remove-item", post(routes::cart::remove_item::<S>))
        .route(
            "/cart/shipping-address",
            put(routes::cart::shipping_address::<S>),
        )
        .route("/cart/promo-code", put(routes::cart::promo_code::<S>))
        .route("/cart/checkout", post(routes::cart::checkout::<S>))
        .route("/orders", get(routes::orders::list::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route("/orders/{id}/status", post(routes::orders::set_status::<S>))
        .route(
            "/orders/{id}/payment",
            get(routes::payments::get::<S>).post(routes::payments::create::<S>),
        )
        .route(
            "/orders/{id}/payment/complete",
            post(routes::payments::complete::<S>),
        )
        .route(
            "/addresses",
            get(routes::addresses::list::<S>).post(routes::addresses::create::<S>),
        )
        .route(
            "/addresses/{id}",
            put(routes::addresses::update::<S>).delete(routes::addresses::remove::<S>),
        )
        .route(
            "/cards",
            get(routes::cards::list::<S>).post(routes::cards::create::<S>),
        )
        .route("/cards/{id}", delete(routes::cards::remove::<S>))
        .route(
            "/favorites",
            get(routes::favorites::list::<S>).post(routes::favorites::create::<S>),
        )
        .route("/favorites/{id}", delete(routes::favorites::remove::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
