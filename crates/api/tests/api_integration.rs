//! Integration tests for the API server.

use std::sync::Arc;
use std::sync::OnceLock;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use domain::Money;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use store::MemoryStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> (Router, MemoryStore) {
    let store = MemoryStore::new();
    let state = Arc::new(api::AppState {
        store: store.clone(),
    });
    let app = api::create_app(state, get_metrics_handle());
    (app, store)
}

/// Sends a request and returns (status, parsed JSON body).
async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn register(app: &Router, email: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({
            "email": email,
            "first_name": "Test",
            "last_name": "Shopper",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["token"].as_str().unwrap().to_string()
}

async fn create_and_select_address(app: &Router, token: &str, cost_cents: i64) {
    let (status, body) = send(
        app,
        "POST",
        "/addresses",
        Some(token),
        Some(json!({
            "recipient_name": "Test Shopper",
            "street": "1 Main St",
            "city": "Springfield",
            "state": "IL",
            "postal_code": "62701",
            "country": "US",
            "phone_number": "555-0100",
            "is_default": true,
            "shipping_cost_cents": cost_cents,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let address_id = body["id"].as_str().unwrap().to_string();
    let (status, _) = send(
        app,
        "PUT",
        "/cart/shipping-address",
        Some(token),
        Some(json!({ "address_id": address_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

/// Seeds a category/product with one variant and returns
/// (product_id, variant_id) as strings.
async fn seed_catalog(store: &MemoryStore, sku: &str, price_cents: i64, stock: u32) -> (String, String) {
    let category = store.seed_category(&format!("category-{sku}")).await;
    let product = store
        .seed_product(category.id, &format!("product-{sku}"), Money::from_cents(price_cents))
        .await;
    let variant = store
        .seed_variant(product.id, sku, Money::from_cents(price_cents), stock)
        .await;
    (product.id.to_string(), variant.id.to_string())
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_register_and_me() {
    let (app, _) = setup();

    let token = register(&app, "shopper@example.com").await;

    let (status, body) = send(&app, "GET", "/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "shopper@example.com");
}

#[tokio::test]
async fn test_owned_routes_require_token() {
    let (app, _) = setup();

    let (status, body) = send(&app, "GET", "/cart", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["kind"], "unauthorized");

    let (status, _) = send(&app, "GET", "/me", Some("bogus-token"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let (app, _) = setup();

    register(&app, "dup@example.com").await;
    let (status, body) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({
            "email": "dup@example.com",
            "first_name": "Test",
            "last_name": "Shopper",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "already_exists");
}

#[tokio::test]
async fn test_full_shopping_flow() {
    let (app, store) = setup();
    let (_, variant_id) = seed_catalog(&store, "SKU-FLOW", 1000, 10).await;

    let token = register(&app, "flow@example.com").await;
    create_and_select_address(&app, &token, 300).await;

    // Add two units to the cart.
    let (status, body) = send(
        &app,
        "POST",
        "/cart/add-item",
        Some(&token),
        Some(json!({ "variant_id": variant_id, "quantity": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subtotal_cents"], 2000);
    assert_eq!(body["bag_total_cents"], 2300);
    assert_eq!(body["items"][0]["quantity"], 2);

    // Checkout creates the order with the bag total frozen.
    let (status, order) = send(&app, "POST", "/cart/checkout", Some(&token), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], "pending");
    assert_eq!(order["total_price_cents"], 2300);
    assert_eq!(order["items"][0]["price_at_purchase_cents"], 1000);
    let order_id = order["id"].as_str().unwrap().to_string();

    // The cart is now empty.
    let (_, cart) = send(&app, "GET", "/cart", Some(&token), None).await;
    assert_eq!(cart["items"].as_array().unwrap().len(), 0);

    // The order is listed.
    let (status, orders) = send(&app, "GET", "/orders", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(orders.as_array().unwrap().len(), 1);

    // Record and complete the payment; the order advances to accepted.
    let (status, payment) = send(
        &app,
        "POST",
        &format!("/orders/{order_id}/payment"),
        Some(&token),
        Some(json!({ "kind": "credit_card", "method": "paypal_card", "last_four": "4242" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(payment["status"], "pending");

    let (status, payment) = send(
        &app,
        "POST",
        &format!("/orders/{order_id}/payment/complete"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["status"], "completed");

    let (_, order) = send(
        &app,
        "GET",
        &format!("/orders/{order_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(order["status"], "accepted");
}

#[tokio::test]
async fn test_add_item_past_stock_is_rejected() {
    let (app, store) = setup();
    let (_, variant_id) = seed_catalog(&store, "SKU-LOW", 1000, 2).await;

    let token = register(&app, "low@example.com").await;

    let (status, body) = send(
        &app,
        "POST",
        "/cart/add-item",
        Some(&token),
        Some(json!({ "variant_id": variant_id, "quantity": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "insufficient_stock");

    // The failed add reserved nothing.
    let (_, cart) = send(&app, "GET", "/cart", Some(&token), None).await;
    assert_eq!(cart["items"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_zero_quantity_is_rejected() {
    let (app, store) = setup();
    let (_, variant_id) = seed_catalog(&store, "SKU-Z", 1000, 5).await;

    let token = register(&app, "zero@example.com").await;

    let (status, body) = send(
        &app,
        "POST",
        "/cart/add-item",
        Some(&token),
        Some(json!({ "variant_id": variant_id, "quantity": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_quantity");
}

#[tokio::test]
async fn test_empty_cart_checkout_is_rejected() {
    let (app, _) = setup();
    let token = register(&app, "empty@example.com").await;
    create_and_select_address(&app, &token, 300).await;

    let (status, body) = send(&app, "POST", "/cart/checkout", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "empty_cart");
}

#[tokio::test]
async fn test_orders_are_owner_scoped() {
    let (app, store) = setup();
    let (_, variant_id) = seed_catalog(&store, "SKU-OWN", 1000, 5).await;

    let alice = register(&app, "alice@example.com").await;
    create_and_select_address(&app, &alice, 0).await;
    send(
        &app,
        "POST",
        "/cart/add-item",
        Some(&alice),
        Some(json!({ "variant_id": variant_id, "quantity": 1 })),
    )
    .await;
    let (_, order) = send(&app, "POST", "/cart/checkout", Some(&alice), None).await;
    let order_id = order["id"].as_str().unwrap().to_string();

    let bob = register(&app, "bob@example.com").await;
    let (status, body) = send(
        &app,
        "GET",
        &format!("/orders/{order_id}"),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "not_found");
}

#[tokio::test]
async fn test_invalid_status_transition_conflicts() {
    let (app, store) = setup();
    let (_, variant_id) = seed_catalog(&store, "SKU-ST", 1000, 5).await;

    let token = register(&app, "status@example.com").await;
    create_and_select_address(&app, &token, 0).await;
    send(
        &app,
        "POST",
        "/cart/add-item",
        Some(&token),
        Some(json!({ "variant_id": variant_id, "quantity": 1 })),
    )
    .await;
    let (_, order) = send(&app, "POST", "/cart/checkout", Some(&token), None).await;
    let order_id = order["id"].as_str().unwrap().to_string();

    // Pending orders cannot jump straight to shipped.
    let (status, body) = send(
        &app,
        "POST",
        &format!("/orders/{order_id}/status"),
        Some(&token),
        Some(json!({ "status": "shipped" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "invalid_status_transition");
}

#[tokio::test]
async fn test_duplicate_favorite_conflicts() {
    let (app, store) = setup();
    let (product_id, _) = seed_catalog(&store, "SKU-FAV", 1000, 5).await;

    let token = register(&app, "fav@example.com").await;

    let (status, _) = send(
        &app,
        "POST",
        "/favorites",
        Some(&token),
        Some(json!({ "product_id": product_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        "POST",
        "/favorites",
        Some(&token),
        Some(json!({ "product_id": product_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "already_exists");
}

#[tokio::test]
async fn test_product_listing_filters_are_explicit_parameters() {
    let (app, store) = setup();

    let clothing = store.seed_category("Clothing").await;
    let shoes = store.seed_category("Shoes").await;
    store
        .seed_product(clothing.id, "Plain Tee", Money::from_cents(1000))
        .await;
    store
        .seed_product(clothing.id, "Fancy Tee", Money::from_cents(1500))
        .await;
    store
        .seed_product(shoes.id, "Runner", Money::from_cents(5000))
        .await;

    let (status, body) = send(&app, "GET", "/products", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (_, body) = send(
        &app,
        "GET",
        &format!("/products?category={}", clothing.id),
        None,
        None,
    )
    .await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (_, body) = send(&app, "GET", "/products?search=fancy", None, None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["name"], "Fancy Tee");

    let (_, body) = send(
        &app,
        "GET",
        &format!("/products?category={}&search=tee", shoes.id),
        None,
        None,
    )
    .await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_metrics_endpoint_renders() {
    let (app, _) = setup();

    let request = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
