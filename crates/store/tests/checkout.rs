//! Checkout transaction properties, exercised against the in-memory store.
//!
//! The same contract holds for the Postgres store; the transactional subset
//! is re-run there in `postgres_integration.rs`.

use common::UserId;
use domain::{Money, OrderStatus, PaymentKind, PaymentMethod, PaymentStatus, ShopError};
use store::{MemoryStore, NewAddress, NewPayment, NewUser, ShopStore};

async fn register(store: &MemoryStore, email: &str) -> UserId {
    store
        .create_user(NewUser {
            email: email.to_string(),
            first_name: "Test".to_string(),
            last_name: "Shopper".to_string(),
            phone_number: None,
        })
        .await
        .unwrap()
        .id
}

async fn address_with_cost(store: &MemoryStore, user: UserId, cents: i64) {
    let address = store
        .create_address(
            user,
            NewAddress {
                recipient_name: "Test Shopper".to_string(),
                street: "1 Main St".to_string(),
                city: "Springfield".to_string(),
                state: "IL".to_string(),
                postal_code: "62701".to_string(),
                country: "US".to_string(),
                phone_number: "555-0100".to_string(),
                is_default: true,
                shipping_cost: Money::from_cents(cents),
            },
        )
        .await
        .unwrap();
    store
        .select_shipping_address(user, address.id)
        .await
        .unwrap();
}

/// Store with one category/product and two variants:
/// A at $10.00 (stock 10), B at $5.00 (stock 5).
async fn seeded() -> (MemoryStore, UserId, domain::ProductVariant, domain::ProductVariant) {
    let store = MemoryStore::new();
    let user = register(&store, "shopper@example.com").await;
    address_with_cost(&store, user, 300).await;

    let category = store.seed_category("Clothing").await;
    let product = store
        .seed_product(category.id, "Plain Tee", Money::from_cents(1000))
        .await;
    let a = store
        .seed_variant(product.id, "SKU-A", Money::from_cents(1000), 10)
        .await;
    let b = store
        .seed_variant(product.id, "SKU-B", Money::from_cents(500), 5)
        .await;
    (store, user, a, b)
}

#[tokio::test]
async fn worked_example_totals_and_stock() {
    let (store, user, a, b) = seeded().await;

    // Cart constructed directly: [(A, qty 2), (B, qty 1)], shipping $3.00.
    store.seed_cart_item(user, a.id, 2).await;
    store.seed_cart_item(user, b.id, 1).await;

    let cart = store.cart(user).await.unwrap();
    assert_eq!(cart.subtotal.cents(), 2500);
    assert_eq!(cart.bag_total.cents(), 2800);

    let view = store.checkout(user).await.unwrap();
    assert_eq!(view.order.total_price.cents(), 2800);
    assert_eq!(view.order.shipping_cost.cents(), 300);
    assert_eq!(view.order.status, OrderStatus::Pending);
    assert_eq!(view.items.len(), 2);

    let item_a = view.items.iter().find(|i| i.sku == "SKU-A").unwrap();
    let item_b = view.items.iter().find(|i| i.sku == "SKU-B").unwrap();
    assert_eq!(item_a.price_at_purchase.cents(), 1000);
    assert_eq!(item_a.quantity, 2);
    assert_eq!(item_b.price_at_purchase.cents(), 500);
    assert_eq!(item_b.quantity, 1);

    // Checkout reduced A by 2 and B by 1.
    assert_eq!(store.variant_stock(a.id).await, Some(8));
    assert_eq!(store.variant_stock(b.id).await, Some(4));
}

#[tokio::test]
async fn checkout_clears_cart_and_total_matches_pre_checkout_bag_total() {
    let (store, user, a, _) = seeded().await;
    store.add_cart_item(user, a.id, 3).await.unwrap();

    let before = store.cart(user).await.unwrap();
    let expected_total = before.bag_total;

    let view = store.checkout(user).await.unwrap();
    assert_eq!(view.order.total_price, expected_total);

    let after = store.cart(user).await.unwrap();
    assert!(after.is_empty());
    assert_eq!(after.bag_total, after.shipping_cost);
}

#[tokio::test]
async fn empty_cart_checkout_fails() {
    let (store, user, _, _) = seeded().await;

    let err = store.checkout(user).await.unwrap_err();
    assert!(matches!(err.as_shop(), Some(ShopError::EmptyCart)));
    assert_eq!(store.order_count().await, 0);
}

#[tokio::test]
async fn checkout_without_shipping_address_fails() {
    let store = MemoryStore::new();
    let user = register(&store, "noaddress@example.com").await;
    let category = store.seed_category("Clothing").await;
    let product = store
        .seed_product(category.id, "Plain Tee", Money::from_cents(1000))
        .await;
    let variant = store
        .seed_variant(product.id, "SKU-A", Money::from_cents(1000), 10)
        .await;
    store.seed_cart_item(user, variant.id, 1).await;

    let err = store.checkout(user).await.unwrap_err();
    assert!(matches!(err.as_shop(), Some(ShopError::NoShippingAddress)));
}

#[tokio::test]
async fn failed_recheck_leaves_everything_unchanged() {
    let (store, user, a, b) = seeded().await;

    // Constructed cart asks for more of B than exists. Nothing about A may
    // be persisted either: checkout is all-or-nothing.
    store.seed_cart_item(user, a.id, 2).await;
    store.seed_cart_item(user, b.id, 6).await;

    let err = store.checkout(user).await.unwrap_err();
    match err.as_shop() {
        Some(ShopError::InsufficientStock {
            sku,
            requested,
            available,
        }) => {
            assert_eq!(sku, "SKU-B");
            assert_eq!(*requested, 6);
            assert_eq!(*available, 5);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(store.order_count().await, 0);
    assert_eq!(store.variant_stock(a.id).await, Some(10));
    assert_eq!(store.variant_stock(b.id).await, Some(5));
    let cart = store.cart(user).await.unwrap();
    assert_eq!(cart.lines.len(), 2);
}

#[tokio::test]
async fn concurrent_checkouts_cannot_oversell() {
    // Two carts referencing a variant with stock 1, both quantity 1:
    // exactly one checkout succeeds, the loser sees InsufficientStock,
    // final stock is 0 and exactly one order exists.
    let store = MemoryStore::new();
    let alice = register(&store, "alice@example.com").await;
    let bob = register(&store, "bob@example.com").await;
    address_with_cost(&store, alice, 0).await;
    address_with_cost(&store, bob, 0).await;

    let category = store.seed_category("Clothing").await;
    let product = store
        .seed_product(category.id, "Last One", Money::from_cents(9900))
        .await;
    let variant = store
        .seed_variant(product.id, "SKU-LAST", Money::from_cents(9900), 1)
        .await;

    store.seed_cart_item(alice, variant.id, 1).await;
    store.seed_cart_item(bob, variant.id, 1).await;

    let (left, right) = tokio::join!(
        {
            let store = store.clone();
            async move { store.checkout(alice).await }
        },
        {
            let store = store.clone();
            async move { store.checkout(bob).await }
        }
    );

    let outcomes = [left, right];
    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one checkout must win");

    let loser = outcomes.iter().find(|r| r.is_err()).unwrap();
    match loser {
        Err(e) => assert!(matches!(
            e.as_shop(),
            Some(ShopError::InsufficientStock { .. })
        )),
        Ok(_) => unreachable!(),
    }

    assert_eq!(store.variant_stock(variant.id).await, Some(0));
    assert_eq!(store.order_count().await, 1);
}

#[tokio::test]
async fn price_at_purchase_is_frozen() {
    let (store, user, a, _) = seeded().await;
    store.seed_cart_item(user, a.id, 1).await;

    let view = store.checkout(user).await.unwrap();
    let order_id = view.order.id;
    assert_eq!(view.items[0].price_at_purchase.cents(), 1000);

    // Raise the variant price after checkout; the order must not move.
    store.set_variant_price(a.id, Money::from_cents(9999)).await;

    let refetched = store.get_order(user, order_id).await.unwrap();
    assert_eq!(refetched.items[0].price_at_purchase.cents(), 1000);
    assert_eq!(refetched.order.total_price.cents(), 1300);
}

#[tokio::test]
async fn order_status_walks_forward_only() {
    let (store, user, a, _) = seeded().await;
    store.seed_cart_item(user, a.id, 1).await;
    let order_id = store.checkout(user).await.unwrap().order.id;

    // Pending → Accepted via payment completion.
    store
        .create_payment(
            user,
            order_id,
            NewPayment {
                kind: PaymentKind::CreditCard,
                method: PaymentMethod::PaypalCard,
                last_four: "4242".to_string(),
                exp_date: "12/30".to_string(),
            },
        )
        .await
        .unwrap();
    let payment = store.complete_payment(user, order_id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(
        store.get_order(user, order_id).await.unwrap().order.status,
        OrderStatus::Accepted
    );

    // Accepted → Shipped → Delivered.
    let view = store
        .advance_order_status(user, order_id, OrderStatus::Shipped)
        .await
        .unwrap();
    assert_eq!(view.order.status, OrderStatus::Shipped);
    let view = store
        .advance_order_status(user, order_id, OrderStatus::Delivered)
        .await
        .unwrap();
    assert_eq!(view.order.status, OrderStatus::Delivered);

    // Delivered → Accepted is rejected; so is any exit from terminal.
    let err = store
        .advance_order_status(user, order_id, OrderStatus::Accepted)
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_shop(),
        Some(ShopError::InvalidStatusTransition {
            from: OrderStatus::Delivered,
            to: OrderStatus::Accepted,
        })
    ));
}

#[tokio::test]
async fn skipping_a_status_step_is_rejected() {
    let (store, user, a, _) = seeded().await;
    store.seed_cart_item(user, a.id, 1).await;
    let order_id = store.checkout(user).await.unwrap().order.id;

    let err = store
        .advance_order_status(user, order_id, OrderStatus::Shipped)
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_shop(),
        Some(ShopError::InvalidStatusTransition { .. })
    ));
}

#[tokio::test]
async fn cancelling_restocks_items() {
    let (store, user, a, _) = seeded().await;
    store.seed_cart_item(user, a.id, 3).await;
    let order_id = store.checkout(user).await.unwrap().order.id;
    assert_eq!(store.variant_stock(a.id).await, Some(7));

    let view = store.cancel_order(user, order_id).await.unwrap();
    assert_eq!(view.order.status, OrderStatus::Cancelled);
    assert_eq!(store.variant_stock(a.id).await, Some(10));

    // A cancelled order is terminal.
    let err = store.cancel_order(user, order_id).await.unwrap_err();
    assert!(matches!(
        err.as_shop(),
        Some(ShopError::InvalidStatusTransition { .. })
    ));
}

#[tokio::test]
async fn payment_is_unique_per_order_and_completion_is_idempotent() {
    let (store, user, a, _) = seeded().await;
    store.seed_cart_item(user, a.id, 1).await;
    let order_id = store.checkout(user).await.unwrap().order.id;

    let new_payment = || NewPayment {
        kind: PaymentKind::CreditCard,
        method: PaymentMethod::CreditCard,
        last_four: "4242".to_string(),
        exp_date: "12/30".to_string(),
    };

    store
        .create_payment(user, order_id, new_payment())
        .await
        .unwrap();
    let err = store
        .create_payment(user, order_id, new_payment())
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_shop(),
        Some(ShopError::AlreadyExists { entity: "payment" })
    ));

    // Creating the payment re-affirmed Pending.
    assert_eq!(
        store.get_order(user, order_id).await.unwrap().order.status,
        OrderStatus::Pending
    );

    // First completion advances; the second changes nothing.
    store.complete_payment(user, order_id).await.unwrap();
    assert_eq!(
        store.get_order(user, order_id).await.unwrap().order.status,
        OrderStatus::Accepted
    );

    let again = store.complete_payment(user, order_id).await.unwrap();
    assert_eq!(again.status, PaymentStatus::Completed);
    assert_eq!(
        store.get_order(user, order_id).await.unwrap().order.status,
        OrderStatus::Accepted
    );
}

#[tokio::test]
async fn cart_row_survives_checkout() {
    let (store, user, a, _) = seeded().await;
    store.seed_cart_item(user, a.id, 1).await;

    let cart_before = store.cart(user).await.unwrap().cart.id;
    store.checkout(user).await.unwrap();
    let cart_after = store.cart(user).await.unwrap().cart.id;

    // Same reusable basket, just emptied.
    assert_eq!(cart_before, cart_after);

    // And it can check out again.
    store.add_cart_item(user, a.id, 2).await.unwrap();
    let second = store.checkout(user).await.unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(store.order_count().await, 2);
}

#[tokio::test]
async fn aborted_checkout_is_retryable() {
    let (store, user, a, b) = seeded().await;
    store.seed_cart_item(user, a.id, 1).await;
    store.seed_cart_item(user, b.id, 6).await; // over stock, fails

    assert!(store.checkout(user).await.is_err());

    // Trimming the over-stock line makes the same cart check out cleanly.
    store.reduce_cart_item(user, b.id, 1).await.unwrap();

    let view = store.checkout(user).await.unwrap();
    assert_eq!(view.items.len(), 2);
    let item_b = view.items.iter().find(|i| i.sku == "SKU-B").unwrap();
    assert_eq!(item_b.quantity, 5);
}
