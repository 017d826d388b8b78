//! End-to-end checkout scenarios against the in-memory catalog store.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect
#![allow(clippy::panic)] // Tests can panic

use cafe_orders_core::cart::{CartLine, CartStorage};
use cafe_orders_core::environment::Clock;
use cafe_orders_core::ids::OrderId;
use cafe_orders_core::item::{Item, ItemPatch};
use cafe_orders_core::money::Money;
use cafe_orders_core::order::OrderStatus;
use cafe_orders_core::store::{CatalogStore, StoreError};
use cafe_orders_runtime::{CartStore, CheckoutConfig, CheckoutError, CheckoutService};
use cafe_orders_testing::{
    InMemoryCartStorage, InMemoryCatalogStore, SequentialIds, StaticIdentity, fixtures, test_clock,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    store: InMemoryCatalogStore,
    identity: StaticIdentity,
    storage: InMemoryCartStorage,
    service: CheckoutService,
}

impl Harness {
    fn new(items: Vec<Item>) -> Self {
        Self::with_config(items, CheckoutConfig::default())
    }

    fn with_config(items: Vec<Item>, config: CheckoutConfig) -> Self {
        let store = items
            .into_iter()
            .fold(InMemoryCatalogStore::new(), InMemoryCatalogStore::with_item);
        let identity = StaticIdentity::signed_in(fixtures::customer());
        let service = service_for(&store, &identity).with_config(config);
        Self {
            store,
            identity,
            storage: InMemoryCartStorage::new(),
            service,
        }
    }

    fn cart(&self) -> CartStore {
        self.service.load_cart(Arc::new(self.storage.clone()))
    }

    fn stock(&self, item: &Item) -> u32 {
        self.store.item(&item.id).unwrap().stock
    }
}

fn service_for(store: &InMemoryCatalogStore, identity: &StaticIdentity) -> CheckoutService {
    CheckoutService::new(Arc::new(store.clone()), Arc::new(identity.clone()))
        .with_clock(Arc::new(test_clock()))
        .with_id_generator(Arc::new(SequentialIds::new()))
}

#[tokio::test]
async fn latte_scenario_decrements_stock_and_freezes_total() {
    let latte = fixtures::latte(5);
    let h = Harness::new(vec![latte.clone()]);
    let mut cart = h.cart();
    cart.add_line(latte.id.clone(), 3).unwrap();

    let order = h.service.checkout(&mut cart).await.unwrap();

    assert_eq!(h.stock(&latte), 2);
    assert_eq!(order.total, Money::from_cents(3 * 450));
    assert_eq!(order.taxes, Money::ZERO);
    assert_eq!(order.status, OrderStatus::Received);
    assert_eq!(order.user_id, fixtures::customer().user_id);
    assert_eq!(order.email, "ada@example.com");
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].name, "Latte");
    assert_eq!(order.items[0].quantity, 3);
    assert_eq!(order.items[0].unit_price, Money::from_cents(450));

    assert!(cart.is_empty());
    assert_eq!(h.storage.raw("cart"), None);
    assert_eq!(h.store.orders(), vec![order]);
}

#[tokio::test]
async fn multi_line_total_is_sum_of_lines() {
    let latte = fixtures::latte(5);
    let muffin = fixtures::muffin(4);
    let scone = fixtures::scone(1);
    let h = Harness::new(vec![latte.clone(), muffin.clone(), scone.clone()]);
    let mut cart = h.cart();
    cart.add_line(latte.id.clone(), 2).unwrap();
    cart.add_line(muffin.id.clone(), 4).unwrap();
    cart.add_line(scone.id.clone(), 1).unwrap();

    let order = h.service.checkout(&mut cart).await.unwrap();

    assert_eq!(order.total, Money::from_cents(2 * 450 + 4 * 325 + 300));
    assert_eq!((h.stock(&latte), h.stock(&muffin), h.stock(&scone)), (3, 0, 0));
}

#[tokio::test]
async fn insufficient_stock_is_all_or_nothing() {
    let latte = fixtures::latte(5);
    let muffin = fixtures::muffin(1);
    let h = Harness::new(vec![latte.clone(), muffin.clone()]);
    let mut cart = h.cart();
    cart.add_line(latte.id.clone(), 2).unwrap();
    cart.add_line(muffin.id.clone(), 2).unwrap();
    let before = cart.lines().to_vec();

    let result = h.service.checkout(&mut cart).await;

    assert_eq!(
        result,
        Err(CheckoutError::InsufficientStock {
            item_id: muffin.id.clone(),
            name: "Muffin".to_string(),
            available: 1,
            requested: 2,
        })
    );
    assert_eq!(h.store.order_count(), 0);
    assert_eq!((h.stock(&latte), h.stock(&muffin)), (5, 1));
    assert_eq!(cart.lines(), before.as_slice());
}

#[tokio::test]
async fn deleted_muffin_aborts_with_item_unavailable() {
    let latte = fixtures::latte(5);
    let muffin = fixtures::muffin(3);
    let h = Harness::new(vec![latte.clone(), muffin.clone()]);
    let mut cart = h.cart();
    cart.add_line(latte.id.clone(), 1).unwrap();
    cart.add_line(muffin.id.clone(), 1).unwrap();

    h.store.remove_item(&muffin.id);
    let result = h.service.checkout(&mut cart).await;

    assert_eq!(
        result,
        Err(CheckoutError::ItemUnavailable {
            item_id: muffin.id.clone()
        })
    );
    assert_eq!(h.store.order_count(), 0);
    assert_eq!(h.stock(&latte), 5);
    assert_eq!(
        cart.lines(),
        &[
            CartLine::new(latte.id.clone(), 1),
            CartLine::new(muffin.id.clone(), 1)
        ]
    );
}

#[tokio::test]
async fn last_unit_goes_to_exactly_one_of_two_concurrent_buyers() {
    let latte = fixtures::latte(1);
    let store = InMemoryCatalogStore::new().with_item(latte.clone());
    // Both buyers pass revalidation before either write lands
    store.set_commit_delay(Some(Duration::from_millis(20)));

    let ada = service_for(&store, &StaticIdentity::signed_in(fixtures::customer()));
    let grace = service_for(&store, &StaticIdentity::signed_in(fixtures::other_customer()));
    let mut ada_cart = CartStore::load(Arc::new(InMemoryCartStorage::new()), "cart");
    let mut grace_cart = CartStore::load(Arc::new(InMemoryCartStorage::new()), "cart");
    ada_cart.add_line(latte.id.clone(), 1).unwrap();
    grace_cart.add_line(latte.id.clone(), 1).unwrap();

    let (a, b) = tokio::join!(ada.checkout(&mut ada_cart), grace.checkout(&mut grace_cart));

    let (won, lost) = match (a, b) {
        (Ok(order), Err(error)) | (Err(error), Ok(order)) => (order, error),
        other => panic!("expected exactly one winner, got {other:?}"),
    };
    assert!(matches!(
        lost,
        CheckoutError::InsufficientStock { available: 0, requested: 1, .. }
    ));
    assert_eq!(won.items[0].quantity, 1);
    assert_eq!(store.order_count(), 1);
    assert_eq!(store.item(&latte.id).unwrap().stock, 0);
}

#[tokio::test]
async fn signed_out_checkout_keeps_cart() {
    let latte = fixtures::latte(5);
    let h = Harness::new(vec![latte.clone()]);
    h.identity.sign_out();
    let mut cart = h.cart();
    cart.add_line(latte.id.clone(), 1).unwrap();

    let result = h.service.checkout(&mut cart).await;

    assert_eq!(
        result,
        Err(CheckoutError::NotAuthenticated {
            intent_preserved: false
        })
    );
    assert_eq!(cart.quantity_of(&latte.id), 1);
    assert_eq!(h.store.commits_attempted(), 0);
}

#[tokio::test]
async fn empty_cart_is_rejected_before_the_store() {
    let h = Harness::new(vec![fixtures::latte(5)]);
    let mut cart = h.cart();

    assert_eq!(
        h.service.checkout(&mut cart).await,
        Err(CheckoutError::EmptyCart)
    );
    assert_eq!(h.store.commits_attempted(), 0);
}

#[tokio::test]
async fn rejected_commit_preserves_cart_and_retry_succeeds() {
    let latte = fixtures::latte(5);
    let h = Harness::new(vec![latte.clone()]);
    let mut cart = h.cart();
    cart.add_line(latte.id.clone(), 2).unwrap();
    h.store
        .fail_next_commit(StoreError::Database("permission denied".to_string()));

    let result = h.service.checkout(&mut cart).await;

    assert!(matches!(
        result,
        Err(CheckoutError::CommitFailed {
            outcome_unknown: false,
            ..
        })
    ));
    assert_eq!(cart.quantity_of(&latte.id), 2);
    assert_eq!(h.stock(&latte), 5);
    assert_eq!(h.store.order_count(), 0);

    let order = h.service.checkout(&mut cart).await.unwrap();
    assert_eq!(order.id, OrderId::new("order-1"));
    assert_eq!(h.stock(&latte), 3);
    assert!(cart.is_empty());
}

#[tokio::test]
async fn lost_response_is_resolved_without_a_second_order() {
    let latte = fixtures::latte(5);
    let h = Harness::new(vec![latte.clone()]);
    let mut cart = h.cart();
    cart.add_line(latte.id.clone(), 2).unwrap();
    h.store.lose_next_commit_response();

    let first = h.service.checkout(&mut cart).await;
    assert!(matches!(first, Err(CheckoutError::CommitFailed { .. })));
    assert_eq!(h.service.pending_order_id(), Some(OrderId::new("order-1")));
    assert_eq!(cart.quantity_of(&latte.id), 2);

    let order = h.service.checkout(&mut cart).await.unwrap();

    assert_eq!(order.id, OrderId::new("order-1"));
    assert_eq!(h.store.order_count(), 1);
    assert_eq!(h.store.commits_attempted(), 1);
    assert_eq!(h.stock(&latte), 3);
    assert!(cart.is_empty());
    assert_eq!(h.service.pending_order_id(), None);
}

#[tokio::test]
async fn timeout_then_retry_after_the_write_landed() {
    let latte = fixtures::latte(5);
    let h = Harness::with_config(
        vec![latte.clone()],
        CheckoutConfig::default().with_commit_timeout(Duration::from_millis(30)),
    );
    h.store.set_commit_delay(Some(Duration::from_millis(150)));
    let mut cart = h.cart();
    cart.add_line(latte.id.clone(), 3).unwrap();

    let first = h.service.checkout(&mut cart).await;

    assert!(matches!(
        first,
        Err(CheckoutError::CommitFailed {
            outcome_unknown: true,
            ..
        })
    ));
    assert!(!h.service.is_committing());
    assert_eq!(cart.quantity_of(&latte.id), 3);

    // The dispatched write is not cancelled
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.store.order_count(), 1);
    assert_eq!(h.stock(&latte), 2);

    let order = h.service.checkout(&mut cart).await.unwrap();

    assert_eq!(order.id, OrderId::new("order-1"));
    assert_eq!(h.store.order_count(), 1);
    assert_eq!(h.store.commits_attempted(), 1);
    assert_eq!(h.stock(&latte), 2);
    assert!(cart.is_empty());
}

#[tokio::test]
async fn timeout_then_retry_before_the_write_landed() {
    let latte = fixtures::latte(5);
    let h = Harness::with_config(
        vec![latte.clone()],
        CheckoutConfig::default().with_commit_timeout(Duration::from_millis(30)),
    );
    h.store.set_commit_delay(Some(Duration::from_millis(200)));
    let mut cart = h.cart();
    cart.add_line(latte.id.clone(), 3).unwrap();

    let first = h.service.checkout(&mut cart).await;
    assert!(matches!(first, Err(CheckoutError::CommitFailed { .. })));

    h.store.set_commit_delay(None);
    let order = h.service.checkout(&mut cart).await.unwrap();
    assert_eq!(order.id, OrderId::new("order-1"));

    // The first attempt lands afterwards and is deduplicated
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.store.commits_attempted(), 2);
    assert_eq!(h.store.order_count(), 1);
    assert_eq!(h.stock(&latte), 2);
}

#[tokio::test]
async fn changed_cart_after_timeout_gets_a_new_order_id() {
    let latte = fixtures::latte(5);
    let h = Harness::with_config(
        vec![latte.clone()],
        CheckoutConfig::default().with_commit_timeout(Duration::from_millis(30)),
    );
    h.store.set_commit_delay(Some(Duration::from_millis(200)));
    let mut cart = h.cart();
    cart.add_line(latte.id.clone(), 1).unwrap();

    assert!(h.service.checkout(&mut cart).await.is_err());

    h.store.set_commit_delay(None);
    cart.set_quantity(&latte.id, 2).unwrap();
    let order = h.service.checkout(&mut cart).await.unwrap();

    assert_eq!(order.id, OrderId::new("order-2"));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.store.order_count(), 2);
    assert_eq!(h.stock(&latte), 2);
}

#[tokio::test]
async fn second_submit_while_committing_is_refused() {
    let latte = fixtures::latte(5);
    let h = Harness::new(vec![latte.clone()]);
    h.store.set_commit_delay(Some(Duration::from_millis(50)));
    let mut cart = h.cart();
    cart.add_line(latte.id.clone(), 1).unwrap();
    let mut double_click = h.cart();

    let (first, second) = tokio::join!(
        h.service.checkout(&mut cart),
        h.service.checkout(&mut double_click)
    );

    assert!(first.is_ok());
    assert_eq!(second, Err(CheckoutError::CommitInFlight));
    assert_eq!(h.store.order_count(), 1);
    assert_eq!(h.stock(&latte), 4);
}

#[tokio::test]
async fn buy_now_signed_out_keeps_intent_in_cart() {
    let latte = fixtures::latte(5);
    let h = Harness::new(vec![latte.clone()]);
    h.identity.sign_out();
    let mut cart = h.cart();

    let result = h.service.buy_now(&mut cart, latte.id.clone(), 2).await;

    assert_eq!(
        result,
        Err(CheckoutError::NotAuthenticated {
            intent_preserved: true
        })
    );
    assert_eq!(cart.quantity_of(&latte.id), 2);
    assert_eq!(h.stock(&latte), 5);

    h.identity.sign_in(fixtures::customer());
    let mut reloaded = h.cart();
    let order = h.service.checkout(&mut reloaded).await.unwrap();
    assert_eq!(order.items[0].quantity, 2);
    assert_eq!(h.stock(&latte), 3);
}

#[tokio::test]
async fn buy_now_leaves_cart_alone() {
    let latte = fixtures::latte(5);
    let muffin = fixtures::muffin(5);
    let h = Harness::new(vec![latte.clone(), muffin.clone()]);
    let mut cart = h.cart();
    cart.add_line(muffin.id.clone(), 1).unwrap();

    let order = h.service.buy_now(&mut cart, latte.id.clone(), 1).await.unwrap();

    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].item_id, latte.id);
    assert_eq!(cart.quantity_of(&muffin.id), 1);
    assert!(h.storage.raw("cart").is_some());
}

#[tokio::test]
async fn orders_keep_the_price_they_were_placed_at() {
    let latte = fixtures::latte(5);
    let h = Harness::new(vec![latte.clone()]);
    let mut cart = h.cart();
    cart.add_line(latte.id.clone(), 1).unwrap();
    let order = h.service.checkout(&mut cart).await.unwrap();

    let patch = ItemPatch {
        unit_price: Some(Money::from_cents(600)),
        name: Some("Oat Latte".to_string()),
        ..ItemPatch::default()
    };
    h.store
        .update_item(&latte.id, patch, test_clock().now() + chrono::Duration::minutes(5))
        .await
        .unwrap();

    let stored = h.store.get_order(&order.id).await.unwrap().unwrap();
    assert_eq!(stored.items[0].unit_price, Money::from_cents(450));
    assert_eq!(stored.items[0].name, "Latte");
    assert_eq!(stored.total, Money::from_cents(450));
}

#[tokio::test]
async fn corrupt_cart_blob_checks_out_as_empty() {
    let h = Harness::new(vec![fixtures::latte(5)]);
    h.storage.set("cart", "not json").unwrap();
    let mut cart = h.cart();

    assert!(cart.lines().is_empty());
    assert_eq!(
        h.service.checkout(&mut cart).await,
        Err(CheckoutError::EmptyCart)
    );
}
