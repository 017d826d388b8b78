//! In-memory catalog store and change feed.
//!
//! [`InMemoryCatalogStore`] implements both [`CatalogStore`] and
//! [`ChangeFeed`] over a single mutex-guarded state. Every write, including the
//! guarded stock decrement, is applied as one check-and-apply under that lock,
//! which gives the same all-or-nothing semantics as a database transaction.
//!
//! Failure injection hooks let tests simulate backend rejections, slow commits
//! and lost responses.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use cafe_orders_core::change_feed::{ChangeEvent, ChangeFeed, ChangeFeedError, ChangeStream};
use cafe_orders_core::ids::{ItemId, OrderId};
use cafe_orders_core::item::{Item, ItemFilter, ItemPatch};
use cafe_orders_core::order::{CommitOutcome, Order, OrderDraft, OrderFilter, OrderStatus};
use cafe_orders_core::store::{CatalogStore, StoreError, StoreFuture};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

const DEFAULT_FEED_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct CatalogState {
    items: BTreeMap<ItemId, Item>,
    orders: Vec<Order>,
    fail_next_commit: Option<StoreError>,
    lose_next_commit_response: bool,
    fail_next_read: Option<StoreError>,
    commit_delay: Option<Duration>,
    commits_attempted: usize,
}

impl CatalogState {
    fn take_read_failure(&mut self) -> Result<(), StoreError> {
        self.fail_next_read.take().map_or(Ok(()), Err)
    }

    fn ensure_unique_name(&self, name: &str, except: Option<&ItemId>) -> Result<(), StoreError> {
        let taken = self
            .items
            .values()
            .any(|item| item.name == name && Some(&item.id) != except);
        if taken {
            return Err(StoreError::DuplicateName(name.to_string()));
        }
        Ok(())
    }
}

/// In-memory catalog store for fast, deterministic testing.
///
/// Clones share state, so a test can keep a handle for inspection after
/// passing a clone to the service under test.
///
/// # Example
///
/// ```
/// use cafe_orders_testing::{fixtures, InMemoryCatalogStore};
///
/// let store = InMemoryCatalogStore::new()
///     .with_item(fixtures::latte(5))
///     .with_item(fixtures::muffin(2));
///
/// assert_eq!(store.items().len(), 2);
/// assert_eq!(store.order_count(), 0);
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryCatalogStore {
    state: Arc<Mutex<CatalogState>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl InMemoryCatalogStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// Create an empty store whose change feed buffers at most `capacity`
    /// unread changes per subscriber before reporting lag.
    #[must_use]
    pub fn with_feed_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            state: Arc::new(Mutex::new(CatalogState::default())),
            changes,
        }
    }

    /// Seed an item without publishing a change.
    #[must_use]
    pub fn with_item(self, item: Item) -> Self {
        self.insert_item(item);
        self
    }

    /// Seed or overwrite an item without publishing a change.
    pub fn insert_item(&self, item: Item) {
        self.state.lock().unwrap().items.insert(item.id.clone(), item);
    }

    /// Hard-delete an item, as an out-of-band admin tool would.
    pub fn remove_item(&self, id: &ItemId) -> Option<Item> {
        self.state.lock().unwrap().items.remove(id)
    }

    /// Set an item's stock out of band, publishing the change.
    pub fn set_stock(&self, id: &ItemId, stock: u32) {
        let mut state = self.state.lock().unwrap();
        if let Some(item) = state.items.get_mut(id) {
            item.stock = stock;
            item.version += 1;
            let _ = self.changes.send(ChangeEvent::ItemChanged(item.clone()));
        }
    }

    /// Snapshot of one item.
    #[must_use]
    pub fn item(&self, id: &ItemId) -> Option<Item> {
        self.state.lock().unwrap().items.get(id).cloned()
    }

    /// Snapshot of every item, ordered by id.
    #[must_use]
    pub fn items(&self) -> Vec<Item> {
        self.state.lock().unwrap().items.values().cloned().collect()
    }

    /// Snapshot of every order, in commit order.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().unwrap().orders.clone()
    }

    /// Number of committed orders.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.state.lock().unwrap().orders.len()
    }

    /// Number of `commit_order` calls that reached the store.
    #[must_use]
    pub fn commits_attempted(&self) -> usize {
        self.state.lock().unwrap().commits_attempted
    }

    /// Reject the next commit with `error` without writing anything.
    pub fn fail_next_commit(&self, error: StoreError) {
        self.state.lock().unwrap().fail_next_commit = Some(error);
    }

    /// Apply the next commit but report a connectivity error to the caller,
    /// as if the response was lost on the way back.
    pub fn lose_next_commit_response(&self) {
        self.state.lock().unwrap().lose_next_commit_response = true;
    }

    /// Fail the next item or order read with `error`.
    pub fn fail_next_read(&self, error: StoreError) {
        self.state.lock().unwrap().fail_next_read = Some(error);
    }

    /// Delay every commit by `delay` before it is applied. `None` removes the
    /// delay for commits started afterwards.
    pub fn set_commit_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().commit_delay = delay;
    }

    fn publish(&self, event: ChangeEvent) {
        // No subscribers is fine
        let _ = self.changes.send(event);
    }

    fn apply_commit(&self, draft: OrderDraft) -> Result<CommitOutcome, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.commits_attempted += 1;

        if let Some(error) = state.fail_next_commit.take() {
            return Err(error);
        }

        if let Some(existing) = state.orders.iter().find(|order| order.id == draft.id) {
            tracing::debug!(order_id = %draft.id, "Commit replayed with existing order id");
            return Ok(CommitOutcome::AlreadyCommitted(existing.clone()));
        }

        // Check every line against the stored stock before touching anything
        let mut decrements = Vec::new();
        for (item_id, requested) in draft.quantities_by_item() {
            let item = state
                .items
                .get(&item_id)
                .ok_or_else(|| StoreError::ItemNotFound(item_id.clone()))?;
            let quantity = u32::try_from(requested)
                .ok()
                .filter(|quantity| *quantity <= item.stock)
                .ok_or_else(|| StoreError::InsufficientStock {
                    item_id: item_id.clone(),
                    requested,
                    available: item.stock,
                })?;
            decrements.push((item_id, quantity));
        }

        let at = draft.created_at;
        let mut changed = Vec::with_capacity(decrements.len());
        for (item_id, quantity) in decrements {
            if let Some(item) = state.items.get_mut(&item_id) {
                item.stock -= quantity;
                item.updated_at = item.updated_at.max(at);
                item.version += 1;
                changed.push(item.clone());
            }
        }

        let order = draft.into_order();
        state.orders.push(order.clone());

        for item in changed {
            self.publish(ChangeEvent::ItemChanged(item));
        }
        self.publish(ChangeEvent::OrderChanged(order.clone()));

        if std::mem::take(&mut state.lose_next_commit_response) {
            return Err(StoreError::Database("connection reset by peer".to_string()));
        }

        Ok(CommitOutcome::Created(order))
    }
}

impl Default for InMemoryCatalogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogStore for InMemoryCatalogStore {
    fn get_item<'a>(&'a self, id: &'a ItemId) -> StoreFuture<'a, Option<Item>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.take_read_failure()?;
            Ok(state.items.get(id).cloned())
        })
    }

    fn list_items(&self, filter: ItemFilter) -> StoreFuture<'_, Vec<Item>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.take_read_failure()?;
            let mut items: Vec<Item> = state
                .items
                .values()
                .filter(|item| filter.matches(item))
                .cloned()
                .collect();
            items.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(items)
        })
    }

    fn create_item(&self, item: Item) -> StoreFuture<'_, Item> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.ensure_unique_name(&item.name, None)?;
            state.items.insert(item.id.clone(), item.clone());
            self.publish(ChangeEvent::ItemChanged(item.clone()));
            Ok(item)
        })
    }

    fn update_item<'a>(
        &'a self,
        id: &'a ItemId,
        patch: ItemPatch,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, Item> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let current = state
                .items
                .get(id)
                .ok_or_else(|| StoreError::ItemNotFound(id.clone()))?;
            let next = patch.apply(current, at)?;
            state.ensure_unique_name(&next.name, Some(id))?;
            state.items.insert(id.clone(), next.clone());
            self.publish(ChangeEvent::ItemChanged(next.clone()));
            Ok(next)
        })
    }

    fn close_store(&self, at: DateTime<Utc>) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let mut touched = Vec::with_capacity(state.items.len());
            for item in state.items.values_mut() {
                item.stock = 0;
                item.updated_at = item.updated_at.max(at);
                item.version += 1;
                touched.push(item.clone());
            }
            let count = touched.len();
            for item in touched {
                self.publish(ChangeEvent::ItemChanged(item));
            }
            Ok(count)
        })
    }

    fn commit_order(&self, draft: OrderDraft) -> StoreFuture<'_, CommitOutcome> {
        Box::pin(async move {
            let delay = self.state.lock().unwrap().commit_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.apply_commit(draft)
        })
    }

    fn get_order<'a>(&'a self, id: &'a OrderId) -> StoreFuture<'a, Option<Order>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.take_read_failure()?;
            Ok(state.orders.iter().find(|order| &order.id == id).cloned())
        })
    }

    fn list_orders(&self, filter: OrderFilter) -> StoreFuture<'_, Vec<Order>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.take_read_failure()?;
            let mut orders: Vec<Order> = state
                .orders
                .iter()
                .filter(|order| filter.matches(order))
                .cloned()
                .collect();
            orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(orders)
        })
    }

    fn update_order_status<'a>(
        &'a self,
        id: &'a OrderId,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, Order> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let slot = state
                .orders
                .iter_mut()
                .find(|order| &order.id == id)
                .ok_or_else(|| StoreError::OrderNotFound(id.clone()))?;
            let next = slot.transitioned(status, at)?;
            *slot = next.clone();
            self.publish(ChangeEvent::OrderChanged(next.clone()));
            Ok(next)
        })
    }
}

impl ChangeFeed for InMemoryCatalogStore {
    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<ChangeStream, ChangeFeedError>> + Send + '_>> {
        let mut receiver = self.changes.subscribe();
        Box::pin(async move {
            let stream: ChangeStream = Box::pin(async_stream::stream! {
                loop {
                    match receiver.recv().await {
                        Ok(event) => yield Ok(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            yield Err(ChangeFeedError::Lagged(skipped));
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            Ok(stream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::fixtures;
    use cafe_orders_core::environment::Clock;
    use cafe_orders_core::ids::UserId;
    use cafe_orders_core::order::OrderLine;
    use futures::StreamExt;

    fn draft(id: &str, lines: &[(&Item, u32)]) -> OrderDraft {
        OrderDraft::new(
            OrderId::new(id),
            UserId::new("user-ada"),
            "ada@example.com",
            lines
                .iter()
                .map(|(item, quantity)| OrderLine {
                    item_id: item.id.clone(),
                    name: item.name.clone(),
                    quantity: *quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
            crate::test_clock().now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn commit_decrements_and_records_order() {
        let latte = fixtures::latte(5);
        let store = InMemoryCatalogStore::new().with_item(latte.clone());

        let outcome = store.commit_order(draft("order-1", &[(&latte, 3)])).await.unwrap();

        assert!(outcome.is_created());
        assert_eq!(store.item(&latte.id).unwrap().stock, 2);
        assert_eq!(store.order_count(), 1);
    }

    #[tokio::test]
    async fn commit_is_all_or_nothing() {
        let latte = fixtures::latte(5);
        let muffin = fixtures::muffin(1);
        let store = InMemoryCatalogStore::new()
            .with_item(latte.clone())
            .with_item(muffin.clone());

        let result = store
            .commit_order(draft("order-1", &[(&latte, 2), (&muffin, 2)]))
            .await;

        assert_eq!(
            result,
            Err(StoreError::InsufficientStock {
                item_id: muffin.id.clone(),
                requested: 2,
                available: 1,
            })
        );
        assert_eq!(store.item(&latte.id).unwrap().stock, 5);
        assert_eq!(store.item(&muffin.id).unwrap().stock, 1);
        assert_eq!(store.order_count(), 0);
    }

    #[tokio::test]
    async fn replayed_commit_does_not_decrement_twice() {
        let latte = fixtures::latte(5);
        let store = InMemoryCatalogStore::new().with_item(latte.clone());

        let first = store.commit_order(draft("order-1", &[(&latte, 1)])).await.unwrap();
        let second = store.commit_order(draft("order-1", &[(&latte, 1)])).await.unwrap();

        assert!(first.is_created());
        assert!(matches!(second, CommitOutcome::AlreadyCommitted(_)));
        assert_eq!(store.item(&latte.id).unwrap().stock, 4);
        assert_eq!(store.order_count(), 1);
    }

    #[tokio::test]
    async fn lost_response_still_applies_write() {
        let latte = fixtures::latte(5);
        let store = InMemoryCatalogStore::new().with_item(latte.clone());
        store.lose_next_commit_response();

        let result = store.commit_order(draft("order-1", &[(&latte, 1)])).await;

        assert!(matches!(result, Err(StoreError::Database(_))));
        assert_eq!(store.order_count(), 1);
        assert_eq!(store.item(&latte.id).unwrap().stock, 4);
    }

    #[tokio::test]
    async fn feed_announces_commit() {
        let latte = fixtures::latte(5);
        let store = InMemoryCatalogStore::new().with_item(latte.clone());
        let mut feed = store.subscribe().await.unwrap();

        store.commit_order(draft("order-1", &[(&latte, 2)])).await.unwrap();

        match feed.next().await.unwrap().unwrap() {
            ChangeEvent::ItemChanged(item) => assert_eq!(item.stock, 3),
            other => panic!("expected item change, got {other:?}"),
        }
        match feed.next().await.unwrap().unwrap() {
            ChangeEvent::OrderChanged(order) => assert_eq!(order.id.as_str(), "order-1"),
            other => panic!("expected order change, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_subscriber_sees_lag() {
        let store = InMemoryCatalogStore::with_feed_capacity(2).with_item(fixtures::latte(10));
        let mut feed = store.subscribe().await.unwrap();

        for stock in 0..5 {
            store.set_stock(&fixtures::latte_id(), stock);
        }

        assert!(matches!(
            feed.next().await.unwrap(),
            Err(ChangeFeedError::Lagged(_))
        ));
    }

    #[tokio::test]
    async fn writes_bump_versions_and_never_rewind_update_time() {
        let latte = fixtures::latte(5);
        let store = InMemoryCatalogStore::new().with_item(latte.clone());
        let mut early = draft("order-1", &[(&latte, 1)]);
        early.created_at = latte.updated_at - chrono::Duration::minutes(1);

        store.commit_order(early).await.unwrap();
        let decremented = store.item(&latte.id).unwrap();
        assert_eq!(decremented.version, latte.version + 1);
        assert_eq!(decremented.updated_at, latte.updated_at);

        let behind = crate::test_clock().now() - chrono::Duration::hours(1);
        store.close_store(behind).await.unwrap();
        let closed = store.item(&latte.id).unwrap();
        assert_eq!(closed.version, latte.version + 2);
        assert_eq!(closed.updated_at, latte.updated_at);

        let order = store
            .update_order_status(&OrderId::new("order-1"), OrderStatus::Ready, behind)
            .await
            .unwrap();
        assert_eq!(order.version, 2);
        assert!(order.updated_at >= order.created_at);
    }

    #[tokio::test]
    async fn rename_to_taken_name_is_rejected() {
        let store = InMemoryCatalogStore::new()
            .with_item(fixtures::latte(1))
            .with_item(fixtures::muffin(1));

        let patch = ItemPatch {
            name: Some("Latte".to_string()),
            ..ItemPatch::default()
        };
        let result = store
            .update_item(&fixtures::muffin_id(), patch, crate::test_clock().now())
            .await;

        assert_eq!(result, Err(StoreError::DuplicateName("Latte".to_string())));
    }
}
