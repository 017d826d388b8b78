//! Catalog store trait and related types.
//!
//! The catalog store is the authoritative backend for items and orders. It is
//! the only component allowed to mutate stock, and it does so exclusively
//! inside [`CatalogStore::commit_order`], which is all-or-nothing.
//!
//! # Implementations
//!
//! - `PostgresCatalogStore` (in `cafe-orders-postgres`): production backend
//! - `InMemoryCatalogStore` (in `cafe-orders-testing`): fast, deterministic tests
//!
//! # Guarded decrement
//!
//! Stock is never written as "value read earlier minus quantity". Every
//! implementation decrements against the value stored at commit time and only
//! if that value still covers the quantity:
//!
//! ```text
//! UPDATE items SET stock = stock - $qty WHERE id = $id AND stock >= $qty
//! ```
//!
//! If any line fails the guard the whole commit is rolled back and the store
//! reports [`StoreError::InsufficientStock`] or [`StoreError::ItemNotFound`].
//!
//! # Example
//!
//! ```no_run
//! use cafe_orders_core::order::{CommitOutcome, OrderDraft};
//! use cafe_orders_core::store::{CatalogStore, StoreError};
//!
//! async fn place<S: CatalogStore>(store: &S, draft: OrderDraft) -> Result<(), StoreError> {
//!     match store.commit_order(draft).await? {
//!         CommitOutcome::Created(order) => println!("placed {}", order.id),
//!         CommitOutcome::AlreadyCommitted(order) => println!("retry of {}", order.id),
//!     }
//!     Ok(())
//! }
//! ```

use crate::ids::{ItemId, OrderId};
use crate::item::{Item, ItemFilter, ItemPatch, ItemValidationError};
use crate::order::{CommitOutcome, InvalidTransition, Order, OrderDraft, OrderFilter, OrderStatus};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during catalog store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No item with this id exists.
    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    /// No order with this id exists.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The guarded decrement failed: the stored stock no longer covers the
    /// requested quantity.
    #[error("Insufficient stock for {item_id}: requested {requested}, available {available}")]
    InsufficientStock {
        /// Item that failed the guard
        item_id: ItemId,
        /// Quantity the commit asked for
        requested: u64,
        /// Stock at commit time
        available: u32,
    },

    /// Another item already uses this display name.
    #[error("An item named {0:?} already exists")]
    DuplicateName(String),

    /// Item input failed validation.
    #[error("Invalid item: {0}")]
    InvalidItem(#[from] ItemValidationError),

    /// Status change is not a forward move.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// Backend connectivity, permission or query failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Stored data could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the error describes the catalog contents rather than a backend
    /// failure. Rejections are definitive: retrying the same request fails the
    /// same way until the catalog changes.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::ItemNotFound(_)
                | Self::OrderNotFound(_)
                | Self::InsufficientStock { .. }
                | Self::DuplicateName(_)
                | Self::InvalidItem(_)
                | Self::InvalidTransition(_)
        )
    }
}

/// Authoritative store for catalog items and orders.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to be safely used in async contexts
/// and shared across threads.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// to enable trait object usage (`Arc<dyn CatalogStore>`), which the checkout
/// engine needs in order to move a commit onto its own task.
pub trait CatalogStore: Send + Sync {
    /// Read one item by id. `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// - `Database`: backend failure
    /// - `Serialization`: stored row could not be decoded
    fn get_item<'a>(&'a self, id: &'a ItemId) -> StoreFuture<'a, Option<Item>>;

    /// List items matching `filter`, ordered by name.
    ///
    /// # Errors
    ///
    /// - `Database`: backend failure
    fn list_items(&self, filter: ItemFilter) -> StoreFuture<'_, Vec<Item>>;

    /// Insert a fully formed item.
    ///
    /// # Errors
    ///
    /// - `DuplicateName`: another item already has this name
    /// - `Database`: backend failure
    fn create_item(&self, item: Item) -> StoreFuture<'_, Item>;

    /// Apply an admin edit to an item.
    ///
    /// # Errors
    ///
    /// - `ItemNotFound`: no such item
    /// - `DuplicateName`: the new name is taken
    /// - `InvalidItem`: the patched values are invalid
    /// - `Database`: backend failure
    fn update_item<'a>(
        &'a self,
        id: &'a ItemId,
        patch: ItemPatch,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, Item>;

    /// Set every item's stock to zero in a single write. Returns the number of
    /// items touched.
    ///
    /// # Errors
    ///
    /// - `Database`: backend failure
    fn close_store(&self, at: DateTime<Utc>) -> StoreFuture<'_, usize>;

    /// Atomically create the order described by `draft` and decrement stock
    /// for every line.
    ///
    /// Either everything takes effect or nothing does. If an order with the
    /// draft's id already exists, nothing is written and the existing order is
    /// returned as [`CommitOutcome::AlreadyCommitted`].
    ///
    /// # Errors
    ///
    /// - `ItemNotFound`: a line references a missing item
    /// - `InsufficientStock`: a line failed the guarded decrement
    /// - `Database`: the transactional write was rejected
    fn commit_order(&self, draft: OrderDraft) -> StoreFuture<'_, CommitOutcome>;

    /// Read one order by id. `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// - `Database`: backend failure
    /// - `Serialization`: stored row could not be decoded
    fn get_order<'a>(&'a self, id: &'a OrderId) -> StoreFuture<'a, Option<Order>>;

    /// List orders matching `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// - `Database`: backend failure
    fn list_orders(&self, filter: OrderFilter) -> StoreFuture<'_, Vec<Order>>;

    /// Move an order forward in its lifecycle.
    ///
    /// # Errors
    ///
    /// - `OrderNotFound`: no such order
    /// - `InvalidTransition`: `status` is not after the current status
    /// - `Database`: backend failure
    fn update_order_status<'a>(
        &'a self,
        id: &'a OrderId,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, Order>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_display() {
        let error = StoreError::InsufficientStock {
            item_id: ItemId::new("item-latte"),
            requested: 3,
            available: 1,
        };

        let display = format!("{error}");
        assert!(display.contains("item-latte"));
        assert!(display.contains("requested 3"));
        assert!(display.contains("available 1"));
    }

    #[test]
    fn rejections_are_not_backend_failures() {
        assert!(StoreError::ItemNotFound(ItemId::new("x")).is_rejection());
        assert!(!StoreError::Database("connection reset".into()).is_rejection());
        assert!(!StoreError::Serialization("bad row".into()).is_rejection());
    }
}
