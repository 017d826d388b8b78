//! Inventory management and the live order board.
//!
//! Every operation requires a signed-in administrator.

use crate::error::AdminError;
use crate::metrics::OrderMetrics;
use cafe_orders_core::environment::{Clock, IdGenerator, SystemClock, UuidIdGenerator};
use cafe_orders_core::identity::{IdentityProvider, Principal};
use cafe_orders_core::ids::{ItemId, OrderId};
use cafe_orders_core::item::{Item, ItemFilter, ItemPatch, NewItem};
use cafe_orders_core::order::{Order, OrderFilter, OrderStatus};
use cafe_orders_core::store::CatalogStore;
use std::sync::Arc;

/// Admin operations on the catalog and orders.
pub struct AdminService {
    store: Arc<dyn CatalogStore>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl AdminService {
    /// Create a service with the system clock and random item ids.
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            store,
            identity,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidIdGenerator),
        }
    }

    /// Use `clock` for write timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `ids` to generate item ids.
    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Add an item to the catalog.
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated` / `Forbidden`: caller is not an administrator
    /// - `InvalidItem`: blank name or negative price
    /// - `Store(DuplicateName)`: another item has this name
    #[tracing::instrument(skip_all, fields(name = %item.name))]
    pub async fn create_item(&self, item: NewItem) -> Result<Item, AdminError> {
        let admin = self.require_admin()?;
        let item = item.into_item(self.ids.item_id(), self.clock.now())?;
        let created = self.store.create_item(item).await?;
        tracing::info!(item_id = %created.id, user_id = %admin.user_id, "Item created");
        Ok(created)
    }

    /// Edit an existing item.
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated` / `Forbidden`: caller is not an administrator
    /// - `Store(ItemNotFound)`: no such item
    /// - `Store(DuplicateName)` / `Store(InvalidItem)`: the edit is invalid
    #[tracing::instrument(skip_all, fields(item_id = %item_id))]
    pub async fn update_item(&self, item_id: &ItemId, patch: ItemPatch) -> Result<Item, AdminError> {
        let admin = self.require_admin()?;
        let updated = self
            .store
            .update_item(item_id, patch, self.clock.now())
            .await?;
        tracing::info!(user_id = %admin.user_id, stock = updated.stock, "Item updated");
        Ok(updated)
    }

    /// Zero every item's stock in a single write. Returns the number of items
    /// touched.
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated` / `Forbidden`: caller is not an administrator
    /// - `Store`: the write failed
    #[tracing::instrument(skip_all)]
    pub async fn close_store(&self) -> Result<usize, AdminError> {
        let admin = self.require_admin()?;
        let touched = self.store.close_store(self.clock.now()).await?;
        tracing::info!(user_id = %admin.user_id, items = touched, "Store closed");
        Ok(touched)
    }

    /// Move an order forward in its lifecycle.
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated` / `Forbidden`: caller is not an administrator
    /// - `Store(OrderNotFound)`: no such order
    /// - `Store(InvalidTransition)`: `status` is not after the current status
    #[tracing::instrument(skip_all, fields(order_id = %order_id, status = %status))]
    pub async fn advance_order(
        &self,
        order_id: &OrderId,
        status: OrderStatus,
    ) -> Result<Order, AdminError> {
        let admin = self.require_admin()?;
        let order = self
            .store
            .update_order_status(order_id, status, self.clock.now())
            .await?;
        OrderMetrics::record_transition(status);
        tracing::info!(user_id = %admin.user_id, "Order status changed");
        Ok(order)
    }

    /// Every order that is not completed, oldest first.
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated` / `Forbidden`: caller is not an administrator
    /// - `Store`: the read failed
    pub async fn live_orders(&self) -> Result<Vec<Order>, AdminError> {
        self.require_admin()?;
        Ok(self.store.list_orders(OrderFilter::open()).await?)
    }

    /// The full inventory, sold-out items included.
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated` / `Forbidden`: caller is not an administrator
    /// - `Store`: the read failed
    pub async fn inventory(&self) -> Result<Vec<Item>, AdminError> {
        self.require_admin()?;
        Ok(self.store.list_items(ItemFilter::all()).await?)
    }

    fn require_admin(&self) -> Result<Principal, AdminError> {
        let principal = self
            .identity
            .current_principal()
            .ok_or(AdminError::NotAuthenticated)?;
        if !principal.is_admin() {
            tracing::warn!(user_id = %principal.user_id, "Admin operation refused");
            return Err(AdminError::Forbidden(principal.user_id));
        }
        Ok(principal)
    }
}
