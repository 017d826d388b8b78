//! `PostgreSQL` catalog store.

use crate::config::PostgresConfig;
use crate::feed::PostgresChangeFeed;
use crate::rows::{
    ChangeNotice, ITEM_COLUMNS, ORDER_COLUMNS, fetch_item, fetch_order, item_from_row, notify,
    order_from_row,
};
use cafe_orders_core::ids::{ItemId, OrderId, UserId};
use cafe_orders_core::item::{Item, ItemFilter, ItemPatch};
use cafe_orders_core::order::{CommitOutcome, Order, OrderDraft, OrderFilter, OrderStatus};
use cafe_orders_core::store::{CatalogStore, StoreError, StoreFuture};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

/// Name of the unique constraint on item names.
const ITEM_NAME_CONSTRAINT: &str = "items_name_key";

/// `PostgreSQL`-backed catalog store.
///
/// Every write runs in a transaction and queues a change notice with
/// `pg_notify` before committing, so listeners hear about a write only once
/// it is durable.
///
/// # Example
///
/// ```no_run
/// use cafe_orders_postgres::{PostgresCatalogStore, PostgresConfig};
///
/// # async fn example() -> Result<(), cafe_orders_core::store::StoreError> {
/// let store = PostgresCatalogStore::connect(&PostgresConfig::new("postgres://localhost/cafe")).await?;
/// store.migrate().await?;
/// let feed = store.change_feed();
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresCatalogStore {
    pool: PgPool,
    notify_channel: String,
}

impl PostgresCatalogStore {
    /// Open a connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database cannot be reached.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;

        tracing::info!(
            max_connections = config.max_connections,
            channel = %config.notify_channel,
            "Connected to catalog database"
        );

        Ok(Self::from_pool(pool).with_notify_channel(config.notify_channel.clone()))
    }

    /// Wrap an existing pool, publishing on the default channel.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            notify_channel: crate::config::DEFAULT_NOTIFY_CHANNEL.to_string(),
        }
    }

    /// Publish change notices on `channel`.
    #[must_use]
    pub fn with_notify_channel(mut self, channel: impl Into<String>) -> Self {
        self.notify_channel = channel.into();
        self
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// A change feed listening on this store's channel.
    #[must_use]
    pub fn change_feed(&self) -> PostgresChangeFeed {
        PostgresChangeFeed::new(self.pool.clone(), self.notify_channel.clone())
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to start transaction: {e}")))
    }

    async fn commit_tx(tx: Transaction<'static, Postgres>) -> Result<(), StoreError> {
        tx.commit()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to commit transaction: {e}")))
    }

    async fn get_item_by_id(&self, id: &ItemId) -> Result<Option<Item>, StoreError> {
        let mut conn = self.acquire().await?;
        fetch_item(&mut conn, id).await
    }

    async fn get_order_by_id(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        let mut conn = self.acquire().await?;
        fetch_order(&mut conn, id).await
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<Postgres>, StoreError> {
        self.pool
            .acquire()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to acquire connection: {e}")))
    }

    async fn select_items(&self, filter: ItemFilter) -> Result<Vec<Item>, StoreError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {ITEM_COLUMNS}
            FROM items
            WHERE ($1 = FALSE OR stock > 0)
              AND ($2::TEXT IS NULL OR category = $2)
            ORDER BY name ASC
            "
        ))
        .bind(filter.in_stock_only)
        .bind(filter.category.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to list items: {e}")))?;

        rows.iter().map(item_from_row).collect()
    }

    async fn select_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE ($1::TEXT IS NULL OR user_id = $1)
              AND ($2 = FALSE OR status <> 'completed')
            ORDER BY created_at ASC, id ASC
            "
        ))
        .bind(filter.user_id.as_ref().map(UserId::as_str))
        .bind(filter.open_only)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to list orders: {e}")))?;

        rows.iter().map(order_from_row).collect()
    }

    async fn insert_item(&self, item: Item) -> Result<Item, StoreError> {
        let mut tx = self.begin().await?;

        sqlx::query(
            r"
            INSERT INTO items (
                id, name, unit_price_cents, stock, description, category, img,
                created_at, updated_at, version
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(item.id.as_str())
        .bind(&item.name)
        .bind(item.unit_price.cents())
        .bind(i64::from(item.stock))
        .bind(item.description.as_deref())
        .bind(item.category.as_deref())
        .bind(item.img.as_deref())
        .bind(item.created_at)
        .bind(item.updated_at)
        .bind(version_param(item.version)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, &item.name, "Failed to create item"))?;

        notify(&mut tx, &self.notify_channel, &ChangeNotice::Item(item.id.clone())).await?;
        Self::commit_tx(tx).await?;

        tracing::info!(item_id = %item.id, name = %item.name, "Item created");
        Ok(item)
    }

    async fn patch_item(
        &self,
        id: &ItemId,
        patch: ItemPatch,
        at: DateTime<Utc>,
    ) -> Result<Item, StoreError> {
        let mut tx = self.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to lock item: {e}")))?;

        let Some(row) = row else {
            let _ = tx.rollback().await; // Ignore rollback errors
            return Err(StoreError::ItemNotFound(id.clone()));
        };
        let updated = patch.apply(&item_from_row(&row)?, at)?;

        sqlx::query(
            r"
            UPDATE items
            SET name = $2,
                unit_price_cents = $3,
                stock = $4,
                description = $5,
                category = $6,
                img = $7,
                updated_at = GREATEST(updated_at, $8),
                version = $9
            WHERE id = $1
            ",
        )
        .bind(id.as_str())
        .bind(&updated.name)
        .bind(updated.unit_price.cents())
        .bind(i64::from(updated.stock))
        .bind(updated.description.as_deref())
        .bind(updated.category.as_deref())
        .bind(updated.img.as_deref())
        .bind(updated.updated_at)
        .bind(version_param(updated.version)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| write_error(e, &updated.name, "Failed to update item"))?;

        notify(&mut tx, &self.notify_channel, &ChangeNotice::Item(id.clone())).await?;
        Self::commit_tx(tx).await?;

        tracing::info!(item_id = %id, stock = updated.stock, "Item updated");
        Ok(updated)
    }

    async fn zero_all_stock(&self, at: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut tx = self.begin().await?;

        let ids: Vec<String> = sqlx::query_scalar(
            r"
            UPDATE items
            SET stock = 0, updated_at = GREATEST(updated_at, $1), version = version + 1
            RETURNING id
            ",
        )
        .bind(at)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to close store: {e}")))?;

        for id in &ids {
            notify(
                &mut tx,
                &self.notify_channel,
                &ChangeNotice::Item(ItemId::new(id.as_str())),
            )
            .await?;
        }
        Self::commit_tx(tx).await?;

        tracing::info!(items = ids.len(), "Store closed");
        Ok(ids.len())
    }

    /// Write the order and decrement every line's stock in one transaction.
    ///
    /// The order row is inserted first with `ON CONFLICT DO NOTHING`, so a
    /// replayed draft id finds the existing order and writes nothing. Lines
    /// are decremented in item id order to keep row locks consistent across
    /// concurrent commits.
    #[tracing::instrument(skip_all, fields(order_id = %draft.id, lines = draft.items.len()))]
    async fn commit(&self, draft: OrderDraft) -> Result<CommitOutcome, StoreError> {
        let mut tx = self.begin().await?;

        let inserted: Option<String> = sqlx::query_scalar(
            r"
            INSERT INTO orders (
                id, user_id, email, status, taxes_cents, total_cents, items,
                created_at, updated_at, version
            ) VALUES ($1, $2, $3, $4, 0, $5, $6, $7, $7, 1)
            ON CONFLICT (id) DO NOTHING
            RETURNING id
            ",
        )
        .bind(draft.id.as_str())
        .bind(draft.user_id.as_str())
        .bind(&draft.email)
        .bind(OrderStatus::Received.as_str())
        .bind(draft.total.cents())
        .bind(Json(&draft.items))
        .bind(draft.created_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to insert order: {e}")))?;

        if inserted.is_none() {
            let _ = tx.rollback().await; // Ignore rollback errors
            let existing = self.get_order_by_id(&draft.id).await?.ok_or_else(|| {
                StoreError::Database(format!("Order {} conflicted but is not readable", draft.id))
            })?;
            tracing::debug!("Commit replayed with existing order id");
            return Ok(CommitOutcome::AlreadyCommitted(existing));
        }

        let mut touched = Vec::new();
        for (item_id, requested) in draft.quantities_by_item() {
            let quantity = i64::try_from(requested).map_err(|_| StoreError::InsufficientStock {
                item_id: item_id.clone(),
                requested,
                available: 0,
            })?;

            // Guarded decrement: never below zero, against the stock stored now
            let row = sqlx::query(&format!(
                r"
                UPDATE items
                SET stock = stock - $2,
                    updated_at = GREATEST(updated_at, $3),
                    version = version + 1
                WHERE id = $1 AND stock >= $2
                RETURNING {ITEM_COLUMNS}
                "
            ))
            .bind(item_id.as_str())
            .bind(quantity)
            .bind(draft.created_at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to decrement stock: {e}")))?;

            if let Some(row) = row {
                touched.push(item_from_row(&row)?.id);
                continue;
            }

            let available: Option<i64> =
                sqlx::query_scalar("SELECT stock FROM items WHERE id = $1")
                    .bind(item_id.as_str())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| StoreError::Database(format!("Failed to read stock: {e}")))?;
            let _ = tx.rollback().await; // Ignore rollback errors

            let error = match available {
                None => StoreError::ItemNotFound(item_id),
                Some(stock) => StoreError::InsufficientStock {
                    item_id,
                    requested,
                    available: u32::try_from(stock).unwrap_or(0),
                },
            };
            tracing::warn!(error = %error, "Commit rejected");
            metrics::counter!("cafe_store_commit_rejections_total").increment(1);
            return Err(error);
        }

        for item_id in touched {
            notify(&mut tx, &self.notify_channel, &ChangeNotice::Item(item_id)).await?;
        }
        notify(
            &mut tx,
            &self.notify_channel,
            &ChangeNotice::Order(draft.id.clone()),
        )
        .await?;
        Self::commit_tx(tx).await?;

        let order = draft.into_order();
        tracing::info!(total = %order.total, "Order committed");
        Ok(CommitOutcome::Created(order))
    }

    async fn set_order_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, StoreError> {
        let mut tx = self.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to lock order: {e}")))?;

        let Some(row) = row else {
            let _ = tx.rollback().await; // Ignore rollback errors
            return Err(StoreError::OrderNotFound(id.clone()));
        };
        let next = order_from_row(&row)?.transitioned(status, at)?;

        sqlx::query(
            r"
            UPDATE orders
            SET status = $2, updated_at = GREATEST(updated_at, $3), version = $4
            WHERE id = $1
            ",
        )
        .bind(id.as_str())
        .bind(next.status.as_str())
        .bind(next.updated_at)
        .bind(version_param(next.version)?)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to update order: {e}")))?;

        notify(&mut tx, &self.notify_channel, &ChangeNotice::Order(id.clone())).await?;
        Self::commit_tx(tx).await?;

        tracing::info!(order_id = %id, status = %status, "Order status changed");
        Ok(next)
    }
}

fn version_param(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version)
        .map_err(|_| StoreError::Serialization(format!("Version out of range: {version}")))
}

/// Map an item write failure, recognizing the unique name constraint.
fn write_error(error: sqlx::Error, name: &str, context: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &error {
        if db_err.is_unique_violation() && db_err.constraint() == Some(ITEM_NAME_CONSTRAINT) {
            return StoreError::DuplicateName(name.to_string());
        }
    }
    StoreError::Database(format!("{context}: {error}"))
}

impl CatalogStore for PostgresCatalogStore {
    fn get_item<'a>(&'a self, id: &'a ItemId) -> StoreFuture<'a, Option<Item>> {
        Box::pin(self.get_item_by_id(id))
    }

    fn list_items(&self, filter: ItemFilter) -> StoreFuture<'_, Vec<Item>> {
        Box::pin(self.select_items(filter))
    }

    fn create_item(&self, item: Item) -> StoreFuture<'_, Item> {
        Box::pin(self.insert_item(item))
    }

    fn update_item<'a>(
        &'a self,
        id: &'a ItemId,
        patch: ItemPatch,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, Item> {
        Box::pin(self.patch_item(id, patch, at))
    }

    fn close_store(&self, at: DateTime<Utc>) -> StoreFuture<'_, usize> {
        Box::pin(self.zero_all_stock(at))
    }

    fn commit_order(&self, draft: OrderDraft) -> StoreFuture<'_, CommitOutcome> {
        Box::pin(self.commit(draft))
    }

    fn get_order<'a>(&'a self, id: &'a OrderId) -> StoreFuture<'a, Option<Order>> {
        Box::pin(self.get_order_by_id(id))
    }

    fn list_orders(&self, filter: OrderFilter) -> StoreFuture<'_, Vec<Order>> {
        Box::pin(self.select_orders(filter))
    }

    fn update_order_status<'a>(
        &'a self,
        id: &'a OrderId,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'a, Order> {
        Box::pin(self.set_order_status(id, status, at))
    }
}
