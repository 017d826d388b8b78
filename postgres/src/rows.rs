//! Row mapping and change notices.

use cafe_orders_core::ids::{ItemId, OrderId, UserId};
use cafe_orders_core::item::Item;
use cafe_orders_core::money::Money;
use cafe_orders_core::order::{Order, OrderLine, OrderStatus};
use cafe_orders_core::store::StoreError;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, Row};

pub(crate) const ITEM_COLUMNS: &str =
    "id, name, unit_price_cents, stock, description, category, img, created_at, updated_at, version";

pub(crate) const ORDER_COLUMNS: &str =
    "id, user_id, email, status, taxes_cents, total_cents, items, created_at, updated_at, version";

/// Payload of a `pg_notify` change notice.
///
/// Notices carry only the id; listeners read the current record. This keeps
/// payloads far below the 8000 byte notify limit whatever the order size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub(crate) enum ChangeNotice {
    Item(ItemId),
    Order(OrderId),
}

fn decode_error(e: sqlx::Error) -> StoreError {
    StoreError::Serialization(format!("Failed to decode row: {e}"))
}

pub(crate) fn item_from_row(row: &PgRow) -> Result<Item, StoreError> {
    let stock: i64 = row.try_get("stock").map_err(decode_error)?;
    Ok(Item {
        id: ItemId::new(row.try_get::<String, _>("id").map_err(decode_error)?),
        name: row.try_get("name").map_err(decode_error)?,
        unit_price: Money::from_cents(row.try_get("unit_price_cents").map_err(decode_error)?),
        stock: u32::try_from(stock)
            .map_err(|_| StoreError::Serialization(format!("Stock out of range: {stock}")))?,
        description: row.try_get("description").map_err(decode_error)?,
        category: row.try_get("category").map_err(decode_error)?,
        img: row.try_get("img").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
        version: version_from_row(row)?,
    })
}

pub(crate) fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let status: String = row.try_get("status").map_err(decode_error)?;
    let Json(items) = row
        .try_get::<Json<Vec<OrderLine>>, _>("items")
        .map_err(decode_error)?;
    Ok(Order {
        id: OrderId::new(row.try_get::<String, _>("id").map_err(decode_error)?),
        user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(decode_error)?),
        email: row.try_get("email").map_err(decode_error)?,
        status: status
            .parse::<OrderStatus>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        taxes: Money::from_cents(row.try_get("taxes_cents").map_err(decode_error)?),
        total: Money::from_cents(row.try_get("total_cents").map_err(decode_error)?),
        items,
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
        version: version_from_row(row)?,
    })
}

fn version_from_row(row: &PgRow) -> Result<u64, StoreError> {
    let version: i64 = row.try_get("version").map_err(decode_error)?;
    u64::try_from(version)
        .map_err(|_| StoreError::Serialization(format!("Version out of range: {version}")))
}

pub(crate) async fn fetch_item(
    conn: &mut PgConnection,
    id: &ItemId,
) -> Result<Option<Item>, StoreError> {
    let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1"))
        .bind(id.as_str())
        .fetch_optional(conn)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to get item: {e}")))?;
    row.as_ref().map(item_from_row).transpose()
}

pub(crate) async fn fetch_order(
    conn: &mut PgConnection,
    id: &OrderId,
) -> Result<Option<Order>, StoreError> {
    let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
        .bind(id.as_str())
        .fetch_optional(conn)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to get order: {e}")))?;
    row.as_ref().map(order_from_row).transpose()
}

/// Queue a change notice on `channel`. Postgres delivers it only if the
/// surrounding transaction commits.
pub(crate) async fn notify(
    conn: &mut PgConnection,
    channel: &str,
    notice: &ChangeNotice,
) -> Result<(), StoreError> {
    let payload = serde_json::to_string(notice)
        .map_err(|e| StoreError::Serialization(format!("Failed to encode notice: {e}")))?;
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(channel)
        .bind(payload)
        .execute(conn)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to queue notice: {e}")))?;
    Ok(())
}
