//! Cart lines and the client-local persistence seam.
//!
//! The cart is a pure intent list: it never holds prices and never reserves
//! stock. It is persisted as a JSON array under a well-known key so that it
//! survives a reload, and it must tolerate whatever garbage it finds there.

use crate::ids::ItemId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Default storage key for the cart blob.
pub const DEFAULT_CART_KEY: &str = "cart";

/// Errors from the cart and its storage backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CartError {
    /// The persisted blob could not be decoded. Callers recover by resetting
    /// the cart to empty.
    #[error("Persisted cart is corrupt: {reason}")]
    PersistenceCorrupt {
        /// What was wrong with the blob
        reason: String,
    },

    /// The storage backend failed to read or write.
    #[error("Cart storage error: {0}")]
    Storage(String),

    /// A line quantity of zero was supplied where at least one is required.
    #[error("Quantity must be at least 1")]
    InvalidQuantity,

    /// The cart has no line for this item.
    #[error("No cart line for item {0}")]
    LineNotFound(ItemId),
}

/// One `(item, quantity)` pair in the cart.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    /// Item being bought
    pub item_id: ItemId,
    /// Quantity, always at least 1
    pub quantity: u32,
}

impl CartLine {
    /// Creates a new cart line
    #[must_use]
    pub const fn new(item_id: ItemId, quantity: u32) -> Self {
        Self { item_id, quantity }
    }
}

/// Entry shapes accepted when reading a persisted cart.
///
/// Older clients stored either bare item keys or `{id, quantity}` objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Line {
        #[serde(alias = "id")]
        #[serde(rename = "itemId")]
        item_id: String,
        #[serde(default)]
        quantity: Option<i64>,
    },
    Bare(String),
}

/// Decode a persisted cart blob.
///
/// Bare string entries count as quantity 1, duplicate keys are merged, and
/// entries with a quantity below 1 are dropped.
///
/// # Errors
///
/// Returns [`CartError::PersistenceCorrupt`] if the blob is not a JSON array of
/// recognised entries or a quantity does not fit in a `u32`.
pub fn decode_lines(raw: &str) -> Result<Vec<CartLine>, CartError> {
    let entries: Vec<StoredEntry> =
        serde_json::from_str(raw).map_err(|e| CartError::PersistenceCorrupt {
            reason: e.to_string(),
        })?;

    let mut lines: Vec<CartLine> = Vec::with_capacity(entries.len());
    for entry in entries {
        let (key, quantity) = match entry {
            StoredEntry::Line { item_id, quantity } => (item_id, quantity.unwrap_or(1)),
            StoredEntry::Bare(item_id) => (item_id, 1),
        };

        if quantity < 1 || key.trim().is_empty() {
            continue;
        }
        let quantity = u32::try_from(quantity).map_err(|_| CartError::PersistenceCorrupt {
            reason: format!("quantity {quantity} out of range for {key}"),
        })?;

        let item_id = ItemId::new(key.trim());
        match lines.iter_mut().find(|line| line.item_id == item_id) {
            Some(line) => line.quantity = line.quantity.saturating_add(quantity),
            None => lines.push(CartLine::new(item_id, quantity)),
        }
    }

    Ok(lines)
}

/// Encode cart lines into the persisted blob format.
///
/// # Errors
///
/// Returns [`CartError::Storage`] if serialization fails.
pub fn encode_lines(lines: &[CartLine]) -> Result<String, CartError> {
    serde_json::to_string(lines).map_err(|e| CartError::Storage(e.to_string()))
}

/// Client-local key/value persistence for the cart blob.
///
/// Mirrors browser local storage: synchronous string get/set/remove under a
/// key, plus a change notification so other handles on the same storage
/// (other tabs) can reload.
pub trait CartStorage: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::Storage`] if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, CartError>;

    /// Store `value` under `key` and notify subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::Storage`] if the backend cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), CartError>;

    /// Remove `key` and notify subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::Storage`] if the backend cannot be written.
    fn remove(&self, key: &str) -> Result<(), CartError>;

    /// Subscribe to change notifications. Each message is the key that changed.
    fn subscribe(&self) -> broadcast::Receiver<String>;
}
