//! Client-side cart with durable persistence.
//!
//! [`CartStore`] keeps the cart lines in memory and writes the whole list back
//! to its [`CartStorage`] on every mutation, so the cart survives a reload. A
//! missing or unreadable blob never fails a load: the cart starts empty and
//! the problem is recorded in [`CartStore::recovered_from`].
//!
//! The cart is an intent list only. It never reserves or decrements stock;
//! quantities are checked against live stock at checkout.

use cafe_orders_core::cart::{CartError, CartLine, CartStorage, decode_lines, encode_lines};
use cafe_orders_core::ids::ItemId;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A user's cart backed by client-local storage.
///
/// # Example
///
/// ```ignore
/// let mut cart = CartStore::load(storage, "cart");
/// cart.add_line(ItemId::new("item-latte"), 2)?;
/// cart.add_line(ItemId::new("item-latte"), 1)?;
/// assert_eq!(cart.quantity_of(&ItemId::new("item-latte")), 3);
/// ```
pub struct CartStore {
    storage: Arc<dyn CartStorage>,
    key: String,
    lines: Vec<CartLine>,
    recovered_from: Option<CartError>,
}

impl std::fmt::Debug for CartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartStore")
            .field("key", &self.key)
            .field("lines", &self.lines)
            .field("recovered_from", &self.recovered_from)
            .finish_non_exhaustive()
    }
}

impl CartStore {
    /// Load the cart stored under `key`.
    ///
    /// An absent blob yields an empty cart. A corrupt blob is replaced by an
    /// empty cart and the decode error is kept in
    /// [`recovered_from`](Self::recovered_from).
    pub fn load(storage: Arc<dyn CartStorage>, key: impl Into<String>) -> Self {
        let key = key.into();
        let (lines, recovered_from) = read_lines(storage.as_ref(), &key);
        Self {
            storage,
            key,
            lines,
            recovered_from,
        }
    }

    /// Storage key of this cart.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current lines, in the order they were first added.
    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Quantity in the cart for `item_id`, zero if absent.
    #[must_use]
    pub fn quantity_of(&self, item_id: &ItemId) -> u32 {
        self.lines
            .iter()
            .find(|line| &line.item_id == item_id)
            .map_or(0, |line| line.quantity)
    }

    /// Sum of all line quantities (the badge count).
    #[must_use]
    pub fn total_quantity(&self) -> u64 {
        self.lines.iter().map(|line| u64::from(line.quantity)).sum()
    }

    /// The error the last load recovered from, if any.
    #[must_use]
    pub const fn recovered_from(&self) -> Option<&CartError> {
        self.recovered_from.as_ref()
    }

    /// Add `quantity` of `item_id`, merging with an existing line.
    ///
    /// # Errors
    ///
    /// - `InvalidQuantity`: `quantity` is zero
    /// - `Storage`: the cart could not be persisted (the cart is unchanged)
    pub fn add_line(&mut self, item_id: ItemId, quantity: u32) -> Result<(), CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }

        let mut next = self.lines.clone();
        match next.iter_mut().find(|line| line.item_id == item_id) {
            Some(line) => line.quantity = line.quantity.saturating_add(quantity),
            None => next.push(CartLine::new(item_id, quantity)),
        }
        self.persist(next)
    }

    /// Add `quantity` of `item_id`, capping the line at `last_known_stock`.
    ///
    /// The cap is advisory: stock is re-read at checkout. Returns the line's
    /// quantity after the call, which is zero if the item is sold out.
    ///
    /// # Errors
    ///
    /// - `InvalidQuantity`: `quantity` is zero
    /// - `Storage`: the cart could not be persisted (the cart is unchanged)
    pub fn add_line_within(
        &mut self,
        item_id: ItemId,
        quantity: u32,
        last_known_stock: u32,
    ) -> Result<u32, CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }

        let current = self.quantity_of(&item_id);
        let target = current.saturating_add(quantity).min(last_known_stock);
        if target <= current {
            return Ok(current);
        }

        self.add_line(item_id, target - current)?;
        Ok(target)
    }

    /// Replace the quantity of an existing line. Zero removes the line.
    ///
    /// # Errors
    ///
    /// - `LineNotFound`: the cart has no line for `item_id`
    /// - `Storage`: the cart could not be persisted (the cart is unchanged)
    pub fn set_quantity(&mut self, item_id: &ItemId, quantity: u32) -> Result<(), CartError> {
        if quantity == 0 {
            return self.remove_line(item_id).and_then(|removed| {
                if removed {
                    Ok(())
                } else {
                    Err(CartError::LineNotFound(item_id.clone()))
                }
            });
        }

        let mut next = self.lines.clone();
        let line = next
            .iter_mut()
            .find(|line| &line.item_id == item_id)
            .ok_or_else(|| CartError::LineNotFound(item_id.clone()))?;
        line.quantity = quantity;
        self.persist(next)
    }

    /// Remove the line for `item_id`. Returns whether a line was removed.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the cart could not be persisted.
    pub fn remove_line(&mut self, item_id: &ItemId) -> Result<bool, CartError> {
        let mut next = self.lines.clone();
        let before = next.len();
        next.retain(|line| &line.item_id != item_id);
        if next.len() == before {
            return Ok(false);
        }
        self.persist(next)?;
        Ok(true)
    }

    /// Empty the cart and delete the stored blob.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the blob could not be deleted.
    pub fn clear(&mut self) -> Result<(), CartError> {
        self.storage.remove(&self.key)?;
        self.lines.clear();
        Ok(())
    }

    /// Re-read the stored blob, picking up writes made by other handles.
    pub fn reload(&mut self) {
        let (lines, recovered_from) = read_lines(self.storage.as_ref(), &self.key);
        self.lines = lines;
        self.recovered_from = recovered_from;
    }

    /// Watch for writes to this cart's key made through any handle on the
    /// same storage.
    #[must_use]
    pub fn watch(&self) -> CartWatch {
        CartWatch {
            key: self.key.clone(),
            receiver: self.storage.subscribe(),
        }
    }

    fn persist(&mut self, next: Vec<CartLine>) -> Result<(), CartError> {
        let raw = encode_lines(&next)?;
        self.storage.set(&self.key, &raw)?;
        self.lines = next;
        Ok(())
    }
}

fn read_lines(storage: &dyn CartStorage, key: &str) -> (Vec<CartLine>, Option<CartError>) {
    let raw = match storage.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return (Vec::new(), None),
        Err(error) => {
            tracing::warn!(key, error = %error, "Cart storage unreadable, starting empty");
            return (Vec::new(), Some(error));
        }
    };

    match decode_lines(&raw) {
        Ok(lines) => (lines, None),
        Err(error) => {
            tracing::warn!(key, error = %error, "Persisted cart is corrupt, resetting to empty");
            if let Err(reset_error) = storage.set(key, "[]") {
                tracing::warn!(key, error = %reset_error, "Failed to overwrite corrupt cart");
            }
            (Vec::new(), Some(error))
        }
    }
}

/// Notifications of writes to one cart key.
///
/// Delivered for writes through every handle on the storage, this handle's
/// own writes included. Receivers call [`CartStore::reload`] on each
/// notification.
#[derive(Debug)]
pub struct CartWatch {
    key: String,
    receiver: broadcast::Receiver<String>,
}

impl CartWatch {
    /// Wait for the next write to the watched key.
    ///
    /// Returns `None` once the storage is gone. A burst of missed
    /// notifications is reported as a single change.
    pub async fn changed(&mut self) -> Option<()> {
        loop {
            match self.receiver.recv().await {
                Ok(key) if key == self.key => return Some(()),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => return Some(()),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Whether a write to the watched key is already queued.
    pub fn has_changed(&mut self) -> bool {
        loop {
            match self.receiver.try_recv() {
                Ok(key) if key == self.key => return true,
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(_)) => return true,
                Err(_) => return false,
            }
        }
    }
}
