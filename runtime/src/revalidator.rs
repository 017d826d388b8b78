//! Stock revalidation immediately before commit.
//!
//! The revalidator re-reads the authoritative record for every cart line and
//! freezes its name and unit price. It never writes, so two calls with no
//! write in between return identical results.
//!
//! Revalidation does not close the race between this read and the commit
//! write; the store's guarded decrement does. Its job is to fail early with a
//! precise message and to capture the prices the order will be charged at.

use crate::error::CheckoutError;
use cafe_orders_core::cart::CartLine;
use cafe_orders_core::ids::ItemId;
use cafe_orders_core::money::Money;
use cafe_orders_core::order::OrderLine;
use cafe_orders_core::store::CatalogStore;
use futures::future::join_all;
use std::sync::Arc;

/// A cart line checked against live stock, with its price frozen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevalidatedLine {
    /// Item the guarded decrement targets
    pub item_id: ItemId,
    /// Name at the time of the read
    pub name: String,
    /// Quantity requested
    pub quantity: u32,
    /// Authoritative unit price, frozen into the order
    pub unit_price: Money,
    /// Stock at the time of the read
    pub available: u32,
}

impl RevalidatedLine {
    /// The order line this becomes.
    #[must_use]
    pub fn to_order_line(&self) -> OrderLine {
        OrderLine {
            item_id: self.item_id.clone(),
            name: self.name.clone(),
            quantity: self.quantity,
            unit_price: self.unit_price,
        }
    }
}

/// Re-reads live stock and price for cart lines.
#[derive(Clone)]
pub struct StockRevalidator {
    store: Arc<dyn CatalogStore>,
}

impl StockRevalidator {
    /// Create a revalidator reading from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Check every line against the store.
    ///
    /// All items are read concurrently; failures are reported for the first
    /// offending line in cart order.
    ///
    /// # Errors
    ///
    /// - `ItemUnavailable`: a line's item no longer exists
    /// - `InsufficientStock`: a line asks for more than the live stock
    /// - `CommitFailed`: the store could not be read (nothing was written)
    #[tracing::instrument(skip_all, fields(lines = lines.len()))]
    pub async fn revalidate(&self, lines: &[CartLine]) -> Result<Vec<RevalidatedLine>, CheckoutError> {
        let reads = join_all(lines.iter().map(|line| self.store.get_item(&line.item_id))).await;

        let mut revalidated = Vec::with_capacity(lines.len());
        for (line, read) in lines.iter().zip(reads) {
            let item = match read {
                Ok(Some(item)) => item,
                Ok(None) => {
                    tracing::warn!(item_id = %line.item_id, "Cart references a missing item");
                    return Err(CheckoutError::ItemUnavailable {
                        item_id: line.item_id.clone(),
                    });
                }
                Err(error) => {
                    tracing::error!(item_id = %line.item_id, error = %error, "Stock read failed");
                    return Err(CheckoutError::store_failure(&error));
                }
            };

            if item.stock < line.quantity {
                tracing::warn!(
                    item_id = %item.id,
                    quantity = line.quantity,
                    available = item.stock,
                    "Insufficient stock at revalidation"
                );
                return Err(CheckoutError::InsufficientStock {
                    item_id: item.id,
                    name: item.name,
                    available: item.stock,
                    requested: line.quantity,
                });
            }

            revalidated.push(RevalidatedLine {
                item_id: item.id,
                name: item.name,
                quantity: line.quantity,
                unit_price: item.unit_price,
                available: item.stock,
            });
        }

        Ok(revalidated)
    }
}
