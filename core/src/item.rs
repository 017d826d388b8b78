//! Catalog items.
//!
//! An [`Item`] is the authoritative record for one thing on the menu. Items are
//! created and edited by administrators, and their stock is decremented by every
//! successful order commit. They are never hard-deleted by the engine; closing
//! the store zeroes every item's stock instead.

use crate::ids::ItemId;
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons an item write is rejected before it reaches the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ItemValidationError {
    /// Display name is empty after trimming.
    #[error("Item name cannot be empty")]
    EmptyName,

    /// Unit price below zero.
    #[error("Item price cannot be negative: {0}")]
    NegativePrice(Money),
}

/// A catalog item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Stable identifier
    pub id: ItemId,
    /// Display name, unique across the catalog
    pub name: String,
    /// Price per unit in cents
    pub unit_price: Money,
    /// Units currently available
    pub stock: u32,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Menu category (e.g. "drinks")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Image URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    /// When the item was created
    pub created_at: DateTime<Utc>,
    /// When the item was last written (admin edit or stock decrement).
    /// Never moves backwards, even when the writer's clock does.
    pub updated_at: DateTime<Utc>,
    /// Write counter, starting at 1 and bumped by every stored change
    pub version: u64,
}

impl Item {
    /// Whether at least one unit can be ordered.
    #[must_use]
    pub const fn in_stock(&self) -> bool {
        self.stock > 0
    }
}

/// Admin input for a new catalog item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    /// Display name
    pub name: String,
    /// Price per unit in cents
    pub unit_price: Money,
    /// Initial stock
    pub stock: u32,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Menu category
    #[serde(default)]
    pub category: Option<String>,
    /// Image URL
    #[serde(default)]
    pub img: Option<String>,
}

impl NewItem {
    /// Creates a new item input with no metadata
    #[must_use]
    pub fn new(name: impl Into<String>, unit_price: Money, stock: u32) -> Self {
        Self {
            name: name.into(),
            unit_price,
            stock,
            description: None,
            category: None,
            img: None,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Set the image URL.
    #[must_use]
    pub fn with_img(mut self, img: impl Into<String>) -> Self {
        self.img = Some(img.into());
        self
    }

    /// Validate and turn the input into a full record.
    ///
    /// # Errors
    ///
    /// Returns [`ItemValidationError`] if the name is blank or the price is negative.
    pub fn into_item(self, id: ItemId, now: DateTime<Utc>) -> Result<Item, ItemValidationError> {
        let name = validate_name(&self.name)?;
        validate_price(self.unit_price)?;

        Ok(Item {
            id,
            name,
            unit_price: self.unit_price,
            stock: self.stock,
            description: self.description,
            category: self.category,
            img: self.img,
            created_at: now,
            updated_at: now,
            version: 1,
        })
    }
}

/// Partial admin edit of an existing item. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    /// New display name
    pub name: Option<String>,
    /// New unit price
    pub unit_price: Option<Money>,
    /// New absolute stock level
    pub stock: Option<u32>,
    /// New description
    pub description: Option<String>,
    /// New category
    pub category: Option<String>,
    /// New image URL
    pub img: Option<String>,
}

impl ItemPatch {
    /// Whether the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.unit_price.is_none()
            && self.stock.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.img.is_none()
    }

    /// Apply the patch to a copy of `item`, bumping its version and stamping
    /// `updated_at` with `now` unless the item was already written later.
    ///
    /// # Errors
    ///
    /// Returns [`ItemValidationError`] if the patched name or price is invalid.
    pub fn apply(&self, item: &Item, now: DateTime<Utc>) -> Result<Item, ItemValidationError> {
        let mut next = item.clone();

        if let Some(name) = &self.name {
            next.name = validate_name(name)?;
        }
        if let Some(price) = self.unit_price {
            validate_price(price)?;
            next.unit_price = price;
        }
        if let Some(stock) = self.stock {
            next.stock = stock;
        }
        if let Some(description) = &self.description {
            next.description = Some(description.clone());
        }
        if let Some(category) = &self.category {
            next.category = Some(category.clone());
        }
        if let Some(img) = &self.img {
            next.img = Some(img.clone());
        }
        next.updated_at = next.updated_at.max(now);
        next.version += 1;

        Ok(next)
    }
}

/// Filter for catalog listings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ItemFilter {
    /// Only items with `stock > 0` (the customer menu)
    pub in_stock_only: bool,
    /// Only items in this category
    pub category: Option<String>,
}

impl ItemFilter {
    /// Every item, including sold-out ones.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            in_stock_only: false,
            category: None,
        }
    }

    /// Items a customer can currently order.
    #[must_use]
    pub const fn in_stock() -> Self {
        Self {
            in_stock_only: true,
            category: None,
        }
    }

    /// Restrict to one category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Whether `item` passes the filter.
    #[must_use]
    pub fn matches(&self, item: &Item) -> bool {
        if self.in_stock_only && !item.in_stock() {
            return false;
        }
        match &self.category {
            Some(category) => item.category.as_deref() == Some(category.as_str()),
            None => true,
        }
    }
}

fn validate_name(name: &str) -> Result<String, ItemValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ItemValidationError::EmptyName);
    }
    Ok(trimmed.to_string())
}

const fn validate_price(price: Money) -> Result<(), ItemValidationError> {
    if price.is_negative() {
        return Err(ItemValidationError::NegativePrice(price));
    }
    Ok(())
}
