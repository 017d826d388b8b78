//! Orders and their status machine.
//!
//! Orders hold denormalized copies of each item's name and unit price as they
//! were at commit time. Later catalog edits never change a historical order.

use crate::ids::{ItemId, OrderId, UserId};
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Status of an order in its lifecycle
///
/// Transitions are monotonic: `Received → Preparing → Ready → Completed`.
/// There is no way back and nothing after `Completed`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Order has been committed and is waiting for the kitchen
    Received,
    /// Order is being prepared
    Preparing,
    /// Order is ready for pickup
    Ready,
    /// Order was handed over
    Completed,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Received, Self::Preparing, Self::Ready, Self::Completed];

    /// Stable lowercase name, as stored and serialized.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::Completed => "completed",
        }
    }

    /// The following status, if any.
    #[must_use]
    pub const fn next(&self) -> Option<Self> {
        match self {
            Self::Received => Some(Self::Preparing),
            Self::Preparing => Some(Self::Ready),
            Self::Ready => Some(Self::Completed),
            Self::Completed => None,
        }
    }

    /// Whether moving to `target` is a forward move.
    ///
    /// Skipping ahead (e.g. `Received → Completed`) is allowed; staying put or
    /// moving back is not.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        target > *self
    }

    /// Whether the order still shows up on the live board.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        !matches!(self, Self::Completed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a status name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown order status: {0:?}")]
pub struct ParseStatusError(pub String);

impl std::str::FromStr for OrderStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// A single line item in an order, frozen at commit time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    /// Item the line was bought from
    pub item_id: ItemId,
    /// Item name at commit time
    pub name: String,
    /// Quantity ordered
    pub quantity: u32,
    /// Price per unit in cents at commit time
    pub unit_price: Money,
}

impl OrderLine {
    /// Calculates the total price for this line item, `None` on overflow
    #[must_use]
    pub const fn total(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// A committed order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Order identifier
    pub id: OrderId,
    /// Purchaser
    pub user_id: UserId,
    /// Purchaser email at commit time
    pub email: String,
    /// Current status
    pub status: OrderStatus,
    /// Tax amount (always zero)
    pub taxes: Money,
    /// Σ quantity × unit price
    pub total: Money,
    /// Frozen line items
    pub items: Vec<OrderLine>,
    /// Commit time
    pub created_at: DateTime<Utc>,
    /// Last status change. Never earlier than `created_at` or a previous
    /// change, whatever clock the writer used.
    pub updated_at: DateTime<Utc>,
    /// Write counter, starting at 1 and bumped by every status change
    pub version: u64,
}

impl Order {
    /// Copy of this order moved to `status`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if `status` is not a forward move.
    pub fn transitioned(&self, status: OrderStatus, at: DateTime<Utc>) -> Result<Self, InvalidTransition> {
        if !self.status.can_transition_to(status) {
            return Err(InvalidTransition {
                from: self.status,
                to: status,
            });
        }

        let mut next = self.clone();
        next.status = status;
        next.updated_at = next.updated_at.max(at);
        next.version += 1;
        Ok(next)
    }
}

/// A status change that would move an order backwards or sideways.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Cannot move order from '{from}' to '{to}'")]
pub struct InvalidTransition {
    /// Current status
    pub from: OrderStatus,
    /// Requested status
    pub to: OrderStatus,
}

/// Reasons a draft cannot be built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DraftError {
    /// No lines at all
    #[error("Order must contain at least one item")]
    Empty,

    /// A line with quantity zero
    #[error("Item '{0}' has zero quantity")]
    ZeroQuantity(ItemId),

    /// Total does not fit in the money type
    #[error("Order total overflows")]
    TotalOverflow,
}

/// Everything the store needs to commit an order atomically.
///
/// The draft's `id` is the idempotency key: committing two drafts with the same
/// id produces at most one order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    /// Id the order will be stored under
    pub id: OrderId,
    /// Purchaser
    pub user_id: UserId,
    /// Purchaser email
    pub email: String,
    /// Frozen lines
    pub items: Vec<OrderLine>,
    /// Σ quantity × unit price
    pub total: Money,
    /// Commit time
    pub created_at: DateTime<Utc>,
}

impl OrderDraft {
    /// Build a draft, computing the total from the frozen lines.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError`] for an empty order, a zero quantity line, or an
    /// overflowing total.
    pub fn new(
        id: OrderId,
        user_id: UserId,
        email: impl Into<String>,
        items: Vec<OrderLine>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DraftError> {
        if items.is_empty() {
            return Err(DraftError::Empty);
        }

        let mut total = Money::ZERO;
        for line in &items {
            if line.quantity == 0 {
                return Err(DraftError::ZeroQuantity(line.item_id.clone()));
            }
            total = line
                .total()
                .and_then(|line_total| total.checked_add(line_total))
                .ok_or(DraftError::TotalOverflow)?;
        }

        Ok(Self {
            id,
            user_id,
            email: email.into(),
            items,
            total,
            created_at,
        })
    }

    /// Requested quantity per item, merged across lines and ordered by id.
    ///
    /// Stores decrement in this order so concurrent commits lock rows in a
    /// consistent sequence.
    #[must_use]
    pub fn quantities_by_item(&self) -> BTreeMap<ItemId, u64> {
        let mut quantities = BTreeMap::new();
        for line in &self.items {
            *quantities.entry(line.item_id.clone()).or_insert(0_u64) += u64::from(line.quantity);
        }
        quantities
    }

    /// The order record this draft becomes once committed.
    #[must_use]
    pub fn into_order(self) -> Order {
        Order {
            id: self.id,
            user_id: self.user_id,
            email: self.email,
            status: OrderStatus::Received,
            taxes: Money::ZERO,
            total: self.total,
            items: self.items,
            created_at: self.created_at,
            updated_at: self.created_at,
            version: 1,
        }
    }
}

/// Result of a successful commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new order was written and stock decremented
    Created(Order),
    /// An order with the draft's id already existed; nothing was written
    AlreadyCommitted(Order),
}

impl CommitOutcome {
    /// The committed order, whichever way it came about.
    #[must_use]
    pub fn into_order(self) -> Order {
        match self {
            Self::Created(order) | Self::AlreadyCommitted(order) => order,
        }
    }

    /// Whether this call performed the write.
    #[must_use]
    pub const fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Filter for order listings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderFilter {
    /// Only orders placed by this user
    pub user_id: Option<UserId>,
    /// Only orders that are not completed
    pub open_only: bool,
}

impl OrderFilter {
    /// Every order.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            user_id: None,
            open_only: false,
        }
    }

    /// Non-completed orders (the admin live board).
    #[must_use]
    pub const fn open() -> Self {
        Self {
            user_id: None,
            open_only: true,
        }
    }

    /// Orders placed by one user.
    #[must_use]
    pub const fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            open_only: false,
        }
    }

    /// Whether `order` passes the filter.
    #[must_use]
    pub fn matches(&self, order: &Order) -> bool {
        if self.open_only && !order.status.is_open() {
            return false;
        }
        self.user_id.as_ref().is_none_or(|user| *user == order.user_id)
    }
}
