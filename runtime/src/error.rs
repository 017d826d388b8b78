//! Errors surfaced by the checkout and admin services.
//!
//! Every variant is recoverable: the caller shows a message and keeps whatever
//! state lets the user retry. Nothing here is fatal to the process.

use cafe_orders_core::cart::CartError;
use cafe_orders_core::ids::{ItemId, UserId};
use cafe_orders_core::item::ItemValidationError;
use cafe_orders_core::store::StoreError;
use thiserror::Error;

/// Why a checkout did not produce an order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckoutError {
    /// Nobody is signed in. When `intent_preserved` is set the requested item
    /// was added to the cart instead of being discarded.
    #[error("Sign in to place an order")]
    NotAuthenticated {
        /// Whether the purchase intent was saved to the cart
        intent_preserved: bool,
    },

    /// The cart has no lines.
    #[error("Cart is empty")]
    EmptyCart,

    /// Another commit from this service is still running.
    #[error("An order is already being placed")]
    CommitInFlight,

    /// A cart line references an item that no longer exists.
    #[error("Item {item_id} is no longer available")]
    ItemUnavailable {
        /// Missing item
        item_id: ItemId,
    },

    /// A cart line asks for more than the live stock.
    #[error("Only {available} of {name} left, {requested} requested")]
    InsufficientStock {
        /// Item that ran short
        item_id: ItemId,
        /// Display name at the time of the check
        name: String,
        /// Live stock
        available: u32,
        /// Quantity in the cart
        requested: u32,
    },

    /// The store rejected the commit or could not be reached. The cart is
    /// untouched. When `outcome_unknown` is set the write may still land; a
    /// retry of the same cart reuses the same order id and cannot double-book.
    #[error("Order could not be placed: {reason}")]
    CommitFailed {
        /// Backend message
        reason: String,
        /// Whether the write may have been applied anyway
        outcome_unknown: bool,
    },

    /// The cart could not be written while preserving intent.
    #[error(transparent)]
    Cart(#[from] CartError),
}

impl CheckoutError {
    /// Stable label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NotAuthenticated { .. } => "not_authenticated",
            Self::EmptyCart => "empty_cart",
            Self::CommitInFlight => "in_flight",
            Self::ItemUnavailable { .. } => "item_unavailable",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::CommitFailed {
                outcome_unknown: true,
                ..
            } => "timeout",
            Self::CommitFailed { .. } => "commit_failed",
            Self::Cart(_) => "cart_error",
        }
    }

    pub(crate) fn store_failure(error: &StoreError) -> Self {
        Self::CommitFailed {
            reason: error.to_string(),
            outcome_unknown: false,
        }
    }
}

/// Why an admin operation was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    /// Nobody is signed in.
    #[error("Sign in as an administrator")]
    NotAuthenticated,

    /// The signed-in user is not an administrator.
    #[error("User {0} is not an administrator")]
    Forbidden(UserId),

    /// Item input failed validation.
    #[error("Invalid item: {0}")]
    InvalidItem(#[from] ItemValidationError),

    /// The store rejected the operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_names_item_and_available_quantity() {
        let error = CheckoutError::InsufficientStock {
            item_id: ItemId::new("item-latte"),
            name: "Latte".to_string(),
            available: 2,
            requested: 3,
        };
        assert_eq!(error.to_string(), "Only 2 of Latte left, 3 requested");
        assert_eq!(error.label(), "insufficient_stock");
    }

    #[test]
    fn timeout_has_its_own_label() {
        let timeout = CheckoutError::CommitFailed {
            reason: "timed out".to_string(),
            outcome_unknown: true,
        };
        let rejected = CheckoutError::store_failure(&StoreError::Database("denied".into()));
        assert_eq!(timeout.label(), "timeout");
        assert_eq!(rejected.label(), "commit_failed");
    }
}
