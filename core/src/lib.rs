//! # Cafe Orders Core
//!
//! Domain types and store abstractions for the cafe order-commit engine.
//!
//! This crate owns the vocabulary shared by every other crate in the workspace:
//! catalog items, cart lines, orders and their status machine, the purchaser
//! identity, and the traits that the engine uses to talk to the outside world.
//!
//! ## Core Concepts
//!
//! - **Item**: a catalog record with a stable [`ids::ItemId`], a unique display
//!   name, a unit price and a stock level
//! - **Cart line**: `(item id, quantity)` held client-side until checkout
//! - **Order**: an immutable receipt of a commit with frozen prices, plus a
//!   monotonic status (`received → preparing → ready → completed`)
//! - **Catalog store**: the authoritative, transactional backend
//!   ([`store::CatalogStore`])
//! - **Change feed**: push notifications for every committed write
//!   ([`change_feed::ChangeFeed`])
//!
//! ## Data Flow
//!
//! ```text
//! Cart Store ──► Stock Revalidator ──► Order Commit Engine ──► Catalog Store
//!                                                                   │
//!                                                                   ▼
//!                                          Live Status Projector ◄── Change Feed
//! ```
//!
//! ## Example
//!
//! ```
//! use cafe_orders_core::money::Money;
//! use cafe_orders_core::order::OrderStatus;
//!
//! let price = Money::from_cents(450);
//! assert_eq!(price.checked_mul(3), Some(Money::from_cents(1350)));
//!
//! assert!(OrderStatus::Received.can_transition_to(OrderStatus::Preparing));
//! assert!(!OrderStatus::Completed.can_transition_to(OrderStatus::Ready));
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod cart;
pub mod change_feed;
pub mod identity;
pub mod ids;
pub mod item;
pub mod money;
pub mod order;
pub mod store;

/// Environment module - Dependency injection traits
///
/// All sources of non-determinism used by the engine (wall clock, identifier
/// generation) are abstracted behind traits so tests can pin them.
pub mod environment {
    use crate::ids::{ItemId, OrderId};
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use cafe_orders_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Identifier generation for new catalog items and orders.
    ///
    /// Order ids double as the idempotency key of a commit attempt, so an
    /// implementation must never hand out the same id twice.
    pub trait IdGenerator: Send + Sync {
        /// Generate a fresh order id.
        fn order_id(&self) -> OrderId;

        /// Generate a fresh item id.
        fn item_id(&self) -> ItemId;
    }

    /// Random v4 UUID identifiers.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct UuidIdGenerator;

    impl IdGenerator for UuidIdGenerator {
        fn order_id(&self) -> OrderId {
            OrderId::new(format!("order-{}", uuid::Uuid::new_v4()))
        }

        fn item_id(&self) -> ItemId {
            ItemId::new(format!("item-{}", uuid::Uuid::new_v4()))
        }
    }
}
