//! # Cafe Orders Testing
//!
//! Testing utilities for the cafe order-commit engine.
//!
//! This crate provides:
//! - In-memory implementations of the store seams ([`InMemoryCatalogStore`],
//!   [`InMemoryCartStorage`])
//! - Mock implementations of Environment traits ([`FixedClock`],
//!   [`SequentialIds`], [`StaticIdentity`])
//! - Catalog and principal fixtures
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```
//! use cafe_orders_testing::{fixtures, InMemoryCatalogStore};
//!
//! let store = InMemoryCatalogStore::new().with_item(fixtures::latte(5));
//! assert_eq!(store.item(&fixtures::latte_id()).map(|item| item.stock), Some(5));
//! ```

pub mod cart_storage;
pub mod catalog;
pub mod fixtures;

pub use cart_storage::InMemoryCartStorage;
pub use catalog::InMemoryCatalogStore;

/// Mock implementations of Environment traits.
pub mod mocks {
    use cafe_orders_core::environment::{Clock, IdGenerator};
    use cafe_orders_core::identity::{IdentityProvider, Principal};
    use cafe_orders_core::ids::{ItemId, OrderId};
    use chrono::{DateTime, Duration, Utc};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, RwLock};

    /// Controllable clock for deterministic tests
    ///
    /// Returns the same time until it is explicitly moved, so tests are
    /// reproducible. Clones share the same time.
    ///
    /// # Example
    ///
    /// ```
    /// use cafe_orders_testing::mocks::test_clock;
    /// use cafe_orders_core::environment::Clock;
    ///
    /// let clock = test_clock();
    /// let time1 = clock.now();
    /// assert_eq!(clock.now(), time1);
    ///
    /// clock.advance(chrono::Duration::seconds(30));
    /// assert_eq!(clock.now() - time1, chrono::Duration::seconds(30));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward.
        #[allow(clippy::unwrap_used)] // Test infrastructure
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.write().unwrap();
            *time += by;
        }

        /// Pin the clock to `time`.
        #[allow(clippy::unwrap_used)] // Test infrastructure
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap() = time;
        }
    }

    impl Clock for FixedClock {
        #[allow(clippy::unwrap_used)] // Test infrastructure
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 08:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T08:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Predictable identifiers: `order-1`, `order-2`, ... and `item-1`, ...
    #[derive(Debug, Default)]
    pub struct SequentialIds {
        orders: AtomicU64,
        items: AtomicU64,
    }

    impl SequentialIds {
        /// Start both sequences at 1.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of order ids handed out so far.
        #[must_use]
        pub fn orders_issued(&self) -> u64 {
            self.orders.load(Ordering::SeqCst)
        }
    }

    impl IdGenerator for SequentialIds {
        fn order_id(&self) -> OrderId {
            let n = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
            OrderId::new(format!("order-{n}"))
        }

        fn item_id(&self) -> ItemId {
            let n = self.items.fetch_add(1, Ordering::SeqCst) + 1;
            ItemId::new(format!("item-{n}"))
        }
    }

    /// Identity provider whose principal is set by the test.
    ///
    /// Clones share the same session, so a test can sign in or out after
    /// handing a clone to a service.
    #[derive(Debug, Clone, Default)]
    pub struct StaticIdentity {
        principal: Arc<RwLock<Option<Principal>>>,
    }

    impl StaticIdentity {
        /// Nobody signed in.
        #[must_use]
        pub fn signed_out() -> Self {
            Self::default()
        }

        /// `principal` signed in.
        #[must_use]
        pub fn signed_in(principal: Principal) -> Self {
            Self {
                principal: Arc::new(RwLock::new(Some(principal))),
            }
        }

        /// Switch the session to `principal`.
        #[allow(clippy::unwrap_used)] // Test infrastructure
        pub fn sign_in(&self, principal: Principal) {
            *self.principal.write().unwrap() = Some(principal);
        }

        /// End the session.
        #[allow(clippy::unwrap_used)] // Test infrastructure
        pub fn sign_out(&self) {
            *self.principal.write().unwrap() = None;
        }
    }

    impl IdentityProvider for StaticIdentity {
        #[allow(clippy::unwrap_used)] // Test infrastructure
        fn current_principal(&self) -> Option<Principal> {
            self.principal.read().unwrap().clone()
        }
    }
}

/// Property-based testing strategies using proptest.
pub mod properties {
    use cafe_orders_core::cart::CartLine;
    use cafe_orders_core::ids::ItemId;
    use proptest::prelude::*;

    /// Non-empty cart lines over the item ids `item-0 .. item-{catalog_size}`,
    /// each id at most once, quantities `1..=max_quantity`.
    pub fn cart_lines(
        catalog_size: usize,
        max_quantity: u32,
    ) -> impl Strategy<Value = Vec<CartLine>> {
        prop::collection::vec(0..=max_quantity, catalog_size)
            .prop_map(|quantities| {
                quantities
                    .into_iter()
                    .enumerate()
                    .filter(|(_, quantity)| *quantity > 0)
                    .map(|(index, quantity)| {
                        CartLine::new(ItemId::new(format!("item-{index}")), quantity)
                    })
                    .collect::<Vec<_>>()
            })
            .prop_filter("cart must not be empty", |lines| !lines.is_empty())
    }

    /// Stock levels for a catalog of `catalog_size` items.
    pub fn stock_levels(catalog_size: usize, max_stock: u32) -> impl Strategy<Value = Vec<u32>> {
        prop::collection::vec(0..=max_stock, catalog_size)
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, SequentialIds, StaticIdentity, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use cafe_orders_core::environment::{Clock, IdGenerator};
    use cafe_orders_core::identity::IdentityProvider;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn test_clock_clones_share_time() {
        let clock = test_clock();
        let other = clock.clone();
        clock.advance(chrono::Duration::minutes(1));
        assert_eq!(clock.now(), other.now());
    }

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialIds::new();
        assert_eq!(ids.order_id().as_str(), "order-1");
        assert_eq!(ids.order_id().as_str(), "order-2");
        assert_eq!(ids.item_id().as_str(), "item-1");
        assert_eq!(ids.orders_issued(), 2);
    }

    #[test]
    fn test_static_identity_switches() {
        let identity = StaticIdentity::signed_out();
        assert!(identity.current_principal().is_none());

        identity.sign_in(fixtures::customer());
        assert_eq!(identity.current_principal(), Some(fixtures::customer()));

        identity.sign_out();
        assert!(identity.current_principal().is_none());
    }
}
