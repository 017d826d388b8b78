//! Order commit engine.
//!
//! [`CheckoutService`] turns a cart into an order:
//!
//! 1. require a signed-in principal and a non-empty cart
//! 2. revalidate every line against live stock, freezing name and price
//! 3. hand one [`OrderDraft`] to [`CatalogStore::commit_order`], which creates
//!    the order and applies every guarded decrement atomically
//! 4. clear the cart on success, leave it untouched on any failure
//!
//! # Retry safety
//!
//! Each attempt carries an order id that doubles as an idempotency key. When
//! the outcome of an attempt is unknown (timeout, lost response) the id is
//! kept alongside the cart lines it was issued for. A retry of the same cart
//! first checks whether that order already landed, and otherwise commits under
//! the same id, which the store deduplicates. A slow write that lands after the
//! caller gave up therefore never becomes a second order.
//!
//! The commit runs on its own task. A timeout stops waiting for it; it does not
//! cancel it.

use crate::cart::CartStore;
use crate::config::CheckoutConfig;
use crate::error::CheckoutError;
use crate::metrics::CheckoutMetrics;
use crate::revalidator::{RevalidatedLine, StockRevalidator};
use cafe_orders_core::cart::{CartError, CartLine, CartStorage};
use cafe_orders_core::environment::{Clock, IdGenerator, SystemClock, UuidIdGenerator};
use cafe_orders_core::identity::{IdentityProvider, Principal};
use cafe_orders_core::ids::{ItemId, OrderId, UserId};
use cafe_orders_core::order::{Order, OrderDraft};
use cafe_orders_core::store::{CatalogStore, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// An attempt whose outcome is not known yet.
#[derive(Debug, Clone)]
struct PendingAttempt {
    order_id: OrderId,
    user_id: UserId,
    lines: Vec<CartLine>,
}

impl PendingAttempt {
    fn new(order_id: OrderId, user_id: UserId, lines: &[CartLine]) -> Self {
        Self {
            order_id,
            user_id,
            lines: fingerprint(lines),
        }
    }

    fn matches(&self, user_id: &UserId, lines: &[CartLine]) -> bool {
        &self.user_id == user_id && self.lines == fingerprint(lines)
    }
}

fn fingerprint(lines: &[CartLine]) -> Vec<CartLine> {
    let mut sorted = lines.to_vec();
    sorted.sort();
    sorted
}

/// Releases the in-flight flag on drop.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, CheckoutError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| CheckoutError::CommitInFlight)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Resume {
    Fresh,
    Retry(OrderId),
    Landed(Order),
}

/// Places orders for the signed-in principal.
///
/// One service corresponds to one client session: it allows a single commit
/// in flight and remembers the idempotency key of an attempt whose outcome is
/// unknown.
///
/// # Example
///
/// ```ignore
/// let service = CheckoutService::new(store, identity)
///     .with_config(CheckoutConfig::default().with_commit_timeout(Duration::from_secs(5)));
///
/// let mut cart = service.load_cart(storage);
/// cart.add_line(ItemId::new("item-latte"), 3)?;
///
/// match service.checkout(&mut cart).await {
///     Ok(order) => println!("order {} placed, total {}", order.id, order.total),
///     Err(CheckoutError::InsufficientStock { name, available, .. }) => {
///         println!("only {available} {name} left");
///     }
///     Err(e) => println!("{e}"),
/// }
/// ```
pub struct CheckoutService {
    store: Arc<dyn CatalogStore>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    revalidator: StockRevalidator,
    config: CheckoutConfig,
    in_flight: AtomicBool,
    pending: Mutex<Option<PendingAttempt>>,
}

impl CheckoutService {
    /// Create a service with the system clock, random order ids and the
    /// default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            revalidator: StockRevalidator::new(Arc::clone(&store)),
            store,
            identity,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidIdGenerator),
            config: CheckoutConfig::default(),
            in_flight: AtomicBool::new(false),
            pending: Mutex::new(None),
        }
    }

    /// Use `clock` for order timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `ids` to generate order ids.
    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: CheckoutConfig) -> Self {
        self.config = config;
        self
    }

    /// Current configuration.
    #[must_use]
    pub const fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Load the cart from `storage` under the configured key.
    #[must_use]
    pub fn load_cart(&self, storage: Arc<dyn CartStorage>) -> CartStore {
        CartStore::load(storage, self.config.cart_key.clone())
    }

    /// Whether a commit is currently running.
    #[must_use]
    pub fn is_committing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Order id of an attempt whose outcome is still unknown, if any.
    #[must_use]
    pub fn pending_order_id(&self) -> Option<OrderId> {
        self.pending_slot()
            .as_ref()
            .map(|pending| pending.order_id.clone())
    }

    /// Place an order for everything in `cart`.
    ///
    /// On success the cart is cleared. On failure it is left exactly as it
    /// was, so the user can retry.
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated`: nobody is signed in
    /// - `EmptyCart`: the cart has no lines
    /// - `CommitInFlight`: another commit from this service is running
    /// - `ItemUnavailable`: a line's item no longer exists
    /// - `InsufficientStock`: a line asks for more than the live stock
    /// - `CommitFailed`: the store rejected the write, could not be reached,
    ///   or did not answer in time
    #[tracing::instrument(skip_all, fields(cart_lines = cart.lines().len()))]
    pub async fn checkout(&self, cart: &mut CartStore) -> Result<Order, CheckoutError> {
        let started = Instant::now();
        let result = self.checkout_cart(cart).await;
        record_outcome(&result, started);
        result
    }

    /// Place an order for a single item without touching the cart.
    ///
    /// When nobody is signed in the item is added to `cart` instead, so the
    /// purchase intent survives the sign-in redirect.
    ///
    /// # Errors
    ///
    /// As [`checkout`](Self::checkout), plus `Cart` if `quantity` is zero or the
    /// intent could not be saved.
    #[tracing::instrument(skip_all, fields(item_id = %item_id, quantity))]
    pub async fn buy_now(
        &self,
        cart: &mut CartStore,
        item_id: ItemId,
        quantity: u32,
    ) -> Result<Order, CheckoutError> {
        let started = Instant::now();
        let result = self.buy_single(cart, item_id, quantity).await;
        record_outcome(&result, started);
        result
    }

    async fn checkout_cart(&self, cart: &mut CartStore) -> Result<Order, CheckoutError> {
        let principal = self
            .identity
            .current_principal()
            .ok_or(CheckoutError::NotAuthenticated {
                intent_preserved: false,
            })?;
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        let _guard = InFlightGuard::acquire(&self.in_flight)?;

        let lines = cart.lines().to_vec();
        let order = self.place(&principal, &lines).await?;

        if let Err(error) = cart.clear() {
            tracing::warn!(order_id = %order.id, error = %error, "Order placed but cart could not be cleared");
        }
        Ok(order)
    }

    async fn buy_single(
        &self,
        cart: &mut CartStore,
        item_id: ItemId,
        quantity: u32,
    ) -> Result<Order, CheckoutError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity.into());
        }
        let Some(principal) = self.identity.current_principal() else {
            cart.add_line(item_id, quantity)?;
            tracing::info!(quantity, "Not signed in, item kept in cart");
            return Err(CheckoutError::NotAuthenticated {
                intent_preserved: true,
            });
        };
        let _guard = InFlightGuard::acquire(&self.in_flight)?;

        self.place(&principal, &[CartLine::new(item_id, quantity)])
            .await
    }

    async fn place(&self, principal: &Principal, lines: &[CartLine]) -> Result<Order, CheckoutError> {
        let order_id = match self.resume(principal, lines).await {
            Resume::Landed(order) => return Ok(order),
            Resume::Retry(order_id) => order_id,
            Resume::Fresh => self.ids.order_id(),
        };

        let revalidated = self.revalidator.revalidate(lines).await?;
        let draft = OrderDraft::new(
            order_id.clone(),
            principal.user_id.clone(),
            principal.email.clone(),
            revalidated.iter().map(RevalidatedLine::to_order_line).collect(),
            self.clock.now(),
        )
        .map_err(|e| CheckoutError::CommitFailed {
            reason: e.to_string(),
            outcome_unknown: false,
        })?;

        let store = Arc::clone(&self.store);
        let commit = tokio::spawn(async move { store.commit_order(draft).await });

        match tokio::time::timeout(self.config.commit_timeout, commit).await {
            Ok(Ok(Ok(outcome))) => {
                self.forget_pending();
                let created = outcome.is_created();
                let order = outcome.into_order();
                tracing::info!(
                    order_id = %order.id,
                    user_id = %order.user_id,
                    total = %order.total,
                    created,
                    "Order placed"
                );
                Ok(order)
            }
            Ok(Ok(Err(StoreError::InsufficientStock {
                item_id,
                requested,
                available,
            }))) => {
                self.forget_pending();
                tracing::warn!(%item_id, requested, available, "Stock changed before commit");
                Err(CheckoutError::InsufficientStock {
                    name: name_of(&revalidated, &item_id),
                    item_id,
                    available,
                    requested: u32::try_from(requested).unwrap_or(u32::MAX),
                })
            }
            Ok(Ok(Err(StoreError::ItemNotFound(item_id)))) => {
                self.forget_pending();
                tracing::warn!(%item_id, "Item removed before commit");
                Err(CheckoutError::ItemUnavailable { item_id })
            }
            Ok(Ok(Err(error))) => {
                // A transport error may hide a write that landed
                self.remember_pending(order_id.clone(), principal, lines);
                tracing::error!(%order_id, error = %error, "Commit rejected by store");
                Err(CheckoutError::store_failure(&error))
            }
            Ok(Err(join_error)) => {
                self.remember_pending(order_id.clone(), principal, lines);
                tracing::error!(%order_id, error = %join_error, "Commit task failed");
                Err(CheckoutError::CommitFailed {
                    reason: join_error.to_string(),
                    outcome_unknown: true,
                })
            }
            Err(_elapsed) => {
                self.remember_pending(order_id.clone(), principal, lines);
                tracing::warn!(
                    %order_id,
                    timeout_ms = u64::try_from(self.config.commit_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Commit timed out, outcome unknown"
                );
                Err(CheckoutError::CommitFailed {
                    reason: format!(
                        "no answer from the store within {:?}",
                        self.config.commit_timeout
                    ),
                    outcome_unknown: true,
                })
            }
        }
    }

    /// Decide which order id this attempt uses, picking up an earlier attempt
    /// for the same cart if its outcome was unknown.
    async fn resume(&self, principal: &Principal, lines: &[CartLine]) -> Resume {
        let pending = self
            .pending_slot()
            .as_ref()
            .filter(|pending| pending.matches(&principal.user_id, lines))
            .map(|pending| pending.order_id.clone());
        let Some(order_id) = pending else {
            return Resume::Fresh;
        };

        match self.store.get_order(&order_id).await {
            Ok(Some(order)) => {
                self.forget_pending();
                tracing::info!(%order_id, "Earlier attempt landed, not committing again");
                Resume::Landed(order)
            }
            Ok(None) => {
                tracing::info!(%order_id, "Retrying with the earlier order id");
                Resume::Retry(order_id)
            }
            Err(error) => {
                tracing::warn!(%order_id, error = %error, "Could not check earlier attempt, retrying with its id");
                Resume::Retry(order_id)
            }
        }
    }

    fn pending_slot(&self) -> MutexGuard<'_, Option<PendingAttempt>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remember_pending(&self, order_id: OrderId, principal: &Principal, lines: &[CartLine]) {
        *self.pending_slot() = Some(PendingAttempt::new(
            order_id,
            principal.user_id.clone(),
            lines,
        ));
    }

    fn forget_pending(&self) {
        *self.pending_slot() = None;
    }
}

fn name_of(lines: &[RevalidatedLine], item_id: &ItemId) -> String {
    lines
        .iter()
        .find(|line| &line.item_id == item_id)
        .map_or_else(|| item_id.to_string(), |line| line.name.clone())
}

fn record_outcome(result: &Result<Order, CheckoutError>, started: Instant) {
    let outcome = match result {
        Ok(_) => "placed",
        Err(error) => {
            if matches!(error, CheckoutError::InsufficientStock { .. }) {
                CheckoutMetrics::record_stock_rejection();
            }
            error.label()
        }
    };
    CheckoutMetrics::record_outcome(outcome, started.elapsed());
}
