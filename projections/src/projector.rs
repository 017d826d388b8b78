//! `LiveStatusProjector`: keeps viewers in sync with the catalog store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   changes   ┌──────────────┐   watch   ┌───────────────┐
//! │ Catalog store│ ──────────▶ │   Projector  │ ────────▶ │ Subscriptions │
//! └──────┬───────┘             │     task     │           └───────────────┘
//!        │   hydrate / lag     └──────┬───────┘
//!        └────────────────────────────┘
//! ```
//!
//! The feed is subscribed to before the store is read, so no change committed
//! during hydration is missed. Changes older than what is already held are
//! dropped, which makes redelivery harmless. When the feed reports a gap the
//! projector re-reads the store and merges the result.

use crate::config::ProjectorConfig;
use crate::error::ProjectionError;
use crate::state::{CustomerOrders, ProjectionState};
use crate::subscription::{Lease, Subscription};
use cafe_orders_core::change_feed::{ChangeEvent, ChangeFeed, ChangeStream};
use cafe_orders_core::ids::{ItemId, UserId};
use cafe_orders_core::item::{Item, ItemFilter};
use cafe_orders_core::order::{Order, OrderFilter};
use cafe_orders_core::store::{CatalogStore, StoreError};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Projects the change feed into viewer subscriptions.
///
/// Dropping the projector stops its task; live subscriptions then return
/// `None` from [`Subscription::changed`].
pub struct LiveStatusProjector {
    state: watch::Receiver<Arc<ProjectionState>>,
    active: Arc<AtomicUsize>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl LiveStatusProjector {
    /// Subscribe to `feed`, hydrate from `store`, and start projecting.
    ///
    /// # Errors
    ///
    /// - [`ProjectionError::Feed`]: the feed subscription failed
    /// - [`ProjectionError::Hydration`]: the initial store read failed
    #[tracing::instrument(skip_all)]
    pub async fn start(
        store: Arc<dyn CatalogStore>,
        feed: Arc<dyn ChangeFeed>,
        config: ProjectorConfig,
    ) -> Result<Self, ProjectionError> {
        let changes = feed.subscribe().await?;
        let initial = hydrate(store.as_ref()).await?;
        tracing::info!(
            items = initial.item_count(),
            orders = initial.order_count(),
            "Projector hydrated"
        );

        let (state_tx, state_rx) = watch::channel(Arc::new(initial));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            store,
            feed,
            config,
            state: state_tx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(worker.run(changes));

        Ok(Self {
            state: state_rx,
            active: Arc::new(AtomicUsize::new(0)),
            shutdown: shutdown_tx,
            task: Some(task),
        })
    }

    /// The projected state right now.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ProjectionState> {
        Arc::clone(&self.state.borrow())
    }

    /// Watch one item. Yields `None` while the item is unknown.
    #[must_use]
    pub fn subscribe_item(&self, item_id: ItemId) -> Subscription<Option<Item>> {
        self.subscribe(move |state| state.item(&item_id).cloned())
    }

    /// Watch the order board: every order that is not completed, oldest
    /// first.
    #[must_use]
    pub fn subscribe_open_orders(&self) -> Subscription<Vec<Order>> {
        self.subscribe(ProjectionState::open_orders)
    }

    /// Watch one customer's order history.
    #[must_use]
    pub fn subscribe_customer_orders(&self, user_id: UserId) -> Subscription<CustomerOrders> {
        self.subscribe(move |state| state.customer_orders(&user_id))
    }

    /// Watch an arbitrary view of the projected state.
    #[must_use]
    pub fn subscribe<T, F>(&self, select: F) -> Subscription<T>
    where
        T: Clone + PartialEq,
        F: Fn(&ProjectionState) -> T + Send + Sync + 'static,
    {
        Subscription::new(
            self.state.clone(),
            Box::new(select),
            Lease::acquire(Arc::clone(&self.active)),
        )
    }

    /// Number of subscriptions not yet released.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop the projector task and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                tracing::error!(error = %error, "Projector task failed");
            }
        }
    }
}

impl Drop for LiveStatusProjector {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

struct Worker {
    store: Arc<dyn CatalogStore>,
    feed: Arc<dyn ChangeFeed>,
    config: ProjectorConfig,
    state: watch::Sender<Arc<ProjectionState>>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self, mut changes: ChangeStream) {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                next = changes.next() => match next {
                    Some(Ok(change)) => self.apply(change),
                    Some(Err(error)) => {
                        tracing::warn!(error = %error, "Change feed gap");
                        if self.config.feed_lag_rehydrate {
                            self.rehydrate().await;
                        }
                    }
                    None => {
                        tracing::warn!("Change feed ended, resubscribing");
                        match self.resubscribe().await {
                            Some(stream) => changes = stream,
                            None => break,
                        }
                    }
                },
            }
        }
        tracing::info!("Projector stopped");
    }

    fn apply(&self, change: ChangeEvent) {
        self.state.send_if_modified(|state| {
            let applied = Arc::make_mut(state).apply(change);
            if !applied {
                tracing::debug!("Stale change ignored");
            }
            applied
        });
    }

    async fn rehydrate(&self) {
        match hydrate(self.store.as_ref()).await {
            Ok(fresh) => {
                tracing::info!(
                    items = fresh.item_count(),
                    orders = fresh.order_count(),
                    "Projector rehydrated"
                );
                self.state
                    .send_modify(|state| Arc::make_mut(state).merge_hydrated(fresh));
            }
            Err(error) => {
                tracing::error!(error = %error, "Rehydrate failed, keeping last state");
            }
        }
    }

    async fn resubscribe(&mut self) -> Option<ChangeStream> {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return None,
                () = tokio::time::sleep(self.config.resubscribe_delay) => {}
            }

            match self.feed.subscribe().await {
                Ok(stream) => {
                    self.rehydrate().await;
                    return Some(stream);
                }
                Err(error) => {
                    tracing::error!(error = %error, "Resubscribe failed");
                }
            }
        }
    }
}

async fn hydrate(store: &dyn CatalogStore) -> Result<ProjectionState, StoreError> {
    let (items, orders) = futures::try_join!(
        store.list_items(ItemFilter::all()),
        store.list_orders(OrderFilter::all())
    )?;
    Ok(ProjectionState::hydrate(items, orders))
}
