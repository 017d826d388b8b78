//! Change feed abstraction for pushing committed writes to viewers.
//!
//! Every write the catalog store performs is announced on the change feed
//! after it becomes durable. Subscribers (the live status projector, admin
//! dashboards) consume these announcements to stay in sync without polling.
//!
//! # Key Principles
//!
//! - **Store first**: a change is published only after the write commits
//! - **At-least-once delivery**: a change may be delivered more than once
//! - **Full records**: each change carries the complete new record, so
//!   applying it is an idempotent upsert
//! - **Lag is reported, not hidden**: a subscriber that falls behind receives
//!   [`ChangeFeedError::Lagged`] and is expected to re-read the store
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//!
//! let mut changes = feed.subscribe().await?;
//! while let Some(change) = changes.next().await {
//!     match change {
//!         Ok(ChangeEvent::ItemChanged(item)) => println!("{} now {}", item.name, item.stock),
//!         Ok(ChangeEvent::OrderChanged(order)) => println!("{} is {}", order.id, order.status),
//!         Err(ChangeFeedError::Lagged(n)) => println!("missed {n} changes, rehydrating"),
//!         Err(e) => eprintln!("feed error: {e}"),
//!     }
//! }
//! ```

use crate::item::Item;
use crate::order::Order;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur on the change feed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChangeFeedError {
    /// The subscriber fell behind and this many changes were dropped.
    #[error("Subscriber lagged behind by {0} changes")]
    Lagged(u64),

    /// Failed to subscribe.
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    /// A change notification could not be decoded.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// A committed write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "camelCase")]
pub enum ChangeEvent {
    /// An item was created, edited, or had its stock changed.
    ItemChanged(Item),
    /// An order was created or changed status.
    OrderChanged(Order),
}

/// Stream of changes from a subscription.
pub type ChangeStream = Pin<Box<dyn Stream<Item = Result<ChangeEvent, ChangeFeedError>> + Send>>;

/// Trait for change feed implementations.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the feed can be shared as
/// `Arc<dyn ChangeFeed>`.
pub trait ChangeFeed: Send + Sync {
    /// Subscribe to every change committed from now on.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeFeedError::SubscriptionFailed`] if the subscription
    /// cannot be established.
    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<ChangeStream, ChangeFeedError>> + Send + '_>>;
}
