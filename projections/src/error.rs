//! Projection errors.

use cafe_orders_core::change_feed::ChangeFeedError;
use cafe_orders_core::store::StoreError;
use thiserror::Error;

/// Errors raised while starting or rehydrating the projector.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    /// The change feed could not be subscribed to.
    #[error("Change feed error: {0}")]
    Feed(#[from] ChangeFeedError),

    /// The store could not be read during hydration.
    #[error("Hydration failed: {0}")]
    Hydration(#[from] StoreError),
}
