//! Projector configuration.

use std::time::Duration;

/// Live status projector configuration.
///
/// # Example
///
/// ```
/// use cafe_orders_projections::ProjectorConfig;
/// use std::time::Duration;
///
/// let config = ProjectorConfig::default()
///     .with_feed_lag_rehydrate(false)
///     .with_resubscribe_delay(Duration::from_millis(50));
///
/// assert!(!config.feed_lag_rehydrate);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectorConfig {
    /// Re-read the store when the feed reports that changes were dropped.
    /// When disabled the projector only logs the gap.
    pub feed_lag_rehydrate: bool,

    /// Pause before resubscribing after the feed ends or fails.
    pub resubscribe_delay: Duration,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            feed_lag_rehydrate: true,
            resubscribe_delay: Duration::from_secs(1),
        }
    }
}

impl ProjectorConfig {
    /// Set whether feed lag triggers a rehydrate.
    #[must_use]
    pub const fn with_feed_lag_rehydrate(mut self, enabled: bool) -> Self {
        self.feed_lag_rehydrate = enabled;
        self
    }

    /// Set the resubscribe delay.
    #[must_use]
    pub const fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }
}
