//! Checkout configuration.

use cafe_orders_core::cart::DEFAULT_CART_KEY;
use std::time::Duration;

/// Checkout service configuration.
///
/// # Example
///
/// ```
/// use cafe_orders_runtime::config::CheckoutConfig;
/// use std::time::Duration;
///
/// let config = CheckoutConfig::default()
///     .with_commit_timeout(Duration::from_secs(5))
///     .with_cart_key("cart-v2");
///
/// assert_eq!(config.commit_timeout, Duration::from_secs(5));
/// assert_eq!(config.cart_key, "cart-v2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutConfig {
    /// How long to wait for the store to acknowledge a commit. The write is
    /// not cancelled when this elapses.
    pub commit_timeout: Duration,

    /// Storage key of the cart blob.
    pub cart_key: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            commit_timeout: Duration::from_secs(10),
            cart_key: DEFAULT_CART_KEY.to_string(),
        }
    }
}

impl CheckoutConfig {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the commit timeout.
    #[must_use]
    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Set the cart storage key.
    #[must_use]
    pub fn with_cart_key(mut self, key: impl Into<String>) -> Self {
        self.cart_key = key.into();
        self
    }
}
