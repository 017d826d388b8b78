//! # Cafe Orders Runtime
//!
//! Services that turn a client-side cart into a committed order.
//!
//! ## Core Components
//!
//! - **Cart Store** ([`cart::CartStore`]): the user's intent list, persisted on
//!   every mutation and tolerant of corrupt storage
//! - **Stock Revalidator** ([`revalidator::StockRevalidator`]): re-reads live
//!   stock and price for every line immediately before commit
//! - **Checkout Service** ([`checkout::CheckoutService`]): builds the order
//!   draft and drives the store's atomic commit, with a single in-flight commit
//!   and retry-safe idempotency keys
//! - **Admin Service** ([`admin::AdminService`]): inventory edits, closing the
//!   store and advancing order status
//!
//! ## Example
//!
//! ```ignore
//! use cafe_orders_runtime::checkout::CheckoutService;
//!
//! let service = CheckoutService::new(store, identity);
//! let mut cart = service.load_cart(storage);
//! cart.add_line(latte_id, 3)?;
//!
//! let order = service.checkout(&mut cart).await?;
//! assert!(cart.is_empty());
//! ```

/// Inventory and order board operations
pub mod admin;

/// Client-side cart
pub mod cart;

/// Order commit engine
pub mod checkout;

/// Checkout configuration
pub mod config;

/// Checkout and admin errors
pub mod error;

/// File-backed cart storage
pub mod file_storage;

/// Prometheus metrics for observability
pub mod metrics;

/// Pre-commit stock revalidation
pub mod revalidator;

pub use admin::AdminService;
pub use cart::{CartStore, CartWatch};
pub use checkout::CheckoutService;
pub use config::CheckoutConfig;
pub use error::{AdminError, CheckoutError};
pub use file_storage::FileCartStorage;
pub use revalidator::{RevalidatedLine, StockRevalidator};
