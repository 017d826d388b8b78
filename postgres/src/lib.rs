//! `PostgreSQL` backend for the cafe order-commit engine.
//!
//! This crate provides a production catalog store implementing the
//! `CatalogStore` and `ChangeFeed` traits from `cafe-orders-core`. It uses
//! sqlx and supports:
//!
//! - All-or-nothing order commits with guarded stock decrements
//! - Idempotent commit replay keyed by the order id
//! - Change notices over `LISTEN/NOTIFY`, queued inside each write transaction
//! - Connection pooling
//!
//! # Example
//!
//! ```ignore
//! use cafe_orders_postgres::{PostgresCatalogStore, PostgresConfig};
//!
//! let store = PostgresCatalogStore::connect(&PostgresConfig::new(database_url)).await?;
//! store.migrate().await?;
//!
//! let feed = store.change_feed();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod feed;
mod rows;
mod store;

pub use config::PostgresConfig;
pub use feed::PostgresChangeFeed;
pub use store::PostgresCatalogStore;
