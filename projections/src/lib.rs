//! Live status projections for the cafe order-commit engine.
//!
//! # Overview
//!
//! The [`LiveStatusProjector`] keeps an in-memory read model of items and
//! orders in sync with the catalog store's change feed, and serves three kinds
//! of viewer:
//!
//! - **Item detail**: the latest record of one item
//! - **Order board**: every order that is not completed, oldest first
//! - **Order history**: one customer's orders split into current and past
//!
//! Delivery is at-least-once and eventually consistent. The projector runs on
//! its own task; commits never wait for it.
//!
//! # Example
//!
//! ```ignore
//! use cafe_orders_projections::{LiveStatusProjector, ProjectorConfig, ViewerScope};
//!
//! let projector = LiveStatusProjector::start(store, feed, ProjectorConfig::default()).await?;
//!
//! let mut scope = ViewerScope::new();
//! let mut board = scope.track(projector.subscribe_open_orders());
//! while let Some(orders) = board.changed().await {
//!     render(&orders);
//! }
//!
//! // Page teardown releases every subscription the viewer held
//! scope.close();
//! ```

pub mod config;
pub mod error;
pub mod projector;
pub mod state;
pub mod subscription;

pub use config::ProjectorConfig;
pub use error::ProjectionError;
pub use projector::LiveStatusProjector;
pub use state::{CustomerOrders, ProjectionState};
pub use subscription::{Lease, Subscription, ViewerScope};
