//! In-memory cart storage.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use cafe_orders_core::cart::{CartError, CartStorage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// `HashMap`-backed [`CartStorage`].
///
/// Clones share the same map and notification channel, so two clones behave
/// like two browser tabs over the same local storage.
///
/// # Example
///
/// ```
/// use cafe_orders_testing::InMemoryCartStorage;
/// use cafe_orders_core::cart::CartStorage;
///
/// let tab_a = InMemoryCartStorage::new();
/// let tab_b = tab_a.clone();
/// let mut changes = tab_b.subscribe();
///
/// tab_a.set("cart", "[]").unwrap();
/// assert_eq!(tab_b.get("cart").unwrap().as_deref(), Some("[]"));
/// assert_eq!(changes.try_recv().unwrap(), "cart");
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryCartStorage {
    values: Arc<RwLock<HashMap<String, String>>>,
    changes: broadcast::Sender<String>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryCartStorage {
    /// Create empty storage
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            values: Arc::new(RwLock::new(HashMap::new())),
            changes,
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Seed a raw value without notifying subscribers.
    #[must_use]
    pub fn with_value(self, key: &str, raw: &str) -> Self {
        self.values
            .write()
            .unwrap()
            .insert(key.to_string(), raw.to_string());
        self
    }

    /// Raw value currently stored under `key`.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.values.read().unwrap().get(key).cloned()
    }

    /// Make every subsequent write fail with [`CartError::Storage`].
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), CartError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CartError::Storage("storage quota exceeded".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryCartStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl CartStorage for InMemoryCartStorage {
    fn get(&self, key: &str) -> Result<Option<String>, CartError> {
        Ok(self.raw(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CartError> {
        self.check_writable()?;
        self.values
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        let _ = self.changes.send(key.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CartError> {
        self.check_writable()?;
        self.values.write().unwrap().remove(key);
        let _ = self.changes.send(key.to_string());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}
