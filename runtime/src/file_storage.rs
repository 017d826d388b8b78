//! File-backed cart storage.
//!
//! Each key is stored as `<dir>/<key>.json`. Writes go to a temporary file in
//! the same directory and are renamed into place, so a reader never sees a
//! half-written blob.

use cafe_orders_core::cart::{CartError, CartStorage};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

const NOTIFY_CAPACITY: usize = 64;

/// [`CartStorage`] over a directory of JSON files.
///
/// Change notifications reach every handle created through [`Clone`]. Other
/// processes writing the same directory are not observed.
#[derive(Debug, Clone)]
pub struct FileCartStorage {
    dir: PathBuf,
    changes: broadcast::Sender<String>,
}

impl FileCartStorage {
    /// Use `dir` for cart files, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::Storage`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CartError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| storage_error(&dir, &e))?;
        let (changes, _) = broadcast::channel(NOTIFY_CAPACITY);
        Ok(Self { dir, changes })
    }

    /// Directory holding the cart files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CartError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CartError::Storage(format!("invalid cart key {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    fn notify(&self, key: &str) {
        // No subscribers is fine
        let _ = self.changes.send(key.to_string());
    }
}

impl CartStorage for FileCartStorage {
    fn get(&self, key: &str) -> Result<Option<String>, CartError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            // Non UTF-8 content is reported as a corrupt blob by the caller
            Err(e) if e.kind() == io::ErrorKind::InvalidData => Ok(Some(String::new())),
            Err(e) => Err(storage_error(&path, &e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CartError> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        fs::write(&tmp, value).map_err(|e| storage_error(&tmp, &e))?;
        fs::rename(&tmp, &path).map_err(|e| storage_error(&path, &e))?;
        self.notify(key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CartError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(storage_error(&path, &e)),
        }
        self.notify(key);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

fn storage_error(path: &Path, error: &io::Error) -> CartError {
    CartError::Storage(format!("{}: {error}", path.display()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cart::CartStore;
    use cafe_orders_core::ids::ItemId;
    use std::sync::Arc;

    #[test]
    fn cart_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let storage = FileCartStorage::open(dir.path()).unwrap();
        let mut cart = CartStore::load(Arc::new(storage), "cart");
        cart.add_line(ItemId::new("item-latte"), 3).unwrap();
        drop(cart);

        let reopened = FileCartStorage::open(dir.path()).unwrap();
        let cart = CartStore::load(Arc::new(reopened), "cart");
        assert_eq!(cart.quantity_of(&ItemId::new("item-latte")), 3);
    }

    #[test]
    fn corrupt_file_resets_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cart.json"), "not json").unwrap();

        let storage = FileCartStorage::open(dir.path()).unwrap();
        let cart = CartStore::load(Arc::new(storage), "cart");

        assert!(cart.is_empty());
        assert!(cart.recovered_from().is_some());
        assert_eq!(fs::read_to_string(dir.path().join("cart.json")).unwrap(), "[]");
    }

    #[test]
    fn remove_missing_key_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileCartStorage::open(dir.path()).unwrap();
        assert!(storage.remove("cart").is_ok());
        assert_eq!(storage.get("cart").unwrap(), None);
    }

    #[test]
    fn path_like_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileCartStorage::open(dir.path()).unwrap();
        assert!(matches!(storage.set("../cart", "[]"), Err(CartError::Storage(_))));
    }

    #[test]
    fn clones_share_notifications() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileCartStorage::open(dir.path()).unwrap();
        let mut changes = storage.clone().subscribe();

        storage.set("cart", "[]").unwrap();

        assert_eq!(changes.try_recv().unwrap(), "cart");
    }
}
