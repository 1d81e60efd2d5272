//! Last-Price Persistence
//!
//! Stores the most recent successfully fetched price so a new run can show
//! it before the first live quote arrives.
//!
//! # Strategy
//! - One JSON-serialized `Price` per store
//! - Writes go to a sibling temp file and are renamed into place, so a
//!   reader sees either the previous value or the new one
//! - A missing file is an empty store, not an error

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::{error::StoreError, types::Price};

/// Durable home of the last known price
///
/// Implementations are expected to be externally synchronized; callers add
/// no locking of their own.
pub trait PriceStore: Send + Sync {
    fn save(&self, price: &Price) -> Result<(), StoreError>;

    /// `Ok(None)` when nothing has been saved yet
    fn load(&self) -> Result<Option<Price>, StoreError>;
}

/// JSON file store
#[derive(Debug, Clone)]
pub struct FilePriceStore {
    path: PathBuf,
}

impl FilePriceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl PriceStore for FilePriceStore {
    fn save(&self, price: &Price) -> Result<(), StoreError> {
        let json = serde_json::to_vec(price)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp = self.temp_path();
        fs::write(&temp, json)?;
        fs::rename(&temp, &self.path)?;

        debug!("Saved last price to {}", self.path.display());
        Ok(())
    }

    fn load(&self) -> Result<Option<Price>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No saved price at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryPriceStore {
    price: Mutex<Option<Price>>,
}

impl MemoryPriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(price: Price) -> Self {
        Self {
            price: Mutex::new(Some(price)),
        }
    }
}

impl PriceStore for MemoryPriceStore {
    fn save(&self, price: &Price) -> Result<(), StoreError> {
        *self.price.lock() = Some(price.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<Price>, StoreError> {
        Ok(self.price.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn create_test_price(amount: i64) -> Price {
        Price::new(Decimal::from(amount), "USD", Utc::now())
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePriceStore::new(dir.path().join("absent.json"));

        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilePriceStore::new(dir.path().join("nested").join("last.json"));

        store.save(&create_test_price(42_000)).unwrap();
        store.save(&create_test_price(43_000)).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.amount, Decimal::from(43_000));
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last.json");
        fs::write(&path, b"{not json").unwrap();

        let store = FilePriceStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Serde(_))));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryPriceStore::new();
        assert!(store.load().unwrap().is_none());

        let price = create_test_price(50_000);
        store.save(&price).unwrap();
        assert_eq!(store.load().unwrap(), Some(price));
    }
}
