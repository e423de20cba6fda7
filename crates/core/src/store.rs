//! Bundle persistence.
//!
//! Bundles are keyed by transaction id. Re-running a transaction replaces its bundle.

use crate::constants::BUNDLE_FILE_EXTENSION;
use crate::error::StoreError;
use fhir::Bundle;
use scribe_uuid::TransactionId;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable bundle storage.
pub trait BundleStore: Send + Sync {
    /// Inserts or replaces the bundle for `transaction_id`.
    fn upsert(&self, transaction_id: &TransactionId, bundle: &Bundle) -> StoreResult<()>;

    /// Returns the stored bundle for `transaction_id`, if any.
    fn get(&self, transaction_id: &TransactionId) -> StoreResult<Option<Bundle>>;
}

#[derive(Debug, Default)]
pub struct MemoryBundleStore {
    bundles: Mutex<HashMap<TransactionId, Bundle>>,
}

impl MemoryBundleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self
            .bundles
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl BundleStore for MemoryBundleStore {
    fn upsert(&self, transaction_id: &TransactionId, bundle: &Bundle) -> StoreResult<()> {
        self.bundles
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .insert(transaction_id.clone(), bundle.clone());
        Ok(())
    }

    fn get(&self, transaction_id: &TransactionId) -> StoreResult<Option<Bundle>> {
        Ok(self
            .bundles
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .get(transaction_id)
            .cloned())
    }
}

/// One pretty-printed `<transaction_id>.json` file per bundle.
#[derive(Debug, Clone)]
pub struct DirectoryBundleStore {
    dir: PathBuf,
}

impl DirectoryBundleStore {
    /// Opens (creating if needed) the bundle directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DirCreation`] if the directory cannot be created.
    pub fn open(dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(dir).map_err(StoreError::DirCreation)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Path the bundle for `transaction_id` is written to.
    pub fn bundle_path(&self, transaction_id: &TransactionId) -> PathBuf {
        self.dir
            .join(format!("{transaction_id}.{BUNDLE_FILE_EXTENSION}"))
    }
}

impl BundleStore for DirectoryBundleStore {
    fn upsert(&self, transaction_id: &TransactionId, bundle: &Bundle) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(bundle).map_err(StoreError::Serialization)?;

        // Write beside the target and rename so readers never see a partial file.
        let path = self.bundle_path(transaction_id);
        let staging = path.with_extension(format!("{BUNDLE_FILE_EXTENSION}.tmp"));
        fs::write(&staging, json).map_err(StoreError::FileWrite)?;
        fs::rename(&staging, &path).map_err(StoreError::FileWrite)?;

        tracing::debug!(
            transaction_id = %transaction_id,
            entries = bundle.entry.len(),
            "bundle persisted"
        );
        Ok(())
    }

    fn get(&self, transaction_id: &TransactionId) -> StoreResult<Option<Bundle>> {
        let text = match fs::read_to_string(self.bundle_path(transaction_id)) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::FileRead(err)),
        };

        Bundle::parse(&text)
            .map(Some)
            .map_err(|source| StoreError::Parse {
                transaction_id: transaction_id.to_string(),
                source,
            })
    }
}
