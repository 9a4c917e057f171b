//! Persisted key-value storage for session data.
//!
//! This module provides:
//! - `KeyValueStore`: the synchronous get/set/remove contract
//! - `FileStore`: a JSON file in the cache directory
//! - `KeyringStore`: entries in the OS keychain via keyring
//! - `MemoryStore`: a process-local map, lost on exit

pub mod file;
pub mod keychain;
pub mod memory;

use thiserror::Error;

pub use file::FileStore;
pub use keychain::KeyringStore;
pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt stored data: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Durable string storage keyed by name.
///
/// Writes are synchronous and visible to the next `get`, including after a
/// restart for the durable implementations.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}
