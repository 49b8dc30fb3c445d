//! Key-value persistence for provider state.
//!
//! Provider configuration, activation flags and credentials survive restarts
//! through a [`KeyValueStore`]. The gateway only needs string keys and string
//! values, so any backend can sit behind it.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::errors::Result;

pub const PROVIDER_PREFIX: &str = "provider:";
pub const PROVIDER_ACTIVE_PREFIX: &str = "provider-active:";
pub const CREDENTIALS_PREFIX: &str = "credentials:";

pub fn provider_key(provider_id: &str) -> String {
    format!("{}{}", PROVIDER_PREFIX, provider_id)
}

pub fn provider_active_key(provider_id: &str) -> String {
    format!("{}{}", PROVIDER_ACTIVE_PREFIX, provider_id)
}

pub fn credentials_key(provider_id: &str) -> String {
    format!("{}{}", CREDENTIALS_PREFIX, provider_id)
}

/// Small synchronous key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}
