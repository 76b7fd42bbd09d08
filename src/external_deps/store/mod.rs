//! Durable storage of profile records.
//!
//! The store holds a shared section visible to every tenant, one private
//! section per tenant, and the legacy randomized-address mapping. The
//! manager decides what goes where; the store only moves bytes.

mod memory;
mod redb_store;

pub use self::memory::InMemoryStore;
pub use self::redb_store::RedbProfileStore;

use std::collections::HashMap;
use thiserror::Error;

use crate::profile::NetworkProfile;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] redb::Error),

    #[error("failed to encode or decode record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Records private to one tenant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TenantData {
    pub profiles: Vec<NetworkProfile>,
    /// SSID to wall-clock deletion time.
    pub deleted_ephemeral: HashMap<String, i64>,
}

/// Everything the manager persists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreData {
    pub shared: Vec<NetworkProfile>,
    pub tenant: TenantData,
    /// Profile key to textual randomized address, as written by older
    /// releases.
    pub address_map: HashMap<String, String>,
}

pub trait ProfileStore: Send {
    /// Reads the shared section plus the private section of `tenant`.
    fn read(&mut self, tenant: u32) -> Result<StoreData, StoreError>;

    /// Reads only the private section of `tenant`.
    fn read_tenant(&mut self, tenant: u32) -> Result<TenantData, StoreError>;

    /// Replaces the stored contents. With `tenant` set to `None` the
    /// private sections are left untouched and `data.tenant` is ignored.
    ///
    /// Implementations may defer a write that is not forced until the next
    /// forced write or [`flush`].
    ///
    /// [`flush`]: ProfileStore::flush
    fn write(&mut self, tenant: Option<u32>, data: &StoreData, force: bool)
    -> Result<(), StoreError>;

    /// Commits any deferred write.
    fn flush(&mut self) -> Result<(), StoreError>;
}
