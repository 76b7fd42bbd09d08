//! Collaborators that live outside the manager.
//!
//! Storage backends, platform capability lookups, and the secret used for
//! address derivation. The manager only talks to these through traits.

pub mod platform;
pub mod secrets;
pub mod store;

pub use platform::{
    BlocklistMonitor, Clock, KeyStore, LastResortWatchdog, ManualClock, NoopKeyStore,
    PermissionChecker, StaticBlocklist, StaticPermissions, StaticTenants, StaticWatchdog,
    SystemClock, TenantDirectory,
};
pub use secrets::{HmacSecretProvider, SecretProvider};
pub use store::{InMemoryStore, ProfileStore, RedbProfileStore, StoreData, StoreError, TenantData};
