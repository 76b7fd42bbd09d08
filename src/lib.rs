//! # netprofile-rs
//!
//! Lifecycle and selection bookkeeping for saved wireless network profiles.
//!
//! The crate keeps the set of known networks, decides which of them are
//! eligible for auto-connection, remembers where they were last seen over
//! the air and persists everything to a pluggable store.
//!
//! ## Features
//!
//! - Add, update, enable, disable and remove profiles with per-caller authorization
//! - Threshold and backoff based disabling per failure reason
//! - Bounded per-profile observation caches with channel hints for scans
//! - Persistent and aggressive MAC address randomization
//! - Linking of profiles that share a gateway or an access point
//! - Shared and per-tenant persistence, in memory or on disk via redb
//!
//! ## Example
//!
//! ```
//! use netprofile_rs::{DisableReason, Masking, ProfileInput, ProfileManager};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut manager = ProfileManager::builder().build()?;
//! manager.load_from_store()?;
//!
//! let result = manager.add_or_update(&ProfileInput::psk("Home", "hunter22"), 1000, "android")?;
//! manager.update_selection_status(result.id, DisableReason::AuthenticationFailure);
//!
//! let profile = manager.get(result.id, Masking::Full).unwrap();
//! assert_eq!(profile.pre_shared_key.as_deref(), Some("*"));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod external_deps;
pub mod manager;
pub mod modules;
pub mod profile;

pub use crate::config::{ConfigError, ProfileManagerConfig};

pub use crate::manager::{
    Masking,
    PreferredNetwork,
    ProfileManager,
    ProfileManagerBuilder,
    ProfileManagerError,
    ProfileManagerResult,
};

pub use crate::profile::{
    ConnectionStats,
    EapMethod,
    EnterpriseConfig,
    IpAssignment,
    IpConfiguration,
    MacAddress,
    MeteredOverride,
    NetworkProfile,
    Owner,
    ProfileId,
    ProfileInput,
    ProfileKey,
    ProfileStatus,
    ProxySettings,
    RandomizationSetting,
    SecurityType,
    StaticIpConfig,
    UpdateResult,
    ValidationError,
    ValidationMode,
};

pub use crate::external_deps::{
    BlocklistMonitor,
    Clock,
    HmacSecretProvider,
    InMemoryStore,
    KeyStore,
    LastResortWatchdog,
    ManualClock,
    NoopKeyStore,
    PermissionChecker,
    ProfileStore,
    RedbProfileStore,
    SecretProvider,
    StaticBlocklist,
    StaticPermissions,
    StaticTenants,
    StaticWatchdog,
    StoreData,
    StoreError,
    SystemClock,
    TenantData,
    TenantDirectory,
};

pub use crate::modules::{
    DisableReason,
    EventDispatcher,
    EventHandler,
    LoggingHandler,
    Observation,
    ObservationCache,
    ProfileEvent,
    SelectionState,
    Transition,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
