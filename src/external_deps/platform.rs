//! Platform collaborators consulted by the profile manager.
//!
//! Each trait is a narrow capability the host environment provides. The
//! `Static*` and `Manual*` types are fixed-answer implementations for tests
//! and for hosts without the corresponding subsystem.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use crate::profile::{EnterpriseConfig, NetworkProfile};

/// Time source. Both readings are in milliseconds.
pub trait Clock: Send + Sync {
    /// Monotonic time, used for disable timestamps and backoff.
    fn elapsed_ms(&self) -> i64;
    /// Wall-clock time, used for connection statistics and expiry.
    fn wall_ms(&self) -> i64;
}

#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed_ms(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_millis()).unwrap_or(i64::MAX)
    }

    fn wall_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    elapsed: AtomicI64,
    wall: AtomicI64,
}

impl ManualClock {
    pub fn new(elapsed_ms: i64, wall_ms: i64) -> Self {
        Self {
            elapsed: AtomicI64::new(elapsed_ms),
            wall: AtomicI64::new(wall_ms),
        }
    }

    /// Moves both readings forward by `ms`.
    pub fn advance(&self, ms: i64) {
        self.elapsed.fetch_add(ms, Ordering::SeqCst);
        self.wall.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set_wall(&self, ms: i64) {
        self.wall.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn elapsed_ms(&self) -> i64 {
        self.elapsed.load(Ordering::SeqCst)
    }

    fn wall_ms(&self) -> i64 {
        self.wall.load(Ordering::SeqCst)
    }
}

/// Caller privilege lookups.
pub trait PermissionChecker: Send + Sync {
    fn has_network_settings(&self, uid: u32) -> bool;
    fn has_setup_wizard(&self, uid: u32) -> bool;
    fn is_device_owner(&self, uid: u32, package: &str) -> bool;
    fn is_profile_owner(&self, uid: u32, package: &str) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    pub network_settings: HashSet<u32>,
    pub setup_wizard: HashSet<u32>,
    pub device_owners: HashSet<(u32, String)>,
    pub profile_owners: HashSet<(u32, String)>,
}

impl StaticPermissions {
    pub fn with_network_settings(mut self, uid: u32) -> Self {
        self.network_settings.insert(uid);
        self
    }

    pub fn with_setup_wizard(mut self, uid: u32) -> Self {
        self.setup_wizard.insert(uid);
        self
    }

    pub fn with_device_owner(mut self, uid: u32, package: impl Into<String>) -> Self {
        self.device_owners.insert((uid, package.into()));
        self
    }

    pub fn with_profile_owner(mut self, uid: u32, package: impl Into<String>) -> Self {
        self.profile_owners.insert((uid, package.into()));
        self
    }
}

impl PermissionChecker for StaticPermissions {
    fn has_network_settings(&self, uid: u32) -> bool {
        self.network_settings.contains(&uid)
    }

    fn has_setup_wizard(&self, uid: u32) -> bool {
        self.setup_wizard.contains(&uid)
    }

    fn is_device_owner(&self, uid: u32, package: &str) -> bool {
        self.device_owners.contains(&(uid, package.to_string()))
    }

    fn is_profile_owner(&self, uid: u32, package: &str) -> bool {
        self.profile_owners.contains(&(uid, package.to_string()))
    }
}

/// Transmitter blocklist kept by the connection layer.
pub trait BlocklistMonitor: Send + Sync {
    /// Number of distinct transmitters currently blocked for `ssid`.
    fn blocked_count(&self, ssid: &str) -> u32;
    /// Called after the profile for `ssid` is removed.
    fn handle_network_removed(&self, _ssid: &str) {}
}

#[derive(Debug, Default)]
pub struct StaticBlocklist {
    counts: Mutex<HashMap<String, u32>>,
}

impl StaticBlocklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ssid: impl Into<String>, count: u32) {
        if let Ok(mut counts) = self.counts.lock() {
            counts.insert(ssid.into(), count);
        }
    }
}

impl BlocklistMonitor for StaticBlocklist {
    fn blocked_count(&self, ssid: &str) -> u32 {
        self.counts
            .lock()
            .ok()
            .and_then(|counts| counts.get(ssid).copied())
            .unwrap_or(0)
    }

    fn handle_network_removed(&self, ssid: &str) {
        if let Ok(mut counts) = self.counts.lock() {
            counts.remove(ssid);
        }
    }
}

/// Circuit breaker raised when a single SSID is all that is left to try.
pub trait LastResortWatchdog: Send + Sync {
    fn should_ignore_ssid_update(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct StaticWatchdog {
    raised: std::sync::atomic::AtomicBool,
}

impl StaticWatchdog {
    pub fn new(raised: bool) -> Self {
        Self {
            raised: std::sync::atomic::AtomicBool::new(raised),
        }
    }

    pub fn set(&self, raised: bool) {
        self.raised.store(raised, Ordering::SeqCst);
    }
}

impl LastResortWatchdog for StaticWatchdog {
    fn should_ignore_ssid_update(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}

/// Tenant storage state.
pub trait TenantDirectory: Send + Sync {
    fn is_unlocked(&self, tenant: u32) -> bool;
}

#[derive(Debug, Default)]
pub struct StaticTenants {
    unlocked: Mutex<HashSet<u32>>,
}

impl StaticTenants {
    /// Directory with every listed tenant unlocked.
    pub fn unlocked(tenants: impl IntoIterator<Item = u32>) -> Self {
        Self {
            unlocked: Mutex::new(tenants.into_iter().collect()),
        }
    }

    pub fn unlock(&self, tenant: u32) {
        if let Ok(mut unlocked) = self.unlocked.lock() {
            unlocked.insert(tenant);
        }
    }

    pub fn lock(&self, tenant: u32) {
        if let Ok(mut unlocked) = self.unlocked.lock() {
            unlocked.remove(&tenant);
        }
    }
}

impl TenantDirectory for StaticTenants {
    fn is_unlocked(&self, tenant: u32) -> bool {
        self.unlocked
            .lock()
            .map(|unlocked| unlocked.contains(&tenant))
            .unwrap_or(false)
    }
}

/// Secure storage for enterprise credentials.
pub trait KeyStore: Send + Sync {
    /// Installs or refreshes the keys of `updated`. Returning `false`
    /// rejects the add or update.
    fn update_keys(&self, updated: &NetworkProfile, existing: Option<&NetworkProfile>) -> bool;
    fn remove_keys(&self, enterprise: &EnterpriseConfig);
}

/// Key store that accepts everything and stores nothing.
#[derive(Debug, Default)]
pub struct NoopKeyStore;

impl KeyStore for NoopKeyStore {
    fn update_keys(&self, _updated: &NetworkProfile, _existing: Option<&NetworkProfile>) -> bool {
        true
    }

    fn remove_keys(&self, _enterprise: &EnterpriseConfig) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_both_readings() {
        let clock = ManualClock::new(10, 1_000);
        clock.advance(5);
        assert_eq!(clock.elapsed_ms(), 15);
        assert_eq!(clock.wall_ms(), 1_005);
    }

    #[test]
    fn blocklist_forgets_removed_networks() {
        let blocklist = StaticBlocklist::new();
        blocklist.set("Home", 3);
        assert_eq!(blocklist.blocked_count("Home"), 3);
        blocklist.handle_network_removed("Home");
        assert_eq!(blocklist.blocked_count("Home"), 0);
    }

    #[test]
    fn permissions_are_per_identity() {
        let perms = StaticPermissions::default()
            .with_network_settings(1_001)
            .with_device_owner(10_050, "com.mdm");
        assert!(perms.has_network_settings(1_001));
        assert!(!perms.has_network_settings(1_002));
        assert!(perms.is_device_owner(10_050, "com.mdm"));
        assert!(!perms.is_device_owner(10_050, "com.other"));
    }

    #[test]
    fn tenants_lock_and_unlock() {
        let tenants = StaticTenants::unlocked([0]);
        assert!(tenants.is_unlocked(0));
        assert!(!tenants.is_unlocked(10));
        tenants.unlock(10);
        assert!(tenants.is_unlocked(10));
        tenants.lock(0);
        assert!(!tenants.is_unlocked(0));
    }
}
