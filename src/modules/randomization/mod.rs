//! Randomized station address management.
//!
//! Profiles normally use a persistent address derived from their key and a
//! device secret. SSIDs opted into aggressive randomization get a fresh
//! random address whenever the previous one has expired.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::external_deps::secrets::SecretProvider;
use crate::profile::{IpAssignment, MacAddress, NetworkProfile, RandomizationSetting};

pub const AGGRESSIVE_REFRESH_MIN_MS: i64 = 30 * 60 * 1000;
pub const AGGRESSIVE_REFRESH_MAX_MS: i64 = 24 * 60 * 60 * 1000;
/// Minimum lifetime of an aggressive address after a disconnect.
pub const AGGRESSIVE_WAIT_AFTER_DISCONNECT_MS: i64 = 4 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RandomizedAddressState {
    pub address: MacAddress,
    /// Wall-clock time after which an aggressive address is replaced.
    pub expiration_ms: i64,
}

/// Opt-in lists for aggressive randomization from the two configuration
/// sources. A deny entry in either source wins over any allow entry.
#[derive(Debug, Clone, Default)]
pub struct RandomizationPolicy {
    pub supported: bool,
    pub device_allowlist: HashSet<String>,
    pub device_blocklist: HashSet<String>,
    pub resource_allowlist: HashSet<String>,
    pub resource_blocklist: HashSet<String>,
}

impl RandomizationPolicy {
    fn ssid_opted_in(&self, ssid: &str) -> bool {
        if self.device_blocklist.contains(ssid) || self.resource_blocklist.contains(ssid) {
            return false;
        }
        self.device_allowlist.contains(ssid) || self.resource_allowlist.contains(ssid)
    }
}

pub struct AddressRandomizer {
    policy: RandomizationPolicy,
    secrets: Arc<dyn SecretProvider>,
    /// Addresses persisted by older releases, keyed by profile key.
    legacy: HashMap<String, String>,
}

impl std::fmt::Debug for AddressRandomizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressRandomizer")
            .field("policy", &self.policy)
            .field("legacy", &self.legacy.len())
            .finish()
    }
}

impl AddressRandomizer {
    pub fn new(policy: RandomizationPolicy, secrets: Arc<dyn SecretProvider>) -> Self {
        Self {
            policy,
            secrets,
            legacy: HashMap::new(),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.policy.supported
    }

    pub fn policy(&self) -> &RandomizationPolicy {
        &self.policy
    }

    /// Merges entries read from the store into the legacy mapping.
    pub fn load_legacy(&mut self, mapping: HashMap<String, String>) {
        self.legacy.extend(mapping);
    }

    pub fn legacy_mapping(&self) -> &HashMap<String, String> {
        &self.legacy
    }

    pub fn clear_legacy(&mut self) {
        self.legacy.clear();
    }

    pub fn should_use_aggressive(&self, profile: &NetworkProfile) -> bool {
        if !self.policy.supported || profile.randomization != RandomizationSetting::Persistent {
            return false;
        }
        if profile.ip.assignment == IpAssignment::Static {
            return false;
        }
        self.policy.ssid_opted_in(&profile.ssid)
    }

    /// Stable address for `key`.
    ///
    /// A usable legacy entry wins; an unusable one is dropped and the
    /// address is derived from the secret instead.
    pub fn persistent_address(&mut self, key: &str) -> Option<MacAddress> {
        if let Some(stored) = self.legacy.get(key) {
            match stored.parse::<MacAddress>() {
                Ok(mac) if mac.is_valid_randomized() => return Some(mac),
                _ => {
                    log::error!("dropping invalid stored randomized address for {}", key);
                    self.legacy.remove(key);
                }
            }
        }
        let digest = self.secrets.keyed_hash(key)?;
        MacAddress::local_unicast_from(&digest)
    }

    /// Address assigned when a profile is first created or loaded.
    pub fn initial_address<R: RngCore + ?Sized>(
        &mut self,
        profile: &NetworkProfile,
        rng: &mut R,
    ) -> Option<MacAddress> {
        if self.should_use_aggressive(profile) {
            Some(MacAddress::random_local_unicast(rng))
        } else {
            self.persistent_address(profile.key().as_str())
        }
    }

    /// Address to use for the next connection attempt, refreshing the
    /// stored state when the policy calls for it.
    pub fn address_for_connection<R: RngCore + ?Sized>(
        &mut self,
        profile: &mut NetworkProfile,
        now_ms: i64,
        rng: &mut R,
    ) -> Option<MacAddress> {
        if self.should_use_aggressive(profile) {
            if profile.randomized.expiration_ms < now_ms {
                profile.randomized.address = MacAddress::random_local_unicast(rng);
                log::debug!("rotated randomized address for {}", profile.key());
            }
            return Some(profile.randomized.address);
        }
        let persistent = self.persistent_address(profile.key().as_str())?;
        profile.randomized.address = persistent;
        Some(persistent)
    }
}

/// Sets the aggressive-address expiry from a DHCP lease duration.
pub fn update_expiration_from_lease(state: &mut RandomizedAddressState, lease_secs: u32, now_ms: i64) {
    let duration = (i64::from(lease_secs) * 1000).clamp(AGGRESSIVE_REFRESH_MIN_MS, AGGRESSIVE_REFRESH_MAX_MS);
    state.expiration_ms = now_ms + duration;
}

/// Keeps the current address for at least a while after a disconnect.
pub fn extend_after_disconnect(state: &mut RandomizedAddressState, disconnected_ms: i64) {
    state.expiration_ms = state
        .expiration_ms
        .max(disconnected_ms + AGGRESSIVE_WAIT_AFTER_DISCONNECT_MS);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_deps::secrets::HmacSecretProvider;
    use crate::profile::SecurityType;

    fn randomizer(allow: &[&str], deny: &[&str]) -> AddressRandomizer {
        let policy = RandomizationPolicy {
            supported: true,
            device_allowlist: allow.iter().map(|s| s.to_string()).collect(),
            resource_blocklist: deny.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        AddressRandomizer::new(policy, Arc::new(HmacSecretProvider::from_key(b"k".to_vec())))
    }

    #[test]
    fn aggressive_requires_allowlist_and_dhcp() {
        let r = randomizer(&["Cafe", "Blocked"], &["Blocked"]);
        let mut cafe = NetworkProfile::new("Cafe", SecurityType::Open);
        assert!(r.should_use_aggressive(&cafe));
        cafe.ip.assignment = IpAssignment::Static;
        assert!(!r.should_use_aggressive(&cafe));
        assert!(!r.should_use_aggressive(&NetworkProfile::new("Blocked", SecurityType::Open)));
        assert!(!r.should_use_aggressive(&NetworkProfile::new("Home", SecurityType::Open)));

        let mut none = NetworkProfile::new("Cafe", SecurityType::Open);
        none.randomization = RandomizationSetting::None;
        assert!(!r.should_use_aggressive(&none));
    }

    #[test]
    fn persistent_address_is_deterministic() {
        let mut r = randomizer(&[], &[]);
        let a = r.persistent_address("\"Home\"WPA_PSK").unwrap();
        let b = r.persistent_address("\"Home\"WPA_PSK").unwrap();
        let c = r.persistent_address("\"Work\"WPA_PSK").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.is_valid_randomized());
    }

    #[test]
    fn legacy_mapping_preferred_and_invalid_entries_dropped() {
        let mut r = randomizer(&[], &[]);
        let derived = r.persistent_address("\"Bad\"NONE").unwrap();
        r.load_legacy(HashMap::from([
            ("\"Home\"WPA_PSK".to_string(), "02:11:22:33:44:55".to_string()),
            ("\"Bad\"NONE".to_string(), "not-a-mac".to_string()),
        ]));
        assert_eq!(
            r.persistent_address("\"Home\"WPA_PSK").unwrap().to_string(),
            "02:11:22:33:44:55"
        );
        assert_eq!(r.persistent_address("\"Bad\"NONE"), Some(derived));
        assert!(!r.legacy_mapping().contains_key("\"Bad\"NONE"));
    }

    #[test]
    fn aggressive_address_rotates_only_after_expiry() {
        let mut r = randomizer(&["Cafe"], &[]);
        let mut rng = rand::thread_rng();
        let mut profile = NetworkProfile::new("Cafe", SecurityType::Open);
        profile.randomized.expiration_ms = 1_000;
        profile.randomized.address = MacAddress::new([0x02, 1, 2, 3, 4, 5]);
        let kept = r.address_for_connection(&mut profile, 1_000, &mut rng).unwrap();
        assert_eq!(kept, MacAddress::new([0x02, 1, 2, 3, 4, 5]));
        let rotated = r.address_for_connection(&mut profile, 1_001, &mut rng).unwrap();
        assert_ne!(rotated, kept);
        assert!(rotated.is_valid_randomized());
    }

    #[test]
    fn lease_expiry_is_clamped() {
        let mut state = RandomizedAddressState::default();
        update_expiration_from_lease(&mut state, 60, 0);
        assert_eq!(state.expiration_ms, AGGRESSIVE_REFRESH_MIN_MS);
        update_expiration_from_lease(&mut state, 3_600, 0);
        assert_eq!(state.expiration_ms, 3_600_000);
        update_expiration_from_lease(&mut state, u32::MAX, 0);
        assert_eq!(state.expiration_ms, AGGRESSIVE_REFRESH_MAX_MS);
    }

    #[test]
    fn disconnect_floors_expiry() {
        let mut state = RandomizedAddressState {
            address: MacAddress::SENTINEL,
            expiration_ms: 10,
        };
        extend_after_disconnect(&mut state, 100);
        assert_eq!(state.expiration_ms, 100 + AGGRESSIVE_WAIT_AFTER_DISCONNECT_MS);
        state.expiration_ms = i64::MAX / 2;
        extend_after_disconnect(&mut state, 100);
        assert_eq!(state.expiration_ms, i64::MAX / 2);
    }
}
