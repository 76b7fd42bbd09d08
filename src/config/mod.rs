//! Manager configuration.
//!
//! Every field has a default, so a partial JSON document is enough:
//!
//! ```
//! use netprofile_rs::ProfileManagerConfig;
//!
//! let config = ProfileManagerConfig::from_json_str(r#"{ "partial_scan_max_channels": 4 }"#).unwrap();
//! assert_eq!(config.partial_scan_max_channels, 4);
//! assert_eq!(config.cache_max_size, 192);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::modules::linking::{DEFAULT_BSSID_MATCH_LENGTH, DEFAULT_MAX_CACHE_ENTRIES, LinkConfig};
use crate::modules::observation::{
    DEFAULT_MAX_SAMPLE_AGE_MS, DEFAULT_MAX_SIZE, DEFAULT_TRIM_SIZE, ObservationCacheConfig,
};
use crate::modules::randomization::RandomizationPolicy;
use crate::modules::selection::{DisableReason, MAX_BLOCKED_PER_NETWORK, ReasonOverride};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileManagerConfig {
    pub cache_max_size: usize,
    pub cache_trim_size: usize,
    pub link_max_cache_entries: usize,
    pub link_bssid_match_length: usize,
    pub link_only_same_credential: bool,
    pub live_signal_max_age_ms: i64,
    pub max_blocked_per_network: u32,
    pub pno_frequency_culling: bool,
    pub pno_recency_sorting: bool,
    pub pno_frequency_max_age_ms: i64,
    pub partial_scan_max_channels: usize,
    pub randomization_supported: bool,
    pub aggressive_allowlist: HashSet<String>,
    pub aggressive_blocklist: HashSet<String>,
    pub resource_aggressive_allowlist: HashSet<String>,
    pub resource_aggressive_blocklist: HashSet<String>,
    pub flaky_randomization_hotlist: HashSet<String>,
    pub device_owner_lockdown: bool,
    pub deleted_ephemeral_expiry_ms: i64,
    pub reason_overrides: HashMap<DisableReason, ReasonOverride>,
    pub verbose_logging: bool,
}

impl Default for ProfileManagerConfig {
    fn default() -> Self {
        Self {
            cache_max_size: DEFAULT_MAX_SIZE,
            cache_trim_size: DEFAULT_TRIM_SIZE,
            link_max_cache_entries: DEFAULT_MAX_CACHE_ENTRIES,
            link_bssid_match_length: DEFAULT_BSSID_MATCH_LENGTH,
            link_only_same_credential: false,
            live_signal_max_age_ms: DEFAULT_MAX_SAMPLE_AGE_MS,
            max_blocked_per_network: MAX_BLOCKED_PER_NETWORK,
            pno_frequency_culling: true,
            pno_recency_sorting: true,
            pno_frequency_max_age_ms: 30 * DAY_MS,
            partial_scan_max_channels: 6,
            randomization_supported: true,
            aggressive_allowlist: HashSet::new(),
            aggressive_blocklist: HashSet::new(),
            resource_aggressive_allowlist: HashSet::new(),
            resource_aggressive_blocklist: HashSet::new(),
            flaky_randomization_hotlist: HashSet::new(),
            device_owner_lockdown: false,
            deleted_ephemeral_expiry_ms: DAY_MS,
            reason_overrides: HashMap::new(),
            verbose_logging: false,
        }
    }
}

impl ProfileManagerConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| ConfigError::Invalid {
            field,
            reason: reason.to_string(),
        };
        if self.cache_trim_size == 0 {
            return Err(invalid("cache_trim_size", "must be positive"));
        }
        if self.cache_trim_size >= self.cache_max_size {
            return Err(invalid("cache_trim_size", "must be below cache_max_size"));
        }
        if self.link_bssid_match_length == 0 || self.link_bssid_match_length > 17 {
            return Err(invalid("link_bssid_match_length", "must be within 1..=17"));
        }
        if self.live_signal_max_age_ms <= 0 {
            return Err(invalid("live_signal_max_age_ms", "must be positive"));
        }
        if self.partial_scan_max_channels == 0 {
            return Err(invalid("partial_scan_max_channels", "must be positive"));
        }
        if self.deleted_ephemeral_expiry_ms < 0 {
            return Err(invalid("deleted_ephemeral_expiry_ms", "must not be negative"));
        }
        if self.reason_overrides.contains_key(&DisableReason::Enable) {
            return Err(invalid("reason_overrides", "the enable reason cannot be overridden"));
        }
        Ok(())
    }

    pub fn cache_config(&self) -> ObservationCacheConfig {
        ObservationCacheConfig {
            max_size: self.cache_max_size,
            trim_size: self.cache_trim_size,
        }
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            max_cache_entries: self.link_max_cache_entries,
            bssid_match_length: self.link_bssid_match_length,
            only_same_credential: self.link_only_same_credential,
        }
    }

    pub fn randomization_policy(&self) -> RandomizationPolicy {
        RandomizationPolicy {
            supported: self.randomization_supported,
            device_allowlist: self.aggressive_allowlist.clone(),
            device_blocklist: self.aggressive_blocklist.clone(),
            resource_allowlist: self.resource_aggressive_allowlist.clone(),
            resource_blocklist: self.resource_aggressive_blocklist.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ProfileManagerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pno_frequency_max_age_ms, 30 * DAY_MS);
        assert!(config.pno_frequency_culling);
    }

    #[test]
    fn parses_reason_overrides() {
        let config = ProfileManagerConfig::from_json_str(
            r#"{ "reason_overrides": { "DhcpFailure": { "threshold": 3 } }, "verbose_logging": true }"#,
        )
        .unwrap();
        assert_eq!(
            config.reason_overrides[&DisableReason::DhcpFailure].threshold,
            Some(3)
        );
        assert!(config.verbose_logging);
    }

    #[test]
    fn rejects_inverted_cache_sizes() {
        let err = ProfileManagerConfig::from_json_str(r#"{ "cache_max_size": 10, "cache_trim_size": 20 }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "cache_trim_size", .. }));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netprofile.json");
        fs::write(&path, r#"{ "aggressive_allowlist": ["Cafe"] }"#).unwrap();
        let config = ProfileManagerConfig::from_path(&path).unwrap();
        assert!(config.randomization_policy().device_allowlist.contains("Cafe"));
        assert!(matches!(
            ProfileManagerConfig::from_path(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }
}
