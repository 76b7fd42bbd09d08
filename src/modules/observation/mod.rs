//! Per-profile cache of recent wireless observations.
//!
//! Entries are keyed by transmitter address. The cache grows up to
//! `max_size` and is then cut back to `trim_size`, dropping the entries that
//! were seen least recently.

use std::collections::HashMap;

use crate::profile::{MacAddress, SecurityType};

pub const DEFAULT_MAX_SIZE: usize = 192;
pub const DEFAULT_TRIM_SIZE: usize = 128;
/// Samples older than this are never blended with a live reading.
pub const DEFAULT_MAX_SAMPLE_AGE_MS: i64 = 40_000;

/// One sighting of a transmitter.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub ssid: String,
    pub bssid: MacAddress,
    pub security: SecurityType,
    /// Signal level in dBm.
    pub level: i32,
    /// Centre frequency in MHz.
    pub frequency: u32,
    /// Wall-clock time the transmitter was first cached.
    pub first_seen_ms: i64,
    /// Wall-clock time of the latest sample.
    pub seen_ms: i64,
    pub untrusted: bool,
}

impl Observation {
    pub fn new(
        ssid: impl Into<String>,
        bssid: MacAddress,
        security: SecurityType,
        level: i32,
        frequency: u32,
        seen_ms: i64,
    ) -> Self {
        Self {
            ssid: ssid.into(),
            bssid,
            security,
            level,
            frequency,
            first_seen_ms: seen_ms,
            seen_ms,
            untrusted: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationCacheConfig {
    pub max_size: usize,
    pub trim_size: usize,
}

impl Default for ObservationCacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            trim_size: DEFAULT_TRIM_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObservationCache {
    config: ObservationCacheConfig,
    entries: HashMap<MacAddress, Observation>,
}

impl ObservationCache {
    pub fn new(config: ObservationCacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
        }
    }

    /// Inserts or replaces the sample for `observation.bssid`.
    ///
    /// Samples cached for an ephemeral profile are flagged untrusted.
    pub fn put(&mut self, mut observation: Observation, owner_ephemeral: bool) {
        if owner_ephemeral {
            observation.untrusted = true;
        }
        if let Some(previous) = self.entries.get(&observation.bssid) {
            observation.first_seen_ms = previous.first_seen_ms.min(observation.first_seen_ms);
        }
        self.entries.insert(observation.bssid, observation);
        if self.entries.len() > self.config.max_size {
            self.trim();
        }
    }

    fn trim(&mut self) {
        let excess = self.entries.len().saturating_sub(self.config.trim_size);
        if excess == 0 {
            return;
        }
        let mut by_age: Vec<(i64, MacAddress)> =
            self.entries.values().map(|o| (o.seen_ms, o.bssid)).collect();
        by_age.sort();
        for (_, bssid) in by_age.into_iter().take(excess) {
            self.entries.remove(&bssid);
        }
        log::debug!(
            "trimmed observation cache by {} entries to {}",
            excess,
            self.entries.len()
        );
    }

    /// Refreshes the sample for `bssid` with a reading taken on the live
    /// connection, smoothing it against the previous sample when that sample
    /// is recent enough. Returns the stored level, or `None` when `bssid` was
    /// never observed.
    pub fn update_from_live_signal(
        &mut self,
        bssid: &MacAddress,
        level: i32,
        now_ms: i64,
        max_age_ms: i64,
    ) -> Option<i32> {
        let entry = self.entries.get_mut(bssid)?;
        let previous_seen = entry.seen_ms;
        let previous_level = entry.level;
        entry.seen_ms = now_ms;
        entry.level = level;

        let age = now_ms - previous_seen;
        if previous_seen > 0 && age > 0 && age < max_age_ms / 2 {
            let alpha = 0.5 - age as f64 / max_age_ms as f64;
            entry.level = (level as f64 * (1.0 - alpha) + previous_level as f64 * alpha) as i32;
        }
        Some(entry.level)
    }

    /// Adds frequencies of samples newer than `max_age_ms` to `channels`,
    /// most recent first, stopping once `channels` holds `max_count`.
    ///
    /// Returns `false` when the cap was reached.
    pub fn extend_channels(
        &self,
        channels: &mut Vec<u32>,
        now_ms: i64,
        max_age_ms: i64,
        max_count: usize,
    ) -> bool {
        for observation in self.by_recency() {
            if now_ms - observation.seen_ms < max_age_ms && !channels.contains(&observation.frequency) {
                channels.push(observation.frequency);
            }
            if channels.len() >= max_count {
                return false;
            }
        }
        true
    }

    /// Distinct recent frequencies, capped at `max_count`.
    pub fn collect_channels(&self, now_ms: i64, max_age_ms: i64, max_count: usize) -> Vec<u32> {
        let mut channels = Vec::new();
        self.extend_channels(&mut channels, now_ms, max_age_ms, max_count);
        channels
    }

    /// Entries ordered newest first; ties broken by address for stable output.
    pub fn by_recency(&self) -> Vec<&Observation> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by(|a, b| b.seen_ms.cmp(&a.seen_ms).then(a.bssid.cmp(&b.bssid)));
        entries
    }

    pub fn get(&self, bssid: &MacAddress) -> Option<&Observation> {
        self.entries.get(bssid)
    }

    pub fn bssids(&self) -> impl Iterator<Item = &MacAddress> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
