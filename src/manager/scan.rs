//! Scan-side integration: observation caching, channel hints, the exported
//! network lists and randomized addresses.

use serde::Serialize;

use super::ProfileManager;
use crate::modules::observation::{Observation, ObservationCache};
use crate::modules::randomization::update_expiration_from_lease;
use crate::profile::{MacAddress, NetworkProfile, ProfileId, ProfileKey, RandomizationSetting, SecurityType};

/// One entry of the list handed to low-power background scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreferredNetwork {
    pub ssid: String,
    pub security: SecurityType,
    pub hidden: bool,
    /// Channel hint; empty when frequency culling is off or nothing was seen.
    pub frequencies: Vec<u32>,
}

/// Most associations first, then profiles seen in the last selection round.
fn scan_list_order(a: &NetworkProfile, b: &NetworkProfile) -> std::cmp::Ordering {
    b.stats
        .num_association
        .cmp(&a.stats.num_association)
        .then(b.selection.seen_in_last_round.cmp(&a.selection.seen_in_last_round))
}

impl ProfileManager {
    /// Profile an observed transmitter belongs to, if any.
    pub fn match_profile_for_observation(&self, observation: &Observation) -> Option<NetworkProfile> {
        let key = ProfileKey::new(&observation.ssid, observation.security);
        self.table.get_by_key(&key).cloned()
    }

    /// Caches an observation for profile `id` and re-derives its links.
    pub fn cache_observation(&mut self, id: ProfileId, observation: Observation) -> bool {
        let Some(profile) = self.table.get(id) else {
            log::debug!("not caching observation for unknown profile {}", id);
            return false;
        };
        let ephemeral = profile.ephemeral;
        let cache_config = self.config.cache_config();
        self.caches
            .entry(id)
            .or_insert_with(|| ObservationCache::new(cache_config))
            .put(observation, ephemeral);
        let changes = self.links.reconsider_links(&mut self.table, &self.caches, id);
        if self.verbose && (!changes.linked.is_empty() || !changes.unlinked.is_empty()) {
            log::debug!(
                "links of {} changed: +{:?} -{:?}",
                id,
                changes.linked,
                changes.unlinked
            );
        }
        true
    }

    /// Refreshes the cached sample of the transmitter the device is
    /// connected to. Returns the smoothed level that was stored.
    pub fn update_observation_from_live_signal(
        &mut self,
        id: ProfileId,
        bssid: &MacAddress,
        level: i32,
    ) -> Option<i32> {
        self.table.get(id)?;
        let now = self.clock.wall_ms();
        let max_age = self.config.live_signal_max_age_ms;
        self.caches
            .get_mut(&id)?
            .update_from_live_signal(bssid, level, now, max_age)
    }

    pub fn observation_cache(&self, id: ProfileId) -> Option<&ObservationCache> {
        self.caches.get(&id)
    }

    /// Channels worth probing for a quick scan while associated with `id`:
    /// the home channel, then channels of the profile's own recent
    /// observations, then those of its linked profiles.
    ///
    /// `None` when the profile is unknown or nothing is known about it.
    pub fn channels_for_partial_scan(
        &self,
        id: ProfileId,
        max_age_ms: i64,
        home_frequency: u32,
    ) -> Option<Vec<u32>> {
        let profile = self.table.get(id)?;
        let own = self.caches.get(&id);
        if own.is_none() && profile.linked.is_empty() {
            log::info!("no observations or linked profiles for {}", profile.key());
            return None;
        }
        let max = self.config.partial_scan_max_channels;
        let now = self.clock.wall_ms();
        let mut channels = Vec::new();

        if home_frequency > 0 {
            channels.push(home_frequency);
            if channels.len() >= max {
                return Some(channels);
            }
        }
        if let Some(own) = own
            && !own.extend_channels(&mut channels, now, max_age_ms, max)
        {
            return Some(channels);
        }
        for key in &profile.linked {
            let Some(linked) = self.table.get_by_key(key) else {
                continue;
            };
            let Some(cache) = self.caches.get(&linked.id) else {
                continue;
            };
            if !cache.extend_channels(&mut channels, now, max_age_ms, max) {
                break;
            }
        }
        channels.truncate(max);
        Some(channels)
    }

    /// Profiles eligible for background scanning, in priority order.
    pub fn build_preferred_network_list(&self) -> Vec<PreferredNetwork> {
        let mut profiles: Vec<&NetworkProfile> = self
            .table
            .iter()
            .filter(|p| p.is_saved())
            .filter(|p| {
                !p.selection.is_temporarily_disabled() && !p.selection.is_permanently_disabled()
            })
            .collect();
        profiles.sort_by(|a, b| scan_list_order(a, b));

        if self.config.pno_recency_sorting {
            let mut latest: Option<(usize, i64)> = None;
            for (idx, profile) in profiles.iter().enumerate() {
                let connected = profile.stats.last_connected_ms;
                if connected > latest.map_or(0, |(_, at)| at) {
                    latest = Some((idx, connected));
                }
            }
            if let Some((idx, _)) = latest {
                let recent = profiles.remove(idx);
                profiles.insert(0, recent);
            }
        }

        let now = self.clock.wall_ms();
        profiles
            .into_iter()
            .map(|profile| {
                let frequencies = if self.config.pno_frequency_culling {
                    self.caches
                        .get(&profile.id)
                        .map(|cache| {
                            cache.collect_channels(now, self.config.pno_frequency_max_age_ms, usize::MAX)
                        })
                        .unwrap_or_default()
                } else {
                    Vec::new()
                };
                PreferredNetwork {
                    ssid: profile.ssid.clone(),
                    security: profile.security,
                    hidden: profile.hidden,
                    frequencies,
                }
            })
            .collect()
    }

    /// SSIDs of hidden profiles, in the same order as the preferred list.
    pub fn hidden_network_list(&self) -> Vec<String> {
        let mut hidden: Vec<&NetworkProfile> = self.table.iter().filter(|p| p.hidden).collect();
        hidden.sort_by(|a, b| scan_list_order(a, b));
        hidden.into_iter().map(|p| p.ssid.clone()).collect()
    }

    /// Address to use for the next connection to `id`.
    pub fn address_for_connection(&mut self, id: ProfileId) -> Option<MacAddress> {
        let now = self.clock.wall_ms();
        let profile = self.table.get_mut(id)?;
        if !self.randomizer.is_supported() || profile.randomization == RandomizationSetting::None {
            return None;
        }
        let address = self
            .randomizer
            .address_for_connection(profile, now, &mut rand::thread_rng());
        if address.is_none() {
            log::error!("could not derive a randomized address for {}", profile.key());
        }
        address
    }

    /// Pushes out the expiry of an aggressively randomized address after a
    /// DHCP lease was obtained.
    pub fn update_randomized_expiration_from_lease(&mut self, id: ProfileId, lease_secs: u32) -> bool {
        let now = self.clock.wall_ms();
        let Some(profile) = self.table.get_mut(id) else {
            return false;
        };
        if !self.randomizer.should_use_aggressive(profile) {
            return false;
        }
        update_expiration_from_lease(&mut profile.randomized, lease_secs, now);
        true
    }

    pub fn should_use_aggressive_randomization(&self, id: ProfileId) -> bool {
        self.table
            .get(id)
            .is_some_and(|p| self.randomizer.should_use_aggressive(p))
    }

    /// Persistent-randomization profiles on SSIDs known to misbehave with
    /// randomized addresses.
    pub fn is_in_flaky_randomization_hotlist(&self, id: ProfileId) -> bool {
        self.table.get(id).is_some_and(|p| {
            p.randomization == RandomizationSetting::Persistent
                && self.config.flaky_randomization_hotlist.contains(&p.ssid)
        })
    }
}
