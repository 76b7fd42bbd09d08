//! Discovery of profiles that appear to share access-point infrastructure.
//!
//! Linked profiles widen each other's channel hints. Links are always
//! symmetric and are re-derived whenever new observations arrive.

use std::collections::HashMap;

use crate::modules::observation::ObservationCache;
use crate::profile::{NetworkProfile, ProfileId, ProfileKey, ProfileTable};

pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 6;
pub const DEFAULT_BSSID_MATCH_LENGTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// Profiles with more cached transmitters than this are never linked.
    pub max_cache_entries: usize,
    /// Number of leading address characters that must match.
    pub bssid_match_length: usize,
    pub only_same_credential: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_cache_entries: DEFAULT_MAX_CACHE_ENTRIES,
            bssid_match_length: DEFAULT_BSSID_MATCH_LENGTH,
            only_same_credential: false,
        }
    }
}

/// Keys whose link with the subject profile changed during a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkChanges {
    pub linked: Vec<ProfileKey>,
    pub unlinked: Vec<ProfileKey>,
}

#[derive(Debug, Clone, Default)]
pub struct LinkGraph {
    config: LinkConfig,
}

impl LinkGraph {
    pub fn new(config: LinkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    fn too_large(&self, cache: Option<&ObservationCache>) -> bool {
        cache.is_some_and(|c| c.len() > self.config.max_cache_entries)
    }

    fn prefix_match(&self, a: &str, b: &str) -> bool {
        let len = self.config.bssid_match_length;
        match (a.get(..len), b.get(..len)) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }

    /// Decides whether two eligible profiles should be linked.
    pub fn should_link(
        &self,
        a: &NetworkProfile,
        b: &NetworkProfile,
        cache_a: Option<&ObservationCache>,
        cache_b: Option<&ObservationCache>,
    ) -> bool {
        if self.config.only_same_credential && a.pre_shared_key != b.pre_shared_key {
            log::trace!("not linking {} and {}: credentials differ", a.key(), b.key());
            return false;
        }
        if let (Some(gw_a), Some(gw_b)) = (&a.default_gateway, &b.default_gateway) {
            return gw_a.eq_ignore_ascii_case(gw_b);
        }
        let (Some(cache_a), Some(cache_b)) = (cache_a, cache_b) else {
            return false;
        };
        let ours: Vec<String> = cache_a.bssids().map(ToString::to_string).collect();
        let theirs: Vec<String> = cache_b.bssids().map(ToString::to_string).collect();
        ours.iter()
            .any(|x| theirs.iter().any(|y| self.prefix_match(x, y)))
    }

    /// Re-evaluates every link of profile `id` against the rest of `table`
    /// and applies the result to both ends.
    pub fn reconsider_links(
        &self,
        table: &mut ProfileTable,
        caches: &HashMap<ProfileId, ObservationCache>,
        id: ProfileId,
    ) -> LinkChanges {
        let mut changes = LinkChanges::default();
        let Some(subject) = table.get(id) else {
            return changes;
        };
        if !subject.security.is_pre_shared_key() || self.too_large(caches.get(&id)) {
            return changes;
        }
        let subject_key = subject.key();

        let mut decisions = Vec::new();
        for other in table.iter() {
            if other.id == id || other.ephemeral || !other.security.is_pre_shared_key() {
                continue;
            }
            let other_cache = caches.get(&other.id);
            if self.too_large(other_cache) {
                continue;
            }
            let link = self.should_link(subject, other, caches.get(&id), other_cache);
            decisions.push((other.id, other.key(), link));
        }

        for (other_id, other_key, link) in decisions {
            let changed = if link {
                let inserted = table
                    .get_mut(id)
                    .is_some_and(|p| p.linked.insert(other_key.clone()));
                if let Some(other) = table.get_mut(other_id) {
                    other.linked.insert(subject_key.clone());
                }
                inserted
            } else {
                let removed = table
                    .get_mut(id)
                    .is_some_and(|p| p.linked.remove(&other_key));
                if let Some(other) = table.get_mut(other_id) {
                    other.linked.remove(&subject_key);
                }
                removed
            };
            if changed {
                log::debug!(
                    "{} {} and {}",
                    if link { "linked" } else { "unlinked" },
                    subject_key,
                    other_key
                );
                if link {
                    changes.linked.push(other_key);
                } else {
                    changes.unlinked.push(other_key);
                }
            }
        }
        changes
    }
}
