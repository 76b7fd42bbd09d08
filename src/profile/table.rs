//! Keyed storage for the live profile set.

use std::collections::HashMap;
use thiserror::Error;

use super::{NetworkProfile, ProfileId, ProfileKey, uid_in_tenant};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("profile key {key} already held by id {existing}")]
    DuplicateKey { key: ProfileKey, existing: ProfileId },
}

/// Profiles indexed by id with a secondary index by key.
///
/// Lookups by default only see profiles visible to the current tenant:
/// shared profiles and profiles whose creator belongs to that tenant.
#[derive(Debug, Default)]
pub struct ProfileTable {
    by_id: HashMap<ProfileId, NetworkProfile>,
    by_key: HashMap<ProfileKey, ProfileId>,
    current_tenant: u32,
}

impl ProfileTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_tenant(&self) -> u32 {
        self.current_tenant
    }

    pub fn set_current_tenant(&mut self, tenant: u32) {
        self.current_tenant = tenant;
    }

    fn visible(&self, profile: &NetworkProfile) -> bool {
        profile.shared || uid_in_tenant(profile.creator.uid, self.current_tenant)
    }

    pub fn get(&self, id: ProfileId) -> Option<&NetworkProfile> {
        self.by_id.get(&id).filter(|p| self.visible(p))
    }

    pub fn get_mut(&mut self, id: ProfileId) -> Option<&mut NetworkProfile> {
        let tenant = self.current_tenant;
        self.by_id
            .get_mut(&id)
            .filter(|p| p.shared || uid_in_tenant(p.creator.uid, tenant))
    }

    pub fn get_by_key(&self, key: &ProfileKey) -> Option<&NetworkProfile> {
        self.by_key.get(key).and_then(|id| self.get(*id))
    }

    pub fn id_for_key(&self, key: &ProfileKey) -> Option<ProfileId> {
        self.get_by_key(key).map(|p| p.id)
    }

    /// Inserts or replaces a profile. A key already held by a different id is
    /// rejected so that each key maps to exactly one record.
    pub fn put(&mut self, profile: NetworkProfile) -> Result<(), TableError> {
        let key = profile.key();
        if let Some(existing) = self.by_key.get(&key)
            && *existing != profile.id
        {
            return Err(TableError::DuplicateKey {
                key,
                existing: *existing,
            });
        }
        if let Some(previous) = self.by_id.get(&profile.id) {
            let previous_key = previous.key();
            if previous_key != key {
                self.by_key.remove(&previous_key);
            }
        }
        self.by_key.insert(key, profile.id);
        self.by_id.insert(profile.id, profile);
        Ok(())
    }

    pub fn remove(&mut self, id: ProfileId) -> Option<NetworkProfile> {
        let profile = self.by_id.remove(&id)?;
        self.by_key.remove(&profile.key());
        Some(profile)
    }

    /// Visible profiles, ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &NetworkProfile> {
        let mut ids: Vec<_> = self
            .by_id
            .values()
            .filter(|p| self.visible(p))
            .map(|p| p.id)
            .collect();
        ids.sort();
        ids.into_iter().filter_map(|id| self.by_id.get(&id))
    }

    /// Every profile regardless of tenant visibility, ordered by id.
    pub fn iter_all(&self) -> impl Iterator<Item = &NetworkProfile> {
        let mut ids: Vec<_> = self.by_id.keys().copied().collect();
        ids.sort();
        ids.into_iter().filter_map(|id| self.by_id.get(&id))
    }

    pub fn ids(&self) -> Vec<ProfileId> {
        self.iter().map(|p| p.id).collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_key.clear();
    }
}
