//! Loading from and saving to the profile store, and the tenant lifecycle
//! that decides which private section is live.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use super::{ProfileManager, ProfileManagerError, ProfileManagerResult};
use crate::external_deps::store::{StoreData, TenantData};
use crate::modules::events::ProfileEvent;
use crate::profile::{MacAddress, NetworkProfile, ProfileId, uid_in_tenant};

const ANONYMOUS_AT_REALM_PREFIX: &str = "anonymous@";

impl ProfileManager {
    /// Replaces the in-memory state with the store contents.
    ///
    /// On a read failure the error is returned and nothing is touched; the
    /// caller decides whether to carry on with an empty table.
    pub fn load_from_store(&mut self) -> ProfileManagerResult<usize> {
        let tenant = self.table.current_tenant();
        let include_tenant = self.deferred_unlock_read || self.tenants.is_unlocked(tenant);
        if self.deferred_unlock_read {
            log::info!("handling tenant unlock before loading from store");
            self.deferred_unlock_read = false;
        }

        let data = self.store.read(tenant).map_err(|err| {
            log::error!("reading profile store failed, saved profiles unavailable: {}", err);
            err
        })?;
        let StoreData {
            shared,
            tenant: tenant_data,
            address_map,
        } = data;

        self.clear_internal_data();
        for profile in shared {
            self.insert_loaded(profile);
        }
        self.randomizer.load_legacy(address_map);
        if include_tenant {
            self.load_tenant_data(tenant_data);
            self.pending_unlock_store_read = false;
        } else {
            log::info!("tenant {} is locked, deferring its profiles until unlock", tenant);
            self.pending_unlock_store_read = true;
        }
        self.generate_randomized_addresses();
        if self.table.is_empty() {
            log::warn!("no stored profiles found");
        }
        self.reset_sim_profiles();

        let count = self.table.len();
        self.dispatch_reloaded(count);
        self.pending_store_read = false;
        Ok(count)
    }

    /// Writes the saved profiles to the store.
    ///
    /// Ephemeral and provider-managed profiles are skipped. Shared profiles
    /// and profiles created outside the current tenant go to the shared
    /// section, the rest to the current tenant's section. A failed write
    /// leaves the in-memory state as it is.
    pub fn save_to_store(&mut self, force: bool) -> ProfileManagerResult<()> {
        if self.pending_store_read {
            log::error!("cannot save to store before the store is read");
            return Err(ProfileManagerError::StoreNotRead);
        }
        let mut data = StoreData::default();
        for profile in self.table.iter_all().filter(|p| p.is_saved()) {
            if profile.shared || !self.uid_in_current_tenant(profile.creator.uid) {
                data.shared.push(profile.clone());
            } else {
                data.tenant.profiles.push(profile.clone());
            }
        }
        data.tenant.deleted_ephemeral = self.deleted_ephemeral.clone();
        data.address_map = self.randomizer.legacy_mapping().clone();

        let tenant = (!self.pending_unlock_store_read).then(|| self.table.current_tenant());
        self.store.write(tenant, &data, force).map_err(|err| {
            log::error!("writing profile store failed, saved profiles may be lost: {}", err);
            ProfileManagerError::from(err)
        })
    }

    /// Commits any write the store is still holding back.
    pub fn flush(&mut self) -> ProfileManagerResult<()> {
        self.store.flush().map_err(ProfileManagerError::from)
    }

    /// Switches the foreground tenant, returning the ids of the outgoing
    /// tenant's private profiles that were dropped from memory.
    pub fn handle_tenant_switch(&mut self, tenant: u32) -> HashSet<ProfileId> {
        if self.verbose {
            log::debug!("handling switch to tenant {}", tenant);
        }
        if tenant == self.table.current_tenant() {
            log::warn!("tenant {} already in foreground", tenant);
            return HashSet::new();
        }
        if self.pending_store_read {
            log::warn!("tenant switch before the store is read");
            self.table.set_current_tenant(tenant);
            self.deferred_unlock_read = false;
            self.pending_unlock_store_read = true;
            return HashSet::new();
        }
        if self.tenants.is_unlocked(self.table.current_tenant()) {
            self.persist(true);
        }
        let removed = self.clear_current_tenant_data();
        self.table.set_current_tenant(tenant);

        if self.tenants.is_unlocked(tenant) {
            self.load_after_unlock_or_switch(tenant);
        } else {
            log::info!("waiting for tenant {} to unlock before loading", tenant);
            self.pending_unlock_store_read = true;
        }
        removed
    }

    pub fn handle_tenant_unlock(&mut self, tenant: u32) {
        if tenant != self.table.current_tenant() {
            log::error!("ignoring unlock of background tenant {}", tenant);
            return;
        }
        if self.pending_store_read {
            log::warn!("deferring tenant unlock until the store is read");
            self.deferred_unlock_read = true;
            return;
        }
        if self.pending_unlock_store_read {
            self.load_after_unlock_or_switch(tenant);
        }
    }

    /// Flushes and drops the private state of a stopping foreground tenant.
    pub fn handle_tenant_stop(&mut self, tenant: u32) {
        if tenant == self.table.current_tenant() && self.tenants.is_unlocked(tenant) {
            self.persist(true);
            self.clear_current_tenant_data();
        }
    }

    /// Clears stale SIM-derived identities so a swapped SIM does not reuse
    /// the old credentials.
    pub fn reset_sim_profiles(&mut self) {
        for id in self.table.ids() {
            let Some(enterprise) = self
                .table
                .get_mut(id)
                .and_then(|p| p.enterprise.as_mut())
                .filter(|e| e.is_sim_based())
            else {
                continue;
            };
            enterprise.identity.clear();
            if !enterprise
                .anonymous_identity
                .starts_with(ANONYMOUS_AT_REALM_PREFIX)
            {
                enterprise.anonymous_identity.clear();
            }
        }
    }

    fn load_after_unlock_or_switch(&mut self, tenant: u32) {
        match self.store.read_tenant(tenant) {
            Ok(data) => {
                self.load_tenant_data(data);
                self.pending_unlock_store_read = false;
                self.persist(true);
                let count = self.table.len();
                self.dispatch_reloaded(count);
            }
            Err(err) => {
                log::error!("reading profiles of tenant {} failed: {}", tenant, err);
            }
        }
    }

    fn load_tenant_data(&mut self, data: TenantData) {
        for profile in data.profiles {
            self.insert_loaded(profile);
        }
        self.deleted_ephemeral.extend(data.deleted_ephemeral);
    }

    fn insert_loaded(&mut self, mut profile: NetworkProfile) {
        profile.id = self.allocate_id();
        if self.verbose {
            log::debug!("loaded {} as {}", profile.key(), profile.id);
        }
        if let Err(err) = self.table.put(profile) {
            log::error!("failed to load stored profile: {}", err);
        }
    }

    /// Assigns addresses to profiles stored before randomization existed.
    fn generate_randomized_addresses(&mut self) {
        let mut rng = rand::thread_rng();
        for id in self.table.ids() {
            let Some(profile) = self.table.get_mut(id) else {
                continue;
            };
            if profile.randomized.address != MacAddress::SENTINEL {
                continue;
            }
            if let Some(address) = self.randomizer.initial_address(profile, &mut rng) {
                profile.randomized.address = address;
            }
        }
    }

    fn clear_internal_data(&mut self) {
        self.table.clear();
        self.deleted_ephemeral.clear();
        self.randomizer.clear_legacy();
        self.caches.clear();
        self.last_selected = None;
    }

    fn clear_current_tenant_data(&mut self) -> HashSet<ProfileId> {
        let tenant = self.table.current_tenant();
        let doomed: Vec<ProfileId> = self
            .table
            .iter()
            .filter(|p| !p.shared && uid_in_tenant(p.creator.uid, tenant))
            .map(|p| p.id)
            .collect();
        let mut removed = HashSet::new();
        for id in doomed {
            if let Some(profile) = self.table.remove(id) {
                self.caches.remove(&id);
                log::debug!("dropped private profile {} of tenant {}", profile.key(), tenant);
                removed.insert(id);
            }
        }
        self.deleted_ephemeral.clear();
        self.caches.clear();
        self.last_selected = None;
        removed
    }

    fn dispatch_reloaded(&self, count: usize) {
        let at = DateTime::<Utc>::from_timestamp_millis(self.clock.wall_ms()).unwrap_or_else(Utc::now);
        self.dispatcher.dispatch(ProfileEvent::Reloaded { count, at });
    }
}
