//! Add, update, remove, enable and disable, with the ownership rules that
//! guard them.

use super::{ProfileManager, ProfileManagerError, ProfileManagerResult};
use crate::modules::events::ProfileEvent;
use crate::modules::selection::DisableReason;
use crate::profile::{
    NetworkProfile, Owner, ProfileId, ProfileInput, ProfileKey, SYSTEM_UID, UpdateResult,
    ValidationError, ValidationMode, WIFI_UID, validate_input,
};

impl ProfileManager {
    /// Whether `uid`/`package` may change or remove `profile`.
    pub(super) fn can_modify(&self, profile: &NetworkProfile, uid: u32, package: &str) -> bool {
        if uid == SYSTEM_UID {
            return true;
        }
        if profile.passpoint && uid == WIFI_UID {
            return true;
        }
        if profile.uses_sim_credentials() && uid == WIFI_UID {
            return true;
        }
        if self.permissions.is_device_owner(uid, package) {
            return true;
        }
        let locked_down = self
            .permissions
            .is_device_owner(profile.creator.uid, profile.creator.package_name());
        if !locked_down {
            return profile.creator.uid == uid || self.permissions.has_network_settings(uid);
        }
        !self.config.device_owner_lockdown && self.permissions.has_network_settings(uid)
    }

    fn can_change_proxy(&self, uid: u32, package: &str) -> bool {
        self.permissions.is_device_owner(uid, package)
            || self.permissions.is_profile_owner(uid, package)
            || self.permissions.has_network_settings(uid)
            || self.permissions.has_setup_wizard(uid)
    }

    fn can_change_randomization(&self, uid: u32) -> bool {
        self.permissions.has_network_settings(uid) || self.permissions.has_setup_wizard(uid)
    }

    /// Adds a new profile or updates the one matching `input` by id or key.
    ///
    /// Only the fields the caller supplied are merged; a masked secret keeps
    /// the stored value. Saved profiles are written to the store right away.
    pub fn add_or_update(
        &mut self,
        input: &ProfileInput,
        uid: u32,
        package: &str,
    ) -> ProfileManagerResult<UpdateResult> {
        if !self.uid_in_current_tenant(uid) {
            log::error!("uid {} is not in the current tenant, rejecting add", uid);
            return Err(ProfileManagerError::ForeignTenant(uid));
        }
        if self.pending_store_read {
            log::error!("cannot add profiles before the store is read");
            return Err(ProfileManagerError::StoreNotRead);
        }
        let replacing = input
            .key()
            .filter(|_| !input.ephemeral)
            .and_then(|key| self.table.get_by_key(&key))
            .filter(|existing| existing.ephemeral)
            .map(|existing| existing.id);

        let result = self.add_or_update_internal(input, uid, package, replacing)?;

        let ssid = self.table.get(result.id).map(|p| p.ssid.clone()).unwrap_or_default();
        if self.deleted_ephemeral.remove(&ssid).is_some() {
            log::debug!("profile added for dismissed ssid {}, enabling", ssid);
            self.update_selection_status(result.id, DisableReason::Enable);
        }

        let Some(profile) = self.table.get(result.id).cloned() else {
            return Ok(result);
        };
        let saved = profile.is_saved();
        self.dispatcher.dispatch(if result.is_new {
            ProfileEvent::Added(profile)
        } else {
            ProfileEvent::Updated(profile)
        });
        if saved {
            self.persist(true);
        }
        Ok(result)
    }

    fn add_or_update_internal(
        &mut self,
        input: &ProfileInput,
        uid: u32,
        package: &str,
        replacing: Option<ProfileId>,
    ) -> ProfileManagerResult<UpdateResult> {
        if self.verbose {
            log::debug!("adding/updating {:?} for uid {}", input.ssid, uid);
        }
        let existing = input
            .id
            .and_then(|id| self.table.get(id))
            .or_else(|| input.key().and_then(|key| self.table.get_by_key(&key)))
            .filter(|existing| Some(existing.id) != replacing)
            .cloned();
        let stamp = self.wall_time_string();
        let caller = Owner::new(uid, package);

        let mut profile = match &existing {
            None => {
                validate_input(input, ValidationMode::Add)?;
                let (Some(ssid), Some(security)) = (input.ssid.as_deref(), input.security) else {
                    return Err(ValidationError::MissingSsid.into());
                };
                let mut fresh = NetworkProfile::new(ssid, security);
                fresh.merge_input(input);
                fresh.ephemeral = input.ephemeral;
                fresh.shared = input.shared;
                fresh.trusted = input.trusted;
                fresh.from_suggestion = input.from_suggestion;
                fresh.from_specifier = input.from_specifier;
                fresh.passpoint = input.passpoint;
                fresh.no_internet_access_expected = input.no_internet_access_expected;
                fresh.creator = caller.clone();
                fresh.last_updater = caller;
                fresh.creation_time = stamp.clone();
                fresh.update_time = stamp;
                fresh
            }
            Some(existing) => {
                validate_input(input, ValidationMode::Update)?;
                if !self.can_modify(existing, uid, package) {
                    log::error!("uid {} may not update {}", uid, existing.key());
                    return Err(ProfileManagerError::PermissionDenied {
                        uid,
                        id: existing.id,
                    });
                }
                let mut updated = existing.clone();
                updated.merge_input(input);
                updated.last_updater = caller;
                updated.update_time = stamp;
                updated
            }
        };

        // New profiles are compared against the defaults they started from.
        let baseline = existing
            .clone()
            .unwrap_or_else(|| NetworkProfile::new(profile.ssid.clone(), profile.security));

        if baseline.has_proxy_changed(&profile) && !self.can_change_proxy(uid, package) {
            log::error!("uid {} may not change proxy settings of {}", uid, profile.key());
            return Err(ProfileManagerError::ProxyPermissionDenied(uid));
        }
        if baseline.randomization != profile.randomization && !self.can_change_randomization(uid) {
            log::error!(
                "uid {} may not change address randomization of {}",
                uid,
                profile.key()
            );
            return Err(ProfileManagerError::RandomizationPermissionDenied(uid));
        }
        // The ephemeral placeholder only goes once the saved input is known to be acceptable.
        if let Some(ephemeral) = replacing {
            log::debug!("replacing ephemeral profile {} with a saved one", profile.key());
            self.remove_unchecked(ephemeral);
        }
        if input.enterprise.is_some()
            && !profile.passpoint
            && !self.keystore.update_keys(&profile, existing.as_ref())
        {
            log::error!("key store rejected credentials of {}", profile.key());
            return Err(ProfileManagerError::KeyStoreRejected(profile.key()));
        }

        let is_new = existing.is_none();
        let ip_changed = is_new || baseline.has_ip_changed(&profile);
        let proxy_changed = is_new || baseline.has_proxy_changed(&profile);
        let credential_changed = is_new || baseline.has_credential_changed(&profile);
        if credential_changed {
            profile.selection.has_ever_connected = false;
        }

        if is_new {
            profile.id = self.allocate_id();
            if let Some(address) = self
                .randomizer
                .initial_address(&profile, &mut rand::thread_rng())
            {
                profile.randomized.address = address;
            }
        }
        let id = profile.id;
        self.table.put(profile)?;

        Ok(UpdateResult {
            id,
            is_new,
            ip_changed,
            proxy_changed,
            credential_changed,
        })
    }

    /// Removes a profile on behalf of `uid`. Returns `false` when the profile
    /// is unknown or the caller is not allowed to remove it.
    pub fn remove(&mut self, id: ProfileId, uid: u32, package: &str) -> bool {
        if !self.uid_in_current_tenant(uid) {
            log::error!("uid {} is not in the current tenant, rejecting removal", uid);
            return false;
        }
        let Some(profile) = self.table.get(id) else {
            log::debug!("cannot remove unknown profile {}", id);
            return false;
        };
        if !self.can_modify(profile, uid, package) {
            log::error!("uid {} may not remove {}", uid, profile.key());
            return false;
        }
        self.remove_unchecked(id).is_some()
    }

    /// Removal cascade without any authorization check.
    pub(super) fn remove_unchecked(&mut self, id: ProfileId) -> Option<NetworkProfile> {
        let profile = self.table.get(id)?.clone();
        let key = profile.key();
        if !profile.passpoint
            && let Some(enterprise) = &profile.enterprise
        {
            self.keystore.remove_keys(enterprise);
        }
        self.remove_connect_choice_everywhere(&key);
        self.table.remove(id);
        self.caches.remove(&id);
        self.blocklist.handle_network_removed(&profile.ssid);
        for other in self.table.ids() {
            if let Some(other) = self.table.get_mut(other) {
                other.linked.remove(&key);
            }
        }
        if self.last_selected.is_some_and(|(selected, _)| selected == id) {
            self.last_selected = None;
        }
        if profile.is_saved() {
            self.persist(true);
        }
        self.dispatcher.dispatch(ProfileEvent::Removed(profile.clone()));
        Some(profile)
    }

    pub(super) fn remove_connect_choice_everywhere(&mut self, key: &ProfileKey) {
        for id in self.table.ids() {
            if let Some(profile) = self.table.get_mut(id)
                && profile
                    .selection
                    .connect_choice
                    .as_ref()
                    .is_some_and(|choice| &choice.key == key)
            {
                profile.selection.connect_choice = None;
            }
        }
    }

    /// Enables a profile for automatic selection. With `exclusive` the
    /// profile also becomes the last explicitly selected one, even when the
    /// caller turns out not to be allowed to enable it.
    pub fn enable(&mut self, id: ProfileId, exclusive: bool, uid: u32, package: &str) -> bool {
        if !self.uid_in_current_tenant(uid) {
            log::error!("uid {} is not in the current tenant, rejecting enable", uid);
            return false;
        }
        if self.table.get(id).is_none() {
            log::debug!("cannot enable unknown profile {}", id);
            return false;
        }
        if exclusive {
            self.last_selected = Some((id, self.clock.elapsed_ms()));
        }
        if !self.table.get(id).is_some_and(|p| self.can_modify(p, uid, package)) {
            log::error!("uid {} may not enable profile {}", uid, id);
            return false;
        }
        if !self.update_selection_status(id, DisableReason::Enable) {
            return false;
        }
        self.persist(true);
        true
    }

    pub fn disable(&mut self, id: ProfileId, uid: u32, package: &str) -> bool {
        if !self.uid_in_current_tenant(uid) {
            log::error!("uid {} is not in the current tenant, rejecting disable", uid);
            return false;
        }
        if self.table.get(id).is_none() {
            log::debug!("cannot disable unknown profile {}", id);
            return false;
        }
        if self.last_selected.is_some_and(|(selected, _)| selected == id) {
            self.last_selected = None;
        }
        if !self.table.get(id).is_some_and(|p| self.can_modify(p, uid, package)) {
            log::error!("uid {} may not disable profile {}", uid, id);
            return false;
        }
        if !self.update_selection_status(id, DisableReason::ByManager) {
            return false;
        }
        self.persist(true);
        true
    }

    /// Dismisses the ephemeral or provider profile for `ssid`: the SSID is
    /// remembered, the profile is disabled and dropped as a connect choice.
    pub fn disable_ephemeral(&mut self, ssid: &str) -> Option<NetworkProfile> {
        let found = self
            .table
            .iter()
            .find(|p| (p.ephemeral || p.passpoint) && p.ssid == ssid)
            .map(|p| (p.id, p.key()))?;
        let (id, key) = found;
        self.deleted_ephemeral
            .insert(ssid.to_string(), self.clock.wall_ms());
        log::debug!("dismissed ephemeral ssid {}", ssid);
        self.remove_connect_choice_everywhere(&key);
        self.update_selection_status(id, DisableReason::ByManager);
        self.table.get(id).cloned()
    }

    /// Whether `ssid` was dismissed recently. Entries past the expiry are
    /// forgotten and the matching profile is enabled again.
    pub fn was_ephemeral_deleted(&mut self, ssid: &str) -> bool {
        let Some(&at) = self.deleted_ephemeral.get(ssid) else {
            return false;
        };
        if self.clock.wall_ms() - at <= self.config.deleted_ephemeral_expiry_ms {
            return true;
        }
        self.deleted_ephemeral.remove(ssid);
        let expired = self
            .table
            .iter()
            .find(|p| (p.ephemeral || p.passpoint) && p.ssid == ssid)
            .map(|p| p.id);
        if let Some(id) = expired {
            self.update_selection_status(id, DisableReason::Enable);
        }
        false
    }

    pub fn clear_deleted_ephemeral(&mut self) {
        self.deleted_ephemeral.clear();
    }

    fn remove_matching<F>(&mut self, predicate: F) -> Vec<ProfileId>
    where
        F: Fn(&NetworkProfile) -> bool,
    {
        let doomed: Vec<ProfileId> = self
            .table
            .iter()
            .filter(|p| predicate(p))
            .map(|p| p.id)
            .collect();
        doomed
            .into_iter()
            .filter(|id| self.remove_unchecked(*id).is_some())
            .collect()
    }

    /// Removes every profile created by the given app.
    pub fn remove_for_app(&mut self, uid: u32, package: &str) -> Vec<ProfileId> {
        let removed =
            self.remove_matching(|p| p.creator.uid == uid && p.creator.package_name() == package);
        if !removed.is_empty() {
            log::info!("removed {} profiles of {}", removed.len(), package);
        }
        removed
    }

    /// Removes every profile created by an identity of `tenant`.
    pub fn remove_for_tenant(&mut self, tenant: u32) -> Vec<ProfileId> {
        self.remove_matching(|p| crate::profile::tenant_of(p.creator.uid) == tenant)
    }

    pub fn remove_all_ephemeral_or_passpoint(&mut self) -> bool {
        !self.remove_matching(|p| p.ephemeral || p.passpoint).is_empty()
    }

    pub fn remove_suggestion(&mut self, key: &ProfileKey) -> bool {
        match self.table.get_by_key(key) {
            Some(p) if p.ephemeral && p.from_suggestion => {
                let id = p.id;
                self.remove_unchecked(id).is_some()
            }
            _ => false,
        }
    }

    pub fn remove_passpoint(&mut self, key: &ProfileKey) -> bool {
        match self.table.get_by_key(key) {
            Some(p) if p.passpoint => {
                let id = p.id;
                self.remove_unchecked(id).is_some()
            }
            _ => false,
        }
    }
}
