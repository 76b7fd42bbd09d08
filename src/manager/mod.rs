//! The profile manager.
//!
//! [`ProfileManager`] owns the profile table together with the per-profile
//! observation caches and composes the selection state machine, the address
//! randomizer and the link graph behind one public surface. It is meant to
//! be driven from a single worker; nothing here locks.

mod lifecycle;
mod persistence;
mod scan;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ProfileManagerConfig;
use crate::external_deps::platform::{
    BlocklistMonitor, Clock, KeyStore, LastResortWatchdog, NoopKeyStore, PermissionChecker,
    StaticBlocklist, StaticPermissions, StaticTenants, StaticWatchdog, SystemClock,
    TenantDirectory,
};
use crate::external_deps::secrets::{HmacSecretProvider, SecretProvider};
use crate::external_deps::store::{InMemoryStore, ProfileStore, StoreError};
use crate::modules::events::{EventDispatcher, EventHandler, LoggingHandler, ProfileEvent};
use crate::modules::linking::LinkGraph;
use crate::modules::observation::{Observation, ObservationCache};
use crate::modules::randomization::{AddressRandomizer, extend_after_disconnect};
use crate::modules::selection::{
    ConnectChoice, DisableReason, ReasonTable, SelectionStateMachine, Transition,
};
use crate::profile::{
    NetworkProfile, ProfileId, ProfileKey, ProfileStatus, ProfileTable, RandomizationSetting,
    SYSTEM_UID, TableError, ValidationError, WIFI_UID, uid_in_tenant,
};

pub use scan::PreferredNetwork;

pub type ProfileManagerResult<T> = Result<T, ProfileManagerError>;

#[derive(Debug, Error)]
pub enum ProfileManagerError {
    #[error("invalid profile: {0}")]
    Validation(#[from] ValidationError),
    #[error("uid {uid} may not modify profile {id}")]
    PermissionDenied { uid: u32, id: ProfileId },
    #[error("uid {0} may not change proxy settings")]
    ProxyPermissionDenied(u32),
    #[error("uid {0} may not change address randomization settings")]
    RandomizationPermissionDenied(u32),
    #[error("uid {0} does not belong to the current tenant")]
    ForeignTenant(u32),
    #[error("profiles have not been read from the store yet")]
    StoreNotRead,
    #[error("key store rejected the credentials of {0}")]
    KeyStoreRejected(ProfileKey),
    #[error(transparent)]
    DuplicateKey(#[from] TableError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// How much of a profile a query result reveals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Masking {
    /// Secrets and the randomized address are always masked.
    Full,
    /// Unmasked for the creator and for privileged identities only.
    OwnerUnmasked(u32),
    None,
}

/// Fluent builder for [`ProfileManager`].
pub struct ProfileManagerBuilder {
    config: ProfileManagerConfig,
    clock: Option<Arc<dyn Clock>>,
    permissions: Option<Arc<dyn PermissionChecker>>,
    blocklist: Option<Arc<dyn BlocklistMonitor>>,
    watchdog: Option<Arc<dyn LastResortWatchdog>>,
    tenants: Option<Arc<dyn TenantDirectory>>,
    keystore: Option<Arc<dyn KeyStore>>,
    secrets: Option<Arc<dyn SecretProvider>>,
    store: Option<Box<dyn ProfileStore>>,
    handlers: Vec<Arc<dyn EventHandler>>,
    logging_handler: bool,
}

impl ProfileManagerBuilder {
    pub fn new() -> Self {
        Self {
            config: ProfileManagerConfig::default(),
            clock: None,
            permissions: None,
            blocklist: None,
            watchdog: None,
            tenants: None,
            keystore: None,
            secrets: None,
            store: None,
            handlers: Vec::new(),
            logging_handler: true,
        }
    }

    pub fn with_config(mut self, config: ProfileManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_blocklist(mut self, blocklist: Arc<dyn BlocklistMonitor>) -> Self {
        self.blocklist = Some(blocklist);
        self
    }

    pub fn with_watchdog(mut self, watchdog: Arc<dyn LastResortWatchdog>) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    pub fn with_tenants(mut self, tenants: Arc<dyn TenantDirectory>) -> Self {
        self.tenants = Some(tenants);
        self
    }

    pub fn with_keystore(mut self, keystore: Arc<dyn KeyStore>) -> Self {
        self.keystore = Some(keystore);
        self
    }

    pub fn with_secret_provider(mut self, secrets: Arc<dyn SecretProvider>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn with_store(mut self, store: Box<dyn ProfileStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn disable_logging_handler(mut self) -> Self {
        self.logging_handler = false;
        self
    }

    pub fn build(self) -> Result<ProfileManager, crate::config::ConfigError> {
        self.config.validate()?;
        let config = self.config;

        let mut dispatcher = EventDispatcher::new();
        if self.logging_handler {
            dispatcher.register_handler(Arc::new(LoggingHandler));
        }
        for handler in self.handlers {
            dispatcher.register_handler(handler);
        }

        let secrets = self
            .secrets
            .unwrap_or_else(|| Arc::new(HmacSecretProvider::generate()));
        let selection =
            SelectionStateMachine::new(ReasonTable::with_overrides(&config.reason_overrides));
        let randomizer = AddressRandomizer::new(config.randomization_policy(), secrets);
        let links = LinkGraph::new(config.link_config());

        Ok(ProfileManager {
            verbose: config.verbose_logging,
            table: ProfileTable::new(),
            caches: HashMap::new(),
            selection,
            randomizer,
            links,
            dispatcher,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
            permissions: self
                .permissions
                .unwrap_or_else(|| Arc::new(StaticPermissions::default())),
            blocklist: self.blocklist.unwrap_or_else(|| Arc::new(StaticBlocklist::new())),
            watchdog: self.watchdog.unwrap_or_else(|| Arc::new(StaticWatchdog::new(false))),
            tenants: self
                .tenants
                .unwrap_or_else(|| Arc::new(StaticTenants::unlocked([0]))),
            keystore: self.keystore.unwrap_or_else(|| Arc::new(NoopKeyStore)),
            store: self.store.unwrap_or_else(|| Box::new(InMemoryStore::new())),
            next_id: 0,
            last_selected: None,
            deleted_ephemeral: HashMap::new(),
            pending_store_read: true,
            pending_unlock_store_read: false,
            deferred_unlock_read: false,
            config,
        })
    }
}

impl Default for ProfileManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner of every saved network profile.
///
/// The manager starts out waiting for its first [`load_from_store`] call;
/// mutations and writes are refused until then.
///
/// [`load_from_store`]: ProfileManager::load_from_store
pub struct ProfileManager {
    config: ProfileManagerConfig,
    table: ProfileTable,
    caches: HashMap<ProfileId, ObservationCache>,
    selection: SelectionStateMachine,
    randomizer: AddressRandomizer,
    links: LinkGraph,
    dispatcher: EventDispatcher,
    clock: Arc<dyn Clock>,
    permissions: Arc<dyn PermissionChecker>,
    blocklist: Arc<dyn BlocklistMonitor>,
    watchdog: Arc<dyn LastResortWatchdog>,
    tenants: Arc<dyn TenantDirectory>,
    keystore: Arc<dyn KeyStore>,
    store: Box<dyn ProfileStore>,
    next_id: u32,
    /// Profile the user picked explicitly, with the monotonic time of the pick.
    last_selected: Option<(ProfileId, i64)>,
    /// SSIDs of ephemeral profiles the user dismissed, with wall-clock time.
    deleted_ephemeral: HashMap<String, i64>,
    pending_store_read: bool,
    pending_unlock_store_read: bool,
    deferred_unlock_read: bool,
    verbose: bool,
}

impl ProfileManager {
    pub fn builder() -> ProfileManagerBuilder {
        ProfileManagerBuilder::new()
    }

    pub fn config(&self) -> &ProfileManagerConfig {
        &self.config
    }

    pub fn enable_verbose_logging(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.dispatcher.register_handler(handler);
    }

    pub fn current_tenant(&self) -> u32 {
        self.table.current_tenant()
    }

    pub fn len(&self) -> usize {
        self.table.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn allocate_id(&mut self) -> ProfileId {
        let id = ProfileId(self.next_id);
        self.next_id += 1;
        id
    }

    fn uid_in_current_tenant(&self, uid: u32) -> bool {
        uid_in_tenant(uid, self.table.current_tenant())
    }

    fn wall_time_string(&self) -> String {
        DateTime::<Utc>::from_timestamp_millis(self.clock.wall_ms())
            .map(|at| at.to_rfc3339())
            .unwrap_or_default()
    }

    /// Writes the current state, logging rather than returning failures.
    fn persist(&mut self, force: bool) {
        if let Err(err) = self.save_to_store(force) {
            log::error!("failed to persist profiles: {}", err);
        }
    }

    /// Follow-up of a selection transition: coarse status, notification and
    /// a lazy write. Non-transitions are ignored.
    fn finish_transition(&mut self, id: ProfileId, transition: Transition) {
        if !transition.is_state_change() {
            return;
        }
        let Some(profile) = self.table.get_mut(id) else {
            return;
        };
        match transition {
            Transition::Enabled => profile.status = ProfileStatus::Enabled,
            Transition::PermanentlyDisabled(_) => profile.status = ProfileStatus::Disabled,
            _ => {}
        }
        let profile = profile.clone();
        let event = match transition {
            Transition::Enabled => ProfileEvent::Enabled(profile),
            Transition::TemporarilyDisabled(reason) => {
                ProfileEvent::TemporarilyDisabled { profile, reason }
            }
            Transition::PermanentlyDisabled(reason) => {
                ProfileEvent::PermanentlyDisabled { profile, reason }
            }
            _ => return,
        };
        self.dispatcher.dispatch(event);
        self.persist(false);
    }

    fn masked_copy(&self, profile: &NetworkProfile, masking: Masking) -> NetworkProfile {
        let mut copy = profile.clone();
        let mask = match masking {
            Masking::Full => true,
            Masking::None => false,
            Masking::OwnerUnmasked(uid) => {
                uid != profile.creator.uid && uid != SYSTEM_UID && uid != WIFI_UID
            }
        };
        if mask {
            copy.mask_secrets();
            copy.mask_randomized_address();
        }
        if !self.randomizer.is_supported() {
            copy.randomization = RandomizationSetting::None;
        }
        copy
    }

    pub fn get(&self, id: ProfileId, masking: Masking) -> Option<NetworkProfile> {
        let found = self.table.get(id).map(|p| self.masked_copy(p, masking));
        if found.is_none() && self.verbose {
            log::debug!("no profile with id {}", id);
        }
        found
    }

    pub fn get_by_key(&self, key: &ProfileKey, masking: Masking) -> Option<NetworkProfile> {
        self.table.get_by_key(key).map(|p| self.masked_copy(p, masking))
    }

    /// Every visible profile; `saved_only` leaves out ephemeral and
    /// provider-managed ones.
    pub fn list(&self, saved_only: bool, masking: Masking) -> Vec<NetworkProfile> {
        self.table
            .iter()
            .filter(|p| !saved_only || p.is_saved())
            .map(|p| self.masked_copy(p, masking))
            .collect()
    }

    /// Feeds one disable reason (or the enable code) into the profile's
    /// selection state.
    ///
    /// Returns `false` for unknown profiles and for updates dropped while
    /// the last-resort watchdog is raised.
    pub fn update_selection_status(&mut self, id: ProfileId, reason: DisableReason) -> bool {
        let ignore = reason.is_watchdog_gated() && self.watchdog.should_ignore_ssid_update();
        let now = self.clock.elapsed_ms();
        let Some(profile) = self.table.get_mut(id) else {
            log::debug!("selection update for unknown profile {}", id);
            return false;
        };
        let transition = self.selection.apply(&mut profile.selection, reason, now, ignore);
        if self.verbose {
            log::debug!("{} on {}: {:?}", reason, profile.key(), transition);
        }
        if !transition.is_accepted() {
            log::debug!("ignoring {} for {} while watchdog is raised", reason, profile.key());
            return false;
        }
        self.finish_transition(id, transition);
        true
    }

    /// Same as [`update_selection_status`](Self::update_selection_status),
    /// taking a raw reason code. Unknown codes change nothing.
    pub fn update_selection_status_code(&mut self, id: ProfileId, code: i32) -> bool {
        match DisableReason::from_code(code) {
            Some(reason) => self.update_selection_status(id, reason),
            None => {
                log::error!("invalid disable reason code {}", code);
                false
            }
        }
    }

    /// Re-enables a temporarily disabled profile once its backoff has
    /// elapsed. Returns whether the profile came back.
    pub fn try_enable(&mut self, id: ProfileId) -> bool {
        let now = self.clock.elapsed_ms();
        let Some(profile) = self.table.get_mut(id) else {
            return false;
        };
        let blocked = self
            .blocklist
            .blocked_count(&profile.ssid)
            .min(self.config.max_blocked_per_network);
        let transition = self.selection.try_enable(&mut profile.selection, now, blocked);
        let enabled = transition == Transition::Enabled;
        self.finish_transition(id, transition);
        enabled
    }

    /// Re-evaluates every temporarily disabled profile.
    pub fn try_enable_all(&mut self) -> Vec<ProfileId> {
        let candidates: Vec<ProfileId> = self
            .table
            .iter()
            .filter(|p| p.selection.is_temporarily_disabled())
            .map(|p| p.id)
            .collect();
        candidates.into_iter().filter(|id| self.try_enable(*id)).collect()
    }

    pub fn record_connected(&mut self, id: ProfileId) -> bool {
        let now = self.clock.wall_ms();
        let Some(profile) = self.table.get_mut(id) else {
            return false;
        };
        profile.stats.last_connected_ms = now;
        profile.stats.num_association += 1;
        profile.selection.clear_counters();
        profile.selection.has_ever_connected = true;
        profile.status = ProfileStatus::Current;
        self.persist(false);
        true
    }

    pub fn record_disconnected(&mut self, id: ProfileId) -> bool {
        let now = self.clock.wall_ms();
        let Some(profile) = self.table.get_mut(id) else {
            return false;
        };
        profile.stats.last_disconnected_ms = now;
        extend_after_disconnect(&mut profile.randomized, now);
        if profile.status == ProfileStatus::Current {
            profile.status = ProfileStatus::Enabled;
        }
        self.persist(false);
        true
    }

    pub fn last_selected(&self) -> Option<ProfileId> {
        self.last_selected.map(|(id, _)| id)
    }

    pub fn last_selected_key(&self) -> Option<ProfileKey> {
        self.last_selected
            .and_then(|(id, _)| self.table.get(id))
            .map(NetworkProfile::key)
    }

    pub fn last_selected_time_ms(&self) -> Option<i64> {
        self.last_selected.map(|(_, at)| at)
    }

    /// Applies `f` to a visible profile and writes lazily if it was found.
    fn mutate<F>(&mut self, id: ProfileId, f: F) -> bool
    where
        F: FnOnce(&mut NetworkProfile),
    {
        let Some(profile) = self.table.get_mut(id) else {
            log::debug!("no profile with id {}", id);
            return false;
        };
        f(profile);
        self.persist(false);
        true
    }

    /// Records that the user prefers `choice` over profile `id`.
    pub fn set_connect_choice(&mut self, id: ProfileId, choice: ProfileKey, timestamp_ms: i64) -> bool {
        self.mutate(id, |p| {
            p.selection.connect_choice = Some(ConnectChoice {
                key: choice,
                timestamp_ms,
            })
        })
    }

    pub fn clear_connect_choice(&mut self, id: ProfileId) -> bool {
        self.mutate(id, |p| p.selection.connect_choice = None)
    }

    /// Marks the profile as seen in the current selection round.
    pub fn set_candidate(&mut self, id: ProfileId, observation: Observation, score: i32) -> bool {
        let Some(profile) = self.table.get_mut(id) else {
            return false;
        };
        profile.selection.set_candidate(observation, score);
        true
    }

    pub fn clear_candidate(&mut self, id: ProfileId) -> bool {
        let Some(profile) = self.table.get_mut(id) else {
            return false;
        };
        profile.selection.clear_candidate();
        true
    }

    pub fn increment_no_internet_reports(&mut self, id: ProfileId) -> bool {
        self.mutate(id, |p| {
            p.stats.num_no_internet_access_reports =
                p.stats.num_no_internet_access_reports.saturating_add(1)
        })
    }

    /// Stores the validation result; a validated connection also resets the
    /// no-internet report count.
    pub fn set_validated_internet_access(&mut self, id: ProfileId, validated: bool) -> bool {
        self.mutate(id, |p| {
            p.stats.validated_internet_access = validated;
            if validated {
                p.stats.num_no_internet_access_reports = 0;
            }
        })
    }

    pub fn set_no_internet_access_expected(&mut self, id: ProfileId, expected: bool) -> bool {
        self.mutate(id, |p| p.no_internet_access_expected = expected)
    }

    pub fn allow_autojoin(&mut self, id: ProfileId, allow: bool) -> bool {
        self.mutate(id, |p| p.allow_autojoin = allow)
    }

    pub fn update_last_connect_uid(&mut self, id: ProfileId, uid: u32) -> bool {
        if !self.uid_in_current_tenant(uid) {
            log::error!("uid {} outside the current tenant cannot connect {}", uid, id);
            return false;
        }
        self.mutate(id, |p| p.stats.last_connect_uid = Some(uid))
    }

    /// Records the most recent association failure code. Not persisted.
    pub fn set_recent_failure(&mut self, id: ProfileId, code: u16) -> bool {
        let Some(profile) = self.table.get_mut(id) else {
            return false;
        };
        profile.recent_failure = Some(code);
        true
    }

    pub fn clear_recent_failure(&mut self, id: ProfileId) -> bool {
        let Some(profile) = self.table.get_mut(id) else {
            return false;
        };
        profile.recent_failure = None;
        true
    }

    /// Stores the gateway hardware address learned on connection.
    pub fn set_default_gateway(&mut self, id: ProfileId, gateway: &str) -> bool {
        let gateway = gateway.to_ascii_lowercase();
        self.mutate(id, |p| p.default_gateway = Some(gateway))
    }

    /// Human-readable snapshot of the manager state.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "tenant {} | {} visible profiles | pending read: {} | last selected: {:?}",
            self.table.current_tenant(),
            self.len(),
            self.pending_store_read,
            self.last_selected()
        );
        for profile in self.table.iter() {
            let mut copy = profile.clone();
            copy.mask_secrets();
            let _ = writeln!(
                out,
                "  [{}] {} status={:?} selection={:?}/{} assoc={} linked={} cached={}",
                copy.id,
                copy.key(),
                copy.status,
                copy.selection.state(),
                copy.selection.reason(),
                copy.stats.num_association,
                copy.linked.len(),
                self.caches.get(&copy.id).map_or(0, ObservationCache::len)
            );
        }
        let mut deleted: Vec<_> = self.deleted_ephemeral.iter().collect();
        deleted.sort();
        for (ssid, at) in deleted {
            let _ = writeln!(out, "  deleted ephemeral {:?} at {}", ssid, at);
        }
        out
    }
}
