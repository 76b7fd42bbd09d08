//! Network profile data model.
//!
//! A [`NetworkProfile`] is the persisted record for one saved network. The
//! manager owns every profile; callers only ever see clones.

pub mod mac;
pub mod table;
pub mod validation;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::modules::randomization::RandomizedAddressState;
use crate::modules::selection::SelectionStatus;

pub use mac::{MacAddress, MacParseError};
pub use table::{ProfileTable, TableError};
pub use validation::{ValidationError, ValidationMode, validate_input};

/// Placeholder that replaces secrets in masked copies.
pub const PASSWORD_MASK: &str = "*";

/// Privileged system identity.
pub const SYSTEM_UID: u32 = 1000;
/// Identity of the connectivity service itself.
pub const WIFI_UID: u32 = 1010;
/// Size of the uid range reserved for each tenant.
pub const PER_TENANT_RANGE: u32 = 100_000;

/// Tenant that owns a given uid.
pub fn tenant_of(uid: u32) -> u32 {
    uid / PER_TENANT_RANGE
}

/// Whether `uid` acts within `tenant`. The system identity belongs to every
/// tenant.
pub fn uid_in_tenant(uid: u32, tenant: u32) -> bool {
    uid == SYSTEM_UID || tenant_of(uid) == tenant
}

/// Transient, process-lifetime identifier of a profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(pub u32);

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a profile, derived from SSID and security type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileKey(String);

impl ProfileKey {
    pub fn new(ssid: &str, security: SecurityType) -> Self {
        Self(format!("\"{ssid}\"{}", security.as_key_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProfileKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SecurityType {
    Open,
    Wep,
    Psk,
    Sae,
    Owe,
    Eap,
}

impl SecurityType {
    pub fn as_key_str(self) -> &'static str {
        match self {
            SecurityType::Open => "NONE",
            SecurityType::Wep => "WEP",
            SecurityType::Psk => "WPA_PSK",
            SecurityType::Sae => "SAE",
            SecurityType::Owe => "OWE",
            SecurityType::Eap => "WPA_EAP",
        }
    }

    /// Pre-shared-key family; the only family eligible for linking.
    pub fn is_pre_shared_key(self) -> bool {
        matches!(self, SecurityType::Psk)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IpAssignment {
    #[default]
    Unassigned,
    Dhcp,
    Static,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StaticIpConfig {
    pub address: String,
    pub prefix_length: u8,
    pub gateway: Option<String>,
    pub dns_servers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProxySettings {
    #[default]
    Unassigned,
    None,
    Static {
        host: String,
        port: u16,
        exclusions: Vec<String>,
    },
    Pac {
        url: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IpConfiguration {
    pub assignment: IpAssignment,
    pub static_config: Option<StaticIpConfig>,
    pub proxy: ProxySettings,
}

impl IpConfiguration {
    /// Configuration given to freshly created profiles.
    pub fn dhcp() -> Self {
        Self {
            assignment: IpAssignment::Dhcp,
            static_config: None,
            proxy: ProxySettings::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EapMethod {
    Peap,
    Tls,
    Ttls,
    Pwd,
    Sim,
    Aka,
    AkaPrime,
}

impl EapMethod {
    pub fn is_sim_based(self) -> bool {
        matches!(self, EapMethod::Sim | EapMethod::Aka | EapMethod::AkaPrime)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnterpriseConfig {
    pub method: EapMethod,
    pub identity: String,
    pub anonymous_identity: String,
    pub password: Option<String>,
    pub ca_certificate_alias: Option<String>,
    pub client_certificate_alias: Option<String>,
}

impl EnterpriseConfig {
    pub fn new(method: EapMethod) -> Self {
        Self {
            method,
            identity: String::new(),
            anonymous_identity: String::new(),
            password: None,
            ca_certificate_alias: None,
            client_certificate_alias: None,
        }
    }

    pub fn is_sim_based(&self) -> bool {
        self.method.is_sim_based()
    }

    /// Copies caller-supplied fields, keeping the stored password when the
    /// caller sent back the mask.
    fn merge_from(&mut self, external: &EnterpriseConfig) {
        self.method = external.method;
        self.identity = external.identity.clone();
        self.anonymous_identity = external.anonymous_identity.clone();
        if let Some(password) = &external.password
            && password != PASSWORD_MASK
        {
            self.password = Some(password.clone());
        }
        if external.ca_certificate_alias.is_some() {
            self.ca_certificate_alias = external.ca_certificate_alias.clone();
        }
        if external.client_certificate_alias.is_some() {
            self.client_certificate_alias = external.client_certificate_alias.clone();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MeteredOverride {
    #[default]
    None,
    Metered,
    NotMetered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RandomizationSetting {
    None,
    #[default]
    Persistent,
}

/// Coarse connection status, independent of the selection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProfileStatus {
    Current,
    Enabled,
    #[default]
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Owner {
    pub uid: u32,
    pub package: String,
}

impl Owner {
    pub fn new(uid: u32, package: impl Into<String>) -> Self {
        Self {
            uid,
            package: package.into(),
        }
    }

    /// Package name with any `:uid` shared-identity suffix removed.
    pub fn package_name(&self) -> &str {
        match self.package.split_once(':') {
            Some((name, _)) => name,
            None => &self.package,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub num_association: u64,
    pub last_connected_ms: i64,
    pub last_disconnected_ms: i64,
    pub last_connect_uid: Option<u32>,
    pub num_no_internet_access_reports: u32,
    pub validated_internet_access: bool,
}

/// Persisted record for one saved network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkProfile {
    #[serde(skip)]
    pub id: ProfileId,
    pub ssid: String,
    pub bssid: Option<String>,
    pub security: SecurityType,
    pub pre_shared_key: Option<String>,
    pub wep_keys: [Option<String>; 4],
    pub wep_tx_key_index: u8,
    pub enterprise: Option<EnterpriseConfig>,
    pub hidden: bool,
    pub require_pmf: bool,
    pub fqdn: Option<String>,
    pub provider_friendly_name: Option<String>,
    pub ip: IpConfiguration,
    pub metered_hint: bool,
    pub metered_override: MeteredOverride,
    pub randomization: RandomizationSetting,
    pub creator: Owner,
    pub last_updater: Owner,
    pub creation_time: String,
    pub update_time: String,
    pub ephemeral: bool,
    pub shared: bool,
    pub trusted: bool,
    pub from_suggestion: bool,
    pub from_specifier: bool,
    pub passpoint: bool,
    pub allow_autojoin: bool,
    pub no_internet_access_expected: bool,
    pub default_gateway: Option<String>,
    #[serde(skip)]
    pub recent_failure: Option<u16>,
    pub status: ProfileStatus,
    pub stats: ConnectionStats,
    pub selection: SelectionStatus,
    pub randomized: RandomizedAddressState,
    pub linked: BTreeSet<ProfileKey>,
}

impl NetworkProfile {
    /// Blank profile with the defaults every new record starts from.
    pub fn new(ssid: impl Into<String>, security: SecurityType) -> Self {
        Self {
            id: ProfileId::default(),
            ssid: ssid.into(),
            bssid: None,
            security,
            pre_shared_key: None,
            wep_keys: Default::default(),
            wep_tx_key_index: 0,
            enterprise: None,
            hidden: false,
            require_pmf: false,
            fqdn: None,
            provider_friendly_name: None,
            ip: IpConfiguration::dhcp(),
            metered_hint: false,
            metered_override: MeteredOverride::None,
            randomization: RandomizationSetting::Persistent,
            creator: Owner::default(),
            last_updater: Owner::default(),
            creation_time: String::new(),
            update_time: String::new(),
            ephemeral: false,
            shared: true,
            trusted: true,
            from_suggestion: false,
            from_specifier: false,
            passpoint: false,
            allow_autojoin: true,
            no_internet_access_expected: false,
            default_gateway: None,
            recent_failure: None,
            status: ProfileStatus::Disabled,
            stats: ConnectionStats::default(),
            selection: SelectionStatus::default(),
            randomized: RandomizedAddressState::default(),
            linked: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> ProfileKey {
        ProfileKey::new(&self.ssid, self.security)
    }

    /// Ephemeral and provider-managed profiles are never persisted.
    pub fn is_saved(&self) -> bool {
        !self.ephemeral && !self.passpoint
    }

    pub fn uses_sim_credentials(&self) -> bool {
        self.enterprise.as_ref().is_some_and(EnterpriseConfig::is_sim_based)
    }

    pub fn mask_secrets(&mut self) {
        if self.pre_shared_key.as_deref().is_some_and(|psk| !psk.is_empty()) {
            self.pre_shared_key = Some(PASSWORD_MASK.to_string());
        }
        for key in self.wep_keys.iter_mut() {
            if key.as_deref().is_some_and(|k| !k.is_empty()) {
                *key = Some(PASSWORD_MASK.to_string());
            }
        }
        if let Some(enterprise) = self.enterprise.as_mut()
            && enterprise.password.as_deref().is_some_and(|p| !p.is_empty())
        {
            enterprise.password = Some(PASSWORD_MASK.to_string());
        }
    }

    pub fn mask_randomized_address(&mut self) {
        self.randomized.address = MacAddress::SENTINEL;
    }

    /// Applies the caller-supplied fields of `input`, leaving everything the
    /// caller did not supply untouched.
    pub(crate) fn merge_input(&mut self, input: &ProfileInput) {
        if let Some(ssid) = &input.ssid {
            self.ssid = ssid.clone();
        }
        if let Some(bssid) = &input.bssid {
            self.bssid = Some(bssid.to_ascii_lowercase());
        }
        if let Some(security) = input.security {
            self.security = security;
        }
        self.hidden = input.hidden;
        self.require_pmf = input.require_pmf;

        if let Some(psk) = &input.pre_shared_key
            && psk != PASSWORD_MASK
        {
            self.pre_shared_key = Some(psk.clone());
        }
        if let Some(keys) = &input.wep_keys {
            let mut has_wep_key = false;
            for (slot, key) in self.wep_keys.iter_mut().zip(keys.iter()) {
                if let Some(key) = key
                    && key != PASSWORD_MASK
                {
                    *slot = Some(key.clone());
                    has_wep_key = true;
                }
            }
            if has_wep_key {
                self.wep_tx_key_index = input.wep_tx_key_index;
            }
        }
        if input.fqdn.is_some() {
            self.fqdn = input.fqdn.clone();
        }
        if input.provider_friendly_name.is_some() {
            self.provider_friendly_name = input.provider_friendly_name.clone();
        }

        if input.ip.assignment != IpAssignment::Unassigned {
            self.ip.assignment = input.ip.assignment;
            if input.ip.assignment == IpAssignment::Static {
                self.ip.static_config = input.ip.static_config.clone();
            }
        }
        if input.ip.proxy != ProxySettings::Unassigned {
            self.ip.proxy = input.ip.proxy.clone();
        }

        if let Some(external) = &input.enterprise {
            match self.enterprise.as_mut() {
                Some(internal) => internal.merge_from(external),
                None => {
                    let mut fresh = EnterpriseConfig::new(external.method);
                    fresh.merge_from(external);
                    self.enterprise = Some(fresh);
                }
            }
        }

        self.metered_hint = input.metered_hint;
        self.metered_override = input.metered_override;
        self.randomization = input.randomization;
    }

    pub(crate) fn has_ip_changed(&self, other: &NetworkProfile) -> bool {
        self.ip.assignment != other.ip.assignment || self.ip.static_config != other.ip.static_config
    }

    pub(crate) fn has_proxy_changed(&self, other: &NetworkProfile) -> bool {
        self.ip.proxy != other.ip.proxy
    }

    pub(crate) fn has_credential_changed(&self, other: &NetworkProfile) -> bool {
        self.security != other.security
            || self.pre_shared_key != other.pre_shared_key
            || self.wep_keys != other.wep_keys
            || self.wep_tx_key_index != other.wep_tx_key_index
            || self.enterprise != other.enterprise
    }
}

/// Caller-supplied description of a profile to add or update.
///
/// `None` means "not supplied": on update the stored value is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileInput {
    pub id: Option<ProfileId>,
    pub ssid: Option<String>,
    pub bssid: Option<String>,
    pub security: Option<SecurityType>,
    pub pre_shared_key: Option<String>,
    pub wep_keys: Option<[Option<String>; 4]>,
    pub wep_tx_key_index: u8,
    pub enterprise: Option<EnterpriseConfig>,
    pub hidden: bool,
    pub require_pmf: bool,
    pub fqdn: Option<String>,
    pub provider_friendly_name: Option<String>,
    pub ip: IpConfiguration,
    pub metered_hint: bool,
    pub metered_override: MeteredOverride,
    pub randomization: RandomizationSetting,
    // Only honoured when the profile is created.
    pub ephemeral: bool,
    pub shared: bool,
    pub trusted: bool,
    pub from_suggestion: bool,
    pub from_specifier: bool,
    pub passpoint: bool,
    pub no_internet_access_expected: bool,
}

impl Default for ProfileInput {
    fn default() -> Self {
        Self {
            id: None,
            ssid: None,
            bssid: None,
            security: None,
            pre_shared_key: None,
            wep_keys: None,
            wep_tx_key_index: 0,
            enterprise: None,
            hidden: false,
            require_pmf: false,
            fqdn: None,
            provider_friendly_name: None,
            ip: IpConfiguration::default(),
            metered_hint: false,
            metered_override: MeteredOverride::None,
            randomization: RandomizationSetting::Persistent,
            ephemeral: false,
            shared: true,
            trusted: true,
            from_suggestion: false,
            from_specifier: false,
            passpoint: false,
            no_internet_access_expected: false,
        }
    }
}

impl ProfileInput {
    pub fn new(ssid: impl Into<String>, security: SecurityType) -> Self {
        Self {
            ssid: Some(ssid.into()),
            security: Some(security),
            ..Default::default()
        }
    }

    pub fn psk(ssid: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            pre_shared_key: Some(passphrase.into()),
            ..Self::new(ssid, SecurityType::Psk)
        }
    }

    pub fn open(ssid: impl Into<String>) -> Self {
        Self::new(ssid, SecurityType::Open)
    }

    pub fn with_id(mut self, id: ProfileId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Key this input refers to, when it names both SSID and security.
    pub fn key(&self) -> Option<ProfileKey> {
        match (&self.ssid, self.security) {
            (Some(ssid), Some(security)) => Some(ProfileKey::new(ssid, security)),
            _ => None,
        }
    }
}

/// Outcome of a successful add or update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateResult {
    pub id: ProfileId,
    pub is_new: bool,
    pub ip_changed: bool,
    pub proxy_changed: bool,
    pub credential_changed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_combines_ssid_and_security() {
        assert_eq!(ProfileKey::new("Home", SecurityType::Psk).as_str(), "\"Home\"WPA_PSK");
        assert_ne!(
            ProfileKey::new("Home", SecurityType::Psk),
            ProfileKey::new("Home", SecurityType::Open)
        );
    }

    #[test]
    fn merge_keeps_secret_when_mask_supplied() {
        let mut profile = NetworkProfile::new("Home", SecurityType::Psk);
        profile.pre_shared_key = Some("pw1".into());
        let mut input = ProfileInput::psk("Home", PASSWORD_MASK);
        input.hidden = true;
        profile.merge_input(&input);
        assert_eq!(profile.pre_shared_key.as_deref(), Some("pw1"));
        assert!(profile.hidden);
    }

    #[test]
    fn merge_ignores_unassigned_ip_settings() {
        let mut profile = NetworkProfile::new("Home", SecurityType::Open);
        let before = profile.ip.clone();
        profile.merge_input(&ProfileInput::open("Home"));
        assert_eq!(profile.ip, before);
    }

    #[test]
    fn masking_replaces_every_secret() {
        let mut profile = NetworkProfile::new("Lab", SecurityType::Wep);
        profile.wep_keys[0] = Some("abcde".into());
        profile.enterprise = Some(EnterpriseConfig {
            password: Some("secret".into()),
            ..EnterpriseConfig::new(EapMethod::Peap)
        });
        profile.mask_secrets();
        assert_eq!(profile.wep_keys[0].as_deref(), Some(PASSWORD_MASK));
        assert_eq!(profile.wep_keys[1], None);
        assert_eq!(
            profile.enterprise.unwrap().password.as_deref(),
            Some(PASSWORD_MASK)
        );
    }

    #[test]
    fn owner_package_strips_shared_uid_suffix() {
        assert_eq!(Owner::new(10_001, "com.example:10001").package_name(), "com.example");
        assert_eq!(Owner::new(10_001, "com.example").package_name(), "com.example");
    }
}
