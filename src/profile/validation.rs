//! Input validation for profile add/update requests.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use super::{IpAssignment, PASSWORD_MASK, ProfileInput, ProxySettings, SecurityType};

const SSID_MAX_BYTES: usize = 32;
const PSK_ASCII_MIN: usize = 8;
const PSK_ASCII_MAX: usize = 63;

static HEX_PSK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Fa-f]{64}$").expect("invalid hex psk regex"));
static HEX_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Fa-f]+$").expect("invalid hex key regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Add,
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing SSID")]
    MissingSsid,

    #[error("SSID must be 1 to {SSID_MAX_BYTES} bytes, got {0}")]
    SsidLength(usize),

    #[error("missing security type")]
    MissingSecurity,

    #[error("pre-shared key is required for this security type")]
    MissingPreSharedKey,

    #[error("malformed pre-shared key")]
    InvalidPreSharedKey,

    #[error("malformed WEP key at index {0}")]
    InvalidWepKey(usize),

    #[error("WEP transmit key index {0} out of range")]
    InvalidWepKeyIndex(u8),

    #[error("enterprise security requires an EAP configuration")]
    MissingEnterpriseConfig,

    #[error("EAP configuration supplied for non-enterprise security")]
    UnexpectedEnterpriseConfig,

    #[error("static IP assignment requires a static configuration")]
    MissingStaticIpConfig,

    #[error("invalid proxy settings: {0}")]
    InvalidProxy(&'static str),

    #[error("malformed BSSID {0:?}")]
    InvalidBssid(String),
}

/// Checks required fields and legal combinations of a caller-supplied input.
pub fn validate_input(input: &ProfileInput, mode: ValidationMode) -> Result<(), ValidationError> {
    match (&input.ssid, mode) {
        (Some(ssid), _) => {
            if ssid.is_empty() || ssid.len() > SSID_MAX_BYTES {
                return Err(ValidationError::SsidLength(ssid.len()));
            }
        }
        (None, ValidationMode::Add) => return Err(ValidationError::MissingSsid),
        (None, ValidationMode::Update) => {}
    }

    if mode == ValidationMode::Add && input.security.is_none() {
        return Err(ValidationError::MissingSecurity);
    }

    if let Some(bssid) = &input.bssid
        && bssid.parse::<super::MacAddress>().is_err()
    {
        return Err(ValidationError::InvalidBssid(bssid.clone()));
    }

    if let Some(psk) = &input.pre_shared_key {
        validate_psk(psk, mode)?;
    } else if mode == ValidationMode::Add
        && matches!(input.security, Some(SecurityType::Psk | SecurityType::Sae))
    {
        return Err(ValidationError::MissingPreSharedKey);
    }

    if let Some(keys) = &input.wep_keys {
        for (index, key) in keys.iter().enumerate() {
            if let Some(key) = key {
                validate_wep_key(key, mode).map_err(|_| ValidationError::InvalidWepKey(index))?;
            }
        }
        if input.wep_tx_key_index as usize >= keys.len() {
            return Err(ValidationError::InvalidWepKeyIndex(input.wep_tx_key_index));
        }
    }

    match (input.security, &input.enterprise) {
        (Some(SecurityType::Eap), None) if mode == ValidationMode::Add => {
            return Err(ValidationError::MissingEnterpriseConfig);
        }
        (Some(security), Some(_)) if security != SecurityType::Eap => {
            return Err(ValidationError::UnexpectedEnterpriseConfig);
        }
        _ => {}
    }

    if input.ip.assignment == IpAssignment::Static && input.ip.static_config.is_none() {
        return Err(ValidationError::MissingStaticIpConfig);
    }

    match &input.ip.proxy {
        ProxySettings::Static { host, port, .. } => {
            if host.trim().is_empty() {
                return Err(ValidationError::InvalidProxy("empty proxy host"));
            }
            if *port == 0 {
                return Err(ValidationError::InvalidProxy("proxy port must be non-zero"));
            }
        }
        ProxySettings::Pac { url } if url.trim().is_empty() => {
            return Err(ValidationError::InvalidProxy("empty PAC url"));
        }
        _ => {}
    }

    Ok(())
}

fn validate_psk(psk: &str, mode: ValidationMode) -> Result<(), ValidationError> {
    if psk == PASSWORD_MASK {
        return match mode {
            ValidationMode::Update => Ok(()),
            ValidationMode::Add => Err(ValidationError::InvalidPreSharedKey),
        };
    }
    if HEX_PSK.is_match(psk) {
        return Ok(());
    }
    let ascii_ok = psk.is_ascii() && (PSK_ASCII_MIN..=PSK_ASCII_MAX).contains(&psk.len());
    if ascii_ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidPreSharedKey)
    }
}

fn validate_wep_key(key: &str, mode: ValidationMode) -> Result<(), ()> {
    if key == PASSWORD_MASK {
        return if mode == ValidationMode::Update { Ok(()) } else { Err(()) };
    }
    let ascii_len = matches!(key.len(), 5 | 13 | 16) && key.is_ascii();
    let hex_len = matches!(key.len(), 10 | 26 | 32) && HEX_CHARS.is_match(key);
    if ascii_len || hex_len { Ok(()) } else { Err(()) }
}
