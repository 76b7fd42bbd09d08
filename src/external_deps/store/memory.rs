use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ProfileStore, StoreData, StoreError, TenantData};
use crate::profile::NetworkProfile;

#[derive(Debug, Default)]
struct State {
    shared: Vec<String>,
    tenants: HashMap<u32, (Vec<String>, HashMap<String, i64>)>,
    address_map: HashMap<String, String>,
    writes: usize,
    forced_writes: usize,
    fail_next_read: bool,
}

/// Store that keeps JSON-encoded records in memory.
///
/// Clones share the same contents, so a test can hand one clone to the
/// manager and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

fn encode(profiles: &[NetworkProfile]) -> Result<Vec<String>, StoreError> {
    profiles
        .iter()
        .map(|p| serde_json::to_string(p).map_err(StoreError::from))
        .collect()
}

fn decode(records: &[String]) -> Result<Vec<NetworkProfile>, StoreError> {
    records
        .iter()
        .map(|raw| serde_json::from_str(raw).map_err(StoreError::from))
        .collect()
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store poisoned".into()))
    }

    /// Number of writes received, forced or not.
    pub fn write_count(&self) -> usize {
        self.lock().map(|s| s.writes).unwrap_or(0)
    }

    pub fn forced_write_count(&self) -> usize {
        self.lock().map(|s| s.forced_writes).unwrap_or(0)
    }

    /// Makes the next read fail with a corrupt-record error.
    pub fn fail_next_read(&self) {
        if let Ok(mut state) = self.lock() {
            state.fail_next_read = true;
        }
    }

    /// Current contents, decoded.
    pub fn snapshot(&self, tenant: u32) -> Result<StoreData, StoreError> {
        let state = self.lock()?;
        let (private, deleted) = state.tenants.get(&tenant).cloned().unwrap_or_default();
        Ok(StoreData {
            shared: decode(&state.shared)?,
            tenant: TenantData {
                profiles: decode(&private)?,
                deleted_ephemeral: deleted,
            },
            address_map: state.address_map.clone(),
        })
    }

    fn check_read(&self) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if std::mem::take(&mut state.fail_next_read) {
            return Err(StoreError::Corrupt {
                key: "<store>".into(),
                reason: "injected read failure".into(),
            });
        }
        Ok(())
    }
}

impl ProfileStore for InMemoryStore {
    fn read(&mut self, tenant: u32) -> Result<StoreData, StoreError> {
        self.check_read()?;
        self.snapshot(tenant)
    }

    fn read_tenant(&mut self, tenant: u32) -> Result<TenantData, StoreError> {
        self.check_read()?;
        Ok(self.snapshot(tenant)?.tenant)
    }

    fn write(&mut self, tenant: Option<u32>, data: &StoreData, force: bool) -> Result<(), StoreError> {
        let shared = encode(&data.shared)?;
        let private = encode(&data.tenant.profiles)?;
        let mut state = self.lock()?;
        state.shared = shared;
        if let Some(tenant) = tenant {
            state
                .tenants
                .insert(tenant, (private, data.tenant.deleted_ephemeral.clone()));
        }
        state.address_map = data.address_map.clone();
        state.writes += 1;
        if force {
            state.forced_writes += 1;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::SecurityType;

    #[test]
    fn clones_share_contents() {
        let store = InMemoryStore::new();
        let mut handle = store.clone();
        let data = StoreData {
            shared: vec![NetworkProfile::new("Home", SecurityType::Open)],
            ..Default::default()
        };
        handle.write(Some(0), &data, true).unwrap();
        assert_eq!(store.snapshot(0).unwrap().shared[0].ssid, "Home");
        assert_eq!(store.forced_write_count(), 1);
    }

    #[test]
    fn locked_tenant_section_is_left_alone() {
        let mut store = InMemoryStore::new();
        let mut data = StoreData::default();
        data.tenant.profiles.push(NetworkProfile::new("Private", SecurityType::Psk));
        store.write(Some(0), &data, true).unwrap();
        store.write(None, &StoreData::default(), true).unwrap();
        assert_eq!(store.snapshot(0).unwrap().tenant.profiles.len(), 1);
    }

    #[test]
    fn injected_read_failure_fires_once() {
        let mut store = InMemoryStore::new();
        store.fail_next_read();
        assert!(matches!(store.read(0), Err(StoreError::Corrupt { .. })));
        assert!(store.read(0).is_ok());
    }
}
