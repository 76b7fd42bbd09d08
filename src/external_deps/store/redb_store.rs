use redb::{Database, ReadableTable, Table, TableDefinition};
use std::collections::HashMap;
use std::path::Path;

use super::{ProfileStore, StoreData, StoreError, TenantData};
use crate::profile::NetworkProfile;

const SHARED_PROFILES: TableDefinition<&str, &str> = TableDefinition::new("shared_profiles");
const TENANT_PROFILES: TableDefinition<&str, &str> = TableDefinition::new("tenant_profiles");
const DELETED_EPHEMERAL: TableDefinition<&str, i64> = TableDefinition::new("deleted_ephemeral");
const RANDOMIZED_ADDRESSES: TableDefinition<&str, &str> = TableDefinition::new("randomized_addresses");

fn db_err<E: Into<redb::Error>>(err: E) -> StoreError {
    StoreError::Database(err.into())
}

fn tenant_prefix(tenant: u32) -> String {
    format!("{tenant}/")
}

fn decode_profile(key: &str, raw: &str) -> Result<NetworkProfile, StoreError> {
    serde_json::from_str(raw).map_err(|err| StoreError::Corrupt {
        key: key.to_string(),
        reason: err.to_string(),
    })
}

fn clear_prefix<V: redb::Value + 'static>(
    table: &mut Table<'_, &'static str, V>,
    prefix: &str,
) -> Result<(), StoreError> {
    let mut doomed = Vec::new();
    for entry in table.iter().map_err(db_err)? {
        let (key, _) = entry.map_err(db_err)?;
        if key.value().starts_with(prefix) {
            doomed.push(key.value().to_string());
        }
    }
    for key in doomed {
        table.remove(key.as_str()).map_err(db_err)?;
    }
    Ok(())
}

/// Profile store backed by a `redb` database file, one JSON document per
/// profile.
///
/// Writes that are not forced are held in memory and committed together
/// with the next forced write, an explicit flush, or on drop.
pub struct RedbProfileStore {
    db: Database,
    pending: Option<(Option<u32>, StoreData)>,
}

impl RedbProfileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(db_err)?;
        let txn = db.begin_write().map_err(db_err)?;
        {
            txn.open_table(SHARED_PROFILES).map_err(db_err)?;
            txn.open_table(TENANT_PROFILES).map_err(db_err)?;
            txn.open_table(DELETED_EPHEMERAL).map_err(db_err)?;
            txn.open_table(RANDOMIZED_ADDRESSES).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;
        log::debug!("opened profile store at {}", path.as_ref().display());
        Ok(Self { db, pending: None })
    }

    /// Whether a non-forced write is waiting to be committed.
    pub fn has_pending_write(&self) -> bool {
        self.pending.is_some()
    }

    fn commit(&self, tenant: Option<u32>, data: &StoreData) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut shared = txn.open_table(SHARED_PROFILES).map_err(db_err)?;
            clear_prefix(&mut shared, "")?;
            for profile in &data.shared {
                let encoded = serde_json::to_string(profile)?;
                shared
                    .insert(profile.key().as_str(), encoded.as_str())
                    .map_err(db_err)?;
            }

            if let Some(tenant) = tenant {
                let prefix = tenant_prefix(tenant);
                let mut private = txn.open_table(TENANT_PROFILES).map_err(db_err)?;
                clear_prefix(&mut private, &prefix)?;
                for profile in &data.tenant.profiles {
                    let encoded = serde_json::to_string(profile)?;
                    let key = format!("{prefix}{}", profile.key());
                    private.insert(key.as_str(), encoded.as_str()).map_err(db_err)?;
                }

                let mut deleted = txn.open_table(DELETED_EPHEMERAL).map_err(db_err)?;
                clear_prefix(&mut deleted, &prefix)?;
                for (ssid, at) in &data.tenant.deleted_ephemeral {
                    let key = format!("{prefix}{ssid}");
                    deleted.insert(key.as_str(), *at).map_err(db_err)?;
                }
            }

            let mut addresses = txn.open_table(RANDOMIZED_ADDRESSES).map_err(db_err)?;
            clear_prefix(&mut addresses, "")?;
            for (key, address) in &data.address_map {
                addresses
                    .insert(key.as_str(), address.as_str())
                    .map_err(db_err)?;
            }
        }
        txn.commit().map_err(db_err)?;
        match tenant {
            Some(tenant) => log::debug!(
                "committed {} shared and {} private profiles for tenant {}",
                data.shared.len(),
                data.tenant.profiles.len(),
                tenant
            ),
            None => log::debug!("committed {} shared profiles", data.shared.len()),
        }
        Ok(())
    }

    fn read_tenant_committed(&self, tenant: u32) -> Result<TenantData, StoreError> {
        let prefix = tenant_prefix(tenant);
        let txn = self.db.begin_read().map_err(db_err)?;
        let mut data = TenantData::default();

        let private = txn.open_table(TENANT_PROFILES).map_err(db_err)?;
        for entry in private.iter().map_err(db_err)? {
            let (key, value) = entry.map_err(db_err)?;
            if key.value().starts_with(&prefix) {
                data.profiles.push(decode_profile(key.value(), value.value())?);
            }
        }

        let deleted = txn.open_table(DELETED_EPHEMERAL).map_err(db_err)?;
        for entry in deleted.iter().map_err(db_err)? {
            let (key, value) = entry.map_err(db_err)?;
            if let Some(ssid) = key.value().strip_prefix(&prefix) {
                data.deleted_ephemeral.insert(ssid.to_string(), value.value());
            }
        }
        Ok(data)
    }
}

impl ProfileStore for RedbProfileStore {
    fn read(&mut self, tenant: u32) -> Result<StoreData, StoreError> {
        self.flush()?;
        let mut data = StoreData {
            tenant: self.read_tenant_committed(tenant)?,
            ..Default::default()
        };

        let txn = self.db.begin_read().map_err(db_err)?;
        let shared = txn.open_table(SHARED_PROFILES).map_err(db_err)?;
        for entry in shared.iter().map_err(db_err)? {
            let (key, value) = entry.map_err(db_err)?;
            data.shared.push(decode_profile(key.value(), value.value())?);
        }

        let addresses = txn.open_table(RANDOMIZED_ADDRESSES).map_err(db_err)?;
        let mut address_map = HashMap::new();
        for entry in addresses.iter().map_err(db_err)? {
            let (key, value) = entry.map_err(db_err)?;
            address_map.insert(key.value().to_string(), value.value().to_string());
        }
        data.address_map = address_map;
        Ok(data)
    }

    fn read_tenant(&mut self, tenant: u32) -> Result<TenantData, StoreError> {
        self.flush()?;
        self.read_tenant_committed(tenant)
    }

    fn write(&mut self, tenant: Option<u32>, data: &StoreData, force: bool) -> Result<(), StoreError> {
        let mut tenant = tenant;
        let mut data = data.clone();
        if let Some((pending_tenant, pending)) = self.pending.take() {
            match (pending_tenant, tenant) {
                // A shared-only write keeps the private section still waiting.
                (Some(_), None) => {
                    tenant = pending_tenant;
                    data.tenant = pending.tenant;
                }
                (Some(previous), Some(current)) if previous != current => {
                    if let Err(err) = self.commit(pending_tenant, &pending) {
                        self.pending = Some((pending_tenant, pending));
                        return Err(err);
                    }
                }
                _ => {}
            }
        }
        if !force {
            self.pending = Some((tenant, data));
            return Ok(());
        }
        self.commit(tenant, &data)
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        match self.pending.take() {
            Some((tenant, data)) => self.commit(tenant, &data),
            None => Ok(()),
        }
    }
}

impl Drop for RedbProfileStore {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            log::error!("failed to flush profile store on drop: {}", err);
        }
    }
}
