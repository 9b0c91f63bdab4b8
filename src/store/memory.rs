use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::{HostStore, StoreError, StoreResult};
use crate::model::{BenchmarkRecord, HostEntry, HostPublicKey, IpNetUpdate, ScanRecord};

/// An in-memory host store backed by a single mutex, for tests and the demo
/// binary. `get_hosts_for_scan` makes no attempt to dedupe by due-ness — the
/// dispatcher's in-flight map is what prevents redundant work.
#[derive(Debug, Default)]
pub struct InMemoryHostStore {
    hosts: Mutex<HashMap<HostPublicKey, HostEntry>>,
}

impl InMemoryHostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: HostEntry) {
        self.hosts.lock().unwrap().insert(entry.public_key, entry);
    }

    pub fn get(&self, key: &HostPublicKey) -> Option<HostEntry> {
        self.hosts.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl HostStore for InMemoryHostStore {
    async fn get_hosts_for_scan(&self, batch_size: usize) -> StoreResult<Vec<HostEntry>> {
        let hosts = self.hosts.lock().unwrap();
        Ok(hosts.values().take(batch_size).cloned().collect())
    }

    async fn update_scan_history(
        &self,
        key: &HostPublicKey,
        record: ScanRecord,
        ip_update: Option<IpNetUpdate>,
    ) -> StoreResult<()> {
        let mut hosts = self.hosts.lock().unwrap();
        let entry = hosts
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        if let Some(update) = ip_update {
            entry.ip_nets = update.nets;
            entry.last_ip_change = Some(update.changed_at);
        }
        if record.success {
            entry.last_seen = Some(record.timestamp);
            if let Some(settings) = &record.settings {
                entry.settings = Some(settings.clone());
            }
            if let Some(price_table) = &record.price_table {
                entry.price_table = Some(price_table.clone());
            }
        }
        if entry.first_seen.is_none() {
            entry.first_seen = Some(record.timestamp);
        }
        entry.scan_history.push(record);
        Ok(())
    }

    async fn update_benchmark(&self, key: &HostPublicKey, record: BenchmarkRecord) -> StoreResult<()> {
        let mut hosts = self.hosts.lock().unwrap();
        let entry = hosts
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        entry.last_benchmark = Some(record);
        Ok(())
    }
}
