//! Persistence layer (A1): the narrow `HostStore` interface the scanner
//! consumes, plus two implementations.

mod error;
mod memory;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryHostStore;
pub use sqlite::SqliteHostStore;

use async_trait::async_trait;

use crate::model::{BenchmarkRecord, HostEntry, HostPublicKey, IpNetUpdate, ScanRecord};

/// Storage of host records and their scan/benchmark history. Free to reorder,
/// dedupe, or paginate the batch it returns from `get_hosts_for_scan`.
#[async_trait]
pub trait HostStore: Send + Sync {
    async fn get_hosts_for_scan(&self, batch_size: usize) -> StoreResult<Vec<HostEntry>>;

    async fn update_scan_history(
        &self,
        key: &HostPublicKey,
        record: ScanRecord,
        ip_update: Option<IpNetUpdate>,
    ) -> StoreResult<()>;

    async fn update_benchmark(&self, key: &HostPublicKey, record: BenchmarkRecord) -> StoreResult<()>;
}
