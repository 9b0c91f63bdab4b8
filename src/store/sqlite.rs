//! SQLite-backed `HostStore`, following the teacher's `db` module
//! conventions: a pooled connection, blocking work shipped to
//! `spawn_blocking`, rows mapped with `serde_rusqlite`, settings/price-table
//! snapshots stored as JSON columns.

use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, named_params};
use rusqlite_migration::{M, Migrations};
use serde::Deserialize;
use serde_rusqlite::from_rows;

use super::{HostStore, StoreError, StoreResult};
use crate::model::{
    BenchmarkRecord, HostEntry, HostPriceTable, HostPublicKey, HostSettings, InteractionCounters, IpNet, IpNetUpdate,
    ScanRecord,
};

static MIGRATIONS: LazyLock<Migrations<'static>> = LazyLock::new(|| {
    Migrations::new(vec![M::up(
        r#"
        CREATE TABLE hosts (
            public_key      TEXT PRIMARY KEY,
            address         TEXT NOT NULL,
            ip_nets         TEXT NOT NULL DEFAULT '[]',
            last_ip_change  TEXT,
            first_seen      TEXT,
            last_seen       TEXT,
            historic_successes REAL NOT NULL DEFAULT 0,
            historic_failures  REAL NOT NULL DEFAULT 0,
            recent_successes   REAL NOT NULL DEFAULT 0,
            recent_failures    REAL NOT NULL DEFAULT 0,
            interactions_updated TEXT NOT NULL,
            settings        TEXT,
            price_table     TEXT,
            last_benchmark  TEXT
        );

        CREATE TABLE scan_history (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            public_key  TEXT NOT NULL REFERENCES hosts(public_key),
            timestamp   TEXT NOT NULL,
            success     INTEGER NOT NULL,
            latency_ms  INTEGER NOT NULL,
            error       TEXT NOT NULL,
            settings    TEXT,
            price_table TEXT
        );

        CREATE INDEX idx_scan_history_public_key ON scan_history(public_key, timestamp);
        "#,
    )])
});

#[derive(Deserialize)]
struct HostRow {
    public_key: String,
    address: String,
    ip_nets: String,
    last_ip_change: Option<DateTime<Utc>>,
    first_seen: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    historic_successes: f64,
    historic_failures: f64,
    recent_successes: f64,
    recent_failures: f64,
    interactions_updated: DateTime<Utc>,
    settings: Option<String>,
    price_table: Option<String>,
    last_benchmark: Option<String>,
}

#[derive(Deserialize)]
struct ScanRecordRow {
    timestamp: DateTime<Utc>,
    success: bool,
    latency_ms: i64,
    error: String,
    settings: Option<String>,
    price_table: Option<String>,
}

fn decode_public_key(hex_str: &str) -> StoreResult<HostPublicKey> {
    let bytes = hex::decode(hex_str).map_err(|e| StoreError::NotFound(format!("malformed public key: {e}")))?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| StoreError::NotFound("public key is not 32 bytes".to_string()))?;
    Ok(HostPublicKey::from_bytes(array))
}

fn row_to_entry(row: HostRow, history: Vec<ScanRecord>) -> StoreResult<HostEntry> {
    let ip_nets: Vec<IpNet> = serde_json::from_str(&row.ip_nets)?;
    let settings: Option<HostSettings> = row.settings.as_deref().map(serde_json::from_str).transpose()?;
    let price_table: Option<HostPriceTable> = row.price_table.as_deref().map(serde_json::from_str).transpose()?;
    let last_benchmark: Option<BenchmarkRecord> =
        row.last_benchmark.as_deref().map(serde_json::from_str).transpose()?;

    Ok(HostEntry {
        public_key: decode_public_key(&row.public_key)?,
        address: row.address,
        ip_nets,
        last_ip_change: row.last_ip_change,
        first_seen: row.first_seen,
        last_seen: row.last_seen,
        scan_history: history,
        last_benchmark,
        interactions: InteractionCounters {
            historic_successes: row.historic_successes,
            historic_failures: row.historic_failures,
            recent_successes: row.recent_successes,
            recent_failures: row.recent_failures,
            last_updated: row.interactions_updated,
        },
        settings,
        price_table,
    })
}

fn scan_history_for(conn: &Connection, public_key: &str) -> StoreResult<Vec<ScanRecord>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT timestamp, success, latency_ms, error, settings, price_table
        FROM scan_history
        WHERE public_key = :public_key
        ORDER BY timestamp ASC
        "#,
    )?;
    let rows = stmt.query(named_params! { ":public_key": public_key })?;
    from_rows::<ScanRecordRow>(rows)
        .map(|row| {
            let row = row?;
            Ok(ScanRecord {
                timestamp: row.timestamp,
                success: row.success,
                latency: std::time::Duration::from_millis(row.latency_ms.max(0) as u64),
                error: row.error,
                settings: row.settings.as_deref().map(serde_json::from_str).transpose()?,
                price_table: row.price_table.as_deref().map(serde_json::from_str).transpose()?,
            })
        })
        .collect::<StoreResult<Vec<_>>>()
}

/// `HostStore` backed by SQLite via a pooled connection. All blocking calls
/// are shipped to `spawn_blocking`, mirroring the teacher's `ScanDbHandler`.
pub struct SqliteHostStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteHostStore {
    pub fn open(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let manager = SqliteConnectionManager::file(db_path.as_ref());
        let pool = Pool::new(manager)?;
        {
            let mut conn = pool.get()?;
            MIGRATIONS.to_latest(&mut conn)?;
        }
        Ok(Self { pool })
    }

    /// An in-memory SQLite pool, for tests that want the real SQL path
    /// without touching disk.
    pub fn open_in_memory() -> StoreResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        {
            let mut conn = pool.get()?;
            MIGRATIONS.to_latest(&mut conn)?;
        }
        Ok(Self { pool })
    }

    pub fn insert_host(&self, entry: &HostEntry) -> StoreResult<()> {
        let conn = self.pool.get()?;
        conn.execute(
            r#"
            INSERT OR IGNORE INTO hosts (public_key, address, ip_nets, interactions_updated)
            VALUES (:public_key, :address, '[]', :now)
            "#,
            named_params! {
                ":public_key": entry.public_key.to_string(),
                ":address": entry.address,
                ":now": entry.interactions.last_updated,
            },
        )?;
        Ok(())
    }
}

#[async_trait]
impl HostStore for SqliteHostStore {
    async fn get_hosts_for_scan(&self, batch_size: usize) -> StoreResult<Vec<HostEntry>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let mut stmt = conn.prepare_cached(
                r#"
                SELECT public_key, address, ip_nets, last_ip_change, first_seen, last_seen,
                       historic_successes, historic_failures, recent_successes, recent_failures,
                       interactions_updated, settings, price_table, last_benchmark
                FROM hosts
                ORDER BY last_seen ASC NULLS FIRST
                LIMIT :batch_size
                "#,
            )?;
            let rows = stmt.query(named_params! { ":batch_size": batch_size as i64 })?;
            let host_rows = from_rows::<HostRow>(rows).collect::<Result<Vec<_>, _>>()?;

            let mut entries = Vec::with_capacity(host_rows.len());
            for row in host_rows {
                let history = scan_history_for(&conn, &row.public_key)?;
                entries.push(row_to_entry(row, history)?);
            }
            Ok::<_, StoreError>(entries)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    async fn update_scan_history(
        &self,
        key: &HostPublicKey,
        record: ScanRecord,
        ip_update: Option<IpNetUpdate>,
    ) -> StoreResult<()> {
        let pool = self.pool.clone();
        let key_hex = key.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;

            let settings_json = record.settings.as_ref().map(serde_json::to_string).transpose()?;
            let price_table_json = record.price_table.as_ref().map(serde_json::to_string).transpose()?;

            tx.execute(
                r#"
                INSERT INTO scan_history (public_key, timestamp, success, latency_ms, error, settings, price_table)
                VALUES (:public_key, :timestamp, :success, :latency_ms, :error, :settings, :price_table)
                "#,
                named_params! {
                    ":public_key": key_hex,
                    ":timestamp": record.timestamp,
                    ":success": record.success,
                    ":latency_ms": record.latency.as_millis() as i64,
                    ":error": record.error,
                    ":settings": settings_json,
                    ":price_table": price_table_json,
                },
            )?;

            if let Some(update) = &ip_update {
                let nets_json = serde_json::to_string(&update.nets)?;
                tx.execute(
                    r#"
                    UPDATE hosts SET ip_nets = :ip_nets, last_ip_change = :changed_at
                    WHERE public_key = :public_key
                    "#,
                    named_params! {
                        ":ip_nets": nets_json,
                        ":changed_at": update.changed_at,
                        ":public_key": key_hex,
                    },
                )?;
            }

            if record.success {
                tx.execute(
                    r#"
                    UPDATE hosts
                    SET last_seen = :last_seen,
                        first_seen = COALESCE(first_seen, :last_seen),
                        settings = COALESCE(:settings, settings),
                        price_table = COALESCE(:price_table, price_table)
                    WHERE public_key = :public_key
                    "#,
                    named_params! {
                        ":last_seen": record.timestamp,
                        ":settings": settings_json,
                        ":price_table": price_table_json,
                        ":public_key": key_hex,
                    },
                )?;
            } else {
                tx.execute(
                    r#"
                    UPDATE hosts SET first_seen = COALESCE(first_seen, :timestamp)
                    WHERE public_key = :public_key
                    "#,
                    named_params! {
                        ":timestamp": record.timestamp,
                        ":public_key": key_hex,
                    },
                )?;
            }

            tx.commit()?;
            Ok::<_, StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    async fn update_benchmark(&self, key: &HostPublicKey, record: BenchmarkRecord) -> StoreResult<()> {
        let pool = self.pool.clone();
        let key_hex = key.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let record_json = serde_json::to_string(&record)?;
            let changed = conn.execute(
                r#"
                UPDATE hosts SET last_benchmark = :record WHERE public_key = :public_key
                "#,
                named_params! {
                    ":record": record_json,
                    ":public_key": key_hex,
                },
            )?;
            if changed == 0 {
                warn!(public_key = key_hex; "benchmark recorded for unknown host");
                return Err(StoreError::NotFound(key_hex));
            }
            debug!(public_key = key_hex; "benchmark recorded");
            Ok::<_, StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

impl std::fmt::Debug for SqliteHostStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteHostStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> HostPublicKey {
        HostPublicKey::from_bytes([b; 32])
    }

    #[tokio::test]
    async fn migrations_apply_and_round_trip() {
        let store = SqliteHostStore::open_in_memory().unwrap();
        let now = Utc::now();
        let entry = HostEntry::new(key(1), "sia://host1".into(), now);
        store.insert_host(&entry).unwrap();

        let record = ScanRecord {
            timestamp: now,
            success: true,
            latency: std::time::Duration::from_millis(120),
            error: String::new(),
            settings: None,
            price_table: None,
        };
        store.update_scan_history(&key(1), record, None).await.unwrap();

        let hosts = store.get_hosts_for_scan(10).await.unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].scan_history.len(), 1);
        assert!(hosts[0].last_seen.is_some());
    }

    #[tokio::test]
    async fn benchmark_update_on_unknown_host_errors() {
        let store = SqliteHostStore::open_in_memory().unwrap();
        let record = BenchmarkRecord {
            timestamp: Utc::now(),
            success: true,
            error: String::new(),
            upload_bytes_per_sec: 1.0,
            download_bytes_per_sec: 1.0,
            time_to_first_byte: std::time::Duration::from_millis(10),
        };
        let result = store.update_benchmark(&key(9), record).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
