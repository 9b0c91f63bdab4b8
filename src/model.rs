//! Core data types for the host-scanning subsystem.
//!
//! These mirror the data model described for the reputation database: a
//! [`HostEntry`] is the unit of scheduling, and it accumulates [`ScanRecord`]s
//! and a single [`BenchmarkRecord`] over its lifetime.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque public key identifying a host, unique within the database.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostPublicKey(pub [u8; 32]);

impl HostPublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for HostPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostPublicKey({})", hex::encode(self.0))
    }
}

impl fmt::Display for HostPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A single IP network observed for a host, e.g. `203.0.113.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpNet {
    pub addr: IpAddr,
    pub prefix_len: u8,
}

impl fmt::Display for IpNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

/// Compares two IP-network sets for equality, ignoring order and duplicates.
pub fn ip_nets_equal(a: &[IpNet], b: &[IpNet]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|net| b.contains(net))
}

/// Settings snapshot obtained from a successful RHP-v2 handshake.
///
/// The wire encoding of the real handshake is out of scope here; this is the
/// shape the scanner needs downstream: whether the host is still accepting
/// contracts, and the SiaMux endpoint to use for the RHP-v3 follow-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    pub protocol_version: String,
    pub accepting_contracts: bool,
    pub max_collateral: u64,
    pub siamux_address: String,
}

/// Price-table snapshot obtained from a successful RHP-v3 handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostPriceTable {
    pub uid: String,
    pub valid_until: DateTime<Utc>,
    pub download_price_per_byte: u64,
    pub upload_price_per_byte: u64,
    pub storage_price_per_byte_per_block: u64,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// One scan attempt against a host. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(with = "duration_millis")]
    pub latency: Duration,
    /// Empty on success.
    pub error: String,
    pub settings: Option<HostSettings>,
    pub price_table: Option<HostPriceTable>,
}

/// One throughput benchmark against a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: String,
    pub upload_bytes_per_sec: f64,
    pub download_bytes_per_sec: f64,
    #[serde(with = "duration_millis")]
    pub time_to_first_byte: Duration,
}

/// Decayed success/failure aggregates feeding the downstream scorer.
///
/// `historic_*` never decays; `recent_*` decays toward zero with
/// [`crate::interaction::RECENT_HALF_LIFE`]. See DESIGN.md for why this
/// reading of the decay law was chosen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InteractionCounters {
    pub historic_successes: f64,
    pub historic_failures: f64,
    pub recent_successes: f64,
    pub recent_failures: f64,
    pub last_updated: DateTime<Utc>,
}

impl InteractionCounters {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            historic_successes: 0.0,
            historic_failures: 0.0,
            recent_successes: 0.0,
            recent_failures: 0.0,
            last_updated: now,
        }
    }
}

/// The unit of scheduling: everything the dispatcher and executors need to
/// know about a single host.
#[derive(Debug, Clone)]
pub struct HostEntry {
    pub public_key: HostPublicKey,
    pub address: String,
    pub ip_nets: Vec<IpNet>,
    pub last_ip_change: Option<DateTime<Utc>>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub scan_history: Vec<ScanRecord>,
    pub last_benchmark: Option<BenchmarkRecord>,
    pub interactions: InteractionCounters,
    pub settings: Option<HostSettings>,
    pub price_table: Option<HostPriceTable>,
}

impl HostEntry {
    /// Creates a freshly discovered host with no scan history.
    pub fn new(public_key: HostPublicKey, address: String, now: DateTime<Utc>) -> Self {
        Self {
            public_key,
            address,
            ip_nets: Vec::new(),
            last_ip_change: None,
            first_seen: None,
            last_seen: None,
            scan_history: Vec::new(),
            last_benchmark: None,
            interactions: InteractionCounters::new(now),
            settings: None,
            price_table: None,
        }
    }

    /// The timestamp of the most recent scan attempt, if any.
    pub fn last_scan_attempt(&self) -> Option<DateTime<Utc>> {
        self.scan_history.last().map(|r| r.timestamp)
    }
}

/// A staged change to a host's IP-network footprint, applied atomically with
/// the scan record that observed it.
#[derive(Debug, Clone)]
pub struct IpNetUpdate {
    pub nets: Vec<IpNet>,
    pub changed_at: DateTime<Utc>,
}

/// Discriminates what kind of work a host is currently performing, tracked by
/// the dispatcher's in-flight map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightKind {
    Scan,
    Benchmark,
}
