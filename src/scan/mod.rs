//! C4 — the scan executor: one full scan of one host.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::dispatcher::SharedState;
use crate::model::{HostEntry, HostPriceTable, HostSettings, IpNetUpdate, ScanRecord, ip_nets_equal};
use crate::net::AddressResolver;
use crate::store::HostStore;
use crate::transport::Transport;

/// The timeout budget given to the RHP-v3 follow-up once RHP-v2 has already
/// succeeded. Kept separate from the v2 phase's adaptive timeout so a slow or
/// stuck v3 call can never retroactively turn an observed v2 success into a
/// failure.
const PROTOCOL_DEADLINE_MARGIN: Duration = Duration::from_secs(4 * 60);

/// Everything a scan needs to talk to the outside world. Cheaply clonable —
/// every field is an `Arc`.
#[derive(Clone)]
pub struct ScanDeps {
    pub resolver: Arc<dyn AddressResolver>,
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn HostStore>,
}

/// The result of attempting one scan. `Cancelled` means no side effect of any
/// kind happened: no record, no counter update, no IP-net mutation.
#[derive(Debug)]
pub enum ScanOutcome {
    Recorded(ScanRecord),
    Cancelled,
}

struct ProtocolAttempt {
    latency: Duration,
    success: bool,
    error: String,
    settings: Option<HostSettings>,
    price_table: Option<HostPriceTable>,
}

/// The result of racing the two-phase handshake against the cancellation
/// token. Replaces a `Result<_, ()>` sentinel: `Cancelled` is a real outcome,
/// not an error.
enum ProtocolOutcome {
    Completed(ProtocolAttempt),
    Cancelled,
}

/// Runs RHP-v2 bounded by `v2_timeout`, then, only if it succeeds, runs the
/// RHP-v3 follow-up bounded by its own separate [`PROTOCOL_DEADLINE_MARGIN`].
/// A v3 timeout or error never turns an already-observed v2 success back into
/// a failure — it only costs the price-table snapshot.
async fn run_protocol(host: &HostEntry, transport: &dyn Transport, v2_timeout: Duration, cancel: CancellationToken) -> ProtocolOutcome {
    let start = Instant::now();

    let settings = match tokio::time::timeout(v2_timeout, transport.scan_v2(&host.address, &host.public_key, cancel.clone())).await {
        Ok(Ok(settings)) => settings,
        Ok(Err(crate::error::TransportError::Cancelled)) => return ProtocolOutcome::Cancelled,
        Ok(Err(e)) => {
            return ProtocolOutcome::Completed(ProtocolAttempt {
                latency: start.elapsed(),
                success: false,
                error: e.to_string(),
                settings: None,
                price_table: None,
            });
        },
        Err(_elapsed) => {
            return ProtocolOutcome::Completed(ProtocolAttempt {
                latency: start.elapsed(),
                success: false,
                error: "RHP-v2 handshake timed out".to_string(),
                settings: None,
                price_table: None,
            });
        },
    };

    let latency = start.elapsed();
    let price_table = match tokio::time::timeout(
        PROTOCOL_DEADLINE_MARGIN,
        transport.scan_v3(&settings.siamux_address, &host.public_key, cancel.clone()),
    )
    .await
    {
        Ok(Ok(price_table)) => Some(price_table),
        Ok(Err(crate::error::TransportError::Cancelled)) => return ProtocolOutcome::Cancelled,
        Ok(Err(e)) => {
            debug!(address = host.address, error:% = e; "RHP-v3 follow-up failed after RHP-v2 success");
            None
        },
        Err(_elapsed) => {
            debug!(address = host.address; "RHP-v3 follow-up timed out after RHP-v2 success");
            None
        },
    };

    ProtocolOutcome::Completed(ProtocolAttempt {
        latency,
        success: true,
        error: String::new(),
        settings: Some(settings),
        price_table,
    })
}

/// Performs one full scan of `host`. `state`/`latency`/`interactions` are the
/// dispatcher's shared, mutex-guarded structures — locked only for short,
/// non-blocking critical sections, never across an `.await`.
pub async fn scan_host(
    host: HostEntry,
    deps: ScanDeps,
    state: &Arc<Mutex<SharedState>>,
    cancel: CancellationToken,
) -> ScanOutcome {
    let scan_start = Utc::now();

    // Phase 1: address resolution. Failure doesn't fail the scan.
    let ip_update = match deps.resolver.lookup_ip_nets(&host.address).await {
        Ok(nets) if !ip_nets_equal(&nets, &host.ip_nets) => Some(IpNetUpdate {
            nets,
            changed_at: scan_start,
        }),
        Ok(_) => None,
        Err(e) => {
            debug!(address = host.address, error:% = e; "address resolution failed, scanning with stored address");
            None
        },
    };

    // Phase 2: advance the decay clock (no increment yet).
    state.lock().unwrap().interactions.decay_only(host.public_key, scan_start);

    // Phase 3: read the current adaptive timeout, which bounds the RHP-v2 leg.
    let adaptive_timeout = state.lock().unwrap().latency.timeout();

    // Phase 4: race the two-phase handshake against the process-wide
    // cancellation token. RHP-v2 and the RHP-v3 follow-up are bounded
    // separately inside `run_protocol`, so a slow v3 call can never flip an
    // already-observed v2 success into a failure.
    let attempt = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        outcome = run_protocol(&host, deps.transport.as_ref(), adaptive_timeout, cancel.clone()) => {
            match outcome {
                ProtocolOutcome::Completed(attempt) => Some(attempt),
                ProtocolOutcome::Cancelled => None,
            }
        }
    };

    let Some(attempt) = attempt else {
        return ScanOutcome::Cancelled;
    };

    // Phase 5: outcome classification and counter update. A failed scan is
    // routine and time-driven, not a warning condition.
    if attempt.success {
        state.lock().unwrap().interactions.increment_success(host.public_key, scan_start);
    } else {
        debug!(address = host.address, error = attempt.error; "scan failed");
        state.lock().unwrap().interactions.increment_failure(host.public_key, scan_start);
    }

    let record = ScanRecord {
        timestamp: scan_start,
        success: attempt.success,
        latency: attempt.latency,
        error: attempt.error,
        settings: attempt.settings,
        price_table: attempt.price_table,
    };

    // Phase 6: persistence. An error here is logged but does not fail the scan.
    if let Err(e) = deps
        .store
        .update_scan_history(&host.public_key, record.clone(), ip_update)
        .await
    {
        warn!(address = host.address, error:% = e; "failed to persist scan record");
    }

    // Phase 7: feed the latency tracker while it is still collecting.
    if record.success {
        let mut state = state.lock().unwrap();
        if state.latency.is_collecting() {
            state.latency.record(record.latency);
        }
    }

    ScanOutcome::Recorded(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HostPublicKey, IpNet};
    use crate::net::StaticResolver;
    use crate::store::InMemoryHostStore;
    use crate::transport::{HostScript, ScriptedTransport, Scripted};
    use std::net::{IpAddr, Ipv4Addr};

    fn key() -> HostPublicKey {
        HostPublicKey::from_bytes([7; 32])
    }

    fn settings() -> HostSettings {
        HostSettings {
            protocol_version: "2".into(),
            accepting_contracts: true,
            max_collateral: 1000,
            siamux_address: "sia://host:9983".into(),
        }
    }

    fn price_table() -> HostPriceTable {
        HostPriceTable {
            uid: "uid".into(),
            valid_until: Utc::now(),
            download_price_per_byte: 1,
            upload_price_per_byte: 1,
            storage_price_per_byte_per_block: 1,
        }
    }

    fn deps(transport: ScriptedTransport, resolver: StaticResolver) -> ScanDeps {
        ScanDeps {
            resolver: Arc::new(resolver),
            transport: Arc::new(transport),
            store: Arc::new(InMemoryHostStore::new()),
        }
    }

    #[tokio::test]
    async fn fresh_host_full_success_records_success_and_feeds_latency() {
        let host = HostEntry::new(key(), "host1".into(), Utc::now());
        let transport = ScriptedTransport::new();
        transport.set_script(
            key(),
            HostScript {
                v2: Scripted::Success(settings(), Duration::from_millis(5)),
                v3: Scripted::Success(price_table(), Duration::from_millis(5)),
                benchmark: Scripted::Failure(crate::error::TransportError::Timeout, Duration::ZERO),
            },
        );
        let mut resolver = StaticResolver::new();
        resolver.set("host1", vec![IpNet {
            addr: IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)),
            prefix_len: 32,
        }]);

        let state = Arc::new(Mutex::new(SharedState::default()));
        let cancel = CancellationToken::new();

        let outcome = scan_host(host, deps(transport, resolver), &state, cancel).await;

        match outcome {
            ScanOutcome::Recorded(record) => {
                assert!(record.success);
                assert!(record.price_table.is_some());
                assert!(record.settings.is_some());
            },
            ScanOutcome::Cancelled => panic!("expected a recorded outcome"),
        }
        let locked = state.lock().unwrap();
        assert_eq!(locked.latency.len(), 1);
        let counters = locked.interactions.get(&key()).copied().unwrap();
        assert_eq!(counters.recent_successes, 1.0);
    }

    #[tokio::test]
    async fn cancellation_mid_scan_produces_no_record() {
        let host = HostEntry::new(key(), "host1".into(), Utc::now());
        let transport = ScriptedTransport::new();
        transport.set_script(
            key(),
            HostScript {
                v2: Scripted::Success(settings(), Duration::from_millis(5)),
                v3: Scripted::HangUntilCancelled,
                benchmark: Scripted::Failure(crate::error::TransportError::Timeout, Duration::ZERO),
            },
        );
        let resolver = StaticResolver::new();

        let state = Arc::new(Mutex::new(SharedState::default()));
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let scan = tokio::spawn(async move { scan_host(host, deps(transport, resolver), &state, cancel).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel2.cancel();
        let outcome = scan.await.unwrap();
        assert!(matches!(outcome, ScanOutcome::Cancelled));
    }

    #[tokio::test]
    async fn unreachable_host_records_failure() {
        let host = HostEntry::new(key(), "host1".into(), Utc::now());
        let transport = ScriptedTransport::new();
        transport.set_script(
            key(),
            HostScript {
                v2: Scripted::Failure(crate::error::TransportError::Timeout, Duration::from_millis(5)),
                v3: Scripted::Failure(crate::error::TransportError::Timeout, Duration::ZERO),
                benchmark: Scripted::Failure(crate::error::TransportError::Timeout, Duration::ZERO),
            },
        );
        let resolver = StaticResolver::new();

        let state = Arc::new(Mutex::new(SharedState::default()));
        let cancel = CancellationToken::new();

        let outcome = scan_host(host, deps(transport, resolver), &state, cancel).await;
        match outcome {
            ScanOutcome::Recorded(record) => {
                assert!(!record.success);
                assert!(!record.error.is_empty());
            },
            ScanOutcome::Cancelled => panic!("expected a recorded outcome"),
        }
        assert_eq!(state.lock().unwrap().latency.len(), 0);
    }
}
