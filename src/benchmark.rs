//! C5 — the benchmark executor: one throughput measurement of one host
//! already known to be reachable. Serialization (at most one in flight) is
//! the dispatcher's job via the `benchmarking` flag; this module only
//! performs the measurement and is agnostic to that bookkeeping.

use std::sync::Arc;

use chrono::Utc;
use log::warn;
use tokio_util::sync::CancellationToken;

use crate::model::{BenchmarkRecord, HostEntry};
use crate::store::HostStore;
use crate::transport::Transport;

#[derive(Clone)]
pub struct BenchmarkDeps {
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn HostStore>,
}

#[derive(Debug)]
pub enum BenchmarkOutcome {
    Recorded(BenchmarkRecord),
    Cancelled,
}

/// Runs one benchmark of `host`. Returns `Cancelled` if the stop token fires
/// before the transport call completes; no record is written in that case.
pub async fn benchmark_host(host: HostEntry, deps: BenchmarkDeps, cancel: CancellationToken) -> BenchmarkOutcome {
    let Some(settings) = host.settings.clone() else {
        // No prior successful scan means no settings to benchmark against;
        // this should not happen given the dispatcher only routes
        // already-scanned hosts here, but we refuse silently rather than panic.
        return BenchmarkOutcome::Cancelled;
    };

    let timestamp = Utc::now();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = deps.transport.benchmark(&host.address, &host.public_key, &settings, cancel.clone()) => Some(result),
    };

    let Some(result) = result else {
        return BenchmarkOutcome::Cancelled;
    };

    let record = match result {
        Ok((upload_bytes_per_sec, download_bytes_per_sec, time_to_first_byte)) => BenchmarkRecord {
            timestamp,
            success: true,
            error: String::new(),
            upload_bytes_per_sec,
            download_bytes_per_sec,
            time_to_first_byte,
        },
        Err(crate::error::TransportError::Cancelled) => return BenchmarkOutcome::Cancelled,
        Err(e) => BenchmarkRecord {
            timestamp,
            success: false,
            error: e.to_string(),
            upload_bytes_per_sec: 0.0,
            download_bytes_per_sec: 0.0,
            time_to_first_byte: std::time::Duration::ZERO,
        },
    };

    if let Err(e) = deps.store.update_benchmark(&host.public_key, record.clone()).await {
        warn!(address = host.address, error:% = e; "failed to persist benchmark record");
    }

    BenchmarkOutcome::Recorded(record)
}
