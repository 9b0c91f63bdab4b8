//! C6 — the dispatcher: the scheduling loop governing both queues.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::benchmark::{BenchmarkDeps, benchmark_host};
use crate::config::ScannerConfig;
use crate::interaction::InteractionAccumulator;
use crate::interval::scan_interval;
use crate::latency::LatencyTracker;
use crate::lifecycle::TaskGroup;
use crate::model::{FlightKind, HostEntry, HostPublicKey};
use crate::net::AddressResolver;
use crate::scan::{ScanDeps, scan_host};
use crate::store::HostStore;
use crate::syncer::Syncer;
use crate::transport::Transport;

/// Everything the dispatcher's single mutex protects: queues, the in-flight
/// map, the active-scan counter, the benchmark singleton flag, the latency
/// tracker, and the per-host decayed-interaction map. Locked only for short,
/// non-blocking critical sections — never across an `.await` or network/store
/// call.
pub struct SharedState {
    scan_queue: VecDeque<HostEntry>,
    benchmark_queue: VecDeque<HostEntry>,
    in_flight: HashMap<HostPublicKey, FlightKind>,
    active_scans: usize,
    benchmarking: bool,
    pub latency: LatencyTracker,
    pub interactions: InteractionAccumulator,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            scan_queue: VecDeque::new(),
            benchmark_queue: VecDeque::new(),
            in_flight: HashMap::new(),
            active_scans: 0,
            benchmarking: false,
            latency: LatencyTracker::new(),
            interactions: InteractionAccumulator::new(),
        }
    }
}

/// Classifies a host into scan or benchmark, per §4.1: a host with empty scan
/// history always scans; otherwise it scans if the time since its last scan
/// attempt has reached the interval policy's threshold.
fn classify(host: &HostEntry, now: chrono::DateTime<Utc>) -> FlightKind {
    let Some(last_attempt) = host.last_scan_attempt() else {
        return FlightKind::Scan;
    };
    let interval = scan_interval(host.last_seen, now);
    let since = (now - last_attempt).to_std().unwrap_or(Duration::ZERO);
    if since >= interval {
        FlightKind::Scan
    } else {
        FlightKind::Benchmark
    }
}

/// RAII release of one host's in-flight slot (and, for scans, the active-scan
/// counter; for benchmarks, the singleton flag). Runs on every exit path of
/// the worker task, including cancellation.
struct InFlightGuard {
    state: Arc<Mutex<SharedState>>,
    key: HostPublicKey,
    kind: FlightKind,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.in_flight.remove(&self.key);
        match self.kind {
            FlightKind::Scan => state.active_scans = state.active_scans.saturating_sub(1),
            FlightKind::Benchmark => state.benchmarking = false,
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn HostStore>,
    syncer: Arc<dyn Syncer>,
    resolver: Arc<dyn AddressResolver>,
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<SharedState>>,
    group: Arc<TaskGroup>,
    config: ScannerConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn HostStore>,
        syncer: Arc<dyn Syncer>,
        resolver: Arc<dyn AddressResolver>,
        transport: Arc<dyn Transport>,
        group: Arc<TaskGroup>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            store,
            syncer,
            resolver,
            transport,
            state: Arc::new(Mutex::new(SharedState::default())),
            group,
            config,
        }
    }

    /// Runs the dispatcher loop until the task group's cancellation token
    /// fires. Returns once every launched worker has been handed off — the
    /// caller is expected to `group.close().await` afterwards to drain them.
    pub async fn run(&self) {
        let cancel = self.group.cancellation_token();

        // Step 1: startup wait.
        loop {
            if cancel.is_cancelled() {
                return;
            }
            if self.syncer.synced().await {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.config.sync_poll_interval_secs)) => {},
                _ = cancel.cancelled() => return,
            }
        }
        info!("syncer reports synced, starting dispatch loop");

        loop {
            if cancel.is_cancelled() {
                return;
            }

            self.pull_batch().await;
            self.drain_scans(&cancel);
            self.drain_benchmark(&cancel);

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.config.dispatch_tick_secs)) => {},
                _ = cancel.cancelled() => return,
            }
        }
    }

    async fn pull_batch(&self) {
        let hosts = match self.store.get_hosts_for_scan(self.config.batch_size).await {
            Ok(hosts) => hosts,
            Err(e) => {
                let err = crate::error::ScanError::from(e);
                warn!(error:% = err; "failed to pull batch from store");
                return;
            },
        };

        let now = Utc::now();
        let mut state = self.state.lock().unwrap();
        for host in hosts {
            if state.in_flight.contains_key(&host.public_key) {
                continue;
            }
            match classify(&host, now) {
                FlightKind::Scan => {
                    state.in_flight.insert(host.public_key, FlightKind::Scan);
                    state.scan_queue.push_back(host);
                },
                FlightKind::Benchmark => {
                    state.in_flight.insert(host.public_key, FlightKind::Benchmark);
                    state.benchmark_queue.push_back(host);
                },
            }
        }
    }

    fn drain_scans(&self, cancel: &CancellationToken) {
        loop {
            let host = {
                let mut state = self.state.lock().unwrap();
                if state.active_scans >= self.config.max_concurrent_scans {
                    break;
                }
                let Some(host) = state.scan_queue.pop_front() else {
                    break;
                };
                state.active_scans += 1;
                host
            };

            let Ok(task_guard) = TaskGroup::register(&self.group) else {
                // Group is stopping: undo the reservation and stop draining.
                let mut state = self.state.lock().unwrap();
                state.active_scans = state.active_scans.saturating_sub(1);
                state.in_flight.remove(&host.public_key);
                break;
            };

            let deps = ScanDeps {
                resolver: self.resolver.clone(),
                transport: self.transport.clone(),
                store: self.store.clone(),
            };
            let in_flight_guard = InFlightGuard {
                state: self.state.clone(),
                key: host.public_key,
                kind: FlightKind::Scan,
            };
            let state = self.state.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let _task_guard = task_guard;
                let _in_flight_guard = in_flight_guard;
                scan_host(host, deps, &state, cancel).await
            });
        }
    }

    fn drain_benchmark(&self, cancel: &CancellationToken) {
        let host = {
            let mut state = self.state.lock().unwrap();
            if state.benchmarking {
                return;
            }
            let Some(host) = state.benchmark_queue.pop_front() else {
                return;
            };
            state.benchmarking = true;
            host
        };

        let Ok(task_guard) = TaskGroup::register(&self.group) else {
            let mut state = self.state.lock().unwrap();
            state.benchmarking = false;
            state.in_flight.remove(&host.public_key);
            return;
        };

        let deps = BenchmarkDeps {
            transport: self.transport.clone(),
            store: self.store.clone(),
        };
        let in_flight_guard = InFlightGuard {
            state: self.state.clone(),
            key: host.public_key,
            kind: FlightKind::Benchmark,
        };
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let _task_guard = task_guard;
            let _in_flight_guard = in_flight_guard;
            debug!(address = host.address; "starting benchmark");
            benchmark_host(host, deps, cancel).await
        });
    }
}
