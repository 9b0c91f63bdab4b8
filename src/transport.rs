//! The transport collaborator (§6): two single-call handshake helpers plus a
//! throughput benchmark. Each stands in for "establish a session, invoke the
//! RPC, tear the session down" — the wire encoding is explicitly out of
//! scope (SPEC_FULL.md §1).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::model::{HostPriceTable, HostPublicKey, HostSettings};

#[async_trait]
pub trait Transport: Send + Sync {
    /// The RHP-v2 handshake: obtains a settings snapshot.
    async fn scan_v2(
        &self,
        address: &str,
        key: &HostPublicKey,
        cancel: CancellationToken,
    ) -> Result<HostSettings, TransportError>;

    /// The RHP-v3 handshake against the SiaMux endpoint advertised by
    /// `scan_v2`'s settings: obtains a price-table snapshot via a
    /// zero-cost payment callback.
    async fn scan_v3(
        &self,
        siamux_address: &str,
        key: &HostPublicKey,
        cancel: CancellationToken,
    ) -> Result<HostPriceTable, TransportError>;

    /// A small upload, small download, and TTFB measurement. Returns
    /// (upload bytes/sec, download bytes/sec, time to first byte).
    async fn benchmark(
        &self,
        address: &str,
        key: &HostPublicKey,
        settings: &HostSettings,
        cancel: CancellationToken,
    ) -> Result<(f64, f64, Duration), TransportError>;
}

/// A single canned response for one handshake phase, used by
/// [`ScriptedTransport`] to drive the S1-S6 integration scenarios
/// deterministically.
#[derive(Debug, Clone)]
pub enum Scripted<T> {
    Success(T, Duration),
    Failure(TransportError, Duration),
    /// Hangs until the cancellation token fires, then returns
    /// `TransportError::Cancelled`. Used to exercise shutdown-mid-scan (S5).
    HangUntilCancelled,
}

async fn run_scripted<T: Clone>(script: Scripted<T>, cancel: &CancellationToken) -> Result<T, TransportError> {
    match script {
        Scripted::Success(value, delay) => {
            tokio::select! {
                _ = tokio::time::sleep(delay) => Ok(value),
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
            }
        },
        Scripted::Failure(err, delay) => {
            tokio::select! {
                _ = tokio::time::sleep(delay) => Err(err),
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
            }
        },
        Scripted::HangUntilCancelled => {
            cancel.cancelled().await;
            Err(TransportError::Cancelled)
        },
    }
}

#[derive(Debug, Clone)]
pub struct HostScript {
    pub v2: Scripted<HostSettings>,
    pub v3: Scripted<HostPriceTable>,
    pub benchmark: Scripted<(f64, f64, Duration)>,
}

/// A scripted transport double: each host's behavior is configured up
/// front and replayed deterministically, rather than hitting any network.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<HostPublicKey, HostScript>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_script(&self, key: HostPublicKey, script: HostScript) {
        self.scripts.lock().unwrap().insert(key, script);
    }

    fn script_for(&self, key: &HostPublicKey) -> Option<HostScript> {
        self.scripts.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn scan_v2(
        &self,
        _address: &str,
        key: &HostPublicKey,
        cancel: CancellationToken,
    ) -> Result<HostSettings, TransportError> {
        let script = self
            .script_for(key)
            .map(|s| s.v2)
            .unwrap_or(Scripted::Failure(TransportError::Timeout, Duration::ZERO));
        run_scripted(script, &cancel).await
    }

    async fn scan_v3(
        &self,
        _siamux_address: &str,
        key: &HostPublicKey,
        cancel: CancellationToken,
    ) -> Result<HostPriceTable, TransportError> {
        let script = self
            .script_for(key)
            .map(|s| s.v3)
            .unwrap_or(Scripted::Failure(TransportError::Timeout, Duration::ZERO));
        run_scripted(script, &cancel).await
    }

    async fn benchmark(
        &self,
        _address: &str,
        key: &HostPublicKey,
        _settings: &HostSettings,
        cancel: CancellationToken,
    ) -> Result<(f64, f64, Duration), TransportError> {
        let script = self
            .script_for(key)
            .map(|s| s.benchmark)
            .unwrap_or(Scripted::Failure(TransportError::Timeout, Duration::ZERO));
        run_scripted(script, &cancel).await
    }
}
