//! Error taxonomy for the scanning subsystem, following the teacher crate's
//! `Fatal` / `Intermittent` / `Timeout` shape.

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the dispatcher loop itself. Scan and benchmark
/// executors never propagate errors this far — see SPEC_FULL.md §7.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("fatal error: {0}")]
    Fatal(#[from] anyhow::Error),

    #[error("intermittent error: {0}")]
    Intermittent(String),

    #[error("database error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from the transport collaborator (RHP-v2/v3 handshakes and the
/// benchmark protocol). The wire encoding itself is out of scope; this is
/// just enough shape for the executors to classify outcomes.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("dial or handshake timed out")]
    Timeout,
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("operation cancelled")]
    Cancelled,
}

/// Errors from the address-resolution collaborator.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("resolution failed: {0}")]
    Failed(String),
}
